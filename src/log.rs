// src/log.rs
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::mem;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::error::MinnowResult;
use crate::queue::BlockQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn tag(self) -> &'static str {
        match self {
            LogLevel::Debug => "[debug]",
            LogLevel::Info => "[info] ",
            LogLevel::Warn => "[warn] ",
            LogLevel::Error => "[error]",
        }
    }
}

struct LogFile {
    file: File,
    dir: PathBuf,
    name: String,
    today: i32,
    count: u64,
    split_lines: u64,
}

impl LogFile {
    fn open(path: &Path, split_lines: u64) -> MinnowResult<Self> {
        let dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "server.log".to_string());
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(&dir)?;
        }
        let (tm, _) = local_time();
        let full = dir.join(dated_name(&tm, &name, None));
        let file = OpenOptions::new().create(true).append(true).open(full)?;
        Ok(Self {
            file,
            dir,
            name,
            today: tm.tm_mday,
            count: 0,
            split_lines,
        })
    }

    /// Append one formatted line, rotating on day change or when the line
    /// count hits a multiple of the split threshold.
    fn write_line(&mut self, line: &str) {
        let (tm, _) = local_time();
        self.count += 1;
        if self.today != tm.tm_mday || self.count % self.split_lines == 0 {
            let suffix = if self.today != tm.tm_mday {
                self.today = tm.tm_mday;
                self.count = 0;
                None
            } else {
                Some(self.count / self.split_lines)
            };
            let next = self.dir.join(dated_name(&tm, &self.name, suffix));
            let _ = self.file.flush();
            if let Ok(file) = OpenOptions::new().create(true).append(true).open(next) {
                self.file = file;
            }
        }
        let _ = self.file.write_all(line.as_bytes());
        let _ = self.file.write_all(b"\n");
    }

    fn flush(&mut self) {
        let _ = self.file.flush();
    }
}

/// Level-tagged logging sink shared by every component.
///
/// Sync mode writes to the log file under a mutex. Async mode formats the
/// line on the caller's thread and pushes it into a bounded blocking queue
/// drained by a single writer thread; when the queue is full the line is
/// dropped silently so the caller never stalls on disk.
pub struct Logger {
    enabled: bool,
    sink: Option<Arc<Mutex<LogFile>>>,
    queue: Option<Arc<BlockQueue<String>>>,
    stop: Arc<AtomicBool>,
    writer: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Logger {
    /// A logger that swallows everything (`--close-log`).
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            sink: None,
            queue: None,
            stop: Arc::new(AtomicBool::new(false)),
            writer: Mutex::new(None),
        }
    }

    /// `queue_size` of zero selects synchronous writes; a positive size
    /// selects the async writer thread backed by a queue of that capacity.
    pub fn new(path: impl AsRef<Path>, split_lines: u64, queue_size: usize) -> MinnowResult<Self> {
        let sink = Arc::new(Mutex::new(LogFile::open(
            path.as_ref(),
            split_lines.max(1),
        )?));
        let stop = Arc::new(AtomicBool::new(false));

        let (queue, writer) = if queue_size > 0 {
            let queue = Arc::new(BlockQueue::<String>::new(queue_size)?);
            let q = queue.clone();
            let s = sink.clone();
            let stop_flag = stop.clone();
            let handle = thread::Builder::new()
                .name("minnow-log".to_string())
                .spawn(move || {
                    loop {
                        match q.pop_timeout(Duration::from_millis(100)) {
                            Some(line) => s.lock().unwrap().write_line(&line),
                            None => {
                                if stop_flag.load(Ordering::Acquire) && q.is_empty() {
                                    break;
                                }
                            }
                        }
                    }
                    s.lock().unwrap().flush();
                })
                .map_err(std::io::Error::from)?;
            (Some(queue), Some(handle))
        } else {
            (None, None)
        };

        Ok(Self {
            enabled: true,
            sink: Some(sink),
            queue,
            stop,
            writer: Mutex::new(writer),
        })
    }

    pub fn log(&self, level: LogLevel, args: std::fmt::Arguments<'_>) {
        if !self.enabled {
            return;
        }
        let (tm, usec) = local_time();
        let line = format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06} {} {}",
            tm.tm_year + 1900,
            tm.tm_mon + 1,
            tm.tm_mday,
            tm.tm_hour,
            tm.tm_min,
            tm.tm_sec,
            usec,
            level.tag(),
            args
        );
        match (&self.queue, &self.sink) {
            (Some(queue), _) => {
                // Full queue drops the line rather than blocking the caller.
                queue.push(line);
            }
            (None, Some(sink)) => sink.lock().unwrap().write_line(&line),
            (None, None) => {}
        }
    }

    pub fn flush(&self) {
        if let Some(sink) = &self.sink {
            sink.lock().unwrap().flush();
        }
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.writer.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.flush();
    }
}

fn local_time() -> (libc::tm, i64) {
    unsafe {
        let mut tv: libc::timeval = mem::zeroed();
        libc::gettimeofday(&mut tv, ptr::null_mut());
        let mut tm: libc::tm = mem::zeroed();
        libc::localtime_r(&tv.tv_sec, &mut tm);
        (tm, tv.tv_usec as i64)
    }
}

fn dated_name(tm: &libc::tm, name: &str, split: Option<u64>) -> String {
    let base = format!(
        "{:04}_{:02}_{:02}_{}",
        tm.tm_year + 1900,
        tm.tm_mon + 1,
        tm.tm_mday,
        name
    );
    match split {
        Some(n) => format!("{}.{}", base, n),
        None => base,
    }
}

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log($crate::log::LogLevel::Debug, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log($crate::log::LogLevel::Info, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log($crate::log::LogLevel::Warn, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)+) => {
        $logger.log($crate::log::LogLevel::Error, format_args!($($arg)+))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("minnow-log-{}-{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn read_log(dir: &Path) -> String {
        let mut out = String::new();
        for entry in fs::read_dir(dir).unwrap() {
            out.push_str(&fs::read_to_string(entry.unwrap().path()).unwrap());
        }
        out
    }

    #[test]
    fn sync_logger_writes_tagged_lines() {
        let dir = scratch_dir("sync");
        let logger = Logger::new(dir.join("server.log"), 1000, 0).unwrap();
        log_info!(logger, "hello {}", 42);
        log_error!(logger, "boom");
        logger.flush();
        let contents = read_log(&dir);
        assert!(contents.contains("[info]"));
        assert!(contents.contains("hello 42"));
        assert!(contents.contains("[error]"));
        assert!(contents.contains("boom"));
    }

    #[test]
    fn async_logger_drains_queue_on_drop() {
        let dir = scratch_dir("async");
        let logger = Logger::new(dir.join("server.log"), 1000, 64).unwrap();
        for i in 0..20 {
            log_info!(logger, "line {}", i);
        }
        drop(logger);
        let contents = read_log(&dir);
        for i in 0..20 {
            assert!(contents.contains(&format!("line {}", i)));
        }
    }

    #[test]
    fn disabled_logger_is_a_no_op() {
        let logger = Logger::disabled();
        log_warn!(logger, "should vanish");
        logger.flush();
    }
}
