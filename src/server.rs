// src/server.rs
use std::collections::HashMap;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use crate::cgi::CgiHandler;
use crate::conn::HttpConn;
use crate::error::MinnowResult;
use crate::log::Logger;
use crate::pool::{ActorModel, IoStage, ThreadPool};
use crate::syscalls::{
    self, epoll_event, Epoll, TriggerMode, EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLRDHUP,
};
use crate::timer::{TimerHeap, TimerId};
use crate::{log_error, log_info, log_warn};

pub const MAX_CONNECTIONS: usize = 10000;
pub const MAX_EVENTS: usize = 10000;
const TIMESLOT_SECS: u32 = 5;
const TIMESLOT: Duration = Duration::from_secs(TIMESLOT_SECS as u64);

struct ConnEntry {
    conn: Arc<Mutex<HttpConn>>,
    timer: TimerId,
}

/// The single-threaded dispatcher: owns the epoll instance, the connection
/// table, the timer heap, and the self-pipe that turns signals into events.
///
/// Connections are registered one-shot, so between the event firing and the
/// re-arm exactly one thread touches the socket. The dispatcher holds one
/// `Arc` handle per connection and workers hold the other transiently; the
/// descriptor closes when the last handle drops, never while a worker can
/// still reach it.
pub struct Server {
    epoll: Arc<Epoll>,
    listen_fd: RawFd,
    pipe_rd: RawFd,
    pipe_wr: RawFd,
    conns: HashMap<RawFd, ConnEntry>,
    timers: TimerHeap,
    pool: ThreadPool,
    cgi: Arc<dyn CgiHandler>,
    logger: Arc<Logger>,
    model: ActorModel,
    lfd_mode: TriggerMode,
    cfd_mode: TriggerMode,
    doc_root: PathBuf,
    stop: bool,
    timeout_pending: bool,
}

impl Server {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        port: u16,
        opt_linger: bool,
        lfd_mode: TriggerMode,
        cfd_mode: TriggerMode,
        model: ActorModel,
        doc_root: PathBuf,
        pool: ThreadPool,
        cgi: Arc<dyn CgiHandler>,
        logger: Arc<Logger>,
    ) -> MinnowResult<Self> {
        let listen_fd = syscalls::create_listen_socket(port, opt_linger)?;
        let epoll = Arc::new(Epoll::new()?);
        epoll.add(listen_fd, listen_fd as u64, syscalls::listen_events(lfd_mode))?;

        let (pipe_rd, pipe_wr) = syscalls::create_signal_pipe()?;
        epoll.add(pipe_rd, pipe_rd as u64, EPOLLIN)?;
        syscalls::ignore_signal(libc::SIGPIPE)?;
        syscalls::register_signal(libc::SIGALRM, false)?;
        syscalls::register_signal(libc::SIGTERM, false)?;
        syscalls::register_signal(libc::SIGINT, false)?;
        syscalls::schedule_alarm(TIMESLOT_SECS);

        log_info!(logger, "listening on port {}", port);
        Ok(Self {
            epoll,
            listen_fd,
            pipe_rd,
            pipe_wr,
            conns: HashMap::new(),
            timers: TimerHeap::new(),
            pool,
            cgi,
            logger,
            model,
            lfd_mode,
            cfd_mode,
            doc_root,
            stop: false,
            timeout_pending: false,
        })
    }

    /// The dispatch loop. Exits on SIGTERM/SIGINT or an unrecoverable epoll
    /// failure. Expired-timer sweeps are deferred to the end of each event
    /// batch so client I/O is never delayed by housekeeping.
    pub fn run(&mut self) {
        let mut events = vec![epoll_event { events: 0, u64: 0 }; MAX_EVENTS];
        while !self.stop {
            let n = match self.epoll.wait(&mut events, -1) {
                Ok(n) => n,
                Err(e) => {
                    log_error!(self.logger, "event wait failed: {}", e);
                    break;
                }
            };
            for ev in &events[..n] {
                let fd = ev.u64 as RawFd;
                let flags = ev.events;
                if fd == self.listen_fd {
                    self.accept_clients();
                } else if fd == self.pipe_rd {
                    self.handle_signals();
                } else if flags & (EPOLLRDHUP | EPOLLHUP | EPOLLERR) != 0 {
                    self.evict(fd);
                } else if flags & EPOLLIN != 0 {
                    self.handle_read(fd);
                } else if flags & EPOLLOUT != 0 {
                    self.handle_write(fd);
                }
            }
            if self.timeout_pending {
                self.on_tick();
                self.timeout_pending = false;
            }
        }
        log_info!(self.logger, "dispatcher stopped");
    }

    fn accept_clients(&mut self) {
        loop {
            match syscalls::accept_connection(self.listen_fd) {
                Ok(Some((fd, peer))) => {
                    if self.conns.len() >= MAX_CONNECTIONS {
                        let _ = syscalls::send_nonblocking(fd, b"Internal server busy");
                        syscalls::close_fd(fd);
                        log_warn!(self.logger, "connection limit reached, refusing {}", peer);
                    } else {
                        self.register_conn(fd, peer);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log_warn!(self.logger, "accept failed: {}", e);
                    break;
                }
            }
            if self.lfd_mode == TriggerMode::Level {
                break;
            }
        }
    }

    fn register_conn(&mut self, fd: RawFd, peer: SocketAddr) {
        let conn = Arc::new(Mutex::new(HttpConn::new(
            fd,
            peer,
            self.epoll.clone(),
            self.cfd_mode,
            self.doc_root.clone(),
            self.cgi.clone(),
            self.logger.clone(),
        )));
        let events = syscalls::conn_events(EPOLLIN, self.cfd_mode, true);
        if let Err(e) = self.epoll.add(fd, fd as u64, events) {
            // Dropping the handle closes the descriptor.
            log_warn!(self.logger, "cannot register fd {}: {}", fd, e);
            return;
        }
        let timer = self.timers.add_timer(Instant::now() + TIMESLOT * 3, fd);
        self.conns.insert(fd, ConnEntry { conn, timer });
        log_info!(self.logger, "accepted connection from {} on fd {}", peer, fd);
    }

    fn handle_signals(&mut self) {
        let mut buf = [0u8; 64];
        while let Ok(n) = syscalls::recv_nonblocking(self.pipe_rd, &mut buf) {
            if n == 0 {
                break;
            }
            for &sig in &buf[..n] {
                match sig as i32 {
                    libc::SIGALRM => self.timeout_pending = true,
                    libc::SIGTERM | libc::SIGINT => self.stop = true,
                    _ => {}
                }
            }
        }
    }

    fn handle_read(&mut self, fd: RawFd) {
        let Some(entry) = self.conns.get(&fd) else {
            return;
        };
        let conn = entry.conn.clone();
        self.timers
            .adjust_timer(entry.timer, Instant::now() + TIMESLOT * 3);
        match self.model {
            ActorModel::Reactor => {
                let (tx, rx) = mpsc::channel();
                if !self.pool.append(conn, IoStage::Read, tx) {
                    log_warn!(self.logger, "task queue full, dropping fd {}", fd);
                    self.evict(fd);
                    return;
                }
                if rx.recv().unwrap_or(true) {
                    self.evict(fd);
                }
            }
            ActorModel::Proactor => {
                let ok = conn.lock().unwrap().read_once();
                if !ok {
                    self.evict(fd);
                } else if !self.pool.append_p(conn) {
                    log_warn!(self.logger, "task queue full, dropping fd {}", fd);
                    self.evict(fd);
                }
            }
        }
    }

    fn handle_write(&mut self, fd: RawFd) {
        let Some(entry) = self.conns.get(&fd) else {
            return;
        };
        let conn = entry.conn.clone();
        self.timers
            .adjust_timer(entry.timer, Instant::now() + TIMESLOT * 3);
        match self.model {
            ActorModel::Reactor => {
                let (tx, rx) = mpsc::channel();
                if !self.pool.append(conn, IoStage::Write, tx) {
                    log_warn!(self.logger, "task queue full, dropping fd {}", fd);
                    self.evict(fd);
                    return;
                }
                if rx.recv().unwrap_or(true) {
                    self.evict(fd);
                }
            }
            ActorModel::Proactor => {
                if !conn.lock().unwrap().write_response() {
                    self.evict(fd);
                }
            }
        }
    }

    /// Tear down one connection: timer, epoll registration, table entry.
    /// The socket itself closes when the last handle drops.
    fn evict(&mut self, fd: RawFd) {
        if let Some(entry) = self.conns.remove(&fd) {
            self.timers.del_timer(entry.timer);
            let _ = self.epoll.delete(fd);
            log_info!(self.logger, "closing connection on fd {}", fd);
        }
    }

    /// Sweep expired connections, then rewind the alarm. The tick pops each
    /// fired timer itself, so the callback only detaches the connection.
    fn on_tick(&mut self) {
        let now = Instant::now();
        let conns = &mut self.conns;
        let epoll = &self.epoll;
        let logger = &self.logger;
        self.timers.tick(now, |fd| {
            if conns.remove(&fd).is_some() {
                let _ = epoll.delete(fd);
                log_info!(logger, "connection on fd {} timed out", fd);
            }
        });
        syscalls::schedule_alarm(TIMESLOT_SECS);
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        syscalls::close_fd(self.listen_fd);
        syscalls::close_fd(self.pipe_rd);
        syscalls::close_fd(self.pipe_wr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgi::DefaultCgi;
    use crate::db::{DbConn, ResourcePool};
    use std::fs;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::thread;

    fn scratch_root() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("minnow-server-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn serves_a_request_end_to_end() {
        let root = scratch_root();
        fs::write(root.join("judge.html"), "<html>welcome</html>").unwrap();

        let port = 20000 + (std::process::id() % 10000) as u16;
        let logger = Arc::new(Logger::disabled());
        let db = Arc::new(ResourcePool::new(vec![DbConn::new(0)]).unwrap());
        let pool =
            ThreadPool::new(ActorModel::Proactor, db, 2, 16, logger.clone()).unwrap();
        let cgi = Arc::new(DefaultCgi::new(root.clone(), logger.clone()));
        let mut server = Server::new(
            port,
            false,
            TriggerMode::Level,
            TriggerMode::Level,
            ActorModel::Proactor,
            root,
            pool,
            cgi,
            logger,
        )
        .unwrap();
        let dispatcher = thread::spawn(move || server.run());
        thread::sleep(Duration::from_millis(100));

        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).unwrap();
        let response = String::from_utf8(response).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Connection: close\r\n"));
        assert!(response.ends_with("<html>welcome</html>"));

        unsafe {
            libc::kill(libc::getpid(), libc::SIGTERM);
        }
        dispatcher.join().unwrap();
    }
}
