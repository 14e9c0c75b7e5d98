// src/pool.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::conn::HttpConn;
use crate::db::{DbConn, ResourcePool};
use crate::error::{MinnowError, MinnowResult};
use crate::log::Logger;
use crate::log_debug;
use crate::queue::BlockQueue;
use crate::sync::Semaphore;

/// Division of labor between the dispatcher and the workers.
///
/// Proactor: the dispatcher performs socket I/O and hands workers
/// fully-read requests to parse and answer. Reactor: workers perform the
/// I/O themselves and report its outcome back to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorModel {
    Proactor,
    Reactor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStage {
    Read,
    Write,
}

/// One unit of work. `done` carries the reactor-mode verdict back to the
/// dispatcher: true means the connection must be evicted.
pub struct Task {
    pub conn: Arc<Mutex<HttpConn>>,
    pub stage: IoStage,
    pub done: Option<mpsc::Sender<bool>>,
}

/// Fixed-size worker pool over a bounded task queue.
///
/// A counting semaphore gates the workers; the queue bounds backlog so an
/// overloaded server refuses work at submission instead of hoarding it.
/// Workers are pinned round-robin across cores.
pub struct ThreadPool {
    queue: Arc<BlockQueue<Task>>,
    sem: Arc<Semaphore>,
    stop: Arc<AtomicBool>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(
        model: ActorModel,
        db_pool: Arc<ResourcePool<DbConn>>,
        thread_num: usize,
        max_requests: usize,
        logger: Arc<Logger>,
    ) -> MinnowResult<Self> {
        if thread_num == 0 {
            return Err(MinnowError::Config("worker pool needs at least one thread".into()));
        }
        if max_requests == 0 {
            return Err(MinnowError::Config("task queue capacity must be positive".into()));
        }

        let queue = Arc::new(BlockQueue::new(max_requests)?);
        let sem = Arc::new(Semaphore::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let core_ids = core_affinity::get_core_ids().unwrap_or_default();

        let mut workers = Vec::with_capacity(thread_num);
        for i in 0..thread_num {
            let queue = queue.clone();
            let sem = sem.clone();
            let stop = stop.clone();
            let db_pool = db_pool.clone();
            let logger = logger.clone();
            let core = if core_ids.is_empty() {
                None
            } else {
                Some(core_ids[i % core_ids.len()])
            };
            let handle = thread::Builder::new()
                .name(format!("minnow-worker-{}", i))
                .spawn(move || {
                    if let Some(core) = core {
                        core_affinity::set_for_current(core);
                    }
                    worker_loop(model, queue, sem, stop, db_pool, logger);
                })
                .map_err(std::io::Error::from)?;
            workers.push(handle);
        }

        Ok(Self {
            queue,
            sem,
            stop,
            workers,
        })
    }

    /// Submit a reactor-mode task with its completion channel. Returns false
    /// when the queue is at capacity.
    pub fn append(
        &self,
        conn: Arc<Mutex<HttpConn>>,
        stage: IoStage,
        done: mpsc::Sender<bool>,
    ) -> bool {
        let accepted = self.queue.push(Task {
            conn,
            stage,
            done: Some(done),
        });
        if accepted {
            self.sem.post();
        }
        accepted
    }

    /// Submit a proactor-mode task; the dispatcher has already read the
    /// request bytes.
    pub fn append_p(&self, conn: Arc<Mutex<HttpConn>>) -> bool {
        let accepted = self.queue.push(Task {
            conn,
            stage: IoStage::Read,
            done: None,
        });
        if accepted {
            self.sem.post();
        }
        accepted
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        for _ in 0..self.workers.len() {
            self.sem.post();
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    model: ActorModel,
    queue: Arc<BlockQueue<Task>>,
    sem: Arc<Semaphore>,
    stop: Arc<AtomicBool>,
    db_pool: Arc<ResourcePool<DbConn>>,
    logger: Arc<Logger>,
) {
    loop {
        sem.wait();
        if stop.load(Ordering::Acquire) {
            break;
        }
        let Some(task) = queue.pop_timeout(Duration::from_millis(100)) else {
            continue;
        };
        match model {
            ActorModel::Reactor => match task.stage {
                IoStage::Read => {
                    let ok = task.conn.lock().unwrap().read_once();
                    // Report the I/O verdict before any blocking acquire so
                    // the dispatcher is never held up behind the pools.
                    if let Some(done) = &task.done {
                        let _ = done.send(!ok);
                    }
                    if ok {
                        let mut db = db_pool.acquire();
                        task.conn.lock().unwrap().process(Some(&mut *db));
                    }
                }
                IoStage::Write => {
                    let ok = task.conn.lock().unwrap().write_response();
                    if let Some(done) = &task.done {
                        let _ = done.send(!ok);
                    }
                }
            },
            ActorModel::Proactor => {
                let mut db = db_pool.acquire();
                task.conn.lock().unwrap().process(Some(&mut *db));
            }
        }
    }
    log_debug!(logger, "worker exiting");
}
