//! Fixed-size worker threads draining a shared FIFO job queue.

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::PoolConfig;
use crate::hints::cpu_count;

/// A unit of bulk work with no identity or result.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("worker pool is shut down")]
    ShutDown,
}

struct QueueState {
    jobs: VecDeque<Job>,
    closed: bool,
}

struct JobQueue {
    inner: Mutex<QueueState>,
    available: Condvar,
}

impl JobQueue {
    fn new() -> Self {
        Self {
            inner: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    // Jobs run outside the lock, so a poisoned guard still holds a valid queue.
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push a job; hands it back if the queue is closed.
    fn push(&self, job: Job) -> Result<(), Job> {
        let mut guard = self.state();
        if guard.closed {
            return Err(job);
        }
        guard.jobs.push_back(job);
        self.available.notify_one();
        Ok(())
    }

    /// Block until a job is available, or `None` once closed and drained.
    fn pop_blocking_or_closed(&self) -> Option<Job> {
        let mut guard = self.state();
        loop {
            if let Some(job) = guard.jobs.pop_front() {
                return Some(job);
            }
            if guard.closed {
                return None;
            }
            guard = self
                .available
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Close the queue and wake every blocked worker.
    fn close(&self) -> bool {
        let mut guard = self.state();
        let was_open = !guard.closed;
        guard.closed = true;
        self.available.notify_all();
        was_open
    }

    fn len(&self) -> usize {
        self.state().jobs.len()
    }

    fn is_closed(&self) -> bool {
        self.state().closed
    }
}

/// General-purpose thread pool, independent of task priorities.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    // Held across the joins, so concurrent shutdowns all wait for them.
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_ids: Vec<ThreadId>,
    size: usize,
}

impl WorkerPool {
    /// Start `workers` threads; 0 means one per online processing unit.
    pub fn new(workers: usize) -> Result<Self, PoolError> {
        Self::with_config(PoolConfig::with_workers(workers))
    }

    /// Start the pool described by `config`.
    pub fn with_config(config: PoolConfig) -> Result<Self, PoolError> {
        let size = match config.workers {
            0 => cpu_count(),
            n => n,
        };
        let queue = Arc::new(JobQueue::new());
        let mut handles = Vec::with_capacity(size);
        for index in 0..size {
            let queue_for_worker = Arc::clone(&queue);
            let spawned = thread::Builder::new()
                .name(format!("{}-{index}", config.thread_prefix))
                .spawn(move || worker_loop(&queue_for_worker));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    // Release the workers already started before reporting.
                    queue.close();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(PoolError::Spawn(err));
                }
            }
        }
        info!(workers = size, "worker pool started");
        let worker_ids = handles.iter().map(|handle| handle.thread().id()).collect();
        Ok(Self {
            queue,
            workers: Mutex::new(handles),
            worker_ids,
            size,
        })
    }

    /// Queue `job` for the next idle worker.
    pub fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.push(Box::new(job)).map_err(|_| {
            warn!("job rejected: worker pool is shut down");
            PoolError::ShutDown
        })
    }

    /// Jobs waiting for a worker (not counting ones already running).
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Number of worker threads started.
    pub fn worker_count(&self) -> usize {
        self.size
    }

    /// Whether `shutdown` has been called.
    pub fn is_shut_down(&self) -> bool {
        self.queue.is_closed()
    }

    /// Stop accepting jobs, let workers drain the queue, and join them.
    ///
    /// Running jobs are never interrupted. Safe to call more than once and
    /// from several threads; every caller returns only after the workers
    /// have exited. A job calling this on its own pool only closes the queue.
    pub fn shutdown(&self) {
        if self.queue.close() {
            debug!("worker pool closing");
        }
        if self.worker_ids.contains(&thread::current().id()) {
            debug!("shutdown requested from a worker");
            return;
        }
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if workers.is_empty() {
            return;
        }
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
        info!("worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(queue: &JobQueue) {
    while let Some(job) = queue.pop_blocking_or_closed() {
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("pool job panicked");
        }
    }
}
