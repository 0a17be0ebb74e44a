//! Priority dispatcher over a [`TaskStore`], stepped manually or from a
//! background thread.
//!
//! Each dispatch cycle snapshots the pending tasks, picks the most urgent
//! one (realtime before non-realtime, then higher priority), claims it from
//! the store and runs its work to completion on the dispatching thread. The
//! store lock is never held while work runs, so work may add follow-up tasks
//! to the same scheduler.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::SchedulerConfig;
use crate::hints::SchedulingHints;
use crate::metrics::{ExecutionObserver, TaskExecution};
use crate::store::TaskStore;
use crate::types::{CoreId, Task, TaskId};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to spawn dispatch thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Most urgent task in `tasks`. Ties on (realtime, priority) resolve to any
/// maximal element.
pub fn select_next(tasks: &[Task]) -> Option<&Task> {
    tasks.iter().max_by_key(|task| task.urgency())
}

/// Everything a dispatch cycle needs; cloned into the background thread.
#[derive(Clone)]
struct Dispatcher {
    store: Arc<TaskStore>,
    observer: Option<Arc<dyn ExecutionObserver>>,
    hints: Option<Arc<dyn SchedulingHints>>,
    realtime_priority: i32,
}

impl Dispatcher {
    /// One select-claim-execute cycle. Returns false when nothing ran.
    fn dispatch_next(&self) -> bool {
        let id = {
            let pending = self.store.list_tasks();
            match select_next(&pending) {
                Some(task) => task.id,
                None => return false,
            }
        };
        // Another dispatcher may have claimed the same task since the snapshot.
        let Some(task) = self.store.take_task(id) else {
            debug!(id, "task already claimed");
            return false;
        };
        self.execute(task);
        true
    }

    fn execute(&self, task: Task) {
        debug!(task = %task, "dispatching");
        let applied = self
            .hints
            .as_deref()
            .map(|hints| AppliedHints::apply(hints, &task, self.realtime_priority));
        if let Some(observer) = &self.observer {
            observer.task_started(task.id, &task.name);
        }

        let started = Instant::now();
        let success = match &task.work {
            Some(work) => panic::catch_unwind(AssertUnwindSafe(|| work())).is_ok(),
            None => true,
        };
        let finished = Instant::now();
        drop(applied);

        let elapsed_ms = finished.duration_since(started).as_millis() as u64;
        if success {
            debug!(id = task.id, name = %task.name, elapsed_ms, "task finished");
        } else {
            error!(id = task.id, name = %task.name, elapsed_ms, "task work panicked");
        }
        if let Some(observer) = &self.observer {
            observer.task_finished(&TaskExecution {
                id: task.id,
                name: task.name,
                started,
                finished,
                success,
            });
        }
    }
}

/// OS hints applied for the duration of one task; undone on drop.
struct AppliedHints<'a> {
    hints: &'a dyn SchedulingHints,
    previous_affinity: Option<Vec<CoreId>>,
    realtime: bool,
}

impl<'a> AppliedHints<'a> {
    fn apply(hints: &'a dyn SchedulingHints, task: &Task, realtime_priority: i32) -> Self {
        let mut previous_affinity = None;
        if !task.cpu_cores.is_empty() {
            let before = hints
                .current_affinity()
                .unwrap_or_else(|| (0..hints.cpu_count()).collect());
            if hints.set_current_affinity(&task.cpu_cores) {
                previous_affinity = Some(before);
            }
        }
        let realtime = task.realtime && hints.set_realtime_scheduling(realtime_priority);
        Self {
            hints,
            previous_affinity,
            realtime,
        }
    }
}

impl Drop for AppliedHints<'_> {
    fn drop(&mut self) {
        if self.realtime {
            self.hints.set_normal_scheduling();
        }
        if let Some(cores) = self.previous_affinity.take() {
            self.hints.set_current_affinity(&cores);
        }
    }
}

/// A started background loop. Each run gets its own flag so a loop that was
/// stopped from inside its own work can never be revived by a later start.
struct Worker {
    running: Arc<AtomicBool>,
    thread: ThreadId,
    // Held across `join`, so every concurrent waiter returns only after exit.
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    fn is_current(&self) -> bool {
        self.thread == thread::current().id()
    }

    /// Block until the loop thread has exited.
    fn join(&self) {
        let mut guard = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = guard.take() {
            if handle.join().is_err() {
                error!("dispatch thread panicked");
            }
        }
    }
}

/// Non-preemptive priority scheduler.
pub struct Scheduler {
    dispatcher: Dispatcher,
    config: SchedulerConfig,
    worker: Mutex<Option<Arc<Worker>>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Scheduler with the default configuration and an empty store.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            dispatcher: Dispatcher {
                store: Arc::new(TaskStore::new()),
                observer: None,
                hints: None,
                realtime_priority: config.realtime_priority,
            },
            config,
            worker: Mutex::new(None),
        }
    }

    /// Report every execution to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.dispatcher.observer = Some(observer);
        self
    }

    /// Apply each task's core list and realtime flag as OS hints on the
    /// dispatching thread while its work runs.
    pub fn with_hints(mut self, hints: Arc<dyn SchedulingHints>) -> Self {
        self.dispatcher.hints = Some(hints);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The store holding this scheduler's pending tasks.
    pub fn store(&self) -> &Arc<TaskStore> {
        &self.dispatcher.store
    }

    fn worker_slot(&self) -> MutexGuard<'_, Option<Arc<Worker>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Forget `worker` unless a later start already replaced it.
    fn release(&self, worker: &Arc<Worker>) {
        let mut slot = self.worker_slot();
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, worker)) {
            *slot = None;
        }
    }

    pub fn add_task(&self, task: Task) -> TaskId {
        self.dispatcher.store.register_task(task)
    }

    /// Run the most urgent pending task, if any, on the calling thread.
    ///
    /// Returns true when a task was executed, whether or not its work
    /// panicked. Returns false when nothing was pending or the selected task
    /// was claimed by another dispatcher first.
    pub fn run_once(&self) -> bool {
        self.dispatcher.dispatch_next()
    }

    /// Start the background dispatch loop. No-op if it is already running.
    ///
    /// If a previous loop was stopped but has not exited yet, this waits for
    /// it first, so at most one loop dispatches at a time.
    pub fn start(&self) -> Result<(), SchedulerError> {
        loop {
            let stale = {
                let slot = self.worker_slot();
                match slot.as_ref() {
                    Some(worker) if worker.running.load(Ordering::SeqCst) => return Ok(()),
                    // Restarted from work on the old loop: it exits once that
                    // work returns, so it is detached here.
                    Some(worker) if worker.is_current() => None,
                    Some(worker) => Some(Arc::clone(worker)),
                    None => None,
                }
            };
            match stale {
                Some(worker) => {
                    worker.join();
                    self.release(&worker);
                }
                None => break,
            }
        }

        let mut slot = self.worker_slot();
        if slot
            .as_ref()
            .is_some_and(|worker| worker.running.load(Ordering::SeqCst))
        {
            return Ok(());
        }
        let running = Arc::new(AtomicBool::new(true));
        let dispatcher = self.dispatcher.clone();
        let backoff = self.config.idle_backoff();
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || run_loop(dispatcher, flag, backoff))
            .map_err(SchedulerError::Spawn)?;
        *slot = Some(Arc::new(Worker {
            running,
            thread: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        }));
        Ok(())
    }

    /// Stop the background loop and wait for it to exit.
    ///
    /// A task already executing is allowed to finish. Concurrent callers all
    /// wait for the same exit. When called from a task running on the
    /// dispatch thread itself, the loop exits after that task returns and
    /// this call does not wait.
    pub fn stop(&self) {
        let worker = {
            let slot = self.worker_slot();
            let Some(worker) = slot.as_ref() else {
                return;
            };
            worker.running.store(false, Ordering::SeqCst);
            Arc::clone(worker)
        };
        if worker.is_current() {
            debug!("stop requested from the dispatch thread");
            return;
        }
        worker.join();
        self.release(&worker);
    }

    /// Whether a background loop is running and has not been asked to stop.
    pub fn is_running(&self) -> bool {
        self.worker_slot()
            .as_ref()
            .is_some_and(|worker| worker.running.load(Ordering::SeqCst))
    }

    /// Tasks registered but not yet claimed.
    pub fn pending_count(&self) -> usize {
        self.dispatcher.store.count()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(dispatcher: Dispatcher, running: Arc<AtomicBool>, backoff: Duration) {
    info!("scheduler started");
    while running.load(Ordering::SeqCst) {
        if !dispatcher.dispatch_next() {
            thread::sleep(backoff);
        }
    }
    info!("scheduler stopped");
}
