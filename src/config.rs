//! Tunables for the scheduler and the worker pool.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::hints::DEFAULT_REALTIME_PRIORITY;
use crate::types::TaskLimits;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Sleep between polls while the background loop finds nothing to run.
    pub idle_backoff_ms: u64,
    /// Name given to the background dispatch thread.
    pub thread_name: String,
    /// SCHED_FIFO priority used for realtime tasks when OS hints are wired in.
    pub realtime_priority: i32,
    /// Limits producers can check tasks against before submitting.
    pub limits: TaskLimits,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_backoff_ms: 10,
            thread_name: "task-scheduler".to_string(),
            realtime_priority: DEFAULT_REALTIME_PRIORITY,
            limits: TaskLimits::default(),
        }
    }
}

impl SchedulerConfig {
    /// Sleep between polls of an empty store.
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Worker threads to start; 0 uses every online processing unit.
    pub workers: usize,
    /// Worker threads are named `<thread_prefix>-<index>`.
    pub thread_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            thread_prefix: "worker".to_string(),
        }
    }
}

impl PoolConfig {
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }
}
