//! In-process task scheduler for resource-constrained edge compute nodes.
//!
//! [`Scheduler`] dispatches the most urgent pending [`Task`] (realtime first,
//! then priority) to completion, either stepped with
//! [`Scheduler::run_once`] or from a background thread. [`WorkerPool`] runs
//! unprioritised bulk jobs in parallel. [`hints`] wraps the OS calls that pin
//! threads to cores and request realtime scheduling.

pub mod config;
pub mod hints;
pub mod logging;
pub mod metrics;
pub mod pool;
pub mod scheduler;
pub mod store;
pub mod types;

pub use config::{PoolConfig, SchedulerConfig};
pub use hints::{SchedulingHints, SystemHints, ThreadHandle, cpu_count};
pub use metrics::{ExecutionObserver, MetricsCollector, TaskExecution};
pub use pool::{PoolError, WorkerPool};
pub use scheduler::{Scheduler, SchedulerError};
pub use store::TaskStore;
pub use types::{CoreId, Priority, ResourceClass, Task, TaskError, TaskId, TaskLimits, Work};
