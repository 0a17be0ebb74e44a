//! Execution timing records for dispatched tasks and pool jobs.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::types::TaskId;

/// What the dispatcher reports once a task's work has returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskExecution {
    pub id: TaskId,
    pub name: String,
    pub started: Instant,
    pub finished: Instant,
    /// False when the work body panicked.
    pub success: bool,
}

impl TaskExecution {
    pub fn duration(&self) -> Duration {
        self.finished.saturating_duration_since(self.started)
    }
}

/// Receives a callback around every task execution.
pub trait ExecutionObserver: Send + Sync {
    fn task_started(&self, id: TaskId, name: &str);
    fn task_finished(&self, execution: &TaskExecution);
}

/// One timing record; `finished` is `None` while the task is still running.
#[derive(Clone, Debug)]
pub struct TaskMetrics {
    pub task_id: TaskId,
    pub task_name: String,
    pub started: Instant,
    pub finished: Option<Instant>,
    pub success: bool,
}

impl TaskMetrics {
    pub fn duration(&self) -> Option<Duration> {
        self.finished
            .map(|finished| finished.saturating_duration_since(self.started))
    }
}

/// Aggregate over every closed record.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub completed: usize,
    pub failed: usize,
    pub in_flight: usize,
    pub total_ms: f64,
    pub per_task_ms: Vec<(String, f64)>,
}

/// Thread-safe log of task start/end times.
#[derive(Default)]
pub struct MetricsCollector {
    records: Mutex<Vec<TaskMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, Vec<TaskMetrics>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a record for `id` starting now.
    pub fn record_start(&self, id: TaskId, name: &str) {
        self.open(id, name, Instant::now());
    }

    /// Close the oldest open record for `id`. Unknown ids are ignored.
    pub fn record_end(&self, id: TaskId, success: bool) {
        self.close(id, Instant::now(), success);
    }

    fn open(&self, id: TaskId, name: &str, started: Instant) {
        self.records().push(TaskMetrics {
            task_id: id,
            task_name: name.to_string(),
            started,
            finished: None,
            success: false,
        });
    }

    fn close(&self, id: TaskId, finished: Instant, success: bool) {
        self.close_with(id, None, finished, success);
    }

    // `started` replaces the stamp taken when the record was opened.
    fn close_with(&self, id: TaskId, started: Option<Instant>, finished: Instant, success: bool) {
        let mut guard = self.records();
        if let Some(record) = guard
            .iter_mut()
            .find(|record| record.task_id == id && record.finished.is_none())
        {
            if let Some(started) = started {
                record.started = started;
            }
            record.finished = Some(finished);
            record.success = success;
        }
    }

    /// Snapshot of every record, open or closed.
    pub fn all(&self) -> Vec<TaskMetrics> {
        self.records().clone()
    }

    pub fn summary(&self) -> MetricsSummary {
        let guard = self.records();
        let mut summary = MetricsSummary::default();
        for record in guard.iter() {
            let Some(duration) = record.duration() else {
                summary.in_flight += 1;
                continue;
            };
            let ms = duration.as_secs_f64() * 1000.0;
            summary.completed += 1;
            if !record.success {
                summary.failed += 1;
            }
            summary.total_ms += ms;
            summary.per_task_ms.push((record.task_name.clone(), ms));
        }
        summary
    }

    pub fn clear(&self) {
        self.records().clear();
    }
}

impl ExecutionObserver for MetricsCollector {
    fn task_started(&self, id: TaskId, name: &str) {
        self.record_start(id, name);
    }

    /// Closes the record with the dispatcher's own timestamps, so the stored
    /// duration equals [`TaskExecution::duration`].
    fn task_finished(&self, execution: &TaskExecution) {
        self.close_with(
            execution.id,
            Some(execution.started),
            execution.finished,
            execution.success,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_closes_matching_open_record() {
        let metrics = MetricsCollector::new();
        let base = Instant::now();
        metrics.open(1, "camera", base);
        metrics.open(2, "ai", base);
        metrics.close(2, base + Duration::from_millis(40), true);

        let all = metrics.all();
        assert_eq!(all.len(), 2);
        assert!(all[0].finished.is_none());
        assert_eq!(all[1].duration(), Some(Duration::from_millis(40)));
        assert!(all[1].success);
    }

    #[test]
    fn repeated_ids_close_oldest_first() {
        let metrics = MetricsCollector::new();
        let base = Instant::now();
        metrics.open(7, "loop", base);
        metrics.open(7, "loop", base + Duration::from_millis(5));
        metrics.close(7, base + Duration::from_millis(10), true);

        let all = metrics.all();
        assert_eq!(all[0].duration(), Some(Duration::from_millis(10)));
        assert!(all[1].finished.is_none());
    }

    #[test]
    fn summary_counts_failures_and_in_flight() {
        let metrics = MetricsCollector::new();
        let base = Instant::now();
        metrics.open(1, "ok", base);
        metrics.close(1, base + Duration::from_millis(20), true);
        metrics.open(2, "bad", base);
        metrics.close(2, base + Duration::from_millis(30), false);
        metrics.open(3, "running", base);
        metrics.record_end(99, true);

        let summary = metrics.summary();
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.in_flight, 1);
        assert!((summary.total_ms - 50.0).abs() < 1e-6);
        assert_eq!(summary.per_task_ms[0].0, "ok");

        metrics.clear();
        assert!(metrics.all().is_empty());
    }

    #[test]
    fn observer_callbacks_produce_records() {
        let metrics = MetricsCollector::new();
        metrics.task_started(5, "lidar");
        let started = metrics.all()[0].started;
        metrics.task_finished(&TaskExecution {
            id: 5,
            name: "lidar".to_string(),
            started,
            finished: started + Duration::from_millis(3),
            success: true,
        });
        assert_eq!(metrics.summary().completed, 1);
    }

    #[test]
    fn observed_duration_matches_execution() {
        let metrics = MetricsCollector::new();
        metrics.task_started(8, "planner");
        let opened = metrics.all()[0].started;
        let execution = TaskExecution {
            id: 8,
            name: "planner".to_string(),
            started: opened + Duration::from_millis(2),
            finished: opened + Duration::from_millis(12),
            success: true,
        };
        metrics.task_finished(&execution);

        let record = &metrics.all()[0];
        assert_eq!(record.started, execution.started);
        assert_eq!(record.duration(), Some(execution.duration()));
    }
}
