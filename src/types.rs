//! Shared identifiers and the task model used across the scheduler.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier assigned to a task by its store. 0 means "not registered yet".
pub type TaskId = u64;
/// Index of a processing unit.
pub type CoreId = usize;
/// Task urgency; valid tasks stay within `0..=TaskLimits::max_priority`.
pub type Priority = i32;

/// Executable body of a task.
pub type Work = Arc<dyn Fn() + Send + Sync + 'static>;

/// Physical resource a task is expected to dominate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResourceClass {
    #[default]
    Cpu,
    Gpu,
    Io,
}

impl ResourceClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceClass::Cpu => "CPU",
            ResourceClass::Gpu => "GPU",
            ResourceClass::Io => "IO",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceClass {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CPU" => Ok(ResourceClass::Cpu),
            "GPU" => Ok(ResourceClass::Gpu),
            "IO" => Ok(ResourceClass::Io),
            _ => Err(TaskError::UnknownResourceClass(s.to_string())),
        }
    }
}

/// Reasons a task fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("task name is empty")]
    EmptyName,

    #[error("priority {priority} outside 0..={max}")]
    PriorityOutOfRange { priority: Priority, max: Priority },

    #[error("core {core} outside 0..={max}")]
    CoreOutOfRange { core: CoreId, max: CoreId },

    #[error("unknown resource class: {0}")]
    UnknownResourceClass(String),
}

/// Validation policy for task attributes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskLimits {
    pub max_priority: Priority,
    /// Highest core index a task may ask to be pinned to.
    pub max_core: CoreId,
}

impl Default for TaskLimits {
    fn default() -> Self {
        // Six-core edge board.
        Self {
            max_priority: 10,
            max_core: 5,
        }
    }
}

impl TaskLimits {
    /// Limits matching the cores this machine reports.
    pub fn for_cpu_count(cpus: usize) -> Self {
        Self {
            max_core: cpus.saturating_sub(1),
            ..Self::default()
        }
    }
}

/// Unit of schedulable work.
#[derive(Clone, Serialize)]
pub struct Task {
    /// Assigned by the store on registration.
    pub id: TaskId,
    pub name: String,
    #[serde(rename = "type")]
    pub class: ResourceClass,
    pub priority: Priority,
    /// Realtime tasks outrank every non-realtime task.
    pub realtime: bool,
    /// Cores the task would like to be pinned to while it runs.
    pub cpu_cores: Vec<CoreId>,
    #[serde(skip)]
    pub work: Option<Work>,
}

impl Default for Task {
    fn default() -> Self {
        Self::new("unnamed", ResourceClass::Cpu, 5)
    }
}

impl Task {
    /// Construct an unregistered task with no cores and no work.
    pub fn new(name: impl Into<String>, class: ResourceClass, priority: Priority) -> Self {
        Self {
            id: 0,
            name: name.into(),
            class,
            priority,
            realtime: false,
            cpu_cores: Vec::new(),
            work: None,
        }
    }

    /// Mark the task realtime; it then outranks every non-realtime task.
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Preferred cores, applied as an affinity hint when hints are enabled.
    pub fn with_cores(mut self, cores: impl IntoIterator<Item = CoreId>) -> Self {
        self.cpu_cores = cores.into_iter().collect();
        self
    }

    /// Attach the body run when the task is dispatched.
    pub fn with_work<F>(mut self, work: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.work = Some(Arc::new(work));
        self
    }

    /// Ordering key used for dispatch: realtime first, then priority.
    pub fn urgency(&self) -> (bool, Priority) {
        (self.realtime, self.priority)
    }

    /// Check the task against `limits`, reporting the first violation.
    pub fn validate(&self, limits: &TaskLimits) -> Result<(), TaskError> {
        if !(0..=limits.max_priority).contains(&self.priority) {
            return Err(TaskError::PriorityOutOfRange {
                priority: self.priority,
                max: limits.max_priority,
            });
        }
        if self.name.is_empty() {
            return Err(TaskError::EmptyName);
        }
        if let Some(&core) = self.cpu_cores.iter().find(|&&c| c > limits.max_core) {
            return Err(TaskError::CoreOutOfRange {
                core,
                max: limits.max_core,
            });
        }
        Ok(())
    }

    /// Validity against the default limits.
    pub fn is_valid(&self) -> bool {
        self.is_valid_with(&TaskLimits::default())
    }

    pub fn is_valid_with(&self, limits: &TaskLimits) -> bool {
        self.validate(limits).is_ok()
    }

    /// One-line human-readable description.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "[Task#{}] {} | {} | pri={}",
            self.id, self.name, self.class, self.priority
        );
        if self.realtime {
            out.push_str(" | REALTIME");
        }
        out
    }

    /// JSON encoding of the task attributes. The work body is never encoded.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("class", &self.class)
            .field("priority", &self.priority)
            .field("realtime", &self.realtime)
            .field("cpu_cores", &self.cpu_cores)
            .field("work", &self.work.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_task_is_valid() {
        let task = Task::default();
        assert_eq!(task.id, 0);
        assert_eq!(task.name, "unnamed");
        assert_eq!(task.priority, 5);
        assert!(task.is_valid());
    }

    #[test]
    fn out_of_range_attributes_are_invalid() {
        let base = Task::new("camera", ResourceClass::Gpu, 5).with_cores([0, 3, 5]);
        assert!(base.is_valid());

        let mut too_urgent = base.clone();
        too_urgent.priority = 11;
        assert!(!too_urgent.is_valid());

        let mut negative = base.clone();
        negative.priority = -1;
        assert!(!negative.is_valid());

        let mut unnamed = base.clone();
        unnamed.name.clear();
        assert_eq!(unnamed.validate(&TaskLimits::default()), Err(TaskError::EmptyName));

        let far_core = base.with_cores([1, 999]);
        assert_eq!(
            far_core.validate(&TaskLimits::default()),
            Err(TaskError::CoreOutOfRange { core: 999, max: 5 })
        );
    }

    #[test]
    fn limits_are_a_policy_parameter() {
        let task = Task::new("wide", ResourceClass::Cpu, 3).with_cores([7]);
        assert!(!task.is_valid());
        assert!(task.is_valid_with(&TaskLimits::for_cpu_count(8)));
        assert_eq!(TaskLimits::for_cpu_count(0).max_core, 0);
    }

    #[test]
    fn summary_marks_realtime() {
        let mut task = Task::new("lidar", ResourceClass::Io, 9).with_realtime(true);
        task.id = 4;
        assert_eq!(task.summary(), "[Task#4] lidar | IO | pri=9 | REALTIME");
        task.realtime = false;
        assert_eq!(task.to_string(), "[Task#4] lidar | IO | pri=9");
    }

    #[test]
    fn json_encodes_attributes_without_work() {
        let mut task = Task::new("ai", ResourceClass::Gpu, 7)
            .with_cores([2, 3])
            .with_work(|| {});
        task.id = 12;
        let value: serde_json::Value = serde_json::from_str(&task.to_json()).expect("valid json");
        assert_eq!(value["id"], 12);
        assert_eq!(value["name"], "ai");
        assert_eq!(value["type"], "GPU");
        assert_eq!(value["priority"], 7);
        assert_eq!(value["realtime"], false);
        assert_eq!(value["cpu_cores"], serde_json::json!([2, 3]));
        assert!(value.get("work").is_none());
    }

    #[test]
    fn resource_class_parses_case_insensitively() {
        assert_eq!("gpu".parse::<ResourceClass>(), Ok(ResourceClass::Gpu));
        assert_eq!("IO".parse::<ResourceClass>(), Ok(ResourceClass::Io));
        assert!("npu".parse::<ResourceClass>().is_err());
    }
}
