//! Thread-safe repository of pending tasks with monotonic id assignment.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::{Task, TaskId};

/// Pending tasks keyed by the id the store assigned them.
pub struct TaskStore {
    inner: Mutex<StoreState>,
}

struct StoreState {
    tasks: Vec<Task>,
    next_id: TaskId,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore {
    /// Create an empty store; the first registered task gets id 1.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreState {
                tasks: Vec::new(),
                next_id: 1,
            }),
        }
    }

    // Every operation leaves the state consistent before it can panic, so a
    // poisoned guard is still safe to use.
    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assign the next id to `task`, store it and return the id.
    pub fn register_task(&self, mut task: Task) -> TaskId {
        let mut guard = self.state();
        let id = guard.next_id;
        guard.next_id += 1;
        task.id = id;
        guard.tasks.push(task);
        id
    }

    /// Copy of the pending task with `id`, if any.
    pub fn get_task(&self, id: TaskId) -> Option<Task> {
        let guard = self.state();
        guard.tasks.iter().find(|task| task.id == id).cloned()
    }

    /// Snapshot of every pending task at the time of the call.
    pub fn list_tasks(&self) -> Vec<Task> {
        self.state().tasks.clone()
    }

    /// Atomically claim a task, handing the stored value to the caller.
    ///
    /// When several dispatchers race on the same id exactly one of them gets
    /// `Some`.
    pub fn take_task(&self, id: TaskId) -> Option<Task> {
        let mut guard = self.state();
        let index = guard.tasks.iter().position(|task| task.id == id)?;
        Some(guard.tasks.remove(index))
    }

    /// Remove a task; returns whether it was still pending.
    pub fn remove_task(&self, id: TaskId) -> bool {
        self.take_task(id).is_some()
    }

    /// Number of pending tasks.
    pub fn count(&self) -> usize {
        self.state().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().tasks.is_empty()
    }

    /// Drop every pending task. Ids are not reused afterwards.
    pub fn clear(&self) {
        self.state().tasks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceClass;
    use std::collections::HashSet;
    use std::sync::{Arc, Barrier, Mutex};
    use std::thread;

    fn task(name: &str, priority: i32) -> Task {
        Task::new(name, ResourceClass::Cpu, priority)
    }

    #[test]
    fn register_get_and_remove() {
        let store = TaskStore::new();
        let id = store.register_task(task("reg_test", 7));
        assert_eq!(id, 1);
        assert_eq!(store.count(), 1);

        let found = store.get_task(id).expect("task should be pending");
        assert_eq!(found.name, "reg_test");
        assert_eq!(found.id, id);

        assert!(store.remove_task(id));
        assert_eq!(store.count(), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn ids_increase_and_are_never_reused() {
        let store = TaskStore::new();
        let mut last = 0;
        for round in 0..20 {
            let id = store.register_task(task(&format!("t{round}"), 1));
            assert!(id > last);
            last = id;
            if round % 3 == 0 {
                assert!(store.remove_task(id));
            }
        }
        store.clear();
        assert!(store.register_task(task("after-clear", 1)) > last);
    }

    #[test]
    fn second_remove_fails() {
        let store = TaskStore::new();
        let id = store.register_task(task("once", 2));
        assert!(store.remove_task(id));
        assert!(!store.remove_task(id));
        assert!(store.get_task(id).is_none());
        assert!(!store.remove_task(404));
    }

    #[test]
    fn count_matches_present_ids() {
        let store = TaskStore::new();
        let ids: Vec<_> = (0..10)
            .map(|i| store.register_task(task(&format!("t{i}"), i)))
            .collect();
        for id in ids.iter().step_by(2) {
            store.remove_task(*id);
        }
        let present = ids.iter().filter(|id| store.get_task(**id).is_some()).count();
        assert_eq!(store.count(), present);
        assert_eq!(store.list_tasks().len(), present);
    }

    #[test]
    fn snapshot_is_detached_from_store() {
        let store = TaskStore::new();
        store.register_task(task("a", 1));
        let snapshot = store.list_tasks();
        store.clear();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn concurrent_producers_get_unique_ids() {
        let store = Arc::new(TaskStore::new());
        let producers = 8;
        let per_producer = 50;
        let barrier = Arc::new(Barrier::new(producers));

        let mut handles = Vec::new();
        for p in 0..producers {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                (0..per_producer)
                    .map(|i| store.register_task(task(&format!("p{p}-{i}"), 1)))
                    .collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().expect("producer thread panicked") {
                assert!(seen.insert(id), "id {id} handed out twice");
            }
        }
        assert_eq!(seen.len(), producers * per_producer);
        assert_eq!(store.count(), producers * per_producer);
    }

    #[test]
    fn racing_claims_succeed_once() {
        let store = Arc::new(TaskStore::new());
        let ids: Vec<_> = (0..100).map(|i| store.register_task(task("race", i % 10))).collect();
        let claimers = 4;
        let barrier = Arc::new(Barrier::new(claimers));
        let claimed: Arc<Mutex<Vec<TaskId>>> = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..claimers {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let claimed = Arc::clone(&claimed);
            let ids = ids.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                for id in ids {
                    if store.remove_task(id) {
                        claimed.lock().expect("claimed mutex poisoned").push(id);
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().expect("claimer thread panicked");
        }

        let claimed = claimed.lock().expect("claimed mutex poisoned");
        let unique: HashSet<_> = claimed.iter().copied().collect();
        assert_eq!(claimed.len(), ids.len());
        assert_eq!(unique.len(), ids.len());
        assert!(store.is_empty());
    }
}
