use std::collections::{HashMap, HashSet};
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::task::Task;

/// Per-UI-owner sets of live tasks.
///
/// Membership is exactly the tasks whose worker is neither cancelled nor
/// completed: the finish sequence removes a task the moment it turns
/// terminal. The registry is also the source of truth for the owner's
/// minimum polling interval.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<Uuid, HashSet<Task>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, ui_id: Uuid, task: Task) {
        self.tasks.lock().entry(ui_id).or_default().insert(task);
    }

    pub fn remove(&self, ui_id: Uuid, task: &Task) {
        let mut tasks = self.tasks.lock();
        if let Some(set) = tasks.get_mut(&ui_id) {
            set.remove(task);
            if set.is_empty() {
                tasks.remove(&ui_id);
            }
        }
    }

    /// Number of live tasks for the owner.
    pub fn count_for(&self, ui_id: Uuid) -> usize {
        self.tasks.lock().get(&ui_id).map_or(0, HashSet::len)
    }

    /// The most demanding polling cadence across the owner's live tasks;
    /// `None` when the owner has no tasks or only push-mode tasks, meaning
    /// polling can be disabled.
    pub fn min_interval_for(&self, ui_id: Uuid) -> Option<Duration> {
        self.tasks
            .lock()
            .get(&ui_id)?
            .iter()
            .filter_map(Task::polling_interval)
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::Scheduler;

    #[test]
    fn empty_registry_disables_polling() {
        let registry = TaskRegistry::new();
        assert_eq!(registry.min_interval_for(Uuid::new_v4()), None);
        assert_eq!(registry.count_for(Uuid::new_v4()), 0);
    }

    #[test]
    fn membership_add_remove() {
        let registry = TaskRegistry::new();
        let scheduler = Scheduler::new();
        let ui_id = Uuid::new_v4();
        let task = Task::new(scheduler);

        registry.add(ui_id, task.clone());
        assert_eq!(registry.count_for(ui_id), 1);

        // Adding the same task twice keeps set semantics.
        registry.add(ui_id, task.clone());
        assert_eq!(registry.count_for(ui_id), 1);

        registry.remove(ui_id, &task);
        assert_eq!(registry.count_for(ui_id), 0);
        assert_eq!(registry.min_interval_for(ui_id), None);
    }

    #[test]
    fn unregistered_tasks_contribute_no_interval() {
        let registry = TaskRegistry::new();
        let scheduler = Scheduler::new();
        let ui_id = Uuid::new_v4();

        // A task with no delivery mode yet (pre-attach) counts as push-like.
        registry.add(ui_id, Task::new(scheduler));
        assert_eq!(registry.min_interval_for(ui_id), None);
    }
}
