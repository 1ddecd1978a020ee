//! Container-membership inheritance for new tasks.
//!
//! Both creation events (the fork tracepoint and the task-alloc hook) funnel
//! into the same decision; each event source alone misses some children, so
//! both are subscribed and the insert is idempotent.

use crate::Process;

/// What the lineage tracker should do for a (parent, child) creation event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineageAction {
    /// Nothing to record: the child is already tracked, or the parent is not
    /// containerized.
    Skip,
    /// Record the child as a member of this container.
    Adopt(u32),
    /// The parent is tracked but its container record is gone. The registry
    /// is inconsistent and the event must fail closed.
    Inconsistent(u32),
}

/// Decide membership for a new task. Lookup results are passed in so the
/// decision itself stays independent of the backing tables.
#[inline(always)]
pub fn lineage_action(
    child: Option<Process>,
    parent: Option<Process>,
    container_exists: impl FnOnce(u32) -> bool,
) -> LineageAction {
    // Re-delivered event for a child we already adopted.
    if child.is_some() {
        return LineageAction::Skip;
    }
    let parent = match parent {
        Some(p) => p,
        None => return LineageAction::Skip,
    };
    if !container_exists(parent.container_id) {
        return LineageAction::Inconsistent(parent.container_id);
    }
    LineageAction::Adopt(parent.container_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    // Host-side stand-in for the kernel maps, applying the action the way
    // the hook programs do.
    struct Tables {
        containers: HashSet<u32>,
        processes: HashMap<i32, Process>,
    }

    impl Tables {
        fn new() -> Self {
            Self {
                containers: HashSet::new(),
                processes: HashMap::new(),
            }
        }

        fn on_new_task(&mut self, parent: i32, child: i32) -> LineageAction {
            let action = lineage_action(
                self.processes.get(&child).copied(),
                self.processes.get(&parent).copied(),
                |id| self.containers.contains(&id),
            );
            if let LineageAction::Adopt(container_id) = action {
                self.processes.insert(child, Process { container_id });
            }
            action
        }
    }

    #[test]
    fn children_and_grandchildren_inherit_membership() {
        let mut t = Tables::new();
        t.containers.insert(7);
        t.processes.insert(100, Process { container_id: 7 });

        assert_eq!(t.on_new_task(100, 200), LineageAction::Adopt(7));
        assert_eq!(t.processes[&200], Process { container_id: 7 });

        assert_eq!(t.on_new_task(200, 300), LineageAction::Adopt(7));
        assert_eq!(t.processes[&300], Process { container_id: 7 });
    }

    #[test]
    fn duplicate_events_are_idempotent() {
        let mut t = Tables::new();
        t.containers.insert(7);
        t.processes.insert(100, Process { container_id: 7 });

        assert_eq!(t.on_new_task(100, 200), LineageAction::Adopt(7));
        // The same fork observed again through the second event source.
        assert_eq!(t.on_new_task(100, 200), LineageAction::Skip);
        assert_eq!(t.processes[&200], Process { container_id: 7 });
    }

    #[test]
    fn untracked_parent_is_ignored() {
        let mut t = Tables::new();
        assert_eq!(t.on_new_task(1, 2), LineageAction::Skip);
        assert!(t.processes.is_empty());
    }

    #[test]
    fn missing_container_is_reported() {
        let mut t = Tables::new();
        // Process registered, container gone: the invariant is violated.
        t.processes.insert(100, Process { container_id: 9 });
        assert_eq!(t.on_new_task(100, 200), LineageAction::Inconsistent(9));
        assert!(!t.processes.contains_key(&200));
    }

    #[test]
    fn tracked_child_wins_over_missing_parent() {
        let mut t = Tables::new();
        t.containers.insert(7);
        t.processes.insert(200, Process { container_id: 7 });
        // Parent exited and was removed before the event arrived; the child
        // record must be left alone.
        assert_eq!(t.on_new_task(100, 200), LineageAction::Skip);
        assert_eq!(t.processes[&200], Process { container_id: 7 });
    }
}
