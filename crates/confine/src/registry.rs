//! Userspace mirror of the shared registry.
//!
//! The kernel side trusts the control plane to keep the tables consistent: a
//! process record must never point at a missing container. This mirror holds
//! the plane's own view and refuses the orderings that would break that
//! invariant, before anything reaches a map.
//!
//! Descendants adopted in-kernel by the lineage programs are invisible here;
//! the mirror tracks what the plane registered, which is also exactly what
//! the plane is responsible for removing.

use std::collections::HashMap;

use confine_common::policy::PolicyLevel;

use crate::EnforcerError;

#[derive(Debug, Default)]
pub struct RegistryState {
    containers: HashMap<u32, PolicyLevel>,
    processes: HashMap<i32, u32>,
}

impl RegistryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a container or change its level. Must happen before any of
    /// its processes are registered.
    pub fn upsert_container(&mut self, id: u32, level: PolicyLevel) {
        self.containers.insert(id, level);
    }

    /// Register a process (typically the container init). Idempotent; fails
    /// if the container is unknown.
    pub fn upsert_process(&mut self, pid: i32, container_id: u32) -> Result<(), EnforcerError> {
        if !self.containers.contains_key(&container_id) {
            return Err(EnforcerError::UnknownContainer(container_id));
        }
        self.processes.insert(pid, container_id);
        Ok(())
    }

    /// Forget a process. Removing a pid that was never registered is a no-op
    /// so exits can be processed without bookkeeping races.
    pub fn remove_process(&mut self, pid: i32) {
        self.processes.remove(&pid);
    }

    /// Forget a container. Every process the plane registered against it
    /// must have been removed first.
    pub fn remove_container(&mut self, id: u32) -> Result<(), EnforcerError> {
        let live = self.process_count(id);
        if live > 0 {
            return Err(EnforcerError::ContainerBusy {
                id,
                processes: live,
            });
        }
        self.containers.remove(&id);
        Ok(())
    }

    pub fn container_level(&self, id: u32) -> Option<PolicyLevel> {
        self.containers.get(&id).copied()
    }

    pub fn process_container(&self, pid: i32) -> Option<u32> {
        self.processes.get(&pid).copied()
    }

    pub fn process_count(&self, id: u32) -> usize {
        self.processes.values().filter(|&&c| c == id).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_requires_its_container() {
        let mut reg = RegistryState::new();
        assert!(matches!(
            reg.upsert_process(100, 7),
            Err(EnforcerError::UnknownContainer(7))
        ));

        reg.upsert_container(7, PolicyLevel::Restricted);
        reg.upsert_process(100, 7).unwrap();
        assert_eq!(reg.process_container(100), Some(7));
        assert_eq!(reg.container_level(7), Some(PolicyLevel::Restricted));
    }

    #[test]
    fn process_upsert_is_idempotent() {
        let mut reg = RegistryState::new();
        reg.upsert_container(7, PolicyLevel::Baseline);
        reg.upsert_process(100, 7).unwrap();
        reg.upsert_process(100, 7).unwrap();
        assert_eq!(reg.process_count(7), 1);
    }

    #[test]
    fn container_removal_waits_for_its_processes() {
        let mut reg = RegistryState::new();
        reg.upsert_container(7, PolicyLevel::Restricted);
        reg.upsert_process(100, 7).unwrap();
        reg.upsert_process(101, 7).unwrap();

        match reg.remove_container(7) {
            Err(EnforcerError::ContainerBusy { id: 7, processes: 2 }) => {}
            other => panic!("expected ContainerBusy, got {other:?}"),
        }

        reg.remove_process(100);
        reg.remove_process(101);
        reg.remove_container(7).unwrap();
        assert_eq!(reg.container_level(7), None);
    }

    #[test]
    fn removals_are_tolerant_of_unknown_ids() {
        let mut reg = RegistryState::new();
        reg.remove_process(42);
        reg.remove_container(42).unwrap();
    }

    #[test]
    fn level_change_applies_to_existing_container() {
        let mut reg = RegistryState::new();
        reg.upsert_container(7, PolicyLevel::Restricted);
        reg.upsert_container(7, PolicyLevel::Privileged);
        assert_eq!(reg.container_level(7), Some(PolicyLevel::Privileged));
    }
}
