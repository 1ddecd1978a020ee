//! Userspace side of the confine map boundary: load the eBPF object, attach
//! the hook programs, and publish registry and rule-table state for the
//! in-kernel decision units to consume.

mod error;
pub use error::EnforcerError;

pub mod registry;

#[cfg(target_os = "linux")]
mod loader;

pub use confine_common::{
    maps::RuleClass,
    policy::PolicyLevel,
};

/// Counter snapshot from the kernel-side decision units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecisionStats {
    pub allowed: u64,
    pub denied: u64,
    pub errors: u64,
}

pub struct Enforcer {
    #[cfg(target_os = "linux")]
    inner: loader::LinuxEnforcer,

    #[cfg(not(target_os = "linux"))]
    _stub: (),
}

impl Enforcer {
    /// Load the eBPF object from a file (Linux). Non-Linux returns
    /// NotSupported.
    pub fn load_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, EnforcerError> {
        #[cfg(target_os = "linux")]
        {
            let inner = loader::LinuxEnforcer::load_file(path)?;
            Ok(Self { inner })
        }

        #[cfg(not(target_os = "linux"))]
        {
            let _ = path;
            Err(EnforcerError::NotSupported)
        }
    }

    /// Load the eBPF object from memory (Linux). Non-Linux returns
    /// NotSupported.
    pub fn load_bytes(bytes: &[u8]) -> Result<Self, EnforcerError> {
        #[cfg(target_os = "linux")]
        {
            let inner = loader::LinuxEnforcer::load_bytes(bytes)?;
            Ok(Self { inner })
        }

        #[cfg(not(target_os = "linux"))]
        {
            let _ = bytes;
            Err(EnforcerError::NotSupported)
        }
    }

    /// Forward kernel trace lines into the `log` facade. Requires a running
    /// tokio runtime.
    pub fn init_logger(&mut self) -> Result<(), EnforcerError> {
        #[cfg(target_os = "linux")]
        return self.inner.init_logger();

        #[cfg(not(target_os = "linux"))]
        Err(EnforcerError::NotSupported)
    }

    /// Load and attach all six entry points: the four decision hooks plus
    /// both lineage event sources.
    pub fn attach(&mut self) -> Result<(), EnforcerError> {
        #[cfg(target_os = "linux")]
        return self.inner.attach();

        #[cfg(not(target_os = "linux"))]
        Err(EnforcerError::NotSupported)
    }

    /// Register a container before any of its processes.
    pub fn upsert_container(&mut self, id: u32, level: PolicyLevel) -> Result<(), EnforcerError> {
        #[cfg(target_os = "linux")]
        return self.inner.upsert_container(id, level);

        #[cfg(not(target_os = "linux"))]
        {
            let _ = (id, level);
            Err(EnforcerError::NotSupported)
        }
    }

    /// Register a container's init process; its descendants are adopted
    /// in-kernel by the lineage programs.
    pub fn upsert_process(&mut self, pid: i32, container_id: u32) -> Result<(), EnforcerError> {
        #[cfg(target_os = "linux")]
        return self.inner.upsert_process(pid, container_id);

        #[cfg(not(target_os = "linux"))]
        {
            let _ = (pid, container_id);
            Err(EnforcerError::NotSupported)
        }
    }

    pub fn remove_process(&mut self, pid: i32) -> Result<(), EnforcerError> {
        #[cfg(target_os = "linux")]
        return self.inner.remove_process(pid);

        #[cfg(not(target_os = "linux"))]
        {
            let _ = pid;
            Err(EnforcerError::NotSupported)
        }
    }

    /// Remove a container strictly after its registered processes.
    pub fn remove_container(&mut self, id: u32) -> Result<(), EnforcerError> {
        #[cfg(target_os = "linux")]
        return self.inner.remove_container(id);

        #[cfg(not(target_os = "linux"))]
        {
            let _ = id;
            Err(EnforcerError::NotSupported)
        }
    }

    /// Mark a process name as a container-runtime init string.
    pub fn add_runtime_name(&mut self, name: &str) -> Result<(), EnforcerError> {
        #[cfg(target_os = "linux")]
        return self.inner.add_runtime_name(name);

        #[cfg(not(target_os = "linux"))]
        {
            let _ = name;
            Err(EnforcerError::NotSupported)
        }
    }

    /// Replace the rule table for one (level, hook class) pair.
    pub fn publish_rules(
        &mut self,
        level: PolicyLevel,
        class: RuleClass,
        prefixes: &[&str],
    ) -> Result<(), EnforcerError> {
        #[cfg(target_os = "linux")]
        return self.inner.publish_rules(level, class, prefixes);

        #[cfg(not(target_os = "linux"))]
        {
            let _ = (level, class, prefixes);
            Err(EnforcerError::NotSupported)
        }
    }

    /// Read the allow/deny/error counters maintained by the decision units.
    pub fn decision_stats(&self) -> Result<DecisionStats, EnforcerError> {
        #[cfg(target_os = "linux")]
        return self.inner.decision_stats();

        #[cfg(not(target_os = "linux"))]
        Err(EnforcerError::NotSupported)
    }
}
