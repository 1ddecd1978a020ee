#![cfg(target_os = "linux")]

use std::path::Path;

use aya::{
    maps::{Array as AyaArray, HashMap as AyaHashMap, MapData, MapError},
    programs::{BtfTracePoint, Lsm},
    Btf, Ebpf, Pod,
};
use aya_log::EbpfLogger;
use log::debug;

use confine_common::{
    maps::{self, RuleClass, STAT_ALLOWED, STAT_DENIED, STAT_ERRORS},
    policy::PolicyLevel,
    runtime_name_hash, AccessedPath, Container, Process, PATH_LEN, PATH_MAX_SLOTS,
};

use crate::{registry::RegistryState, DecisionStats, EnforcerError};

/// Program name in the object file -> LSM hook it attaches to.
const LSM_PROGRAMS: [(&str, &str); 5] = [
    ("syslog_audit", "syslog"),
    ("mount_audit", "sb_mount"),
    ("setuid_audit", "task_fix_setuid"),
    ("open_audit", "file_open"),
    ("clone_audit", "task_alloc"),
];

const FORK_TRACEPOINT: &str = "sched_process_fork";

pub enum EnforcerLink {
    #[allow(dead_code)]
    Lsm(aya::programs::lsm::LsmLinkId),
    #[allow(dead_code)]
    BtfTracePoint(aya::programs::tp_btf::BtfTracePointLinkId),
}

pub struct LinuxEnforcer {
    bpf: Ebpf,
    state: RegistryState,
    links: Vec<EnforcerLink>,
}

fn hash_map_mut<'a, K: Pod, V: Pod>(
    bpf: &'a mut Ebpf,
    name: &'static str,
) -> Result<AyaHashMap<&'a mut MapData, K, V>, EnforcerError> {
    let map = bpf
        .map_mut(name)
        .ok_or(EnforcerError::MapNotFound { name })?;
    Ok(AyaHashMap::try_from(map)?)
}

/// Deleting a key that is already gone is not an error for this writer:
/// removals are allowed to race with kernel-side pid reuse.
fn ignore_missing(res: Result<(), MapError>) -> Result<(), MapError> {
    match res {
        Err(MapError::KeyNotFound) => Ok(()),
        Err(MapError::SyscallError(ref e))
            if e.io_error.kind() == std::io::ErrorKind::NotFound =>
        {
            Ok(())
        }
        other => other,
    }
}

impl LinuxEnforcer {
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, EnforcerError> {
        let bpf = Ebpf::load_file(path)?;
        Ok(Self {
            bpf,
            state: RegistryState::new(),
            links: Vec::new(),
        })
    }

    pub fn load_bytes(bytes: &[u8]) -> Result<Self, EnforcerError> {
        let bpf = Ebpf::load(bytes)?;
        Ok(Self {
            bpf,
            state: RegistryState::new(),
            links: Vec::new(),
        })
    }

    /// Forward kernel-side trace lines into the `log` facade. Must run
    /// inside a tokio runtime; the reader task lives as long as the process.
    pub fn init_logger(&mut self) -> Result<(), EnforcerError> {
        EbpfLogger::init(&mut self.bpf)?;
        Ok(())
    }

    /// Load and attach all six entry points. Enforcement starts as soon as
    /// this returns; registries are usually populated first.
    pub fn attach(&mut self) -> Result<(), EnforcerError> {
        let btf = Btf::from_sys_fs()?;

        for (name, hook) in LSM_PROGRAMS {
            let prog = self
                .bpf
                .program_mut(name)
                .ok_or(EnforcerError::ProgramNotFound { name })?;
            let lsm: &mut Lsm = prog.try_into()?;
            lsm.load(hook, &btf)?;
            let link = lsm.attach()?;
            self.links.push(EnforcerLink::Lsm(link));
            debug!("attached {name} to lsm/{hook}");
        }

        let prog = self
            .bpf
            .program_mut(FORK_TRACEPOINT)
            .ok_or(EnforcerError::ProgramNotFound {
                name: FORK_TRACEPOINT,
            })?;
        let tp: &mut BtfTracePoint = prog.try_into()?;
        tp.load(FORK_TRACEPOINT, &btf)?;
        let link = tp.attach()?;
        self.links.push(EnforcerLink::BtfTracePoint(link));
        debug!("attached {FORK_TRACEPOINT} to tp_btf/{FORK_TRACEPOINT}");

        Ok(())
    }

    pub fn upsert_container(
        &mut self,
        id: u32,
        level: PolicyLevel,
    ) -> Result<(), EnforcerError> {
        self.state.upsert_container(id, level);
        let mut containers = hash_map_mut::<u32, Container>(&mut self.bpf, maps::CONTAINERS)?;
        containers.insert(
            id,
            Container {
                policy_level: level.as_raw(),
            },
            0,
        )?;
        Ok(())
    }

    /// Register the container init. Descendants are picked up in-kernel.
    pub fn upsert_process(&mut self, pid: i32, container_id: u32) -> Result<(), EnforcerError> {
        self.state.upsert_process(pid, container_id)?;
        let mut processes = hash_map_mut::<i32, Process>(&mut self.bpf, maps::PROCESSES)?;
        processes.insert(pid, Process { container_id }, 0)?;
        Ok(())
    }

    pub fn remove_process(&mut self, pid: i32) -> Result<(), EnforcerError> {
        self.state.remove_process(pid);
        let mut processes = hash_map_mut::<i32, Process>(&mut self.bpf, maps::PROCESSES)?;
        ignore_missing(processes.remove(&pid))?;
        Ok(())
    }

    /// Remove a container after its processes. The order is load-bearing:
    /// dropping the container first would strand process records and turn
    /// every decision for them into a fail-closed deny.
    pub fn remove_container(&mut self, id: u32) -> Result<(), EnforcerError> {
        self.state.remove_container(id)?;
        let mut containers = hash_map_mut::<u32, Container>(&mut self.bpf, maps::CONTAINERS)?;
        ignore_missing(containers.remove(&id))?;
        Ok(())
    }

    /// Mark a process name as a container-runtime init (e.g. `runc:[2:INIT]`).
    pub fn add_runtime_name(&mut self, name: &str) -> Result<(), EnforcerError> {
        let key = runtime_name_hash(name.as_bytes());
        let mut runtimes = hash_map_mut::<u32, u32>(&mut self.bpf, maps::RUNTIMES)?;
        runtimes.insert(key, 1, 0)?;
        Ok(())
    }

    /// Replace the whole rule table for one (level, class) pair. Entries are
    /// written to dense slots and every remaining slot is cleared, so stale
    /// prefixes from a previous publication cannot linger.
    pub fn publish_rules(
        &mut self,
        level: PolicyLevel,
        class: RuleClass,
        prefixes: &[&str],
    ) -> Result<(), EnforcerError> {
        let name = maps::rule_table_name(level, class).ok_or(EnforcerError::NoRuleTable(level))?;
        if prefixes.len() > PATH_MAX_SLOTS as usize {
            return Err(EnforcerError::TooManyRules {
                got: prefixes.len(),
                max: PATH_MAX_SLOTS,
            });
        }

        let mut encoded = Vec::with_capacity(prefixes.len());
        for p in prefixes {
            let path = AccessedPath::from_str(p).map_err(|_| EnforcerError::PathTooLong {
                path: (*p).to_string(),
                max: PATH_LEN - 1,
            })?;
            encoded.push(path);
        }

        let mut table = hash_map_mut::<u32, AccessedPath>(&mut self.bpf, name)?;
        for (slot, path) in encoded.iter().enumerate() {
            table.insert(slot as u32, *path, 0)?;
        }
        for slot in encoded.len() as u32..PATH_MAX_SLOTS {
            ignore_missing(table.remove(&slot))?;
        }
        debug!("published {} rules to {name}", encoded.len());
        Ok(())
    }

    pub fn decision_stats(&self) -> Result<DecisionStats, EnforcerError> {
        let map = self
            .bpf
            .map(maps::DECISION_STATS)
            .ok_or(EnforcerError::MapNotFound {
                name: maps::DECISION_STATS,
            })?;
        let stats: AyaArray<_, u64> = AyaArray::try_from(map)?;
        Ok(DecisionStats {
            allowed: stats.get(&STAT_ALLOWED, 0)?,
            denied: stats.get(&STAT_DENIED, 0)?,
            errors: stats.get(&STAT_ERRORS, 0)?,
        })
    }
}
