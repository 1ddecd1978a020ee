#![no_std]

#[cfg(test)]
extern crate std;

pub mod lineage;
pub mod paths;
pub mod policy;

/// Max configurable PID limit (x86_64; other architectures are lower or
/// equal). Sizes the registry maps.
pub const PID_MAX_LIMIT: u32 = 4_194_304;

/// Fixed width of a rule-table path prefix, trailing NUL included.
pub const PATH_LEN: usize = 64;

/// Slots per rule table.
pub const PATH_MAX_SLOTS: u32 = 128;

/// Entries in the runtime-name set.
pub const RUNTIMES_MAX: u32 = 16;

/// Max length of a task command (comm), trailing NUL included.
pub const TASK_COMM_LEN: usize = 16;

/// Read bound for the mount `type` string: `"bind"` plus NUL. The hook only
/// cares whether the type is exactly "bind", so nothing longer is needed.
pub const MOUNT_TYPE_LEN: usize = 5;

/// The one mount type the mount hook mediates.
pub const MOUNT_TYPE_BIND: &[u8; MOUNT_TYPE_LEN] = b"bind\0";

pub const EPERM: i32 = 1;
pub const EFAULT: i32 = 14;
pub const ENAMETOOLONG: i32 = 36;

/// Value of the `CONTAINERS` map: the policy level assigned to a container,
/// stored raw so the map layout stays a plain i32.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Container {
    pub policy_level: i32,
}

/// Value of the `PROCESSES` map: the container a task belongs to. The id is
/// a key of `CONTAINERS`, usable for the second lookup as-is.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Process {
    pub container_id: u32,
}

/// Value of the six rule tables: one fixed-width, NUL-terminated path prefix.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AccessedPath {
    pub path: [u8; PATH_LEN],
}

impl AccessedPath {
    pub const fn zeroed() -> Self {
        Self {
            path: [0u8; PATH_LEN],
        }
    }

    /// Encode a prefix for publication. Anything that does not fit the fixed
    /// width with its NUL terminator is refused rather than truncated; a
    /// silently shortened prefix would match more than the caller asked for.
    pub fn from_str(s: &str) -> Result<Self, PathTooLong> {
        let bytes = s.as_bytes();
        if bytes.len() >= PATH_LEN {
            return Err(PathTooLong { len: bytes.len() });
        }
        let mut path = [0u8; PATH_LEN];
        path[..bytes.len()].copy_from_slice(bytes);
        Ok(Self { path })
    }
}

impl Default for AccessedPath {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// A path prefix longer than the fixed table width allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathTooLong {
    pub len: usize,
}

impl core::fmt::Display for PathTooLong {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "path prefix of {} bytes exceeds the {}-byte table width",
            self.len,
            PATH_LEN - 1
        )
    }
}

/// Hash used as the key of the `RUNTIMES` set: sum of the name's bytes up to
/// the first NUL. Both sides of the map boundary must agree on this value.
pub fn runtime_name_hash(name: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    for &b in name {
        if b == 0 {
            break;
        }
        hash = hash.wrapping_add(b as u32);
    }
    hash
}

/// Shared map names and slot layout. The userspace writer resolves maps by
/// these strings; the kernel side declares statics with matching identifiers.
pub mod maps {
    use crate::policy::PolicyLevel;

    pub const RUNTIMES: &str = "RUNTIMES";
    pub const CONTAINERS: &str = "CONTAINERS";
    pub const PROCESSES: &str = "PROCESSES";
    pub const ALLOWED_PATHS_MOUNT_RESTRICTED: &str = "ALLOWED_PATHS_MOUNT_RESTRICTED";
    pub const ALLOWED_PATHS_MOUNT_BASELINE: &str = "ALLOWED_PATHS_MOUNT_BASELINE";
    pub const ALLOWED_PATHS_ACCESS_RESTRICTED: &str = "ALLOWED_PATHS_ACCESS_RESTRICTED";
    pub const ALLOWED_PATHS_ACCESS_BASELINE: &str = "ALLOWED_PATHS_ACCESS_BASELINE";
    pub const DENIED_PATHS_ACCESS_RESTRICTED: &str = "DENIED_PATHS_ACCESS_RESTRICTED";
    pub const DENIED_PATHS_ACCESS_BASELINE: &str = "DENIED_PATHS_ACCESS_BASELINE";
    pub const DECISION_STATS: &str = "DECISION_STATS";

    /// Slots of the `DECISION_STATS` array.
    pub const STAT_ALLOWED: u32 = 0;
    pub const STAT_DENIED: u32 = 1;
    pub const STAT_ERRORS: u32 = 2;
    pub const STAT_SLOTS: u32 = 3;

    /// The hook class a rule table feeds.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum RuleClass {
        MountAllow,
        AccessAllow,
        AccessDeny,
    }

    /// The table backing one (level, class) pair. Privileged containers are
    /// never evaluated against rules and have no tables.
    pub fn rule_table_name(level: PolicyLevel, class: RuleClass) -> Option<&'static str> {
        match (level, class) {
            (PolicyLevel::Restricted, RuleClass::MountAllow) => {
                Some(ALLOWED_PATHS_MOUNT_RESTRICTED)
            }
            (PolicyLevel::Baseline, RuleClass::MountAllow) => Some(ALLOWED_PATHS_MOUNT_BASELINE),
            (PolicyLevel::Restricted, RuleClass::AccessAllow) => {
                Some(ALLOWED_PATHS_ACCESS_RESTRICTED)
            }
            (PolicyLevel::Baseline, RuleClass::AccessAllow) => Some(ALLOWED_PATHS_ACCESS_BASELINE),
            (PolicyLevel::Restricted, RuleClass::AccessDeny) => {
                Some(DENIED_PATHS_ACCESS_RESTRICTED)
            }
            (PolicyLevel::Baseline, RuleClass::AccessDeny) => Some(DENIED_PATHS_ACCESS_BASELINE),
            (PolicyLevel::Privileged, _) => None,
        }
    }
}

// -----------------------------
// Compile-time ABI/layout checks
// -----------------------------

const _: [(); 4] = [(); core::mem::size_of::<Container>()];
const _: [(); 4] = [(); core::mem::size_of::<Process>()];
const _: [(); PATH_LEN] = [(); core::mem::size_of::<AccessedPath>()];
const _: [(); 1] = [(); core::mem::align_of::<AccessedPath>()];

#[cfg(all(feature = "user", target_os = "linux"))]
mod pod {
    // SAFETY: all three are #[repr(C)] with only plain integer fields and no
    // padding, as asserted above.
    unsafe impl aya::Pod for super::Container {}
    unsafe impl aya::Pod for super::Process {}
    unsafe impl aya::Pod for super::AccessedPath {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessed_path_round_trips_short_prefixes() {
        let p = AccessedPath::from_str("/var/lib/kubelet").unwrap();
        assert_eq!(&p.path[..16], b"/var/lib/kubelet");
        assert_eq!(p.path[16], 0);
    }

    #[test]
    fn accessed_path_refuses_overlong_prefixes() {
        let long = core::str::from_utf8(&[b'a'; PATH_LEN]).unwrap();
        assert_eq!(
            AccessedPath::from_str(long),
            Err(PathTooLong { len: PATH_LEN })
        );
        // 63 bytes + NUL still fits.
        let edge = core::str::from_utf8(&[b'a'; PATH_LEN - 1]).unwrap();
        assert!(AccessedPath::from_str(edge).is_ok());
    }

    #[test]
    fn every_enforced_level_has_its_three_tables() {
        use crate::policy::PolicyLevel;
        use maps::RuleClass;

        for level in [PolicyLevel::Restricted, PolicyLevel::Baseline] {
            for class in [
                RuleClass::MountAllow,
                RuleClass::AccessAllow,
                RuleClass::AccessDeny,
            ] {
                assert!(maps::rule_table_name(level, class).is_some());
            }
        }
        assert_eq!(
            maps::rule_table_name(PolicyLevel::Privileged, RuleClass::MountAllow),
            None
        );
    }

    #[test]
    fn runtime_hash_stops_at_nul() {
        assert_eq!(runtime_name_hash(b"ab\0cd"), (b'a' + b'b') as u32);
        assert_eq!(runtime_name_hash(b""), 0);
        assert_eq!(
            runtime_name_hash(b"runc:[2:INIT]"),
            b"runc:[2:INIT]".iter().map(|&b| b as u32).sum::<u32>()
        );
    }
}
