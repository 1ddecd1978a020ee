//! Policy levels and the per-hook decision state machines.
//!
//! Every hook runs the same prologue: resolve the current task to a
//! [`Resolution`], collapse that to a [`HookState`], evaluate the hook's own
//! rule, then chain the previous program's verdict with [`combine`]. The
//! pieces live here, away from any kernel API, so they can be exercised on
//! the host.

use crate::{EPERM, MOUNT_TYPE_BIND, MOUNT_TYPE_LEN};

/// Allow verdict shared by every hook.
pub const ALLOW: i32 = 0;

/// UID at and above which an account counts as a regular user for the setuid
/// check.
// TODO: make the threshold configurable instead of hard-coding 1000.
pub const MIN_REGULAR_UID: u32 = 1000;

/// Policy assigned to a container: `Restricted < Baseline < Privileged`.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PolicyLevel {
    Restricted = 0,
    Baseline = 1,
    Privileged = 2,
}

impl PolicyLevel {
    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    pub const fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(PolicyLevel::Restricted),
            1 => Some(PolicyLevel::Baseline),
            2 => Some(PolicyLevel::Privileged),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            PolicyLevel::Restricted => "restricted",
            PolicyLevel::Baseline => "baseline",
            PolicyLevel::Privileged => "privileged",
        }
    }
}

/// Outcome of walking the process and container tables for a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// A process record points at a missing or corrupt container record.
    Inconsistent,
    /// The task is not containerized.
    Untracked,
    Level(PolicyLevel),
}

impl Resolution {
    /// Interpret the level stored in a container record. Anything outside
    /// the three enforceable levels means the registry was corrupted and is
    /// treated exactly like a missing container.
    pub const fn from_record(raw: i32) -> Self {
        match PolicyLevel::from_raw(raw) {
            Some(level) => Resolution::Level(level),
            None => Resolution::Inconsistent,
        }
    }
}

/// The three states every hook shares. Privileged and untracked tasks bypass
/// rule evaluation; an inconsistent registry fails closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookState {
    Bypass,
    Evaluate(PolicyLevel),
    FailClosed,
}

impl HookState {
    pub const fn from_resolution(res: Resolution) -> Self {
        match res {
            Resolution::Inconsistent => HookState::FailClosed,
            Resolution::Untracked => HookState::Bypass,
            Resolution::Level(PolicyLevel::Privileged) => HookState::Bypass,
            Resolution::Level(level) => HookState::Evaluate(level),
        }
    }
}

/// Chain this program's verdict with the previous program's. A prior denial
/// sticks no matter what this program decided.
#[inline(always)]
pub const fn combine(this: i32, prev: i32) -> i32 {
    if prev != 0 {
        prev
    } else {
        this
    }
}

/// Kernel-log access: restricted and baseline are both denied.
#[inline(always)]
pub const fn syslog_verdict(state: HookState) -> i32 {
    match state {
        HookState::Bypass => ALLOW,
        HookState::Evaluate(_) => -EPERM,
        HookState::FailClosed => -EPERM,
    }
}

/// UID transition check: a regular user escalating to root is denied; every
/// other transition (root dropping privileges, user-to-user switches) passes.
#[inline(always)]
pub const fn setuid_verdict(state: HookState, old_uid: u32, new_uid: u32) -> i32 {
    match state {
        HookState::Bypass => ALLOW,
        HookState::FailClosed => -EPERM,
        HookState::Evaluate(_) => {
            if new_uid == 0 && old_uid >= MIN_REGULAR_UID {
                -EPERM
            } else {
                ALLOW
            }
        }
    }
}

/// Only bind mounts are mediated; everything else passes through.
#[inline(always)]
pub fn is_bind_mount(fstype: &[u8; MOUNT_TYPE_LEN]) -> bool {
    fstype == MOUNT_TYPE_BIND
}

/// Verdict for a bind mount once the level's mount-allow table was scanned.
#[inline(always)]
pub const fn bind_mount_verdict(matched: bool) -> i32 {
    if matched {
        ALLOW
    } else {
        -EPERM
    }
}

/// File-open verdict: deny rules win over allow rules, and a path matching
/// neither is denied. The allow scan only runs when no deny rule matched.
#[inline(always)]
pub fn open_verdict(denied: impl FnOnce() -> bool, allowed: impl FnOnce() -> bool) -> i32 {
    if denied() {
        return -EPERM;
    }
    if allowed() {
        ALLOW
    } else {
        -EPERM
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::{is_root_path, prefix_matches};
    use crate::{AccessedPath, PATH_LEN};

    fn state(res: Resolution) -> HookState {
        HookState::from_resolution(res)
    }

    fn path_buf(s: &str) -> [u8; PATH_LEN] {
        let mut buf = [0u8; PATH_LEN];
        buf[..s.len()].copy_from_slice(s.as_bytes());
        buf
    }

    // Mirror of the kernel wiring for the file_open hook.
    fn open_flow(buf: &[u8; PATH_LEN], deny: &[AccessedPath], allow: &[AccessedPath]) -> i32 {
        if is_root_path(buf) {
            return ALLOW;
        }
        open_verdict(
            || deny.iter().any(|p| prefix_matches(&p.path, buf)),
            || allow.iter().any(|p| prefix_matches(&p.path, buf)),
        )
    }

    #[test]
    fn levels_are_ordered() {
        assert!(PolicyLevel::Restricted < PolicyLevel::Baseline);
        assert!(PolicyLevel::Baseline < PolicyLevel::Privileged);
    }

    #[test]
    fn corrupt_level_resolves_inconsistent() {
        assert_eq!(Resolution::from_record(0), Resolution::Level(PolicyLevel::Restricted));
        assert_eq!(Resolution::from_record(2), Resolution::Level(PolicyLevel::Privileged));
        assert_eq!(Resolution::from_record(-1), Resolution::Inconsistent);
        assert_eq!(Resolution::from_record(7), Resolution::Inconsistent);
    }

    #[test]
    fn privileged_and_untracked_bypass_every_hook() {
        for res in [Resolution::Untracked, Resolution::Level(PolicyLevel::Privileged)] {
            assert_eq!(syslog_verdict(state(res)), ALLOW);
            assert_eq!(setuid_verdict(state(res), 1000, 0), ALLOW);
        }
    }

    #[test]
    fn inconsistent_registry_fails_closed() {
        assert_eq!(syslog_verdict(state(Resolution::Inconsistent)), -EPERM);
        assert_eq!(setuid_verdict(state(Resolution::Inconsistent), 0, 0), -EPERM);
    }

    #[test]
    fn syslog_denies_restricted_and_baseline() {
        assert_eq!(
            syslog_verdict(state(Resolution::Level(PolicyLevel::Restricted))),
            -EPERM
        );
        assert_eq!(
            syslog_verdict(state(Resolution::Level(PolicyLevel::Baseline))),
            -EPERM
        );
    }

    #[test]
    fn setuid_blocks_user_to_root_only() {
        let s = state(Resolution::Level(PolicyLevel::Restricted));
        assert_eq!(setuid_verdict(s, 1000, 0), -EPERM);
        assert_eq!(setuid_verdict(s, 0, 0), ALLOW);
        assert_eq!(setuid_verdict(s, 1000, 1001), ALLOW);
        // System accounts below the threshold may still become root.
        assert_eq!(setuid_verdict(s, 999, 0), ALLOW);
    }

    // Mirror of the kernel wiring for the sb_mount hook, past the prologue.
    fn mount_flow(fstype: Option<&[u8; MOUNT_TYPE_LEN]>, source: &str, allow: &[AccessedPath]) -> i32 {
        let fstype = match fstype {
            // Empty-type mounts come from some sandbox tools and pass.
            None => return ALLOW,
            Some(t) => t,
        };
        if !is_bind_mount(fstype) {
            return ALLOW;
        }
        let buf = path_buf(source);
        bind_mount_verdict(allow.iter().any(|p| prefix_matches(&p.path, &buf)))
    }

    #[test]
    fn bind_mount_passes_on_an_allowed_prefix() {
        let allow = [AccessedPath::from_str("/var/lib/kubelet").unwrap()];
        assert_eq!(
            mount_flow(Some(b"bind\0"), "/var/lib/kubelet/pods/x", &allow),
            ALLOW
        );
        assert_eq!(mount_flow(Some(b"bind\0"), "/home/user", &allow), -EPERM);
    }

    #[test]
    fn non_bind_mounts_are_unmediated() {
        let allow = [];
        assert_eq!(mount_flow(Some(b"tmpf\0"), "/anything", &allow), ALLOW);
        assert_eq!(mount_flow(None, "/anything", &allow), ALLOW);
    }

    #[test]
    fn bind_type_comparison_is_exact() {
        assert!(is_bind_mount(b"bind\0"));
        assert!(!is_bind_mount(b"tmpf\0"));
        assert!(!is_bind_mount(b"bind!"));
    }

    #[test]
    fn bind_mount_requires_an_allow_match() {
        assert_eq!(bind_mount_verdict(true), ALLOW);
        assert_eq!(bind_mount_verdict(false), -EPERM);
    }

    #[test]
    fn open_root_path_is_allowed_outright() {
        let deny = [];
        let allow = [];
        assert_eq!(open_flow(&path_buf("/"), &deny, &allow), ALLOW);
        // "/x" must not ride on the root special case.
        assert_eq!(open_flow(&path_buf("/x"), &deny, &allow), -EPERM);
    }

    #[test]
    fn open_deny_wins_over_allow() {
        let deny = [AccessedPath::from_str("/etc/shadow").unwrap()];
        let allow = [AccessedPath::from_str("/etc").unwrap()];
        assert_eq!(open_flow(&path_buf("/etc/shadow"), &deny, &allow), -EPERM);
        assert_eq!(open_flow(&path_buf("/etc/hosts"), &deny, &allow), ALLOW);
    }

    #[test]
    fn open_defaults_to_deny() {
        let deny = [];
        let allow = [AccessedPath::from_str("/usr").unwrap()];
        assert_eq!(open_flow(&path_buf("/opt/tool"), &deny, &allow), -EPERM);
    }

    #[test]
    fn open_allow_scan_is_lazy() {
        // Once a deny rule matches, the allow tables must not be consulted.
        let hit = core::cell::Cell::new(false);
        let ret = open_verdict(
            || true,
            || {
                hit.set(true);
                true
            },
        );
        assert_eq!(ret, -EPERM);
        assert!(!hit.get());
    }

    #[test]
    fn previous_denial_sticks() {
        const EACCES: i32 = 13;
        assert_eq!(combine(ALLOW, -EACCES), -EACCES);
        assert_eq!(combine(-EPERM, -EACCES), -EACCES);
        assert_eq!(combine(-EPERM, 0), -EPERM);
        assert_eq!(combine(ALLOW, 0), ALLOW);
    }
}
