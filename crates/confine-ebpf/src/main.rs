#![no_std]
#![no_main]

#[no_mangle]
#[link_section = "license"]
pub static _LICENSE: [u8; 4] = *b"GPL\0";

pub mod path_lsm;
pub mod task_lsm;
#[allow(dead_code)]
#[allow(non_snake_case)]
#[allow(non_camel_case_types)]
#[allow(non_upper_case_globals)]
#[allow(clippy::all)]
pub mod vmlinux;

use aya_ebpf::{
    helpers::bpf_get_current_pid_tgid,
    macros::{lsm, map},
    maps::{Array, HashMap},
    programs::LsmContext,
};
use aya_log_ebpf::{debug, error};

use confine_common::{
    maps::{STAT_ALLOWED, STAT_DENIED, STAT_ERRORS, STAT_SLOTS},
    policy::{combine, syslog_verdict, HookState, Resolution},
    AccessedPath, Container, Process, PATH_MAX_SLOTS, PID_MAX_LIMIT, RUNTIMES_MAX,
};

/// Hashed names of container-runtime init processes (e.g. `runc:[2:INIT]`).
/// Populated by the control plane; kept for lineage bootstrap, no hook
/// consults it for decisions.
#[map]
pub static RUNTIMES: HashMap<u32, u32> = HashMap::with_max_entries(RUNTIMES_MAX, 0);

/// Container id -> policy level. Written by the control plane strictly
/// before the first process of the container is registered.
#[map]
pub static CONTAINERS: HashMap<u32, Container> = HashMap::with_max_entries(PID_MAX_LIMIT, 0);

/// PID -> container membership. Seeded by the control plane for each
/// container init, extended in-kernel by the lineage programs.
#[map]
pub static PROCESSES: HashMap<i32, Process> = HashMap::with_max_entries(PID_MAX_LIMIT, 0);

/// Source-path prefixes allowed to bind mount into restricted containers.
#[map]
pub static ALLOWED_PATHS_MOUNT_RESTRICTED: HashMap<u32, AccessedPath> =
    HashMap::with_max_entries(PATH_MAX_SLOTS, 0);

/// Source-path prefixes allowed to bind mount into baseline containers.
#[map]
pub static ALLOWED_PATHS_MOUNT_BASELINE: HashMap<u32, AccessedPath> =
    HashMap::with_max_entries(PATH_MAX_SLOTS, 0);

/// Path prefixes restricted containers may open.
#[map]
pub static ALLOWED_PATHS_ACCESS_RESTRICTED: HashMap<u32, AccessedPath> =
    HashMap::with_max_entries(PATH_MAX_SLOTS, 0);

/// Path prefixes baseline containers may open.
#[map]
pub static ALLOWED_PATHS_ACCESS_BASELINE: HashMap<u32, AccessedPath> =
    HashMap::with_max_entries(PATH_MAX_SLOTS, 0);

/// Path prefixes restricted containers must never open, deny rules win over
/// the allow table.
#[map]
pub static DENIED_PATHS_ACCESS_RESTRICTED: HashMap<u32, AccessedPath> =
    HashMap::with_max_entries(PATH_MAX_SLOTS, 0);

/// Path prefixes baseline containers must never open.
#[map]
pub static DENIED_PATHS_ACCESS_BASELINE: HashMap<u32, AccessedPath> =
    HashMap::with_max_entries(PATH_MAX_SLOTS, 0);

/// Running allow/deny/error counters, one slot per
/// [`confine_common::maps`] stat index.
#[map]
pub static DECISION_STATS: Array<u64> = Array::with_max_entries(STAT_SLOTS, 0);

#[inline(always)]
pub fn current_pid() -> i32 {
    (bpf_get_current_pid_tgid() >> 32) as i32
}

#[inline(always)]
pub fn inc_stat(slot: u32) {
    if let Some(v) = DECISION_STATS.get_ptr_mut(slot) {
        unsafe { *v += 1 };
    }
}

#[inline(always)]
pub fn count_verdict(ret: i32) {
    if ret == 0 {
        inc_stat(STAT_ALLOWED);
    } else {
        inc_stat(STAT_DENIED);
    }
}

/// Walk PROCESSES -> CONTAINERS for the given task. A registered process
/// whose container is gone means the registration went wrong and the caller
/// must fail closed.
#[inline(always)]
pub fn resolve_policy(pid: i32) -> Resolution {
    let proc_rec = match unsafe { PROCESSES.get(&pid) } {
        Some(p) => *p,
        None => return Resolution::Untracked,
    };
    match unsafe { CONTAINERS.get(&proc_rec.container_id) } {
        Some(c) => Resolution::from_record(c.policy_level),
        None => Resolution::Inconsistent,
    }
}

/// Attempts to read the kernel log ring. Restricted and baseline containers
/// are both denied; there is no rule table for this hook.
#[lsm(hook = "syslog")]
pub fn syslog_audit(ctx: LsmContext) -> i32 {
    let ret_prev: i32 = unsafe { ctx.arg(1) };
    let pid = current_pid();
    let state = HookState::from_resolution(resolve_policy(pid));
    let ret = syslog_verdict(state);

    match state {
        HookState::Evaluate(level) => {
            debug!(&ctx, "syslog: pid={} {}: deny", pid, level.as_str());
            count_verdict(ret);
        }
        HookState::FailClosed => {
            error!(&ctx, "syslog: pid={} registry inconsistent, deny", pid);
            inc_stat(STAT_ERRORS);
        }
        HookState::Bypass => {}
    }

    combine(ret, ret_prev)
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}
