//! Task-lifecycle hooks: UID transitions and the two lineage event sources.
//!
//! Lineage listens to both the fork tracepoint and the task-alloc hook.
//! Either one alone misses some children, so both feed the same handler and
//! the insert is idempotent.

use aya_ebpf::{
    helpers::{bpf_get_current_comm, bpf_probe_read_kernel},
    macros::{btf_tracepoint, lsm},
    programs::{BtfTracePointContext, LsmContext},
    EbpfContext,
};
use aya_log_ebpf::{debug, error};

use confine_common::{
    lineage::{lineage_action, LineageAction},
    maps::STAT_ERRORS,
    policy::{combine, setuid_verdict, HookState, ALLOW},
    Process, EFAULT, EPERM,
};

use crate::path_lsm::as_log_str;
use crate::vmlinux::{cred, task_struct};
use crate::{count_verdict, current_pid, inc_stat, resolve_policy, CONTAINERS, PROCESSES};

/// Denies a regular user inside a restricted or baseline container from
/// becoming root. Root dropping privileges and user-to-user switches pass.
#[lsm(hook = "task_fix_setuid")]
pub fn setuid_audit(ctx: LsmContext) -> i32 {
    let ret_prev: i32 = unsafe { ctx.arg(3) };
    let ret = match try_setuid_audit(&ctx) {
        Ok(v) => v,
        Err(v) => v,
    };
    combine(ret, ret_prev)
}

#[inline(always)]
fn try_setuid_audit(ctx: &LsmContext) -> Result<i32, i32> {
    let new: *const cred = unsafe { ctx.arg(0) };
    let old: *const cred = unsafe { ctx.arg(1) };

    let comm = bpf_get_current_comm().map_err(|_| -EFAULT)?;

    let old_uid = unsafe { bpf_probe_read_kernel(core::ptr::addr_of!((*old).uid.val)) }
        .map_err(|_| -EFAULT)?;
    let new_uid = unsafe { bpf_probe_read_kernel(core::ptr::addr_of!((*new).uid.val)) }
        .map_err(|_| -EFAULT)?;

    let pid = current_pid();
    let state = HookState::from_resolution(resolve_policy(pid));
    let ret = setuid_verdict(state, old_uid, new_uid);

    match state {
        HookState::Evaluate(level) => {
            debug!(
                ctx,
                "setuid: pid={} comm={} {}: uid {} -> {} ret={}",
                pid,
                as_log_str(&comm),
                level.as_str(),
                old_uid,
                new_uid,
                ret
            );
            count_verdict(ret);
        }
        HookState::FailClosed => {
            error!(ctx, "setuid: pid={} registry inconsistent, deny", pid);
            inc_stat(STAT_ERRORS);
        }
        HookState::Bypass => {}
    }

    Ok(ret)
}

/// Inherit container membership from the parent task, if it has any.
#[inline(always)]
fn handle_new_process<C: EbpfContext>(
    ctx: &C,
    parent: *const task_struct,
    child: *const task_struct,
) -> Result<(), i32> {
    let ppid = unsafe { bpf_probe_read_kernel(core::ptr::addr_of!((*parent).pid)) }
        .map_err(|_| -EPERM)?;
    let pid = unsafe { bpf_probe_read_kernel(core::ptr::addr_of!((*child).pid)) }
        .map_err(|_| -EPERM)?;

    let child_rec = unsafe { PROCESSES.get(&pid) }.copied();
    let parent_rec = unsafe { PROCESSES.get(&ppid) }.copied();

    match lineage_action(child_rec, parent_rec, |id| {
        unsafe { CONTAINERS.get(&id) }.is_some()
    }) {
        LineageAction::Skip => Ok(()),
        LineageAction::Adopt(container_id) => {
            debug!(
                ctx,
                "lineage: adopting pid={} from parent={} container={}", pid, ppid, container_id
            );
            PROCESSES
                .insert(&pid, &Process { container_id }, 0)
                .map_err(|e| e as i32)
        }
        LineageAction::Inconsistent(container_id) => {
            error!(
                ctx,
                "lineage: pid={} parent={} points at missing container {}",
                pid,
                ppid,
                container_id
            );
            inc_stat(STAT_ERRORS);
            Err(-EPERM)
        }
    }
}

/// First lineage event source: the scheduler's fork tracepoint.
#[btf_tracepoint(function = "sched_process_fork")]
pub fn sched_process_fork(ctx: BtfTracePointContext) -> i32 {
    let parent: *const task_struct = unsafe { ctx.arg(0) };
    let child: *const task_struct = unsafe { ctx.arg(1) };
    if parent.is_null() || child.is_null() {
        error!(&ctx, "fork: parent or child is null");
        return -EPERM;
    }
    match handle_new_process(&ctx, parent, child) {
        Ok(()) => ALLOW,
        Err(ret) => ret,
    }
}

/// Second lineage event source: the task-alloc hook, reached via clone().
#[lsm(hook = "task_alloc")]
pub fn clone_audit(ctx: LsmContext) -> i32 {
    let ret_prev: i32 = unsafe { ctx.arg(2) };
    let ret = match try_clone_audit(&ctx) {
        Ok(v) => v,
        Err(v) => v,
    };
    combine(ret, ret_prev)
}

#[inline(always)]
fn try_clone_audit(ctx: &LsmContext) -> Result<i32, i32> {
    let child: *const task_struct = unsafe { ctx.arg(0) };
    if child.is_null() {
        error!(ctx, "clone: task is null");
        return Err(-EPERM);
    }
    let parent = unsafe { bpf_probe_read_kernel(core::ptr::addr_of!((*child).real_parent)) }
        .map_err(|_| -EPERM)?;
    if parent.is_null() {
        error!(ctx, "clone: parent is null");
        return Err(-EPERM);
    }
    handle_new_process(ctx, parent, child).map(|()| ALLOW)
}
