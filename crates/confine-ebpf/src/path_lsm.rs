//! The path-mediated hooks: bind-mount establishment and file opens.
//!
//! Both read a kernel string into a bounded per-invocation buffer, then scan
//! the level's rule tables. Scans are straight-line: at most
//! `PATH_MAX_SLOTS` lookups of at most `PATH_LEN` compared bytes each.

use aya_ebpf::{
    cty::c_char,
    helpers::{bpf_d_path, bpf_probe_read_kernel_str_bytes},
    macros::lsm,
    maps::HashMap,
    programs::LsmContext,
};
use aya_log_ebpf::{debug, error, warn};

use confine_common::{
    maps::STAT_ERRORS,
    paths::{cstr_len, is_root_path, prefix_matches},
    policy::{
        bind_mount_verdict, combine, is_bind_mount, open_verdict, HookState, PolicyLevel, ALLOW,
    },
    AccessedPath, EFAULT, EPERM, MOUNT_TYPE_LEN, PATH_LEN, PATH_MAX_SLOTS,
};

use crate::vmlinux::file;
use crate::{
    count_verdict, current_pid, inc_stat, resolve_policy, ALLOWED_PATHS_ACCESS_BASELINE,
    ALLOWED_PATHS_ACCESS_RESTRICTED, ALLOWED_PATHS_MOUNT_BASELINE, ALLOWED_PATHS_MOUNT_RESTRICTED,
    DENIED_PATHS_ACCESS_BASELINE, DENIED_PATHS_ACCESS_RESTRICTED,
};

/// Linear scan of one rule table. Slots are dense indices assigned by the
/// control plane; absent and empty entries never match.
#[inline(always)]
fn match_any(table: &HashMap<u32, AccessedPath>, candidate: &[u8; PATH_LEN]) -> bool {
    for slot in 0..PATH_MAX_SLOTS {
        if let Some(entry) = unsafe { table.get(&slot) } {
            if prefix_matches(&entry.path, candidate) {
                return true;
            }
        }
    }
    false
}

#[inline(always)]
pub(crate) fn as_log_str(buf: &[u8]) -> &str {
    let n = cstr_len(buf);
    // Paths handed out by the kernel are not guaranteed UTF-8, but log lines
    // are advisory and the bytes stay within the buffer.
    unsafe { core::str::from_utf8_unchecked(&buf[..n]) }
}

/// Bind mounts into restricted and baseline containers must come from an
/// allow-listed source prefix. Every other mount type passes through.
#[lsm(hook = "sb_mount")]
pub fn mount_audit(ctx: LsmContext) -> i32 {
    let ret_prev: i32 = unsafe { ctx.arg(5) };
    let ret = match try_mount_audit(&ctx) {
        Ok(v) => v,
        Err(v) => v,
    };
    combine(ret, ret_prev)
}

#[inline(always)]
fn try_mount_audit(ctx: &LsmContext) -> Result<i32, i32> {
    let pid = current_pid();
    let level = match HookState::from_resolution(resolve_policy(pid)) {
        HookState::Bypass => return Ok(ALLOW),
        HookState::FailClosed => {
            error!(ctx, "mount: pid={} registry inconsistent, deny", pid);
            inc_stat(STAT_ERRORS);
            return Err(-EPERM);
        }
        HookState::Evaluate(level) => level,
    };

    let fstype_ptr: *const c_char = unsafe { ctx.arg(2) };
    if fstype_ptr.is_null() {
        // Some sandbox tools (bwrap, flatpak) issue mounts with an empty
        // type; denying those broke them.
        warn!(ctx, "mount: pid={} null type, allow", pid);
        return Ok(ALLOW);
    }
    let mut fstype = [0u8; MOUNT_TYPE_LEN];
    if unsafe { bpf_probe_read_kernel_str_bytes(fstype_ptr as *const u8, &mut fstype) }.is_err() {
        error!(ctx, "mount: pid={} could not read the mount type", pid);
        inc_stat(STAT_ERRORS);
        return Err(-EFAULT);
    }
    if !is_bind_mount(&fstype) {
        return Ok(ALLOW);
    }

    let dev_name_ptr: *const c_char = unsafe { ctx.arg(0) };
    if dev_name_ptr.is_null() {
        error!(ctx, "mount: pid={} bind mount without source", pid);
        inc_stat(STAT_ERRORS);
        return Err(-EFAULT);
    }
    let mut source = [0u8; PATH_LEN];
    if unsafe { bpf_probe_read_kernel_str_bytes(dev_name_ptr as *const u8, &mut source) }.is_err()
    {
        error!(ctx, "mount: pid={} could not read the mount source", pid);
        inc_stat(STAT_ERRORS);
        return Err(-EFAULT);
    }

    let table = match level {
        PolicyLevel::Restricted => &ALLOWED_PATHS_MOUNT_RESTRICTED,
        _ => &ALLOWED_PATHS_MOUNT_BASELINE,
    };
    let ret = bind_mount_verdict(match_any(table, &source));
    debug!(
        ctx,
        "mount: pid={} {}: source={} ret={}",
        pid,
        level.as_str(),
        as_log_str(&source),
        ret
    );
    count_verdict(ret);
    Ok(ret)
}

/// File opens inside restricted and baseline containers run deny rules first,
/// then allow rules, and default to deny.
#[lsm(hook = "file_open")]
pub fn open_audit(ctx: LsmContext) -> i32 {
    let ret_prev: i32 = unsafe { ctx.arg(1) };
    let ret = match try_open_audit(&ctx) {
        Ok(v) => v,
        Err(v) => v,
    };
    combine(ret, ret_prev)
}

#[inline(always)]
fn try_open_audit(ctx: &LsmContext) -> Result<i32, i32> {
    let pid = current_pid();
    let level = match HookState::from_resolution(resolve_policy(pid)) {
        HookState::Bypass => return Ok(ALLOW),
        HookState::FailClosed => {
            error!(ctx, "open: pid={} registry inconsistent, deny", pid);
            inc_stat(STAT_ERRORS);
            return Err(-EPERM);
        }
        HookState::Evaluate(level) => level,
    };

    let file_ptr: *const file = unsafe { ctx.arg(0) };
    if file_ptr.is_null() {
        return Ok(ALLOW);
    }

    // addr_of! on the member keeps the CO-RE relocation chain intact.
    let f_path = unsafe { core::ptr::addr_of!((*file_ptr).f_path) };
    let mut buf = [0u8; PATH_LEN];
    let len = unsafe {
        bpf_d_path(
            f_path as *mut aya_ebpf::bindings::path,
            buf.as_mut_ptr() as *mut c_char,
            PATH_LEN as u32,
        )
    };
    if len < 0 {
        // Real paths regularly exceed the fixed buffer; denying on a failed
        // read would turn every long path into a false denial.
        warn!(ctx, "open: pid={} could not read the path, allow", pid);
        return Ok(ALLOW);
    }

    // Allow "/" itself, and only "/": as a prefix it would cover everything.
    if is_root_path(&buf) {
        debug!(ctx, "open: pid={} {}: allow /", pid, level.as_str());
        return Ok(ALLOW);
    }

    let (deny_table, allow_table) = match level {
        PolicyLevel::Restricted => (
            &DENIED_PATHS_ACCESS_RESTRICTED,
            &ALLOWED_PATHS_ACCESS_RESTRICTED,
        ),
        _ => (
            &DENIED_PATHS_ACCESS_BASELINE,
            &ALLOWED_PATHS_ACCESS_BASELINE,
        ),
    };
    let ret = open_verdict(
        || match_any(deny_table, &buf),
        || match_any(allow_table, &buf),
    );
    debug!(
        ctx,
        "open: pid={} {}: path={} ret={}",
        pid,
        level.as_str(),
        as_log_str(&buf),
        ret
    );
    count_verdict(ret);
    Ok(ret)
}
