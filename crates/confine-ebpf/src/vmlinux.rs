//! Kernel type bindings for the fields the hook programs touch, trimmed from
//! `aya-tool generate task_struct cred file` output. Field reads go through
//! CO-RE relocations, so only the accessed members need to be present.

use aya_ebpf::cty::{c_char, c_int};

#[repr(C)]
pub struct vfsmount {
    _unused: [u8; 0],
}

#[repr(C)]
pub struct dentry {
    _unused: [u8; 0],
}

#[repr(C)]
pub struct path {
    pub mnt: *mut vfsmount,
    pub dentry: *mut dentry,
}

#[repr(C)]
pub struct file {
    pub f_path: path,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct kuid_t {
    pub val: u32,
}

#[repr(C)]
pub struct cred {
    pub uid: kuid_t,
}

#[repr(C)]
pub struct task_struct {
    pub pid: c_int,
    pub real_parent: *mut task_struct,
    pub comm: [c_char; 16],
}
