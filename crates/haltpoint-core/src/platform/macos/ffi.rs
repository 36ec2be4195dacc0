//! # macOS Mach API FFI Declarations
//!
//! `extern "C"` declarations for the Mach and libc calls the backend needs
//! that the `mach2` crate does not provide (or provides with a restricted
//! signature). They are wrapped in safe functions in the other modules.
//!
//! ## References
//!
//! - [Apple Mach Kernel Programming](https://developer.apple.com/library/archive/documentation/Darwin/Conceptual/KernelProgramming/Mach/Mach.html)
//! - [XNU kernel source](https://github.com/apple-oss-distributions/xnu)

use libc::{c_int, kern_return_t, mach_msg_type_number_t, mach_port_t, natural_t, thread_act_t, vm_address_t, vm_map_t, vm_offset_t};

#[link(name = "c", kind = "dylib")]
extern "C" {
    /// Task port of the process `pid`. Needs root or the debugger entitlement.
    pub fn task_for_pid(target_task: mach_port_t, pid: c_int, task: *mut mach_port_t) -> kern_return_t;

    /// Release a send right obtained from the kernel.
    pub fn mach_port_deallocate(target_task: mach_port_t, name: mach_port_t) -> kern_return_t;

    /// Read one flavor of thread state.
    pub fn thread_get_state(
        target_act: thread_act_t,
        flavor: c_int,
        old_state: *mut natural_t,
        old_state_count: *mut mach_msg_type_number_t,
    ) -> kern_return_t;

    /// Write one flavor of thread state.
    pub fn thread_set_state(
        target_act: thread_act_t,
        flavor: c_int,
        new_state: *const natural_t,
        new_state_count: mach_msg_type_number_t,
    ) -> kern_return_t;

    /// Increment a thread's suspend count.
    pub fn thread_suspend(target_act: thread_act_t) -> kern_return_t;

    /// Decrement a thread's suspend count.
    pub fn thread_resume(target_act: thread_act_t) -> kern_return_t;

    /// Copy `data_count` bytes into the target task.
    pub fn vm_write(
        target_task: vm_map_t,
        address: vm_address_t,
        data: vm_offset_t,
        data_count: mach_msg_type_number_t,
    ) -> kern_return_t;

    /// `posix_spawn(2)`.
    pub fn posix_spawn(
        pid: *mut libc::pid_t,
        path: *const libc::c_char,
        file_actions: *const libc::posix_spawn_file_actions_t,
        attrp: *const libc::posix_spawnattr_t,
        argv: *const *const libc::c_char,
        envp: *const *const libc::c_char,
    ) -> c_int;

    pub fn posix_spawnattr_init(attrp: *mut libc::posix_spawnattr_t) -> c_int;

    pub fn posix_spawnattr_destroy(attrp: *mut libc::posix_spawnattr_t) -> c_int;

    pub fn posix_spawnattr_setflags(attrp: *mut libc::posix_spawnattr_t, flags: libc::c_short) -> c_int;
}

/// Flags for `posix_spawnattr_setflags()` (`<spawn.h>`).
pub mod spawn_flags
{
    use libc::c_short;

    /// Create the task suspended; it runs after `task_resume()`.
    pub const POSIX_SPAWN_START_SUSPENDED: c_short = 0x0080;

    /// Private flag: load the image without ASLR slide.
    pub const POSIX_SPAWN_DISABLE_ASLR: c_short = 0x0100;
}

/// Thread state flavors and sizes (`<mach/*/thread_status.h>`).
pub mod thread_state
{
    use libc::{c_int, mach_msg_type_number_t};

    pub const X86_THREAD_STATE64: c_int = 4;
    pub const X86_THREAD_STATE64_COUNT: mach_msg_type_number_t = 42;

    pub const ARM_THREAD_STATE64: c_int = 6;
    pub const ARM_THREAD_STATE64_COUNT: mach_msg_type_number_t = 68;

    pub const ARM_DEBUG_STATE64: c_int = 15;
    pub const ARM_DEBUG_STATE64_COUNT: mach_msg_type_number_t = 130;
}
