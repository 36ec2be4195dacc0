//! # Linux Debugging Implementation
//!
//! Linux-specific backend built on `ptrace(2)`.
//!
//! Unlike macOS, Linux debugging is centred on a single system call and the
//! process tree: the debugger becomes the *tracer* of every thread of the
//! target and learns about events through `waitpid(2)`.
//!
//! - **ptrace**: attach, resume, single-step, registers (`nix::sys::ptrace`)
//! - **waitpid**: stop and exit notifications (`nix::sys::wait`)
//! - **/proc**: memory, memory map, thread list and auxiliary vector
//!
//! ## Permissions
//!
//! Attaching to a process that is not a child of the debugger is subject to
//! Yama's `ptrace_scope`. With `ptrace_scope = 1` (the common default) only
//! descendants can be traced unless the debugger has `CAP_SYS_PTRACE`.
//!
//! ## References
//!
//! - [ptrace(2) man page](https://man7.org/linux/man-pages/man2/ptrace.2.html)
//! - [Yama LSM](https://www.kernel.org/doc/html/latest/admin-guide/LSM/Yama.html)

pub mod procfs;
pub mod ptrace;
pub mod registers;

pub use ptrace::{LinuxBackend, PtraceInterrupt};
