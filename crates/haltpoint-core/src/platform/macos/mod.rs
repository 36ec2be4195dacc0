//! # macOS Backend
//!
//! Execution control on macOS, built on the Mach microkernel primitives:
//!
//! - **Mach tasks**: represent a process; suspended and resumed as a whole
//! - **Mach threads**: their state carries the registers and the trap flag
//! - **Exception ports**: breakpoints, steps and faults arrive as messages
//!
//! ## Key Mach APIs Used
//!
//! - `task_for_pid()`: get a port to a process (declared in [`ffi`], not in mach2)
//! - `task_suspend()` / `task_resume()`: all-stop control (from `mach2`)
//! - `task_set_exception_ports()` / `mach_msg()`: exception delivery (from `mach2`)
//! - `thread_get_state()` / `thread_set_state()`: registers (declared in [`ffi`])
//! - `mach_vm_read_overwrite()` / `vm_write()`: memory
//!
//! ## References
//!
//! - [Apple Mach Kernel Programming](https://developer.apple.com/library/archive/documentation/Darwin/Conceptual/KernelProgramming/Mach/Mach.html)
//! - [task_for_pid(3) man page](https://developer.apple.com/library/archive/documentation/Darwin/Reference/ManPages/man3/task_for_pid.3.html)

pub mod error;
pub mod exception;
pub mod ffi;
pub mod memory;
pub mod registers;
pub mod task;

pub use task::{MacOSBackend, MachInterrupt};
