//! # Windows Backend
//!
//! Execution control on top of the Win32 debugging API:
//!
//! - `CreateProcessW(DEBUG_ONLY_THIS_PROCESS)` / `DebugActiveProcess()`:
//!   become the debugger of a process
//! - `WaitForDebugEvent()` / `ContinueDebugEvent()`: the event loop; every
//!   thread of the target is frozen while an event is outstanding
//! - `DebugBreakProcess()`: pause, by injecting a thread that executes a
//!   breakpoint
//! - `GetThreadContext()` / `SetThreadContext()`: registers and the trap flag
//!
//! Debug events are delivered to the thread that started debugging, which is
//! always the session worker thread.
//!
//! ## References
//!
//! - [Writing the Debugger's Main Loop](https://learn.microsoft.com/en-us/windows/win32/debug/writing-the-debugger-s-main-loop)
//! - [DEBUG_EVENT structure](https://learn.microsoft.com/en-us/windows/win32/api/minwinbase/ns-minwinbase-debug_event)

pub mod backend;
pub mod memory;
pub mod registers;

pub use backend::{WindowsBackend, WindowsInterrupt};

use windows_sys::Win32::Foundation::GetLastError;

use crate::error::DebuggerError;

/// [`DebuggerError::Win32`] carrying the calling thread's last error.
pub(crate) fn last_error(operation: &'static str) -> DebuggerError
{
    // SAFETY: GetLastError has no preconditions.
    let code = unsafe { GetLastError() };
    DebuggerError::Win32 { operation, code }
}
