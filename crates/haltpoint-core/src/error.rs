//! # Error Types
//!
//! Error handling for the execution-control engine.
//!
//! We use `thiserror` to generate the `Error` implementations and messages.
//!
//! Not every failure becomes an `Err`. The session façade sorts failures into
//! four groups:
//!
//! 1. **Caller misuse** (double launch, unknown register name): returned as
//!    `Err(DebuggerError)`.
//! 2. **Environment failures** (the program does not exist, attach denied):
//!    logged and reported as `false` from `launch()`/`attach()`.
//! 3. **Invalid target addresses** (breakpoint at 0, read of unmapped memory):
//!    silent no-op or empty result.
//! 4. **Target faults** (segfault, divide error): a
//!    [`DebugStopReason`](crate::types::DebugStopReason), never an error.
//!
//! Backends still return the full error so the façade can log it.

use thiserror::Error;

use crate::types::{Address, Architecture, SessionState, ThreadId};

/// Main error type for debugger operations
#[derive(Error, Debug)]
pub enum DebuggerError
{
    /// The process with the given PID doesn't exist or has exited
    #[error("Process not found: PID {0}")]
    ProcessNotFound(u32),

    /// Insufficient permissions to debug the target process
    ///
    /// On Linux this usually means `ptrace_scope` or a different UID; on
    /// macOS `task_for_pid()` returned `KERN_PROTECTION_FAILURE` and the
    /// debugger needs `sudo` or the debugging entitlement.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid argument passed to a debugger function
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The OS refused to create the target process
    #[error("Failed to launch process: {0}")]
    LaunchFailed(String),

    /// Failed to attach to a process
    #[error("Failed to attach to process: {0}")]
    AttachFailed(String),

    /// Operation requires a target, but the session has none
    #[error("Not attached to a process")]
    NotAttached,

    /// Operation requires the target to be stopped
    ///
    /// Register and memory access is only meaningful between two stop
    /// events.
    #[error("Process must be stopped for this operation")]
    NotStopped,

    /// The command is not valid in the session's current lifecycle state
    #[error("Cannot {operation} while the session is {state}")]
    InvalidState
    {
        /// Command that was rejected
        operation: &'static str,
        /// State the session was in
        state: SessionState,
    },

    /// Register name is not part of the target architecture's register file
    #[error("Unknown register `{name}` for {architecture}")]
    UnknownRegister
    {
        /// Name as supplied by the caller
        name: String,
        /// Architecture of the target
        architecture: Architecture,
    },

    /// No live thread with this identifier
    #[error("No such thread: {0}")]
    UnknownThread(ThreadId),

    /// The backend cannot debug targets of this architecture
    #[error("Unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    /// Memory at the address could not be read or written in full
    #[error("Memory access failed at {address} ({len} bytes)")]
    MemoryAccess
    {
        /// First address of the access
        address: Address,
        /// Requested length
        len: usize,
    },

    /// Failed to stop the target
    #[error("Failed to suspend process: {0}")]
    SuspendFailed(String),

    /// Failed to resume the target
    #[error("Failed to resume process: {0}")]
    ResumeFailed(String),

    /// The session's debug worker thread is gone
    #[error("Debug session is closed")]
    SessionClosed,

    /// The target image could not be parsed
    #[error("Failed to parse image: {0}")]
    ImageParse(String),

    /// Linux `ptrace`/`waitpid` failure
    #[cfg(target_os = "linux")]
    #[error("ptrace error: {0}")]
    Ptrace(#[from] nix::errno::Errno),

    /// macOS-specific Mach API error
    #[cfg(target_os = "macos")]
    #[error("Mach API error: {0}")]
    MachError(#[from] crate::platform::macos::error::MachError),

    /// Win32 API failure, with the value of `GetLastError()`
    #[cfg(windows)]
    #[error("{operation} failed with Win32 error {code}")]
    Win32
    {
        /// API that failed
        operation: &'static str,
        /// `GetLastError()` value
        code: u32,
    },

    /// I/O error (`/proc` access, image files, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DebuggerError
{
    /// Shorthand for [`DebuggerError::InvalidState`].
    #[must_use]
    pub fn invalid_state(operation: &'static str, state: SessionState) -> Self
    {
        Self::InvalidState { operation, state }
    }

    /// Whether the error means the target is gone rather than a failed call.
    #[must_use]
    pub fn is_target_gone(&self) -> bool
    {
        match self {
            Self::ProcessNotFound(_) | Self::NotAttached | Self::SessionClosed => true,
            #[cfg(target_os = "linux")]
            Self::Ptrace(errno) => *errno == nix::errno::Errno::ESRCH,
            _ => false,
        }
    }
}

/// Convenience type alias for `Result<T, DebuggerError>`
///
/// ```rust
/// use haltpoint_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, DebuggerError>;
