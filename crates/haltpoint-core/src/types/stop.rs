//! Stop reasons, exit statuses and the session lifecycle.

use std::fmt;

/// Why the target stopped, as returned by `go()` and `step_into()`.
///
/// Exactly one value is produced per stop event. Target-induced faults are
/// reported here rather than as engine errors: a segfault in the debuggee is
/// a normal outcome the caller branches on.
///
/// ## Classification precedence
///
/// 1. the process terminated → [`ProcessExited`](Self::ProcessExited)
/// 2. the thread stopped on an enabled breakpoint → [`Breakpoint`](Self::Breakpoint)
/// 3. the engine's own single-step completed → [`SingleStep`](Self::SingleStep)
/// 4. otherwise the fault or signal class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugStopReason
{
    /// A software breakpoint trap (ours, or one hard-coded in the target).
    Breakpoint,
    /// One instruction was executed by `step_into()`.
    SingleStep,
    /// The target process terminated; see `exit_code()`.
    ProcessExited,
    /// Invalid memory access (`SIGSEGV`/`SIGBUS`, `EXC_BAD_ACCESS`, `STATUS_ACCESS_VIOLATION`).
    AccessViolation,
    /// Undefined or privileged instruction.
    IllegalInstruction,
    /// Arithmetic fault such as an integer divide by zero.
    Calculation,
    /// The run was interrupted by `pause()`.
    UserRequestedBreak,
    /// A signal (Unix) or exception code (Windows) with no dedicated variant.
    SignalReceived(i32),
    /// The OS reported a stop the engine could not classify.
    Unknown,
}

impl DebugStopReason
{
    /// Whether the stop ended the process.
    #[must_use]
    pub const fn is_exit(self) -> bool
    {
        matches!(self, Self::ProcessExited)
    }

    /// Whether the stop was caused by a fault in the target.
    #[must_use]
    pub const fn is_fault(self) -> bool
    {
        matches!(self, Self::AccessViolation | Self::IllegalInstruction | Self::Calculation)
    }
}

impl fmt::Display for DebugStopReason
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::Breakpoint => write!(f, "breakpoint"),
            Self::SingleStep => write!(f, "single step"),
            Self::ProcessExited => write!(f, "process exited"),
            Self::AccessViolation => write!(f, "access violation"),
            Self::IllegalInstruction => write!(f, "illegal instruction"),
            Self::Calculation => write!(f, "arithmetic exception"),
            Self::UserRequestedBreak => write!(f, "paused"),
            Self::SignalReceived(signal) => write!(f, "signal {signal}"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// How the target terminated.
///
/// The value is kept exactly as the OS delivered it. Unix wait statuses carry
/// only the low 8 bits of the exit code, so `exit(-11)` is seen as `245`;
/// Windows reports the full 32-bit `dwExitCode`, so the same call is seen as
/// `4294967285`. Neither form is normalised into the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitStatus
{
    /// Normal exit with the code as reported by the OS.
    Code(u32),
    /// Killed by a signal (Unix only).
    Signaled(i32),
}

impl ExitStatus
{
    /// Numeric exit code.
    ///
    /// For signal deaths this follows the shell convention of `128 + signal`.
    #[must_use]
    pub const fn code(self) -> u32
    {
        match self {
            Self::Code(code) => code,
            Self::Signaled(signal) => 128 + signal.unsigned_abs(),
        }
    }

    /// The low byte of the exit code, as a Unix wait status would show it.
    #[must_use]
    pub const fn low_byte(self) -> u8
    {
        (self.code() & 0xFF) as u8
    }
}

impl fmt::Display for ExitStatus
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::Code(code) => write!(f, "exit code {code}"),
            Self::Signaled(signal) => write!(f, "killed by signal {signal}"),
        }
    }
}

/// Lifecycle of a debugging session.
///
/// ```text
/// Created ──launch/attach──▶ Stopped ◀──stop── Running
///                              │  └──go/step──▶ ┘
///                              ├──exit/quit──▶ Exited ──launch──▶ Stopped
///                              ├──detach─────▶ Detached ──launch/attach──▶ Stopped
///                              └──destroy────▶ Destroyed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState
{
    /// No target yet.
    Created,
    /// The target is halted at a stop point; queries are valid.
    Stopped,
    /// A `go()` or `step_into()` is outstanding.
    Running,
    /// The target terminated (or was killed by `quit()`).
    Exited,
    /// The target was released and keeps running on its own.
    Detached,
    /// The session was destroyed; every further command is a misuse.
    Destroyed,
}

impl SessionState
{
    /// Whether a new target may be launched or attached in this state.
    #[must_use]
    pub const fn accepts_new_target(self) -> bool
    {
        matches!(self, Self::Created | Self::Exited | Self::Detached)
    }
}

impl fmt::Display for SessionState
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let label = match self {
            Self::Created => "created",
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Exited => "exited",
            Self::Detached => "detached",
            Self::Destroyed => "destroyed",
        };
        f.write_str(label)
    }
}

/// How the current target came under control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionOrigin
{
    /// Created by `launch()`; `quit()` kills it.
    Launched,
    /// Connected by `attach()`; `quit()` detaches by default.
    Attached,
}
