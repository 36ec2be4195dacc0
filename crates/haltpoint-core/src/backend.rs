//! # Backend Adapter
//!
//! The per-platform primitive operations the engine is built on.
//!
//! A backend owns the OS handles of exactly one target and knows nothing about
//! breakpoints or stop classification: it reports *raw* stop events and the
//! [`ExecutionController`](crate::execution::ExecutionController) turns them
//! into [`DebugStopReason`](crate::types::DebugStopReason)s.
//!
//! ## Implementations
//!
//! - **Linux**: `ptrace` + `waitpid` ([`crate::platform::linux`])
//! - **macOS**: Mach task/thread ports + exception ports ([`crate::platform::macos`])
//! - **Windows**: the Win32 debug event loop ([`crate::platform::windows`])
//!
//! ## Threading
//!
//! Backends are `Send` but not `Sync`. They are driven from a single debug
//! worker thread, because ptrace and the Win32 debug API bind the debuggee
//! to the thread that created it. The only operations that may come from
//! another thread go through the [`TargetInterrupt`] handle.

use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::types::{Address, Architecture, ExitStatus, MemoryRegion, ProcessId, RegisterFile, ThreadId};

/// Why a trap was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapCause
{
    /// A software breakpoint instruction executed.
    Breakpoint,
    /// The hardware single-step trap fired.
    SingleStep,
    /// A trap the OS did not qualify further.
    Unknown,
}

/// Fault class reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind
{
    /// Invalid memory access.
    AccessViolation,
    /// Undefined or privileged instruction.
    IllegalInstruction,
    /// Arithmetic error such as divide by zero.
    Arithmetic,
}

/// What the OS reported, before classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawStop
{
    /// The process terminated.
    Exited(ExitStatus),
    /// A debug trap.
    Trap(TrapCause),
    /// A hardware fault.
    Fault(FaultKind),
    /// A signal or exception code with no dedicated class.
    Signal(i32),
    /// The stop requested through [`TargetInterrupt::interrupt`].
    Interrupted,
    /// Anything else.
    Unknown,
}

/// A raw stop event and the thread it was reported on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawStopEvent
{
    /// Reporting thread, when the OS names one.
    pub thread: Option<ThreadId>,
    /// What happened.
    pub kind: RawStop,
}

impl RawStopEvent
{
    /// Event on a known thread.
    #[must_use]
    pub const fn on(thread: ThreadId, kind: RawStop) -> Self
    {
        Self {
            thread: Some(thread),
            kind,
        }
    }

    /// Process-wide event (exit, for instance).
    #[must_use]
    pub const fn process(kind: RawStop) -> Self
    {
        Self { thread: None, kind }
    }
}

/// Cross-thread handle used to stop a running target.
///
/// This is the only part of a backend that may be used while the worker is
/// blocked in [`DebugBackend::wait_for_stop`].
pub trait TargetInterrupt: Send + Sync
{
    /// Ask the running target to stop. The blocked wait then reports
    /// [`RawStop::Interrupted`].
    ///
    /// Returns `false` when no run is outstanding or the request was already
    /// made.
    fn interrupt(&self) -> bool;

    /// Kill the target. The blocked wait then reports [`RawStop::Exited`].
    fn terminate(&self) -> bool;
}

/// Platform primitives for one target process.
pub trait DebugBackend: Send
{
    /// Create `program` with `args`, stopped before any user code runs.
    ///
    /// ## Errors
    ///
    /// Fails if the program does not exist or the OS refuses to create it.
    fn launch(&mut self, program: &Path, args: &[String]) -> Result<ProcessId>;

    /// Take control of a running process and stop all of its threads.
    ///
    /// ## Errors
    ///
    /// [`DebuggerError::ProcessNotFound`](crate::DebuggerError::ProcessNotFound) or
    /// [`DebuggerError::PermissionDenied`](crate::DebuggerError::PermissionDenied)
    /// for the usual cases.
    fn attach(&mut self, pid: ProcessId) -> Result<()>;

    /// Release the target and let it run freely.
    fn detach(&mut self) -> Result<()>;

    /// Kill the target and reap it.
    fn kill(&mut self) -> Result<()>;

    /// Resume all threads.
    fn resume(&mut self) -> Result<()>;

    /// Execute exactly one instruction on `thread`, leaving the others stopped.
    fn single_step(&mut self, thread: ThreadId) -> Result<()>;

    /// Block until the target stops or exits.
    ///
    /// On return every thread of the target is stopped.
    fn wait_for_stop(&mut self) -> Result<RawStopEvent>;

    /// Read exactly `len` bytes at `address`.
    ///
    /// Short reads are errors.
    fn read_memory(&self, address: Address, len: usize) -> Result<Vec<u8>>;

    /// Write all of `data` at `address`, including into read-only code pages.
    fn write_memory(&mut self, address: Address, data: &[u8]) -> Result<()>;

    /// Current memory map.
    fn memory_regions(&self) -> Result<Vec<MemoryRegion>>;

    /// General-purpose registers of `thread`.
    fn read_registers(&self, thread: ThreadId) -> Result<RegisterFile>;

    /// Replace the general-purpose registers of `thread`.
    fn write_registers(&mut self, thread: ThreadId, registers: &RegisterFile) -> Result<()>;

    /// Live threads, process leader first.
    fn threads(&self) -> Result<Vec<ThreadId>>;

    /// Architecture of the target.
    fn architecture(&self) -> Architecture;

    /// Process id of the current target.
    fn process_id(&self) -> Option<ProcessId>;

    /// Entry point of the main executable as mapped at runtime, if the OS reports it.
    fn runtime_entry_point(&self) -> Option<Address>
    {
        None
    }

    /// Cross-thread interrupt handle for the current target.
    fn interrupter(&self) -> Option<Arc<dyn TargetInterrupt>>;
}

/// Arming state shared between a backend and its [`TargetInterrupt`].
///
/// The gate closes the race between a `pause()` from another thread and the
/// worker deciding why the target stopped:
///
/// - the backend [`arm`](Self::arm)s it right before resuming all threads
/// - [`request`](Self::request) sends the OS interrupt only while armed, and
///   records that it did so while still holding the lock
/// - the backend reads [`is_requested`](Self::is_requested) when it sees an
///   interrupt-shaped stop, and [`disarm`](Self::disarm)s once it reports
///
/// Everything happens under one mutex, so a stop caused by the interrupt is
/// always observed together with `requested == true`, and an interrupt that
/// arrives after the run already ended is recognisable as stale.
#[derive(Debug, Default)]
pub struct InterruptGate
{
    state: Mutex<GateState>,
}

#[derive(Debug, Default)]
struct GateState
{
    armed: bool,
    requested: bool,
}

impl InterruptGate
{
    /// New, disarmed gate.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// A run is starting; interrupts may be delivered.
    pub fn arm(&self)
    {
        if let Ok(mut state) = self.state.lock() {
            state.armed = true;
            state.requested = false;
        }
    }

    /// The run ended. Returns whether an interrupt was requested during it.
    pub fn disarm(&self) -> bool
    {
        self.state.lock().is_ok_and(|mut state| {
            state.armed = false;
            std::mem::take(&mut state.requested)
        })
    }

    /// Deliver an interrupt with `send` if a run is armed and no request is
    /// outstanding. `send` returns whether the OS accepted the request.
    pub fn request<F>(&self, send: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        if !state.armed || state.requested {
            return false;
        }
        if send() {
            state.requested = true;
            true
        } else {
            false
        }
    }

    /// Whether an interrupt was delivered for the current run.
    #[must_use]
    pub fn is_requested(&self) -> bool
    {
        self.state.lock().is_ok_and(|state| state.requested)
    }

    /// Whether a run is armed.
    #[must_use]
    pub fn is_armed(&self) -> bool
    {
        self.state.lock().is_ok_and(|state| state.armed)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_request_requires_armed_gate()
    {
        let gate = InterruptGate::new();
        let mut sent = 0;
        assert!(!gate.request(|| {
            sent += 1;
            true
        }));
        assert_eq!(sent, 0);
        assert!(!gate.is_requested());
    }

    #[test]
    fn test_request_is_delivered_once()
    {
        let gate = InterruptGate::new();
        gate.arm();
        assert!(gate.request(|| true));
        assert!(!gate.request(|| true));
        assert!(gate.is_requested());
        assert!(gate.disarm());
        assert!(!gate.is_requested());
        assert!(!gate.is_armed());
    }

    #[test]
    fn test_failed_send_is_not_recorded()
    {
        let gate = InterruptGate::new();
        gate.arm();
        assert!(!gate.request(|| false));
        assert!(!gate.disarm());
    }

    #[test]
    fn test_arm_clears_stale_request()
    {
        let gate = InterruptGate::new();
        gate.arm();
        assert!(gate.request(|| true));
        gate.arm();
        assert!(!gate.is_requested());
    }
}
