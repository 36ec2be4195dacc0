//! # Execution Controller
//!
//! Drives one target through a [`DebugBackend`]: lifecycle, run and step
//! requests, the stop-event wait, classification of raw stops, and the
//! register/memory/thread views that are only valid between two stops.
//!
//! The controller is single-threaded. It lives on the session's debug worker
//! (see [`crate::worker`]) and publishes a [`SessionStatus`] snapshot that the
//! façade can read without waiting for the worker.
//!
//! ## Stop classification
//!
//! A raw stop becomes exactly one [`DebugStopReason`]:
//!
//! 1. process terminated → `ProcessExited`, exit status kept as delivered
//! 2. trap at an enabled breakpoint → `Breakpoint` (the program counter is
//!    rewound onto the breakpoint address)
//! 3. the engine's own single-step → `SingleStep`, unless it landed on an
//!    enabled breakpoint, which reports `Breakpoint`
//! 4. fault class → `AccessViolation` / `IllegalInstruction` / `Calculation`
//!
//! Traps from breakpoint instructions compiled into the target are reported
//! as `Breakpoint` with the program counter left where the OS put it.

use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info, instrument, warn};

use crate::backend::{DebugBackend, FaultKind, RawStop, RawStopEvent, TargetInterrupt, TrapCause};
use crate::breakpoints::{BreakpointInfo, BreakpointTable};
use crate::config::DebuggerSettings;
use crate::error::{DebuggerError, Result};
use crate::events::{DebuggerEvent, EventBus};
use crate::image::TargetImage;
use crate::types::{
    Address, Architecture, DebugRegister, DebugStopReason, DebugThread, ExitStatus, MemoryRegion, ProcessId,
    SessionOrigin, SessionState, ThreadId,
};

/// Snapshot of a session that can be read while a run is outstanding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus
{
    pub state: SessionState,
    pub origin: Option<SessionOrigin>,
    pub pid: Option<ProcessId>,
    pub exit_status: Option<ExitStatus>,
    pub last_stop: Option<DebugStopReason>,
    pub architecture: Architecture,
    pub command_line: String,
}

/// State shared between the worker-owned controller and the façade.
pub(crate) struct SessionShared
{
    pub status: RwLock<SessionStatus>,
    pub interrupter: RwLock<Option<Arc<dyn TargetInterrupt>>>,
    pub events: EventBus,
    pub run_gate: RunGate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum RunPhase
{
    #[default]
    Idle,
    /// `go()` was issued but the target has not been resumed yet.
    Starting
    {
        paused: bool,
    },
    /// The backend resumed the target; pauses go to its interrupter.
    Resumed,
}

/// Hands `pause()` requests to an outstanding `go()` whatever stage it is in.
///
/// The backend's own gate only accepts interrupts once the target is
/// resumed. Between `go()` being issued and that point (queued on the
/// worker, stepping off a breakpoint) a pause is latched here instead, and
/// the run reports it without resuming. The phase changes and the resume
/// happen under one mutex, so a pause lands either in the latch or on a
/// resumed target.
#[derive(Debug, Default)]
pub(crate) struct RunGate
{
    phase: Mutex<RunPhase>,
}

impl RunGate
{
    /// A `go()` was issued.
    pub fn begin(&self)
    {
        if let Ok(mut phase) = self.phase.lock() {
            *phase = RunPhase::Starting { paused: false };
        }
    }

    /// The `go()` returned.
    pub fn finish(&self)
    {
        if let Ok(mut phase) = self.phase.lock() {
            *phase = RunPhase::Idle;
        }
    }

    /// Run `resume` unless a pause was latched. `Ok(false)` means the run was
    /// paused before the target moved.
    pub fn resume_with<F>(&self, resume: F) -> Result<bool>
    where
        F: FnOnce() -> Result<()>,
    {
        let Ok(mut phase) = self.phase.lock() else {
            return resume().map(|()| true);
        };
        if *phase == (RunPhase::Starting { paused: true }) {
            *phase = RunPhase::Idle;
            return Ok(false);
        }
        *phase = RunPhase::Resumed;
        resume().map(|()| true)
    }

    /// Pause the outstanding run. `false` when nothing is running or the
    /// target had already stopped.
    pub fn pause(&self, interrupter: Option<Arc<dyn TargetInterrupt>>) -> bool
    {
        let Ok(mut phase) = self.phase.lock() else {
            return false;
        };
        match *phase {
            RunPhase::Idle => false,
            RunPhase::Starting { .. } => {
                *phase = RunPhase::Starting { paused: true };
                true
            }
            RunPhase::Resumed => interrupter.is_some_and(|interrupter| interrupter.interrupt()),
        }
    }
}

impl SessionStatus
{
    fn new(architecture: Architecture) -> Self
    {
        Self {
            state: SessionState::Created,
            origin: None,
            pid: None,
            exit_status: None,
            last_stop: None,
            architecture,
            command_line: String::new(),
        }
    }
}

impl SessionShared
{
    pub fn new(architecture: Architecture) -> Self
    {
        Self {
            status: RwLock::new(SessionStatus::new(architecture)),
            interrupter: RwLock::new(None),
            events: EventBus::default(),
            run_gate: RunGate::default(),
        }
    }

    pub fn status(&self) -> Option<SessionStatus>
    {
        self.status.read().ok().map(|status| status.clone())
    }

    pub fn interrupter(&self) -> Option<Arc<dyn TargetInterrupt>>
    {
        self.interrupter.read().ok().and_then(|slot| slot.clone())
    }
}

/// Orchestrates one target on the debug worker.
pub struct ExecutionController
{
    backend: Box<dyn DebugBackend>,
    image: Arc<dyn TargetImage>,
    settings: DebuggerSettings,
    breakpoints: BreakpointTable,
    status: SessionStatus,
    active_thread: Option<ThreadId>,
    runtime_entry: Option<Address>,
    shared: Arc<SessionShared>,
}

impl ExecutionController
{
    pub(crate) fn new(
        backend: Box<dyn DebugBackend>,
        image: Arc<dyn TargetImage>,
        settings: DebuggerSettings,
        shared: Arc<SessionShared>,
    ) -> Self
    {
        let status = shared.status().unwrap_or_else(|| SessionStatus::new(image.architecture()));
        Self {
            backend,
            image,
            settings,
            breakpoints: BreakpointTable::new(),
            status,
            active_thread: None,
            runtime_entry: None,
            shared,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState
    {
        self.status.state
    }

    #[must_use]
    pub fn status(&self) -> &SessionStatus
    {
        &self.status
    }

    fn set_state(&mut self, state: SessionState)
    {
        self.status.state = state;
        self.publish_status();
    }

    fn publish_status(&self)
    {
        if let Ok(mut shared) = self.shared.status.write() {
            *shared = self.status.clone();
        }
    }

    fn emit(&self, event: DebuggerEvent)
    {
        self.shared.events.publish(&event);
    }

    fn set_interrupter(&self, interrupter: Option<Arc<dyn TargetInterrupt>>)
    {
        if let Ok(mut slot) = self.shared.interrupter.write() {
            *slot = interrupter;
        }
    }

    pub fn set_command_line(&mut self, command_line: &str)
    {
        command_line.clone_into(&mut self.status.command_line);
        self.publish_status();
    }

    /// Entry point of the target as mapped at runtime, or the image's.
    #[must_use]
    pub fn entry_point(&self) -> Address
    {
        self.runtime_entry.unwrap_or_else(|| self.image.entry_point())
    }

    fn begin_target(&mut self, operation: &'static str) -> Result<()>
    {
        if !self.status.state.accepts_new_target() {
            return Err(DebuggerError::invalid_state(operation, self.status.state));
        }
        self.breakpoints.forget_all();
        self.active_thread = None;
        self.runtime_entry = None;
        self.status.pid = None;
        self.status.origin = None;
        self.status.exit_status = None;
        self.status.last_stop = None;
        Ok(())
    }

    fn backend_supports_image(&self) -> bool
    {
        let image = self.image.architecture();
        let backend = self.backend.architecture();
        if image != backend {
            warn!(%image, %backend, "Image architecture is not supported by this backend");
            return false;
        }
        true
    }

    fn take_control(&mut self, pid: ProcessId, origin: SessionOrigin)
    {
        self.status.pid = Some(pid);
        self.status.origin = Some(origin);
        self.status.architecture = self.backend.architecture();
        self.runtime_entry = self.backend.runtime_entry_point();
        self.active_thread = self.backend.threads().ok().and_then(|threads| threads.first().copied());
        self.set_interrupter(self.backend.interrupter());
        self.set_state(SessionState::Stopped);
    }

    /// Create the target from the image and the current command line.
    ///
    /// The command line is split with POSIX shell quoting rules. Returns
    /// `Ok(false)` when the OS could not create the process, the command line
    /// has unbalanced quotes, or the image was built for another architecture
    /// than the backend debugs.
    ///
    /// ## Errors
    ///
    /// [`DebuggerError::InvalidState`] when a target is already under control
    /// or the session was destroyed.
    #[instrument(skip(self), fields(program = %self.image.path().display()))]
    pub fn launch(&mut self) -> Result<bool>
    {
        self.begin_target("launch")?;
        if !self.backend_supports_image() {
            self.publish_status();
            return Ok(false);
        }
        let args = match shell_words::split(&self.status.command_line) {
            Ok(args) => args,
            Err(err) => {
                warn!(error = %err, command_line = %self.status.command_line, "Malformed command line");
                self.publish_status();
                return Ok(false);
            }
        };

        let pid = match self.backend.launch(self.image.path(), &args) {
            Ok(pid) => pid,
            Err(err) => {
                warn!(error = %err, "Launch failed");
                self.publish_status();
                return Ok(false);
            }
        };
        self.take_control(pid, SessionOrigin::Launched);
        info!(%pid, entry = %self.entry_point(), "Target launched");
        self.emit(DebuggerEvent::Launched { pid });

        if self.settings.stop_at_entry_point {
            let entry = self.entry_point();
            if self.breakpoints.add(self.backend.as_mut(), entry).is_some() {
                self.emit(DebuggerEvent::BreakpointAdded { address: entry });
            } else {
                warn!(%entry, "Could not install entry point breakpoint");
            }
        }
        Ok(true)
    }

    /// Take control of a running process.
    ///
    /// Returns `Ok(false)` when the process does not exist, attach is denied,
    /// or the image architecture differs from the backend's.
    #[instrument(skip(self))]
    pub fn attach(&mut self, pid: ProcessId) -> Result<bool>
    {
        self.begin_target("attach")?;
        if !self.backend_supports_image() {
            self.publish_status();
            return Ok(false);
        }
        if let Err(err) = self.backend.attach(pid) {
            warn!(error = %err, "Attach failed");
            self.publish_status();
            return Ok(false);
        }
        self.take_control(pid, SessionOrigin::Attached);
        info!(%pid, "Attached to target");
        self.emit(DebuggerEvent::Attached { pid });
        Ok(true)
    }

    /// Release the target and leave it running without breakpoints.
    pub fn detach(&mut self) -> Result<()>
    {
        self.require_stopped("detach")?;
        self.breakpoints.remove_all(self.backend.as_mut());
        self.backend.detach()?;
        self.release(SessionState::Detached);
        info!("Detached from target");
        self.emit(DebuggerEvent::Detached);
        Ok(())
    }

    fn release(&mut self, state: SessionState)
    {
        self.breakpoints.forget_all();
        self.active_thread = None;
        self.set_interrupter(None);
        self.set_state(state);
    }

    /// Stop controlling the target: launched targets are killed, attached
    /// ones are detached (or killed when `detach_on_quit` is off).
    ///
    /// Calling it without a live target does nothing.
    pub fn quit(&mut self) -> Result<()>
    {
        if self.status.state != SessionState::Stopped {
            return Ok(());
        }
        if self.status.origin == Some(SessionOrigin::Attached) && self.settings.detach_on_quit {
            return self.detach();
        }

        self.breakpoints.remove_all(self.backend.as_mut());
        if let Err(err) = self.backend.kill() {
            warn!(error = %err, "Failed to kill target");
        }
        self.release(SessionState::Exited);
        info!("Target terminated");
        Ok(())
    }

    /// `quit()` and release every controller resource. Further lifecycle
    /// commands are rejected.
    pub fn destroy(&mut self) -> Result<()>
    {
        if self.status.state == SessionState::Destroyed {
            return Ok(());
        }
        let result = self.quit();
        self.release(SessionState::Destroyed);
        result
    }

    /// `quit()` followed by `launch()` with the same command line.
    pub fn restart(&mut self) -> Result<bool>
    {
        self.quit()?;
        self.launch()
    }

    fn require_stopped(&self, operation: &'static str) -> Result<()>
    {
        match self.status.state {
            SessionState::Stopped => Ok(()),
            state => Err(DebuggerError::invalid_state(operation, state)),
        }
    }

    fn require_query(&self) -> Result<()>
    {
        match self.status.state {
            SessionState::Stopped => Ok(()),
            SessionState::Running => Err(DebuggerError::NotStopped),
            _ => Err(DebuggerError::NotAttached),
        }
    }

    fn current_thread(&self) -> Result<ThreadId>
    {
        if let Some(thread) = self.active_thread {
            return Ok(thread);
        }
        self.backend.threads()?.first().copied().ok_or(DebuggerError::NotAttached)
    }

    /// Resume all threads until the next stop.
    #[instrument(skip(self))]
    pub fn go(&mut self) -> Result<DebugStopReason>
    {
        self.require_stopped("go")?;
        let thread = self.current_thread()?;
        self.set_state(SessionState::Running);
        self.emit(DebuggerEvent::TargetResumed);

        let outcome = self.run(thread);
        self.settle(outcome)
    }

    fn run(&mut self, thread: ThreadId) -> Result<RawStopEvent>
    {
        if let Some(event) = self.step_off_breakpoint(thread)? {
            return Ok(event);
        }
        let shared = Arc::clone(&self.shared);
        let backend = &mut self.backend;
        if !shared.run_gate.resume_with(|| backend.resume())? {
            debug!(%thread, "Paused before the target was resumed");
            return Ok(RawStopEvent::on(thread, RawStop::Interrupted));
        }
        self.backend.wait_for_stop()
    }

    /// Execute one instruction on the active thread.
    #[instrument(skip(self))]
    pub fn step_into(&mut self) -> Result<DebugStopReason>
    {
        self.require_stopped("step")?;
        let thread = self.current_thread()?;
        self.set_state(SessionState::Running);

        let outcome = self.step(thread);
        self.settle(outcome)
    }

    fn step(&mut self, thread: ThreadId) -> Result<RawStopEvent>
    {
        let pc = Address::new(self.backend.read_registers(thread)?.instruction_pointer());
        let lifted = self.breakpoints.is_enabled_at(pc) && self.breakpoints.lift(self.backend.as_mut(), pc)?;

        let result = self.backend.single_step(thread).and_then(|()| self.backend.wait_for_stop());

        if lifted && !matches!(result, Ok(RawStopEvent { kind: RawStop::Exited(_), .. })) {
            self.breakpoints.restore(self.backend.as_mut(), pc)?;
        }
        result
    }

    /// Step the thread off an enabled breakpoint at its program counter.
    ///
    /// Returns the event when the step itself ended in something other than a
    /// plain single-step (exit, fault, another trap).
    fn step_off_breakpoint(&mut self, thread: ThreadId) -> Result<Option<RawStopEvent>>
    {
        let pc = Address::new(self.backend.read_registers(thread)?.instruction_pointer());
        if !self.breakpoints.is_enabled_at(pc) {
            return Ok(None);
        }
        debug!(%pc, %thread, "Stepping off breakpoint");
        let event = self.step(thread)?;
        match event.kind {
            RawStop::Trap(TrapCause::SingleStep) => Ok(None),
            _ => Ok(Some(event)),
        }
    }

    /// Turn the outcome of a run into a stop reason and a consistent state.
    fn settle(&mut self, outcome: Result<RawStopEvent>) -> Result<DebugStopReason>
    {
        match outcome {
            Ok(event) => self.classify(event),
            Err(err) => {
                warn!(error = %err, "Run failed");
                if self.backend.process_id().is_some() {
                    self.set_state(SessionState::Stopped);
                } else {
                    self.release(SessionState::Exited);
                }
                Err(err)
            }
        }
    }

    fn classify(&mut self, event: RawStopEvent) -> Result<DebugStopReason>
    {
        if let RawStop::Exited(status) = event.kind {
            info!(%status, "Target exited");
            self.status.exit_status = Some(status);
            self.status.last_stop = Some(DebugStopReason::ProcessExited);
            self.release(SessionState::Exited);
            self.emit(DebuggerEvent::TargetExited { status });
            return Ok(DebugStopReason::ProcessExited);
        }

        if let Some(thread) = event.thread {
            self.active_thread = Some(thread);
        }
        let thread = self.current_thread()?;

        let reason = match event.kind {
            RawStop::Trap(TrapCause::Breakpoint) => {
                self.breakpoint_trap(thread)?;
                DebugStopReason::Breakpoint
            }
            RawStop::Trap(TrapCause::SingleStep) => {
                let pc = Address::new(self.backend.read_registers(thread)?.instruction_pointer());
                if self.breakpoints.is_enabled_at(pc) {
                    self.breakpoints.record_hit(pc);
                    DebugStopReason::Breakpoint
                } else {
                    DebugStopReason::SingleStep
                }
            }
            RawStop::Trap(TrapCause::Unknown) => DebugStopReason::Unknown,
            RawStop::Fault(FaultKind::AccessViolation) => DebugStopReason::AccessViolation,
            RawStop::Fault(FaultKind::IllegalInstruction) => DebugStopReason::IllegalInstruction,
            RawStop::Fault(FaultKind::Arithmetic) => DebugStopReason::Calculation,
            RawStop::Signal(signal) => DebugStopReason::SignalReceived(signal),
            RawStop::Interrupted => DebugStopReason::UserRequestedBreak,
            RawStop::Unknown | RawStop::Exited(_) => DebugStopReason::Unknown,
        };

        debug!(%thread, %reason, "Target stopped");
        self.status.last_stop = Some(reason);
        self.set_state(SessionState::Stopped);
        self.emit(DebuggerEvent::TargetStopped {
            reason,
            thread: Some(thread),
        });
        Ok(reason)
    }

    /// Rewind the program counter onto our breakpoint, if it is one.
    fn breakpoint_trap(&mut self, thread: ThreadId) -> Result<()>
    {
        let mut registers = self.backend.read_registers(thread)?;
        let pc = registers.instruction_pointer();
        let offset = registers.architecture().breakpoint_pc_offset();
        let Some(site) = Address::new(pc).checked_sub(offset) else {
            return Ok(());
        };
        if !self.breakpoints.is_enabled_at(site) {
            debug!(pc = %Address::new(pc), "Trap not owned by a breakpoint");
            return Ok(());
        }
        if offset != 0 {
            registers.set_instruction_pointer(site.value());
            self.backend.write_registers(thread, &registers)?;
        }
        self.breakpoints.record_hit(site);
        Ok(())
    }

    /// Install a breakpoint. Address zero and unmapped addresses are ignored.
    pub fn add_breakpoint(&mut self, address: Address) -> Result<bool>
    {
        if address.is_null() {
            return Ok(false);
        }
        self.require_query()?;
        let existed = self.breakpoints.contains(address);
        let added = self.breakpoints.add(self.backend.as_mut(), address).is_some();
        if added && !existed {
            self.emit(DebuggerEvent::BreakpointAdded { address });
        }
        Ok(added)
    }

    /// Remove a breakpoint. Unknown addresses are ignored.
    pub fn delete_breakpoint(&mut self, address: Address) -> Result<bool>
    {
        if address.is_null() {
            return Ok(false);
        }
        self.require_query()?;
        let removed = self.breakpoints.remove(self.backend.as_mut(), address);
        if removed {
            self.emit(DebuggerEvent::BreakpointRemoved { address });
        }
        Ok(removed)
    }

    /// Keep the breakpoint at `address` listed but take its trap out of memory.
    pub fn disable_breakpoint(&mut self, address: Address) -> Result<bool>
    {
        self.require_query()?;
        self.breakpoints.disable(self.backend.as_mut(), address)
    }

    pub fn enable_breakpoint(&mut self, address: Address) -> Result<bool>
    {
        self.require_query()?;
        self.breakpoints.enable(self.backend.as_mut(), address)
    }

    #[must_use]
    pub fn breakpoints(&self) -> Vec<BreakpointInfo>
    {
        self.breakpoints.list()
    }

    #[must_use]
    pub fn has_breakpoint(&self, address: Address) -> bool
    {
        self.breakpoints.contains(address)
    }

    /// Value of register `name` on `thread`.
    pub fn thread_register(&self, thread: ThreadId, name: &str) -> Result<u64>
    {
        self.require_query()?;
        let registers = self.backend.read_registers(thread)?;
        registers.get(name).ok_or_else(|| DebuggerError::UnknownRegister {
            name: name.to_string(),
            architecture: registers.architecture(),
        })
    }

    /// Set register `name` on `thread`, truncated to register width.
    pub fn set_thread_register(&mut self, thread: ThreadId, name: &str, value: u64) -> Result<()>
    {
        self.require_query()?;
        let mut registers = self.backend.read_registers(thread)?;
        if registers.set(name, value).is_none() {
            return Err(DebuggerError::UnknownRegister {
                name: name.to_string(),
                architecture: registers.architecture(),
            });
        }
        self.backend.write_registers(thread, &registers)
    }

    pub fn get_reg_value(&self, name: &str) -> Result<u64>
    {
        self.require_query()?;
        self.thread_register(self.current_thread()?, name)
    }

    pub fn set_reg_value(&mut self, name: &str, value: u64) -> Result<()>
    {
        self.require_query()?;
        let thread = self.current_thread()?;
        self.set_thread_register(thread, name, value)
    }

    /// Every register of the active thread, in canonical order.
    pub fn registers(&self) -> Result<Vec<DebugRegister>>
    {
        self.require_query()?;
        let registers = self.backend.read_registers(self.current_thread()?)?;
        Ok(registers.iter().collect())
    }

    pub fn instruction_pointer(&self) -> Result<u64>
    {
        self.require_query()?;
        Ok(self.backend.read_registers(self.current_thread()?)?.instruction_pointer())
    }

    /// Live threads as of now. Threads that exit while being enumerated are
    /// skipped.
    pub fn threads(&self) -> Result<Vec<DebugThread>>
    {
        self.require_query()?;
        let threads = self
            .backend
            .threads()?
            .into_iter()
            .filter_map(|tid| {
                self.backend
                    .read_registers(tid)
                    .ok()
                    .map(|registers| DebugThread::new(tid, registers.instruction_pointer()))
            })
            .collect();
        Ok(threads)
    }

    pub fn active_thread(&self) -> Result<DebugThread>
    {
        self.require_query()?;
        let tid = self.current_thread()?;
        let registers = self.backend.read_registers(tid)?;
        Ok(DebugThread::new(tid, registers.instruction_pointer()))
    }

    /// Focus register and step operations on `tid`. Returns `false` when no
    /// such thread is alive.
    pub fn set_active_thread(&mut self, tid: ThreadId) -> Result<bool>
    {
        self.require_query()?;
        if !self.backend.threads()?.contains(&tid) {
            return Ok(false);
        }
        self.active_thread = Some(tid);
        Ok(true)
    }

    /// Read `len` bytes. Empty when stopped is false, the range is invalid, or
    /// any byte is unmapped.
    #[must_use]
    pub fn read_memory(&self, address: Address, len: usize) -> Vec<u8>
    {
        if self.status.state != SessionState::Stopped || len == 0 || address.range_end(len).is_none() {
            return Vec::new();
        }
        match self.backend.read_memory(address, len) {
            Ok(mut bytes) => {
                self.breakpoints.mask_read(address, &mut bytes);
                bytes
            }
            Err(err) => {
                debug!(%address, len, error = %err, "Memory read failed");
                Vec::new()
            }
        }
    }

    /// Write `data` at `address`. Nothing is written unless the whole range
    /// is mapped.
    pub fn write_memory(&mut self, address: Address, data: &[u8]) -> bool
    {
        if self.status.state != SessionState::Stopped || address.is_null() || address.range_end(data.len()).is_none()
        {
            return false;
        }
        if data.is_empty() {
            return true;
        }
        let previous = self.read_memory(address, data.len());
        if previous.len() != data.len() {
            debug!(%address, len = data.len(), "Refusing write to unmapped memory");
            return false;
        }

        let patched = self.breakpoints.patch_write(address, data);
        match self.backend.write_memory(address, &patched) {
            Ok(()) => true,
            Err(err) => {
                self.breakpoints.patch_write(address, &previous);
                debug!(%address, len = data.len(), error = %err, "Memory write failed");
                false
            }
        }
    }

    pub fn memory_regions(&self) -> Result<Vec<MemoryRegion>>
    {
        self.require_query()?;
        self.backend.memory_regions()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::testing::{FixedImage, PID, ScriptedBackend};

    const ENTRY: u64 = 0x40_1000;
    const TID: u64 = PID as u64;

    fn code() -> Vec<u8>
    {
        vec![0x90, 0xE8, 0x05, 0x00, 0x00, 0x00, 0x90, 0xC3, 0x90, 0x90, 0x90, 0x90, 0xC3]
    }

    fn controller_with(backend: ScriptedBackend, settings: DebuggerSettings) -> ExecutionController
    {
        let shared = Arc::new(SessionShared::new(Architecture::X86_64));
        ExecutionController::new(
            Box::new(backend),
            Arc::new(FixedImage::new(ENTRY, Architecture::X86_64)),
            settings,
            shared,
        )
    }

    fn launched(configure: impl FnOnce(&mut ScriptedBackend)) -> ExecutionController
    {
        let mut backend = ScriptedBackend::new(Architecture::X86_64);
        backend.map(ENTRY, &code());
        backend.add_thread(TID, 0x7f00_0000);
        configure(&mut backend);
        let mut controller = controller_with(backend, DebuggerSettings::default());
        assert!(controller.launch().unwrap());
        controller
    }

    #[test]
    fn test_launch_installs_entry_breakpoint()
    {
        let controller = launched(|_| {});
        assert_eq!(controller.state(), SessionState::Stopped);
        assert!(controller.has_breakpoint(Address::new(ENTRY)));
        assert_eq!(controller.read_memory(Address::new(ENTRY), 2), vec![0x90, 0xE8]);
    }

    #[test]
    fn test_breakpoint_hit_rewinds_pc()
    {
        let mut controller = launched(|backend| {
            backend.script(TID, RawStop::Trap(TrapCause::Breakpoint), Some(ENTRY + 1));
        });
        assert_eq!(controller.go().unwrap(), DebugStopReason::Breakpoint);
        assert_eq!(controller.instruction_pointer().unwrap(), ENTRY);
        assert_eq!(controller.breakpoints()[0].hit_count, 1);
    }

    #[test]
    fn test_foreign_trap_keeps_pc()
    {
        let mut controller = launched(|backend| {
            backend.script(TID, RawStop::Trap(TrapCause::Breakpoint), Some(ENTRY + 9));
        });
        assert_eq!(controller.go().unwrap(), DebugStopReason::Breakpoint);
        assert_eq!(controller.instruction_pointer().unwrap(), ENTRY + 9);
    }

    #[test]
    fn test_step_off_breakpoint_before_resume()
    {
        let mut controller = launched(|backend| {
            backend.script(TID, RawStop::Trap(TrapCause::Breakpoint), Some(ENTRY + 1));
            backend.script(TID, RawStop::Trap(TrapCause::SingleStep), Some(ENTRY + 1));
            backend.script(TID, RawStop::Exited(ExitStatus::Code(0)), None);
        });
        assert_eq!(controller.go().unwrap(), DebugStopReason::Breakpoint);
        assert_eq!(controller.go().unwrap(), DebugStopReason::ProcessExited);
        assert_eq!(controller.state(), SessionState::Exited);
        assert_eq!(controller.status().exit_status, Some(ExitStatus::Code(0)));
        assert!(controller.breakpoints().is_empty());
    }

    #[test]
    fn test_step_into_reports_single_step()
    {
        let mut controller = launched(|backend| {
            backend.script(TID, RawStop::Trap(TrapCause::Breakpoint), Some(ENTRY + 1));
            backend.script(TID, RawStop::Trap(TrapCause::SingleStep), Some(ENTRY + 1));
            backend.script(TID, RawStop::Trap(TrapCause::SingleStep), Some(ENTRY + 6));
        });
        controller.go().unwrap();
        assert_eq!(controller.step_into().unwrap(), DebugStopReason::SingleStep);
        assert_eq!(controller.instruction_pointer().unwrap(), ENTRY + 1);
        assert_eq!(controller.read_memory(Address::new(ENTRY), 1), vec![0x90]);
        assert_eq!(controller.step_into().unwrap(), DebugStopReason::SingleStep);
        assert_eq!(controller.instruction_pointer().unwrap(), ENTRY + 6);
    }

    #[test]
    fn test_step_onto_breakpoint_reports_breakpoint()
    {
        let mut controller = launched(|backend| {
            backend.script(TID, RawStop::Trap(TrapCause::SingleStep), Some(ENTRY + 6));
        });
        controller.add_breakpoint(Address::new(ENTRY + 6)).unwrap();
        assert_eq!(controller.step_into().unwrap(), DebugStopReason::Breakpoint);
    }

    #[test]
    fn test_fault_classification()
    {
        let mut controller = launched(|backend| {
            backend.script(TID, RawStop::Fault(FaultKind::AccessViolation), None);
            backend.script(TID, RawStop::Fault(FaultKind::IllegalInstruction), None);
            backend.script(TID, RawStop::Fault(FaultKind::Arithmetic), None);
            backend.script(TID, RawStop::Signal(10), None);
            backend.script(TID, RawStop::Interrupted, None);
        });
        assert_eq!(controller.go().unwrap(), DebugStopReason::AccessViolation);
        assert_eq!(controller.go().unwrap(), DebugStopReason::IllegalInstruction);
        assert_eq!(controller.go().unwrap(), DebugStopReason::Calculation);
        assert_eq!(controller.go().unwrap(), DebugStopReason::SignalReceived(10));
        assert_eq!(controller.go().unwrap(), DebugStopReason::UserRequestedBreak);
        assert!(controller.status().last_stop.is_some_and(|reason| !reason.is_exit()));
    }

    #[test]
    fn test_double_launch_is_misuse()
    {
        let mut controller = launched(|_| {});
        let err = controller.launch().unwrap_err();
        assert!(matches!(err, DebuggerError::InvalidState { operation: "launch", .. }));
    }

    #[test]
    fn test_launch_failure_returns_false()
    {
        let mut backend = ScriptedBackend::new(Architecture::X86_64);
        backend.fail_launch = true;
        let mut controller = controller_with(backend, DebuggerSettings::default());
        assert!(!controller.launch().unwrap());
        assert_eq!(controller.state(), SessionState::Created);
    }

    #[test]
    fn test_null_breakpoint_is_noop()
    {
        let mut controller = launched(|_| {});
        assert!(!controller.add_breakpoint(Address::ZERO).unwrap());
        assert!(!controller.delete_breakpoint(Address::ZERO).unwrap());
        assert_eq!(controller.breakpoints().len(), 1);
    }

    #[test]
    fn test_memory_boundaries()
    {
        let mut controller = launched(|_| {});
        assert!(controller.read_memory(Address::ZERO, 256).is_empty());
        assert!(!controller.write_memory(Address::ZERO, &[1, 2, 3]));
        assert!(!controller.write_memory(Address::new(ENTRY + 12), &[1, 2]));

        let original = controller.read_memory(Address::new(ENTRY), 4);
        assert!(controller.write_memory(Address::new(ENTRY), &[0xAA, 0xBB, 0xCC, 0xDD]));
        assert_eq!(controller.read_memory(Address::new(ENTRY), 4), vec![0xAA, 0xBB, 0xCC, 0xDD]);
        assert!(controller.write_memory(Address::new(ENTRY), &original));
        assert_eq!(controller.read_memory(Address::new(ENTRY), 4), original);
    }

    #[test]
    fn test_register_round_trip_and_unknown_name()
    {
        let mut controller = launched(|_| {});
        let before = controller.get_reg_value("rax").unwrap();
        controller.set_reg_value("rax", 0xAAAA_AAAA_DEAD_BEEF).unwrap();
        assert_eq!(controller.get_reg_value("rax").unwrap(), 0xAAAA_AAAA_DEAD_BEEF);
        controller.set_reg_value("rax", before).unwrap();
        assert_eq!(controller.get_reg_value("rax").unwrap(), before);

        let err = controller.get_reg_value("eax").unwrap_err();
        assert!(matches!(err, DebuggerError::UnknownRegister { .. }));
    }

    #[test]
    fn test_queries_require_target()
    {
        let controller = controller_with(ScriptedBackend::new(Architecture::X86_64), DebuggerSettings::default());
        assert!(matches!(controller.get_reg_value("rax"), Err(DebuggerError::NotAttached)));
        assert!(controller.read_memory(Address::new(ENTRY), 1).is_empty());
    }

    #[test]
    fn test_quit_kills_launched_target()
    {
        let mut controller = launched(|_| {});
        controller.quit().unwrap();
        assert_eq!(controller.state(), SessionState::Exited);
        controller.quit().unwrap();
        controller.destroy().unwrap();
        controller.destroy().unwrap();
        assert_eq!(controller.state(), SessionState::Destroyed);
        assert!(controller.launch().is_err());
    }

    #[test]
    fn test_quit_detaches_attached_target()
    {
        let mut backend = ScriptedBackend::new(Architecture::X86_64);
        backend.map(ENTRY, &code());
        let calls = backend.calls.clone();
        let mut controller = controller_with(backend, DebuggerSettings::default());
        assert!(!controller.attach(ProcessId(1)).unwrap());
        assert!(controller.attach(ProcessId(PID)).unwrap());
        controller.add_breakpoint(Address::new(ENTRY)).unwrap();
        controller.quit().unwrap();
        assert_eq!(controller.state(), SessionState::Detached);
        assert!(calls.lock().unwrap().iter().any(|call| call == "detach"));
    }

    #[test]
    fn test_set_active_thread()
    {
        let mut controller = launched(|backend| backend.add_thread(TID + 1, 0x1234));
        assert!(controller.set_active_thread(ThreadId(TID + 1)).unwrap());
        assert_eq!(controller.instruction_pointer().unwrap(), 0x1234);
        assert!(!controller.set_active_thread(ThreadId(1)).unwrap());
        assert_eq!(controller.threads().unwrap().len(), 2);
    }

    #[test]
    fn test_stop_at_entry_can_be_disabled()
    {
        let mut backend = ScriptedBackend::new(Architecture::X86_64);
        backend.map(ENTRY, &code());
        let settings = DebuggerSettings {
            stop_at_entry_point: false,
            ..DebuggerSettings::default()
        };
        let mut controller = controller_with(backend, settings);
        assert!(controller.launch().unwrap());
        assert!(controller.breakpoints().is_empty());
    }

    #[test]
    fn test_pause_before_resume_is_latched()
    {
        let mut calls = None;
        let mut controller = launched(|backend| calls = Some(backend.calls.clone()));
        let calls = calls.unwrap();

        controller.shared.run_gate.begin();
        assert!(controller.shared.run_gate.pause(None));
        assert_eq!(controller.go().unwrap(), DebugStopReason::UserRequestedBreak);
        controller.shared.run_gate.finish();

        assert_eq!(controller.state(), SessionState::Stopped);
        assert!(!calls.lock().unwrap().iter().any(|call| call == "resume"));
    }

    #[test]
    fn test_pause_while_stepping_off_breakpoint()
    {
        let mut calls = None;
        let mut controller = launched(|backend| {
            calls = Some(backend.calls.clone());
            backend.script(TID, RawStop::Trap(TrapCause::SingleStep), Some(ENTRY + 1));
        });
        let calls = calls.unwrap();
        controller.set_reg_value("rip", ENTRY).unwrap();

        controller.shared.run_gate.begin();
        assert!(controller.shared.run_gate.pause(None));
        assert_eq!(controller.go().unwrap(), DebugStopReason::UserRequestedBreak);
        controller.shared.run_gate.finish();

        assert_eq!(controller.instruction_pointer().unwrap(), ENTRY + 1);
        let calls = calls.lock().unwrap();
        assert!(calls.iter().any(|call| call.starts_with("step")));
        assert!(!calls.iter().any(|call| call == "resume"));
    }

    #[test]
    fn test_pause_outside_run_is_refused()
    {
        let gate = RunGate::default();
        assert!(!gate.pause(None));
        gate.begin();
        gate.finish();
        assert!(!gate.pause(None));
        assert!(gate.resume_with(|| Ok(())).unwrap());
    }

    #[test]
    fn test_foreign_architecture_is_refused()
    {
        let backend = ScriptedBackend::new(Architecture::X86_64);
        let calls = backend.calls.clone();
        let mut controller = ExecutionController::new(
            Box::new(backend),
            Arc::new(FixedImage::new(ENTRY, Architecture::X86)),
            DebuggerSettings::default(),
            Arc::new(SessionShared::new(Architecture::X86)),
        );

        assert!(!controller.launch().unwrap());
        assert!(!controller.attach(ProcessId(PID)).unwrap());
        assert_eq!(controller.state(), SessionState::Created);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_command_line_keeps_quoted_arguments()
    {
        let backend = ScriptedBackend::new(Architecture::X86_64);
        let calls = backend.calls.clone();
        let mut controller = controller_with(backend, DebuggerSettings::default());
        controller.set_command_line(r#"--name "two words" 'x y' plain"#);

        assert!(controller.launch().unwrap());
        let calls = calls.lock().unwrap();
        assert!(calls[0].ends_with(r#"["--name", "two words", "x y", "plain"]"#), "{}", calls[0]);
    }

    #[test]
    fn test_unbalanced_quote_fails_launch()
    {
        let backend = ScriptedBackend::new(Architecture::X86_64);
        let calls = backend.calls.clone();
        let mut controller = controller_with(backend, DebuggerSettings::default());
        controller.set_command_line("\"unterminated");

        assert!(!controller.launch().unwrap());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_disabled_breakpoint_is_not_hit()
    {
        let mut controller = launched(|backend| {
            backend.script(TID, RawStop::Trap(TrapCause::Breakpoint), Some(ENTRY + 1));
        });
        let entry = Address::new(ENTRY);
        assert!(controller.disable_breakpoint(entry).unwrap());
        assert!(!controller.disable_breakpoint(Address::new(ENTRY + 2)).unwrap());
        assert!(!controller.breakpoints()[0].enabled);

        // The trap now belongs to the target, so the pc is not rewound.
        assert_eq!(controller.go().unwrap(), DebugStopReason::Breakpoint);
        assert_eq!(controller.instruction_pointer().unwrap(), ENTRY + 1);
        assert_eq!(controller.breakpoints()[0].hit_count, 0);

        assert!(controller.enable_breakpoint(entry).unwrap());
        assert!(controller.breakpoints()[0].enabled);
    }
}
