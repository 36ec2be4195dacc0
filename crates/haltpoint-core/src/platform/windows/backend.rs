//! # Win32 Debug Backend
//!
//! [`DebugBackend`] on the Win32 debug event loop.
//!
//! A stopped target is a target with one *outstanding* debug event: the
//! event is answered with `ContinueDebugEvent()` on the next resume, single
//! step or detach. Faults are answered with `DBG_EXCEPTION_NOT_HANDLED`, so
//! the target's own handlers (or the default crash behaviour) see them.
//!
//! `DebugBreakProcess()` pauses the target by starting a thread at
//! `ntdll!DbgUiRemoteBreakin`. The breakpoint of such a thread is reported
//! as [`RawStop::Interrupted`] when a pause was requested, and silently
//! continued when the request was already answered by another stop.
//!
//! On x86-64 the instruction pointer after `EXCEPTION_BREAKPOINT` is one past
//! the `int3`, like on the other platforms.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::iter;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::{debug, trace, warn};
use windows_sys::Win32::Foundation::{
    CloseHandle, DBG_CONTINUE, DBG_EXCEPTION_NOT_HANDLED, ERROR_ACCESS_DENIED, ERROR_INVALID_PARAMETER,
    EXCEPTION_ACCESS_VIOLATION, EXCEPTION_BREAKPOINT, EXCEPTION_FLT_DIVIDE_BY_ZERO, EXCEPTION_ILLEGAL_INSTRUCTION,
    EXCEPTION_IN_PAGE_ERROR, EXCEPTION_INT_DIVIDE_BY_ZERO, EXCEPTION_INT_OVERFLOW, EXCEPTION_PRIV_INSTRUCTION,
    EXCEPTION_SINGLE_STEP, EXCEPTION_STACK_OVERFLOW, GetLastError, HANDLE, NTSTATUS,
};
use windows_sys::Win32::System::Diagnostics::Debug::{
    CREATE_PROCESS_DEBUG_EVENT, CREATE_THREAD_DEBUG_EVENT, ContinueDebugEvent, DEBUG_EVENT, DebugActiveProcess,
    DebugActiveProcessStop, DebugBreakProcess, DebugSetProcessKillOnExit, EXCEPTION_DEBUG_EVENT,
    EXIT_PROCESS_DEBUG_EVENT, EXIT_THREAD_DEBUG_EVENT, LOAD_DLL_DEBUG_EVENT, WaitForDebugEvent,
};
use windows_sys::Win32::System::LibraryLoader::{GetModuleHandleA, GetProcAddress};
use windows_sys::Win32::System::Threading::{
    CreateProcessW, DEBUG_ONLY_THIS_PROCESS, INFINITE, OpenProcess, PROCESS_ALL_ACCESS, PROCESS_INFORMATION,
    ResumeThread, STARTUPINFOW, SuspendThread, TerminateProcess,
};

use super::{last_error, memory, registers};
use crate::backend::{DebugBackend, FaultKind, InterruptGate, RawStop, RawStopEvent, TargetInterrupt, TrapCause};
use crate::config::DebuggerSettings;
use crate::error::{DebuggerError, Result};
use crate::types::{Address, Architecture, ExitStatus, MemoryRegion, ProcessId, RegisterFile, ThreadId};

/// Exit code given to a target ended by [`DebugBackend::kill`].
const KILLED_EXIT_CODE: u32 = 1;

/// Start address of the threads `DebugBreakProcess()` injects. ntdll is
/// mapped at the same address in every process of a boot session.
static REMOTE_BREAKIN: Lazy<Option<u64>> = Lazy::new(|| {
    // SAFETY: both names are NUL-terminated and ntdll is always loaded.
    unsafe {
        let ntdll = GetModuleHandleA(b"ntdll.dll\0".as_ptr());
        if ntdll == 0 {
            return None;
        }
        GetProcAddress(ntdll, b"DbgUiRemoteBreakin\0".as_ptr()).map(|entry| entry as usize as u64)
    }
});

/// [`TargetInterrupt`] holding its own handle to the target process.
#[derive(Debug)]
pub struct WindowsInterrupt
{
    process: HANDLE,
    gate: Arc<InterruptGate>,
}

impl WindowsInterrupt
{
    fn open(pid: u32, gate: Arc<InterruptGate>) -> Result<Self>
    {
        // SAFETY: plain call; the handle is closed on drop.
        let process = unsafe { OpenProcess(PROCESS_ALL_ACCESS, 0, pid) };
        if process == 0 {
            return Err(last_error("OpenProcess"));
        }
        Ok(Self { process, gate })
    }
}

impl TargetInterrupt for WindowsInterrupt
{
    fn interrupt(&self) -> bool
    {
        // SAFETY: the handle stays open for the lifetime of self.
        self.gate.request(|| unsafe { DebugBreakProcess(self.process) } != 0)
    }

    fn terminate(&self) -> bool
    {
        // SAFETY: the handle stays open for the lifetime of self.
        unsafe { TerminateProcess(self.process, KILLED_EXIT_CODE) != 0 }
    }
}

impl Drop for WindowsInterrupt
{
    fn drop(&mut self)
    {
        // SAFETY: closes the handle opened in `open`.
        unsafe {
            CloseHandle(self.process);
        }
    }
}

/// Windows implementation of [`DebugBackend`].
#[derive(Debug)]
pub struct WindowsBackend
{
    settings: DebuggerSettings,
    pid: Option<u32>,
    /// Handle from `CREATE_PROCESS_DEBUG_EVENT`; owned by the system.
    process: HANDLE,
    launched: bool,
    /// Live threads with their event handles, main thread first.
    threads: Vec<(u32, HANDLE)>,
    /// Outstanding debug event and the status it will be continued with.
    pending: Option<(u32, NTSTATUS)>,
    stepping: Option<u32>,
    /// Threads held with `SuspendThread()` during a single step.
    parked: Vec<HANDLE>,
    /// Threads started by `DebugBreakProcess()`.
    break_in: HashSet<u32>,
    entry: Option<Address>,
    gate: Arc<InterruptGate>,
    interrupter: Option<Arc<WindowsInterrupt>>,
}

impl WindowsBackend
{
    /// Backend with no target.
    #[must_use]
    pub fn new(settings: DebuggerSettings) -> Self
    {
        Self {
            settings,
            pid: None,
            process: 0,
            launched: false,
            threads: Vec::new(),
            pending: None,
            stepping: None,
            parked: Vec::new(),
            break_in: HashSet::new(),
            entry: None,
            gate: Arc::new(InterruptGate::new()),
            interrupter: None,
        }
    }

    fn pid(&self) -> Result<u32>
    {
        self.pid.ok_or(DebuggerError::NotAttached)
    }

    fn thread(&self, thread: ThreadId) -> Result<HANDLE>
    {
        self.threads
            .iter()
            .find(|(tid, _)| u64::from(*tid) == thread.raw())
            .map(|(_, handle)| *handle)
            .ok_or(DebuggerError::UnknownThread(thread))
    }

    fn leader_event(&self, kind: RawStop) -> RawStopEvent
    {
        match self.threads.first() {
            Some((tid, _)) => RawStopEvent::on(ThreadId(u64::from(*tid)), kind),
            None => RawStopEvent::process(kind),
        }
    }

    fn next_event() -> Result<DEBUG_EVENT>
    {
        // SAFETY: DEBUG_EVENT is plain data.
        let mut event: DEBUG_EVENT = unsafe { std::mem::zeroed() };
        // SAFETY: event is a live local.
        if unsafe { WaitForDebugEvent(&mut event, INFINITE) } == 0 {
            return Err(last_error("WaitForDebugEvent"));
        }
        Ok(event)
    }

    fn continue_event(pid: u32, tid: u32, status: NTSTATUS) -> Result<()>
    {
        // SAFETY: plain call with integers.
        if unsafe { ContinueDebugEvent(pid, tid, status) } == 0 {
            return Err(last_error("ContinueDebugEvent"));
        }
        Ok(())
    }

    /// Answer the outstanding event, if any.
    fn release(&mut self) -> Result<()>
    {
        let pid = self.pid()?;
        if let Some((tid, status)) = self.pending.take() {
            Self::continue_event(pid, tid, status)?;
        }
        Ok(())
    }

    fn close_file(file: HANDLE)
    {
        if file != 0 {
            // SAFETY: the debugger owns the file handles of debug events.
            unsafe {
                CloseHandle(file);
            }
        }
    }

    /// Bookkeeping shared by every event kind that carries no stop.
    fn track(&mut self, event: &DEBUG_EVENT) -> Option<ExitStatus>
    {
        let tid = event.dwThreadId;
        match event.dwDebugEventCode {
            CREATE_PROCESS_DEBUG_EVENT => {
                // SAFETY: the union member matches the event code.
                let info = unsafe { event.u.CreateProcessInfo };
                Self::close_file(info.hFile);
                self.process = info.hProcess;
                self.threads.insert(0, (tid, info.hThread));
                self.entry = info.lpStartAddress.map(|start| Address::new(start as usize as u64));
            }
            CREATE_THREAD_DEBUG_EVENT => {
                // SAFETY: the union member matches the event code.
                let info = unsafe { event.u.CreateThread };
                let start = info.lpStartAddress.map(|start| start as usize as u64);
                if start.is_some() && start == *REMOTE_BREAKIN {
                    self.break_in.insert(tid);
                }
                self.threads.push((tid, info.hThread));
            }
            EXIT_THREAD_DEBUG_EVENT => {
                self.threads.retain(|(thread, _)| *thread != tid);
                self.break_in.remove(&tid);
            }
            EXIT_PROCESS_DEBUG_EVENT => {
                // SAFETY: the union member matches the event code.
                let code = unsafe { event.u.ExitProcess.dwExitCode };
                return Some(ExitStatus::Code(code));
            }
            LOAD_DLL_DEBUG_EVENT => {
                // SAFETY: the union member matches the event code.
                Self::close_file(unsafe { event.u.LoadDll.hFile });
            }
            _ => {}
        }
        None
    }

    /// Run the event loop up to the first breakpoint: the loader breakpoint
    /// after a launch, the break-in after an attach.
    fn initial_stop(&mut self, pid: u32) -> Result<()>
    {
        loop {
            let event = Self::next_event()?;
            trace!(code = event.dwDebugEventCode, tid = event.dwThreadId, "Initial debug event");
            if event.dwDebugEventCode == EXCEPTION_DEBUG_EVENT {
                // SAFETY: the union member matches the event code.
                let record = unsafe { event.u.Exception.ExceptionRecord };
                if record.ExceptionCode == EXCEPTION_BREAKPOINT {
                    self.pending = Some((event.dwThreadId, DBG_CONTINUE));
                    return Ok(());
                }
                Self::continue_event(pid, event.dwThreadId, DBG_EXCEPTION_NOT_HANDLED)?;
                continue;
            }
            if let Some(status) = self.track(&event) {
                let _ = Self::continue_event(pid, event.dwThreadId, DBG_CONTINUE);
                return Err(DebuggerError::LaunchFailed(format!("process exited during startup ({status})")));
            }
            Self::continue_event(pid, event.dwThreadId, DBG_CONTINUE)?;
        }
    }

    /// Common setup once the initial stop was reached.
    fn take_target(&mut self, pid: u32, launched: bool) -> Result<()>
    {
        self.pid = Some(pid);
        self.launched = launched;
        if let Err(err) = self.initial_stop(pid) {
            self.forget_target();
            return Err(err);
        }
        self.gate = Arc::new(InterruptGate::new());
        self.interrupter = match WindowsInterrupt::open(pid, Arc::clone(&self.gate)) {
            Ok(handle) => Some(Arc::new(handle)),
            Err(err) => {
                warn!(pid, error = %err, "Pause will not be available");
                None
            }
        };
        Ok(())
    }

    fn forget_target(&mut self)
    {
        self.gate.disarm();
        self.pid = None;
        self.process = 0;
        self.threads.clear();
        self.pending = None;
        self.stepping = None;
        self.parked.clear();
        self.break_in.clear();
        self.entry = None;
        self.interrupter = None;
    }

    fn finish_step(&mut self)
    {
        if let Some(tid) = self.stepping.take() {
            if let Ok(handle) = self.thread(ThreadId(u64::from(tid))) {
                if let Err(err) = registers::set_single_step(handle, false) {
                    trace!(tid, error = %err, "Could not clear trap flag");
                }
            }
        }
        for handle in self.parked.drain(..) {
            // SAFETY: balances SuspendThread from single_step.
            unsafe {
                ResumeThread(handle);
            }
        }
    }

    fn classify(&self, tid: u32, code: NTSTATUS) -> Option<RawStop>
    {
        let kind = match code {
            EXCEPTION_BREAKPOINT => RawStop::Trap(TrapCause::Breakpoint),
            EXCEPTION_SINGLE_STEP if self.stepping == Some(tid) => RawStop::Trap(TrapCause::SingleStep),
            EXCEPTION_SINGLE_STEP => RawStop::Trap(TrapCause::Unknown),
            EXCEPTION_ACCESS_VIOLATION | EXCEPTION_IN_PAGE_ERROR | EXCEPTION_STACK_OVERFLOW => {
                RawStop::Fault(FaultKind::AccessViolation)
            }
            EXCEPTION_ILLEGAL_INSTRUCTION | EXCEPTION_PRIV_INSTRUCTION => RawStop::Fault(FaultKind::IllegalInstruction),
            EXCEPTION_INT_DIVIDE_BY_ZERO | EXCEPTION_INT_OVERFLOW | EXCEPTION_FLT_DIVIDE_BY_ZERO => {
                RawStop::Fault(FaultKind::Arithmetic)
            }
            _ => return None,
        };
        Some(kind)
    }
}

/// Append `arg` to a command line, quoted the way `CommandLineToArgvW()`
/// splits it.
fn push_argument(line: &mut String, arg: &str)
{
    if !line.is_empty() {
        line.push(' ');
    }
    if !arg.is_empty() && !arg.contains([' ', '\t', '\n', '"']) {
        line.push_str(arg);
        return;
    }
    line.push('"');
    let mut backslashes = 0usize;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                line.extend(iter::repeat('\\').take(backslashes * 2 + 1));
                line.push('"');
                backslashes = 0;
            }
            _ => {
                line.extend(iter::repeat('\\').take(backslashes));
                line.push(c);
                backslashes = 0;
            }
        }
    }
    line.extend(iter::repeat('\\').take(backslashes * 2));
    line.push('"');
}

fn command_line(program: &Path, args: &[String]) -> String
{
    let mut line = String::new();
    push_argument(&mut line, &program.to_string_lossy());
    for arg in args {
        push_argument(&mut line, arg);
    }
    line
}

fn wide(text: &OsStr) -> Vec<u16>
{
    text.encode_wide().chain(iter::once(0)).collect()
}

impl DebugBackend for WindowsBackend
{
    fn launch(&mut self, program: &Path, args: &[String]) -> Result<ProcessId>
    {
        if self.pid.is_some() {
            return Err(DebuggerError::LaunchFailed("a target is already attached".into()));
        }
        if !program.is_file() {
            return Err(DebuggerError::LaunchFailed(format!("{} is not a file", program.display())));
        }
        if self.settings.disable_aslr {
            debug!("ASLR cannot be disabled per process on Windows; launching with the image defaults");
        }

        let application = wide(program.as_os_str());
        let mut line = wide(OsStr::new(&command_line(program, args)));
        // SAFETY: both structures are plain data.
        let mut startup: STARTUPINFOW = unsafe { std::mem::zeroed() };
        startup.cb = std::mem::size_of::<STARTUPINFOW>() as u32;
        // SAFETY: see above.
        let mut info: PROCESS_INFORMATION = unsafe { std::mem::zeroed() };

        // SAFETY: every pointer refers to a live, NUL-terminated local.
        let created = unsafe {
            CreateProcessW(
                application.as_ptr(),
                line.as_mut_ptr(),
                std::ptr::null(),
                std::ptr::null(),
                0,
                DEBUG_ONLY_THIS_PROCESS,
                std::ptr::null(),
                std::ptr::null(),
                &startup,
                &mut info,
            )
        };
        if created == 0 {
            // SAFETY: GetLastError has no preconditions.
            let code = unsafe { GetLastError() };
            return Err(DebuggerError::LaunchFailed(format!(
                "CreateProcessW {} failed with Win32 error {code}",
                program.display()
            )));
        }
        // The debug events carry their own handles.
        // SAFETY: both handles were returned by CreateProcessW.
        unsafe {
            CloseHandle(info.hThread);
            CloseHandle(info.hProcess);
        }

        let pid = info.dwProcessId;
        self.take_target(pid, true)?;
        debug!(pid, entry = ?self.entry, "Launched");
        Ok(ProcessId(pid))
    }

    fn attach(&mut self, pid: ProcessId) -> Result<()>
    {
        if self.pid.is_some() {
            return Err(DebuggerError::AttachFailed("a target is already attached".into()));
        }
        // SAFETY: plain call with an integer.
        if unsafe { DebugActiveProcess(pid.raw()) } == 0 {
            // SAFETY: GetLastError has no preconditions.
            return Err(match unsafe { GetLastError() } {
                ERROR_INVALID_PARAMETER => DebuggerError::ProcessNotFound(pid.raw()),
                ERROR_ACCESS_DENIED => {
                    DebuggerError::PermissionDenied(format!("DebugActiveProcess({pid}) was refused; try an elevated prompt"))
                }
                code => DebuggerError::Win32 {
                    operation: "DebugActiveProcess",
                    code,
                },
            });
        }
        // Ending the session must not take the target with it.
        // SAFETY: plain call.
        unsafe {
            DebugSetProcessKillOnExit(0);
        }
        self.take_target(pid.raw(), false)?;
        debug!(pid = pid.raw(), threads = self.threads.len(), "Attached");
        Ok(())
    }

    fn detach(&mut self) -> Result<()>
    {
        let pid = self.pid()?;
        self.finish_step();
        let released = self.release();
        // SAFETY: plain call with an integer.
        let stopped = unsafe { DebugActiveProcessStop(pid) } != 0;
        let result = if stopped { released } else { Err(last_error("DebugActiveProcessStop")) };
        debug!(pid, "Detached");
        self.forget_target();
        result
    }

    fn kill(&mut self) -> Result<()>
    {
        let pid = self.pid()?;
        // SAFETY: the process handle stays valid until EXIT_PROCESS is continued.
        if unsafe { TerminateProcess(self.process, KILLED_EXIT_CODE) } == 0 {
            return Err(last_error("TerminateProcess"));
        }
        self.finish_step();
        self.release()?;
        loop {
            let event = Self::next_event()?;
            let exited = self.track(&event);
            Self::continue_event(pid, event.dwThreadId, DBG_CONTINUE)?;
            if let Some(status) = exited {
                debug!(pid, %status, "Killed");
                break;
            }
        }
        self.forget_target();
        Ok(())
    }

    fn resume(&mut self) -> Result<()>
    {
        self.pid()?;
        self.gate.arm();
        if let Err(err) = self.release() {
            self.gate.disarm();
            return Err(DebuggerError::ResumeFailed(err.to_string()));
        }
        Ok(())
    }

    fn single_step(&mut self, thread: ThreadId) -> Result<()>
    {
        let handle = self.thread(thread)?;
        registers::set_single_step(handle, true)?;
        for &(tid, other) in &self.threads {
            // SAFETY: thread handles from debug events carry THREAD_SUSPEND_RESUME.
            if u64::from(tid) != thread.raw() && unsafe { SuspendThread(other) } != u32::MAX {
                self.parked.push(other);
            }
        }
        self.stepping = u32::try_from(thread.raw()).ok();
        if let Err(err) = self.release() {
            self.finish_step();
            return Err(DebuggerError::ResumeFailed(err.to_string()));
        }
        Ok(())
    }

    fn wait_for_stop(&mut self) -> Result<RawStopEvent>
    {
        let pid = self.pid()?;
        loop {
            let event = Self::next_event()?;
            let tid = event.dwThreadId;

            if event.dwDebugEventCode == EXCEPTION_DEBUG_EVENT {
                // SAFETY: the union member matches the event code.
                let info = unsafe { event.u.Exception };
                let code = info.ExceptionRecord.ExceptionCode;
                trace!(tid, code = format_args!("{:#x}", code), first_chance = info.dwFirstChance, "Exception");

                if code == EXCEPTION_BREAKPOINT && self.break_in.contains(&tid) {
                    if self.gate.disarm() {
                        self.pending = Some((tid, DBG_CONTINUE));
                        self.finish_step();
                        return Ok(self.leader_event(RawStop::Interrupted));
                    }
                    // Pause already answered by an earlier stop.
                    Self::continue_event(pid, tid, DBG_CONTINUE)?;
                    continue;
                }

                let kind = match self.classify(tid, code) {
                    Some(kind) => kind,
                    // Exceptions the target raises and handles itself.
                    None if info.dwFirstChance != 0 => {
                        Self::continue_event(pid, tid, DBG_EXCEPTION_NOT_HANDLED)?;
                        continue;
                    }
                    None => RawStop::Unknown,
                };
                let status = if matches!(kind, RawStop::Trap(_)) { DBG_CONTINUE } else { DBG_EXCEPTION_NOT_HANDLED };
                self.gate.disarm();
                self.pending = Some((tid, status));
                self.finish_step();
                return Ok(RawStopEvent::on(ThreadId(u64::from(tid)), kind));
            }

            let stepping_exited = event.dwDebugEventCode == EXIT_THREAD_DEBUG_EVENT && self.stepping == Some(tid);
            if let Some(status) = self.track(&event) {
                let _ = Self::continue_event(pid, tid, DBG_CONTINUE);
                debug!(pid, %status, "Target exited");
                self.parked.clear();
                self.forget_target();
                return Ok(RawStopEvent::process(RawStop::Exited(status)));
            }
            if stepping_exited {
                self.pending = Some((tid, DBG_CONTINUE));
                self.stepping = None;
                self.finish_step();
                return Ok(self.leader_event(RawStop::Unknown));
            }
            Self::continue_event(pid, tid, DBG_CONTINUE)?;
        }
    }

    fn read_memory(&self, address: Address, len: usize) -> Result<Vec<u8>>
    {
        self.pid()?;
        memory::read_memory(self.process, address, len)
    }

    fn write_memory(&mut self, address: Address, data: &[u8]) -> Result<()>
    {
        self.pid()?;
        memory::write_memory(self.process, address, data)
    }

    fn memory_regions(&self) -> Result<Vec<MemoryRegion>>
    {
        self.pid()?;
        memory::memory_regions(self.process)
    }

    fn read_registers(&self, thread: ThreadId) -> Result<RegisterFile>
    {
        registers::read_registers(self.thread(thread)?)
    }

    fn write_registers(&mut self, thread: ThreadId, file: &RegisterFile) -> Result<()>
    {
        registers::write_registers(self.thread(thread)?, file)
    }

    fn threads(&self) -> Result<Vec<ThreadId>>
    {
        self.pid()?;
        Ok(self.threads.iter().map(|(tid, _)| ThreadId(u64::from(*tid))).collect())
    }

    fn architecture(&self) -> Architecture
    {
        registers::ARCHITECTURE
    }

    fn process_id(&self) -> Option<ProcessId>
    {
        self.pid.map(ProcessId)
    }

    fn runtime_entry_point(&self) -> Option<Address>
    {
        self.entry
    }

    fn interrupter(&self) -> Option<Arc<dyn TargetInterrupt>>
    {
        let handle: Arc<dyn TargetInterrupt> = self.interrupter.clone()?;
        Some(handle)
    }
}

impl Drop for WindowsBackend
{
    fn drop(&mut self)
    {
        if let Some(pid) = self.pid {
            if self.launched {
                let _ = self.kill();
            } else {
                let _ = self.detach();
            }
            trace!(pid, "Backend dropped with a live target");
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_command_line_quoting()
    {
        let args = vec!["plain".to_string(), "with space".to_string(), "quote\"d".to_string(), String::new()];
        assert_eq!(
            command_line(Path::new(r"C:\bin\app.exe"), &args),
            r#"C:\bin\app.exe plain "with space" "quote\"d" """#
        );
    }

    #[test]
    fn test_trailing_backslashes_are_doubled_inside_quotes()
    {
        let mut line = String::new();
        push_argument(&mut line, r"C:\Program Files\");
        assert_eq!(line, r#""C:\Program Files\\""#);
    }

    #[test]
    fn test_remote_breakin_is_resolved()
    {
        assert!(REMOTE_BREAKIN.is_some());
    }

    #[test]
    fn test_attach_to_missing_process()
    {
        let mut backend = WindowsBackend::new(DebuggerSettings::default());
        assert!(backend.attach(ProcessId(u32::MAX - 3)).is_err());
        assert!(backend.process_id().is_none());
    }
}
