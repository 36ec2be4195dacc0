//! # ptrace Backend
//!
//! [`DebugBackend`] on top of `ptrace(2)` and `waitpid(2)`.
//!
//! ## Stop model
//!
//! The backend keeps the target in *all-stop* mode: when one thread reports
//! an event, every other running thread is stopped with `tgkill(SIGSTOP)`
//! before [`wait_for_stop`](DebugBackend::wait_for_stop) returns. Threads are
//! followed through `PTRACE_O_TRACECLONE`.
//!
//! Signals are handled as follows:
//!
//! - signals in [`DebuggerSettings::pass_signals`] are re-injected at once
//!   and never produce a stop
//! - `SIGSTOP` is the interrupt: it is reported only when the
//!   [`InterruptGate`] recorded a request, otherwise it is a leftover of
//!   stop-all and is swallowed
//! - every other signal stops the target and is delivered on the next
//!   [`resume`](DebugBackend::resume)
//!
//! All `waitpid` calls use `__WALL | __WNOTHREAD`: tracees are children of
//! the tracer *thread*, so several sessions in one process never see each
//! other's events.
//!
//! ## References
//!
//! - [ptrace(2) man page](https://man7.org/linux/man-pages/man2/ptrace.2.html)
//! - [waitpid(2) man page](https://man7.org/linux/man-pages/man2/waitpid.2.html)

use std::collections::{HashMap, HashSet};
use std::ffi::{CString, c_char};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::personality::{self, Persona};
use nix::sys::ptrace::{self, Options};
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};
use tracing::{debug, trace, warn};

use super::procfs::{self, ProcessMemory};
use super::registers;
use crate::backend::{DebugBackend, FaultKind, InterruptGate, RawStop, RawStopEvent, TargetInterrupt, TrapCause};
use crate::config::DebuggerSettings;
use crate::error::{DebuggerError, Result};
use crate::types::{Address, Architecture, ExitStatus, MemoryRegion, ProcessId, RegisterFile, ThreadId};

// si_code values for SIGTRAP (asm-generic/siginfo.h)
const TRAP_BRKPT: i32 = 1;
const TRAP_TRACE: i32 = 2;
const SI_KERNEL: i32 = 0x80;

const EXEC_FAILED: i32 = 127;

// si_code of a software breakpoint instruction. x86-64 reports `int3` as
// SI_KERNEL and uses TRAP_BRKPT for a single-step over `syscall`.
#[cfg(target_arch = "x86_64")]
const BREAKPOINT_CODE: i32 = SI_KERNEL;
#[cfg(not(target_arch = "x86_64"))]
const BREAKPOINT_CODE: i32 = TRAP_BRKPT;

fn classify_trap(code: i32, stepping: bool) -> TrapCause
{
    if stepping {
        return if code == BREAKPOINT_CODE {
            TrapCause::Breakpoint
        } else {
            TrapCause::SingleStep
        };
    }
    match code {
        TRAP_BRKPT | SI_KERNEL => TrapCause::Breakpoint,
        TRAP_TRACE => TrapCause::SingleStep,
        _ => TrapCause::Unknown,
    }
}

fn wait_flags() -> WaitPidFlag
{
    WaitPidFlag::__WALL | WaitPidFlag::__WNOTHREAD
}

fn tgkill(pid: Pid, tid: Pid, signal: Signal) -> bool
{
    // SAFETY: tgkill takes plain integers.
    unsafe { libc::syscall(libc::SYS_tgkill, pid.as_raw(), tid.as_raw(), signal as libc::c_int) == 0 }
}

/// [`TargetInterrupt`] for a traced process.
#[derive(Debug)]
pub struct PtraceInterrupt
{
    pid: Pid,
    gate: Arc<InterruptGate>,
}

impl TargetInterrupt for PtraceInterrupt
{
    fn interrupt(&self) -> bool
    {
        self.gate.request(|| tgkill(self.pid, self.pid, Signal::SIGSTOP))
    }

    fn terminate(&self) -> bool
    {
        signal::kill(self.pid, Signal::SIGKILL).is_ok()
    }
}

/// Linux implementation of [`DebugBackend`].
#[derive(Debug)]
pub struct LinuxBackend
{
    settings: DebuggerSettings,
    pid: Option<Pid>,
    launched: bool,
    /// Live threads, leader first.
    threads: Vec<Pid>,
    /// Threads resumed by the last resume or single step.
    running: HashSet<Pid>,
    /// Clone children whose initial `SIGSTOP` has not been seen yet.
    starting: HashSet<Pid>,
    /// Signals to deliver when a thread next runs.
    pending: HashMap<Pid, Signal>,
    stepping: Option<Pid>,
    memory: Option<ProcessMemory>,
    entry: Option<Address>,
    gate: Arc<InterruptGate>,
    interrupter: Option<Arc<PtraceInterrupt>>,
}

impl LinuxBackend
{
    /// Backend with no target.
    #[must_use]
    pub fn new(settings: DebuggerSettings) -> Self
    {
        Self {
            settings,
            pid: None,
            launched: false,
            threads: Vec::new(),
            running: HashSet::new(),
            starting: HashSet::new(),
            pending: HashMap::new(),
            stepping: None,
            memory: None,
            entry: None,
            gate: Arc::new(InterruptGate::new()),
            interrupter: None,
        }
    }

    fn pid(&self) -> Result<Pid>
    {
        self.pid.ok_or(DebuggerError::NotAttached)
    }

    fn tid(&self, thread: ThreadId) -> Result<Pid>
    {
        let tid = i32::try_from(thread.raw()).map(Pid::from_raw).map_err(|_| DebuggerError::UnknownThread(thread))?;
        if self.threads.contains(&tid) {
            Ok(tid)
        } else {
            Err(DebuggerError::UnknownThread(thread))
        }
    }

    /// Common setup once `pid` is traced and every thread is stopped.
    fn take_target(&mut self, pid: Pid, threads: Vec<Pid>, launched: bool) -> Result<()>
    {
        let memory = ProcessMemory::open(pid.as_raw())?;
        self.entry = procfs::entry_point(pid.as_raw()).unwrap_or_else(|err| {
            warn!(%pid, error = %err, "Failed to read auxiliary vector");
            None
        });
        self.pid = Some(pid);
        self.launched = launched;
        self.threads = threads;
        self.running.clear();
        self.starting.clear();
        self.pending.clear();
        self.stepping = None;
        self.memory = Some(memory);
        self.gate = Arc::new(InterruptGate::new());
        self.interrupter = Some(Arc::new(PtraceInterrupt {
            pid,
            gate: Arc::clone(&self.gate),
        }));
        Ok(())
    }

    fn forget_target(&mut self)
    {
        self.gate.disarm();
        self.pid = None;
        self.threads.clear();
        self.running.clear();
        self.starting.clear();
        self.pending.clear();
        self.stepping = None;
        self.memory = None;
        self.entry = None;
        self.interrupter = None;
    }

    /// Let a thread that reported an uninteresting event carry on in the
    /// current run mode.
    fn restart_thread(&mut self, tid: Pid, signal: Option<Signal>) -> Result<()>
    {
        match self.stepping {
            Some(stepping) if stepping == tid => ptrace::step(tid, signal)?,
            // Single-stepping another thread: this one stays put.
            Some(_) => {
                if let Some(signal) = signal {
                    self.pending.insert(tid, signal);
                }
                self.running.remove(&tid);
            }
            None => ptrace::cont(tid, signal)?,
        }
        Ok(())
    }

    fn remove_thread(&mut self, tid: Pid)
    {
        self.threads.retain(|&known| known != tid);
        self.running.remove(&tid);
        self.starting.remove(&tid);
        self.pending.remove(&tid);
    }

    fn trap_cause(&self, tid: Pid) -> TrapCause
    {
        let code = match ptrace::getsiginfo(tid) {
            Ok(info) => info.si_code,
            Err(err) => {
                warn!(%tid, error = %err, "PTRACE_GETSIGINFO failed");
                return TrapCause::Unknown;
            }
        };
        classify_trap(code, self.stepping == Some(tid))
    }

    /// Stop every thread still running after `reporter` stopped.
    fn stop_others(&mut self, pid: Pid, reporter: Pid) -> Result<()>
    {
        let others: Vec<Pid> = self.running.iter().copied().filter(|&tid| tid != reporter).collect();
        for tid in others {
            if !tgkill(pid, tid, Signal::SIGSTOP) {
                self.remove_thread(tid);
                continue;
            }
            loop {
                match waitpid(tid, Some(wait_flags())) {
                    Ok(WaitStatus::Stopped(_, Signal::SIGSTOP)) => break,
                    Ok(WaitStatus::Stopped(_, Signal::SIGTRAP)) => {
                        // The thread hit a trap of its own. Rewind over a
                        // breakpoint so it executes again on the next run.
                        if self.trap_cause(tid) == TrapCause::Breakpoint {
                            self.rewind_breakpoint(tid)?;
                        }
                        break;
                    }
                    Ok(WaitStatus::Stopped(_, other)) => {
                        self.pending.insert(tid, other);
                        break;
                    }
                    Ok(WaitStatus::PtraceEvent(_, _, event)) if event == libc::PTRACE_EVENT_CLONE => {
                        self.track_clone(tid)?;
                        break;
                    }
                    Ok(WaitStatus::Exited(..) | WaitStatus::Signaled(..)) | Err(Errno::ECHILD) => {
                        self.remove_thread(tid);
                        break;
                    }
                    Ok(_) => {}
                    Err(Errno::EINTR) => {}
                    Err(err) => return Err(err.into()),
                }
            }
            self.running.remove(&tid);
        }
        self.running.clear();
        Ok(())
    }

    fn rewind_breakpoint(&mut self, tid: Pid) -> Result<()>
    {
        let offset = self.architecture().breakpoint_pc_offset();
        if offset == 0 {
            return Ok(());
        }
        let mut regs = registers::read_registers(tid)?;
        regs.set_instruction_pointer(regs.instruction_pointer().wrapping_sub(offset));
        registers::write_registers(tid, &regs)
    }

    fn track_clone(&mut self, parent: Pid) -> Result<()>
    {
        let child = Pid::from_raw(i32::try_from(ptrace::getevent(parent)?).map_err(|_| Errno::EINVAL)?);
        if !self.threads.contains(&child) {
            debug!(%parent, %child, "New thread");
            self.threads.push(child);
            self.starting.insert(child);
            if self.stepping.is_none() {
                self.running.insert(child);
            }
        }
        Ok(())
    }

    fn classify_signal(&self, tid: Pid, signal: Signal) -> Option<RawStop>
    {
        let kind = match signal {
            Signal::SIGTRAP => RawStop::Trap(self.trap_cause(tid)),
            Signal::SIGSTOP if self.gate.is_requested() => RawStop::Interrupted,
            Signal::SIGSTOP => return None,
            Signal::SIGSEGV | Signal::SIGBUS => RawStop::Fault(FaultKind::AccessViolation),
            Signal::SIGILL => RawStop::Fault(FaultKind::IllegalInstruction),
            Signal::SIGFPE => RawStop::Fault(FaultKind::Arithmetic),
            other => RawStop::Signal(other as i32),
        };
        Some(kind)
    }

    /// Collect the status of every remaining task after the leader died.
    fn reap(&mut self, pid: Pid) -> Option<ExitStatus>
    {
        loop {
            match waitpid(Pid::from_raw(-1), Some(wait_flags())) {
                Ok(WaitStatus::Exited(tid, code)) if tid == pid => return Some(ExitStatus::Code(code as u32 & 0xFF)),
                Ok(WaitStatus::Signaled(tid, signal, _)) if tid == pid => return Some(ExitStatus::Signaled(signal as i32)),
                Ok(WaitStatus::Stopped(tid, _) | WaitStatus::PtraceEvent(tid, _, _)) => {
                    let _ = ptrace::cont(tid, None);
                }
                Ok(_) | Err(Errno::EINTR) => {}
                Err(_) => return None,
            }
        }
    }
}

impl DebugBackend for LinuxBackend
{
    fn launch(&mut self, program: &Path, args: &[String]) -> Result<ProcessId>
    {
        if self.pid.is_some() {
            return Err(DebuggerError::LaunchFailed("a target is already attached".into()));
        }
        if !program.is_file() {
            return Err(DebuggerError::LaunchFailed(format!("{} is not a file", program.display())));
        }

        // Everything the child needs is prepared before fork: it must not
        // allocate between fork and exec.
        let path = CString::new(program.as_os_str().as_bytes())
            .map_err(|_| DebuggerError::InvalidArgument("program path contains NUL".into()))?;
        let mut argv = vec![path.clone()];
        for arg in args {
            argv.push(CString::new(arg.as_str()).map_err(|_| DebuggerError::InvalidArgument(format!("argument {arg:?} contains NUL")))?);
        }
        let mut argv_ptrs: Vec<*const c_char> = argv.iter().map(|arg| arg.as_ptr()).collect();
        argv_ptrs.push(std::ptr::null());
        let disable_aslr = self.settings.disable_aslr;

        // SAFETY: the child only calls async-signal-safe functions before exec.
        let child = match unsafe { fork() }? {
            ForkResult::Child => {
                if disable_aslr {
                    if let Ok(persona) = personality::get() {
                        let _ = personality::set(persona | Persona::ADDR_NO_RANDOMIZE);
                    }
                }
                if ptrace::traceme().is_ok() {
                    // SAFETY: path and argv stay alive; argv is NULL-terminated.
                    unsafe { libc::execv(path.as_ptr(), argv_ptrs.as_ptr()) };
                }
                // SAFETY: leaving the forked child without running destructors.
                unsafe { libc::_exit(EXEC_FAILED) }
            }
            ForkResult::Parent { child } => child,
        };

        match waitpid(child, Some(wait_flags()))? {
            WaitStatus::Stopped(_, Signal::SIGTRAP) => {}
            WaitStatus::Exited(_, code) => {
                return Err(DebuggerError::LaunchFailed(format!(
                    "{} did not start (exit code {code})",
                    program.display()
                )));
            }
            status => {
                let _ = signal::kill(child, Signal::SIGKILL);
                let _ = waitpid(child, Some(wait_flags()));
                return Err(DebuggerError::LaunchFailed(format!("unexpected wait status after exec: {status:?}")));
            }
        }

        if let Err(err) = ptrace::setoptions(child, Options::PTRACE_O_TRACECLONE | Options::PTRACE_O_EXITKILL) {
            let _ = signal::kill(child, Signal::SIGKILL);
            let _ = waitpid(child, Some(wait_flags()));
            return Err(err.into());
        }

        self.take_target(child, vec![child], true)?;
        debug!(pid = %child, entry = ?self.entry, "Launched");
        Ok(ProcessId(child.as_raw().unsigned_abs()))
    }

    fn attach(&mut self, pid: ProcessId) -> Result<()>
    {
        if self.pid.is_some() {
            return Err(DebuggerError::AttachFailed("a target is already attached".into()));
        }
        let raw = i32::try_from(pid.raw()).map_err(|_| DebuggerError::ProcessNotFound(pid.raw()))?;
        if raw <= 0 || !procfs::process_exists(raw) {
            return Err(DebuggerError::ProcessNotFound(pid.raw()));
        }
        let leader = Pid::from_raw(raw);

        // Threads may be created while attaching; repeat until the task
        // list is stable.
        let mut attached: Vec<Pid> = Vec::new();
        loop {
            let mut added = false;
            for tid in procfs::task_ids(raw)?.into_iter().map(Pid::from_raw) {
                if attached.contains(&tid) {
                    continue;
                }
                match ptrace::attach(tid) {
                    Ok(()) => {}
                    Err(Errno::ESRCH) if tid != leader => continue,
                    Err(err) => {
                        for &done in &attached {
                            let _ = ptrace::detach(done, None);
                        }
                        return Err(match err {
                            Errno::ESRCH => DebuggerError::ProcessNotFound(pid.raw()),
                            Errno::EPERM => DebuggerError::PermissionDenied(format!(
                                "ptrace attach to {pid} refused (check /proc/sys/kernel/yama/ptrace_scope)"
                            )),
                            other => DebuggerError::AttachFailed(other.to_string()),
                        });
                    }
                }
                loop {
                    match waitpid(tid, Some(wait_flags())) {
                        Ok(WaitStatus::Stopped(_, Signal::SIGSTOP)) => break,
                        Ok(WaitStatus::Stopped(_, other)) => {
                            self.pending.insert(tid, other);
                        }
                        Ok(_) | Err(Errno::EINTR) => {}
                        Err(err) => return Err(err.into()),
                    }
                }
                attached.push(tid);
                added = true;
            }
            if !added {
                break;
            }
        }

        let pending = std::mem::take(&mut self.pending);
        ptrace::setoptions(leader, Options::PTRACE_O_TRACECLONE)?;
        for &tid in attached.iter().skip(1) {
            ptrace::setoptions(tid, Options::PTRACE_O_TRACECLONE)?;
        }
        self.take_target(leader, attached, false)?;
        self.pending = pending;
        debug!(%pid, threads = self.threads.len(), "Attached");
        Ok(())
    }

    fn detach(&mut self) -> Result<()>
    {
        let pid = self.pid()?;
        for &tid in &self.threads {
            let signal = self.pending.get(&tid).copied();
            if let Err(err) = ptrace::detach(tid, signal) {
                warn!(%tid, error = %err, "PTRACE_DETACH failed");
            }
        }
        // A SIGSTOP queued by stop-all would otherwise freeze the released process.
        let _ = signal::kill(pid, Signal::SIGCONT);
        debug!(%pid, "Detached");
        self.forget_target();
        Ok(())
    }

    fn kill(&mut self) -> Result<()>
    {
        let pid = self.pid()?;
        signal::kill(pid, Signal::SIGKILL)?;
        let status = self.reap(pid);
        debug!(%pid, ?status, "Killed");
        self.forget_target();
        Ok(())
    }

    fn resume(&mut self) -> Result<()>
    {
        self.pid()?;
        self.stepping = None;
        self.gate.arm();
        let threads = self.threads.clone();
        for tid in threads {
            let signal = self.pending.remove(&tid);
            match ptrace::cont(tid, signal) {
                Ok(()) => {
                    self.running.insert(tid);
                }
                Err(Errno::ESRCH) => trace!(%tid, "Thread vanished before resume"),
                Err(err) => {
                    self.gate.disarm();
                    return Err(DebuggerError::ResumeFailed(format!("thread {tid}: {err}")));
                }
            }
        }
        Ok(())
    }

    fn single_step(&mut self, thread: ThreadId) -> Result<()>
    {
        let tid = self.tid(thread)?;
        self.stepping = Some(tid);
        ptrace::step(tid, None)?;
        self.running.insert(tid);
        Ok(())
    }

    fn wait_for_stop(&mut self) -> Result<RawStopEvent>
    {
        let pid = self.pid()?;
        loop {
            let status = match waitpid(Pid::from_raw(-1), Some(wait_flags())) {
                Ok(status) => status,
                Err(Errno::EINTR) => continue,
                Err(Errno::ECHILD) => {
                    self.forget_target();
                    return Err(DebuggerError::ProcessNotFound(pid.as_raw().unsigned_abs()));
                }
                Err(err) => return Err(err.into()),
            };
            trace!(?status, "waitpid");

            match status {
                WaitStatus::Exited(tid, code) if tid == pid => {
                    self.forget_target();
                    return Ok(RawStopEvent::process(RawStop::Exited(ExitStatus::Code(code as u32 & 0xFF))));
                }
                WaitStatus::Signaled(tid, signal, _) if tid == pid => {
                    self.forget_target();
                    return Ok(RawStopEvent::process(RawStop::Exited(ExitStatus::Signaled(signal as i32))));
                }
                WaitStatus::Exited(tid, _) | WaitStatus::Signaled(tid, _, _) => {
                    debug!(%tid, "Thread exited");
                    let was_stepping = self.stepping == Some(tid);
                    self.remove_thread(tid);
                    if was_stepping {
                        self.stepping = None;
                        self.gate.disarm();
                        return Ok(RawStopEvent::on(ThreadId(pid.as_raw().unsigned_abs().into()), RawStop::Unknown));
                    }
                }
                WaitStatus::PtraceEvent(tid, _, event) => {
                    if event == libc::PTRACE_EVENT_CLONE {
                        self.track_clone(tid)?;
                    }
                    self.restart_thread(tid, None)?;
                }
                WaitStatus::Stopped(tid, signal) => {
                    if !self.threads.contains(&tid) {
                        // Clone child reporting before its parent's event.
                        debug!(%tid, "New thread");
                        self.threads.push(tid);
                        if signal == Signal::SIGSTOP {
                            self.restart_thread(tid, None)?;
                            if self.stepping.is_none() {
                                self.running.insert(tid);
                            }
                            continue;
                        }
                    }
                    if signal == Signal::SIGSTOP && self.starting.remove(&tid) {
                        self.restart_thread(tid, None)?;
                        continue;
                    }
                    if self.settings.passes_signal(signal as i32) {
                        trace!(%tid, ?signal, "Passing signal");
                        self.restart_thread(tid, Some(signal))?;
                        continue;
                    }
                    let Some(kind) = self.classify_signal(tid, signal) else {
                        trace!(%tid, "Swallowing stale SIGSTOP");
                        self.restart_thread(tid, None)?;
                        continue;
                    };
                    if matches!(kind, RawStop::Fault(_) | RawStop::Signal(_)) {
                        self.pending.insert(tid, signal);
                    }
                    self.running.remove(&tid);
                    self.stop_others(pid, tid)?;
                    self.stepping = None;
                    self.gate.disarm();
                    return Ok(RawStopEvent::on(ThreadId(tid.as_raw().unsigned_abs().into()), kind));
                }
                _ => {}
            }
        }
    }

    fn read_memory(&self, address: Address, len: usize) -> Result<Vec<u8>>
    {
        self.memory.as_ref().ok_or(DebuggerError::NotAttached)?.read(address, len)
    }

    fn write_memory(&mut self, address: Address, data: &[u8]) -> Result<()>
    {
        self.memory.as_ref().ok_or(DebuggerError::NotAttached)?.write(address, data)
    }

    fn memory_regions(&self) -> Result<Vec<MemoryRegion>>
    {
        procfs::memory_regions(self.pid()?.as_raw())
    }

    fn read_registers(&self, thread: ThreadId) -> Result<RegisterFile>
    {
        registers::read_registers(self.tid(thread)?)
    }

    fn write_registers(&mut self, thread: ThreadId, registers: &RegisterFile) -> Result<()>
    {
        registers::write_registers(self.tid(thread)?, registers)
    }

    fn threads(&self) -> Result<Vec<ThreadId>>
    {
        self.pid()?;
        Ok(self
            .threads
            .iter()
            .map(|tid| ThreadId(tid.as_raw().unsigned_abs().into()))
            .collect())
    }

    fn architecture(&self) -> Architecture
    {
        Architecture::current()
    }

    fn process_id(&self) -> Option<ProcessId>
    {
        self.pid.map(|pid| ProcessId(pid.as_raw().unsigned_abs()))
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

impl Drop for LinuxBackend
{
    fn drop(&mut self)
    {
        if let Some(pid) = self.pid {
            if self.launched {
                let _ = self.kill();
            } else {
                let _ = self.detach();
            }
            trace!(%pid, "Backend dropped with a live target");
        }
    }
}
