//! # macOS Task Backend
//!
//! [`DebugBackend`] on top of Mach task ports and exception messages.
//!
//! ## Stop model
//!
//! A stopped target is a *suspended task*: every stop ends with one
//! `task_suspend()` held by the backend, and every resume releases it with
//! `task_resume()`. Exceptions arrive on the [`ExceptionPort`]; the
//! raising thread stays blocked until the message is answered, which
//! happens on the next resume, single step or detach.
//!
//! - **launch**: `posix_spawn()` with `POSIX_SPAWN_START_SUSPENDED`, so the
//!   new task starts out held
//! - **pause**: the interrupter calls `task_suspend()` from any thread and
//!   [`wait_for_stop`](DebugBackend::wait_for_stop) notices the request
//!   through the [`InterruptGate`]
//! - **step**: trap flag on the stepping thread, `thread_suspend()` on all
//!   the others for the duration of the step
//!
//! Process exit has no Mach message; it is polled between receives with
//! `waitpid(WNOHANG)` for launched targets and `kill(pid, 0)` for attached
//! ones.
//!
//! ## Permissions
//!
//! `task_for_pid()` requires root or the
//! [`com.apple.security.cs.debugger`](https://developer.apple.com/documentation/bundleresources/entitlements/com.apple.security.cs.debugger)
//! entitlement, and it always fails for SIP-protected binaries.
//!
//! ## References
//!
//! - [task_for_pid](https://developer.apple.com/documentation/kernel/1402149-task_for_pid/)
//! - [task_suspend(3) man page](https://developer.apple.com/documentation/kernel/1402800-task_suspend/)
//! - [XNU kernel source](https://github.com/apple-oss-distributions/xnu)

use std::ffi::{CString, c_char};
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use libc::{c_int, mach_msg_type_number_t, mach_port_t, thread_act_t};
use mach2::kern_return::{KERN_FAILURE, KERN_SUCCESS};
use mach2::task::{task_resume, task_suspend, task_threads};
use mach2::traps::mach_task_self;
use mach2::vm::mach_vm_deallocate;
use mach2::vm_types::{mach_vm_address_t, mach_vm_size_t};
use tracing::{debug, trace, warn};

use crate::backend::{DebugBackend, InterruptGate, RawStop, RawStopEvent, TargetInterrupt};
use crate::config::DebuggerSettings;
use crate::error::{DebuggerError, Result};
use crate::platform::macos::error::check;
use crate::platform::macos::exception::{ExceptionPort, PendingException};
use crate::platform::macos::ffi::{self, spawn_flags};
use crate::platform::macos::{memory, registers};
use crate::types::{Address, Architecture, ExitStatus, MemoryRegion, ProcessId, RegisterFile, ThreadId};

/// How long one exception receive blocks before exit and pause are polled.
const RECEIVE_SLICE: Duration = Duration::from_millis(20);
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// [`TargetInterrupt`] for a Mach task.
#[derive(Debug)]
pub struct MachInterrupt
{
    task: mach_port_t,
    pid: libc::pid_t,
    gate: Arc<InterruptGate>,
}

impl TargetInterrupt for MachInterrupt
{
    fn interrupt(&self) -> bool
    {
        // SAFETY: task_suspend on a task port we hold a send right for.
        self.gate.request(|| unsafe { task_suspend(self.task) } == KERN_SUCCESS)
    }

    fn terminate(&self) -> bool
    {
        // SAFETY: kill takes plain integers.
        unsafe { libc::kill(self.pid, libc::SIGKILL) == 0 }
    }
}

/// macOS implementation of [`DebugBackend`].
#[derive(Debug)]
pub struct MacOSBackend
{
    settings: DebuggerSettings,
    pid: Option<libc::pid_t>,
    task: mach_port_t,
    launched: bool,
    exceptions: Option<ExceptionPort>,
    /// Exception whose thread is still blocked waiting for a reply.
    pending: Option<PendingException>,
    /// The backend holds one suspend count on the task.
    held: bool,
    stepping: Option<thread_act_t>,
    /// Threads parked with `thread_suspend()` during a single step.
    parked: Vec<thread_act_t>,
    gate: Arc<InterruptGate>,
    interrupter: Option<Arc<MachInterrupt>>,
}

impl MacOSBackend
{
    /// Backend with no target.
    pub fn new(settings: DebuggerSettings) -> Result<Self>
    {
        Ok(Self {
            settings,
            pid: None,
            task: 0,
            launched: false,
            exceptions: None,
            pending: None,
            held: false,
            stepping: None,
            parked: Vec::new(),
            gate: Arc::new(InterruptGate::new()),
            interrupter: None,
        })
    }

    fn pid(&self) -> Result<libc::pid_t>
    {
        self.pid.ok_or(DebuggerError::NotAttached)
    }

    fn thread(&self, thread: ThreadId) -> Result<thread_act_t>
    {
        let port = thread_act_t::try_from(thread.raw()).map_err(|_| DebuggerError::UnknownThread(thread))?;
        if self.thread_ports()?.contains(&port) {
            Ok(port)
        } else {
            Err(DebuggerError::UnknownThread(thread))
        }
    }

    /// Current threads of the task, in kernel order (main thread first).
    fn thread_ports(&self) -> Result<Vec<thread_act_t>>
    {
        self.pid()?;
        let mut list: *mut thread_act_t = std::ptr::null_mut();
        let mut count: mach_msg_type_number_t = 0;
        // SAFETY: task_threads fills `list` with `count` ports allocated in our address space.
        unsafe {
            check(task_threads(self.task, &mut list, &mut count))?;
            if list.is_null() || count == 0 {
                return Ok(Vec::new());
            }
            let ports = std::slice::from_raw_parts(list, count as usize).to_vec();
            let size = (count as usize).saturating_mul(mem::size_of::<thread_act_t>()) as mach_vm_size_t;
            let _ = mach_vm_deallocate(mach_task_self(), list as mach_vm_address_t, size);
            Ok(ports)
        }
    }

    /// Common setup once the task port is known and the task is suspended.
    fn take_target(&mut self, pid: libc::pid_t, task: mach_port_t, launched: bool) -> Result<()>
    {
        let exceptions = ExceptionPort::install(task)?;
        self.pid = Some(pid);
        self.task = task;
        self.launched = launched;
        self.exceptions = Some(exceptions);
        self.pending = None;
        self.held = true;
        self.stepping = None;
        self.parked.clear();
        self.gate = Arc::new(InterruptGate::new());
        self.interrupter = Some(Arc::new(MachInterrupt {
            task,
            pid,
            gate: Arc::clone(&self.gate),
        }));
        Ok(())
    }

    fn forget_target(&mut self)
    {
        self.gate.disarm();
        if self.task != 0 {
            // SAFETY: releases the send right from task_for_pid.
            unsafe {
                let _ = ffi::mach_port_deallocate(mach_task_self(), self.task);
            }
        }
        self.pid = None;
        self.task = 0;
        self.exceptions = None;
        self.pending = None;
        self.held = false;
        self.stepping = None;
        self.parked.clear();
        self.interrupter = None;
    }

    /// Release the held suspend count, answering the pending exception first.
    fn release(&mut self) -> Result<()>
    {
        if let Some(exception) = self.pending.take() {
            let handled = !exception.is_fault();
            exception.reply(handled)?;
        }
        if self.held {
            // SAFETY: balances the suspend count taken by the backend.
            check(unsafe { task_resume(self.task) })?;
            self.held = false;
        }
        Ok(())
    }

    fn hold(&mut self) -> Result<()>
    {
        if !self.held {
            // SAFETY: plain Mach call on a valid task port.
            check(unsafe { task_suspend(self.task) })?;
            self.held = true;
        }
        Ok(())
    }

    /// Undo the per-step setup once the task is held again.
    fn finish_step(&mut self)
    {
        if let Some(thread) = self.stepping.take() {
            if let Err(err) = registers::set_single_step(thread, false) {
                trace!(thread, error = %err, "Could not clear single-step flag");
            }
        }
        for thread in self.parked.drain(..) {
            // SAFETY: balances thread_suspend from single_step.
            unsafe {
                let _ = ffi::thread_resume(thread);
            }
        }
    }

    fn poll_exit(&self, pid: libc::pid_t) -> Option<ExitStatus>
    {
        if self.launched {
            let mut status: c_int = 0;
            // SAFETY: status is a live local.
            let reaped = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
            if reaped == pid {
                if libc::WIFEXITED(status) {
                    return Some(ExitStatus::Code(libc::WEXITSTATUS(status) as u32));
                }
                if libc::WIFSIGNALED(status) {
                    return Some(ExitStatus::Signaled(libc::WTERMSIG(status)));
                }
            } else if reaped < 0 {
                return Some(ExitStatus::Code(0));
            }
            None
        } else {
            // SAFETY: signal 0 only checks for existence.
            let alive = unsafe { libc::kill(pid, 0) } == 0
                || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);
            // The exit status of a process we did not spawn is not observable.
            (!alive).then_some(ExitStatus::Code(0))
        }
    }

    fn reap(&self, pid: libc::pid_t) -> Option<ExitStatus>
    {
        let started = Instant::now();
        while started.elapsed() < REAP_TIMEOUT {
            if let Some(status) = self.poll_exit(pid) {
                return Some(status);
            }
            thread::sleep(Duration::from_millis(5));
        }
        warn!(pid, "Target did not exit after SIGKILL");
        None
    }

    fn task_for_pid(pid: libc::pid_t) -> Result<mach_port_t>
    {
        let mut task: mach_port_t = 0;
        // SAFETY: task is a live local.
        let result = unsafe { ffi::task_for_pid(mach_task_self(), pid, &mut task) };
        if result == KERN_SUCCESS {
            return Ok(task);
        }
        // task_for_pid answers KERN_FAILURE for a denied request as well.
        // SAFETY: signal 0 only checks for existence.
        let exists = unsafe { libc::kill(pid, 0) } == 0
            || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);
        if !exists {
            return Err(DebuggerError::ProcessNotFound(pid.unsigned_abs()));
        }
        if result == KERN_FAILURE || result == libc::KERN_PROTECTION_FAILURE {
            return Err(DebuggerError::PermissionDenied(format!(
                "task_for_pid({pid}) was refused; run as root or sign the debugger with the \
                 com.apple.security.cs.debugger entitlement"
            )));
        }
        Err(DebuggerError::MachError(result.into()))
    }

    fn spawn(&self, program: &Path, args: &[String]) -> Result<libc::pid_t>
    {
        let path = CString::new(program.as_os_str().as_bytes())
            .map_err(|_| DebuggerError::InvalidArgument("program path contains NUL".into()))?;
        let mut argv = vec![path.clone()];
        for arg in args {
            argv.push(CString::new(arg.as_str()).map_err(|_| DebuggerError::InvalidArgument(format!("argument {arg:?} contains NUL")))?);
        }
        let mut argv_ptrs: Vec<*const c_char> = argv.iter().map(|arg| arg.as_ptr()).collect();
        argv_ptrs.push(std::ptr::null());

        let mut flags = spawn_flags::POSIX_SPAWN_START_SUSPENDED;
        if self.settings.disable_aslr {
            flags |= spawn_flags::POSIX_SPAWN_DISABLE_ASLR;
        }

        extern "C" {
            static environ: *const *const c_char;
        }

        let mut pid: libc::pid_t = 0;
        // SAFETY: every pointer handed to posix_spawn outlives the call and
        // the attribute object is destroyed on all paths.
        let result = unsafe {
            let mut attr: libc::posix_spawnattr_t = mem::zeroed();
            let init = ffi::posix_spawnattr_init(&mut attr);
            if init != 0 {
                return Err(DebuggerError::LaunchFailed(format!("posix_spawnattr_init failed: {init}")));
            }
            let set = ffi::posix_spawnattr_setflags(&mut attr, flags);
            let result = if set == 0 {
                ffi::posix_spawn(&mut pid, path.as_ptr(), std::ptr::null(), &attr, argv_ptrs.as_ptr(), environ)
            } else {
                set
            };
            ffi::posix_spawnattr_destroy(&mut attr);
            result
        };
        if result != 0 {
            return Err(DebuggerError::LaunchFailed(format!(
                "posix_spawn {}: {}",
                program.display(),
                std::io::Error::from_raw_os_error(result)
            )));
        }
        Ok(pid)
    }
}

impl DebugBackend for MacOSBackend
{
    fn launch(&mut self, program: &Path, args: &[String]) -> Result<ProcessId>
    {
        if self.pid.is_some() {
            return Err(DebuggerError::LaunchFailed("a target is already attached".into()));
        }
        if !program.is_file() {
            return Err(DebuggerError::LaunchFailed(format!("{} is not a file", program.display())));
        }

        let pid = self.spawn(program, args)?;
        let task = match Self::task_for_pid(pid).and_then(|task| self.take_target(pid, task, true).map(|()| task)) {
            Ok(task) => task,
            Err(err) => {
                // SAFETY: the child is ours; kill and reap it.
                unsafe {
                    libc::kill(pid, libc::SIGKILL);
                    let mut status: c_int = 0;
                    libc::waitpid(pid, &mut status, 0);
                }
                return Err(err);
            }
        };
        debug!(pid, task, "Launched");
        Ok(ProcessId(pid.unsigned_abs()))
    }

    fn attach(&mut self, pid: ProcessId) -> Result<()>
    {
        if self.pid.is_some() {
            return Err(DebuggerError::AttachFailed("a target is already attached".into()));
        }
        let raw = libc::pid_t::try_from(pid.raw()).map_err(|_| DebuggerError::ProcessNotFound(pid.raw()))?;
        if raw <= 0 {
            return Err(DebuggerError::ProcessNotFound(pid.raw()));
        }
        let task = Self::task_for_pid(raw)?;
        // SAFETY: plain Mach call on the task port just obtained.
        if let Err(err) = check(unsafe { task_suspend(task) }) {
            // SAFETY: releases the send right from task_for_pid.
            unsafe {
                let _ = ffi::mach_port_deallocate(mach_task_self(), task);
            }
            return Err(DebuggerError::AttachFailed(format!("task_suspend: {err}")));
        }
        if let Err(err) = self.take_target(raw, task, false) {
            // SAFETY: undoes the suspend above.
            unsafe {
                task_resume(task);
                let _ = ffi::mach_port_deallocate(mach_task_self(), task);
            }
            return Err(err);
        }
        debug!(pid = raw, task, "Attached");
        Ok(())
    }

    fn detach(&mut self) -> Result<()>
    {
        let pid = self.pid()?;
        self.finish_step();
        if let Some(exceptions) = &self.exceptions {
            if let Err(err) = exceptions.uninstall(self.task) {
                warn!(pid, error = %err, "Could not restore exception ports");
            }
        }
        let released = self.release();
        debug!(pid, "Detached");
        self.forget_target();
        released
    }

    fn kill(&mut self) -> Result<()>
    {
        let pid = self.pid()?;
        // SAFETY: kill takes plain integers.
        if unsafe { libc::kill(pid, libc::SIGKILL) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        self.finish_step();
        if let Err(err) = self.release() {
            trace!(pid, error = %err, "Release while killing");
        }
        let status = self.reap(pid);
        debug!(pid, ?status, "Killed");
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
        let port = self.thread(thread)?;
        registers::set_single_step(port, true)?;
        for other in self.thread_ports()? {
            // SAFETY: plain Mach call on a thread port of the task.
            if other != port && unsafe { ffi::thread_suspend(other) } == KERN_SUCCESS {
                self.parked.push(other);
            }
        }
        self.stepping = Some(port);
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
            let received = match &self.exceptions {
                Some(exceptions) => exceptions.receive(RECEIVE_SLICE)?,
                None => return Err(DebuggerError::NotAttached),
            };

            if let Some(exception) = received {
                self.hold()?;
                if self.gate.disarm() {
                    // The interrupter's suspend count is not needed: the
                    // exception is the stop.
                    // SAFETY: balances the interrupter's task_suspend.
                    unsafe {
                        task_resume(self.task);
                    }
                }
                let thread = exception.thread();
                let kind = exception.classify(self.stepping == Some(thread));
                trace!(thread, ?kind, "Exception");
                self.finish_step();
                self.pending = Some(exception);
                return Ok(RawStopEvent::on(ThreadId(u64::from(thread)), kind));
            }

            if let Some(status) = self.poll_exit(pid) {
                debug!(pid, ?status, "Target exited");
                self.forget_target();
                return Ok(RawStopEvent::process(RawStop::Exited(status)));
            }

            if self.gate.is_requested() {
                // The interrupter's suspend count becomes the held one.
                self.gate.disarm();
                self.held = true;
                self.finish_step();
                let thread = self.thread_ports()?.first().copied();
                return Ok(match thread {
                    Some(thread) => RawStopEvent::on(ThreadId(u64::from(thread)), RawStop::Interrupted),
                    None => RawStopEvent::process(RawStop::Interrupted),
                });
            }
        }
    }

    fn read_memory(&self, address: Address, len: usize) -> Result<Vec<u8>>
    {
        self.pid()?;
        memory::read_memory(self.task, address, len)
    }

    fn write_memory(&mut self, address: Address, data: &[u8]) -> Result<()>
    {
        self.pid()?;
        memory::write_memory(self.task, address, data)
    }

    fn memory_regions(&self) -> Result<Vec<MemoryRegion>>
    {
        self.pid()?;
        memory::memory_regions(self.task)
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
        Ok(self.thread_ports()?.into_iter().map(|port| ThreadId(u64::from(port))).collect())
    }

    fn architecture(&self) -> Architecture
    {
        registers::ARCHITECTURE
    }

    fn process_id(&self) -> Option<ProcessId>
    {
        self.pid.map(|pid| ProcessId(pid.unsigned_abs()))
    }

    fn interrupter(&self) -> Option<Arc<dyn TargetInterrupt>>
    {
        let handle: Arc<dyn TargetInterrupt> = self.interrupter.clone()?;
        Some(handle)
    }
}

impl Drop for MacOSBackend
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
    fn test_new_backend_has_no_target()
    {
        let backend = MacOSBackend::new(DebuggerSettings::default()).unwrap();
        assert!(backend.process_id().is_none());
        assert!(backend.interrupter().is_none());
        assert!(matches!(backend.threads(), Err(DebuggerError::NotAttached)));
    }

    #[test]
    fn test_attach_to_missing_process()
    {
        let mut backend = MacOSBackend::new(DebuggerSettings::default()).unwrap();
        assert!(matches!(
            backend.attach(ProcessId(0)),
            Err(DebuggerError::ProcessNotFound(0))
        ));
    }
}
