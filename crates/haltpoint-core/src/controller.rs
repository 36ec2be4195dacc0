//! # Session Controller
//!
//! [`DebuggerController`] is the only object callers need. It owns one debug
//! worker thread and one target at a time, and forwards every command to the
//! worker's [`ExecutionController`].
//!
//! ## Cross-thread use
//!
//! The controller is `Send + Sync`; share it with `Arc`. Commands are
//! serialised on the worker, so while a `go()` is outstanding any other
//! command waits for the next stop. Two commands skip the queue:
//!
//! - [`pause()`](DebuggerController::pause) interrupts the running target
//!   through the backend's [`TargetInterrupt`] handle, which makes the blocked
//!   `go()` return. A pause that arrives before the target was resumed is
//!   held until `go()` gets there, and the target is not resumed at all
//! - [`quit()`](DebuggerController::quit) and
//!   [`destroy()`](DebuggerController::destroy) kill (or interrupt, for an
//!   attached target) a running target first, so they never wait on a target
//!   that will not stop by itself
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use haltpoint_core::{DebugStopReason, DebuggerController, ExecutableImage};
//!
//! let image = Arc::new(ExecutableImage::open("./target/debug/helloworld")?);
//! let dbg = DebuggerController::new(image)?;
//! assert!(dbg.launch_with("one two")?);
//! assert_eq!(dbg.go()?, DebugStopReason::Breakpoint);
//! assert_eq!(dbg.step_into()?, DebugStopReason::SingleStep);
//! assert_eq!(dbg.go()?, DebugStopReason::ProcessExited);
//! println!("exit code {:?}", dbg.exit_code());
//! dbg.destroy()?;
//! # Ok::<(), haltpoint_core::DebuggerError>(())
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::backend::{DebugBackend, TargetInterrupt};
use crate::breakpoints::BreakpointInfo;
use crate::config::DebuggerSettings;
use crate::error::{DebuggerError, Result};
use crate::events::DebuggerEventReceiver;
use crate::execution::{ExecutionController, SessionShared, SessionStatus};
use crate::image::TargetImage;
use crate::platform;
use crate::types::{
    Address, Architecture, DebugRegister, DebugStopReason, DebugThread, ExitStatus, MemoryRegion, ProcessId,
    SessionOrigin, SessionState, ThreadId,
};
use crate::worker::DebugWorker;

/// A debugging session for one target image.
pub struct DebuggerController
{
    worker: DebugWorker,
    shared: Arc<SessionShared>,
    image: Arc<dyn TargetImage>,
    detach_on_quit: bool,
    /// A `go()` or `step_into()` is outstanding.
    running: AtomicBool,
}

impl DebuggerController
{
    /// New session for `image` with settings from the environment and the
    /// host platform's backend.
    pub fn new(image: Arc<dyn TargetImage>) -> Result<Self>
    {
        Self::with_settings(image, DebuggerSettings::from_env())
    }

    /// New session with explicit settings and the host platform's backend.
    pub fn with_settings(image: Arc<dyn TargetImage>, settings: DebuggerSettings) -> Result<Self>
    {
        let backend_settings = settings.clone();
        Self::with_backend(image, settings, move || platform::create_backend(&backend_settings))
    }

    /// New session with a caller-supplied backend.
    ///
    /// `factory` runs on the session's worker thread.
    pub fn with_backend<F>(image: Arc<dyn TargetImage>, settings: DebuggerSettings, factory: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Box<dyn DebugBackend>> + Send + 'static,
    {
        let shared = Arc::new(SessionShared::new(image.architecture()));
        let detach_on_quit = settings.detach_on_quit;

        let worker_shared = shared.clone();
        let worker_image = image.clone();
        let worker = DebugWorker::spawn(move || {
            let backend = factory()?;
            Ok(ExecutionController::new(backend, worker_image, settings, worker_shared))
        })?;

        Ok(Self {
            worker,
            shared,
            image,
            detach_on_quit,
            running: AtomicBool::new(false),
        })
    }

    /// The image this session launches.
    #[must_use]
    pub fn image(&self) -> &Arc<dyn TargetImage>
    {
        &self.image
    }

    fn status(&self) -> Result<SessionStatus>
    {
        self.shared.status().ok_or(DebuggerError::SessionClosed)
    }

    /// Launch the image with the current command line.
    ///
    /// Returns `Ok(false)` when the process could not be created.
    ///
    /// ## Errors
    ///
    /// [`DebuggerError::InvalidState`] if a target is already under control.
    pub fn launch(&self) -> Result<bool>
    {
        self.worker.call(ExecutionController::launch)?
    }

    /// Set the command line, then launch.
    pub fn launch_with(&self, command_line: &str) -> Result<bool>
    {
        self.set_command_line(command_line)?;
        self.launch()
    }

    /// Attach to a running process.
    ///
    /// Returns `Ok(false)` when the process does not exist or the OS denies
    /// access.
    pub fn attach(&self, pid: ProcessId) -> Result<bool>
    {
        self.worker.call(move |controller| controller.attach(pid))?
    }

    /// Resume all threads and block until the target stops.
    pub fn go(&self) -> Result<DebugStopReason>
    {
        self.shared.run_gate.begin();
        let result = self.execute(ExecutionController::go);
        self.shared.run_gate.finish();
        result
    }

    /// Execute one instruction on the active thread.
    pub fn step_into(&self) -> Result<DebugStopReason>
    {
        self.execute(ExecutionController::step_into)
    }

    fn execute(&self, run: fn(&mut ExecutionController) -> Result<DebugStopReason>) -> Result<DebugStopReason>
    {
        self.running.store(true, Ordering::SeqCst);
        let result = self.worker.call(run);
        self.running.store(false, Ordering::SeqCst);
        result?
    }

    /// Ask a running target to stop. The outstanding `go()` then returns
    /// [`DebugStopReason::UserRequestedBreak`].
    ///
    /// Has no effect (and returns `false`) when nothing is running.
    pub fn pause(&self) -> bool
    {
        let sent = self.shared.run_gate.pause(self.shared.interrupter());
        debug!(sent, "Pause requested");
        sent
    }

    /// Make an outstanding run return so the worker can take the next command.
    fn cancel_run(&self)
    {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        let status = self.status().ok();
        let attached = status.is_some_and(|status| status.origin == Some(SessionOrigin::Attached));
        if attached && self.detach_on_quit {
            self.shared.run_gate.pause(self.shared.interrupter());
        } else if let Some(interrupter) = self.shared.interrupter() {
            interrupter.terminate();
        }
    }

    /// End control of the target: kill a launched target, detach from an
    /// attached one. Safe to call repeatedly.
    pub fn quit(&self) -> Result<()>
    {
        self.cancel_run();
        self.worker.call(ExecutionController::quit)?
    }

    /// `quit()` and release every resource the session holds. Lifecycle
    /// commands are rejected afterwards. Safe to call repeatedly.
    pub fn destroy(&self) -> Result<()>
    {
        self.cancel_run();
        match self.worker.call(ExecutionController::destroy) {
            Ok(result) => result,
            Err(DebuggerError::SessionClosed) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Release the target and leave it running.
    pub fn detach(&self) -> Result<()>
    {
        self.worker.call(ExecutionController::detach)?
    }

    /// Kill the target (if any) and launch it again with the same command line.
    pub fn restart(&self) -> Result<bool>
    {
        self.cancel_run();
        self.worker.call(ExecutionController::restart)?
    }

    /// Install a software breakpoint. Address zero and unmapped addresses are
    /// ignored and yield `false`.
    pub fn add_breakpoint(&self, address: Address) -> Result<bool>
    {
        self.worker.call(move |controller| controller.add_breakpoint(address))?
    }

    /// Remove a software breakpoint. Unknown addresses yield `false`.
    pub fn delete_breakpoint(&self, address: Address) -> Result<bool>
    {
        self.worker.call(move |controller| controller.delete_breakpoint(address))?
    }

    /// Stop trapping on a breakpoint without removing it. Unknown addresses
    /// yield `false`.
    pub fn disable_breakpoint(&self, address: Address) -> Result<bool>
    {
        self.worker.call(move |controller| controller.disable_breakpoint(address))?
    }

    pub fn enable_breakpoint(&self, address: Address) -> Result<bool>
    {
        self.worker.call(move |controller| controller.enable_breakpoint(address))?
    }

    pub fn breakpoints(&self) -> Result<Vec<BreakpointInfo>>
    {
        self.worker.call(|controller| controller.breakpoints())
    }

    pub fn has_breakpoint(&self, address: Address) -> Result<bool>
    {
        self.worker.call(move |controller| controller.has_breakpoint(address))
    }

    /// Value of a register of the active thread.
    ///
    /// ## Errors
    ///
    /// - [`DebuggerError::UnknownRegister`] if `name` is not a register of the target architecture
    /// - [`DebuggerError::NotStopped`] / [`DebuggerError::NotAttached`] outside a stop
    pub fn get_reg_value(&self, name: &str) -> Result<u64>
    {
        let name = name.to_string();
        self.worker.call(move |controller| controller.get_reg_value(&name))?
    }

    /// Set a register of the active thread.
    pub fn set_reg_value(&self, name: &str, value: u64) -> Result<()>
    {
        let name = name.to_string();
        self.worker.call(move |controller| controller.set_reg_value(&name, value))?
    }

    pub fn get_thread_reg_value(&self, thread: ThreadId, name: &str) -> Result<u64>
    {
        let name = name.to_string();
        self.worker.call(move |controller| controller.thread_register(thread, &name))?
    }

    pub fn set_thread_reg_value(&self, thread: ThreadId, name: &str, value: u64) -> Result<()>
    {
        let name = name.to_string();
        self.worker
            .call(move |controller| controller.set_thread_register(thread, &name, value))?
    }

    /// All registers of the active thread.
    pub fn registers(&self) -> Result<Vec<DebugRegister>>
    {
        self.worker.call(|controller| controller.registers())?
    }

    /// Instruction pointer of the active thread.
    pub fn instruction_pointer(&self) -> Result<u64>
    {
        self.worker.call(|controller| controller.instruction_pointer())?
    }

    /// Read target memory. Empty on any failure.
    #[must_use]
    pub fn read_memory(&self, address: Address, len: usize) -> Vec<u8>
    {
        self.worker
            .call(move |controller| controller.read_memory(address, len))
            .unwrap_or_default()
    }

    /// Write target memory. `false` (and nothing written) on any failure.
    #[must_use]
    pub fn write_memory(&self, address: Address, data: &[u8]) -> bool
    {
        let data = data.to_vec();
        self.worker
            .call(move |controller| controller.write_memory(address, &data))
            .unwrap_or(false)
    }

    pub fn memory_regions(&self) -> Result<Vec<MemoryRegion>>
    {
        self.worker.call(|controller| controller.memory_regions())?
    }

    /// Live threads, process leader first.
    pub fn threads(&self) -> Result<Vec<DebugThread>>
    {
        self.worker.call(|controller| controller.threads())?
    }

    pub fn active_thread(&self) -> Result<DebugThread>
    {
        self.worker.call(|controller| controller.active_thread())?
    }

    /// Focus register and step operations on `tid`.
    pub fn set_active_thread(&self, tid: ThreadId) -> Result<bool>
    {
        self.worker.call(move |controller| controller.set_active_thread(tid))?
    }

    /// Runtime entry point of the target (the image's before launch).
    #[must_use]
    pub fn entry_point(&self) -> Address
    {
        self.worker
            .call(|controller| controller.entry_point())
            .unwrap_or_else(|_| self.image.entry_point())
    }

    pub fn set_command_line(&self, command_line: &str) -> Result<()>
    {
        let command_line = command_line.to_string();
        self.worker
            .call(move |controller| controller.set_command_line(&command_line))
    }

    /// Receive every event of this session from now on.
    pub fn subscribe(&self) -> DebuggerEventReceiver
    {
        self.shared.events.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> SessionState
    {
        self.status().map_or(SessionState::Destroyed, |status| status.state)
    }

    #[must_use]
    pub fn pid(&self) -> Option<ProcessId>
    {
        self.status().ok().and_then(|status| status.pid)
    }

    /// How the target ended, once it has exited.
    #[must_use]
    pub fn exit_status(&self) -> Option<ExitStatus>
    {
        self.status().ok().and_then(|status| status.exit_status)
    }

    /// Exit code as the OS delivered it (`128 + signal` for signal deaths).
    #[must_use]
    pub fn exit_code(&self) -> Option<u32>
    {
        self.exit_status().map(ExitStatus::code)
    }

    #[must_use]
    pub fn last_stop_reason(&self) -> Option<DebugStopReason>
    {
        self.status().ok().and_then(|status| status.last_stop)
    }

    #[must_use]
    pub fn architecture(&self) -> Architecture
    {
        self.status()
            .map_or_else(|_| self.image.architecture(), |status| status.architecture)
    }

    #[must_use]
    pub fn command_line(&self) -> String
    {
        self.status().map(|status| status.command_line).unwrap_or_default()
    }

    /// Handle for interrupting the current target from any thread.
    #[must_use]
    pub fn interrupter(&self) -> Option<Arc<dyn TargetInterrupt>>
    {
        self.shared.interrupter()
    }
}

impl Drop for DebuggerController
{
    fn drop(&mut self)
    {
        if let Err(err) = self.destroy() {
            warn!(error = %err, "Failed to destroy debug session");
        }
        self.worker.shutdown();
    }
}

#[cfg(test)]
mod tests
{
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::backend::RawStop;
    use crate::events::DebuggerEvent;
    use crate::testing::{FixedImage, PID, ScriptedBackend};

    const ENTRY: u64 = 0x40_1000;

    fn session(configure: impl FnOnce(ScriptedBackend) -> ScriptedBackend + Send + 'static) -> DebuggerController
    {
        let image = Arc::new(FixedImage::new(ENTRY, Architecture::X86_64));
        DebuggerController::with_backend(image, DebuggerSettings::default(), move || {
            let mut backend = ScriptedBackend::new(Architecture::X86_64);
            backend.map(ENTRY, &[0x90; 32]);
            let backend: Box<dyn DebugBackend> = Box::new(configure(backend));
            Ok(backend)
        })
        .unwrap()
    }

    #[test]
    fn test_controller_is_send_and_sync()
    {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DebuggerController>();
    }

    #[test]
    fn test_launch_go_exit()
    {
        let dbg = session(|mut backend| {
            backend.script(u64::from(PID), RawStop::Trap(crate::backend::TrapCause::Breakpoint), Some(ENTRY + 1));
            backend
        });
        let events = dbg.subscribe();
        assert!(dbg.launch_with("a b").unwrap());
        assert_eq!(dbg.command_line(), "a b");
        assert_eq!(dbg.pid(), Some(ProcessId(PID)));
        assert_eq!(dbg.go().unwrap(), DebugStopReason::Breakpoint);
        assert_eq!(dbg.instruction_pointer().unwrap(), ENTRY);
        assert_eq!(dbg.go().unwrap(), DebugStopReason::ProcessExited);
        assert_eq!(dbg.exit_code(), Some(0));
        assert_eq!(dbg.state(), SessionState::Exited);

        let received: Vec<DebuggerEvent> = events.try_iter().collect();
        assert_eq!(received.first(), Some(&DebuggerEvent::Launched { pid: ProcessId(PID) }));
        assert!(received.contains(&DebuggerEvent::TargetExited {
            status: ExitStatus::Code(0)
        }));
    }

    #[test]
    fn test_pause_without_run_has_no_effect()
    {
        let dbg = session(|backend| backend);
        assert!(!dbg.pause());
        assert!(dbg.launch().unwrap());
        assert!(!dbg.pause());
        assert_eq!(dbg.state(), SessionState::Stopped);
    }

    #[test]
    fn test_pause_from_another_thread()
    {
        let dbg = Arc::new(session(ScriptedBackend::blocking));
        assert!(dbg.launch().unwrap());

        let runner = dbg.clone();
        let handle = thread::spawn(move || runner.go());
        while dbg.state() != SessionState::Running {
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(20));
        assert!(dbg.pause());

        assert_eq!(handle.join().unwrap().unwrap(), DebugStopReason::UserRequestedBreak);
        assert_eq!(dbg.state(), SessionState::Stopped);
        assert_eq!(dbg.threads().unwrap().len(), 1);
    }

    #[test]
    fn test_pause_right_after_go_starts()
    {
        for _ in 0..20 {
            let dbg = Arc::new(session(ScriptedBackend::blocking));
            assert!(dbg.launch().unwrap());

            let runner = dbg.clone();
            let handle = thread::spawn(move || runner.go());
            while dbg.state() != SessionState::Running {
                thread::yield_now();
            }
            assert!(dbg.pause());
            assert_eq!(handle.join().unwrap().unwrap(), DebugStopReason::UserRequestedBreak);
            assert!(!dbg.pause());
        }
    }

    #[test]
    fn test_disable_and_enable_breakpoint()
    {
        let dbg = session(|backend| backend);
        assert!(dbg.launch().unwrap());
        let entry = Address::new(ENTRY);

        assert!(dbg.disable_breakpoint(entry).unwrap());
        assert!(!dbg.breakpoints().unwrap()[0].enabled);
        assert!(dbg.enable_breakpoint(entry).unwrap());
        assert!(dbg.breakpoints().unwrap()[0].enabled);
        assert!(!dbg.enable_breakpoint(Address::new(ENTRY + 8)).unwrap());
    }

    #[test]
    fn test_quit_unblocks_running_go()
    {
        let dbg = Arc::new(session(ScriptedBackend::blocking));
        assert!(dbg.launch().unwrap());

        let runner = dbg.clone();
        let handle = thread::spawn(move || runner.go());
        while dbg.state() != SessionState::Running {
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(20));
        dbg.quit().unwrap();

        assert_eq!(handle.join().unwrap().unwrap(), DebugStopReason::ProcessExited);
        assert_eq!(dbg.exit_status(), Some(ExitStatus::Signaled(9)));
    }

    #[test]
    fn test_destroy_is_idempotent()
    {
        let dbg = session(|backend| backend);
        assert!(dbg.launch().unwrap());
        dbg.destroy().unwrap();
        dbg.destroy().unwrap();
        assert_eq!(dbg.state(), SessionState::Destroyed);
        assert!(matches!(dbg.launch(), Err(DebuggerError::InvalidState { .. })));
        assert!(dbg.read_memory(Address::new(ENTRY), 4).is_empty());
    }

    #[test]
    fn test_backend_factory_error_is_returned()
    {
        let image = Arc::new(FixedImage::new(ENTRY, Architecture::X86_64));
        let result = DebuggerController::with_backend(image, DebuggerSettings::default(), || {
            Err(DebuggerError::UnsupportedArchitecture("test".to_string()))
        });
        assert!(matches!(result, Err(DebuggerError::UnsupportedArchitecture(_))));
    }

    #[test]
    fn test_restart_relaunches()
    {
        let dbg = session(|backend| backend);
        assert!(dbg.launch().unwrap());
        assert!(dbg.restart().unwrap());
        assert_eq!(dbg.state(), SessionState::Stopped);
        assert!(dbg.has_breakpoint(Address::new(ENTRY)).unwrap());
    }
}
