//! The per-session debug worker thread.
//!
//! ptrace and the Win32 debug API only accept requests from the thread that
//! created or attached the debuggee. The worker is that thread: it owns the
//! [`ExecutionController`] and runs every backend primitive. The façade sends
//! it closures and waits for their result on a one-shot channel, so commands
//! execute strictly in order.

use std::sync::Mutex;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::error::{DebuggerError, Result};
use crate::execution::ExecutionController;

type Job = Box<dyn FnOnce(&mut ExecutionController) + Send>;

pub(crate) struct DebugWorker
{
    jobs: Mutex<Option<mpsc::Sender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DebugWorker
{
    /// Start the worker. `build` runs on the new thread, so the backend is
    /// created where it will be used; its error is returned from here.
    pub fn spawn<F>(build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<ExecutionController> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);
        let handle = thread::Builder::new()
            .name("haltpoint-worker".into())
            .spawn(move || {
                let mut controller = match build() {
                    Ok(controller) => {
                        let _ = ready_tx.send(Ok(()));
                        controller
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                while let Ok(job) = rx.recv() {
                    job(&mut controller);
                }
                if let Err(err) = controller.destroy() {
                    warn!(error = %err, "Failed to tear down target on worker exit");
                }
                debug!("Debug worker finished");
            })?;

        if let Err(err) = ready_rx.recv().map_err(|_| DebuggerError::SessionClosed).and_then(|ready| ready) {
            let _ = handle.join();
            return Err(err);
        }

        Ok(Self {
            jobs: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Run `job` on the worker and wait for its result.
    ///
    /// ## Errors
    ///
    /// [`DebuggerError::SessionClosed`] if the worker has shut down or the
    /// job panicked.
    pub fn call<R, F>(&self, job: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut ExecutionController) -> R + Send + 'static,
    {
        let sender = self
            .jobs
            .lock()
            .ok()
            .and_then(|jobs| jobs.clone())
            .ok_or(DebuggerError::SessionClosed)?;

        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        sender
            .send(Box::new(move |controller: &mut ExecutionController| {
                let _ = reply_tx.send(job(controller));
            }))
            .map_err(|_| DebuggerError::SessionClosed)?;
        reply_rx.recv().map_err(|_| DebuggerError::SessionClosed)
    }

    /// Close the job queue and wait for the thread to finish.
    pub fn shutdown(&self)
    {
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.take();
        }
        let handle = self.handle.lock().ok().and_then(|mut handle| handle.take());
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("Debug worker panicked");
            }
        }
    }
}
