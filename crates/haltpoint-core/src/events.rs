//! Debugger event types and the subscriber list.
//!
//! Callers that want to react to target state changes without polling
//! `state()` subscribe to the session. Every lifecycle transition and every
//! classified stop is published once to each live subscriber.

use std::fmt;
use std::sync::Mutex;
use std::sync::mpsc;

use crate::types::{Address, DebugStopReason, ExitStatus, ProcessId, ThreadId};

/// Event emitted by a debugging session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebuggerEvent
{
    /// A target was created and is stopped at its initial stop.
    Launched
    {
        /// Process id of the new target.
        pid: ProcessId,
    },
    /// The session took control of a running process.
    Attached
    {
        /// Process id of the target.
        pid: ProcessId,
    },
    /// Target resumed execution.
    TargetResumed,
    /// Target stopped execution for a particular reason.
    TargetStopped
    {
        /// Classified stop reason.
        reason: DebugStopReason,
        /// Thread responsible for the stop (if known).
        thread: Option<ThreadId>,
    },
    /// Target terminated.
    TargetExited
    {
        /// Exit status as delivered by the OS.
        status: ExitStatus,
    },
    /// Target was released and keeps running.
    Detached,
    /// A breakpoint was installed.
    BreakpointAdded
    {
        /// Address of the trap.
        address: Address,
    },
    /// A breakpoint was removed.
    BreakpointRemoved
    {
        /// Address of the trap.
        address: Address,
    },
}

impl fmt::Display for DebuggerEvent
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::Launched { pid } => write!(f, "Launched process {pid}"),
            Self::Attached { pid } => write!(f, "Attached to process {pid}"),
            Self::TargetResumed => write!(f, "Target resumed execution"),
            Self::TargetStopped { reason, thread } => {
                write!(f, "Stopped: {reason}")?;
                if let Some(thread) = thread {
                    write!(f, " (thread {thread})")?;
                }
                Ok(())
            }
            Self::TargetExited { status } => write!(f, "Process exited with {status}"),
            Self::Detached => write!(f, "Detached from target"),
            Self::BreakpointAdded { address } => write!(f, "Breakpoint added at {address}"),
            Self::BreakpointRemoved { address } => write!(f, "Breakpoint removed at {address}"),
        }
    }
}

/// Sender side of the debugger event channel.
pub type DebuggerEventSender = mpsc::Sender<DebuggerEvent>;
/// Receiver side of the debugger event channel.
pub type DebuggerEventReceiver = mpsc::Receiver<DebuggerEvent>;

/// Fan-out of session events to any number of subscribers.
#[derive(Debug, Default)]
pub struct EventBus
{
    subscribers: Mutex<Vec<DebuggerEventSender>>,
}

impl EventBus
{
    /// Register a new subscriber.
    pub fn subscribe(&self) -> DebuggerEventReceiver
    {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    /// Deliver `event` to every subscriber, dropping those whose receiver is gone.
    pub fn publish(&self, event: &DebuggerEvent)
    {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Number of live subscribers (as of the last publish).
    #[must_use]
    pub fn subscriber_count(&self) -> usize
    {
        self.subscribers.lock().map(|subscribers| subscribers.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_publish_reaches_all_subscribers()
    {
        let bus = EventBus::default();
        let first = bus.subscribe();
        let second = bus.subscribe();
        bus.publish(&DebuggerEvent::TargetResumed);
        assert_eq!(first.try_recv().unwrap(), DebuggerEvent::TargetResumed);
        assert_eq!(second.try_recv().unwrap(), DebuggerEvent::TargetResumed);
    }

    #[test]
    fn test_dead_subscribers_are_pruned()
    {
        let bus = EventBus::default();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        bus.publish(&DebuggerEvent::Detached);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_recv().unwrap(), DebuggerEvent::Detached);
    }

    #[test]
    fn test_display()
    {
        let event = DebuggerEvent::TargetStopped {
            reason: DebugStopReason::Breakpoint,
            thread: Some(ThreadId(42)),
        };
        assert_eq!(event.to_string(), "Stopped: breakpoint (thread 42)");
        let exited = DebuggerEvent::TargetExited {
            status: ExitStatus::Code(3),
        };
        assert_eq!(exited.to_string(), "Process exited with exit code 3");
    }
}
