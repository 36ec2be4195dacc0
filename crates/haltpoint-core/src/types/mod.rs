//! # Types
//!
//! Platform-agnostic types shared by the backends and the session façade.
//!
//! Backends translate their native identifiers (Linux TIDs, Mach ports,
//! Windows thread ids) and register layouts into these types so the rest of
//! the engine never needs to know which OS it is running on.

pub mod address;
pub mod process;
pub mod registers;
pub mod stop;

pub use address::Address;
pub use process::{Architecture, DebugThread, MemoryRegion, ProcessId, ThreadId};
pub use registers::{DebugRegister, RegisterFile};
pub use stop::{DebugStopReason, ExitStatus, SessionOrigin, SessionState};
