//! # haltpoint-core
//!
//! Process execution control: the engine of a debugger.
//!
//! This crate launches or attaches to a target process, runs and
//! single-steps it, pauses it from another thread, maintains software
//! breakpoints, exposes per-thread registers and raw memory, and classifies
//! why the target stopped.
//!
//! ## Layers
//!
//! - [`DebuggerController`]: the session façade and the only type most callers need
//! - [`execution::ExecutionController`]: lifecycle, run/step and stop classification
//! - [`breakpoints::BreakpointTable`]: software breakpoints and their saved bytes
//! - [`backend::DebugBackend`]: per-platform primitives
//!
//! ## Platform Support
//!
//! - **Linux**: `ptrace` and `waitpid` via `nix` (x86-64, AArch64)
//! - **macOS**: Mach task/thread ports and exception ports via `mach2` (x86-64, Apple Silicon)
//! - **Windows**: the Win32 debug API via `windows-sys` (x86-64, AArch64)
//!
//! ## Why unsafe code is needed
//!
//! The backends call kernel interfaces (`ptrace`, Mach traps, Win32 debug
//! functions) that read and modify another process. They are wrapped in safe
//! abstractions, but the calls themselves must be `unsafe`.

#![allow(unsafe_code)] // Required for low-level system APIs (Mach, ptrace, Win32)

pub mod backend;
pub mod breakpoints;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod execution;
pub mod image;
pub mod platform;
pub mod types;

mod worker;

#[cfg(test)]
mod testing;

pub use breakpoints::{BreakpointId, BreakpointInfo};
pub use config::DebuggerSettings;
pub use controller::DebuggerController;
pub use error::{DebuggerError, Result};
pub use events::{DebuggerEvent, DebuggerEventReceiver};
pub use image::{ExecutableImage, TargetImage};
pub use types::{
    Address, Architecture, DebugRegister, DebugStopReason, DebugThread, ExitStatus, MemoryRegion, ProcessId,
    RegisterFile, SessionOrigin, SessionState, ThreadId,
};
