//! # Haltpoint Utilities
//!
//! Shared helpers for the Haltpoint workspace, chiefly the logging setup
//! built on `tracing` that the command-line driver and the fixtures use.

pub mod logging;

pub use logging::{
    LogFormat, LogLevel, LogSettings, LoggingError, LoggingGuard, init_logging, init_logging_with_level, init_with,
};
pub use tracing::{debug, error, info, trace, warn};
