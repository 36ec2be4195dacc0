//! Helpers shared by the end-to-end tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Once};

use haltpoint_core::{Address, DebugStopReason, DebuggerController, DebuggerSettings, ExecutableImage};
use haltpoint_utils::{LogLevel, LogSettings, init_with};

static LOGGING: Once = Once::new();

/// Route engine logs to stderr once per test binary. `RUST_LOG` wins over
/// the default `warn` level.
pub fn init_logging()
{
    LOGGING.call_once(|| {
        let mut settings = LogSettings::from_env();
        if std::env::var_os("RUST_LOG").is_none() {
            settings.level = Some(LogLevel::Warn);
        }
        if let Ok(guard) = init_with(&settings) {
            std::mem::forget(guard);
        }
    });
}

/// A session for the fixture at `path` with default settings.
pub fn session(path: &str) -> DebuggerController
{
    session_with(path, DebuggerSettings::default())
}

pub fn session_with(path: &str, settings: DebuggerSettings) -> DebuggerController
{
    init_logging();
    let image = ExecutableImage::open(Path::new(path)).expect("fixture image");
    DebuggerController::with_settings(Arc::new(image), settings).expect("session")
}

/// Launch `path` with `command_line` and run it to the entry point.
pub fn launch_to_entry(path: &str, command_line: &str) -> DebuggerController
{
    let dbg = session(path);
    assert!(dbg.launch_with(command_line).expect("launch"));
    assert_eq!(dbg.go().expect("go"), DebugStopReason::Breakpoint);
    assert_eq!(dbg.instruction_pointer().expect("ip"), dbg.entry_point().value());
    dbg
}

/// First occurrence of `marker` in an executable mapping of the target.
pub fn find_code(dbg: &DebuggerController, marker: &[u8]) -> Option<Address>
{
    const MAX_SCAN: u64 = 64 * 1024 * 1024;

    let regions = dbg.memory_regions().expect("memory regions");
    regions
        .iter()
        .filter(|region| region.is_executable() && region.size() <= MAX_SCAN)
        .find_map(|region| {
            let bytes = dbg.read_memory(region.start, usize::try_from(region.size()).ok()?);
            let offset = bytes.windows(marker.len()).position(|window| window == marker)?;
            region.start.checked_add(offset as u64)
        })
}
