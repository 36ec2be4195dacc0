//! # Platform-Specific Implementations
//!
//! One [`DebugBackend`] per OS family, selected at compile time:
//!
//! - **Linux**: `ptrace` + `waitpid`
//!   - See: [ptrace(2) man page](https://man7.org/linux/man-pages/man2/ptrace.2.html)
//! - **macOS**: Mach task/thread ports and exception ports
//!   - See: [Apple Mach Kernel Programming](https://developer.apple.com/library/archive/documentation/Darwin/Conceptual/KernelProgramming/Mach/Mach.html)
//! - **Windows**: the Win32 debug event loop
//!   - See: [Windows Debugging API](https://learn.microsoft.com/en-us/windows/win32/debug/debugging-functions)

use crate::backend::DebugBackend;
use crate::config::DebuggerSettings;
use crate::error::Result;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(windows)]
pub mod windows;

/// Create the backend for the host platform.
///
/// ## Errors
///
/// [`DebuggerError::UnsupportedArchitecture`](crate::DebuggerError::UnsupportedArchitecture)
/// on platforms without a backend.
pub fn create_backend(settings: &DebuggerSettings) -> Result<Box<dyn DebugBackend>>
{
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(linux::LinuxBackend::new(settings.clone())))
    }

    #[cfg(target_os = "macos")]
    {
        Ok(Box::new(macos::MacOSBackend::new(settings.clone())?))
    }

    #[cfg(windows)]
    {
        Ok(Box::new(windows::WindowsBackend::new(settings.clone())))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
    {
        let _ = settings;
        Err(crate::error::DebuggerError::UnsupportedArchitecture(format!(
            "no debugger backend for platform: {}",
            std::env::consts::OS
        )))
    }
}
