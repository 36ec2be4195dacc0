//! # macOS Mach API Errors
//!
//! Mach APIs return `kern_return_t` values, which are integer error codes.
//! This module converts those codes into an error enum so backend code can
//! use `?` on Mach calls.

use thiserror::Error;

/// Mach kernel API error
///
/// Common values:
///
/// - `KERN_SUCCESS` (0): Operation succeeded
/// - `KERN_INVALID_ARGUMENT` (4): Invalid argument
/// - `KERN_PROTECTION_FAILURE` (5): Permission denied
/// - `KERN_FAILURE` (14): General failure (often means process not found)
///
/// ## References
///
/// - [kern_return_t documentation](https://developer.apple.com/documentation/kernel/kern_return_t)
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachError
{
    /// `KERN_PROTECTION_FAILURE`
    ///
    /// `task_for_pid()` needs root or the
    /// [debugger entitlement](https://developer.apple.com/documentation/bundleresources/entitlements/com.apple.security.cs.debugger),
    /// and System Integrity Protection blocks platform binaries entirely.
    #[error("KERN_PROTECTION_FAILURE: Permission denied")]
    ProtectionFailure,

    /// `KERN_INVALID_ARGUMENT`
    #[error("KERN_INVALID_ARGUMENT: Invalid PID or argument")]
    InvalidArgument,

    /// `KERN_FAILURE`
    ///
    /// `task_for_pid()` also answers this when permission is denied; the
    /// backend checks whether the process exists to tell the two apart.
    #[error("KERN_FAILURE: Process not found")]
    ProcessNotFound,

    /// `KERN_INVALID_ADDRESS`
    #[error("KERN_INVALID_ADDRESS: Address is not mapped")]
    InvalidAddress,

    /// Any other code, kept for lookup.
    #[error("Unknown Mach error: {0}")]
    Unknown(i32),
}

impl From<libc::kern_return_t> for MachError
{
    fn from(code: libc::kern_return_t) -> Self
    {
        match code {
            libc::KERN_PROTECTION_FAILURE => MachError::ProtectionFailure,
            libc::KERN_INVALID_ARGUMENT => MachError::InvalidArgument,
            libc::KERN_FAILURE => MachError::ProcessNotFound,
            libc::KERN_INVALID_ADDRESS => MachError::InvalidAddress,
            _ => MachError::Unknown(code),
        }
    }
}

/// Turn a `kern_return_t` into a `Result`.
pub(crate) fn check(code: libc::kern_return_t) -> crate::error::Result<()>
{
    if code == libc::KERN_SUCCESS {
        Ok(())
    } else {
        Err(MachError::from(code).into())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_kern_return_mapping()
    {
        assert_eq!(MachError::from(libc::KERN_PROTECTION_FAILURE), MachError::ProtectionFailure);
        assert_eq!(MachError::from(libc::KERN_FAILURE), MachError::ProcessNotFound);
        assert_eq!(MachError::from(12345), MachError::Unknown(12345));
        assert!(check(libc::KERN_SUCCESS).is_ok());
        assert!(check(libc::KERN_INVALID_ARGUMENT).is_err());
    }
}
