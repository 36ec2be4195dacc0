//! Processor exceptions raised by the target are reported as stops.

mod common;

use haltpoint_core::{DebugStopReason, DebuggerController, SessionState};

const DO_EXCEPTION: &str = env!("CARGO_BIN_EXE_do_exception");
#[cfg(target_os = "linux")]
const SIGSEGV: i32 = 11;

fn run_to_fault(kind: &str) -> DebuggerController
{
    let dbg = common::session(DO_EXCEPTION);
    dbg.set_command_line(kind).unwrap();
    assert!(dbg.launch().unwrap());
    assert_eq!(dbg.go().unwrap(), DebugStopReason::Breakpoint);
    dbg
}

#[test]
fn test_segfault()
{
    let dbg = run_to_fault("segfault");
    assert_eq!(dbg.go().unwrap(), DebugStopReason::AccessViolation);
    assert_eq!(dbg.state(), SessionState::Stopped);
    assert!(dbg.active_thread().is_ok());
    dbg.quit().unwrap();
    assert_eq!(dbg.state(), SessionState::Exited);
}

#[test]
fn test_illegal_instruction()
{
    let dbg = run_to_fault("illegalinstr");
    assert_eq!(dbg.go().unwrap(), DebugStopReason::IllegalInstruction);
    dbg.quit().unwrap();
}

#[cfg(target_arch = "x86_64")]
#[test]
fn test_divide_by_zero()
{
    let dbg = run_to_fault("divzero");
    assert_eq!(dbg.go().unwrap(), DebugStopReason::Calculation);
    dbg.quit().unwrap();
}

/// Resuming after a fault hands it to the target, which dies of it.
#[cfg(target_os = "linux")]
#[test]
fn test_fault_is_passed_to_the_target()
{
    use haltpoint_core::ExitStatus;

    let dbg = run_to_fault("segfault");
    let mut reason = dbg.go().unwrap();
    for _ in 0..4 {
        if reason == DebugStopReason::ProcessExited {
            break;
        }
        assert_eq!(reason, DebugStopReason::AccessViolation);
        reason = dbg.go().unwrap();
    }
    assert_eq!(reason, DebugStopReason::ProcessExited);
    assert_eq!(dbg.exit_status(), Some(ExitStatus::Signaled(SIGSEGV)));
}
