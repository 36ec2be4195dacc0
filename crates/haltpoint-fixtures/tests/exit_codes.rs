//! Exit statuses as the host reports them.

mod common;

use haltpoint_core::{DebugStopReason, ExitStatus};

const EXITCODE: &str = env!("CARGO_BIN_EXE_exitcode");

/// Unix keeps the low byte of the status, Windows the full 32-bit value.
const CASES: &[(&str, &[u32])] = &[
    ("-11", &[245, 4_294_967_285]),
    ("-1", &[4_294_967_295, 255]),
    ("-3", &[4_294_967_293, 253]),
    ("0", &[0]),
    ("3", &[3]),
    ("7", &[7]),
    ("123", &[123]),
];

#[test]
fn test_return_code()
{
    for (arg, expected) in CASES {
        let dbg = common::session(EXITCODE);
        dbg.set_command_line(arg).unwrap();
        assert!(dbg.launch().unwrap());
        assert_eq!(dbg.go().unwrap(), DebugStopReason::Breakpoint);
        assert_eq!(dbg.go().unwrap(), DebugStopReason::ProcessExited, "argument {arg}");

        let code = dbg.exit_code().unwrap();
        assert!(expected.contains(&code), "argument {arg}: exit code {code} not in {expected:?}");
        dbg.destroy().unwrap();
    }
}

#[cfg(unix)]
#[test]
fn test_exit_status_is_the_low_byte()
{
    let dbg = common::session(EXITCODE);
    assert!(dbg.launch_with("-11").unwrap());
    dbg.go().unwrap();
    assert_eq!(dbg.go().unwrap(), DebugStopReason::ProcessExited);
    assert_eq!(dbg.exit_status(), Some(ExitStatus::Code(245)));
    assert_eq!(dbg.last_stop_reason(), Some(DebugStopReason::ProcessExited));
}

#[cfg(windows)]
#[test]
fn test_exit_status_keeps_all_bits()
{
    let dbg = common::session(EXITCODE);
    assert!(dbg.launch_with("-11").unwrap());
    dbg.go().unwrap();
    assert_eq!(dbg.go().unwrap(), DebugStopReason::ProcessExited);
    assert_eq!(dbg.exit_status(), Some(ExitStatus::Code(4_294_967_285)));
    assert_eq!(dbg.exit_status().map(ExitStatus::low_byte), Some(245));
}
