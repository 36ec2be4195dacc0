//! Session lifecycle, breakpoints, registers and memory against real targets.

mod common;

use std::sync::Arc;

use haltpoint_core::{
    Address, Architecture, DebugStopReason, DebuggerController, DebuggerError, DebuggerEvent, ExecutableImage,
    SessionState,
};

use common::{launch_to_entry, session};

const HELLOWORLD: &str = env!("CARGO_BIN_EXE_helloworld");

#[test]
fn test_repeated_use()
{
    common::init_logging();
    let image = Arc::new(ExecutableImage::open(HELLOWORLD).unwrap());

    let mut sequences = Vec::new();
    for _ in 0..10 {
        let dbg = DebuggerController::new(image.clone()).unwrap();
        dbg.set_command_line("foobar").unwrap();
        assert!(dbg.launch().unwrap());

        let mut reasons = vec![dbg.go().unwrap()];
        for _ in 0..3 {
            reasons.push(dbg.step_into().unwrap());
        }
        reasons.push(dbg.go().unwrap());
        dbg.destroy().unwrap();

        assert_eq!(
            reasons,
            vec![
                DebugStopReason::Breakpoint,
                DebugStopReason::SingleStep,
                DebugStopReason::SingleStep,
                DebugStopReason::SingleStep,
                DebugStopReason::ProcessExited,
            ]
        );
        sequences.push(reasons);
    }
    assert!(sequences.windows(2).all(|pair| pair[0] == pair[1]));
}

#[test]
fn test_step_into_then_exit()
{
    let dbg = launch_to_entry(HELLOWORLD, "foobar");
    assert_eq!(dbg.step_into().unwrap(), DebugStopReason::SingleStep);
    assert_eq!(dbg.step_into().unwrap(), DebugStopReason::SingleStep);
    assert_eq!(dbg.go().unwrap(), DebugStopReason::ProcessExited);
    assert_eq!(dbg.exit_code(), Some(0));
    assert_eq!(dbg.state(), SessionState::Exited);
}

#[test]
fn test_breakpoint_boundaries()
{
    let dbg = session(HELLOWORLD);
    assert!(dbg.launch().unwrap());

    assert!(!dbg.add_breakpoint(Address::new(0)).unwrap());
    assert!(!dbg.delete_breakpoint(Address::new(0)).unwrap());
    assert!(!dbg.has_breakpoint(Address::new(0)).unwrap());

    let entry = dbg.entry_point();
    assert!(dbg.delete_breakpoint(entry).unwrap());
    assert!(dbg.add_breakpoint(entry).unwrap());

    assert_eq!(dbg.go().unwrap(), DebugStopReason::Breakpoint);
    assert_eq!(dbg.instruction_pointer().unwrap(), entry.value());

    let hits: Vec<u64> = dbg.breakpoints().unwrap().iter().map(|info| info.hit_count).collect();
    assert_eq!(hits, vec![1]);
    dbg.quit().unwrap();
    assert_eq!(dbg.state(), SessionState::Exited);
}

#[test]
fn test_register_read_write()
{
    let dbg = launch_to_entry(HELLOWORLD, "");
    let (first, second, value_a, value_b) = match dbg.architecture() {
        Architecture::X86 => ("eax", "ebx", 0xDEAD_BEEF, 0xCAFE_BABE),
        Architecture::X86_64 => ("rax", "rbx", 0xAAAA_AAAA_DEAD_BEEF, 0xBBBB_BBBB_CAFE_BABE),
        _ => ("x0", "x1", 0xAAAA_AAAA_DEAD_BEEF, 0xBBBB_BBBB_CAFE_BABE),
    };

    let original_a = dbg.get_reg_value(first).unwrap();
    let original_b = dbg.get_reg_value(second).unwrap();

    dbg.set_reg_value(first, value_a).unwrap();
    assert_eq!(dbg.get_reg_value(first).unwrap(), value_a);
    dbg.set_reg_value(second, value_b).unwrap();
    assert_eq!(dbg.get_reg_value(second).unwrap(), value_b);

    dbg.set_reg_value(first, original_a).unwrap();
    assert_eq!(dbg.get_reg_value(first).unwrap(), original_a);
    dbg.set_reg_value(second, original_b).unwrap();
    assert_eq!(dbg.get_reg_value(second).unwrap(), original_b);

    assert!(matches!(
        dbg.get_reg_value("no_such_register"),
        Err(DebuggerError::UnknownRegister { .. })
    ));
    assert!(!dbg.registers().unwrap().is_empty());
    dbg.quit().unwrap();
}

#[test]
fn test_memory_read_write()
{
    let dbg = launch_to_entry(HELLOWORLD, "");
    let address = Address::new(dbg.instruction_pointer().unwrap());

    let original = dbg.read_memory(address, 256);
    assert_eq!(original.len(), 256);

    assert!(!dbg.write_memory(Address::new(0), b"heheHAHAherherHARHAR"));
    assert!(dbg.read_memory(Address::new(0), 256).is_empty());

    let pattern = vec![0xAA; 256];
    assert!(dbg.write_memory(address, &pattern));
    assert_eq!(dbg.read_memory(address, 256), pattern);

    assert!(dbg.write_memory(address, &original));
    assert_eq!(dbg.read_memory(address, 256), original);

    // The entry breakpoint survives both rewrites.
    assert!(dbg.has_breakpoint(address).unwrap());
    dbg.quit().unwrap();
}

#[test]
fn test_double_launch_is_rejected()
{
    let dbg = launch_to_entry(HELLOWORLD, "");
    assert!(matches!(dbg.launch(), Err(DebuggerError::InvalidState { .. })));
    dbg.destroy().unwrap();
    assert_eq!(dbg.state(), SessionState::Destroyed);
    assert!(dbg.launch().is_err());
}

#[test]
fn test_launch_missing_program_fails_cleanly()
{
    let dir = tempfile::tempdir().unwrap();
    let copy = dir.path().join("helloworld-copy");
    std::fs::copy(HELLOWORLD, &copy).unwrap();

    let dbg = session(copy.to_str().unwrap());
    std::fs::remove_file(&copy).unwrap();

    assert!(!dbg.launch().unwrap());
    assert_eq!(dbg.pid(), None);
    assert!(dbg.threads().is_err());
}

#[test]
fn test_restart_runs_the_target_again()
{
    let dbg = launch_to_entry(HELLOWORLD, "");
    let first = dbg.pid();
    assert!(dbg.restart().unwrap());
    assert_ne!(dbg.pid(), first);
    assert_eq!(dbg.go().unwrap(), DebugStopReason::Breakpoint);
    assert_eq!(dbg.go().unwrap(), DebugStopReason::ProcessExited);
}

#[test]
fn test_events_follow_the_session()
{
    let dbg = session(HELLOWORLD);
    let events = dbg.subscribe();
    assert!(dbg.launch().unwrap());
    assert_eq!(dbg.go().unwrap(), DebugStopReason::Breakpoint);
    assert_eq!(dbg.go().unwrap(), DebugStopReason::ProcessExited);

    let received: Vec<DebuggerEvent> = events.try_iter().collect();
    assert!(matches!(received.first(), Some(DebuggerEvent::Launched { .. })));
    assert!(received.contains(&DebuggerEvent::TargetResumed));
    assert!(received
        .iter()
        .any(|event| matches!(event, DebuggerEvent::TargetStopped { reason: DebugStopReason::Breakpoint, .. })));
    assert!(matches!(received.last(), Some(DebuggerEvent::TargetExited { .. })));
}
