//! Pausing a running target from another thread, thread enumeration and attach.

mod common;

use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use haltpoint_core::{DebugStopReason, DebuggerController, ProcessId, SessionState};

const HELLOWORLD_THREAD: &str = env!("CARGO_BIN_EXE_helloworld_thread");
const HELLOWORLD_LOOP: &str = env!("CARGO_BIN_EXE_helloworld_loop");

/// Main thread blocked in `join` plus four workers. Windows adds loader
/// worker threads and the thread that delivered the break-in.
fn assert_thread_count(count: usize)
{
    if cfg!(windows) {
        assert!(count >= 5, "only {count} threads");
    } else {
        assert_eq!(count, 5);
    }
}

/// `go()` on a helper thread, `pause()` from this one after `delay`.
fn run_then_pause(dbg: &DebuggerController, delay: Duration) -> DebugStopReason
{
    thread::scope(|scope| {
        let runner = scope.spawn(|| dbg.go());
        thread::sleep(delay);
        assert!(dbg.pause());
        runner.join().expect("runner thread").expect("go")
    })
}

#[test]
fn test_pause_running_target()
{
    let dbg = common::launch_to_entry(HELLOWORLD_THREAD, "");

    assert_eq!(run_then_pause(&dbg, Duration::from_secs(1)), DebugStopReason::UserRequestedBreak);
    assert_eq!(dbg.state(), SessionState::Stopped);
    let threads = dbg.threads().unwrap();
    assert_thread_count(threads.len());
    let before: Vec<u64> = threads.iter().map(|thread| thread.instruction_pointer).collect();

    assert_eq!(run_then_pause(&dbg, Duration::from_secs(1)), DebugStopReason::UserRequestedBreak);
    let threads = dbg.threads().unwrap();
    assert_thread_count(threads.len());
    let after: Vec<u64> = threads.iter().map(|thread| thread.instruction_pointer).collect();
    assert_ne!(before, after);

    let active = dbg.active_thread().unwrap();
    assert!(threads.iter().any(|thread| thread.tid == active.tid));
    dbg.quit().unwrap();
}

#[test]
fn test_select_thread()
{
    let dbg = common::launch_to_entry(HELLOWORLD_THREAD, "");
    run_then_pause(&dbg, Duration::from_millis(500));

    let threads = dbg.threads().unwrap();
    let last = threads.last().unwrap().tid;
    assert!(dbg.set_active_thread(last).unwrap());
    assert_eq!(dbg.active_thread().unwrap().tid, last);
    assert!(!dbg.set_active_thread(haltpoint_core::ThreadId(u64::from(u32::MAX) + 7)).unwrap());
    assert_eq!(dbg.active_thread().unwrap().tid, last);
    dbg.quit().unwrap();
}

#[test]
fn test_pause_without_running_target()
{
    let dbg = common::session(HELLOWORLD_THREAD);
    assert!(!dbg.pause());
    assert!(dbg.launch().unwrap());
    assert!(!dbg.pause());
    dbg.destroy().unwrap();
}

#[test]
fn test_quit_while_running()
{
    let dbg = common::launch_to_entry(HELLOWORLD_THREAD, "");
    thread::scope(|scope| {
        let runner = scope.spawn(|| dbg.go());
        thread::sleep(Duration::from_millis(500));
        dbg.quit().unwrap();
        // The interrupted run either reports the kill or the stop it raced with.
        let _ = runner.join().expect("runner thread");
    });
    assert_eq!(dbg.state(), SessionState::Exited);
}

#[test]
fn test_attach()
{
    let mut child = Command::new(HELLOWORLD_LOOP)
        .stdout(Stdio::null())
        .spawn()
        .expect("spawn helloworld_loop");
    thread::sleep(Duration::from_millis(500));

    let dbg = common::session(HELLOWORLD_LOOP);
    assert!(dbg.attach(ProcessId(child.id())).unwrap());
    assert_eq!(dbg.pid(), Some(ProcessId(child.id())));

    for _ in 0..4 {
        assert_eq!(run_then_pause(&dbg, Duration::from_secs(2)), DebugStopReason::UserRequestedBreak);
        assert!(!dbg.registers().unwrap().is_empty());
    }

    // quit() detaches from attached targets, which keep running.
    dbg.quit().unwrap();
    assert_eq!(dbg.state(), SessionState::Detached);
    thread::sleep(Duration::from_millis(200));
    assert!(child.try_wait().unwrap().is_none());

    child.kill().unwrap();
    child.wait().unwrap();
}

#[test]
fn test_attach_to_missing_process()
{
    let dbg = common::session(HELLOWORLD_LOOP);
    assert!(!dbg.attach(ProcessId(u32::MAX - 1)).unwrap());
    assert_eq!(dbg.pid(), None);
}
