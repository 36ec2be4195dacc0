//! Starts four worker threads that never finish and joins them.
//!
//! While the main thread is blocked in `join` the process has exactly five
//! threads on Linux and macOS. The workers spin on the CPU, so two pauses of
//! the process see them at different instructions.

use std::hint::black_box;
use std::thread;

const WORKERS: usize = 4;
const REPORT_EVERY: u64 = 1 << 28;

fn main()
{
    let workers: Vec<_> = (0..WORKERS)
        .map(|index| {
            thread::spawn(move || {
                let mut counter = 0u64;
                loop {
                    counter = black_box(counter.wrapping_add(1));
                    if counter % REPORT_EVERY == 0 {
                        println!("worker {index}: {counter}");
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        let _ = worker.join();
    }
}
