//! Prints a line every second until it is killed. Used as an attach target.

use std::process;
use std::thread;
use std::time::Duration;

fn main()
{
    println!("pid {}", process::id());
    let mut ticks = 0u64;
    loop {
        ticks += 1;
        println!("tick {ticks}");
        thread::sleep(Duration::from_secs(1));
    }
}
