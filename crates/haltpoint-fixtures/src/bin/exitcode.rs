//! Exits with the status given as the first argument (default 0).
//!
//! Negative values are passed to the OS unchanged so the truncation the
//! host applies can be observed.

use std::env;
use std::process;

fn main()
{
    let code = env::args()
        .nth(1)
        .and_then(|arg| arg.parse::<i32>().ok())
        .unwrap_or(0);
    println!("exiting with {code}");
    process::exit(code);
}
