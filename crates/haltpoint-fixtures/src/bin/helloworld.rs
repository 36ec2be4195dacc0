//! Prints its arguments and exits with status 0.

use std::env;

fn main()
{
    println!("Hello, world!");
    for (index, arg) in env::args().enumerate().skip(1) {
        println!("argv[{index}] = {arg}");
    }
}
