//! Raises the processor exception named by the first argument:
//! `segfault`, `illegalinstr` or `divzero`.

use std::env;
use std::process;

fn segfault()
{
    let null = std::ptr::null_mut::<u32>();
    // SAFETY: deliberately faults.
    unsafe { null.write_volatile(0x5eed) };
}

fn illegal_instruction()
{
    // SAFETY: deliberately faults.
    #[cfg(any(target_arch = "x86_64", target_arch = "x86"))]
    unsafe {
        std::arch::asm!("ud2");
    }
    #[cfg(target_arch = "aarch64")]
    unsafe {
        std::arch::asm!("udf #0");
    }
}

/// Integer division in Rust checks its divisor, so the hardware divide runs
/// in assembly. AArch64 division by zero yields 0 and never traps.
fn divide_by_zero()
{
    #[cfg(target_arch = "x86_64")]
    unsafe {
        // SAFETY: deliberately faults.
        std::arch::asm!(
            "xor edx, edx",
            "div ecx",
            in("ecx") 0u32,
            inout("eax") 1u32 => _,
            out("edx") _,
        );
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        eprintln!("division by zero does not trap on this architecture");
        process::exit(2);
    }
}

fn main()
{
    match env::args().nth(1).as_deref() {
        Some("segfault") => segfault(),
        Some("illegalinstr") => illegal_instruction(),
        Some("divzero") => divide_by_zero(),
        other => {
            eprintln!("usage: do_exception segfault|illegalinstr|divzero (got {other:?})");
            process::exit(1);
        }
    }
    eprintln!("the exception did not stop the process");
    process::exit(3);
}
