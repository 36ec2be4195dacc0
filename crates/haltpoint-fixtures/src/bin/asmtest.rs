//! Runs a fixed instruction sequence containing two call/return pairs, then
//! (on Linux x86-64) a system call.
//!
//! The sequence starts with a marker the tests search for in the target's
//! memory, so they can step through it without symbol information.
//!
//! x86-64, starting at the marker `90 b8 ed 5e ed 5e e8`:
//!
//! ```text
//! +0   nop
//! +1   mov eax, 0x5eed5eed
//! +6   call leaf
//! +11  nop
//! +12  call leaf
//! +17  jmp done
//! leaf:
//!      xor eax, eax        (2 bytes)
//!      ret
//! ```
//!
//! AArch64, starting at the marker `a0 dd 8b d2` (`movz x0, #0x5eed`):
//!
//! ```text
//! +0   movz x0, #0x5eed
//! +4   bl leaf
//! +8   nop
//! +12  bl leaf
//! +16  b done
//! leaf:
//!      mov x0, xzr
//!      ret
//! ```

#[inline(never)]
fn run_sequence()
{
    #[cfg(target_arch = "x86_64")]
    // SAFETY: the leaf only clears rax and returns to its caller.
    unsafe {
        std::arch::asm!(
            "nop",
            "mov eax, 0x5eed5eed",
            "call 2f",
            "nop",
            "call 2f",
            "jmp 3f",
            "2:",
            "xor eax, eax",
            "ret",
            "3:",
            out("rax") _,
        );
    }
    #[cfg(target_arch = "aarch64")]
    // SAFETY: the leaf only clears x0 and returns through x30.
    unsafe {
        std::arch::asm!(
            "movz x0, #0x5eed",
            "bl 2f",
            "nop",
            "bl 2f",
            "b 3f",
            "2:",
            "mov x0, xzr",
            "ret",
            "3:",
            out("x0") _,
            out("x30") _,
        );
    }
}

/// Linux x86-64 only: a `getpid` system call between two markers, starting
/// at `90 b8 ee 5e ed 5e b8`.
///
/// ```text
/// +0   nop
/// +1   mov eax, 0x5eed5eee
/// +6   mov eax, 39
/// +11  syscall
/// +13  nop
/// ```
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
#[inline(never)]
fn run_syscall()
{
    // SAFETY: getpid takes no arguments and the clobbered registers are declared.
    unsafe {
        std::arch::asm!(
            "nop",
            "mov eax, 0x5eed5eee",
            "mov eax, 39",
            "syscall",
            "nop",
            out("rax") _,
            out("rcx") _,
            out("r11") _,
        );
    }
}

fn main()
{
    run_sequence();
    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    run_syscall();
    println!("sequence done");
}
