//! # macOS Register Access
//!
//! Reads and writes thread state with `thread_get_state()`/`thread_set_state()`
//! and converts it to the canonical [`RegisterFile`] order.
//!
//! - **x86-64**: `x86_THREAD_STATE64`: `rax rbx rcx rdx rdi rsi rbp rsp r8-r15 rip rflags cs fs gs`
//! - **ARM64**: `ARM_THREAD_STATE64`: `x0-x28 fp lr sp pc cpsr pad`
//!
//! `ss`, `ds`, `es`, `fs_base` and `gs_base` are not part of the Mach x86-64
//! state; they read as zero and writes to them are ignored.
//!
//! Single-stepping is a register operation as well: the trap flag (`RFLAGS.TF`)
//! on x86-64, `MDSCR_EL1.SS` in the debug state on ARM64.
//!
//! ## References
//!
//! - [thread_get_state(3) man page](https://developer.apple.com/documentation/kernel/1418576-thread_get_state/)
//! - [XNU `mach/i386/_structs.h` and `mach/arm/_structs.h`](https://github.com/apple-oss-distributions/xnu)

use libc::{natural_t, thread_act_t};

use crate::error::{DebuggerError, Result};
use crate::platform::macos::error::check;
use crate::platform::macos::ffi::{self, thread_state};
use crate::types::{Architecture, RegisterFile};

fn get_state<const N: usize>(thread: thread_act_t, flavor: libc::c_int) -> Result<[natural_t; N]>
{
    let mut state = [0 as natural_t; N];
    let mut count = N as libc::mach_msg_type_number_t;
    // SAFETY: state holds `count` natural_t words.
    check(unsafe { ffi::thread_get_state(thread, flavor, state.as_mut_ptr(), &mut count) })?;
    Ok(state)
}

fn set_state<const N: usize>(thread: thread_act_t, flavor: libc::c_int, state: &[natural_t; N]) -> Result<()>
{
    // SAFETY: state holds N natural_t words.
    check(unsafe { ffi::thread_set_state(thread, flavor, state.as_ptr(), N as libc::mach_msg_type_number_t) })
}

fn word64(state: &[natural_t], index: usize) -> u64
{
    u64::from(state[index * 2]) | (u64::from(state[index * 2 + 1]) << 32)
}

fn set_word64(state: &mut [natural_t], index: usize, value: u64)
{
    state[index * 2] = (value & 0xFFFF_FFFF) as natural_t;
    state[index * 2 + 1] = (value >> 32) as natural_t;
}

#[cfg(target_arch = "x86_64")]
mod arch
{
    use super::*;

    const X86_COUNT: usize = thread_state::X86_THREAD_STATE64_COUNT as usize;
    const RFLAGS: usize = 17;
    const TRAP_FLAG: u64 = 1 << 8;

    /// Canonical index of each Mach state word, in Mach order.
    const MACH_TO_CANONICAL: [usize; 21] = [0, 1, 2, 3, 5, 4, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 22, 23];

    pub const ARCHITECTURE: Architecture = Architecture::X86_64;

    pub fn read(thread: thread_act_t) -> Result<RegisterFile>
    {
        let state: [natural_t; X86_COUNT] = get_state(thread, thread_state::X86_THREAD_STATE64)?;
        let mut values = vec![0u64; RegisterFile::names(ARCHITECTURE).len()];
        for (mach, &canonical) in MACH_TO_CANONICAL.iter().enumerate() {
            values[canonical] = word64(&state, mach);
        }
        RegisterFile::from_values(ARCHITECTURE, values)
            .ok_or_else(|| DebuggerError::UnsupportedArchitecture("x86_64 register layout".into()))
    }

    pub fn write(thread: thread_act_t, file: &RegisterFile) -> Result<()>
    {
        let mut state: [natural_t; X86_COUNT] = get_state(thread, thread_state::X86_THREAD_STATE64)?;
        for (mach, &canonical) in MACH_TO_CANONICAL.iter().enumerate() {
            set_word64(&mut state, mach, file.values()[canonical]);
        }
        set_state(thread, thread_state::X86_THREAD_STATE64, &state)
    }

    pub fn set_single_step(thread: thread_act_t, enabled: bool) -> Result<()>
    {
        let mut state: [natural_t; X86_COUNT] = get_state(thread, thread_state::X86_THREAD_STATE64)?;
        let flags = word64(&state, RFLAGS);
        let flags = if enabled { flags | TRAP_FLAG } else { flags & !TRAP_FLAG };
        set_word64(&mut state, RFLAGS, flags);
        set_state(thread, thread_state::X86_THREAD_STATE64, &state)
    }
}

#[cfg(target_arch = "aarch64")]
mod arch
{
    use super::*;

    const ARM_COUNT: usize = thread_state::ARM_THREAD_STATE64_COUNT as usize;
    const DEBUG_COUNT: usize = thread_state::ARM_DEBUG_STATE64_COUNT as usize;
    // x0-x28, fp, lr, sp, pc
    const WIDE_REGISTERS: usize = 33;
    const CPSR_WORD: usize = 66;
    const MDSCR_INDEX: usize = 64;
    const MDSCR_SS: u64 = 1;

    pub const ARCHITECTURE: Architecture = Architecture::Arm64;

    pub fn read(thread: thread_act_t) -> Result<RegisterFile>
    {
        let state: [natural_t; ARM_COUNT] = get_state(thread, thread_state::ARM_THREAD_STATE64)?;
        let mut values: Vec<u64> = (0..WIDE_REGISTERS).map(|index| word64(&state, index)).collect();
        values.push(u64::from(state[CPSR_WORD]));
        RegisterFile::from_values(ARCHITECTURE, values)
            .ok_or_else(|| DebuggerError::UnsupportedArchitecture("arm64 register layout".into()))
    }

    pub fn write(thread: thread_act_t, file: &RegisterFile) -> Result<()>
    {
        let mut state: [natural_t; ARM_COUNT] = get_state(thread, thread_state::ARM_THREAD_STATE64)?;
        for (index, value) in file.values().iter().take(WIDE_REGISTERS).enumerate() {
            set_word64(&mut state, index, *value);
        }
        state[CPSR_WORD] = (file.values()[WIDE_REGISTERS] & 0xFFFF_FFFF) as natural_t;
        set_state(thread, thread_state::ARM_THREAD_STATE64, &state)
    }

    pub fn set_single_step(thread: thread_act_t, enabled: bool) -> Result<()>
    {
        let mut state: [natural_t; DEBUG_COUNT] = get_state(thread, thread_state::ARM_DEBUG_STATE64)?;
        let mdscr = word64(&state, MDSCR_INDEX);
        let mdscr = if enabled { mdscr | MDSCR_SS } else { mdscr & !MDSCR_SS };
        set_word64(&mut state, MDSCR_INDEX, mdscr);
        set_state(thread, thread_state::ARM_DEBUG_STATE64, &state)
    }
}

/// Architecture of targets this backend can debug.
pub const ARCHITECTURE: Architecture = arch::ARCHITECTURE;

/// General-purpose registers of a suspended thread.
pub fn read_registers(thread: thread_act_t) -> Result<RegisterFile>
{
    arch::read(thread)
}

/// Replace the general-purpose registers of a suspended thread.
pub fn write_registers(thread: thread_act_t, file: &RegisterFile) -> Result<()>
{
    arch::write(thread, file)
}

/// Arm or clear the hardware single-step trap of `thread`.
pub fn set_single_step(thread: thread_act_t, enabled: bool) -> Result<()>
{
    arch::set_single_step(thread, enabled)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_word64_round_trip()
    {
        let mut state = [0 as natural_t; 4];
        set_word64(&mut state, 1, 0x1122_3344_5566_7788);
        assert_eq!(state[2], 0x5566_7788);
        assert_eq!(state[3], 0x1122_3344);
        assert_eq!(word64(&state, 1), 0x1122_3344_5566_7788);
    }
}
