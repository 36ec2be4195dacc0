//! # Windows Register Access
//!
//! `GetThreadContext()`/`SetThreadContext()` on thread handles received with
//! the debug events, converted to the canonical [`RegisterFile`] order.
//!
//! `CONTEXT` must be 16-byte aligned on x86-64, so it is always used through
//! [`AlignedContext`].
//!
//! `fs_base` and `gs_base` are not part of the x86-64 `CONTEXT`; they read as
//! zero and writes to them are ignored.

use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::System::Diagnostics::Debug::{CONTEXT, GetThreadContext, SetThreadContext};

use crate::error::{DebuggerError, Result};
use crate::platform::windows::last_error;
use crate::types::{Architecture, RegisterFile};

#[repr(C, align(16))]
struct AlignedContext(CONTEXT);

impl AlignedContext
{
    fn fetch(thread: HANDLE, flags: u32) -> Result<Self>
    {
        // SAFETY: CONTEXT is plain data; all-zero is a valid value.
        let mut context = AlignedContext(unsafe { std::mem::zeroed() });
        context.0.ContextFlags = flags;
        // SAFETY: context is a live, aligned CONTEXT.
        if unsafe { GetThreadContext(thread, &mut context.0) } == 0 {
            return Err(last_error("GetThreadContext"));
        }
        Ok(context)
    }

    fn store(&self, thread: HANDLE) -> Result<()>
    {
        // SAFETY: the context was filled by GetThreadContext.
        if unsafe { SetThreadContext(thread, &self.0) } == 0 {
            return Err(last_error("SetThreadContext"));
        }
        Ok(())
    }
}

#[cfg(target_arch = "x86_64")]
mod arch
{
    use super::*;

    // CONTEXT_AMD64 | CONTROL | INTEGER | SEGMENTS (winnt.h)
    pub const FLAGS: u32 = 0x0010_0007;
    const TRAP_FLAG: u32 = 1 << 8;

    pub const ARCHITECTURE: Architecture = Architecture::X86_64;

    pub fn to_file(context: &CONTEXT) -> Result<RegisterFile>
    {
        let c = context;
        let values = vec![
            c.Rax,
            c.Rbx,
            c.Rcx,
            c.Rdx,
            c.Rsi,
            c.Rdi,
            c.Rbp,
            c.Rsp,
            c.R8,
            c.R9,
            c.R10,
            c.R11,
            c.R12,
            c.R13,
            c.R14,
            c.R15,
            c.Rip,
            u64::from(c.EFlags),
            u64::from(c.SegCs),
            u64::from(c.SegSs),
            u64::from(c.SegDs),
            u64::from(c.SegEs),
            u64::from(c.SegFs),
            u64::from(c.SegGs),
            0,
            0,
        ];
        RegisterFile::from_values(ARCHITECTURE, values)
            .ok_or_else(|| DebuggerError::UnsupportedArchitecture("x86_64 register layout".into()))
    }

    pub fn apply(file: &RegisterFile, context: &mut CONTEXT)
    {
        let v = file.values();
        let c = context;
        c.Rax = v[0];
        c.Rbx = v[1];
        c.Rcx = v[2];
        c.Rdx = v[3];
        c.Rsi = v[4];
        c.Rdi = v[5];
        c.Rbp = v[6];
        c.Rsp = v[7];
        c.R8 = v[8];
        c.R9 = v[9];
        c.R10 = v[10];
        c.R11 = v[11];
        c.R12 = v[12];
        c.R13 = v[13];
        c.R14 = v[14];
        c.R15 = v[15];
        c.Rip = v[16];
        c.EFlags = v[17] as u32;
        c.SegCs = v[18] as u16;
        c.SegSs = v[19] as u16;
        c.SegDs = v[20] as u16;
        c.SegEs = v[21] as u16;
        c.SegFs = v[22] as u16;
        c.SegGs = v[23] as u16;
    }

    pub fn set_single_step(context: &mut CONTEXT, enabled: bool)
    {
        if enabled {
            context.EFlags |= TRAP_FLAG;
        } else {
            context.EFlags &= !TRAP_FLAG;
        }
    }
}

#[cfg(target_arch = "aarch64")]
mod arch
{
    use super::*;

    // CONTEXT_ARM64 | CONTROL | INTEGER (winnt.h)
    pub const FLAGS: u32 = 0x0040_0003;
    // PSTATE.SS
    const SINGLE_STEP: u32 = 1 << 21;

    pub const ARCHITECTURE: Architecture = Architecture::Arm64;

    pub fn to_file(context: &CONTEXT) -> Result<RegisterFile>
    {
        // SAFETY: both views of the union cover the same 31 registers.
        let mut values: Vec<u64> = unsafe { context.Anonymous.X }.to_vec();
        values.push(context.Sp);
        values.push(context.Pc);
        values.push(u64::from(context.Cpsr));
        RegisterFile::from_values(ARCHITECTURE, values)
            .ok_or_else(|| DebuggerError::UnsupportedArchitecture("arm64 register layout".into()))
    }

    pub fn apply(file: &RegisterFile, context: &mut CONTEXT)
    {
        let v = file.values();
        let mut x = [0u64; 31];
        x.copy_from_slice(&v[..31]);
        context.Anonymous.X = x;
        context.Sp = v[31];
        context.Pc = v[32];
        context.Cpsr = v[33] as u32;
    }

    pub fn set_single_step(context: &mut CONTEXT, enabled: bool)
    {
        if enabled {
            context.Cpsr |= SINGLE_STEP;
        } else {
            context.Cpsr &= !SINGLE_STEP;
        }
    }
}

/// Architecture of targets this backend can debug.
pub const ARCHITECTURE: Architecture = arch::ARCHITECTURE;

/// General-purpose registers of a stopped thread.
pub fn read_registers(thread: HANDLE) -> Result<RegisterFile>
{
    let context = AlignedContext::fetch(thread, arch::FLAGS)?;
    arch::to_file(&context.0)
}

/// Replace the general-purpose registers of a stopped thread.
pub fn write_registers(thread: HANDLE, file: &RegisterFile) -> Result<()>
{
    let mut context = AlignedContext::fetch(thread, arch::FLAGS)?;
    arch::apply(file, &mut context.0);
    context.store(thread)
}

/// Arm or clear the single-step trap of `thread`.
pub fn set_single_step(thread: HANDLE, enabled: bool) -> Result<()>
{
    let mut context = AlignedContext::fetch(thread, arch::FLAGS)?;
    arch::set_single_step(&mut context.0, enabled);
    context.store(thread)
}

#[cfg(all(test, target_arch = "x86_64"))]
mod tests
{
    use super::*;

    #[test]
    fn test_context_layout_round_trip()
    {
        // SAFETY: CONTEXT is plain data.
        let mut context: CONTEXT = unsafe { std::mem::zeroed() };
        context.Rax = 1;
        context.Rsi = 5;
        context.Rip = 0x1400_0100;
        context.EFlags = 0x246;
        context.SegCs = 0x33;

        let file = arch::to_file(&context).unwrap();
        assert_eq!(file.get("rsi"), Some(5));
        assert_eq!(file.instruction_pointer(), 0x1400_0100);
        assert_eq!(file.get("cs"), Some(0x33));
        assert_eq!(file.get("gs_base"), Some(0));

        // SAFETY: CONTEXT is plain data.
        let mut copy: CONTEXT = unsafe { std::mem::zeroed() };
        arch::apply(&file, &mut copy);
        assert_eq!(copy.Rip, context.Rip);
        assert_eq!(copy.EFlags, context.EFlags);

        arch::set_single_step(&mut copy, true);
        assert_eq!(copy.EFlags & 0x100, 0x100);
        arch::set_single_step(&mut copy, false);
        assert_eq!(copy.EFlags, 0x246);
    }
}
