//! # Linux Register Access
//!
//! Conversion between the kernel's `user_regs_struct` and [`RegisterFile`].
//!
//! - **x86-64**: `PTRACE_GETREGS`/`PTRACE_SETREGS` through `nix`
//! - **AArch64**: `PTRACE_GETREGSET`/`PTRACE_SETREGSET` with `NT_PRSTATUS`
//!
//! Writes are read-modify-write: fields the register file does not model
//! (`orig_rax`, for instance) keep their current value.

use nix::unistd::Pid;

use crate::error::Result;
use crate::types::RegisterFile;

#[cfg(target_arch = "x86_64")]
mod arch
{
    use nix::sys::ptrace;
    use nix::unistd::Pid;

    use crate::error::{DebuggerError, Result};
    use crate::types::{Architecture, RegisterFile};

    pub fn to_register_file(regs: &libc::user_regs_struct) -> Option<RegisterFile>
    {
        let values = vec![
            regs.rax,
            regs.rbx,
            regs.rcx,
            regs.rdx,
            regs.rsi,
            regs.rdi,
            regs.rbp,
            regs.rsp,
            regs.r8,
            regs.r9,
            regs.r10,
            regs.r11,
            regs.r12,
            regs.r13,
            regs.r14,
            regs.r15,
            regs.rip,
            regs.eflags,
            regs.cs,
            regs.ss,
            regs.ds,
            regs.es,
            regs.fs,
            regs.gs,
            regs.fs_base,
            regs.gs_base,
        ];
        RegisterFile::from_values(Architecture::X86_64, values)
    }

    pub fn apply(file: &RegisterFile, regs: &mut libc::user_regs_struct)
    {
        let fields: [&mut u64; 26] = [
            &mut regs.rax,
            &mut regs.rbx,
            &mut regs.rcx,
            &mut regs.rdx,
            &mut regs.rsi,
            &mut regs.rdi,
            &mut regs.rbp,
            &mut regs.rsp,
            &mut regs.r8,
            &mut regs.r9,
            &mut regs.r10,
            &mut regs.r11,
            &mut regs.r12,
            &mut regs.r13,
            &mut regs.r14,
            &mut regs.r15,
            &mut regs.rip,
            &mut regs.eflags,
            &mut regs.cs,
            &mut regs.ss,
            &mut regs.ds,
            &mut regs.es,
            &mut regs.fs,
            &mut regs.gs,
            &mut regs.fs_base,
            &mut regs.gs_base,
        ];
        for (field, value) in fields.into_iter().zip(file.values()) {
            *field = *value;
        }
    }

    pub fn read(tid: Pid) -> Result<RegisterFile>
    {
        let regs = ptrace::getregs(tid)?;
        to_register_file(&regs).ok_or_else(|| DebuggerError::UnsupportedArchitecture("x86_64 register layout".into()))
    }

    pub fn write(tid: Pid, file: &RegisterFile) -> Result<()>
    {
        let mut regs = ptrace::getregs(tid)?;
        apply(file, &mut regs);
        ptrace::setregs(tid, regs)?;
        Ok(())
    }
}

#[cfg(target_arch = "aarch64")]
mod arch
{
    use nix::errno::Errno;
    use nix::unistd::Pid;

    use crate::error::{DebuggerError, Result};
    use crate::types::{Architecture, RegisterFile};

    const NT_PRSTATUS: libc::c_int = 1;

    pub fn to_register_file(regs: &libc::user_regs_struct) -> Option<RegisterFile>
    {
        let mut values = regs.regs.to_vec();
        values.extend([regs.sp, regs.pc, regs.pstate]);
        RegisterFile::from_values(Architecture::Arm64, values)
    }

    pub fn apply(file: &RegisterFile, regs: &mut libc::user_regs_struct)
    {
        let values = file.values();
        regs.regs.copy_from_slice(&values[..31]);
        regs.sp = values[31];
        regs.pc = values[32];
        regs.pstate = values[33];
    }

    fn regset(request: libc::c_uint, tid: Pid, regs: &mut libc::user_regs_struct) -> Result<()>
    {
        let mut iov = libc::iovec {
            iov_base: std::ptr::from_mut(regs).cast(),
            iov_len: std::mem::size_of::<libc::user_regs_struct>(),
        };
        // SAFETY: iov points at a live user_regs_struct of the advertised size.
        let ret = unsafe { libc::ptrace(request, tid.as_raw(), NT_PRSTATUS, std::ptr::from_mut(&mut iov)) };
        if ret == -1 {
            return Err(Errno::last().into());
        }
        Ok(())
    }

    pub fn read(tid: Pid) -> Result<RegisterFile>
    {
        // SAFETY: user_regs_struct is plain old data.
        let mut regs: libc::user_regs_struct = unsafe { std::mem::zeroed() };
        regset(libc::PTRACE_GETREGSET, tid, &mut regs)?;
        to_register_file(&regs).ok_or_else(|| DebuggerError::UnsupportedArchitecture("aarch64 register layout".into()))
    }

    pub fn write(tid: Pid, file: &RegisterFile) -> Result<()>
    {
        // SAFETY: user_regs_struct is plain old data.
        let mut regs: libc::user_regs_struct = unsafe { std::mem::zeroed() };
        regset(libc::PTRACE_GETREGSET, tid, &mut regs)?;
        apply(file, &mut regs);
        regset(libc::PTRACE_SETREGSET, tid, &mut regs)
    }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
mod arch
{
    use nix::unistd::Pid;

    use crate::error::{DebuggerError, Result};
    use crate::types::RegisterFile;

    fn unsupported() -> DebuggerError
    {
        DebuggerError::UnsupportedArchitecture(std::env::consts::ARCH.into())
    }

    pub fn read(_tid: Pid) -> Result<RegisterFile>
    {
        Err(unsupported())
    }

    pub fn write(_tid: Pid, _file: &RegisterFile) -> Result<()>
    {
        Err(unsupported())
    }
}

/// General-purpose registers of a stopped thread.
pub fn read_registers(tid: Pid) -> Result<RegisterFile>
{
    arch::read(tid)
}

/// Replace the general-purpose registers of a stopped thread.
pub fn write_registers(tid: Pid, file: &RegisterFile) -> Result<()>
{
    arch::write(tid, file)
}

#[cfg(all(test, target_arch = "x86_64"))]
mod tests
{
    use super::arch::{apply, to_register_file};

    #[test]
    fn test_x86_64_layout_round_trip()
    {
        // SAFETY: user_regs_struct is plain old data.
        let mut regs: libc::user_regs_struct = unsafe { std::mem::zeroed() };
        regs.rax = 1;
        regs.rip = 0x40_1000;
        regs.rsp = 0x7ffd_0000;
        regs.orig_rax = 60;
        regs.gs_base = 7;

        let mut file = to_register_file(&regs).unwrap();
        assert_eq!(file.value("rax"), 1);
        assert_eq!(file.instruction_pointer(), 0x40_1000);
        assert_eq!(file.stack_pointer(), 0x7ffd_0000);
        assert_eq!(file.value("gs_base"), 7);

        file.set("rbx", 0xdead_beef).unwrap();
        apply(&file, &mut regs);
        assert_eq!(regs.rbx, 0xdead_beef);
        assert_eq!(regs.orig_rax, 60);
    }
}
