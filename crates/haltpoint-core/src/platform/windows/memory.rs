//! # Windows Memory Operations
//!
//! - **ReadProcessMemory()** / **WriteProcessMemory()**: byte access; the
//!   latter lifts page protection on image pages by itself
//! - **FlushInstructionCache()**: after every write, since writes are
//!   usually breakpoint patches
//! - **VirtualQueryEx()**: the memory map

use std::ffi::c_void;

use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::System::Diagnostics::Debug::{FlushInstructionCache, ReadProcessMemory, WriteProcessMemory};
use windows_sys::Win32::System::Memory::{MEM_COMMIT, MEM_IMAGE, MEMORY_BASIC_INFORMATION, VirtualQueryEx};

use crate::error::{DebuggerError, Result};
use crate::types::{Address, MemoryRegion};

/// Read exactly `len` bytes at `address`.
pub fn read_memory(process: HANDLE, address: Address, len: usize) -> Result<Vec<u8>>
{
    let mut buffer = vec![0u8; len];
    let mut read = 0usize;
    // SAFETY: the destination is a live local buffer of `len` bytes.
    let ok = unsafe {
        ReadProcessMemory(
            process,
            address.value() as usize as *const c_void,
            buffer.as_mut_ptr().cast::<c_void>(),
            len,
            &mut read,
        )
    };
    if ok == 0 || read != len {
        return Err(DebuggerError::MemoryAccess { address, len });
    }
    Ok(buffer)
}

/// Write all of `data` at `address`.
pub fn write_memory(process: HANDLE, address: Address, data: &[u8]) -> Result<()>
{
    let mut written = 0usize;
    // SAFETY: data is a live slice of data.len() bytes.
    let ok = unsafe {
        WriteProcessMemory(
            process,
            address.value() as usize as *const c_void,
            data.as_ptr().cast::<c_void>(),
            data.len(),
            &mut written,
        )
    };
    if ok == 0 || written != data.len() {
        return Err(DebuggerError::MemoryAccess {
            address,
            len: data.len(),
        });
    }
    // SAFETY: plain call on a valid process handle.
    unsafe {
        FlushInstructionCache(process, address.value() as usize as *const c_void, data.len());
    }
    Ok(())
}

/// Committed regions of the whole address space.
pub fn memory_regions(process: HANDLE) -> Result<Vec<MemoryRegion>>
{
    let mut regions = Vec::new();
    let mut cursor = 0usize;
    loop {
        // SAFETY: MEMORY_BASIC_INFORMATION is plain data.
        let mut info: MEMORY_BASIC_INFORMATION = unsafe { std::mem::zeroed() };
        // SAFETY: info is a live local of the advertised size.
        let size = unsafe {
            VirtualQueryEx(
                process,
                cursor as *const c_void,
                &mut info,
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        if size == 0 || info.RegionSize == 0 {
            break;
        }
        let start = info.BaseAddress as usize;
        let end = start.saturating_add(info.RegionSize);
        if info.State == MEM_COMMIT {
            regions.push(MemoryRegion::new(
                Address::new(start as u64),
                Address::new(end as u64),
                protection_to_permissions(info.Protect),
                (info.Type == MEM_IMAGE).then(|| "[image]".to_string()),
            ));
        }
        if end <= cursor {
            break;
        }
        cursor = end;
    }
    Ok(regions)
}

/// `PAGE_*` protection constant to an `rwx` string.
fn protection_to_permissions(protect: u32) -> String
{
    // PAGE_GUARD, PAGE_NOCACHE and PAGE_WRITECOMBINE are modifiers above the low byte.
    let perms = match protect & 0xFF {
        0x02 => "r--",
        0x04 | 0x08 => "rw-",
        0x10 => "--x",
        0x20 => "r-x",
        0x40 | 0x80 => "rwx",
        _ => "---",
    };
    perms.to_string()
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_protection_to_permissions()
    {
        assert_eq!(protection_to_permissions(0x20), "r-x");
        assert_eq!(protection_to_permissions(0x04 | 0x100), "rw-");
        assert_eq!(protection_to_permissions(0x01), "---");
    }

    #[test]
    fn test_read_own_memory()
    {
        use windows_sys::Win32::System::Threading::GetCurrentProcess;

        let value: u64 = 0x1122_3344_5566_7788;
        let address = Address::new(&value as *const u64 as u64);
        // SAFETY: pseudo handle of the current process.
        let process = unsafe { GetCurrentProcess() };
        assert_eq!(read_memory(process, address, 8).unwrap(), value.to_ne_bytes());
        assert!(memory_regions(process).unwrap().iter().any(|region| region.start <= address && address < region.end));
    }
}
