//! # macOS Memory Operations
//!
//! Memory reading and writing using Mach APIs on the task port obtained from
//! `task_for_pid()`.
//!
//! - **mach_vm_read_overwrite()**: read into a local buffer, in bounded chunks
//! - **vm_write()**: write into the target
//! - **mach_vm_protect()**: make code pages writable for the duration of a write
//! - **mach_vm_region_recurse()**: walk the memory map
//!
//! ## References
//!
//! - [mach_vm_read_overwrite](https://developer.apple.com/documentation/kernel/1402127-mach_vm_read_overwrite)
//! - [vm_write(3) man page](https://developer.apple.com/documentation/kernel/1585462-vm_write/)
//! - [mach_vm_protect(3) man page](https://developer.apple.com/documentation/kernel/1402149-mach_vm_protect/)

use std::cmp::min;

use libc::{c_int, mach_msg_type_number_t, mach_port_t, vm_address_t, vm_map_t, vm_offset_t};
use mach2::kern_return::KERN_SUCCESS;
use mach2::vm::{mach_vm_protect, mach_vm_read_overwrite, mach_vm_region_recurse};
use mach2::vm_prot::{VM_PROT_COPY, VM_PROT_EXECUTE, VM_PROT_READ, VM_PROT_WRITE};
use mach2::vm_region::{VM_REGION_SUBMAP_SHORT_INFO_COUNT_64, vm_region_recurse_info_t, vm_region_submap_short_info_data_64_t};
use mach2::vm_statistics::{
    VM_MEMORY_MALLOC, VM_MEMORY_MALLOC_HUGE, VM_MEMORY_MALLOC_LARGE, VM_MEMORY_MALLOC_MEDIUM, VM_MEMORY_MALLOC_SMALL,
    VM_MEMORY_MALLOC_TINY, VM_MEMORY_STACK,
};
use mach2::vm_types::{mach_vm_address_t, mach_vm_size_t, natural_t};
use once_cell::sync::Lazy;
use tracing::trace;

use crate::error::{DebuggerError, Result};
use crate::platform::macos::ffi;
use crate::types::{Address, MemoryRegion};

const MAX_VM_READ_CHUNK: usize = 64 * 1024;

static SYSTEM_PAGE_SIZE: Lazy<u64> = Lazy::new(|| {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    u64::try_from(size).ok().filter(|&size| size > 0).unwrap_or(4096)
});

#[derive(Debug, Clone, Copy)]
struct RegionInfo
{
    start: mach_vm_address_t,
    size: mach_vm_size_t,
    protection: c_int,
    user_tag: u32,
}

/// Read exactly `len` bytes at `address`.
pub fn read_memory(task: mach_port_t, address: Address, len: usize) -> Result<Vec<u8>>
{
    let mut buffer = vec![0u8; len];
    let mut total = 0usize;
    while total < len {
        let chunk = min(MAX_VM_READ_CHUNK, len - total);
        let mut actual: mach_vm_size_t = 0;
        // SAFETY: the destination is a live local buffer of at least `chunk` bytes.
        let result = unsafe {
            mach_vm_read_overwrite(
                task as vm_map_t,
                address.value() + total as u64,
                chunk as mach_vm_size_t,
                buffer[total..].as_mut_ptr() as mach_vm_address_t,
                &mut actual,
            )
        };
        if result != KERN_SUCCESS || actual == 0 {
            return Err(DebuggerError::MemoryAccess { address, len });
        }
        total += actual as usize;
    }
    Ok(buffer)
}

/// Write all of `data` at `address`, lifting write protection on code pages
/// for the duration of the write.
pub fn write_memory(task: mach_port_t, address: Address, data: &[u8]) -> Result<()>
{
    let failure = || DebuggerError::MemoryAccess {
        address,
        len: data.len(),
    };
    let region = region_for_address(task, address)?.ok_or_else(failure)?;
    let end = address.range_end(data.len()).ok_or_else(failure)?;
    if end.value() > region.start + region.size {
        return Err(failure());
    }

    let (page, pages) = aligned_range(address, data.len());
    let lifted = region.protection & VM_PROT_WRITE == 0;
    if lifted {
        // VM_PROT_COPY gives the target a private writable copy of a shared text page.
        // SAFETY: plain Mach call on a valid task port.
        let result = unsafe { mach_vm_protect(task as vm_map_t, page, pages, 0, VM_PROT_READ | VM_PROT_WRITE | VM_PROT_COPY) };
        if result != KERN_SUCCESS {
            trace!(%address, result, "mach_vm_protect failed");
            return Err(failure());
        }
    }

    // SAFETY: data is a live slice of data.len() bytes.
    let result = unsafe {
        ffi::vm_write(
            task as vm_map_t,
            address.value() as vm_address_t,
            data.as_ptr() as vm_offset_t,
            data.len() as mach_msg_type_number_t,
        )
    };

    if lifted {
        // SAFETY: restores the protection read above.
        unsafe { mach_vm_protect(task as vm_map_t, page, pages, 0, region.protection) };
    }

    if result == KERN_SUCCESS {
        Ok(())
    } else {
        Err(failure())
    }
}

/// Walk the whole address space of `task`.
pub fn memory_regions(task: mach_port_t) -> Result<Vec<MemoryRegion>>
{
    let mut regions = Vec::new();
    let mut address: mach_vm_address_t = 0;
    while let Some(info) = next_region(task, address)? {
        regions.push(MemoryRegion::new(
            Address::new(info.start),
            Address::new(info.start + info.size),
            protection_to_permissions(info.protection),
            region_name(info.user_tag),
        ));
        address = info.start + info.size;
    }
    Ok(regions)
}

fn region_for_address(task: mach_port_t, address: Address) -> Result<Option<RegionInfo>>
{
    Ok(next_region(task, address.value())?.filter(|info| info.start <= address.value()))
}

/// First region at or above `address`.
fn next_region(task: mach_port_t, address: mach_vm_address_t) -> Result<Option<RegionInfo>>
{
    let mut target = address;
    let mut depth: natural_t = 0;
    loop {
        let mut size: mach_vm_size_t = 0;
        let mut info = vm_region_submap_short_info_data_64_t::default();
        let mut info_count = VM_REGION_SUBMAP_SHORT_INFO_COUNT_64;
        // SAFETY: info and info_count describe a live local struct.
        let result = unsafe {
            mach_vm_region_recurse(
                task as vm_map_t,
                &mut target,
                &mut size,
                &mut depth,
                &mut info as *mut _ as vm_region_recurse_info_t,
                &mut info_count,
            )
        };
        if result == libc::KERN_INVALID_ADDRESS {
            return Ok(None);
        }
        crate::platform::macos::error::check(result)?;
        if info.is_submap != 0 {
            depth += 1;
            continue;
        }
        return Ok(Some(RegionInfo {
            start: target,
            size,
            protection: info.protection,
            user_tag: info.user_tag,
        }));
    }
}

fn protection_to_permissions(protection: c_int) -> String
{
    let flag = |bit: c_int, c: char| if protection & bit != 0 { c } else { '-' };
    [flag(VM_PROT_READ, 'r'), flag(VM_PROT_WRITE, 'w'), flag(VM_PROT_EXECUTE, 'x')]
        .iter()
        .collect()
}

fn region_name(tag: u32) -> Option<String>
{
    match tag {
        VM_MEMORY_STACK => Some("[stack]".to_string()),
        VM_MEMORY_MALLOC
        | VM_MEMORY_MALLOC_SMALL
        | VM_MEMORY_MALLOC_MEDIUM
        | VM_MEMORY_MALLOC_LARGE
        | VM_MEMORY_MALLOC_HUGE
        | VM_MEMORY_MALLOC_TINY => Some("[heap]".to_string()),
        _ => None,
    }
}

fn aligned_range(address: Address, len: usize) -> (mach_vm_address_t, mach_vm_size_t)
{
    let page_size = *SYSTEM_PAGE_SIZE;
    let start = address.value() & !(page_size - 1);
    let end = (address.value() + len as u64 + page_size - 1) & !(page_size - 1);
    (start, end - start)
}
