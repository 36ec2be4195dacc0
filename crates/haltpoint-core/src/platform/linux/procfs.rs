//! # `/proc` Access
//!
//! Everything the Linux backend learns about a target without `ptrace`:
//!
//! - `/proc/<pid>/mem`: random access to the address space, including
//!   read-only code pages (the kernel forces the write for the tracer)
//! - `/proc/<pid>/maps`: the memory map
//! - `/proc/<pid>/task`: the thread list, used on attach
//! - `/proc/<pid>/auxv`: the auxiliary vector, for `AT_ENTRY`
//!
//! ## References
//!
//! - [proc(5) man page](https://man7.org/linux/man-pages/man5/proc.5.html)
//! - [getauxval(3) man page](https://man7.org/linux/man-pages/man3/getauxval.3.html)

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::FileExt;

use crate::error::{DebuggerError, Result};
use crate::types::{Address, MemoryRegion};

const AT_NULL: u64 = 0;
const AT_ENTRY: u64 = 9;

/// Open handle on `/proc/<pid>/mem`.
#[derive(Debug)]
pub struct ProcessMemory
{
    file: File,
}

impl ProcessMemory
{
    /// Open the address space of `pid` for reading and writing.
    pub fn open(pid: i32) -> Result<Self>
    {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(format!("/proc/{pid}/mem"))?;
        Ok(Self { file })
    }

    /// Read exactly `len` bytes at `address`.
    pub fn read(&self, address: Address, len: usize) -> Result<Vec<u8>>
    {
        let mut buffer = vec![0u8; len];
        self.file
            .read_exact_at(&mut buffer, address.value())
            .map_err(|_| DebuggerError::MemoryAccess { address, len })?;
        Ok(buffer)
    }

    /// Write all of `data` at `address`.
    pub fn write(&self, address: Address, data: &[u8]) -> Result<()>
    {
        self.file
            .write_all_at(data, address.value())
            .map_err(|_| DebuggerError::MemoryAccess {
                address,
                len: data.len(),
            })
    }
}

/// Parse `/proc/<pid>/maps`.
pub fn memory_regions(pid: i32) -> Result<Vec<MemoryRegion>>
{
    let maps = fs::read_to_string(format!("/proc/{pid}/maps"))?;
    Ok(maps.lines().filter_map(parse_maps_line).collect())
}

/// Parse one line of a maps file:
///
/// ```text
/// 55d0c3a00000-55d0c3a02000 r-xp 00002000 08:01 1835016    /usr/bin/cat
/// ```
pub fn parse_maps_line(line: &str) -> Option<MemoryRegion>
{
    let mut fields = line.split_whitespace();
    let (start, end) = fields.next()?.split_once('-')?;
    let start = u64::from_str_radix(start, 16).ok()?;
    let end = u64::from_str_radix(end, 16).ok()?;
    let permissions = fields.next()?.to_string();
    // offset, device, inode
    let name = fields.nth(3).map(|first| {
        let rest: Vec<&str> = fields.collect();
        if rest.is_empty() {
            first.to_string()
        } else {
            format!("{first} {}", rest.join(" "))
        }
    });
    Some(MemoryRegion::new(Address::new(start), Address::new(end), permissions, name))
}

/// Thread ids listed under `/proc/<pid>/task`, sorted, leader first.
pub fn task_ids(pid: i32) -> Result<Vec<i32>>
{
    let mut tids = Vec::new();
    for entry in fs::read_dir(format!("/proc/{pid}/task"))? {
        if let Some(tid) = entry?.file_name().to_str().and_then(|name| name.parse::<i32>().ok()) {
            tids.push(tid);
        }
    }
    tids.sort_unstable_by_key(|&tid| (tid != pid, tid));
    Ok(tids)
}

/// Runtime entry point of the main executable, from the auxiliary vector.
pub fn entry_point(pid: i32) -> Result<Option<Address>>
{
    let auxv = fs::read(format!("/proc/{pid}/auxv"))?;
    Ok(auxv_entry(&auxv))
}

/// Find `AT_ENTRY` in a raw native-endian auxiliary vector.
pub fn auxv_entry(auxv: &[u8]) -> Option<Address>
{
    const WORD: usize = std::mem::size_of::<usize>();

    let word = |bytes: &[u8]| -> u64 {
        let mut raw = [0u8; WORD];
        raw.copy_from_slice(bytes);
        usize::from_ne_bytes(raw) as u64
    };

    for pair in auxv.chunks_exact(WORD * 2) {
        let key = word(&pair[..WORD]);
        let value = word(&pair[WORD..]);
        match key {
            AT_NULL => break,
            AT_ENTRY => return Some(Address::new(value)),
            _ => {}
        }
    }
    None
}

/// Whether `pid` names a live process.
pub fn process_exists(pid: i32) -> bool
{
    fs::metadata(format!("/proc/{pid}")).is_ok()
}
