//! Software breakpoint bookkeeping.
//!
//! The table owns the list of breakpoints and the bytes each trap replaced.
//! Installing and lifting traps goes through the
//! [`DebugBackend`](crate::backend::DebugBackend) memory primitives, so the
//! same table works on every platform.
//!
//! ## Invariants
//!
//! - at most one breakpoint per address; adding twice returns the existing id
//!   and never saves the trap opcode as "original" bytes
//! - address zero and unreadable addresses are refused without error
//! - memory reads through the session never show trap opcodes, and memory
//!   writes over an installed trap update the saved bytes instead of the trap

use std::collections::BTreeMap;
use std::fmt;

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::backend::DebugBackend;
use crate::error::Result;
use crate::types::Address;

/// Longest trap instruction of any supported architecture.
const MAX_TRAP_LEN: u64 = 4;

/// Unique identifier for a breakpoint managed by the debugger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakpointId(u64);

impl BreakpointId
{
    /// Create a new identifier from a raw value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self
    {
        Self(value)
    }

    /// Get the raw numeric representation (useful for logging / errors).
    #[must_use]
    pub const fn raw(self) -> u64
    {
        self.0
    }
}

impl fmt::Display for BreakpointId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "#{}", self.0)
    }
}

/// Public information about a breakpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointInfo
{
    pub id: BreakpointId,
    pub address: Address,
    pub enabled: bool,
    pub hit_count: u64,
}

#[derive(Debug, Clone)]
struct Entry
{
    info: BreakpointInfo,
    original: SmallVec<[u8; 4]>,
    trap: &'static [u8],
    /// Whether the trap opcode is currently in target memory.
    inserted: bool,
}

impl Entry
{
    fn end(&self) -> u64
    {
        self.info.address.value().saturating_add(self.original.len() as u64)
    }
}

/// Address-keyed set of software breakpoints.
#[derive(Debug, Default)]
pub struct BreakpointTable
{
    next_id: u64,
    entries: BTreeMap<Address, Entry>,
}

impl BreakpointTable
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    fn allocate_id(&mut self) -> BreakpointId
    {
        self.next_id = self.next_id.wrapping_add(1);
        BreakpointId::from_raw(self.next_id)
    }

    /// Install a breakpoint at `address`.
    ///
    /// Returns `None` (and changes nothing) for address zero or when the
    /// original bytes cannot be read or the trap cannot be written.
    pub fn add(&mut self, backend: &mut dyn DebugBackend, address: Address) -> Option<BreakpointId>
    {
        if address.is_null() {
            debug!("Ignoring breakpoint at null address");
            return None;
        }
        if let Some(entry) = self.entries.get(&address) {
            return Some(entry.info.id);
        }

        let trap = backend.architecture().trap_instruction();
        let original = match backend.read_memory(address, trap.len()) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(%address, error = %err, "Ignoring breakpoint at unreadable address");
                return None;
            }
        };
        if let Err(err) = backend.write_memory(address, trap) {
            warn!(%address, error = %err, "Failed to insert breakpoint trap");
            return None;
        }

        let id = self.allocate_id();
        self.entries.insert(
            address,
            Entry {
                info: BreakpointInfo {
                    id,
                    address,
                    enabled: true,
                    hit_count: 0,
                },
                original: SmallVec::from_vec(original),
                trap,
                inserted: true,
            },
        );
        debug!(%address, %id, "Breakpoint installed");
        Some(id)
    }

    /// Remove the breakpoint at `address`, restoring the original bytes.
    ///
    /// Returns `false` when there is none.
    pub fn remove(&mut self, backend: &mut dyn DebugBackend, address: Address) -> bool
    {
        let Some(entry) = self.entries.remove(&address) else {
            return false;
        };
        if entry.inserted {
            if let Err(err) = backend.write_memory(address, &entry.original) {
                warn!(%address, error = %err, "Failed to restore original bytes");
            }
        }
        debug!(%address, id = %entry.info.id, "Breakpoint removed");
        true
    }

    /// Remove every breakpoint, restoring original bytes.
    pub fn remove_all(&mut self, backend: &mut dyn DebugBackend)
    {
        let addresses: Vec<Address> = self.entries.keys().copied().collect();
        for address in addresses {
            self.remove(backend, address);
        }
    }

    /// Drop every record without touching memory (the process is gone).
    pub fn forget_all(&mut self)
    {
        self.entries.clear();
    }

    /// Temporarily disable the breakpoint at `address`.
    pub fn disable(&mut self, backend: &mut dyn DebugBackend, address: Address) -> Result<bool>
    {
        if !self.entries.contains_key(&address) {
            return Ok(false);
        }
        self.lift(backend, address)?;
        if let Some(entry) = self.entries.get_mut(&address) {
            entry.info.enabled = false;
        }
        Ok(true)
    }

    /// Re-enable a disabled breakpoint.
    pub fn enable(&mut self, backend: &mut dyn DebugBackend, address: Address) -> Result<bool>
    {
        let Some(entry) = self.entries.get_mut(&address) else {
            return Ok(false);
        };
        entry.info.enabled = true;
        self.restore(backend, address)?;
        Ok(true)
    }

    /// Take the trap out of memory without forgetting the breakpoint.
    ///
    /// Used to execute the original instruction when stepping off a
    /// breakpoint. Returns whether a trap was lifted.
    pub fn lift(&mut self, backend: &mut dyn DebugBackend, address: Address) -> Result<bool>
    {
        let Some(entry) = self.entries.get_mut(&address) else {
            return Ok(false);
        };
        if !entry.inserted {
            return Ok(false);
        }
        backend.write_memory(address, &entry.original)?;
        entry.inserted = false;
        Ok(true)
    }

    /// Put a lifted trap back if the breakpoint is still enabled.
    pub fn restore(&mut self, backend: &mut dyn DebugBackend, address: Address) -> Result<()>
    {
        let Some(entry) = self.entries.get_mut(&address) else {
            return Ok(());
        };
        if entry.info.enabled && !entry.inserted {
            backend.write_memory(address, entry.trap)?;
            entry.inserted = true;
        }
        Ok(())
    }

    /// Whether an enabled breakpoint sits at `address`.
    #[must_use]
    pub fn is_enabled_at(&self, address: Address) -> bool
    {
        self.entries.get(&address).is_some_and(|entry| entry.info.enabled)
    }

    /// Whether any breakpoint (enabled or not) sits at `address`.
    #[must_use]
    pub fn contains(&self, address: Address) -> bool
    {
        self.entries.contains_key(&address)
    }

    /// Count a hit of the breakpoint at `address`.
    pub fn record_hit(&mut self, address: Address) -> Option<BreakpointInfo>
    {
        let entry = self.entries.get_mut(&address)?;
        if !entry.info.enabled {
            return None;
        }
        entry.info.hit_count = entry.info.hit_count.saturating_add(1);
        Some(entry.info.clone())
    }

    /// All breakpoints ordered by address.
    #[must_use]
    pub fn list(&self) -> Vec<BreakpointInfo>
    {
        self.entries.values().map(|entry| entry.info.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    fn overlapping(&self, start: u64, end: u64) -> impl Iterator<Item = &Entry>
    {
        let from = Address::new(start.saturating_sub(MAX_TRAP_LEN - 1));
        self.entries
            .range(from..Address::new(end))
            .map(|(_, entry)| entry)
            .filter(move |entry| entry.inserted && entry.end() > start)
    }

    /// Replace trap bytes in a buffer read from `address` with the original
    /// program bytes.
    pub fn mask_read(&self, address: Address, buffer: &mut [u8])
    {
        let start = address.value();
        let end = start.saturating_add(buffer.len() as u64);
        for entry in self.overlapping(start, end) {
            for (offset, byte) in entry.original.iter().enumerate() {
                let at = entry.info.address.value() + offset as u64;
                if (start..end).contains(&at) {
                    buffer[(at - start) as usize] = *byte;
                }
            }
        }
    }

    /// Prepare `data` for writing at `address`.
    ///
    /// Bytes that land on an installed trap are stored as the new original
    /// bytes of that breakpoint, and the returned buffer keeps the trap in
    /// place.
    pub fn patch_write(&mut self, address: Address, data: &[u8]) -> Vec<u8>
    {
        let mut buffer = data.to_vec();
        let start = address.value();
        let end = start.saturating_add(data.len() as u64);
        let keys: Vec<Address> = self.overlapping(start, end).map(|entry| entry.info.address).collect();
        for key in keys {
            let Some(entry) = self.entries.get_mut(&key) else {
                continue;
            };
            for offset in 0..entry.original.len() {
                let at = key.value() + offset as u64;
                if (start..end).contains(&at) {
                    let index = (at - start) as usize;
                    entry.original[offset] = data[index];
                    buffer[index] = entry.trap[offset];
                }
            }
        }
        buffer
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::testing::ScriptedBackend;
    use crate::types::Architecture;

    const CODE: u64 = 0x40_1000;

    fn backend() -> ScriptedBackend
    {
        let mut backend = ScriptedBackend::new(Architecture::X86_64);
        backend.map(CODE, &[0x55, 0x48, 0x89, 0xE5, 0x90, 0x90, 0xC3]);
        backend
    }

    #[test]
    fn test_add_inserts_trap_and_saves_original()
    {
        let mut backend = backend();
        let mut table = BreakpointTable::new();
        let id = table.add(&mut backend, Address::new(CODE)).unwrap();
        assert_eq!(backend.peek(CODE, 1), vec![0xCC]);
        assert_eq!(table.list()[0].id, id);
        assert!(table.is_enabled_at(Address::new(CODE)));

        assert!(table.remove(&mut backend, Address::new(CODE)));
        assert_eq!(backend.peek(CODE, 1), vec![0x55]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_add_is_idempotent()
    {
        let mut backend = backend();
        let mut table = BreakpointTable::new();
        let first = table.add(&mut backend, Address::new(CODE)).unwrap();
        let second = table.add(&mut backend, Address::new(CODE)).unwrap();
        assert_eq!(first, second);
        assert_eq!(table.len(), 1);
        table.remove(&mut backend, Address::new(CODE));
        assert_eq!(backend.peek(CODE, 1), vec![0x55]);
    }

    #[test]
    fn test_null_and_unmapped_addresses_are_refused()
    {
        let mut backend = backend();
        let mut table = BreakpointTable::new();
        assert!(table.add(&mut backend, Address::ZERO).is_none());
        assert!(table.add(&mut backend, Address::new(0xdead_0000)).is_none());
        assert!(!table.remove(&mut backend, Address::ZERO));
        assert!(table.is_empty());
        assert_eq!(backend.writes(), 0);
    }

    #[test]
    fn test_mask_read_hides_traps()
    {
        let mut backend = backend();
        let mut table = BreakpointTable::new();
        table.add(&mut backend, Address::new(CODE + 1));
        let mut raw = backend.peek(CODE, 4);
        assert_eq!(raw[1], 0xCC);
        table.mask_read(Address::new(CODE), &mut raw);
        assert_eq!(raw, vec![0x55, 0x48, 0x89, 0xE5]);
    }

    #[test]
    fn test_patch_write_keeps_trap_and_updates_original()
    {
        let mut backend = backend();
        let mut table = BreakpointTable::new();
        table.add(&mut backend, Address::new(CODE + 2));
        let patched = table.patch_write(Address::new(CODE + 1), &[0x11, 0x22, 0x33]);
        assert_eq!(patched, vec![0x11, 0xCC, 0x33]);

        table.remove(&mut backend, Address::new(CODE + 2));
        assert_eq!(backend.peek(CODE + 2, 1), vec![0x22]);
    }

    #[test]
    fn test_lift_and_restore()
    {
        let mut backend = backend();
        let mut table = BreakpointTable::new();
        let address = Address::new(CODE);
        table.add(&mut backend, address);
        assert!(table.lift(&mut backend, address).unwrap());
        assert_eq!(backend.peek(CODE, 1), vec![0x55]);
        assert!(!table.lift(&mut backend, address).unwrap());
        table.restore(&mut backend, address).unwrap();
        assert_eq!(backend.peek(CODE, 1), vec![0xCC]);
    }

    #[test]
    fn test_disable_and_enable()
    {
        let mut backend = backend();
        let mut table = BreakpointTable::new();
        let address = Address::new(CODE);
        table.add(&mut backend, address);
        assert!(table.disable(&mut backend, address).unwrap());
        assert!(!table.is_enabled_at(address));
        assert!(table.record_hit(address).is_none());
        assert_eq!(backend.peek(CODE, 1), vec![0x55]);

        assert!(table.enable(&mut backend, address).unwrap());
        assert_eq!(backend.peek(CODE, 1), vec![0xCC]);
        assert_eq!(table.record_hit(address).unwrap().hit_count, 1);
    }

    #[test]
    fn test_arm64_trap_is_four_bytes()
    {
        let mut backend = ScriptedBackend::new(Architecture::Arm64);
        backend.map(CODE, &[0x1F, 0x20, 0x03, 0xD5, 0xC0, 0x03, 0x5F, 0xD6]);
        let mut table = BreakpointTable::new();
        table.add(&mut backend, Address::new(CODE + 4));
        assert_eq!(backend.peek(CODE + 4, 4), vec![0x00, 0x00, 0x20, 0xD4]);

        let mut view = backend.peek(CODE + 6, 2);
        table.mask_read(Address::new(CODE + 6), &mut view);
        assert_eq!(view, vec![0x5F, 0xD6]);
    }

    #[test]
    fn test_remove_all_restores_everything()
    {
        let mut backend = backend();
        let mut table = BreakpointTable::new();
        table.add(&mut backend, Address::new(CODE));
        table.add(&mut backend, Address::new(CODE + 4));
        table.remove_all(&mut backend);
        assert!(table.is_empty());
        assert_eq!(backend.peek(CODE, 7), vec![0x55, 0x48, 0x89, 0xE5, 0x90, 0x90, 0xC3]);
    }
}
