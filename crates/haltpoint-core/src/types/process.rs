//! Process, thread, architecture and memory map types.

use std::fmt;

use super::Address;

/// Operating-system process identifier.
///
/// On Windows this is the numeric process id (not a handle); on Unix it is the
/// PID returned by `fork`/`posix_spawn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl ProcessId
{
    /// Raw numeric value.
    #[must_use]
    pub const fn raw(self) -> u32
    {
        self.0
    }
}

impl From<u32> for ProcessId
{
    fn from(pid: u32) -> Self
    {
        ProcessId(pid)
    }
}

impl From<ProcessId> for u32
{
    fn from(pid: ProcessId) -> Self
    {
        pid.0
    }
}

impl fmt::Display for ProcessId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one OS thread of the target.
///
/// The value is whatever the platform uses to name a thread:
///
/// - **Linux**: the kernel TID (the leader's TID equals the PID)
/// - **macOS**: the Mach thread port name in the debugger's IPC space
/// - **Windows**: the numeric thread id from the debug event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

impl ThreadId
{
    /// Raw platform value.
    #[must_use]
    pub const fn raw(self) -> u64
    {
        self.0
    }
}

impl From<u64> for ThreadId
{
    fn from(value: u64) -> Self
    {
        Self(value)
    }
}

impl fmt::Display for ThreadId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time description of a thread, taken while the session is stopped.
///
/// This is a snapshot rather than a live handle: once the session resumes the
/// instruction pointer is stale and a fresh enumeration is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugThread
{
    /// Thread identifier.
    pub tid: ThreadId,
    /// Instruction pointer at the moment of the snapshot.
    pub instruction_pointer: u64,
}

impl DebugThread
{
    /// Build a snapshot entry.
    #[must_use]
    pub const fn new(tid: ThreadId, instruction_pointer: u64) -> Self
    {
        Self { tid, instruction_pointer }
    }
}

/// One mapping of the target's address space.
///
/// Regions are re-read on every query; they are never cached across stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion
{
    /// First address of the mapping.
    pub start: Address,
    /// One past the last address of the mapping.
    pub end: Address,
    /// Protection as an `rwx` style string (`-` for a missing permission).
    pub permissions: String,
    /// Backing file or a pseudo name such as `[stack]`, when known.
    pub name: Option<String>,
}

impl MemoryRegion
{
    /// Create a region.
    #[must_use]
    pub fn new(start: Address, end: Address, permissions: String, name: Option<String>) -> Self
    {
        Self {
            start,
            end,
            permissions,
            name,
        }
    }

    /// Size in bytes.
    #[must_use]
    pub fn size(&self) -> u64
    {
        self.end.value().saturating_sub(self.start.value())
    }

    /// Whether the mapping is readable.
    #[must_use]
    pub fn is_readable(&self) -> bool
    {
        self.permissions.starts_with('r')
    }

    /// Whether the mapping is writable.
    #[must_use]
    pub fn is_writable(&self) -> bool
    {
        self.permissions.chars().nth(1) == Some('w')
    }

    /// Whether the mapping is executable.
    #[must_use]
    pub fn is_executable(&self) -> bool
    {
        self.permissions.chars().nth(2) == Some('x')
    }

    /// Whether `address` falls inside the mapping.
    #[must_use]
    pub fn contains(&self, address: Address) -> bool
    {
        address >= self.start && address < self.end
    }
}

/// CPU architecture of the target.
///
/// Register names, trap opcodes and the program-counter adjustment after a
/// software breakpoint all depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture
{
    /// 32-bit x86.
    X86,
    /// 64-bit x86 (Intel/AMD).
    X86_64,
    /// 64-bit ARM (AArch64).
    Arm64,
    /// Anything else; the string names it for diagnostics.
    Unknown(&'static str),
}

const X86_TRAP: &[u8] = &[0xCC];
// brk #0
const ARM64_TRAP: &[u8] = &[0x00, 0x00, 0x20, 0xD4];

impl Architecture
{
    /// Architecture the engine itself was compiled for.
    #[must_use]
    pub const fn current() -> Self
    {
        #[cfg(target_arch = "aarch64")]
        {
            Architecture::Arm64
        }

        #[cfg(target_arch = "x86_64")]
        {
            Architecture::X86_64
        }

        #[cfg(target_arch = "x86")]
        {
            Architecture::X86
        }

        #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64", target_arch = "x86")))]
        {
            Architecture::Unknown(std::env::consts::ARCH)
        }
    }

    /// Width of a pointer (and of a general-purpose register) in bytes.
    #[must_use]
    pub const fn pointer_size_bytes(self) -> u8
    {
        match self {
            Architecture::X86 => 4,
            Architecture::X86_64 | Architecture::Arm64 | Architecture::Unknown(_) => 8,
        }
    }

    /// Mask that truncates a value to register width.
    #[must_use]
    pub const fn register_mask(self) -> u64
    {
        match self.pointer_size_bytes() {
            4 => 0xFFFF_FFFF,
            _ => u64::MAX,
        }
    }

    /// Software breakpoint opcode (`int3` on x86, `brk #0` on AArch64).
    #[must_use]
    pub const fn trap_instruction(self) -> &'static [u8]
    {
        match self {
            Architecture::Arm64 => ARM64_TRAP,
            Architecture::X86 | Architecture::X86_64 | Architecture::Unknown(_) => X86_TRAP,
        }
    }

    /// How far past the trap the program counter sits when a software
    /// breakpoint reports.
    ///
    /// `int3` is a fault-after instruction, so x86 reports `pc = trap + 1`.
    /// AArch64 `brk` reports the address of the `brk` itself.
    #[must_use]
    pub const fn breakpoint_pc_offset(self) -> u64
    {
        match self {
            Architecture::Arm64 => 0,
            Architecture::X86 | Architecture::X86_64 | Architecture::Unknown(_) => 1,
        }
    }
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Architecture::X86 => write!(f, "x86"),
            Architecture::X86_64 => write!(f, "x86_64"),
            Architecture::Arm64 => write!(f, "arm64"),
            Architecture::Unknown(name) => write!(f, "{name}"),
        }
    }
}
