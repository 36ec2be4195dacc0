//! Architecture-native register files.
//!
//! A [`RegisterFile`] is a snapshot of one thread's general-purpose register
//! set, stored in a fixed canonical order per architecture. Names are resolved
//! against that order:
//!
//! - **x86-64**: `rax rbx rcx rdx rsi rdi rbp rsp r8`–`r15 rip rflags cs ss ds es fs gs fs_base gs_base`
//! - **x86**: `eax ebx ecx edx esi edi ebp esp eip eflags cs ss ds es fs gs`
//! - **AArch64**: `x0`–`x30 sp pc cpsr` (with `fp` = `x29` and `lr` = `x30`)
//!
//! Every architecture also accepts `pc`, `sp` and `fp` as aliases for its
//! instruction, stack and frame pointer. Lookups are case-insensitive.
//! Writes are truncated to the architecture's register width, so a 32-bit
//! target never observes the upper half of a 64-bit value.

use super::Architecture;

const X86_64_NAMES: &[&str] = &[
    "rax", "rbx", "rcx", "rdx", "rsi", "rdi", "rbp", "rsp", "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15",
    "rip", "rflags", "cs", "ss", "ds", "es", "fs", "gs", "fs_base", "gs_base",
];

const X86_NAMES: &[&str] = &[
    "eax", "ebx", "ecx", "edx", "esi", "edi", "ebp", "esp", "eip", "eflags", "cs", "ss", "ds", "es", "fs", "gs",
];

const ARM64_NAMES: &[&str] = &[
    "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14", "x15", "x16",
    "x17", "x18", "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26", "x27", "x28", "x29", "x30", "sp", "pc",
    "cpsr",
];

const X86_64_ALIASES: &[(&str, &str)] = &[("pc", "rip"), ("sp", "rsp"), ("fp", "rbp")];
const X86_ALIASES: &[(&str, &str)] = &[("pc", "eip"), ("sp", "esp"), ("fp", "ebp")];
const ARM64_ALIASES: &[(&str, &str)] = &[("fp", "x29"), ("lr", "x30")];

/// A named register value, as returned by register listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugRegister
{
    /// Canonical register name.
    pub name: &'static str,
    /// Register value, zero-extended to 64 bits.
    pub value: u64,
}

/// Snapshot of one thread's general-purpose registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFile
{
    architecture: Architecture,
    values: Vec<u64>,
}

impl RegisterFile
{
    /// An all-zero register file for `architecture`.
    #[must_use]
    pub fn new(architecture: Architecture) -> Self
    {
        Self {
            architecture,
            values: vec![0; Self::names(architecture).len()],
        }
    }

    /// Build from values listed in canonical order.
    ///
    /// Returns `None` when the number of values does not match the
    /// architecture's register count.
    #[must_use]
    pub fn from_values(architecture: Architecture, values: Vec<u64>) -> Option<Self>
    {
        if values.len() != Self::names(architecture).len() {
            return None;
        }
        let mask = architecture.register_mask();
        Some(Self {
            architecture,
            values: values.into_iter().map(|value| value & mask).collect(),
        })
    }

    /// Canonical register names for `architecture`, in storage order.
    #[must_use]
    pub fn names(architecture: Architecture) -> &'static [&'static str]
    {
        match architecture {
            Architecture::X86_64 => X86_64_NAMES,
            Architecture::X86 => X86_NAMES,
            Architecture::Arm64 => ARM64_NAMES,
            Architecture::Unknown(_) => &[],
        }
    }

    /// Resolve a register name (or alias) to its storage index.
    #[must_use]
    pub fn resolve(architecture: Architecture, name: &str) -> Option<usize>
    {
        let lowered = name.trim().to_ascii_lowercase();
        let aliases = match architecture {
            Architecture::X86_64 => X86_64_ALIASES,
            Architecture::X86 => X86_ALIASES,
            Architecture::Arm64 => ARM64_ALIASES,
            Architecture::Unknown(_) => &[],
        };
        let canonical = aliases
            .iter()
            .find(|(alias, _)| *alias == lowered)
            .map_or(lowered.as_str(), |(_, target)| *target);
        Self::names(architecture).iter().position(|candidate| *candidate == canonical)
    }

    /// Architecture this snapshot belongs to.
    #[must_use]
    pub fn architecture(&self) -> Architecture
    {
        self.architecture
    }

    /// Value of `name`, or `None` if the name is not a register of this architecture.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<u64>
    {
        Self::resolve(self.architecture, name).map(|index| self.values[index])
    }

    /// Value of `name`, or zero when the architecture has no such register.
    ///
    /// Backends use this when copying a snapshot back into a native
    /// thread-state structure.
    #[must_use]
    pub fn value(&self, name: &str) -> u64
    {
        self.get(name).unwrap_or(0)
    }

    /// Set `name` to `value`, truncated to register width.
    ///
    /// Returns `None` if the name is not a register of this architecture.
    pub fn set(&mut self, name: &str, value: u64) -> Option<()>
    {
        let index = Self::resolve(self.architecture, name)?;
        self.values[index] = value & self.architecture.register_mask();
        Some(())
    }

    /// All values in canonical order.
    #[must_use]
    pub fn values(&self) -> &[u64]
    {
        &self.values
    }

    /// Instruction pointer (`rip`, `eip` or `pc`).
    #[must_use]
    pub fn instruction_pointer(&self) -> u64
    {
        self.value("pc")
    }

    /// Move the instruction pointer.
    pub fn set_instruction_pointer(&mut self, value: u64)
    {
        let _ = self.set("pc", value);
    }

    /// Stack pointer (`rsp`, `esp` or `sp`).
    #[must_use]
    pub fn stack_pointer(&self) -> u64
    {
        self.value("sp")
    }

    /// Named listing in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = DebugRegister> + '_
    {
        Self::names(self.architecture)
            .iter()
            .zip(self.values.iter())
            .map(|(name, value)| DebugRegister { name, value: *value })
    }
}
