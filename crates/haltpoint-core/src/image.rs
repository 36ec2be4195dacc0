//! # Target Images
//!
//! The session needs two facts about the program it launches before the
//! process exists: where execution enters user code and which architecture
//! the code is for. Both come from the executable's headers.
//!
//! [`TargetImage`] is the seam to the binary-analysis layer. [`ExecutableImage`]
//! is the default implementation and reads ELF, Mach-O and PE files through
//! the `object` crate.
//!
//! Entry points are *link-time* addresses. For position-independent
//! executables the runtime entry differs; the session asks the backend for the
//! runtime value and only falls back to the image's.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use object::{Object, ObjectSegment, ObjectSymbol};
use tracing::debug;

use crate::error::{DebuggerError, Result};
use crate::types::{Address, Architecture};

/// A loaded executable the session can launch.
pub trait TargetImage: Send + Sync + fmt::Debug
{
    /// Path of the executable on disk.
    fn path(&self) -> &Path;

    /// Link-time entry point.
    fn entry_point(&self) -> Address;

    /// Architecture the code targets.
    fn architecture(&self) -> Architecture;
}

/// An executable parsed from disk.
#[derive(Clone)]
pub struct ExecutableImage
{
    path: PathBuf,
    entry_point: Address,
    architecture: Architecture,
    data: Arc<[u8]>,
}

impl fmt::Debug for ExecutableImage
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("ExecutableImage")
            .field("path", &self.path)
            .field("entry_point", &self.entry_point)
            .field("architecture", &self.architecture)
            .finish_non_exhaustive()
    }
}

impl ExecutableImage
{
    /// Read and parse the executable at `path`.
    ///
    /// ## Errors
    ///
    /// - [`DebuggerError::Io`] if the file cannot be read
    /// - [`DebuggerError::ImageParse`] if it is not an object file `object` understands
    pub fn open(path: impl AsRef<Path>) -> Result<Self>
    {
        let path = path.as_ref().to_path_buf();
        let data = Arc::<[u8]>::from(fs::read(&path)?);
        let file = object::File::parse(&*data)
            .map_err(|err| DebuggerError::ImageParse(format!("{}: {err}", path.display())))?;

        let architecture = map_architecture(file.architecture(), file.is_64());
        let entry_point = Address::new(link_entry_point(&file));
        debug!(path = %path.display(), %entry_point, %architecture, "Parsed target image");

        Ok(Self {
            path,
            entry_point,
            architecture,
            data,
        })
    }

    /// Link-time address of the symbol `name`, if the image defines it.
    ///
    /// Mach-O symbol names carry a leading underscore; both spellings match.
    #[must_use]
    pub fn symbol_address(&self, name: &str) -> Option<Address>
    {
        let file = object::File::parse(&*self.data).ok()?;
        file.symbols()
            .chain(file.dynamic_symbols())
            .filter(|symbol| symbol.is_definition())
            .find(|symbol| {
                symbol
                    .name()
                    .is_ok_and(|candidate| candidate == name || candidate.strip_prefix('_') == Some(name))
            })
            .map(|symbol| Address::new(symbol.address()))
    }
}

impl TargetImage for ExecutableImage
{
    fn path(&self) -> &Path
    {
        &self.path
    }

    fn entry_point(&self) -> Address
    {
        self.entry_point
    }

    fn architecture(&self) -> Architecture
    {
        self.architecture
    }
}

fn map_architecture(arch: object::Architecture, is_64: bool) -> Architecture
{
    match arch {
        object::Architecture::X86_64 if is_64 => Architecture::X86_64,
        object::Architecture::X86_64 | object::Architecture::X86_64_X32 | object::Architecture::I386 => {
            Architecture::X86
        }
        object::Architecture::Aarch64 => Architecture::Arm64,
        _ => Architecture::Unknown("unsupported"),
    }
}

/// `LC_MAIN` records the entry as an offset from the `__TEXT` segment; ELF
/// and PE headers already hold a virtual address.
fn link_entry_point(file: &object::File<'_>) -> u64
{
    let entry = file.entry();
    if file.format() != object::BinaryFormat::MachO {
        return entry;
    }
    let text = file
        .segments()
        .find(|segment| matches!(segment.name(), Ok(Some("__TEXT"))))
        .map(|segment| segment.address());
    match text {
        Some(base) if entry < base => base + entry,
        _ => entry,
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_open_missing_file()
    {
        let err = ExecutableImage::open("/definitely/not/here").unwrap_err();
        assert!(matches!(err, DebuggerError::Io(_)));
    }

    #[test]
    fn test_open_current_executable()
    {
        let exe = std::env::current_exe().unwrap();
        let image = ExecutableImage::open(&exe).unwrap();
        assert_eq!(image.path(), exe.as_path());
        assert_eq!(image.architecture(), Architecture::current());
        assert!(!image.entry_point().is_null());
    }

    #[test]
    fn test_map_architecture()
    {
        assert_eq!(map_architecture(object::Architecture::X86_64, true), Architecture::X86_64);
        assert_eq!(map_architecture(object::Architecture::I386, false), Architecture::X86);
        assert_eq!(map_architecture(object::Architecture::Aarch64, true), Architecture::Arm64);
        assert!(matches!(
            map_architecture(object::Architecture::Riscv64, true),
            Architecture::Unknown(_)
        ));
    }
}
