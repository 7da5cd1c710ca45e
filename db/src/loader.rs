//! File loader contract.
//!
//! A loader turns the bytes of an executable into sections in a
//! [`BinaryImage`](crate::BinaryImage) and symbols in a
//! [`SymbolTable`](crate::SymbolTable). Lifecycle:
//!
//! 1. `initialize` with the collaborator handles
//! 2. `load_from_memory` (may be repeated; each call replaces the previous load)
//! 3. queries
//! 4. `unload` / `close`

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::address::Address;
use crate::{ImageHandle, SymbolHandle};

/// Number of leading bytes a caller should peek before calling
/// [`FileLoader::can_load`].
pub const PEEK_LEN: usize = 16;

/// Container format handled by a loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFormat {
    Elf,
    Unknown,
}

impl fmt::Display for LoadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadFormat::Elf => write!(f, "ELF"),
            LoadFormat::Unknown => write!(f, "unknown"),
        }
    }
}

/// Target instruction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Machine {
    #[default]
    Unknown,
    X86,
    Sparc,
    Ppc,
    Mips,
    M68k,
    Arm,
    HpRisc,
    /// Recognised container, unsupported machine code.
    Other(u16),
}

impl fmt::Display for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Machine::Unknown => write!(f, "unknown"),
            Machine::X86 => write!(f, "x86"),
            Machine::Sparc => write!(f, "sparc"),
            Machine::Ppc => write!(f, "ppc"),
            Machine::Mips => write!(f, "mips"),
            Machine::M68k => write!(f, "m68k"),
            Machine::Arm => write!(f, "arm"),
            Machine::HpRisc => write!(f, "hppa"),
            Machine::Other(code) => write!(f, "machine {}", code),
        }
    }
}

/// Why a load failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// `load_from_memory` called before `initialize`.
    NotInitialized,
    /// The file is structurally invalid.
    Malformed(&'static str),
    /// The file is valid but uses something the loader cannot handle.
    Unsupported(&'static str),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::NotInitialized => write!(f, "loader not initialized"),
            LoadError::Malformed(reason) => write!(f, "malformed file: {}", reason),
            LoadError::Unsupported(reason) => write!(f, "unsupported file: {}", reason),
        }
    }
}

impl core::error::Error for LoadError {}

/// Contract every format loader implements. Object safe.
pub trait FileLoader {
    /// Attach the image store and symbol table the loader populates.
    fn initialize(&mut self, image: ImageHandle, symbols: SymbolHandle);

    /// Confidence that `header` (the first [`PEEK_LEN`] or more bytes of a
    /// file) is in this loader's format. 0 means "not mine".
    fn can_load(&self, header: &[u8]) -> u32;

    /// Parse and load `data`, replacing any previous load. On failure no
    /// state is left behind.
    fn load_from_memory(&mut self, data: Vec<u8>) -> Result<(), LoadError>;

    /// Release the loaded file and clear the collaborators. Idempotent.
    fn unload(&mut self);

    /// `unload` and detach the collaborators.
    fn close(&mut self);

    fn format(&self) -> LoadFormat;

    fn machine(&self) -> Machine;

    /// Address of the program's `main`, best effort.
    fn main_entry_point(&self) -> Option<Address>;

    /// Address execution starts at.
    fn entry_point(&self) -> Option<Address>;

    /// Check if a relocation patched (or targets) `addr`
    fn is_relocation_at(&self, addr: Address) -> bool;

    /// Check if the loaded file is a shared library
    fn is_library(&self) -> bool;

    /// Names of the shared libraries the file depends on.
    fn dependency_list(&self) -> Vec<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_load_error_display() {
        assert_eq!(
            LoadError::Malformed("bad magic").to_string(),
            "malformed file: bad magic"
        );
        assert_eq!(LoadError::NotInitialized.to_string(), "loader not initialized");
    }

    #[test]
    fn test_machine_display() {
        assert_eq!(Machine::Sparc.to_string(), "sparc");
        assert_eq!(Machine::Other(62).to_string(), "machine 62");
    }
}
