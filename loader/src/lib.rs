//! rekon-elf - ELF32 binary loader
//!
//! Parses 32-bit ELF executables, shared objects and relocatable objects
//! (either byte order) into the image store and symbol table provided by
//! `rekon-db`.
//!
//! Pipeline of [`ElfLoader::load_from_memory`](loader::ElfLoader):
//!
//! 1. `header`: structural validation, header tables, base address
//! 2. `sections`: per-section parameter records and string lookup
//! 3. `plt`: PLT bounds and stub lookup
//! 4. `symbols`: symbol collection with import resolution
//! 5. `reloc`: per-machine relocation dispatch over the owned buffer
//! 6. commit to the collaborators
//!
//! Nothing reaches the collaborators unless every structural check passes.

#![no_std]

extern crate alloc;

/// Write a `[ELF]`-prefixed diagnostic to a [`LogSink`](rekon_db::LogSink).
macro_rules! diag {
    ($sink:expr, $level:ident, $($arg:tt)+) => {
        rekon_db::sink::emit(
            $sink,
            rekon_db::sink::Level::$level,
            format_args!("[ELF] {}", format_args!($($arg)+)),
        )
    };
}

pub mod builder;
pub mod dynamic;
pub mod endian;
pub mod entry;
pub mod header;
pub mod loader;
pub mod plt;
pub mod reloc;
pub mod sections;
pub mod symbols;
pub mod types;

pub use endian::Endian;
pub use entry::{LibcStartMainHeuristic, MainEntryHeuristic};
pub use header::{ElfLayout, ParseLimits};
pub use loader::{ElfLoader, ElfLoaderPlugin, LoaderConfig};
pub use reloc::{RelocKind, RelocationModel};
pub use sections::{SectionParam, SectionTable};
pub use types::ElfError;

/// Prelude for common imports
pub mod prelude {
    pub use crate::builder::{ElfBuilder, SectionSpec, SegmentSpec};
    pub use crate::{ElfError, ElfLoader, ElfLoaderPlugin, Endian, LoaderConfig};
    pub use rekon_db::prelude::*;
}
