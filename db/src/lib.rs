//! rekon-db - Loader collaborators for the rekon decompiler
//!
//! This crate holds everything a file loader talks to without owning it:
//!
//! - `address`: native virtual addresses
//! - `image`: the binary image store (loaded sections with byte access)
//! - `symbols`: the symbol table (address- and name-indexed)
//! - `loader`: the `FileLoader` contract implemented by format loaders
//! - `registry`: format-detection based selection of loader plugins
//! - `sink`: the injected diagnostics sink
//!
//! It is designed to work in no_std environments.

#![no_std]

extern crate alloc;

pub mod address;
pub mod image;
pub mod loader;
pub mod registry;
pub mod sink;
pub mod symbols;

use alloc::sync::Arc;
use spin::Mutex;

pub use address::Address;
pub use image::{BinaryImage, ImageSection, MemoryImage, SectionFlags, SectionInfo};
pub use loader::{FileLoader, LoadError, LoadFormat, Machine, PEEK_LEN};
pub use registry::{LoaderPlugin, LoaderRegistry, PluginInfo};
pub use sink::{Level, LogForwarder, LogRecord, LogSink, MemorySink};
pub use symbols::{BinarySymbol, SymbolAttrs, SymbolKind, SymbolStore, SymbolTable};

/// Shared handle to the image store a loader populates.
pub type ImageHandle = Arc<Mutex<dyn BinaryImage + Send>>;

/// Shared handle to the symbol table a loader populates.
pub type SymbolHandle = Arc<Mutex<dyn SymbolTable + Send>>;

/// Prelude for common imports
pub mod prelude {
    pub use crate::{
        Address, BinaryImage, BinarySymbol, FileLoader, ImageHandle, LoadError, LoadFormat,
        Machine, MemoryImage, SectionFlags, SectionInfo, SymbolAttrs, SymbolHandle, SymbolKind,
        SymbolStore, SymbolTable,
    };
}
