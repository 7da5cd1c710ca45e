//! Fuzzing harnesses for the rekon loaders.

#![no_std]
extern crate alloc;

use alloc::string::{String, ToString};
use alloc::sync::Arc;

use rekon_db::{
    Address, BinaryImage, FileLoader, MemoryImage, MemorySink, SymbolStore, SymbolTable,
};
use rekon_elf::ElfLoader;
use spin::Mutex;

/// A component driven with arbitrary bytes.
pub trait FuzzTarget {
    fn name(&self) -> &str;

    /// Run one iteration.
    fn fuzz(&mut self, input: &[u8]) -> FuzzResult;

    /// Drop state left by the previous iteration.
    fn reset(&mut self);
}

/// Outcome of one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FuzzResult {
    /// Input loaded
    Ok,
    /// Input rejected (expected for malformed input)
    ParseError(String),
    /// Loader state contradicts its own answers
    Inconsistent(&'static str),
}

impl FuzzResult {
    pub fn is_error(&self) -> bool {
        matches!(self, FuzzResult::Inconsistent(_))
    }
}

/// Feeds input to [`ElfLoader::load_from_memory`] and cross-checks the
/// result against the image store and symbol table.
pub struct ElfLoadTarget {
    image: Arc<Mutex<MemoryImage>>,
    symbols: Arc<Mutex<SymbolStore>>,
    loader: ElfLoader,
}

impl Default for ElfLoadTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl ElfLoadTarget {
    pub fn new() -> Self {
        let image = Arc::new(Mutex::new(MemoryImage::new()));
        let symbols = Arc::new(Mutex::new(SymbolStore::new()));
        let mut loader = ElfLoader::new().with_sink(MemorySink::new());
        loader.initialize(image.clone(), symbols.clone());
        Self {
            image,
            symbols,
            loader,
        }
    }

    fn check_loaded(&self) -> FuzzResult {
        if self.loader.entry_point().is_none() {
            return FuzzResult::Inconsistent("loaded file has no entry point");
        }
        for site in self.loader.relocation_sites() {
            if !self.loader.is_relocation_at(site) {
                return FuzzResult::Inconsistent("recorded site not reported");
            }
        }
        let image = self.image.lock();
        let mut previous_end = Address::ZERO;
        for section in image.sections() {
            if section.address() < previous_end {
                return FuzzResult::Inconsistent("overlapping sections");
            }
            previous_end = section.end();
        }
        FuzzResult::Ok
    }

    fn check_rejected(&self) -> FuzzResult {
        if self.loader.is_loaded() || self.image.lock().section_count() != 0 {
            return FuzzResult::Inconsistent("failed load left sections behind");
        }
        if !self.symbols.lock().is_empty() {
            return FuzzResult::Inconsistent("failed load left symbols behind");
        }
        FuzzResult::Ok
    }
}

impl FuzzTarget for ElfLoadTarget {
    fn name(&self) -> &str {
        "elf_loader"
    }

    fn fuzz(&mut self, input: &[u8]) -> FuzzResult {
        match self.loader.load_from_memory(input.to_vec()) {
            Ok(()) => {
                // Keep the lookup paths in play
                let _ = self.loader.main_entry_point();
                let _ = self.loader.dependency_list();
                self.check_loaded()
            }
            Err(err) => match self.check_rejected() {
                FuzzResult::Ok => FuzzResult::ParseError(err.to_string()),
                other => other,
            },
        }
    }

    fn reset(&mut self) {
        self.loader.unload();
    }
}
