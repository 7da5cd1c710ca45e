//! Binary image store.
//!
//! Holds the sections a loader maps into the program's address space and
//! gives byte-level read access to them. Loaders populate the store through
//! [`BinaryImage`]; the internal representation belongs to the store.

use alloc::string::String;
use alloc::vec::Vec;

use crate::address::Address;

bitflags::bitflags! {
    /// Classification of a loaded section.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SectionFlags: u32 {
        /// Contains executable code.
        const CODE = 0x0001;
        /// Contains writable data.
        const DATA = 0x0002;
        /// Occupies memory but no file bytes (zero filled).
        const BSS = 0x0004;
        /// Not writable at run time.
        const READ_ONLY = 0x0008;
        /// Synthesized by the loader (no counterpart in the file).
        const SYNTHETIC = 0x0010;
    }
}

/// Description of a section to map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionInfo {
    /// Section name (e.g. `.text`).
    pub name: String,
    /// Native virtual address of the first byte.
    pub address: Address,
    /// Size in memory.
    pub size: u64,
    /// Classification.
    pub flags: SectionFlags,
}

/// A section held by [`MemoryImage`].
#[derive(Debug, Clone)]
pub struct ImageSection {
    info: SectionInfo,
    /// File bytes; shorter than `info.size` for BSS, the tail reads as zero.
    data: Vec<u8>,
}

impl ImageSection {
    /// Section name
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// First address
    pub fn address(&self) -> Address {
        self.info.address
    }

    /// Size in memory
    pub fn size(&self) -> u64 {
        self.info.size
    }

    /// One past the last address.
    pub fn end(&self) -> Address {
        self.info.address.wrapping_add(self.info.size)
    }

    /// Classification flags
    pub fn flags(&self) -> SectionFlags {
        self.info.flags
    }

    /// Check if the section holds code
    pub fn is_code(&self) -> bool {
        self.info.flags.contains(SectionFlags::CODE)
    }

    /// Check if the section is zero filled
    pub fn is_bss(&self) -> bool {
        self.info.flags.contains(SectionFlags::BSS)
    }

    /// Check if the section is read-only
    pub fn is_read_only(&self) -> bool {
        self.info.flags.contains(SectionFlags::READ_ONLY)
    }

    /// Bytes backed by the file.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Check if `addr` lies inside the section.
    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.info.address && addr < self.end()
    }

    fn overlaps(&self, start: Address, end: Address) -> bool {
        start < self.end() && self.info.address < end
    }
}

/// Interface of the image store as seen by loaders and later analyses.
pub trait BinaryImage {
    /// Map a section. `data` holds the file bytes (empty for BSS).
    ///
    /// Returns `false` if the section is empty or overlaps a mapped one.
    fn add_section(&mut self, info: SectionInfo, data: &[u8]) -> bool;

    /// Number of mapped sections.
    fn section_count(&self) -> usize;

    /// Section by position, in address order.
    fn section(&self, index: usize) -> Option<&ImageSection>;

    /// Section by name.
    fn section_by_name(&self, name: &str) -> Option<&ImageSection>;

    /// Section containing `addr`.
    fn section_by_addr(&self, addr: Address) -> Option<&ImageSection>;

    /// Read one byte. BSS reads as zero.
    fn read_u8(&self, addr: Address) -> Option<u8>;

    /// Read `len` file-backed bytes starting at `addr` within one section.
    fn read_bytes(&self, addr: Address, len: usize) -> Option<&[u8]>;

    /// Lowest mapped address and one past the highest.
    fn limits(&self) -> Option<(Address, Address)>;

    /// Drop all sections.
    fn clear(&mut self);
}

/// In-memory image store keeping sections sorted by address.
#[derive(Debug, Default)]
pub struct MemoryImage {
    sections: Vec<ImageSection>,
}

impl MemoryImage {
    /// Create an empty image.
    pub fn new() -> Self {
        Self::default()
    }

    /// Iterate sections in address order.
    pub fn sections(&self) -> impl Iterator<Item = &ImageSection> {
        self.sections.iter()
    }
}

impl BinaryImage for MemoryImage {
    fn add_section(&mut self, info: SectionInfo, data: &[u8]) -> bool {
        if info.size == 0 {
            return false;
        }

        let start = info.address;
        let end = match start.checked_add(info.size) {
            Some(end) => end,
            None => {
                log::warn!("[Image] Section {} wraps the address space", info.name);
                return false;
            }
        };

        if let Some(other) = self.sections.iter().find(|s| s.overlaps(start, end)) {
            log::warn!(
                "[Image] Section {} at {} overlaps {} at {}",
                info.name,
                start,
                other.name(),
                other.address()
            );
            return false;
        }

        let keep = core::cmp::min(data.len() as u64, info.size) as usize;
        let pos = self.sections.partition_point(|s| s.address() < start);
        log::trace!("[Image] Mapped {} at {} ({:#x} bytes)", info.name, start, info.size);
        self.sections.insert(
            pos,
            ImageSection {
                info,
                data: data[..keep].to_vec(),
            },
        );
        true
    }

    fn section_count(&self) -> usize {
        self.sections.len()
    }

    fn section(&self, index: usize) -> Option<&ImageSection> {
        self.sections.get(index)
    }

    fn section_by_name(&self, name: &str) -> Option<&ImageSection> {
        self.sections.iter().find(|s| s.name() == name)
    }

    fn section_by_addr(&self, addr: Address) -> Option<&ImageSection> {
        let pos = self.sections.partition_point(|s| s.address() <= addr);
        let candidate = self.sections.get(pos.checked_sub(1)?)?;
        candidate.contains(addr).then_some(candidate)
    }

    fn read_u8(&self, addr: Address) -> Option<u8> {
        let section = self.section_by_addr(addr)?;
        let offset = addr.offset_from(section.address())? as usize;
        Some(section.data.get(offset).copied().unwrap_or(0))
    }

    fn read_bytes(&self, addr: Address, len: usize) -> Option<&[u8]> {
        let section = self.section_by_addr(addr)?;
        let offset = addr.offset_from(section.address())? as usize;
        let end = offset.checked_add(len)?;
        section.data.get(offset..end)
    }

    fn limits(&self) -> Option<(Address, Address)> {
        let first = self.sections.first()?;
        let last_end = self.sections.iter().map(|s| s.end()).max()?;
        Some((first.address(), last_end))
    }

    fn clear(&mut self) {
        self.sections.clear();
    }
}
