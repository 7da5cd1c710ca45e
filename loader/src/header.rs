//! ELF32 structural parser.
//!
//! Validates the identification bytes, both header tables and every file
//! extent they name. On success the layout is a set of decoded records;
//! the raw bytes stay with the caller.

use alloc::vec::Vec;

use rekon_db::Address;

use crate::endian::Endian;
use crate::types::*;

/// Maximum section headers accepted by default
pub const MAX_SECTIONS: usize = 4096;

/// Maximum program headers accepted by default
pub const MAX_SEGMENTS: usize = 1024;

/// Upper bounds on header table sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseLimits {
    pub max_sections: usize,
    pub max_segments: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_sections: MAX_SECTIONS,
            max_segments: MAX_SEGMENTS,
        }
    }
}

/// Validated structure of an ELF32 file.
#[derive(Debug, Clone)]
pub struct ElfLayout {
    pub endian: Endian,
    pub header: Elf32Header,
    pub program_headers: Vec<Elf32ProgramHeader>,
    pub section_headers: Vec<Elf32SectionHeader>,
    /// Lowest `p_vaddr` over `PT_LOAD` segments.
    pub base_address: Option<Address>,
}

impl ElfLayout {
    /// Check if the file is a relocatable object
    pub fn is_relocatable(&self) -> bool {
        self.header.e_type == ET_REL
    }

    /// Check if the file is a shared object
    pub fn is_shared_object(&self) -> bool {
        self.header.e_type == ET_DYN
    }
}

/// Validate the fixed part of `e_ident` and return the byte order.
pub fn identify(data: &[u8]) -> Result<Endian, ElfError> {
    if data.len() < EHDR_SIZE {
        return Err(ElfError::TooSmall);
    }
    if data[..4] != ELF_MAGIC {
        return Err(ElfError::InvalidMagic);
    }
    if data[EI_CLASS] != ELFCLASS32 {
        return Err(ElfError::InvalidClass);
    }
    let endian = Endian::from_ident(data[EI_DATA]).ok_or(ElfError::InvalidEncoding)?;
    if data[EI_VERSION] != EV_CURRENT {
        return Err(ElfError::InvalidVersion);
    }
    Ok(endian)
}

/// Parse and validate the structure of `data`.
pub fn parse(data: &[u8], limits: &ParseLimits) -> Result<ElfLayout, ElfError> {
    let endian = identify(data)?;
    let header = Elf32Header::read(data, endian).ok_or(ElfError::TooSmall)?;

    let phnum = header.e_phnum as usize;
    let shnum = header.e_shnum as usize;

    if phnum > 0 && header.e_phentsize as usize != PHDR_SIZE {
        return Err(ElfError::InvalidEntrySize);
    }
    if shnum > 0 && header.e_shentsize as usize != SHDR_SIZE {
        return Err(ElfError::InvalidEntrySize);
    }

    let phoff = header.e_phoff as usize;
    let shoff = header.e_shoff as usize;

    table_end(phoff, phnum, PHDR_SIZE)
        .filter(|&end| end <= data.len())
        .ok_or(ElfError::ProgramHeadersOutOfBounds)?;
    table_end(shoff, shnum, SHDR_SIZE)
        .filter(|&end| end <= data.len())
        .ok_or(ElfError::SectionHeadersOutOfBounds)?;

    if phnum > limits.max_segments {
        return Err(ElfError::TooManySegments);
    }
    if shnum > limits.max_sections {
        return Err(ElfError::TooManySections);
    }

    let shstrndx = header.e_shstrndx as usize;
    if shnum > 0 && shstrndx != SHN_UNDEF as usize && shstrndx >= shnum {
        return Err(ElfError::InvalidStringTableIndex);
    }

    let mut program_headers = Vec::with_capacity(phnum);
    for i in 0..phnum {
        let ph = Elf32ProgramHeader::read(data, phoff + i * PHDR_SIZE, endian)
            .ok_or(ElfError::ProgramHeadersOutOfBounds)?;
        if !extent_in_bounds(ph.p_offset, ph.p_filesz, data.len()) {
            return Err(ElfError::SegmentOutOfBounds);
        }
        program_headers.push(ph);
    }

    let mut section_headers = Vec::with_capacity(shnum);
    for i in 0..shnum {
        let sh = Elf32SectionHeader::read(data, shoff + i * SHDR_SIZE, endian)
            .ok_or(ElfError::SectionHeadersOutOfBounds)?;
        // Index 0 is the null section
        if i > 0 && sh.has_file_data() && !extent_in_bounds(sh.sh_offset, sh.sh_size, data.len())
        {
            return Err(ElfError::SectionOutOfBounds);
        }
        section_headers.push(sh);
    }

    let base_address = program_headers
        .iter()
        .filter(|ph| ph.is_load())
        .map(|ph| ph.p_vaddr)
        .min()
        .map(Address::from);

    Ok(ElfLayout {
        endian,
        header,
        program_headers,
        section_headers,
        base_address,
    })
}

fn table_end(offset: usize, count: usize, entry_size: usize) -> Option<usize> {
    if count == 0 {
        return Some(0);
    }
    offset.checked_add(count.checked_mul(entry_size)?)
}

fn extent_in_bounds(offset: u32, size: u32, len: usize) -> bool {
    (offset as usize)
        .checked_add(size as usize)
        .is_some_and(|end| end <= len)
}
