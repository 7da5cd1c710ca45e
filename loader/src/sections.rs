//! Section resolution.
//!
//! Turns the raw section headers into [`SectionParam`] records: names are
//! looked up, symbol tables are tied to their string tables, relocation
//! sections to their targets and symbol tables. Bad links degrade to
//! `None` with a warning.

use alloc::string::String;
use alloc::vec::Vec;

use rekon_db::{Address, LogSink, SectionFlags};

use crate::header::ElfLayout;
use crate::types::*;

/// Per-section parameters derived from the section header table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionParam {
    pub index: usize,
    /// Empty when the name cannot be resolved.
    pub name: String,
    pub sh_type: u32,
    pub flags: SectionHeaderFlags,
    /// Native virtual address (assigned by the loader for relocatable objects).
    pub address: Address,
    /// File offset of the contents.
    pub offset: usize,
    pub size: usize,
    pub entry_size: usize,
    pub link: u32,
    pub info: u32,
    /// String table of a symbol table.
    pub string_table: Option<usize>,
    /// Entries in a symbol table.
    pub symbol_count: usize,
    /// Symbol table of a relocation section.
    pub symbol_table: Option<usize>,
    /// Section a relocation section applies to.
    pub target: Option<usize>,
    /// `SHT_RELA` rather than `SHT_REL`.
    pub has_addend: bool,
}

impl SectionParam {
    /// Check if the section occupies file bytes
    pub fn has_file_data(&self) -> bool {
        self.sh_type != SHT_NOBITS
    }

    /// Check if the section is part of the program image
    pub fn is_alloc(&self) -> bool {
        self.flags.contains(SectionHeaderFlags::ALLOC)
    }

    /// Check if the section belongs in the image store
    pub fn is_mapped(&self) -> bool {
        self.index != 0 && self.is_alloc() && self.size > 0 && !self.address.is_zero()
    }

    pub fn is_symbol_table(&self) -> bool {
        self.sh_type == SHT_SYMTAB || self.sh_type == SHT_DYNSYM
    }

    pub fn is_relocation_table(&self) -> bool {
        self.sh_type == SHT_REL || self.sh_type == SHT_RELA
    }

    /// One past the last native address.
    pub fn end(&self) -> Address {
        self.address.wrapping_add(self.size as u64)
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.address && addr < self.end()
    }

    /// File offset of `len` bytes at native `addr`, if all of them lie in
    /// this section's file data.
    pub fn host_offset(&self, addr: Address, len: usize) -> Option<usize> {
        if !self.has_file_data() {
            return None;
        }
        let delta = usize::try_from(addr.offset_from(self.address)?).ok()?;
        if delta.checked_add(len)? > self.size {
            return None;
        }
        self.offset.checked_add(delta)
    }

    /// Classification for the image store.
    pub fn image_flags(&self) -> SectionFlags {
        let mut flags = SectionFlags::empty();
        if self.flags.contains(SectionHeaderFlags::EXECINSTR) {
            flags |= SectionFlags::CODE;
        }
        if self.flags.contains(SectionHeaderFlags::WRITE) {
            flags |= SectionFlags::DATA;
        } else {
            flags |= SectionFlags::READ_ONLY;
        }
        if !self.has_file_data() {
            flags |= SectionFlags::BSS;
        }
        flags
    }
}

/// All sections of a loaded file plus the well-known ones.
#[derive(Debug, Clone, Default)]
pub struct SectionTable {
    sections: Vec<SectionParam>,
    shstrndx: Option<usize>,
    /// `.plt`
    pub plt: Option<usize>,
    /// `.rel.plt` or `.rela.plt`
    pub rel_plt: Option<usize>,
    /// `.dynamic`
    pub dynamic: Option<usize>,
    /// `.got`
    pub got: Option<usize>,
}

impl SectionTable {
    /// Build the table from a validated layout.
    ///
    /// For relocatable objects, allocated sections without an address are
    /// placed one after another from `relocatable_base`.
    pub fn resolve(
        layout: &ElfLayout,
        data: &[u8],
        relocatable_base: u32,
        sink: &mut dyn LogSink,
    ) -> Self {
        let count = layout.section_headers.len();
        let in_range = |i: u32| (i as usize) < count && i != 0;

        let mut table = SectionTable {
            shstrndx: Some(layout.header.e_shstrndx as usize).filter(|&i| i != 0 && i < count),
            ..Default::default()
        };

        let mut next_free = relocatable_base as u64;
        for (index, sh) in layout.section_headers.iter().enumerate() {
            let mut address = Address::from(sh.sh_addr);
            if layout.is_relocatable()
                && index != 0
                && sh.sh_flags.contains(SectionHeaderFlags::ALLOC)
                && sh.sh_addr == 0
                && sh.sh_size > 0
            {
                let placed = Address::new(next_free).align_up(sh.sh_addralign.max(1) as u64);
                if let Some(placed) = placed {
                    address = placed;
                    next_free = placed.value() + sh.sh_size as u64;
                }
            }

            let mut param = SectionParam {
                index,
                name: String::new(),
                sh_type: sh.sh_type,
                flags: sh.sh_flags,
                address,
                offset: sh.sh_offset as usize,
                size: sh.sh_size as usize,
                entry_size: sh.sh_entsize as usize,
                link: sh.sh_link,
                info: sh.sh_info,
                string_table: None,
                symbol_count: 0,
                symbol_table: None,
                target: None,
                has_addend: sh.sh_type == SHT_RELA,
            };

            match sh.sh_type {
                SHT_SYMTAB | SHT_DYNSYM => {
                    let link = sh.sh_link;
                    if in_range(link) && layout.section_headers[link as usize].sh_type == SHT_STRTAB {
                        param.string_table = Some(link as usize);
                    } else {
                        diag!(sink, Warn, "Symbol table {} has no string table (link {})", index, link);
                    }
                    if param.entry_size != SYM_SIZE {
                        diag!(
                            sink,
                            Debug,
                            "Symbol table {} entry size {} (using {})",
                            index,
                            param.entry_size,
                            SYM_SIZE
                        );
                        param.entry_size = SYM_SIZE;
                    }
                    param.symbol_count = param.size / SYM_SIZE;
                }
                SHT_REL | SHT_RELA => {
                    let expected = if param.has_addend { RELA_SIZE } else { REL_SIZE };
                    if param.entry_size != expected {
                        diag!(
                            sink,
                            Debug,
                            "Relocation section {} entry size {} (using {})",
                            index,
                            param.entry_size,
                            expected
                        );
                        param.entry_size = expected;
                    }
                    if in_range(sh.sh_info) {
                        param.target = Some(sh.sh_info as usize);
                    }
                    let link = sh.sh_link;
                    if in_range(link)
                        && matches!(
                            layout.section_headers[link as usize].sh_type,
                            SHT_SYMTAB | SHT_DYNSYM
                        )
                    {
                        param.symbol_table = Some(link as usize);
                    } else {
                        diag!(sink, Warn, "Relocation section {} has no symbol table", index);
                    }
                }
                _ => {}
            }

            table.sections.push(param);
        }

        // Names need the whole table in place
        for index in 0..count {
            let name_offset = layout.section_headers[index].sh_name;
            let name = table
                .shstrndx
                .and_then(|strtab| table.get_str_ptr(data, strtab, name_offset))
                .map(String::from);
            if let Some(name) = name {
                table.sections[index].name = name;
            }
        }

        for param in &table.sections {
            match param.name.as_str() {
                ".plt" => table.plt = Some(param.index),
                ".rel.plt" | ".rela.plt" => table.rel_plt = Some(param.index),
                ".got" => table.got = Some(param.index),
                ".dynamic" => table.dynamic = Some(param.index),
                _ => {}
            }
        }
        if table.dynamic.is_none() {
            table.dynamic = table
                .sections
                .iter()
                .find(|s| s.sh_type == SHT_DYNAMIC)
                .map(|s| s.index);
        }

        table
    }

    /// NUL-terminated string at `offset` in section `section`.
    pub fn get_str_ptr<'a>(&self, data: &'a [u8], section: usize, offset: u32) -> Option<&'a str> {
        let sect = self.sections.get(section)?;
        if section == 0 || !sect.has_file_data() {
            return None;
        }
        let start = sect.offset.checked_add(offset as usize)?;
        let end = sect.offset.checked_add(sect.size)?;
        let bytes = data.get(start..end)?;
        let len = bytes.iter().position(|&b| b == 0)?;
        core::str::from_utf8(&bytes[..len]).ok()
    }

    /// File contents of section `index` (empty for `SHT_NOBITS`).
    pub fn section_data<'a>(&self, data: &'a [u8], index: usize) -> Option<&'a [u8]> {
        let sect = self.sections.get(index)?;
        if !sect.has_file_data() {
            return Some(&[]);
        }
        data.get(sect.offset..sect.offset.checked_add(sect.size)?)
    }

    pub fn get(&self, index: usize) -> Option<&SectionParam> {
        self.sections.get(index)
    }

    pub fn by_name(&self, name: &str) -> Option<&SectionParam> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SectionParam> {
        self.sections.iter()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Sections that belong in the image store.
    pub fn mapped(&self) -> impl Iterator<Item = &SectionParam> {
        self.sections.iter().filter(|s| s.is_mapped())
    }

    /// Mapped section containing `addr`.
    pub fn containing(&self, addr: Address) -> Option<&SectionParam> {
        self.mapped().find(|s| s.contains(addr))
    }

    /// File offset of `len` bytes at native `addr`.
    pub fn host_offset(&self, addr: Address, len: usize) -> Option<usize> {
        self.containing(addr)?.host_offset(addr, len)
    }

    pub fn lowest_address(&self) -> Option<Address> {
        self.mapped().map(|s| s.address).min()
    }

    /// One past the highest mapped address.
    pub fn highest_address(&self) -> Option<Address> {
        self.mapped().map(|s| s.end()).max()
    }
}
