//! ELF32 image writer.
//!
//! Produces small, well-formed ELF32 files in either byte order. Used to
//! build test inputs and fuzz seeds.
//!
//! Layout: header, program headers, section contents (4-byte aligned),
//! `.shstrtab`, section headers. User sections are numbered from 1 in the
//! order they were added; `.shstrtab` comes last.

use alloc::string::String;
use alloc::vec::Vec;

use crate::endian::Endian;
use crate::types::*;

/// String table under construction. Offset 0 is the empty string.
#[derive(Debug, Clone)]
pub struct StrTab {
    bytes: Vec<u8>,
}

impl Default for StrTab {
    fn default() -> Self {
        Self { bytes: alloc::vec![0] }
    }
}

impl StrTab {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `s` and return its offset.
    pub fn add(&mut self, s: &str) -> u32 {
        let offset = self.bytes.len() as u32;
        self.bytes.extend_from_slice(s.as_bytes());
        self.bytes.push(0);
        offset
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// One symbol table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolSpec {
    pub name: u32,
    pub value: u32,
    pub size: u32,
    pub info: u8,
    pub other: u8,
    pub shndx: u16,
}

impl SymbolSpec {
    pub fn new(name: u32, value: u32, size: u32, bind: u8, sym_type: u8, shndx: u16) -> Self {
        Self {
            name,
            value,
            size,
            info: (bind << 4) | (sym_type & 0xf),
            other: 0,
            shndx,
        }
    }

    /// Global function defined in section `shndx`.
    pub fn func(name: u32, value: u32, shndx: u16) -> Self {
        Self::new(name, value, 0, STB_GLOBAL, STT_FUNC, shndx)
    }

    /// Undefined global function.
    pub fn import(name: u32) -> Self {
        Self::new(name, 0, 0, STB_GLOBAL, STT_FUNC, SHN_UNDEF)
    }
}

/// One relocation entry. `addend` is written only to RELA sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelSpec {
    pub offset: u32,
    pub sym: u32,
    pub r_type: u8,
    pub addend: i32,
}

impl RelSpec {
    pub fn new(offset: u32, sym: u32, r_type: u8) -> Self {
        Self {
            offset,
            sym,
            r_type,
            addend: 0,
        }
    }

    pub fn with_addend(mut self, addend: i32) -> Self {
        self.addend = addend;
        self
    }
}

#[derive(Debug, Clone)]
enum Contents {
    Bytes(Vec<u8>),
    NoBits(u32),
    Symbols(Vec<SymbolSpec>),
    Relocs(Vec<RelSpec>),
    Dynamic(Vec<(u32, u32)>),
}

/// A section to emit.
#[derive(Debug, Clone)]
pub struct SectionSpec {
    pub name: String,
    pub sh_type: u32,
    pub flags: SectionHeaderFlags,
    pub addr: u32,
    pub link: u32,
    pub info: u32,
    pub align: u32,
    pub entsize: u32,
    contents: Contents,
}

impl SectionSpec {
    fn with(name: &str, sh_type: u32, contents: Contents) -> Self {
        Self {
            name: String::from(name),
            sh_type,
            flags: SectionHeaderFlags::empty(),
            addr: 0,
            link: 0,
            info: 0,
            align: 4,
            entsize: 0,
            contents,
        }
    }

    /// Allocated `SHT_PROGBITS` section.
    pub fn progbits(name: &str, addr: u32, data: Vec<u8>) -> Self {
        let mut spec = Self::with(name, 1, Contents::Bytes(data));
        spec.flags = SectionHeaderFlags::ALLOC;
        spec.addr = addr;
        spec
    }

    /// Allocated, writable `SHT_NOBITS` section.
    pub fn nobits(name: &str, addr: u32, size: u32) -> Self {
        let mut spec = Self::with(name, SHT_NOBITS, Contents::NoBits(size));
        spec.flags = SectionHeaderFlags::ALLOC | SectionHeaderFlags::WRITE;
        spec.addr = addr;
        spec
    }

    /// String table.
    pub fn strtab(name: &str, table: &StrTab) -> Self {
        Self::with(name, SHT_STRTAB, Contents::Bytes(table.bytes().to_vec()))
    }

    /// Symbol table (`SHT_SYMTAB`) linked to the string table at `strtab`.
    /// A null entry is prepended.
    pub fn symtab(name: &str, strtab: usize, symbols: Vec<SymbolSpec>) -> Self {
        let mut spec = Self::with(name, SHT_SYMTAB, Contents::Symbols(symbols));
        spec.link = strtab as u32;
        spec.info = 1;
        spec.entsize = SYM_SIZE as u32;
        spec
    }

    /// Dynamic symbol table (`SHT_DYNSYM`).
    pub fn dynsym(name: &str, strtab: usize, symbols: Vec<SymbolSpec>) -> Self {
        let mut spec = Self::symtab(name, strtab, symbols);
        spec.sh_type = SHT_DYNSYM;
        spec.flags = SectionHeaderFlags::ALLOC;
        spec
    }

    /// `SHT_REL` section for `target` using the symbol table at `symtab`.
    pub fn rel(name: &str, symtab: usize, target: usize, entries: Vec<RelSpec>) -> Self {
        let mut spec = Self::with(name, SHT_REL, Contents::Relocs(entries));
        spec.link = symtab as u32;
        spec.info = target as u32;
        spec.entsize = REL_SIZE as u32;
        spec
    }

    /// `SHT_RELA` section for `target` using the symbol table at `symtab`.
    pub fn rela(name: &str, symtab: usize, target: usize, entries: Vec<RelSpec>) -> Self {
        let mut spec = Self::rel(name, symtab, target, entries);
        spec.sh_type = SHT_RELA;
        spec.entsize = RELA_SIZE as u32;
        spec
    }

    /// `SHT_DYNAMIC` section of `(tag, value)` pairs; a `DT_NULL` entry is
    /// appended.
    pub fn dynamic(name: &str, strtab: usize, entries: Vec<(u32, u32)>) -> Self {
        let mut spec = Self::with(name, SHT_DYNAMIC, Contents::Dynamic(entries));
        spec.link = strtab as u32;
        spec.entsize = DYN_SIZE as u32;
        spec
    }

    /// Mark executable.
    pub fn code(mut self) -> Self {
        self.flags |= SectionHeaderFlags::EXECINSTR;
        self
    }

    /// Mark writable.
    pub fn writable(mut self) -> Self {
        self.flags |= SectionHeaderFlags::WRITE;
        self
    }

    fn encode(&self, endian: Endian) -> Vec<u8> {
        let mut out = Vec::new();
        match &self.contents {
            Contents::Bytes(bytes) => out.extend_from_slice(bytes),
            Contents::NoBits(_) => {}
            Contents::Symbols(symbols) => {
                out.resize(SYM_SIZE, 0);
                for sym in symbols {
                    push4(&mut out, endian, sym.name);
                    push4(&mut out, endian, sym.value);
                    push4(&mut out, endian, sym.size);
                    out.push(sym.info);
                    out.push(sym.other);
                    push2(&mut out, endian, sym.shndx);
                }
            }
            Contents::Relocs(entries) => {
                for rel in entries {
                    push4(&mut out, endian, rel.offset);
                    push4(&mut out, endian, (rel.sym << 8) | rel.r_type as u32);
                    if self.sh_type == SHT_RELA {
                        push4(&mut out, endian, rel.addend as u32);
                    }
                }
            }
            Contents::Dynamic(entries) => {
                for &(tag, value) in entries.iter().chain(core::iter::once(&(DT_NULL, 0))) {
                    push4(&mut out, endian, tag);
                    push4(&mut out, endian, value);
                }
            }
        }
        out
    }

    fn mem_size(&self, encoded: usize) -> u32 {
        match self.contents {
            Contents::NoBits(size) => size,
            _ => encoded as u32,
        }
    }
}

/// Program header to emit.
#[derive(Debug, Clone, Copy)]
pub enum SegmentSpec {
    /// `PT_LOAD` covering exactly one section.
    Section { index: usize, flags: SegmentFlags },
    /// Header written as given.
    Raw(Elf32ProgramHeader),
}

/// ELF32 file writer.
#[derive(Debug, Clone)]
pub struct ElfBuilder {
    endian: Endian,
    machine: u16,
    elf_type: u16,
    entry: u32,
    sections: Vec<SectionSpec>,
    segments: Vec<SegmentSpec>,
}

impl ElfBuilder {
    /// Executable for `machine` with no sections.
    pub fn new(machine: u16, endian: Endian) -> Self {
        Self {
            endian,
            machine,
            elf_type: ET_EXEC,
            entry: 0,
            sections: Vec::new(),
            segments: Vec::new(),
        }
    }

    pub fn elf_type(&mut self, elf_type: u16) -> &mut Self {
        self.elf_type = elf_type;
        self
    }

    pub fn entry(&mut self, entry: u32) -> &mut Self {
        self.entry = entry;
        self
    }

    /// Add a section and return its index.
    pub fn section(&mut self, spec: SectionSpec) -> usize {
        self.sections.push(spec);
        self.sections.len()
    }

    /// Index the next added section will get.
    pub fn next_index(&self) -> usize {
        self.sections.len() + 1
    }

    pub fn segment(&mut self, spec: SegmentSpec) -> &mut Self {
        self.segments.push(spec);
        self
    }

    /// Serialize the file.
    ///
    /// # Panics
    ///
    /// If a [`SegmentSpec::Section`] names a section that was never added.
    pub fn build(&self) -> Vec<u8> {
        let e = self.endian;
        let phoff = EHDR_SIZE;
        let mut out = alloc::vec![0u8; phoff + PHDR_SIZE * self.segments.len()];

        // Section contents
        let mut shstrtab = StrTab::new();
        let mut placed = Vec::with_capacity(self.sections.len());
        for spec in &self.sections {
            let name = shstrtab.add(&spec.name);
            align(&mut out, 4);
            let offset = out.len() as u32;
            let encoded = spec.encode(e);
            let size = spec.mem_size(encoded.len());
            out.extend_from_slice(&encoded);
            placed.push((name, offset, size));
        }
        let shstrtab_name = shstrtab.add(".shstrtab");
        let shstrtab_offset = out.len() as u32;
        out.extend_from_slice(shstrtab.bytes());

        align(&mut out, 4);
        let shoff = out.len();
        let shnum = self.sections.len() + 2;

        // Section headers: null, user sections, .shstrtab
        out.resize(shoff + SHDR_SIZE, 0);
        for (spec, &(name, offset, size)) in self.sections.iter().zip(&placed) {
            let fields = [
                name,
                spec.sh_type,
                spec.flags.bits(),
                spec.addr,
                offset,
                size,
                spec.link,
                spec.info,
                spec.align,
                spec.entsize,
            ];
            for field in fields {
                push4(&mut out, e, field);
            }
        }
        let fields = [
            shstrtab_name,
            SHT_STRTAB,
            0,
            0,
            shstrtab_offset,
            shstrtab.bytes().len() as u32,
            0,
            0,
            1,
            0,
        ];
        for field in fields {
            push4(&mut out, e, field);
        }

        // Program headers
        for (i, segment) in self.segments.iter().enumerate() {
            let ph = match *segment {
                SegmentSpec::Raw(ph) => ph,
                SegmentSpec::Section { index, flags } => {
                    let spec = &self.sections[index - 1];
                    let (_, offset, size) = placed[index - 1];
                    let file_size = match spec.contents {
                        Contents::NoBits(_) => 0,
                        _ => size,
                    };
                    Elf32ProgramHeader {
                        p_type: PT_LOAD,
                        p_offset: offset,
                        p_vaddr: spec.addr,
                        p_paddr: spec.addr,
                        p_filesz: file_size,
                        p_memsz: size,
                        p_flags: flags,
                        p_align: 0x1000,
                    }
                }
            };
            let at = phoff + i * PHDR_SIZE;
            let fields = [
                ph.p_type,
                ph.p_offset,
                ph.p_vaddr,
                ph.p_paddr,
                ph.p_filesz,
                ph.p_memsz,
                ph.p_flags.bits(),
                ph.p_align,
            ];
            for (j, field) in fields.into_iter().enumerate() {
                e.write4(&mut out, at + 4 * j, field);
            }
        }

        // File header
        out[..4].copy_from_slice(&ELF_MAGIC);
        out[EI_CLASS] = ELFCLASS32;
        out[EI_DATA] = match e {
            Endian::Little => ELFDATA2LSB,
            Endian::Big => ELFDATA2MSB,
        };
        out[EI_VERSION] = EV_CURRENT;
        e.write2(&mut out, 16, self.elf_type);
        e.write2(&mut out, 18, self.machine);
        e.write4(&mut out, 20, EV_CURRENT as u32);
        e.write4(&mut out, 24, self.entry);
        e.write4(&mut out, 28, if self.segments.is_empty() { 0 } else { phoff as u32 });
        e.write4(&mut out, 32, shoff as u32);
        e.write2(&mut out, 40, EHDR_SIZE as u16);
        e.write2(&mut out, 42, PHDR_SIZE as u16);
        e.write2(&mut out, 44, self.segments.len() as u16);
        e.write2(&mut out, 46, SHDR_SIZE as u16);
        e.write2(&mut out, 48, shnum as u16);
        e.write2(&mut out, 50, (shnum - 1) as u16);

        out
    }
}

fn align(out: &mut Vec<u8>, to: usize) {
    let rem = out.len() % to;
    if rem != 0 {
        out.resize(out.len() + to - rem, 0);
    }
}

fn push2(out: &mut Vec<u8>, endian: Endian, value: u16) {
    let at = out.len();
    out.resize(at + 2, 0);
    endian.write2(out, at, value);
}

fn push4(out: &mut Vec<u8>, endian: Endian, value: u32) {
    let at = out.len();
    out.resize(at + 4, 0);
    endian.write4(out, at, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_layout() {
        let mut b = ElfBuilder::new(EM_PPC, Endian::Big);
        let text = b.section(SectionSpec::progbits(".text", 0x1_0000, vec![1, 2, 3]).code());
        let bss = b.section(SectionSpec::nobits(".bss", 0x2_0000, 0x40));
        b.segment(SegmentSpec::Section {
            index: text,
            flags: SegmentFlags::R | SegmentFlags::X,
        });
        b.segment(SegmentSpec::Section {
            index: bss,
            flags: SegmentFlags::R | SegmentFlags::W,
        });
        let data = b.build();
        let e = Endian::Big;

        assert_eq!(&data[..4], &ELF_MAGIC);
        assert_eq!(data[EI_DATA], ELFDATA2MSB);
        assert_eq!(e.read2(&data, 18), Some(EM_PPC));
        assert_eq!(e.read2(&data, 44), Some(2));
        assert_eq!(e.read2(&data, 48), Some(4));
        assert_eq!(e.read2(&data, 50), Some(3));

        let shoff = e.read4(&data, 32).unwrap() as usize;
        assert_eq!(data.len(), shoff + 4 * SHDR_SIZE);

        let bss_ph = Elf32ProgramHeader::read(&data, EHDR_SIZE + PHDR_SIZE, e).unwrap();
        assert_eq!(bss_ph.p_filesz, 0);
        assert_eq!(bss_ph.p_memsz, 0x40);
        assert_eq!(bss_ph.p_vaddr, 0x2_0000);
    }

    #[test]
    fn test_rel_and_rela_entry_sizes() {
        let mut b = ElfBuilder::new(EM_386, Endian::Little);
        let entries = vec![RelSpec::new(0x8010, 1, 1).with_addend(8)];
        let rel = SectionSpec::rel(".rel.text", 0, 0, entries.clone()).encode(Endian::Little);
        let rela = SectionSpec::rela(".rela.text", 0, 0, entries).encode(Endian::Little);
        assert_eq!(rel.len(), REL_SIZE);
        assert_eq!(rela.len(), RELA_SIZE);
        assert_eq!(Endian::Little.read4(&rela, 8), Some(8));
        b.section(SectionSpec::progbits(".text", 0x8000, vec![0; 4]));
        assert_eq!(b.next_index(), 2);
    }
}
