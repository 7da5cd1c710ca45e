//! ELF32 constants and record layouts.
//!
//! Records are decoded field by field through [`Endian`]; nothing is cast
//! from the raw buffer.

use core::fmt;

use rekon_db::{LoadError, Machine};

use crate::endian::Endian;

/// ELF magic number: 0x7F 'E' 'L' 'F'
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Index of the class byte in `e_ident`
pub const EI_CLASS: usize = 4;
/// Index of the data encoding byte in `e_ident`
pub const EI_DATA: usize = 5;
/// Index of the version byte in `e_ident`
pub const EI_VERSION: usize = 6;

/// ELF class: 32-bit
pub const ELFCLASS32: u8 = 1;
/// ELF class: 64-bit
pub const ELFCLASS64: u8 = 2;

/// Data encoding: little endian
pub const ELFDATA2LSB: u8 = 1;
/// Data encoding: big endian
pub const ELFDATA2MSB: u8 = 2;

/// Current ELF version
pub const EV_CURRENT: u8 = 1;

/// ELF type: relocatable object
pub const ET_REL: u16 = 1;
/// ELF type: executable
pub const ET_EXEC: u16 = 2;
/// ELF type: shared object
pub const ET_DYN: u16 = 3;

/// Machine: SPARC
pub const EM_SPARC: u16 = 2;
/// Machine: Intel 80386
pub const EM_386: u16 = 3;
/// Machine: Motorola 68000
pub const EM_68K: u16 = 4;
/// Machine: MIPS
pub const EM_MIPS: u16 = 8;
/// Machine: HP PA-RISC
pub const EM_PARISC: u16 = 15;
/// Machine: SPARC v8+
pub const EM_SPARC32PLUS: u16 = 18;
/// Machine: PowerPC
pub const EM_PPC: u16 = 20;
/// Machine: ARM
pub const EM_ARM: u16 = 40;

/// Program header type: loadable segment
pub const PT_LOAD: u32 = 1;
/// Program header type: dynamic linking info
pub const PT_DYNAMIC: u32 = 2;

/// Section type: symbol table
pub const SHT_SYMTAB: u32 = 2;
/// Section type: string table
pub const SHT_STRTAB: u32 = 3;
/// Section type: relocations with addends
pub const SHT_RELA: u32 = 4;
/// Section type: dynamic linking table
pub const SHT_DYNAMIC: u32 = 6;
/// Section type: occupies no file space
pub const SHT_NOBITS: u32 = 8;
/// Section type: relocations without addends
pub const SHT_REL: u32 = 9;
/// Section type: dynamic symbol table
pub const SHT_DYNSYM: u32 = 11;

/// Undefined section index
pub const SHN_UNDEF: u16 = 0;
/// Start of the reserved section indices
pub const SHN_LORESERVE: u16 = 0xff00;
/// Absolute symbol value
pub const SHN_ABS: u16 = 0xfff1;
/// Common block
pub const SHN_COMMON: u16 = 0xfff2;

/// Symbol binding: local
pub const STB_LOCAL: u8 = 0;
/// Symbol binding: global
pub const STB_GLOBAL: u8 = 1;
/// Symbol binding: weak
pub const STB_WEAK: u8 = 2;

/// Symbol type: unspecified
pub const STT_NOTYPE: u8 = 0;
/// Symbol type: data object
pub const STT_OBJECT: u8 = 1;
/// Symbol type: function
pub const STT_FUNC: u8 = 2;
/// Symbol type: section
pub const STT_SECTION: u8 = 3;
/// Symbol type: source file
pub const STT_FILE: u8 = 4;

/// Dynamic tag: end of table
pub const DT_NULL: u32 = 0;
/// Dynamic tag: needed library
pub const DT_NEEDED: u32 = 1;
/// Dynamic tag: shared object name
pub const DT_SONAME: u32 = 14;

/// ELF32 header size
pub const EHDR_SIZE: usize = 52;
/// ELF32 program header size
pub const PHDR_SIZE: usize = 32;
/// ELF32 section header size
pub const SHDR_SIZE: usize = 40;
/// ELF32 symbol size
pub const SYM_SIZE: usize = 16;
/// `Elf32_Rel` size
pub const REL_SIZE: usize = 8;
/// `Elf32_Rela` size
pub const RELA_SIZE: usize = 12;
/// `Elf32_Dyn` size
pub const DYN_SIZE: usize = 8;

bitflags::bitflags! {
    /// Segment permissions (`p_flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        const X = 0x1;
        const W = 0x2;
        const R = 0x4;
    }
}

bitflags::bitflags! {
    /// Section attributes (`sh_flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionHeaderFlags: u32 {
        const WRITE = 0x1;
        const ALLOC = 0x2;
        const EXECINSTR = 0x4;
    }
}

/// Map `e_machine` onto the decompiler's machine set.
pub fn machine_from(code: u16) -> Machine {
    match code {
        EM_386 => Machine::X86,
        EM_SPARC | EM_SPARC32PLUS => Machine::Sparc,
        EM_PPC => Machine::Ppc,
        EM_MIPS => Machine::Mips,
        EM_68K => Machine::M68k,
        EM_ARM => Machine::Arm,
        EM_PARISC => Machine::HpRisc,
        other => Machine::Other(other),
    }
}

/// ELF32 file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf32Header {
    pub e_ident: [u8; 16],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    /// Entry point virtual address
    pub e_entry: u32,
    /// Program header table file offset
    pub e_phoff: u32,
    /// Section header table file offset
    pub e_shoff: u32,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    /// Section name string table index
    pub e_shstrndx: u16,
}

impl Elf32Header {
    /// Decode the header. `data` must hold at least [`EHDR_SIZE`] bytes.
    pub fn read(data: &[u8], endian: Endian) -> Option<Self> {
        let mut e_ident = [0u8; 16];
        e_ident.copy_from_slice(data.get(..16)?);
        Some(Self {
            e_ident,
            e_type: endian.read2(data, 16)?,
            e_machine: endian.read2(data, 18)?,
            e_version: endian.read4(data, 20)?,
            e_entry: endian.read4(data, 24)?,
            e_phoff: endian.read4(data, 28)?,
            e_shoff: endian.read4(data, 32)?,
            e_flags: endian.read4(data, 36)?,
            e_ehsize: endian.read2(data, 40)?,
            e_phentsize: endian.read2(data, 42)?,
            e_phnum: endian.read2(data, 44)?,
            e_shentsize: endian.read2(data, 46)?,
            e_shnum: endian.read2(data, 48)?,
            e_shstrndx: endian.read2(data, 50)?,
        })
    }
}

/// ELF32 program header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf32ProgramHeader {
    pub p_type: u32,
    pub p_offset: u32,
    pub p_vaddr: u32,
    pub p_paddr: u32,
    pub p_filesz: u32,
    pub p_memsz: u32,
    pub p_flags: SegmentFlags,
    pub p_align: u32,
}

impl Elf32ProgramHeader {
    pub fn read(data: &[u8], offset: usize, endian: Endian) -> Option<Self> {
        let field = |at: usize| endian.read4(data, offset.checked_add(at)?);
        Some(Self {
            p_type: field(0)?,
            p_offset: field(4)?,
            p_vaddr: field(8)?,
            p_paddr: field(12)?,
            p_filesz: field(16)?,
            p_memsz: field(20)?,
            p_flags: SegmentFlags::from_bits_retain(field(24)?),
            p_align: field(28)?,
        })
    }

    /// Check if this is a loadable segment
    pub fn is_load(&self) -> bool {
        self.p_type == PT_LOAD
    }
}

/// ELF32 section header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf32SectionHeader {
    /// Offset of the name in the section name string table
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: SectionHeaderFlags,
    pub sh_addr: u32,
    pub sh_offset: u32,
    pub sh_size: u32,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u32,
    pub sh_entsize: u32,
}

impl Elf32SectionHeader {
    pub fn read(data: &[u8], offset: usize, endian: Endian) -> Option<Self> {
        let field = |at: usize| endian.read4(data, offset.checked_add(at)?);
        Some(Self {
            sh_name: field(0)?,
            sh_type: field(4)?,
            sh_flags: SectionHeaderFlags::from_bits_retain(field(8)?),
            sh_addr: field(12)?,
            sh_offset: field(16)?,
            sh_size: field(20)?,
            sh_link: field(24)?,
            sh_info: field(28)?,
            sh_addralign: field(32)?,
            sh_entsize: field(36)?,
        })
    }

    /// Check if the section occupies file bytes
    pub fn has_file_data(&self) -> bool {
        self.sh_type != SHT_NOBITS
    }
}

/// ELF32 symbol table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf32Symbol {
    pub st_name: u32,
    pub st_value: u32,
    pub st_size: u32,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
}

impl Elf32Symbol {
    pub fn read(data: &[u8], offset: usize, endian: Endian) -> Option<Self> {
        Some(Self {
            st_name: endian.read4(data, offset)?,
            st_value: endian.read4(data, offset.checked_add(4)?)?,
            st_size: endian.read4(data, offset.checked_add(8)?)?,
            st_info: endian.read_u8(data, offset.checked_add(12)?)?,
            st_other: endian.read_u8(data, offset.checked_add(13)?)?,
            st_shndx: endian.read2(data, offset.checked_add(14)?)?,
        })
    }

    /// Binding (`STB_*`)
    pub fn bind(&self) -> u8 {
        self.st_info >> 4
    }

    /// Type (`STT_*`)
    pub fn sym_type(&self) -> u8 {
        self.st_info & 0xf
    }

    /// Check if the symbol is undefined (an import)
    pub fn is_undefined(&self) -> bool {
        self.st_shndx == SHN_UNDEF
    }

    /// Check if the symbol is a common block; `st_value` is its alignment
    pub fn is_common(&self) -> bool {
        self.st_shndx == SHN_COMMON
    }
}

/// Relocation entry, either layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf32Rel {
    pub r_offset: u32,
    pub r_info: u32,
    /// Present only for `Elf32_Rela`.
    pub r_addend: Option<i32>,
}

impl Elf32Rel {
    /// Decode one entry. `Elf32_Rel` entries never touch the addend field.
    pub fn read(data: &[u8], offset: usize, endian: Endian, has_addend: bool) -> Option<Self> {
        let r_addend = if has_addend {
            Some(endian.read4(data, offset.checked_add(8)?)? as i32)
        } else {
            None
        };
        Some(Self {
            r_offset: endian.read4(data, offset)?,
            r_info: endian.read4(data, offset.checked_add(4)?)?,
            r_addend,
        })
    }

    /// Symbol table index
    pub fn sym(&self) -> u32 {
        self.r_info >> 8
    }

    /// Machine-specific relocation type
    pub fn r_type(&self) -> u8 {
        self.r_info as u8
    }
}

/// ELF parsing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// Binary too small to contain the ELF header
    TooSmall,
    /// Invalid ELF magic number
    InvalidMagic,
    /// Not a 32-bit ELF file
    InvalidClass,
    /// Unknown data encoding
    InvalidEncoding,
    /// Invalid ELF version
    InvalidVersion,
    /// Program or section header entry size does not match ELF32
    InvalidEntrySize,
    /// Program header table extends beyond the file
    ProgramHeadersOutOfBounds,
    /// Section header table extends beyond the file
    SectionHeadersOutOfBounds,
    /// More program headers than the configured limit
    TooManySegments,
    /// More section headers than the configured limit
    TooManySections,
    /// `e_shstrndx` does not name a section
    InvalidStringTableIndex,
    /// Segment file data extends beyond the file
    SegmentOutOfBounds,
    /// Section file data extends beyond the file
    SectionOutOfBounds,
}

impl ElfError {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElfError::TooSmall => "file too small for an ELF header",
            ElfError::InvalidMagic => "invalid ELF magic",
            ElfError::InvalidClass => "not a 32-bit ELF file",
            ElfError::InvalidEncoding => "invalid data encoding",
            ElfError::InvalidVersion => "invalid ELF version",
            ElfError::InvalidEntrySize => "invalid header table entry size",
            ElfError::ProgramHeadersOutOfBounds => "program header table out of bounds",
            ElfError::SectionHeadersOutOfBounds => "section header table out of bounds",
            ElfError::TooManySegments => "too many program headers",
            ElfError::TooManySections => "too many section headers",
            ElfError::InvalidStringTableIndex => "invalid section name string table index",
            ElfError::SegmentOutOfBounds => "segment data out of bounds",
            ElfError::SectionOutOfBounds => "section data out of bounds",
        }
    }
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::error::Error for ElfError {}

impl From<ElfError> for LoadError {
    fn from(err: ElfError) -> Self {
        LoadError::Malformed(err.as_str())
    }
}
