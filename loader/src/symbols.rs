//! Symbol collection.
//!
//! Walks every symbol table and produces the symbols to register, plus an
//! address for every import. Imports without an address in the file get
//! their PLT stub or, failing that, a slot in the extern area. Common
//! blocks of relocatable objects are laid out in the extern area too.

use alloc::string::String;
use alloc::vec::Vec;

use hashbrown::HashMap;
use rekon_db::{Address, BinarySymbol, LogSink, SymbolAttrs, SymbolKind};

use crate::header::ElfLayout;
use crate::plt::PltInfo;
use crate::sections::SectionTable;
use crate::types::*;

/// Name of the section holding extern slots
pub const EXTERN_SECTION: &str = "$extern";

/// Synthetic space for symbols that have no address in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternArea {
    base: Address,
    slot_size: u64,
    /// Bytes handed out
    used: u64,
}

impl ExternArea {
    /// Area starting at the first page boundary at or above `after`.
    pub fn new(after: Address, slot_size: u64) -> Self {
        Self {
            base: after.align_up(0x1000).unwrap_or(after),
            slot_size: slot_size.max(1),
            used: 0,
        }
    }

    /// Next import slot.
    pub fn allocate(&mut self) -> Option<Address> {
        self.allocate_block(self.slot_size, 1)
    }

    /// `size` bytes aligned to `align`. Alignments that are not a power of
    /// two are ignored.
    pub fn allocate_block(&mut self, size: u64, align: u64) -> Option<Address> {
        let align = if align.is_power_of_two() { align } else { 1 };
        let start = self.used.checked_add(align - 1)? & !(align - 1);
        let addr = self.base.checked_add(start)?;
        self.used = start.checked_add(size.max(1))?;
        Some(addr)
    }

    pub fn base(&self) -> Address {
        self.base
    }

    pub fn size(&self) -> u64 {
        self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }
}

/// Read access to the symbol tables of a resolved file.
#[derive(Clone, Copy)]
pub struct SymbolContext<'a> {
    pub layout: &'a ElfLayout,
    pub sections: &'a SectionTable,
    pub data: &'a [u8],
}

impl<'a> SymbolContext<'a> {
    /// Entry `index` of symbol table `symtab`.
    pub fn read(&self, symtab: usize, index: u32) -> Option<Elf32Symbol> {
        let table = self.sections.get(symtab).filter(|s| s.is_symbol_table())?;
        if index as usize >= table.symbol_count {
            return None;
        }
        let contents = self.sections.section_data(self.data, symtab)?;
        Elf32Symbol::read(contents, index as usize * SYM_SIZE, self.layout.endian)
    }

    /// Name of `sym`, cut at the version suffix (`printf@@GLIBC_2.0`).
    pub fn name(&self, symtab: usize, sym: &Elf32Symbol) -> Option<&'a str> {
        let strtab = self.sections.get(symtab)?.string_table?;
        let full = self.sections.get_str_ptr(self.data, strtab, sym.st_name)?;
        let name = full.split('@').next().unwrap_or(full);
        (!name.is_empty()).then_some(name)
    }

    /// Address of a defined symbol.
    fn defined_address(&self, sym: &Elf32Symbol) -> Address {
        let value = Address::from(sym.st_value);
        if sym.st_shndx >= SHN_LORESERVE {
            return value;
        }
        let in_section = sym.sym_type() == STT_SECTION || self.layout.is_relocatable();
        match self.sections.get(sym.st_shndx as usize) {
            Some(section) if in_section => section.address.wrapping_add(sym.st_value as u64),
            _ => value,
        }
    }

    /// Symbol value `S` for relocation purposes. Undefined symbols resolve
    /// through `imports`; unknown ones are 0.
    pub fn value(&self, symtab: usize, index: u32, imports: &HashMap<String, Address>) -> Address {
        if index == 0 {
            return Address::ZERO;
        }
        let Some(sym) = self.read(symtab, index) else {
            return Address::ZERO;
        };
        if !sym.is_undefined() && !sym.is_common() {
            return self.defined_address(&sym);
        }
        self.name(symtab, &sym)
            .and_then(|name| imports.get(name).copied())
            .unwrap_or(Address::from(sym.st_value))
    }
}

/// Output of [`collect`].
#[derive(Debug, Clone, Default)]
pub struct CollectedSymbols {
    /// Symbols to register, in discovery order.
    pub symbols: Vec<BinarySymbol>,
    /// Address assigned to every import and common block, by name.
    pub imports: HashMap<String, Address>,
    /// Extern slots handed out, if any.
    pub extern_area: Option<ExternArea>,
}

fn kind_of(sym: &Elf32Symbol) -> SymbolKind {
    match sym.sym_type() {
        STT_FUNC => SymbolKind::Function,
        STT_OBJECT => SymbolKind::Object,
        _ => SymbolKind::Other,
    }
}

/// Collect the named, non-local symbols of every symbol table.
pub fn collect(
    ctx: &SymbolContext<'_>,
    plt: Option<&PltInfo>,
    extern_slot_size: u64,
    sink: &mut dyn LogSink,
) -> CollectedSymbols {
    let mut out = CollectedSymbols::default();
    let mut extern_area = ctx
        .sections
        .highest_address()
        .map(|end| ExternArea::new(end, extern_slot_size));

    let tables: Vec<usize> = ctx
        .sections
        .iter()
        .filter(|s| s.is_symbol_table())
        .map(|s| s.index)
        .collect();

    for symtab in tables {
        let Some(count) = ctx.sections.get(symtab).map(|s| s.symbol_count) else {
            continue;
        };
        let mut skipped = 0usize;

        for index in 1..count as u32 {
            let Some(sym) = ctx.read(symtab, index) else {
                break;
            };
            if sym.bind() == STB_LOCAL || matches!(sym.sym_type(), STT_SECTION | STT_FILE) {
                continue;
            }
            let Some(name) = ctx.name(symtab, &sym) else {
                skipped += 1;
                continue;
            };

            let mut attrs = SymbolAttrs::empty();
            if sym.bind() == STB_WEAK {
                attrs |= SymbolAttrs::WEAK;
            }
            let mut kind = kind_of(&sym);

            let address = if sym.is_undefined() {
                attrs |= SymbolAttrs::IMPORTED;
                let address = match out.imports.get(name) {
                    Some(&known) => Some(known),
                    None if sym.st_value != 0 => Some(Address::from(sym.st_value)),
                    None => {
                        let stub = plt
                            .filter(|p| p.symbol_table() == Some(symtab))
                            .and_then(|p| p.find_rel_plt_offset(index));
                        match stub {
                            Some(stub) => {
                                attrs |= SymbolAttrs::THUNK;
                                kind = SymbolKind::Function;
                                Some(stub)
                            }
                            None => extern_area.as_mut().and_then(|area| area.allocate()),
                        }
                    }
                };
                match address {
                    Some(address) => {
                        out.imports.insert(String::from(name), address);
                        address
                    }
                    None => {
                        diag!(sink, Debug, "No address for import {}", name);
                        continue;
                    }
                }
            } else if sym.is_common() {
                let block = match out.imports.get(name) {
                    Some(&known) => Some(known),
                    None => extern_area
                        .as_mut()
                        .and_then(|area| area.allocate_block(sym.st_size as u64, sym.st_value as u64)),
                };
                match block {
                    Some(address) => {
                        out.imports.insert(String::from(name), address);
                        address
                    }
                    None => {
                        diag!(sink, Debug, "No space for common block {}", name);
                        continue;
                    }
                }
            } else {
                ctx.defined_address(&sym)
            };

            if address.is_zero() {
                continue;
            }

            out.symbols.push(
                BinarySymbol::new(name, address)
                    .with_size(sym.st_size as u64)
                    .with_kind(kind)
                    .with_attrs(attrs),
            );
        }

        if skipped > 0 {
            diag!(sink, Debug, "Symbol table {}: {} symbols without a name", symtab, skipped);
        }
    }

    out.extern_area = extern_area.filter(|area| !area.is_empty());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ElfBuilder, SectionSpec, StrTab, SymbolSpec};
    use crate::endian::Endian;
    use crate::header::{parse, ParseLimits};
    use alloc::vec;
    use rekon_db::MemorySink;

    struct Fixture {
        data: Vec<u8>,
        layout: ElfLayout,
        sections: SectionTable,
    }

    impl Fixture {
        fn new(data: Vec<u8>) -> Self {
            let layout = parse(&data, &ParseLimits::default()).unwrap();
            let sections = SectionTable::resolve(&layout, &data, 0x0800_0000, &mut MemorySink::new());
            Self {
                data,
                layout,
                sections,
            }
        }

        fn ctx(&self) -> SymbolContext<'_> {
            SymbolContext {
                layout: &self.layout,
                sections: &self.sections,
                data: &self.data,
            }
        }
    }

    fn sample(elf_type: u16) -> Vec<u8> {
        let mut b = ElfBuilder::new(EM_386, Endian::Little);
        b.elf_type(elf_type);
        let text_addr = if elf_type == ET_REL { 0 } else { 0x8000 };
        let text = b.section(SectionSpec::progbits(".text", text_addr, vec![0; 0x40]).code());
        let mut strings = StrTab::new();
        let main = strings.add("main");
        let local = strings.add("helper");
        let printf = strings.add("printf@@GLIBC_2.0");
        let environ = strings.add("environ");
        let file = strings.add("crt1.c");
        let strtab = b.section(SectionSpec::strtab(".strtab", &strings));
        b.section(SectionSpec::symtab(
            ".symtab",
            strtab,
            vec![
                SymbolSpec::new(file, 0, 0, STB_LOCAL, STT_FILE, SHN_ABS),
                SymbolSpec::new(local, text_addr + 0x20, 0, STB_LOCAL, STT_FUNC, text as u16),
                SymbolSpec::new(main, text_addr + 0x10, 8, STB_GLOBAL, STT_FUNC, text as u16),
                SymbolSpec::import(printf),
                SymbolSpec::new(environ, 0, 4, STB_WEAK, STT_OBJECT, SHN_UNDEF),
            ],
        ));
        b.build()
    }

    #[test]
    fn test_defined_and_imported() {
        let fx = Fixture::new(sample(ET_EXEC));
        let mut sink = MemorySink::new();
        let out = collect(&fx.ctx(), None, 4, &mut sink);

        let names: Vec<_> = out.symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["main", "printf", "environ"]);

        let main = &out.symbols[0];
        assert_eq!(main.address, Address::new(0x8010));
        assert!(!main.is_imported());
        assert_eq!(main.kind, SymbolKind::Function);
        assert_eq!(main.size, 8);

        // .text ends at 0x8040: extern slots start on the next page
        let printf = &out.symbols[1];
        assert!(printf.is_imported());
        assert_eq!(printf.address, Address::new(0x9000));
        let environ = &out.symbols[2];
        assert!(environ.attrs.contains(SymbolAttrs::IMPORTED | SymbolAttrs::WEAK));
        assert_eq!(environ.address, Address::new(0x9004));

        assert_eq!(out.imports.get("printf"), Some(&Address::new(0x9000)));
        let area = out.extern_area.unwrap();
        assert_eq!(area.base(), Address::new(0x9000));
        assert_eq!(area.size(), 8);
    }

    #[test]
    fn test_relocatable_values_are_section_relative() {
        let fx = Fixture::new(sample(ET_REL));
        let out = collect(&fx.ctx(), None, 4, &mut MemorySink::new());
        let main = out.symbols.iter().find(|s| s.name == "main").unwrap();
        assert_eq!(main.address, Address::new(0x0800_0010));
    }

    #[test]
    fn test_relocation_values() {
        let fx = Fixture::new(sample(ET_REL));
        let ctx = fx.ctx();
        let out = collect(&ctx, None, 4, &mut MemorySink::new());
        let symtab = fx.sections.by_name(".symtab").unwrap().index;

        assert_eq!(ctx.value(symtab, 0, &out.imports), Address::ZERO);
        assert_eq!(ctx.value(symtab, 3, &out.imports), Address::new(0x0800_0010));
        assert_eq!(ctx.value(symtab, 4, &out.imports), out.imports["printf"]);
        assert_eq!(ctx.value(symtab, 99, &out.imports), Address::ZERO);
    }

    #[test]
    fn test_common_blocks_get_extern_space() {
        let mut b = ElfBuilder::new(EM_386, Endian::Little);
        b.elf_type(ET_REL);
        b.section(SectionSpec::progbits(".text", 0, vec![0; 0x10]).code());
        let mut strings = StrTab::new();
        let counter = strings.add("counter");
        let table = strings.add("table");
        let strtab = b.section(SectionSpec::strtab(".strtab", &strings));
        let symtab = b.section(SectionSpec::symtab(
            ".symtab",
            strtab,
            vec![
                SymbolSpec::new(counter, 4, 4, STB_GLOBAL, STT_OBJECT, SHN_COMMON),
                SymbolSpec::new(table, 16, 0x20, STB_GLOBAL, STT_OBJECT, SHN_COMMON),
            ],
        ));
        let fx = Fixture::new(b.build());
        let ctx = fx.ctx();
        let out = collect(&ctx, None, 4, &mut MemorySink::new());

        // .text is placed at 0x0800_0000 and ends at 0x0800_0010
        let counter = out.symbols.iter().find(|s| s.name == "counter").unwrap();
        assert_eq!(counter.address, Address::new(0x0800_1000));
        assert!(!counter.is_imported());
        let table = out.symbols.iter().find(|s| s.name == "table").unwrap();
        assert_eq!(table.address, Address::new(0x0800_1010));
        assert_eq!(table.size, 0x20);
        assert_eq!(out.extern_area.as_ref().unwrap().size(), 0x30);

        assert_eq!(ctx.value(symtab, 1, &out.imports), Address::new(0x0800_1000));
        assert_eq!(ctx.value(symtab, 2, &out.imports), Address::new(0x0800_1010));
    }

    #[test]
    fn test_extern_area() {
        let mut area = ExternArea::new(Address::new(0x8041), 4);
        assert!(area.is_empty());
        assert_eq!(area.allocate(), Some(Address::new(0x9000)));
        assert_eq!(area.allocate(), Some(Address::new(0x9004)));
        assert_eq!(area.size(), 8);
    }
}
