//! Shared fixtures for the loader integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use rekon_db::{FileLoader, MemoryImage, MemorySink, SymbolStore};
use rekon_elf::builder::{ElfBuilder, RelSpec, SectionSpec, SegmentSpec, StrTab, SymbolSpec};
use rekon_elf::types::*;
use rekon_elf::{ElfLoader, Endian, LoaderConfig};
use spin::Mutex;

pub struct Harness {
    pub image: Arc<Mutex<MemoryImage>>,
    pub symbols: Arc<Mutex<SymbolStore>>,
    pub sink: MemorySink,
    pub loader: ElfLoader,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(LoaderConfig::default())
    }

    pub fn with_config(config: LoaderConfig) -> Self {
        let image = Arc::new(Mutex::new(MemoryImage::new()));
        let symbols = Arc::new(Mutex::new(SymbolStore::new()));
        let sink = MemorySink::new();
        let mut loader = ElfLoader::with_config(config).with_sink(sink.clone());
        loader.initialize(image.clone(), symbols.clone());
        Self {
            image,
            symbols,
            sink,
            loader,
        }
    }
}

/// Executable with one loadable segment at 0x8000 and `main` at 0x8010.
///
/// With `relocate`, a `.rel.text` entry of type `R_386_32` against `main`
/// targets 0x8010.
pub fn minimal_exec(endian: Endian, relocate: bool) -> Vec<u8> {
    let mut b = ElfBuilder::new(EM_386, endian);
    b.entry(0x8000);
    let text = b.section(SectionSpec::progbits(".text", 0x8000, vec![0x90; 0x20]).code());
    b.segment(SegmentSpec::Section {
        index: text,
        flags: SegmentFlags::R | SegmentFlags::X,
    });

    let mut strings = StrTab::new();
    let main = strings.add("main");
    let strtab = b.section(SectionSpec::strtab(".strtab", &strings));
    let symtab = b.section(SectionSpec::symtab(
        ".symtab",
        strtab,
        vec![SymbolSpec::func(main, 0x8010, text as u16)],
    ));
    if relocate {
        b.section(SectionSpec::rel(
            ".rel.text",
            symtab,
            text,
            vec![RelSpec::new(0x8010, 1, 1)],
        ));
    }
    b.build()
}

/// Dynamically linked i386 executable calling `puts` and `exit` through
/// the PLT and reading `stdout` through a GOT slot.
///
/// Layout:
/// - `.plt` at 0x8100 (header + 2 stubs)
/// - `.text` at 0x8200, entry point, startup code pushing `main` (0x8210)
/// - `.got` at 0x9000
/// - `.dynsym`: 1 `puts`, 2 `exit`, 3 `stdout`, 4 `main`, 5 `__libc_start_main`
///
/// Without `export_main`, `main` is a local symbol and is not registered.
pub fn dynamic_exec(export_main: bool) -> Vec<u8> {
    let e = Endian::Little;
    let mut b = ElfBuilder::new(EM_386, e);
    b.entry(0x8200);

    let mut dynstr = StrTab::new();
    let libc = dynstr.add("libc.so.6");
    let puts = dynstr.add("puts@GLIBC_2.0");
    let exit = dynstr.add("exit");
    let stdout = dynstr.add("stdout");
    let main = dynstr.add("main");
    let start_main = dynstr.add("__libc_start_main");

    let dynstr_index = b.next_index();
    let dynsym_index = dynstr_index + 1;
    let plt_index = dynsym_index + 1;
    let text_index = plt_index + 1;
    let got_index = text_index + 1;

    assert_eq!(b.section(SectionSpec::strtab(".dynstr", &dynstr)), dynstr_index);
    b.section(SectionSpec::dynsym(
        ".dynsym",
        dynstr_index,
        vec![
            SymbolSpec::import(puts),
            SymbolSpec::import(exit),
            SymbolSpec::new(stdout, 0, 4, STB_GLOBAL, STT_OBJECT, SHN_UNDEF),
            SymbolSpec::new(
                main,
                0x8210,
                0,
                if export_main { STB_GLOBAL } else { STB_LOCAL },
                STT_FUNC,
                text_index as u16,
            ),
            SymbolSpec::import(start_main),
        ],
    ));
    b.section(SectionSpec::progbits(".plt", 0x8100, vec![0xcc; 0x30]).code());

    // xor %ebp,%ebp ; push $0x8210 ; call __libc_start_main (extern slot) ; hlt
    let mut startup = vec![0x31, 0xed, 0x68];
    startup.extend_from_slice(&0x8210u32.to_le_bytes());
    startup.push(0xe8);
    startup.extend_from_slice(&(-4i32).to_le_bytes());
    startup.push(0xf4);
    startup.resize(0x20, 0x90);
    b.section(SectionSpec::progbits(".text", 0x8200, startup).code());
    b.section(SectionSpec::progbits(".got", 0x9000, vec![0; 0x10]).writable());

    b.section(SectionSpec::rel(
        ".rel.dyn",
        dynsym_index,
        0,
        vec![RelSpec::new(0x9000, 3, 6)],
    ));
    b.section(SectionSpec::rel(
        ".rel.plt",
        dynsym_index,
        plt_index,
        vec![RelSpec::new(0x9004, 1, 7), RelSpec::new(0x9008, 2, 7)],
    ));
    b.section(SectionSpec::rel(
        ".rel.text",
        dynsym_index,
        text_index,
        vec![RelSpec::new(0x8208, 5, 2)],
    ));
    b.section(SectionSpec::dynamic(
        ".dynamic",
        dynstr_index,
        vec![(DT_NEEDED, libc)],
    ));

    b.segment(SegmentSpec::Section {
        index: plt_index,
        flags: SegmentFlags::R | SegmentFlags::X,
    });
    b.segment(SegmentSpec::Section {
        index: text_index,
        flags: SegmentFlags::R | SegmentFlags::X,
    });
    b.segment(SegmentSpec::Section {
        index: got_index,
        flags: SegmentFlags::R | SegmentFlags::W,
    });
    b.build()
}
