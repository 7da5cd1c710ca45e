//! Property: `Elf32_Rel` entries never read an addend field, `Elf32_Rela`
//! entries always do.
//!
//! For `R_386_32`, a REL entry takes its addend from the patched word and a
//! RELA entry ignores the word entirely.

mod common;

use common::Harness;
use proptest::prelude::*;
use rekon_db::{Address, BinaryImage, FileLoader};
use rekon_elf::builder::{ElfBuilder, RelSpec, SectionSpec, SegmentSpec, StrTab, SymbolSpec};
use rekon_elf::types::*;
use rekon_elf::Endian;

const TEXT: u32 = 0x8000;
const TARGET: u32 = 0x8400;

fn build(endian: Endian, rela: bool, words: &[u32], addends: &[i32]) -> Vec<u8> {
    let mut b = ElfBuilder::new(EM_386, endian);
    b.entry(TEXT);

    let mut code = Vec::with_capacity(words.len() * 4);
    for &word in words {
        let at = code.len();
        code.resize(at + 4, 0);
        endian.write4(&mut code, at, word);
    }
    let text = b.section(SectionSpec::progbits(".text", TEXT, code).code());
    let target = b.section(SectionSpec::progbits(".data", TARGET, vec![0; 4]).writable());
    b.segment(SegmentSpec::Section {
        index: text,
        flags: SegmentFlags::R | SegmentFlags::X,
    });

    let mut strings = StrTab::new();
    let name = strings.add("table");
    let strtab = b.section(SectionSpec::strtab(".strtab", &strings));
    let symtab = b.section(SectionSpec::symtab(
        ".symtab",
        strtab,
        vec![SymbolSpec::new(name, TARGET, 4, STB_GLOBAL, STT_OBJECT, target as u16)],
    ));

    let entries = addends
        .iter()
        .enumerate()
        .map(|(i, &addend)| RelSpec::new(TEXT + 4 * i as u32, 1, 1).with_addend(addend))
        .collect();
    if rela {
        b.section(SectionSpec::rela(".rela.text", symtab, text, entries));
    } else {
        b.section(SectionSpec::rel(".rel.text", symtab, text, entries));
    }
    b.build()
}

fn words_after_load(data: Vec<u8>, endian: Endian, count: usize) -> Vec<u32> {
    let mut h = Harness::new();
    h.loader.load_from_memory(data).unwrap();
    let image = h.image.lock();
    (0..count)
        .map(|i| {
            let bytes = image.read_bytes(Address::from(TEXT + 4 * i as u32), 4).unwrap();
            endian.read4(bytes, 0).unwrap()
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn rel_uses_implicit_addend(
        pairs in proptest::collection::vec((any::<u32>(), any::<i32>()), 1..8),
        big_endian in any::<bool>(),
    ) {
        let endian = if big_endian { Endian::Big } else { Endian::Little };
        let (words, addends): (Vec<u32>, Vec<i32>) = pairs.into_iter().unzip();
        let patched = words_after_load(build(endian, false, &words, &addends), endian, words.len());
        for (word, result) in words.iter().zip(&patched) {
            prop_assert_eq!(*result, word.wrapping_add(TARGET));
        }
    }

    #[test]
    fn rela_uses_explicit_addend(
        pairs in proptest::collection::vec((any::<u32>(), any::<i32>()), 1..8),
        big_endian in any::<bool>(),
    ) {
        let endian = if big_endian { Endian::Big } else { Endian::Little };
        let (words, addends): (Vec<u32>, Vec<i32>) = pairs.into_iter().unzip();
        let patched = words_after_load(build(endian, true, &words, &addends), endian, words.len());
        for (addend, result) in addends.iter().zip(&patched) {
            prop_assert_eq!(*result, TARGET.wrapping_add(*addend as u32));
        }
    }

    /// Section sizes follow the entry layout.
    #[test]
    fn entry_sizes(count in 0usize..16, rela in any::<bool>()) {
        let words = vec![0u32; count];
        let addends = vec![0i32; count];
        let data = build(Endian::Little, rela, &words, &addends);
        let layout = rekon_elf::header::parse(&data, &Default::default()).unwrap();
        let reloc = layout
            .section_headers
            .iter()
            .find(|sh| sh.sh_type == SHT_REL || sh.sh_type == SHT_RELA)
            .unwrap();
        let entry = if rela { RELA_SIZE } else { REL_SIZE };
        prop_assert_eq!(reloc.sh_size as usize, count * entry);
    }
}
