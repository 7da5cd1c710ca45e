//! ELF loader fuzzing target
//!
//! Run with: cargo fuzz run elf_loader_fuzz

#![no_main]

use libfuzzer_sys::fuzz_target;
use rekon_fuzz::{ElfLoadTarget, FuzzTarget};

fuzz_target!(|data: &[u8]| {
    // Headers and tables beyond this are only more of the same
    if data.len() > 1 << 20 {
        return;
    }

    let mut target = ElfLoadTarget::new();
    let result = target.fuzz(data);
    assert!(!result.is_error(), "{}: {:?}", target.name(), result);
    target.reset();
});
