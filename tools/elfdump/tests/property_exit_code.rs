//! Property: the exit code reflects how far a file got.
//!
//! Input without the ELF magic finds no loader (2). Input with the magic
//! and the 32-bit class either loads or fails to load (1), never anything
//! else.

use std::path::Path;

use proptest::prelude::*;
use rekon_elf::LoaderConfig;
use rekon_elfdump::dump;
use rekon_elfdump::error::ElfdumpError;
use rekon_elfdump::report::Detail;

proptest! {
    #[test]
    fn non_elf_input_has_no_loader(
        data in prop::collection::vec(any::<u8>(), 0..256)
            .prop_filter("not ELF", |d| !d.starts_with(b"\x7fELF")),
    ) {
        let err = dump(Path::new("input"), data, LoaderConfig::default(), &[], Detail::default())
            .unwrap_err();
        prop_assert!(matches!(err, ElfdumpError::NoLoader { .. }), "expected NoLoader, got {:?}", err);
        prop_assert_eq!(err.code(), 2);
    }

    #[test]
    fn elf32_input_loads_or_exits_1(tail in prop::collection::vec(any::<u8>(), 0..512)) {
        let mut data = b"\x7fELF\x01".to_vec();
        data.extend_from_slice(&tail);
        match dump(Path::new("input"), data, LoaderConfig::default(), &[], Detail::default()) {
            Ok(report) => prop_assert_eq!(report.format.as_str(), "ELF"),
            Err(err) => {
                prop_assert!(matches!(err, ElfdumpError::Load { .. }), "expected Load, got {:?}", err);
                prop_assert_eq!(err.code(), 1);
            }
        }
    }
}
