//! Property: reading a word and writing it back under the same byte order
//! reproduces the original bytes, at any offset and alignment.

use proptest::prelude::*;
use rekon_elf::Endian;

fn arb_endian() -> impl Strategy<Value = Endian> {
    prop_oneof![Just(Endian::Little), Just(Endian::Big)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// read4 then write4 leaves the buffer unchanged.
    #[test]
    fn read4_write4_round_trip(
        bytes in proptest::collection::vec(any::<u8>(), 4..64),
        offset in 0usize..64,
        endian in arb_endian(),
    ) {
        let offset = offset % (bytes.len() - 3);
        let word = endian.read4(&bytes, offset).unwrap();
        let mut copy = bytes.clone();
        prop_assert!(endian.write4(&mut copy, offset, word));
        prop_assert_eq!(copy, bytes);
    }

    /// read2 then write2 leaves the buffer unchanged.
    #[test]
    fn read2_write2_round_trip(
        bytes in proptest::collection::vec(any::<u8>(), 2..64),
        offset in 0usize..64,
        endian in arb_endian(),
    ) {
        let offset = offset % (bytes.len() - 1);
        let half = endian.read2(&bytes, offset).unwrap();
        let mut copy = bytes.clone();
        prop_assert!(endian.write2(&mut copy, offset, half));
        prop_assert_eq!(copy, bytes);
    }

    /// The two byte orders see byte-reversed words.
    #[test]
    fn orders_are_mirror_images(value in any::<u32>()) {
        let mut buf = [0u8; 4];
        Endian::Big.write4(&mut buf, 0, value);
        prop_assert_eq!(Endian::Little.read4(&buf, 0), Some(value.swap_bytes()));
    }

    /// Reads past the end fail instead of panicking.
    #[test]
    fn out_of_range_reads_fail(len in 0usize..8, offset in 0usize..16) {
        let bytes = vec![0u8; len];
        let fits = offset + 4 <= len;
        prop_assert_eq!(Endian::Little.read4(&bytes, offset).is_some(), fits);
    }
}
