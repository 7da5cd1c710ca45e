//! Dynamic section queries.

use alloc::string::String;
use alloc::vec::Vec;

use crate::endian::Endian;
use crate::sections::SectionTable;
use crate::types::{DT_NEEDED, DT_NULL, DT_SONAME, DYN_SIZE};

/// `(tag, value)` pairs of the dynamic section up to `DT_NULL`.
fn entries<'a>(
    sections: &'a SectionTable,
    data: &'a [u8],
    endian: Endian,
) -> impl Iterator<Item = (u32, u32)> + 'a {
    let contents = sections
        .dynamic
        .and_then(|index| sections.section_data(data, index))
        .unwrap_or(&[]);
    (0..contents.len() / DYN_SIZE)
        .map_while(move |k| {
            let tag = endian.read4(contents, k * DYN_SIZE)?;
            let value = endian.read4(contents, k * DYN_SIZE + 4)?;
            Some((tag, value))
        })
        .take_while(|&(tag, _)| tag != DT_NULL)
}

/// String named by a dynamic entry, through the section's linked string table.
fn dynamic_str<'a>(sections: &SectionTable, data: &'a [u8], value: u32) -> Option<&'a str> {
    let dynamic = sections.get(sections.dynamic?)?;
    sections.get_str_ptr(data, dynamic.link as usize, value)
}

/// Libraries named by `DT_NEEDED`, in table order.
pub fn needed_libraries(sections: &SectionTable, data: &[u8], endian: Endian) -> Vec<String> {
    entries(sections, data, endian)
        .filter(|&(tag, _)| tag == DT_NEEDED)
        .filter_map(|(_, value)| dynamic_str(sections, data, value))
        .map(String::from)
        .collect()
}

/// Name from `DT_SONAME`.
pub fn soname(sections: &SectionTable, data: &[u8], endian: Endian) -> Option<String> {
    entries(sections, data, endian)
        .find(|&(tag, _)| tag == DT_SONAME)
        .and_then(|(_, value)| dynamic_str(sections, data, value))
        .map(String::from)
}
