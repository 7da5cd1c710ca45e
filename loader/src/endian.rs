//! Endian-aware word access.
//!
//! All reads and writes assemble bytes one at a time, so offsets need no
//! alignment and the host byte order never matters.

use crate::types::{ELFDATA2LSB, ELFDATA2MSB};

/// Byte order of an ELF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// Byte order named by `EI_DATA`.
    pub fn from_ident(data: u8) -> Option<Self> {
        match data {
            ELFDATA2LSB => Some(Endian::Little),
            ELFDATA2MSB => Some(Endian::Big),
            _ => None,
        }
    }

    pub fn read_u8(self, data: &[u8], offset: usize) -> Option<u8> {
        data.get(offset).copied()
    }

    /// Read a 16-bit value at `offset`.
    pub fn read2(self, data: &[u8], offset: usize) -> Option<u16> {
        let b = data.get(offset..offset.checked_add(2)?)?;
        Some(match self {
            Endian::Little => (b[0] as u16) | (b[1] as u16) << 8,
            Endian::Big => (b[0] as u16) << 8 | (b[1] as u16),
        })
    }

    /// Read a 32-bit value at `offset`.
    pub fn read4(self, data: &[u8], offset: usize) -> Option<u32> {
        let b = data.get(offset..offset.checked_add(4)?)?;
        Some(match self {
            Endian::Little => {
                (b[0] as u32) | (b[1] as u32) << 8 | (b[2] as u32) << 16 | (b[3] as u32) << 24
            }
            Endian::Big => {
                (b[0] as u32) << 24 | (b[1] as u32) << 16 | (b[2] as u32) << 8 | (b[3] as u32)
            }
        })
    }

    /// Write a 16-bit value at `offset`. Returns `false` if out of range.
    pub fn write2(self, data: &mut [u8], offset: usize, value: u16) -> bool {
        let Some(end) = offset.checked_add(2) else {
            return false;
        };
        let Some(b) = data.get_mut(offset..end) else {
            return false;
        };
        let (hi, lo) = ((value >> 8) as u8, value as u8);
        match self {
            Endian::Little => {
                b[0] = lo;
                b[1] = hi;
            }
            Endian::Big => {
                b[0] = hi;
                b[1] = lo;
            }
        }
        true
    }

    /// Write a 32-bit value at `offset`. Returns `false` if out of range.
    pub fn write4(self, data: &mut [u8], offset: usize, value: u32) -> bool {
        let Some(end) = offset.checked_add(4) else {
            return false;
        };
        let Some(b) = data.get_mut(offset..end) else {
            return false;
        };
        for (i, byte) in b.iter_mut().enumerate() {
            let shift = match self {
                Endian::Little => 8 * i,
                Endian::Big => 8 * (3 - i),
            };
            *byte = (value >> shift) as u8;
        }
        true
    }
}
