//! PLT discovery.
//!
//! The PLT is the `.plt` section when a `.rel.plt`/`.rela.plt` table
//! exists. Stub `k + 1` belongs to PLT relocation `k`; stub 0 is the
//! resolver header.

use alloc::vec::Vec;

use rekon_db::Address;

use crate::endian::Endian;
use crate::sections::SectionTable;
use crate::types::Elf32Rel;

/// Size of one PLT stub
pub const PLT_ENTRY_SIZE: u64 = 16;

/// PLT bounds and the symbol index of every PLT relocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PltInfo {
    min: Address,
    max: Address,
    symbol_table: Option<usize>,
    symbols: Vec<u32>,
}

impl PltInfo {
    /// Scan the PLT relocation table. `None` without both `.plt` and a
    /// PLT relocation table.
    pub fn scan(table: &SectionTable, data: &[u8], endian: Endian) -> Option<Self> {
        let plt = table.get(table.plt?)?;
        let rel_plt = table
            .get(table.rel_plt?)
            .filter(|s| s.is_relocation_table())?;
        let contents = table.section_data(data, rel_plt.index)?;

        let count = rel_plt.size / rel_plt.entry_size;
        let symbols = (0..count)
            .map_while(|k| Elf32Rel::read(contents, k * rel_plt.entry_size, endian, rel_plt.has_addend))
            .map(|rel| rel.sym())
            .collect();

        Some(Self {
            min: plt.address,
            max: plt.end(),
            symbol_table: rel_plt.symbol_table,
            symbols,
        })
    }

    /// Half-open range `[min, max)` of the PLT.
    pub fn bounds(&self) -> (Address, Address) {
        (self.min, self.max)
    }

    /// Symbol table the PLT relocations refer to.
    pub fn symbol_table(&self) -> Option<usize> {
        self.symbol_table
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.min && addr < self.max
    }

    /// Address of the PLT stub for symbol index `sym`.
    ///
    /// PLT relocations usually appear in roughly symbol order, so the
    /// search starts at `min(sym, n - 1)` and walks backward, wrapping
    /// around once. Every entry is visited at most once.
    pub fn find_rel_plt_offset(&self, sym: u32) -> Option<Address> {
        let n = self.symbols.len();
        if n == 0 {
            return None;
        }
        let start = (sym as usize).min(n - 1);
        let k = (0..n)
            .map(|step| (start + n - step) % n)
            .find(|&k| self.symbols[k] == sym)?;

        self.min
            .checked_add(PLT_ENTRY_SIZE * (k as u64 + 1))
            .filter(|&addr| addr < self.max)
    }
}
