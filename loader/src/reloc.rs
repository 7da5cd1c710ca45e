//! Relocation processing.
//!
//! Relocations are handled in two passes over the owned buffer. [`plan`]
//! decodes every entry and resolves its symbol and target while the buffer
//! is shared; [`apply`] then patches it. Dispatch from relocation type to
//! patch operation goes through a per-machine [`RelocationModel`].

use alloc::string::String;
use alloc::vec::Vec;

use hashbrown::{HashMap, HashSet};
use rekon_db::{Address, LogSink, Machine};

use crate::endian::Endian;
use crate::symbols::SymbolContext;
use crate::types::Elf32Rel;

/// Part of a value written to a 16-bit field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalfPart {
    /// Low 16 bits
    Lo,
    /// High 16 bits
    Hi,
    /// High 16 bits, adjusted for a signed low half
    Ha,
}

/// Patch operation for a relocation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// No operation
    None,
    /// Word = S + A
    Abs32,
    /// Word = S + A - P
    Pc32,
    /// Word = B + A, with B = 0 for an image at its link address
    Relative,
    /// GOT or PLT slot filled by the dynamic linker; recorded only
    DynamicSlot,
    /// `((S + A [- P]) >> shift) & mask` merged into the word under `mask`
    WordField {
        pc_relative: bool,
        shift: u32,
        mask: u32,
    },
    /// 16-bit field at the target
    Half16(HalfPart),
}

impl RelocKind {
    /// Check if a REL entry takes its addend from the target word
    pub fn implicit_addend(&self) -> bool {
        matches!(self, RelocKind::Abs32 | RelocKind::Pc32 | RelocKind::Relative)
    }
}

/// Relocation type table for one machine.
pub trait RelocationModel: Sync {
    fn machine(&self) -> Machine;

    /// Operation for `r_type`, `None` if unknown.
    fn kind(&self, r_type: u8) -> Option<RelocKind>;
}

/// Intel 80386
pub struct I386Relocations;

impl RelocationModel for I386Relocations {
    fn machine(&self) -> Machine {
        Machine::X86
    }

    fn kind(&self, r_type: u8) -> Option<RelocKind> {
        Some(match r_type {
            0 => RelocKind::None,
            1 => RelocKind::Abs32, // R_386_32
            2 => RelocKind::Pc32,  // R_386_PC32
            4 => RelocKind::Pc32,  // R_386_PLT32
            5 | 6 | 7 => RelocKind::DynamicSlot, // COPY, GLOB_DAT, JMP_SLOT
            8 => RelocKind::Relative,
            _ => return None,
        })
    }
}

/// SPARC
pub struct SparcRelocations;

impl RelocationModel for SparcRelocations {
    fn machine(&self) -> Machine {
        Machine::Sparc
    }

    fn kind(&self, r_type: u8) -> Option<RelocKind> {
        let field = |pc_relative, shift, mask| RelocKind::WordField {
            pc_relative,
            shift,
            mask,
        };
        Some(match r_type {
            0 => RelocKind::None,
            3 => RelocKind::Abs32,  // R_SPARC_32
            6 => RelocKind::Pc32,   // R_SPARC_DISP32
            7 | 18 => field(true, 2, 0x3fff_ffff), // WDISP30, WPLT30
            8 => field(true, 2, 0x003f_ffff),      // WDISP22
            9 => field(false, 10, 0x003f_ffff),    // HI22
            11 => field(false, 0, 0x1fff),         // 13
            12 => field(false, 0, 0x3ff),          // LO10
            19 | 20 | 21 => RelocKind::DynamicSlot, // COPY, GLOB_DAT, JMP_SLOT
            22 => RelocKind::Relative,
            _ => return None,
        })
    }
}

/// PowerPC
pub struct PpcRelocations;

impl RelocationModel for PpcRelocations {
    fn machine(&self) -> Machine {
        Machine::Ppc
    }

    fn kind(&self, r_type: u8) -> Option<RelocKind> {
        Some(match r_type {
            0 => RelocKind::None,
            1 => RelocKind::Abs32, // R_PPC_ADDR32
            4 => RelocKind::Half16(HalfPart::Lo),
            5 => RelocKind::Half16(HalfPart::Hi),
            6 => RelocKind::Half16(HalfPart::Ha),
            // R_PPC_REL24, R_PPC_PLTREL24
            10 | 18 => RelocKind::WordField {
                pc_relative: true,
                shift: 0,
                mask: 0x03ff_fffc,
            },
            19 | 20 | 21 => RelocKind::DynamicSlot,
            22 => RelocKind::Relative,
            26 => RelocKind::Pc32, // R_PPC_REL32
            _ => return None,
        })
    }
}

/// ARM
pub struct ArmRelocations;

impl RelocationModel for ArmRelocations {
    fn machine(&self) -> Machine {
        Machine::Arm
    }

    fn kind(&self, r_type: u8) -> Option<RelocKind> {
        Some(match r_type {
            0 => RelocKind::None,
            2 => RelocKind::Abs32, // R_ARM_ABS32
            3 => RelocKind::Pc32,  // R_ARM_REL32
            20 | 21 | 22 => RelocKind::DynamicSlot,
            23 => RelocKind::Relative,
            _ => return None,
        })
    }
}

/// MIPS
pub struct MipsRelocations;

impl RelocationModel for MipsRelocations {
    fn machine(&self) -> Machine {
        Machine::Mips
    }

    fn kind(&self, r_type: u8) -> Option<RelocKind> {
        Some(match r_type {
            0 => RelocKind::None,
            2 => RelocKind::Abs32,    // R_MIPS_32
            3 => RelocKind::Relative, // R_MIPS_REL32
            4 => RelocKind::WordField {
                pc_relative: false,
                shift: 2,
                mask: 0x03ff_ffff,
            },
            _ => return None,
        })
    }
}

static I386: I386Relocations = I386Relocations;
static SPARC: SparcRelocations = SparcRelocations;
static PPC: PpcRelocations = PpcRelocations;
static ARM: ArmRelocations = ArmRelocations;
static MIPS: MipsRelocations = MipsRelocations;

/// Built-in model for `machine`.
pub fn model_for(machine: Machine) -> Option<&'static dyn RelocationModel> {
    match machine {
        Machine::X86 => Some(&I386),
        Machine::Sparc => Some(&SPARC),
        Machine::Ppc => Some(&PPC),
        Machine::Arm => Some(&ARM),
        Machine::Mips => Some(&MIPS),
        _ => None,
    }
}

/// A decoded relocation ready to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReloc {
    /// Relocation section it came from
    pub section: usize,
    /// Native address patched (P)
    pub site: Address,
    /// File offset of the site, `None` in a section without file data
    pub file_offset: Option<usize>,
    /// End of the containing section's file data; patches stop here
    pub file_end: usize,
    /// Symbol value (S)
    pub symbol: Address,
    pub r_type: u8,
    /// Explicit addend (RELA only)
    pub addend: Option<i32>,
}

/// Decode every relocation of every relocation section.
pub fn plan(
    ctx: &SymbolContext<'_>,
    imports: &HashMap<String, Address>,
    sink: &mut dyn LogSink,
) -> Vec<PendingReloc> {
    let sections = ctx.sections;
    let relocatable = ctx.layout.is_relocatable();
    let mut pending = Vec::new();

    for rel in sections.iter().filter(|s| s.is_relocation_table()) {
        let Some(symtab) = rel.symbol_table else {
            continue;
        };
        let target = rel.target.and_then(|t| sections.get(t));
        if let Some(target) = target {
            if !target.is_alloc() {
                diag!(sink, Trace, "Skipping relocations for unallocated section {}", target.name);
                continue;
            }
        }
        let base = match (relocatable, target) {
            (true, Some(target)) => target.address,
            (true, None) => {
                diag!(sink, Warn, "Relocation section {} has no target section", rel.name);
                continue;
            }
            (false, _) => Address::ZERO,
        };
        let Some(contents) = sections.section_data(ctx.data, rel.index) else {
            continue;
        };

        let count = rel.size / rel.entry_size;
        let mut out_of_range = 0usize;
        for k in 0..count {
            let Some(entry) =
                Elf32Rel::read(contents, k * rel.entry_size, ctx.layout.endian, rel.has_addend)
            else {
                break;
            };
            if !relocatable && entry.r_offset == 0 {
                continue;
            }
            let site = base.wrapping_add(entry.r_offset as u64);
            let Some(container) = sections.containing(site) else {
                out_of_range += 1;
                continue;
            };
            let file_offset = container.host_offset(site, 1);
            let file_end = match file_offset {
                Some(_) => container.offset.saturating_add(container.size),
                None => 0,
            };
            pending.push(PendingReloc {
                section: rel.index,
                site,
                file_offset,
                file_end,
                symbol: ctx.value(symtab, entry.sym(), imports),
                r_type: entry.r_type(),
                addend: entry.r_addend,
            });
        }

        if out_of_range > 0 {
            diag!(
                sink,
                Warn,
                "{}: {} relocations outside the image skipped",
                rel.name,
                out_of_range
            );
        }
    }

    pending
}

/// Counters from [`apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelocStats {
    /// Words patched
    pub applied: usize,
    /// Sites recorded
    pub recorded: usize,
    /// Entries with an unknown type or unwritable site
    pub skipped: usize,
}

/// Apply `relocs` to `data` and record every site.
///
/// Without a model, or with `patch` off, sites are recorded and nothing is
/// written.
pub fn apply(
    data: &mut [u8],
    endian: Endian,
    model: Option<&dyn RelocationModel>,
    relocs: &[PendingReloc],
    patch: bool,
    sites: &mut HashSet<Address>,
    sink: &mut dyn LogSink,
) -> RelocStats {
    let mut stats = RelocStats::default();
    let mut warned_section = None;

    for reloc in relocs {
        sites.insert(reloc.site);
        stats.recorded += 1;

        let Some(model) = model else {
            if warned_section != Some(reloc.section) {
                diag!(
                    sink,
                    Warn,
                    "No relocation model; section {} recorded without patching",
                    reloc.section
                );
                warned_section = Some(reloc.section);
            }
            continue;
        };
        let Some(kind) = model.kind(reloc.r_type) else {
            diag!(
                sink,
                Warn,
                "Unknown {} relocation type {} at {}",
                model.machine(),
                reloc.r_type,
                reloc.site
            );
            stats.skipped += 1;
            continue;
        };
        if !patch {
            continue;
        }

        match patch_one(data, endian, kind, reloc) {
            Some(true) => stats.applied += 1,
            Some(false) => {}
            None => {
                diag!(sink, Warn, "Relocation at {} does not fit its section", reloc.site);
                stats.skipped += 1;
            }
        }
    }

    stats
}

/// Returns `Some(true)` if written, `Some(false)` if nothing to do, `None`
/// if the field does not lie within the site's section data.
fn patch_one(data: &mut [u8], endian: Endian, kind: RelocKind, reloc: &PendingReloc) -> Option<bool> {
    if matches!(kind, RelocKind::None | RelocKind::DynamicSlot) {
        return Some(false);
    }
    let at = reloc.file_offset?;
    let end = reloc.file_end.min(data.len());
    let data = data.get_mut(..end)?;
    let s = reloc.symbol.value() as u32;
    let p = reloc.site.value() as u32;
    let a = match reloc.addend {
        Some(addend) => addend as u32,
        None if kind.implicit_addend() => endian.read4(data, at)?,
        None => 0,
    };

    let word = match kind {
        RelocKind::None | RelocKind::DynamicSlot => return Some(false),
        RelocKind::Abs32 => s.wrapping_add(a),
        RelocKind::Pc32 => s.wrapping_add(a).wrapping_sub(p),
        RelocKind::Relative => {
            // REL already holds B + A
            if reloc.addend.is_none() {
                return Some(false);
            }
            a
        }
        RelocKind::WordField {
            pc_relative,
            shift,
            mask,
        } => {
            let mut value = s.wrapping_add(a);
            if pc_relative {
                value = value.wrapping_sub(p);
            }
            let old = endian.read4(data, at)?;
            (old & !mask) | ((value >> shift) & mask)
        }
        RelocKind::Half16(part) => {
            let value = s.wrapping_add(a);
            let half = match part {
                HalfPart::Lo => value,
                HalfPart::Hi => value >> 16,
                HalfPart::Ha => value.wrapping_add(0x8000) >> 16,
            };
            return endian.write2(data, at, half as u16).then_some(true);
        }
    };

    endian.write4(data, at, word).then_some(true)
}
