//! Locating `main`.
//!
//! Stripped binaries carry no `main` symbol. Heuristics recognise the
//! startup code at the entry point and recover the address it passes to
//! the C library.

use rekon_db::{Address, BinaryImage, Machine, SymbolTable};

/// Bytes of startup code examined
pub const STARTUP_SCAN_LEN: usize = 64;

/// What a heuristic gets to look at.
pub struct EntryContext<'a> {
    pub machine: Machine,
    pub entry: Address,
    pub image: &'a dyn BinaryImage,
    pub symbols: &'a dyn SymbolTable,
}

/// A strategy for finding `main` from the entry point.
pub trait MainEntryHeuristic: Send {
    fn name(&self) -> &'static str;

    fn find_main(&self, ctx: &EntryContext<'_>) -> Option<Address>;
}

/// i386 glibc startup: `push $main` followed by `call __libc_start_main`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LibcStartMainHeuristic;

const PUSH_IMM32: u8 = 0x68;
const CALL_REL32: u8 = 0xe8;

impl MainEntryHeuristic for LibcStartMainHeuristic {
    fn name(&self) -> &'static str {
        "libc-start-main"
    }

    fn find_main(&self, ctx: &EntryContext<'_>) -> Option<Address> {
        if ctx.machine != Machine::X86 {
            return None;
        }
        let start_main = ctx.symbols.find_by_name("__libc_start_main")?.address;

        let mut pushed = None;
        let mut at = 0usize;
        while at < STARTUP_SCAN_LEN {
            let addr = ctx.entry.checked_add(at as u64)?;
            let Some(opcode) = ctx.image.read_u8(addr) else {
                break;
            };
            match opcode {
                PUSH_IMM32 => {
                    if let Some(imm) = read_le32(ctx.image, addr.wrapping_add(1)) {
                        pushed = Some(Address::from(imm));
                        at += 5;
                        continue;
                    }
                }
                CALL_REL32 => {
                    if let Some(rel) = read_le32(ctx.image, addr.wrapping_add(1)) {
                        let target = addr
                            .wrapping_add(5)
                            .value()
                            .wrapping_add(rel as i32 as i64 as u64)
                            & 0xffff_ffff;
                        if Address::new(target) == start_main {
                            return pushed;
                        }
                    }
                }
                _ => {}
            }
            at += 1;
        }
        None
    }
}

fn read_le32(image: &dyn BinaryImage, addr: Address) -> Option<u32> {
    let mut value = 0u32;
    for i in 0..4u64 {
        let byte = image.read_u8(addr.checked_add(i)?)?;
        value |= (byte as u32) << (8 * i);
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use alloc::vec::Vec;
    use rekon_db::{BinarySymbol, MemoryImage, SectionFlags, SectionInfo, SymbolAttrs, SymbolStore};

    fn startup(main: u32, call_target: u32) -> Vec<u8> {
        // xor %ebp,%ebp ; pop %esi ; push $main ; call rel32 ; hlt
        let mut code = alloc::vec![0x31, 0xed, 0x5e, PUSH_IMM32];
        code.extend_from_slice(&main.to_le_bytes());
        let after_call = 0x8000 + code.len() as u32 + 5;
        code.push(CALL_REL32);
        code.extend_from_slice(&call_target.wrapping_sub(after_call).to_le_bytes());
        code.push(0xf4);
        code
    }

    fn run(code: &[u8], machine: Machine) -> Option<Address> {
        let mut image = MemoryImage::new();
        image.add_section(
            SectionInfo {
                name: ".text".to_string(),
                address: Address::new(0x8000),
                size: code.len() as u64,
                flags: SectionFlags::CODE,
            },
            code,
        );
        let mut symbols = SymbolStore::new();
        symbols.insert(
            BinarySymbol::new("__libc_start_main", Address::new(0x8400))
                .with_attrs(SymbolAttrs::IMPORTED),
        );
        let ctx = EntryContext {
            machine,
            entry: Address::new(0x8000),
            image: &image,
            symbols: &symbols,
        };
        LibcStartMainHeuristic.find_main(&ctx)
    }

    #[test]
    fn test_finds_pushed_main() {
        let code = startup(0x8123, 0x8400);
        assert_eq!(run(&code, Machine::X86), Some(Address::new(0x8123)));
    }

    #[test]
    fn test_call_elsewhere() {
        let code = startup(0x8123, 0x8500);
        assert_eq!(run(&code, Machine::X86), None);
    }

    #[test]
    fn test_other_machines() {
        let code = startup(0x8123, 0x8400);
        assert_eq!(run(&code, Machine::Sparc), None);
    }
}
