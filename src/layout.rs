//! Component H: output section ordering and address/file-offset assignment.

use crate::chunk::ChunkRef;
use crate::context::Context;
use crate::elf::{self, SectionFlags};

/// Component H's rank function: the ELF header sorts first, the section
/// header table last, `SHT_NOTE` right after the header, and everything
/// else by `(writable<<7)|(!exec<<6)|(!tls<<5)|(bss<<4)`, matching
/// `passes.go`'s `rank` exactly.
fn rank(chunk: &ChunkRef) -> u32 {
    if chunk.is_ehdr() {
        return 0;
    }
    if chunk.is_shdr() {
        return u32::MAX;
    }

    let sh = chunk.section_header();
    let flags = sh.section_flags();
    if !flags.contains(SectionFlags::ALLOC) {
        return u32::MAX - 1;
    }
    if sh.sh_type == elf::sht::NOTE {
        return 2;
    }

    let writable = u32::from(flags.contains(SectionFlags::WRITE));
    let not_exec = u32::from(!flags.contains(SectionFlags::EXECINSTR));
    let not_tls = u32::from(!flags.contains(SectionFlags::TLS));
    let is_bss = u32::from(sh.sh_type == elf::sht::NOBITS);

    (writable << 7) | (not_exec << 6) | (not_tls << 5) | (is_bss << 4)
}

/// `.tbss`-ness is a type+flag predicate (`SHT_NOBITS` and `SHF_TLS`), not a
/// name check: a TLS-bss chunk shares its virtual address with whatever
/// follows it, since the runtime allocates and initializes it per-thread
/// rather than from the file image.
fn is_tbss(sh: &elf::SectionHeader) -> bool {
    sh.sh_type == elf::sht::NOBITS && sh.section_flags().contains(SectionFlags::TLS)
}

/// Component H's `sortOutputSections`: stable-sorts chunks by [`rank`],
/// preserving each rank's existing relative order (spec §4.H).
pub fn sort_output_sections(ctx: &mut Context) {
    ctx.chunks.sort_by_key(rank);
}

/// Component H's `setOutputSectionOffsets`: walks the sorted chunks once,
/// assigning each a virtual address and file offset.
///
/// Starts at [`elf::IMAGE_BASE`]; each chunk is aligned to its own
/// `sh_addralign` (at least [`elf::PAGE_SIZE`] is not forced — only each
/// chunk's own alignment is honored, per spec §4.H). Address assignment is
/// restricted to `SHF_ALLOC` chunks, matching the original's `continue` over
/// non-alloc chunks in the address walk — a non-alloc chunk's `addr` stays
/// `0`. A `SHT_NOBITS` chunk advances the virtual address but not the file
/// offset, since it occupies no file bytes, except `.tbss` (`SHT_NOBITS` +
/// `SHF_TLS`), which never advances the address either, since it shares its
/// virtual range with whatever follows it.
pub fn set_output_section_offsets(ctx: &mut Context) {
    let mut addr = elf::IMAGE_BASE;
    let mut offset = 0u64;

    for chunk in &ctx.chunks {
        let sh = chunk.section_header();
        let align = sh.addralign.max(1);
        let alloc = sh.section_flags().contains(SectionFlags::ALLOC);

        let placed_addr = if alloc {
            addr = align_to(addr, align);
            let placed = addr;
            if !is_tbss(&sh) {
                addr += sh.size;
            }
            placed
        } else {
            0
        };

        offset = align_to(offset, align);
        chunk.set_placement(placed_addr, offset);

        if sh.sh_type != elf::sht::NOBITS {
            offset += sh.size;
        }
    }
}

fn align_to(value: u64, align: u64) -> u64 {
    if align == 0 {
        return value;
    }
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{OutputEhdr, OutputShdr};
    use crate::output_section::OutputSection;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn output(name: &str, sh_type: u32, flags: u64, size: u64, align: u64) -> ChunkRef {
        let mut s = OutputSection::new(name, sh_type, flags, 0);
        s.size = size;
        s.addralign = align;
        ChunkRef::Output(Rc::new(RefCell::new(s)))
    }

    /// Property from spec §8.7: EHDR always ranks first, SHDR always last.
    #[test]
    fn ehdr_first_shdr_last() {
        let mut ctx = Context::new_for_test();
        ctx.chunks = vec![
            output(".text", elf::sht::PROGBITS, SectionFlags::ALLOC.bits() | SectionFlags::EXECINSTR.bits(), 4, 4),
            ChunkRef::Shdr(Rc::new(RefCell::new(OutputShdr::new()))),
            ChunkRef::Ehdr(Rc::new(RefCell::new(OutputEhdr::new()))),
        ];
        sort_output_sections(&mut ctx);
        assert!(ctx.chunks[0].is_ehdr());
        assert!(ctx.chunks.last().unwrap().is_shdr());
    }

    /// Property from spec §8.8: addresses and offsets never overlap and
    /// honor each chunk's alignment.
    #[test]
    fn offsets_are_monotonic_and_aligned() {
        let mut ctx = Context::new_for_test();
        ctx.chunks = vec![
            ChunkRef::Ehdr(Rc::new(RefCell::new(OutputEhdr::new()))),
            output(".text", elf::sht::PROGBITS, SectionFlags::ALLOC.bits() | SectionFlags::EXECINSTR.bits(), 10, 16),
            output(".data", elf::sht::PROGBITS, SectionFlags::ALLOC.bits() | SectionFlags::WRITE.bits(), 5, 8),
        ];
        set_output_section_offsets(&mut ctx);

        let ehdr_sh = ctx.chunks[0].section_header();
        assert_eq!(ehdr_sh.addr, elf::IMAGE_BASE);
        assert_eq!(ehdr_sh.offset, 0);

        let text_sh = ctx.chunks[1].section_header();
        assert_eq!(text_sh.addr % 16, 0);
        assert!(text_sh.addr >= elf::IMAGE_BASE + ehdr_sh.size);

        let data_sh = ctx.chunks[2].section_header();
        assert_eq!(data_sh.addr % 8, 0);
        assert!(data_sh.addr >= text_sh.addr + text_sh.size);
        assert!(data_sh.offset >= text_sh.offset + text_sh.size);
    }

    /// Spec §4.H's TLS-bss special case: a `SHT_NOBITS`+`SHF_TLS` chunk
    /// occupies no file bytes and does not advance the virtual address for
    /// what follows it, regardless of what it's named.
    #[test]
    fn tbss_does_not_advance_address_for_next_chunk() {
        let mut ctx = Context::new_for_test();
        ctx.chunks = vec![
            output(
                ".tbss.foo", // name is irrelevant; type+flags decide tbss-ness
                elf::sht::NOBITS,
                SectionFlags::ALLOC.bits() | SectionFlags::WRITE.bits() | SectionFlags::TLS.bits(),
                16,
                8,
            ),
            output(".data", elf::sht::PROGBITS, SectionFlags::ALLOC.bits() | SectionFlags::WRITE.bits(), 4, 8),
        ];
        set_output_section_offsets(&mut ctx);

        let tbss_sh = ctx.chunks[0].section_header();
        let data_sh = ctx.chunks[1].section_header();
        assert_eq!(tbss_sh.addr, elf::IMAGE_BASE);
        assert_eq!(data_sh.addr, elf::IMAGE_BASE);
        assert_eq!(data_sh.offset, 0);
    }

    /// A `SHT_NOBITS` section with no `SHF_TLS` flag (ordinary `.bss`) is not
    /// tbss: it still advances the address like any other alloc chunk.
    #[test]
    fn nobits_without_tls_advances_address() {
        let mut ctx = Context::new_for_test();
        ctx.chunks = vec![
            output(".bss", elf::sht::NOBITS, SectionFlags::ALLOC.bits() | SectionFlags::WRITE.bits(), 16, 8),
            output(".data2", elf::sht::PROGBITS, SectionFlags::ALLOC.bits() | SectionFlags::WRITE.bits(), 4, 8),
        ];
        set_output_section_offsets(&mut ctx);

        let bss_sh = ctx.chunks[0].section_header();
        let data_sh = ctx.chunks[1].section_header();
        assert_eq!(data_sh.addr, bss_sh.addr + bss_sh.size);
    }

    /// Non-alloc chunks never receive a virtual address (spec §4.H step 1
    /// restricts address assignment to `SHF_ALLOC` chunks).
    #[test]
    fn non_alloc_chunk_gets_no_address() {
        let mut ctx = Context::new_for_test();
        ctx.chunks = vec![
            ChunkRef::Ehdr(Rc::new(RefCell::new(OutputEhdr::new()))),
            output(".comment", elf::sht::PROGBITS, 0, 8, 1),
        ];
        set_output_section_offsets(&mut ctx);
        assert_eq!(ctx.chunks[1].section_header().addr, 0);
        assert!(ctx.chunks[1].section_header().offset > 0);
    }

    /// `SHT_NOTE` ranks right after the ELF header, ahead of `.text`, per
    /// `passes.go`'s rank function.
    #[test]
    fn note_ranks_before_text() {
        let mut ctx = Context::new_for_test();
        ctx.chunks = vec![
            output(".text", elf::sht::PROGBITS, SectionFlags::ALLOC.bits() | SectionFlags::EXECINSTR.bits(), 4, 4),
            output(".note.foo", elf::sht::NOTE, SectionFlags::ALLOC.bits(), 4, 4),
            ChunkRef::Ehdr(Rc::new(RefCell::new(OutputEhdr::new()))),
            ChunkRef::Shdr(Rc::new(RefCell::new(OutputShdr::new()))),
        ];
        sort_output_sections(&mut ctx);
        assert!(ctx.chunks[0].is_ehdr());
        assert_eq!(ctx.chunks[1].name(), ".note.foo");
        assert_eq!(ctx.chunks[2].name(), ".text");
        assert!(ctx.chunks[3].is_shdr());
    }

    /// A writable allocated section (`.data`) ranks after a read-only one
    /// (`.rodata`), and a `SHT_NOBITS` writable section (`.bss`) ranks last
    /// among allocated sections, matching the
    /// `(writable<<7)|(!exec<<6)|(!tls<<5)|(bss<<4)` formula.
    #[test]
    fn writable_and_bss_rank_after_rodata() {
        let mut ctx = Context::new_for_test();
        ctx.chunks = vec![
            output(".bss", elf::sht::NOBITS, SectionFlags::ALLOC.bits() | SectionFlags::WRITE.bits(), 4, 4),
            output(".data", elf::sht::PROGBITS, SectionFlags::ALLOC.bits() | SectionFlags::WRITE.bits(), 4, 4),
            output(".rodata", elf::sht::PROGBITS, SectionFlags::ALLOC.bits(), 4, 4),
        ];
        sort_output_sections(&mut ctx);
        assert_eq!(ctx.chunks[0].name(), ".rodata");
        assert_eq!(ctx.chunks[1].name(), ".data");
        assert_eq!(ctx.chunks[2].name(), ".bss");
    }
}
