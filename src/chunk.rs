//! Component F: the output chunk model — the uniform abstraction over
//! everything placeable in the output image.

use std::cell::RefCell;
use std::rc::Rc;

use crate::elf::{self, SectionFlags, SectionHeader};
use crate::merge::MergedSection;
use crate::output_section::OutputSection;

/// Anything placeable in the output: has a name, a section header, and can
/// write its bytes to the output buffer at its assigned offset (spec §3's
/// `Chunk`, realized as a trait rather than the tagged union spec §9
/// describes, since Rust's trait objects give the same uniform dispatch).
pub trait Chunk {
    fn name(&self) -> &str;

    /// A snapshot of this chunk's section header. Chunks that don't carry a
    /// "real" section (the ELF header, the section header table) still
    /// return one, with `sh_type`/`flags` set so layout's ranking and
    /// allocation logic can treat every chunk uniformly.
    fn section_header(&self) -> SectionHeader;

    /// Records this chunk's assigned virtual address and file offset, as
    /// computed by [`crate::layout::set_output_section_offsets`].
    fn set_placement(&mut self, addr: u64, offset: u64);

    /// Writes this chunk's bytes into `buffer`, which is already sliced to
    /// this chunk's `[offset, offset + size)` file range.
    fn copy_to(&self, buffer: &mut [u8]);
}

/// The synthetic chunk holding the ELF file header itself (spec §4.F).
#[derive(Debug, Default)]
pub struct OutputEhdr {
    pub addr: u64,
    pub offset: u64,
    pub header: elf::ElfHeader,
}

impl OutputEhdr {
    pub fn new() -> Self {
        let mut header = elf::ElfHeader {
            ident: [0; 16],
            e_type: 2, // ET_EXEC
            machine: elf::EM_RISCV,
            version: 1,
            entry: 0,
            phoff: 0,
            shoff: 0,
            flags: 0,
            ehsize: elf::ElfHeader::SIZE as u16,
            phentsize: 0,
            phnum: 0,
            shentsize: SectionHeader::SIZE as u16,
            shnum: 0,
            shstrndx: 0,
        };
        header.ident[0..4].copy_from_slice(&elf::ELF_MAGIC);
        header.ident[4] = elf::ELF_CLASS_64;
        header.ident[5] = elf::ELF_DATA_LSB;
        header.ident[6] = 1; // EV_CURRENT
        Self {
            addr: 0,
            offset: 0,
            header,
        }
    }
}

impl Chunk for OutputEhdr {
    fn name(&self) -> &str {
        "EHDR"
    }

    fn section_header(&self) -> SectionHeader {
        SectionHeader {
            flags: SectionFlags::ALLOC.bits(),
            addr: self.addr,
            offset: self.offset,
            size: elf::ElfHeader::SIZE as u64,
            addralign: 8,
            ..Default::default()
        }
    }

    fn set_placement(&mut self, addr: u64, offset: u64) {
        self.addr = addr;
        self.offset = offset;
    }

    fn copy_to(&self, buffer: &mut [u8]) {
        let h = &self.header;
        buffer[0..16].copy_from_slice(&h.ident);
        buffer[16..18].copy_from_slice(&h.e_type.to_le_bytes());
        buffer[18..20].copy_from_slice(&h.machine.to_le_bytes());
        buffer[20..24].copy_from_slice(&h.version.to_le_bytes());
        buffer[24..32].copy_from_slice(&h.entry.to_le_bytes());
        buffer[32..40].copy_from_slice(&h.phoff.to_le_bytes());
        buffer[40..48].copy_from_slice(&h.shoff.to_le_bytes());
        buffer[48..52].copy_from_slice(&h.flags.to_le_bytes());
        buffer[52..54].copy_from_slice(&h.ehsize.to_le_bytes());
        buffer[54..56].copy_from_slice(&h.phentsize.to_le_bytes());
        buffer[56..58].copy_from_slice(&h.phnum.to_le_bytes());
        buffer[58..60].copy_from_slice(&h.shentsize.to_le_bytes());
        buffer[60..62].copy_from_slice(&h.shnum.to_le_bytes());
        buffer[62..64].copy_from_slice(&h.shstrndx.to_le_bytes());
    }
}

/// The synthetic chunk holding the section header table (spec §4.F).
#[derive(Debug, Default)]
pub struct OutputShdr {
    pub addr: u64,
    pub offset: u64,
    pub entries: Vec<SectionHeader>,
}

impl OutputShdr {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Chunk for OutputShdr {
    fn name(&self) -> &str {
        "SHDR"
    }

    fn section_header(&self) -> SectionHeader {
        SectionHeader {
            flags: 0,
            addr: self.addr,
            offset: self.offset,
            size: (self.entries.len() * SectionHeader::SIZE) as u64,
            addralign: 8,
            ..Default::default()
        }
    }

    fn set_placement(&mut self, addr: u64, offset: u64) {
        self.addr = addr;
        self.offset = offset;
    }

    fn copy_to(&self, buffer: &mut [u8]) {
        for (i, sh) in self.entries.iter().enumerate() {
            let b = &mut buffer[i * SectionHeader::SIZE..(i + 1) * SectionHeader::SIZE];
            b[0..4].copy_from_slice(&sh.name.to_le_bytes());
            b[4..8].copy_from_slice(&sh.sh_type.to_le_bytes());
            b[8..16].copy_from_slice(&sh.flags.to_le_bytes());
            b[16..24].copy_from_slice(&sh.addr.to_le_bytes());
            b[24..32].copy_from_slice(&sh.offset.to_le_bytes());
            b[32..40].copy_from_slice(&sh.size.to_le_bytes());
            b[40..44].copy_from_slice(&sh.link.to_le_bytes());
            b[44..48].copy_from_slice(&sh.info.to_le_bytes());
            b[48..56].copy_from_slice(&sh.addralign.to_le_bytes());
            b[56..64].copy_from_slice(&sh.entsize.to_le_bytes());
        }
    }
}

/// Canonicalizes an input section name to its output section name, per
/// spec §4.F's `getOutputName` (`.text.foo -> .text`, etc.) — sections
/// whose name exactly matches a canonical prefix, or begins with it
/// followed by `.`, collapse into the canonical one.
pub fn get_output_name(name: &str, flags: u64) -> String {
    const PREFIXES: &[&str] = &[
        ".text",
        ".data.rel.ro",
        ".data",
        ".rodata",
        ".bss.rel.ro",
        ".bss",
        ".init_array",
        ".fini_array",
        ".tbss",
        ".tdata",
        ".gcc_except_table",
        ".ctors",
        ".dtors",
    ];

    if SectionFlags::from_bits_truncate(flags).contains(SectionFlags::TLS) {
        if name.starts_with(".tbss") {
            return ".tbss".to_string();
        }
        if name.starts_with(".tdata") {
            return ".tdata".to_string();
        }
    }

    for prefix in PREFIXES {
        if &name == prefix || name.starts_with(&format!("{prefix}.")) {
            return (*prefix).to_string();
        }
    }
    name.to_string()
}

/// The section-header flag bits that don't participate in output-section
/// identity (spec §4.F): `SHF_GROUP | SHF_MERGE | SHF_STRINGS | SHF_COMPRESSED`.
pub fn strip_identity_flags(flags: u64) -> u64 {
    flags
        & !(SectionFlags::GROUP.bits()
            | SectionFlags::MERGE.bits()
            | SectionFlags::STRINGS.bits()
            | SectionFlags::COMPRESSED.bits())
}

/// The four placeable chunk kinds, realized as a tagged union per spec §9
/// ("dynamic dispatch on Chunk ... a tagged union with a uniform accessor"),
/// rather than as `dyn Chunk` trait objects — this also lets layout
/// recognize the ELF header/section header table chunks by variant instead
/// of by pointer identity.
#[derive(Clone)]
pub enum ChunkRef {
    Ehdr(Rc<RefCell<OutputEhdr>>),
    Shdr(Rc<RefCell<OutputShdr>>),
    Merged(Rc<RefCell<MergedSection>>),
    Output(Rc<RefCell<OutputSection>>),
}

impl ChunkRef {
    pub fn name(&self) -> String {
        match self {
            ChunkRef::Ehdr(c) => c.borrow().name().to_string(),
            ChunkRef::Shdr(c) => c.borrow().name().to_string(),
            ChunkRef::Merged(c) => c.borrow().name().to_string(),
            ChunkRef::Output(c) => c.borrow().name().to_string(),
        }
    }

    pub fn section_header(&self) -> SectionHeader {
        match self {
            ChunkRef::Ehdr(c) => c.borrow().section_header(),
            ChunkRef::Shdr(c) => c.borrow().section_header(),
            ChunkRef::Merged(c) => c.borrow().section_header(),
            ChunkRef::Output(c) => c.borrow().section_header(),
        }
    }

    pub fn set_placement(&self, addr: u64, offset: u64) {
        match self {
            ChunkRef::Ehdr(c) => c.borrow_mut().set_placement(addr, offset),
            ChunkRef::Shdr(c) => c.borrow_mut().set_placement(addr, offset),
            ChunkRef::Merged(c) => c.borrow_mut().set_placement(addr, offset),
            ChunkRef::Output(c) => c.borrow_mut().set_placement(addr, offset),
        }
    }

    pub fn copy_to(&self, buffer: &mut [u8]) {
        match self {
            ChunkRef::Ehdr(c) => c.borrow().copy_to(buffer),
            ChunkRef::Shdr(c) => c.borrow().copy_to(buffer),
            ChunkRef::Merged(c) => c.borrow().copy_to(buffer),
            ChunkRef::Output(c) => c.borrow().copy_to(buffer),
        }
    }

    pub fn is_ehdr(&self) -> bool {
        matches!(self, ChunkRef::Ehdr(_))
    }

    pub fn is_shdr(&self) -> bool {
        matches!(self, ChunkRef::Shdr(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_dotted_suffixes() {
        assert_eq!(get_output_name(".text.foo", 0), ".text");
        assert_eq!(get_output_name(".data.rel.ro.bar", 0), ".data.rel.ro");
        assert_eq!(get_output_name(".bss.baz", 0), ".bss");
        assert_eq!(get_output_name(".note.gnu", 0), ".note.gnu");
    }

    #[test]
    fn strips_non_identity_flags() {
        let flags = SectionFlags::ALLOC.bits() | SectionFlags::MERGE.bits() | SectionFlags::STRINGS.bits();
        assert_eq!(strip_identity_flags(flags), SectionFlags::ALLOC.bits());
    }

    #[test]
    fn ehdr_round_trips_through_copy_to() {
        let ehdr = OutputEhdr::new();
        let mut buf = [0u8; elf::ElfHeader::SIZE];
        ehdr.copy_to(&mut buf);
        assert_eq!(&buf[0..4], &elf::ELF_MAGIC);
        assert_eq!(u16::from_le_bytes(buf[18..20].try_into().unwrap()), elf::EM_RISCV);
    }
}
