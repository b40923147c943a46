//! Component A (records) — fixed-layout ELF64 LSB RISC-V structures and the
//! constants that classify them.
//!
//! This crate admits only `ELFCLASS64`/`ELFDATA2LSB`/`EM_RISCV` objects
//! (spec §3); there is no const-generic class/encoding parameter the way the
//! multi-architecture teacher crate has one, since everything else is
//! rejected at admission (see [`crate::input_file::InputFile::new`]).

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

use crate::decode::FromLeBytes;

/// `\x7fELF`
pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// `ELFCLASS64`
pub const ELF_CLASS_64: u8 = 2;
/// `ELFDATA2LSB`
pub const ELF_DATA_LSB: u8 = 1;
/// `EM_RISCV`
pub const EM_RISCV: u16 = 243;

/// `EF_RISCV_RVC`: the object was compiled with compressed instructions.
pub const EF_RISCV_RVC: u32 = 1;

/// The linker's fixed image base (spec §4.H).
pub const IMAGE_BASE: u64 = 0x200000;
/// The linker's fixed page size (spec §4.H).
pub const PAGE_SIZE: u64 = 0x1000;

/// Special section indices (spec GLOSSARY).
pub mod shn {
    pub const UNDEF: u16 = 0;
    pub const ABS: u16 = 0xFFF1;
    pub const COMMON: u16 = 0xFFF2;
    pub const XINDEX: u16 = 0xFFFF;
}

/// Section types (`sh_type`), the subset this linker inspects.
pub mod sht {
    pub const NULL: u32 = 0;
    pub const PROGBITS: u32 = 1;
    pub const SYMTAB: u32 = 2;
    pub const STRTAB: u32 = 3;
    pub const RELA: u32 = 4;
    pub const NOBITS: u32 = 8;
    pub const REL: u32 = 9;
    pub const GROUP: u32 = 17;
    pub const SYMTAB_SHNDX: u32 = 18;
    pub const NOTE: u32 = 7;
}

/// The section types this linker distinguishes by name, decoded from
/// `sh_type` for diagnostics and the admission/merge passes that branch on
/// section kind. Unlike [`mod@sht`]'s raw constants (used for the hot-path
/// comparisons against `sh_type: u32`), this enum is `#[non_exhaustive]` in
/// spirit: [`SectionHeader::section_type`] returns `None` for any vendor or
/// OS-specific type this linker doesn't special-case.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum SectionType {
    Null = sht::NULL,
    Progbits = sht::PROGBITS,
    Symtab = sht::SYMTAB,
    Strtab = sht::STRTAB,
    Rela = sht::RELA,
    Nobits = sht::NOBITS,
    Rel = sht::REL,
    Note = sht::NOTE,
    Group = sht::GROUP,
    SymtabShndx = sht::SYMTAB_SHNDX,
}

/// A symbol's binding (`ELF64_ST_BIND(st_info)`).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum SymbolBinding {
    Local = 0,
    Global = 1,
    Weak = 2,
}

bitflags::bitflags! {
    /// Section flags (`sh_flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u64 {
        const WRITE = 1 << 0;
        const ALLOC = 1 << 1;
        const EXECINSTR = 1 << 2;
        const MERGE = 1 << 4;
        const STRINGS = 1 << 5;
        const GROUP = 1 << 9;
        const TLS = 1 << 10;
        const COMPRESSED = 1 << 11;
    }
}

/// Object/archive-member classification (spec §4.I's `ReadFile`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// A relocatable ELF64 LSB RISC-V object file.
    Object,
    /// A System V archive of object files.
    Archive,
    /// Anything else; admission fails.
    Unknown,
}

/// Classifies the leading bytes of a file without fully decoding it, so
/// admission can branch between [`crate::object_file::ObjectFile`] and
/// archive-member enumeration (spec §4.I).
pub fn classify(bytes: &[u8]) -> FileType {
    if bytes.len() >= 4 && bytes[..4] == ELF_MAGIC {
        FileType::Object
    } else if bytes.len() >= 8 && &bytes[..8] == crate::archive::MAGIC {
        FileType::Archive
    } else {
        FileType::Unknown
    }
}

/// The ELF file header. 64 bytes on disk for ELF64.
#[derive(Debug, Clone, Copy)]
pub struct ElfHeader {
    pub ident: [u8; 16],
    pub e_type: u16,
    pub machine: u16,
    pub version: u32,
    pub entry: u64,
    pub phoff: u64,
    pub shoff: u64,
    pub flags: u32,
    pub ehsize: u16,
    pub phentsize: u16,
    pub phnum: u16,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

impl FromLeBytes for ElfHeader {
    const SIZE: usize = 64;

    fn from_le_bytes(b: &[u8]) -> Self {
        let mut ident = [0u8; 16];
        ident.copy_from_slice(&b[0..16]);
        Self {
            ident,
            e_type: u16::from_le_bytes(b[16..18].try_into().unwrap()),
            machine: u16::from_le_bytes(b[18..20].try_into().unwrap()),
            version: u32::from_le_bytes(b[20..24].try_into().unwrap()),
            entry: u64::from_le_bytes(b[24..32].try_into().unwrap()),
            phoff: u64::from_le_bytes(b[32..40].try_into().unwrap()),
            shoff: u64::from_le_bytes(b[40..48].try_into().unwrap()),
            flags: u32::from_le_bytes(b[48..52].try_into().unwrap()),
            ehsize: u16::from_le_bytes(b[52..54].try_into().unwrap()),
            phentsize: u16::from_le_bytes(b[54..56].try_into().unwrap()),
            phnum: u16::from_le_bytes(b[56..58].try_into().unwrap()),
            shentsize: u16::from_le_bytes(b[58..60].try_into().unwrap()),
            shnum: u16::from_le_bytes(b[60..62].try_into().unwrap()),
            shstrndx: u16::from_le_bytes(b[62..64].try_into().unwrap()),
        }
    }
}

impl ElfHeader {
    /// `true` once `ident[0..4]` matches the ELF magic.
    pub fn has_valid_magic(&self) -> bool {
        self.ident[0..4] == ELF_MAGIC
    }

    /// The ELF class (`ident[4]`); only [`ELF_CLASS_64`] is admitted.
    pub fn class(&self) -> u8 {
        self.ident[4]
    }

    /// The data encoding (`ident[5]`); only [`ELF_DATA_LSB`] is admitted.
    pub fn data_encoding(&self) -> u8 {
        self.ident[5]
    }
}

/// A section header. 64 bytes on disk for ELF64.
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionHeader {
    pub name: u32,
    pub sh_type: u32,
    pub flags: u64,
    pub addr: u64,
    pub offset: u64,
    pub size: u64,
    pub link: u32,
    pub info: u32,
    pub addralign: u64,
    pub entsize: u64,
}

impl FromLeBytes for SectionHeader {
    const SIZE: usize = 64;

    fn from_le_bytes(b: &[u8]) -> Self {
        Self {
            name: u32::from_le_bytes(b[0..4].try_into().unwrap()),
            sh_type: u32::from_le_bytes(b[4..8].try_into().unwrap()),
            flags: u64::from_le_bytes(b[8..16].try_into().unwrap()),
            addr: u64::from_le_bytes(b[16..24].try_into().unwrap()),
            offset: u64::from_le_bytes(b[24..32].try_into().unwrap()),
            size: u64::from_le_bytes(b[32..40].try_into().unwrap()),
            link: u32::from_le_bytes(b[40..44].try_into().unwrap()),
            info: u32::from_le_bytes(b[44..48].try_into().unwrap()),
            addralign: u64::from_le_bytes(b[48..56].try_into().unwrap()),
            entsize: u64::from_le_bytes(b[56..64].try_into().unwrap()),
        }
    }
}

impl SectionHeader {
    /// The section's alignment as a power-of-two exponent, as the merged
    /// section and binner components want it (spec §4.E/§4.G). `addralign
    /// == 0` is treated as "no alignment", i.e. `p2align == 0` (spec §7).
    pub fn p2align(&self) -> u32 {
        if self.addralign <= 1 {
            0
        } else {
            self.addralign.trailing_zeros()
        }
    }

    pub fn section_flags(&self) -> SectionFlags {
        SectionFlags::from_bits_truncate(self.flags)
    }

    /// The named [`SectionType`] for `sh_type`, or `None` for a vendor/OS
    /// type this linker doesn't special-case.
    pub fn section_type(&self) -> Option<SectionType> {
        SectionType::from_u32(self.sh_type)
    }
}

/// A program header. Not emitted by this core (spec §6); kept for
/// completeness and symmetry with the other fixed-layout records.
#[derive(Debug, Clone, Copy)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub flags: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub paddr: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub align: u64,
}

impl FromLeBytes for ProgramHeader {
    const SIZE: usize = 56;

    fn from_le_bytes(b: &[u8]) -> Self {
        Self {
            p_type: u32::from_le_bytes(b[0..4].try_into().unwrap()),
            flags: u32::from_le_bytes(b[4..8].try_into().unwrap()),
            offset: u64::from_le_bytes(b[8..16].try_into().unwrap()),
            vaddr: u64::from_le_bytes(b[16..24].try_into().unwrap()),
            paddr: u64::from_le_bytes(b[24..32].try_into().unwrap()),
            filesz: u64::from_le_bytes(b[32..40].try_into().unwrap()),
            memsz: u64::from_le_bytes(b[40..48].try_into().unwrap()),
            align: u64::from_le_bytes(b[48..56].try_into().unwrap()),
        }
    }
}

/// A symbol table entry (`Elf64_Sym`).
#[derive(Debug, Clone, Copy)]
pub struct ElfSymbol {
    pub name: u32,
    pub info: u8,
    pub other: u8,
    pub shndx: u16,
    pub value: u64,
    pub size: u64,
}

impl FromLeBytes for ElfSymbol {
    const SIZE: usize = 24;

    fn from_le_bytes(b: &[u8]) -> Self {
        Self {
            name: u32::from_le_bytes(b[0..4].try_into().unwrap()),
            info: b[4],
            other: b[5],
            shndx: u16::from_le_bytes(b[6..8].try_into().unwrap()),
            value: u64::from_le_bytes(b[8..16].try_into().unwrap()),
            size: u64::from_le_bytes(b[16..24].try_into().unwrap()),
        }
    }
}

impl ElfSymbol {
    pub fn is_abs(&self) -> bool {
        self.shndx == shn::ABS
    }

    pub fn is_undef(&self) -> bool {
        self.shndx == shn::UNDEF
    }

    pub fn is_common(&self) -> bool {
        self.shndx == shn::COMMON
    }

    pub fn binding(&self) -> u8 {
        self.info >> 4
    }

    /// The named [`SymbolBinding`] for this symbol, or `None` for a
    /// vendor/OS binding this linker doesn't special-case.
    pub fn binding_kind(&self) -> Option<SymbolBinding> {
        SymbolBinding::from_u8(self.binding())
    }
}

/// An explicit-addend relocation entry (`Elf64_Rela`). Decoded for
/// completeness (component A); applying relocations is out of scope (spec
/// §1/§9).
#[derive(Debug, Clone, Copy)]
pub struct Rela {
    pub offset: u64,
    pub r_type: u32,
    pub sym: u32,
    pub addend: i64,
}

impl FromLeBytes for Rela {
    const SIZE: usize = 24;

    fn from_le_bytes(b: &[u8]) -> Self {
        let info = u64::from_le_bytes(b[8..16].try_into().unwrap());
        Self {
            offset: u64::from_le_bytes(b[0..8].try_into().unwrap()),
            r_type: (info & 0xFFFF_FFFF) as u32,
            sym: (info >> 32) as u32,
            addend: i64::from_le_bytes(b[16..24].try_into().unwrap()),
        }
    }
}

/// A 60-byte System V archive member header.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveMemberHeader {
    pub name: [u8; 16],
    pub date: [u8; 12],
    pub uid: [u8; 6],
    pub gid: [u8; 6],
    pub mode: [u8; 8],
    pub size: [u8; 10],
    pub fmag: [u8; 2],
}

impl FromLeBytes for ArchiveMemberHeader {
    const SIZE: usize = 60;

    fn from_le_bytes(b: &[u8]) -> Self {
        let mut name = [0u8; 16];
        let mut date = [0u8; 12];
        let mut uid = [0u8; 6];
        let mut gid = [0u8; 6];
        let mut mode = [0u8; 8];
        let mut size = [0u8; 10];
        let mut fmag = [0u8; 2];
        name.copy_from_slice(&b[0..16]);
        date.copy_from_slice(&b[16..28]);
        uid.copy_from_slice(&b[28..34]);
        gid.copy_from_slice(&b[34..40]);
        mode.copy_from_slice(&b[40..48]);
        size.copy_from_slice(&b[48..58]);
        fmag.copy_from_slice(&b[58..60]);
        Self {
            name,
            date,
            uid,
            gid,
            mode,
            size,
            fmag,
        }
    }
}

impl ArchiveMemberHeader {
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.name.starts_with(prefix.as_bytes())
    }

    pub fn is_strtab(&self) -> bool {
        self.has_prefix("// ")
    }

    pub fn is_symtab(&self) -> bool {
        self.has_prefix("/ ") || self.has_prefix("/SYM64/ ")
    }

    /// Parses the decimal, space-padded `size` field.
    pub fn size(&self) -> usize {
        std::str::from_utf8(&self.size)
            .unwrap_or("0")
            .trim()
            .parse()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Round-trip property from spec §8.1: decoding and the bytes agree.
    #[test]
    fn elf_header_round_trip() {
        let mut bytes = [0u8; ElfHeader::SIZE];
        bytes[0..4].copy_from_slice(&ELF_MAGIC);
        bytes[4] = ELF_CLASS_64;
        bytes[5] = ELF_DATA_LSB;
        bytes[18..20].copy_from_slice(&EM_RISCV.to_le_bytes());
        bytes[60..62].copy_from_slice(&11u16.to_le_bytes()); // shnum
        let hdr = ElfHeader::from_le_bytes(&bytes);
        assert!(hdr.has_valid_magic());
        assert_eq!(hdr.class(), ELF_CLASS_64);
        assert_eq!(hdr.machine, EM_RISCV);
        assert_eq!(hdr.shnum, 11);
    }

    #[test]
    fn section_header_p2align_zero_is_identity() {
        let mut sh = SectionHeader::default();
        sh.addralign = 0;
        assert_eq!(sh.p2align(), 0);
        sh.addralign = 16;
        assert_eq!(sh.p2align(), 4);
    }

    #[test]
    fn classify_detects_object_and_unknown() {
        let mut obj = vec![0u8; 64];
        obj[0..4].copy_from_slice(&ELF_MAGIC);
        assert_eq!(classify(&obj), FileType::Object);
        assert_eq!(classify(b"not an elf"), FileType::Unknown);
    }

    #[test]
    fn section_type_decodes_known_values_and_rejects_unknown() {
        let sh = SectionHeader {
            sh_type: sht::SYMTAB,
            ..Default::default()
        };
        assert_eq!(sh.section_type(), Some(SectionType::Symtab));

        let vendor = SectionHeader {
            sh_type: 0x7000_0000,
            ..Default::default()
        };
        assert_eq!(vendor.section_type(), None);
    }

    #[test]
    fn symbol_binding_decodes_global() {
        let sym = ElfSymbol {
            name: 0,
            info: (1 << 4) | 1, // GLOBAL, FUNC
            other: 0,
            shndx: 1,
            value: 0,
            size: 0,
        };
        assert_eq!(sym.binding_kind(), Some(SymbolBinding::Global));
    }
}
