//! Component B: the input file model.

use crate::decode::{read, read_slice};
use crate::elf::{self, ElfHeader, SectionHeader};
use crate::error::{Error, Result};
use crate::file::File;

/// A decoded ELF input: the file's bytes plus its section header table and
/// section-header string table. Shared by [`crate::object_file::ObjectFile`]
/// (which adds symbols and input sections on top).
#[derive(Debug, Clone)]
pub struct InputFile {
    pub file: File,
    pub header: ElfHeader,
    pub sections: Vec<SectionHeader>,
    shstrtab: Vec<u8>,
}

impl InputFile {
    /// Decodes `file`'s ELF header and section header table.
    ///
    /// # Errors
    /// [`Error::FileTooSmall`] if shorter than [`ElfHeader::SIZE`];
    /// [`Error::BadMagic`] if the magic doesn't match; [`Error::UnsupportedTarget`]
    /// if the class/encoding/machine isn't ELF64 LSB RISC-V;
    /// [`Error::SectionOutOfBounds`] if the section header table doesn't fit.
    pub fn new(file: File) -> Result<Self> {
        let bytes = file.contents();
        if bytes.len() < ElfHeader::SIZE {
            return Err(Error::FileTooSmall {
                path: file.name.clone(),
                size: bytes.len(),
                need: ElfHeader::SIZE,
            });
        }

        let header: ElfHeader = read(bytes, || Error::FileTooSmall {
            path: file.name.clone(),
            size: bytes.len(),
            need: ElfHeader::SIZE,
        })?;

        if !header.has_valid_magic() {
            return Err(Error::BadMagic {
                path: file.name.clone(),
            });
        }
        if header.class() != elf::ELF_CLASS_64
            || header.data_encoding() != elf::ELF_DATA_LSB
            || header.machine != elf::EM_RISCV
        {
            return Err(Error::UnsupportedTarget {
                path: file.name.clone(),
                class: header.class(),
                data: header.data_encoding(),
                machine: header.machine,
            });
        }

        // Section 0 (the null section) is always present and, per spec §3,
        // carries the true section count / shstrndx when the header's own
        // fields overflow a u16.
        let shoff = header.shoff as usize;
        let sh0: SectionHeader = read(
            bytes
                .get(shoff..)
                .ok_or_else(|| out_of_bounds(&file, 0, header.shoff, SectionHeader::SIZE as u64, bytes.len()))?,
            || out_of_bounds(&file, 0, header.shoff, SectionHeader::SIZE as u64, bytes.len()),
        )?;

        let num_sections = if header.shnum == 0 {
            sh0.size as usize
        } else {
            header.shnum as usize
        };

        let table_len = num_sections * SectionHeader::SIZE;
        let table_bytes = bytes.get(shoff..shoff + table_len).ok_or_else(|| {
            out_of_bounds(&file, 0, header.shoff, table_len as u64, bytes.len())
        })?;
        let sections: Vec<SectionHeader> = read_slice(table_bytes);

        let shstrndx = if header.shstrndx == elf::shn::XINDEX {
            sh0.link as usize
        } else {
            header.shstrndx as usize
        };

        let mut input = Self {
            file,
            header,
            sections,
            shstrtab: Vec::new(),
        };
        input.shstrtab = input.bytes_of_index(shstrndx)?.to_vec();
        Ok(input)
    }

    /// Returns the backing bytes of section header `sh`, bounds-checked.
    pub fn bytes_of(&self, sh: &SectionHeader) -> Result<&[u8]> {
        let end = sh.offset.checked_add(sh.size).unwrap_or(u64::MAX);
        self.file
            .contents()
            .get(sh.offset as usize..end as usize)
            .ok_or_else(|| Error::SectionOutOfBounds {
                path: self.file.name.clone(),
                index: 0,
                offset: sh.offset,
                size: sh.size,
                file_size: self.file.len(),
            })
    }

    /// Returns the backing bytes of `self.sections[idx]`.
    pub fn bytes_of_index(&self, idx: usize) -> Result<&[u8]> {
        let sh = self.sections.get(idx).ok_or_else(|| Error::SectionOutOfBounds {
            path: self.file.name.clone(),
            index: idx,
            offset: 0,
            size: 0,
            file_size: self.file.len(),
        })?;
        self.bytes_of(sh)
    }

    /// The section header string table.
    pub fn shstrtab(&self) -> &[u8] {
        &self.shstrtab
    }

    /// The first section of type `sh_type`, if any.
    pub fn find_section(&self, sh_type: u32) -> Option<&SectionHeader> {
        self.sections.iter().find(|s| s.sh_type == sh_type)
    }

    /// The decoded name of section `idx`.
    pub fn section_name(&self, idx: usize) -> Result<String> {
        crate::decode::read_string(&self.shstrtab, self.sections[idx].name as u64)
    }

    /// A file-less shell for [`crate::object_file::ObjectFile::new_internal`]:
    /// no section header table, no bytes, just a name for diagnostics.
    /// Bypasses [`InputFile::new`]'s admission checks entirely, since this
    /// is never read from disk.
    pub(crate) fn internal() -> Self {
        Self {
            file: File::new("<internal>", Vec::new()),
            header: ElfHeader {
                ident: [0; 16],
                e_type: 0,
                machine: elf::EM_RISCV,
                version: 1,
                entry: 0,
                phoff: 0,
                shoff: 0,
                flags: 0,
                ehsize: ElfHeader::SIZE as u16,
                phentsize: 0,
                phnum: 0,
                shentsize: SectionHeader::SIZE as u16,
                shnum: 0,
                shstrndx: 0,
            },
            sections: Vec::new(),
            shstrtab: Vec::new(),
        }
    }
}

fn out_of_bounds(file: &File, index: usize, offset: u64, size: u64, file_size: usize) -> Error {
    Error::SectionOutOfBounds {
        path: file.name.clone(),
        index,
        offset,
        size,
        file_size,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a minimal valid ELF64 LSB RISC-V object with `n` section
    /// headers (including the null section), all zeroed beyond the header
    /// fields this module reads.
    pub(crate) fn build_object(n: u16) -> Vec<u8> {
        let mut bytes = vec![0u8; ElfHeader::SIZE];
        bytes[0..4].copy_from_slice(&elf::ELF_MAGIC);
        bytes[4] = elf::ELF_CLASS_64;
        bytes[5] = elf::ELF_DATA_LSB;
        bytes[18..20].copy_from_slice(&elf::EM_RISCV.to_le_bytes());
        let shoff = bytes.len() as u64;
        bytes[40..48].copy_from_slice(&shoff.to_le_bytes());
        bytes[60..62].copy_from_slice(&n.to_le_bytes()); // shnum
        bytes[62..64].copy_from_slice(&0u16.to_le_bytes()); // shstrndx = 0 (null section)

        for _ in 0..n {
            bytes.extend(std::iter::repeat(0u8).take(SectionHeader::SIZE));
        }
        bytes
    }

    /// Scenario E1: eleven section headers produce `sections.len() == 11`.
    #[test]
    fn e1_eleven_sections() {
        let bytes = build_object(11);
        let input = InputFile::new(File::new("e1.o", bytes)).unwrap();
        assert_eq!(input.sections.len(), 11);
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = vec![0u8; ElfHeader::SIZE + 64];
        let err = InputFile::new(File::new("bad.o", bytes)).unwrap_err();
        assert!(matches!(err, Error::BadMagic { .. }));
    }

    #[test]
    fn rejects_non_riscv_machine() {
        let mut bytes = build_object(1);
        bytes[18..20].copy_from_slice(&62u16.to_le_bytes()); // EM_X86_64
        let err = InputFile::new(File::new("x86.o", bytes)).unwrap_err();
        assert!(matches!(err, Error::UnsupportedTarget { .. }));
    }

    /// Scenario from spec §8.2: `shnum == 0` falls back to `section[0].size`.
    #[test]
    fn shnum_zero_uses_section0_size() {
        let mut bytes = build_object(1);
        // Overwrite shnum with 0 and section[0].size with 3.
        bytes[60..62].copy_from_slice(&0u16.to_le_bytes());
        let shoff = ElfHeader::SIZE;
        bytes[shoff + 32..shoff + 40].copy_from_slice(&3u64.to_le_bytes());
        bytes.extend(std::iter::repeat(0u8).take(SectionHeader::SIZE * 2));
        let input = InputFile::new(File::new("xindex.o", bytes)).unwrap();
        assert_eq!(input.sections.len(), 3);
    }

    /// Scenario from spec §8.2: `shstrndx == SHN_XINDEX` falls back to
    /// `section[0].link`.
    #[test]
    fn shstrndx_xindex_uses_section0_link() {
        let mut bytes = build_object(2);
        bytes[62..64].copy_from_slice(&elf::shn::XINDEX.to_le_bytes());
        let shoff = ElfHeader::SIZE;
        // section[0].link = 1 -> shstrtab is section 1.
        bytes[shoff + 40..shoff + 44].copy_from_slice(&1u32.to_le_bytes());
        // section[1]: offset/size point at a small strtab appended after.
        let strtab = b"\0.text\0";
        let strtab_off = bytes.len() as u64;
        bytes[shoff + SectionHeader::SIZE + 24..shoff + SectionHeader::SIZE + 32]
            .copy_from_slice(&strtab_off.to_le_bytes());
        bytes[shoff + SectionHeader::SIZE + 32..shoff + SectionHeader::SIZE + 40]
            .copy_from_slice(&(strtab.len() as u64).to_le_bytes());
        bytes.extend_from_slice(strtab);
        let input = InputFile::new(File::new("link.o", bytes)).unwrap();
        assert_eq!(input.shstrtab(), strtab);
    }
}
