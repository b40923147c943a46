//! Component C: the object file — symbol decoding, input sections,
//! mergeable-section splitting, resolution, and liveness.

use std::cell::RefCell;
use std::rc::Rc;

use crate::context::Context;
use crate::decode::{read, read_slice, read_string};
use crate::elf::{self, ElfSymbol, SectionFlags, SectionHeader};
use crate::error::{Error, Result};
use crate::input_file::InputFile;
use crate::merge::{split_mergeable, SectionFragment, SplitPiece};
use crate::output_section::OutputSection;
use crate::symbol::{LocalSymbol, Symbol};

/// One section's worth of bytes owned by an [`ObjectFile`] (spec §3's
/// `InputSection`).
#[derive(Debug)]
pub struct InputSection {
    pub index: usize,
    pub contents: Vec<u8>,
    pub header: SectionHeader,
    pub p2align: u32,
    pub is_alive: bool,
    /// Offset within `output_section`, assigned by
    /// [`crate::output_section::compute_section_sizes`].
    pub offset: u64,
    pub output_section: Option<Rc<RefCell<OutputSection>>>,
}

/// A live mergeable input section's split pieces, and (once component E's
/// registration pass has run) the fragment each piece aliases.
#[derive(Debug)]
pub struct MergeableSection {
    pub section_index: usize,
    pub p2align: u32,
    pub pieces: Vec<SplitPiece>,
    pub fragments: Vec<Rc<RefCell<SectionFragment>>>,
}

/// Either a local symbol (owned outright) or a pointer into the global
/// symbol table (spec §3's "array of `Symbol*` parallel to the symbol
/// array").
pub enum SymbolRef {
    Local(usize),
    Global(Rc<RefCell<Symbol>>),
}

/// An ELF64 LSB RISC-V relocatable object, decoded and linked against the
/// process-wide symbol table (spec §3's `ObjectFile`).
pub struct ObjectFile {
    pub input: InputFile,
    pub is_alive: bool,
    pub first_global: usize,
    pub elf_syms: Vec<ElfSymbol>,
    pub local_symbols: Vec<LocalSymbol>,
    pub symbols: Vec<SymbolRef>,
    /// `sections[i]` is `None` for section headers this linker skips
    /// outright (`SHT_GROUP`/`SYMTAB`/`STRTAB`/`REL`/`RELA`/`NULL`).
    pub sections: Vec<Option<Rc<RefCell<InputSection>>>>,
    pub mergeable_sections: Vec<Option<MergeableSection>>,
    pub symtab_shndx: Option<Vec<u32>>,
    symtab_link: Option<u32>,
}

impl ObjectFile {
    /// Wraps `input` with liveness seeded from `is_alive` — command-line
    /// objects start alive, archive members start dead (spec §4.C).
    pub fn new(input: InputFile, is_alive: bool) -> Self {
        Self {
            input,
            is_alive,
            first_global: 0,
            elf_syms: Vec::new(),
            local_symbols: Vec::new(),
            symbols: Vec::new(),
            sections: Vec::new(),
            mergeable_sections: Vec::new(),
            symtab_shndx: None,
            symtab_link: None,
        }
    }

    /// The synthetic, permanently-alive object that owns the null symbol at
    /// index 0 (spec §4.I's `createInternalFile`, matching `passes.go`'s
    /// `CreateInternalFile`). It carries no real sections or bytes; it
    /// exists only so the null symbol has a definer like any other object's
    /// index-0 local symbol, and so `ctx.objects` always has at least one
    /// permanently-live root even if every admitted input starts dead.
    pub fn new_internal() -> Rc<RefCell<ObjectFile>> {
        Rc::new(RefCell::new(Self {
            input: InputFile::internal(),
            is_alive: true,
            first_global: 1,
            elf_syms: vec![ElfSymbol {
                name: 0,
                info: 0,
                other: 0,
                shndx: 0,
                value: 0,
                size: 0,
            }],
            local_symbols: vec![LocalSymbol::default()],
            symbols: vec![SymbolRef::Local(0)],
            sections: Vec::new(),
            mergeable_sections: Vec::new(),
            symtab_shndx: None,
            symtab_link: None,
        }))
    }

    /// Component C's fixed parse pipeline: locate the symbol table,
    /// initialize input sections, initialize symbols, then identify
    /// mergeable sections.
    pub fn parse(self_rc: &Rc<RefCell<ObjectFile>>, ctx: &mut Context) -> Result<()> {
        {
            let mut obj = self_rc.borrow_mut();
            if let Some(symtab) = obj.input.find_section(elf::sht::SYMTAB).cloned() {
                obj.first_global = symtab.info as usize;
                let bytes = obj.input.bytes_of(&symtab)?;
                obj.elf_syms = read_slice(bytes);
                obj.symtab_link = Some(symtab.link);
            }
        }

        Self::initialize_sections(self_rc)?;
        Self::initialize_symbols(self_rc, ctx)?;
        Self::identify_mergeable_sections(self_rc)?;
        Ok(())
    }

    fn initialize_sections(self_rc: &Rc<RefCell<ObjectFile>>) -> Result<()> {
        let mut obj = self_rc.borrow_mut();
        let n = obj.input.sections.len();
        obj.sections = Vec::with_capacity(n);
        for i in 0..n {
            let sh = obj.input.sections[i];
            match sh.sh_type {
                elf::sht::GROUP
                | elf::sht::SYMTAB
                | elf::sht::STRTAB
                | elf::sht::REL
                | elf::sht::RELA
                | elf::sht::NULL => obj.sections.push(None),
                t if t == elf::sht::SYMTAB_SHNDX => {
                    let bytes = obj.input.bytes_of(&sh)?;
                    obj.symtab_shndx = Some(read_slice(bytes));
                    obj.sections.push(None);
                }
                _ => {
                    let contents = if sh.sh_type == elf::sht::NOBITS {
                        Vec::new()
                    } else {
                        obj.input.bytes_of(&sh)?.to_vec()
                    };
                    obj.sections.push(Some(Rc::new(RefCell::new(InputSection {
                        index: i,
                        contents,
                        header: sh,
                        p2align: sh.p2align(),
                        is_alive: true,
                        offset: 0,
                        output_section: None,
                    }))));
                }
            }
        }
        obj.mergeable_sections = (0..n).map(|_| None).collect();
        Ok(())
    }

    fn initialize_symbols(self_rc: &Rc<RefCell<ObjectFile>>, ctx: &mut Context) -> Result<()> {
        let mut obj = self_rc.borrow_mut();
        if obj.elf_syms.is_empty() {
            return Ok(());
        }

        let strtab = obj
            .symtab_link
            .map(|link| obj.input.bytes_of_index(link as usize))
            .transpose()?
            .unwrap_or_default()
            .to_vec();

        let first_global = obj.first_global;
        let mut locals = Vec::with_capacity(first_global);
        locals.push(LocalSymbol::default()); // null symbol
        for i in 1..first_global {
            let elf_sym = obj.elf_syms[i];
            let name = read_string(&strtab, elf_sym.name as u64)?;
            let input_section = if elf_sym.is_abs() {
                None
            } else {
                Some(get_shndx(&obj, &elf_sym, i) as usize)
            };
            locals.push(LocalSymbol {
                name,
                value: elf_sym.value,
                sym_idx: i,
                input_section,
            });
        }
        obj.local_symbols = locals;

        let mut symbols = Vec::with_capacity(obj.elf_syms.len());
        for i in 0..first_global {
            symbols.push(SymbolRef::Local(i));
        }
        for i in first_global..obj.elf_syms.len() {
            let elf_sym = obj.elf_syms[i];
            let name = read_string(&strtab, elf_sym.name as u64)?;
            symbols.push(SymbolRef::Global(ctx.symbols.intern(&name)));
        }
        obj.symbols = symbols;
        Ok(())
    }

    fn identify_mergeable_sections(self_rc: &Rc<RefCell<ObjectFile>>) -> Result<()> {
        let mut obj = self_rc.borrow_mut();
        let path = obj.input.file.name.clone();
        for i in 0..obj.sections.len() {
            let Some(section) = obj.sections[i].clone() else {
                continue;
            };
            let (is_alive, flags, header) = {
                let s = section.borrow();
                (s.is_alive, s.header.section_flags(), s.header)
            };
            if !is_alive || !flags.contains(SectionFlags::MERGE) {
                continue;
            }

            let contents = section.borrow().contents.clone();
            let pieces = split_mergeable(&path, i, &contents, &header)?;
            obj.mergeable_sections[i] = Some(MergeableSection {
                section_index: i,
                p2align: header.p2align(),
                pieces,
                fragments: Vec::new(),
            });
            section.borrow_mut().is_alive = false;
        }
        Ok(())
    }

    /// Component E's "Registration": interns each mergeable section's
    /// pieces into the canonical [`crate::merge::MergedSection`] and
    /// redirects symbols that pointed into the now-dead input section.
    pub fn register_section_pieces(self_rc: &Rc<RefCell<ObjectFile>>, ctx: &mut Context) -> Result<()> {
        let path = self_rc.borrow().input.file.name.clone();
        let indices: Vec<usize> = self_rc
            .borrow()
            .mergeable_sections
            .iter()
            .enumerate()
            .filter_map(|(i, m)| m.as_ref().map(|_| i))
            .collect();

        for idx in indices {
            let (name, sh_type, flags, p2align, pieces) = {
                let obj = self_rc.borrow();
                let sh = obj.input.sections[idx];
                let name = obj.input.section_name(idx)?;
                let ms = obj.mergeable_sections[idx].as_ref().unwrap();
                (name, sh.sh_type, sh.flags, ms.p2align, ms.pieces.clone())
            };

            let merged = ctx.get_merged_section_instance(&name, sh_type, flags);
            let mut fragments = Vec::with_capacity(pieces.len());
            for piece in &pieces {
                fragments.push(merged.borrow_mut().insert(piece.key.clone(), p2align));
            }

            {
                let mut obj = self_rc.borrow_mut();
                obj.mergeable_sections[idx].as_mut().unwrap().fragments = fragments.clone();
            }

            redirect_symbols_into_fragments(self_rc, idx, &pieces, &fragments, &path)?;
        }
        Ok(())
    }

    /// Component C's `getShndx`: resolves the section index a symbol
    /// points at, accounting for `SHN_XINDEX`.
    pub fn get_shndx(&self, elf_sym: &ElfSymbol, idx: usize) -> i64 {
        get_shndx(self, elf_sym, idx)
    }

    /// Component C's `resolveSymbols`: claims each undefined-here-but-
    /// locally-defined global symbol that no one has claimed yet
    /// ("first-writer wins").
    pub fn resolve_symbols(self_rc: &Rc<RefCell<ObjectFile>>) {
        let obj = self_rc.borrow();
        for i in obj.first_global..obj.elf_syms.len() {
            let elf_sym = obj.elf_syms[i];
            if elf_sym.is_undef() {
                continue;
            }

            let input_section = if elf_sym.is_abs() {
                None
            } else {
                let shndx = get_shndx(&obj, &elf_sym, i) as usize;
                match obj.sections.get(shndx) {
                    Some(Some(_)) => Some(shndx),
                    _ => continue, // dead/merged-away section: skip (spec §4.C)
                }
            };

            let SymbolRef::Global(sym) = &obj.symbols[i] else {
                unreachable!("global index must map to SymbolRef::Global")
            };
            let already_resolved = sym.borrow().is_resolved();
            if !already_resolved {
                sym.borrow_mut().value = elf_sym.value;
                sym.borrow_mut().bind(self_rc, input_section);
            }
        }
    }

    /// Component C's `markLiveObjects`: for each global symbol undefined
    /// *here* but defined in a currently-dead file, marks that file alive
    /// and feeds it back to the caller's worklist.
    pub fn mark_live_objects(
        self_rc: &Rc<RefCell<ObjectFile>>,
        mut enqueue: impl FnMut(Rc<RefCell<ObjectFile>>),
    ) {
        debug_assert!(self_rc.borrow().is_alive);
        let obj = self_rc.borrow();
        for i in obj.first_global..obj.elf_syms.len() {
            let elf_sym = obj.elf_syms[i];
            let SymbolRef::Global(sym) = &obj.symbols[i] else {
                unreachable!()
            };
            let definer = sym.borrow().file.as_ref().and_then(|w| w.upgrade());
            let Some(definer) = definer else { continue };
            if elf_sym.is_undef() && !definer.borrow().is_alive {
                definer.borrow_mut().is_alive = true;
                enqueue(definer);
            }
        }
    }

    /// Component C's `clearSymbols`: resets every global symbol this
    /// (now-dead) object had claimed back to unresolved.
    pub fn clear_symbols(self_rc: &Rc<RefCell<ObjectFile>>) {
        let obj = self_rc.borrow();
        for i in obj.first_global..obj.symbols.len() {
            let SymbolRef::Global(sym) = &obj.symbols[i] else {
                unreachable!()
            };
            let owned_by_self = sym
                .borrow()
                .file
                .as_ref()
                .and_then(|w| w.upgrade())
                .is_some_and(|f| Rc::ptr_eq(&f, self_rc));
            if owned_by_self {
                sym.borrow_mut().clear();
            }
        }
    }
}

fn get_shndx(obj: &ObjectFile, elf_sym: &ElfSymbol, idx: usize) -> i64 {
    if elf_sym.shndx == elf::shn::XINDEX {
        obj.symtab_shndx
            .as_ref()
            .map(|v| v[idx] as i64)
            .unwrap_or(0)
    } else {
        elf_sym.shndx as i64
    }
}

fn redirect_symbols_into_fragments(
    self_rc: &Rc<RefCell<ObjectFile>>,
    section_index: usize,
    pieces: &[SplitPiece],
    fragments: &[Rc<RefCell<SectionFragment>>],
    path: &str,
) -> Result<()> {
    let covering = |value: u64| -> Option<usize> {
        pieces
            .iter()
            .enumerate()
            .rev()
            .find(|(_, p)| p.input_offset <= value)
            .filter(|(_, p)| value < p.input_offset + p.key.len() as u64)
            .map(|(i, _)| i)
    };

    let mut obj = self_rc.borrow_mut();

    for local in obj.local_symbols.iter_mut() {
        if local.input_section != Some(section_index) {
            continue;
        }
        let i = covering(local.value).ok_or_else(|| Error::BadSymbolValue {
            path: path.to_string(),
            section: section_index,
            value: local.value,
        })?;
        let intra = local.value - pieces[i].input_offset;
        local.input_section = None;
        // Local symbols carry no `fragment` field of their own (only globals
        // are merge-redirected via `Symbol`); record the intra-fragment
        // offset in `value` so later consumers agree with the global case.
        local.value = intra;
    }

    for sym_ref in obj.symbols.iter() {
        let SymbolRef::Global(sym) = sym_ref else {
            continue;
        };
        let bound_here = {
            let s = sym.borrow();
            s.input_section == Some(section_index)
                && s.file.as_ref().and_then(|w| w.upgrade()).is_some_and(|f| Rc::ptr_eq(&f, self_rc))
        };
        if !bound_here {
            continue;
        }
        let value = sym.borrow().value;
        let i = covering(value).ok_or_else(|| Error::BadSymbolValue {
            path: path.to_string(),
            section: section_index,
            value,
        })?;
        let intra = value - pieces[i].input_offset;
        sym.borrow_mut().bind_fragment(fragments[i].clone(), intra);
    }

    Ok(())
}
