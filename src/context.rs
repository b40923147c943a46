//! Ties every component to a single run: the live object set, the interned
//! symbol table, the merged and output sections, and the chunk list the
//! layout pass orders.

use std::cell::RefCell;
use std::rc::Rc;

use typed_builder::TypedBuilder;

use crate::chunk::{ChunkRef, OutputEhdr, OutputShdr};
use crate::elf::SectionFlags;
use crate::merge::MergedSection;
use crate::object_file::ObjectFile;
use crate::output_section::OutputSection;
use crate::symbol::SymbolTable;

/// One entry on the command line: either a path to a relocatable object or
/// archive, or a `-lname` library reference to resolve against
/// [`Configuration::library_paths`] (spec §4.K).
#[derive(Debug, Clone)]
pub enum InputSpec {
    Path(String),
    Library(String),
}

/// Parsed command-line configuration (spec §4.K), built with
/// [`typed_builder`] the way this crate's other configuration records are
/// built.
#[derive(Debug, Clone, TypedBuilder)]
pub struct Configuration {
    #[builder(default = "a.out".to_string())]
    pub output_path: String,

    #[builder(default = "elf64lriscv".to_string())]
    pub emulation: String,

    #[builder(default)]
    pub library_paths: Vec<String>,

    pub inputs: Vec<InputSpec>,
}

/// The mutable state threaded through every pass in [`crate::driver`].
pub struct Context {
    pub config: Configuration,
    /// Every admitted object, command-line and archive-drawn alike, in the
    /// order passes should see them (spec §4.C/§4.I).
    pub objects: Vec<Rc<RefCell<ObjectFile>>>,
    pub symbols: SymbolTable,
    pub merged_sections: Vec<Rc<RefCell<MergedSection>>>,
    pub output_sections: Vec<Rc<RefCell<OutputSection>>>,
    pub ehdr: Rc<RefCell<OutputEhdr>>,
    pub shdr: Rc<RefCell<OutputShdr>>,
    pub chunks: Vec<ChunkRef>,
}

impl Context {
    pub fn new(config: Configuration) -> Self {
        Self {
            config,
            objects: Vec::new(),
            symbols: SymbolTable::new(),
            merged_sections: Vec::new(),
            output_sections: Vec::new(),
            ehdr: Rc::new(RefCell::new(OutputEhdr::new())),
            shdr: Rc::new(RefCell::new(OutputShdr::new())),
            chunks: Vec::new(),
        }
    }

    /// A bare context for component-level unit tests that never touch the
    /// driver or the CLI.
    #[cfg(test)]
    pub fn new_for_test() -> Self {
        Self::new(Configuration::builder().inputs(Vec::new()).build())
    }

    /// Finds or creates the [`MergedSection`] with canonical identity
    /// `(name, type, flags)`, mirroring
    /// [`crate::output_section::get_output_section`]'s identity rule (spec
    /// §4.E/§4.F).
    pub fn get_merged_section_instance(
        &mut self,
        name: &str,
        sh_type: u32,
        flags: u64,
    ) -> Rc<RefCell<MergedSection>> {
        let name = crate::chunk::get_output_name(name, flags);
        let flags = crate::chunk::strip_identity_flags(flags) | SectionFlags::MERGE.bits();

        if let Some(existing) = self.merged_sections.iter().find(|s| {
            let s = s.borrow();
            s.name == name && s.sh_type == sh_type && s.flags == flags
        }) {
            return existing.clone();
        }

        let section = Rc::new(RefCell::new(MergedSection::new(name, sh_type, flags)));
        self.merged_sections.push(section.clone());
        section
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_section_instance_is_reused_by_identity() {
        let mut ctx = Context::new_for_test();
        let a = ctx.get_merged_section_instance(".rodata.str1.1", crate::elf::sht::PROGBITS, 0);
        let b = ctx.get_merged_section_instance(".rodata.str1.1", crate::elf::sht::PROGBITS, 0);
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(ctx.merged_sections.len(), 1);
    }
}
