//! Component I: the fixed linker pipeline.
//!
//! `link` runs every pass in the one order the core ever runs them in (spec
//! §4.I): admit inputs, resolve symbols to a fixpoint, register mergeable
//! pieces, bin and size output sections, lay out addresses and offsets,
//! then copy every chunk into the output buffer and write it.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::archive;
use crate::chunk::ChunkRef;
use crate::context::{Context, InputSpec};
use crate::elf::{self, FileType};
use crate::error::{Error, Result};
use crate::file::File;
use crate::input_file::InputFile;
use crate::layout;
use crate::object_file::ObjectFile;
use crate::output_section;

/// Runs the full pipeline against `ctx` and returns the assembled output
/// image, ready to be written to `ctx.config.output_path`.
pub fn link(ctx: &mut Context) -> Result<Vec<u8>> {
    read_input_files(ctx)?;
    create_internal_file(ctx);
    resolve_symbols(ctx)?;
    register_section_pieces(ctx)?;
    create_synthetic_chunks(ctx);
    output_section::bin_sections(ctx);
    output_section::compute_section_sizes(ctx);
    layout::sort_output_sections(ctx);
    layout::set_output_section_offsets(ctx);
    Ok(copy_chunks(ctx))
}

/// Component I's `readInputFiles`: admits every command-line input,
/// expanding archives into their (initially dead) member objects and
/// parsing every admitted object in the order encountered.
fn read_input_files(ctx: &mut Context) -> Result<()> {
    let inputs = ctx.config.inputs.clone();
    for input in inputs {
        let file = match input {
            InputSpec::Path(path) => File::read(path)?,
            InputSpec::Library(name) => File::read(find_library(ctx, &name)?)?,
        };

        match elf::classify(file.contents()) {
            FileType::Object => admit_object(ctx, file, true)?,
            FileType::Archive => {
                for member in archive::read_members(&file)? {
                    admit_object(ctx, member, false)?;
                }
            }
            FileType::Unknown => {
                return Err(Error::BadArchiveMember {
                    path: file.name.clone(),
                })
            }
        }
    }

    if !ctx.objects.iter().any(|o| o.borrow().is_alive) {
        return Err(Error::NoLiveRoots);
    }
    Ok(())
}

fn find_library(ctx: &Context, name: &str) -> Result<String> {
    for dir in &ctx.config.library_paths {
        let candidate = format!("{dir}/lib{name}.a");
        if std::path::Path::new(&candidate).is_file() {
            return Ok(candidate);
        }
    }
    Err(Error::LibraryNotFound {
        name: name.to_string(),
        searched: ctx.config.library_paths.clone(),
    })
}

fn admit_object(ctx: &mut Context, file: File, is_alive: bool) -> Result<()> {
    let input = InputFile::new(file)?;
    let obj = Rc::new(RefCell::new(ObjectFile::new(input, is_alive)));
    ObjectFile::parse(&obj, ctx)?;
    ctx.objects.push(obj);
    Ok(())
}

/// Appends the synthetic, permanently-alive internal object (spec §4.I's
/// `createInternalFile`) after every command-line/archive input has been
/// admitted.
fn create_internal_file(ctx: &mut Context) {
    ctx.objects.push(ObjectFile::new_internal());
}

/// Component C's two-phase resolution: every admitted object (alive or not)
/// claims its definitions in input order, "first writer wins"; liveness
/// then propagates from the objects that started alive, via a FIFO
/// worklist over newly-live archive members (spec §4.C). Anything left
/// dead afterward has its claims released.
fn resolve_symbols(ctx: &mut Context) -> Result<()> {
    for obj in ctx.objects.clone() {
        ObjectFile::resolve_symbols(&obj);
    }

    let mut worklist: VecDeque<Rc<RefCell<ObjectFile>>> =
        ctx.objects.iter().filter(|o| o.borrow().is_alive).cloned().collect();

    while let Some(obj) = worklist.pop_front() {
        let mut newly_live = Vec::new();
        ObjectFile::mark_live_objects(&obj, |file| newly_live.push(file));
        for file in newly_live {
            ObjectFile::resolve_symbols(&file);
            worklist.push_back(file);
        }
    }

    for obj in ctx.objects.clone() {
        if !obj.borrow().is_alive {
            ObjectFile::clear_symbols(&obj);
        }
    }
    Ok(())
}

fn register_section_pieces(ctx: &mut Context) -> Result<()> {
    for obj in ctx.objects.clone() {
        if obj.borrow().is_alive {
            ObjectFile::register_section_pieces(&obj, ctx)?;
        }
    }
    Ok(())
}

/// Component G's binning target for every live, non-mergeable input
/// section, plus the synthetic EHDR/SHDR and merged-section chunks (spec
/// §4.F/§4.G's `createSyntheticSections`).
fn create_synthetic_chunks(ctx: &mut Context) {
    for obj in ctx.objects.clone() {
        let obj = obj.borrow();
        for section in obj.sections.iter().flatten() {
            let (is_alive, name, sh_type, flags) = {
                let s = section.borrow();
                (s.is_alive, s.header.name, s.header.sh_type, s.header.flags)
            };
            if !is_alive {
                continue;
            }
            let name = obj
                .input
                .section_name(section.borrow().index)
                .unwrap_or_else(|_| format!("section{name}"));
            let out = output_section::get_output_section(ctx, &name, sh_type, flags);
            section.borrow_mut().output_section = Some(out);
        }
    }

    for merged in ctx.merged_sections.clone() {
        merged.borrow_mut().assign_offsets();
    }

    ctx.chunks.push(ChunkRef::Ehdr(ctx.ehdr.clone()));
    for section in ctx.output_sections.clone() {
        ctx.chunks.push(ChunkRef::Output(section));
    }
    for merged in ctx.merged_sections.clone() {
        ctx.chunks.push(ChunkRef::Merged(merged));
    }
    ctx.chunks.push(ChunkRef::Shdr(ctx.shdr.clone()));
}

/// Copies every chunk's bytes into a freshly sized output buffer, then
/// fills in the section header table and the ELF header's own `shoff`.
fn copy_chunks(ctx: &mut Context) -> Vec<u8> {
    ctx.shdr.borrow_mut().entries = ctx
        .chunks
        .iter()
        .filter(|c| !c.is_ehdr() && !c.is_shdr())
        .map(|c| c.section_header())
        .collect();

    let shdr_header = ChunkRef::Shdr(ctx.shdr.clone()).section_header();
    let image_size = (shdr_header.offset + shdr_header.size) as usize;
    let mut buffer = vec![0u8; image_size];

    {
        let mut ehdr = ctx.ehdr.borrow_mut();
        ehdr.header.shoff = shdr_header.offset;
        ehdr.header.shnum = ctx.shdr.borrow().entries.len() as u16;
    }

    for chunk in &ctx.chunks {
        let sh = chunk.section_header();
        let start = sh.offset as usize;
        let end = start + sh.size as usize;
        chunk.copy_to(&mut buffer[start..end]);
    }

    buffer
}
