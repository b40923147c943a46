//! Error taxonomy and the fatal sink.
//!
//! Every fallible operation in the crate returns [`Result<T>`]. Admission has
//! passed once an [`crate::object_file::ObjectFile`] exists; after that point
//! internal APIs are documented as infallible and any violation is a bug, not
//! a runtime expectation (spec §7/§9).

use std::backtrace::Backtrace;
use std::fmt;

/// The crate-wide error type, grouped by the taxonomy in spec §7.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    // --- Admission errors ---
    #[error("file too small: {path} is {size} bytes, need at least {need}")]
    FileTooSmall {
        path: String,
        size: usize,
        need: usize,
    },
    #[error("not an ELF file: {path}")]
    BadMagic { path: String },
    #[error("unsupported ELF class/endianness/machine in {path}: class={class}, data={data}, machine={machine}")]
    UnsupportedTarget {
        path: String,
        class: u8,
        data: u8,
        machine: u16,
    },
    #[error("archive member in {path} is not a valid object file")]
    BadArchiveMember { path: String },

    // --- Decoding errors ---
    #[error("section {index} in {path} is out of file bounds (offset {offset}, size {size}, file size {file_size})")]
    SectionOutOfBounds {
        path: String,
        index: usize,
        offset: u64,
        size: u64,
        file_size: usize,
    },
    #[error("string table offset {offset} out of range (table size {table_size})")]
    StringTableOutOfRange { offset: u64, table_size: usize },
    #[error("mergeable string section {section} in {path} is not NUL-terminated")]
    UnterminatedMergeableString { path: String, section: usize },
    #[error("mergeable section {section} in {path} has length {len} not a multiple of entsize {entsize}")]
    MisalignedMergeableSection {
        path: String,
        section: usize,
        len: usize,
        entsize: u64,
    },

    // --- Resolution errors ---
    #[error("bad symbol value {value} in {path}: outside any fragment of section {section}")]
    BadSymbolValue {
        path: String,
        section: usize,
        value: u64,
    },
    #[error("no live roots remain after admission")]
    NoLiveRoots,

    // --- Layout errors ---
    #[error("chunk {name} requires nonzero alignment")]
    ZeroAlignment { name: String },

    // --- CLI / configuration errors ---
    #[error("unrecognized command-line flag: {flag}")]
    UnrecognizedFlag { flag: String },
    #[error("library not found: -l{name} (searched {searched:?})")]
    LibraryNotFound { name: String, searched: Vec<String> },
    #[error("unsupported emulation: {name} (only elf64lriscv is supported)")]
    UnsupportedEmulation { name: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Prints a `rvlink: fatal: ...` diagnostic with a captured backtrace and
/// terminates the process. Mirrors the single abort-on-error sink spec §9
/// calls for; this is the only place the crate calls [`std::process::exit`].
pub fn fatal(err: impl fmt::Display) -> ! {
    eprintln!("rvlink: fatal: {err}");
    eprintln!("{}", Backtrace::force_capture());
    std::process::exit(1)
}

/// Unwraps a [`Result`], routing any error through [`fatal`] instead of
/// panicking. Used by the pass driver, where every remaining error is by
/// definition unrecoverable.
pub trait OrFatal<T> {
    /// Returns the success value or calls [`fatal`].
    fn or_fatal(self) -> T;
}

impl<T> OrFatal<T> for Result<T> {
    fn or_fatal(self) -> T {
        match self {
            Ok(v) => v,
            Err(e) => fatal(e),
        }
    }
}

/// Asserts an invariant, routing failure through [`fatal`] rather than
/// panicking, matching the Go source's `utils.Assert`.
pub fn assert(condition: bool, message: impl fmt::Display) {
    if !condition {
        fatal(message);
    }
}
