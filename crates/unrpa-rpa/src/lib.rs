//! RPA archive reader for Ren'Py visual novels.
//!
//! An RPA archive is a single blob of concatenated files plus an index that
//! maps each logical path to the byte range holding its data. Three schemes
//! are known:
//!
//! - `RPA-3.0`: header line with the index offset and an XOR key that
//!   obfuscates every record's offset and length
//! - `RPA-2.0`: header line with the index offset only
//! - `RPA-1.0`: index kept in a separate `.rpi` file (recognized, not read)
//!
//! In both readable schemes the index is a zlib-compressed pickle of
//! `{path: [(offset, length[, start]), ...]}`, where `start` is a literal
//! prefix of the file kept in the index itself.
//!
//! # Example
//!
//! ```no_run
//! use unrpa_rpa::{ExtractOptions, RpaArchive};
//!
//! let archive = RpaArchive::open("game/archive.rpa")?;
//!
//! for path in archive.list_paths() {
//!     println!("{path}");
//! }
//!
//! let report = archive.extract_all("out", &ExtractOptions::default())?;
//! println!("{} bytes written", report.bytes_written());
//! # Ok::<(), unrpa_rpa::Error>(())
//! ```

mod archive;
mod decompress;
mod error;
mod extract;
mod header;
mod index;
pub mod pickle;
mod version;

pub use archive::{read_index, RpaArchive};
pub use error::{Error, Result};
pub use extract::{
    destination_path, extract_entry, ExtractOptions, ExtractReport, FileOutcome, Progress,
};
pub use header::ArchiveHeader;
pub use index::{deobfuscate, list_paths, normalize_path, Index, IndexRecord};
pub use version::{detect, Version, ARCHIVE_EXTENSION, INDEX_EXTENSION};
