//! unrpa - Ren'Py archive extraction library.
//!
//! This crate provides a unified interface to the unrpa crates.
//!
//! # Crates
//!
//! - [`unrpa_common`] - Common utilities (binary reading)
//! - [`unrpa_rpa`] - RPA archive reading (header, pickled index, extraction)
//!
//! # Example
//!
//! ```no_run
//! use unrpa::prelude::*;
//!
//! let archive = RpaArchive::open("game/archive.rpa")?;
//! let options = ExtractOptions { continue_on_error: true };
//!
//! let report = archive.extract_all("out", &options)?;
//! for failure in report.failures() {
//!     eprintln!("skipped {}", failure.path);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Re-export all sub-crates
pub use unrpa_common as common;
pub use unrpa_rpa as rpa;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use unrpa_common::BinaryReader;
    pub use unrpa_rpa::{
        ExtractOptions, ExtractReport, FileOutcome, Index, IndexRecord, Progress, RpaArchive,
        Version,
    };
}

// Re-export commonly used types at the crate root
pub use unrpa_rpa::{Error, Result};

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
