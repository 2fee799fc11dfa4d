//! Error types for the RPA crate.

use std::path::PathBuf;

use thiserror::Error;

use crate::Version;

/// Errors that can occur when working with RPA archives.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Common library error.
    #[error("{0}")]
    Common(#[from] unrpa_common::Error),

    /// No known header signature matched and no version was forced.
    #[error("could not determine the archive version of {}", path.display())]
    UnknownVersion { path: PathBuf },

    /// The version is recognized but its layout cannot be read.
    #[error("unsupported archive version: {0}")]
    UnsupportedVersion(Version),

    /// The header or index bytes do not match the expected structure.
    #[error("invalid archive format: {0}")]
    Format(String),

    /// A destination directory could not be created.
    #[error("could not create directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The archive is shorter than an index record claims.
    #[error("truncated read for {path}: needed {expected} bytes at offset {offset}, only {available} available")]
    TruncatedRead {
        path: String,
        offset: u64,
        expected: u64,
        available: u64,
    },

    /// An output file could not be written.
    #[error("could not write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A logical path would resolve outside the destination directory.
    #[error("refusing to extract unsafe path: {0}")]
    UnsafePath(String),

    /// A record's literal prefix is longer than the record itself.
    #[error("record for {path} has length {length} shorter than its {start}-byte prefix")]
    RecordTooShort { path: String, length: u64, start: usize },
}

impl Error {
    pub(crate) fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    /// A remediation hint for the user, if this error has one.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::UnknownVersion { .. } => Some(
                "the header did not match a known RPA version; force one with --force <1|2|3>",
            ),
            Self::Format(_) => {
                Some("the archive may be corrupt or of a different version than the one used")
            }
            Self::UnsupportedVersion(Version::V1) => {
                Some("RPA-1.0 index files (.rpi) cannot be read yet")
            }
            _ => None,
        }
    }

    /// Whether this error is scoped to a single extracted file.
    ///
    /// Such errors may be skipped when continue-on-error is enabled;
    /// all others abort the run.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Directory { .. }
                | Self::TruncatedRead { .. }
                | Self::Write { .. }
                | Self::UnsafePath(_)
                | Self::RecordTooShort { .. }
        )
    }
}

/// Result type for RPA operations.
pub type Result<T> = std::result::Result<T, Error>;
