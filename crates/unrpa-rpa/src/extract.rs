//! Streaming extraction of index records to the filesystem.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use crate::{Error, IndexRecord, Result};

/// Size of the buffer used to copy file data out of the archive.
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Extraction settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions {
    /// Record per-file failures and keep going instead of aborting.
    pub continue_on_error: bool,
}

/// Progress event emitted before each file is extracted.
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    /// Zero-based number of the file.
    pub index: usize,
    /// Number of files being extracted.
    pub total: usize,
    /// Normalized logical path.
    pub path: &'a str,
}

impl Progress<'_> {
    /// Fraction of files started before this one.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.index as f64 / self.total as f64
        }
    }
}

/// Result of extracting one logical file.
#[derive(Debug)]
pub struct FileOutcome {
    /// Normalized logical path.
    pub path: String,
    /// Bytes written, or why the file was skipped.
    pub result: Result<u64>,
}

/// Outcomes of an extraction run, in index order.
#[derive(Debug, Default)]
pub struct ExtractReport {
    pub outcomes: Vec<FileOutcome>,
}

impl ExtractReport {
    /// Files that were written.
    pub fn extracted(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_ok())
    }

    /// Files that were skipped because of an error.
    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    /// Whether every file was written.
    pub fn is_complete(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Total bytes written across all files.
    pub fn bytes_written(&self) -> u64 {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .sum()
    }
}

/// Join a logical path onto `root`, refusing anything that could escape it.
pub fn destination_path(root: &Path, path: &str) -> Result<PathBuf> {
    let relative = Path::new(path);
    let mut has_file = false;

    for component in relative.components() {
        match component {
            Component::Normal(_) => has_file = true,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::UnsafePath(path.to_string()))
            }
        }
    }

    if !has_file {
        return Err(Error::UnsafePath(path.to_string()));
    }

    Ok(root.join(relative))
}

/// Extract one logical file from `reader` into `root`.
///
/// Only the first record is used. The record's byte range is checked against
/// `archive_len` before the output file is created, so a truncated archive
/// never leaves a partial file behind.
pub fn extract_entry<R: Read + Seek>(
    reader: &mut R,
    archive_len: u64,
    path: &str,
    records: &[IndexRecord],
    root: &Path,
) -> Result<u64> {
    let target = destination_path(root, path)?;

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|source| Error::Directory {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let record = records
        .first()
        .ok_or_else(|| Error::format(format!("no records for {path}")))?;

    let stored = record.stored_len().ok_or_else(|| Error::RecordTooShort {
        path: path.to_string(),
        length: record.length,
        start: record.start.len(),
    })?;

    let available = archive_len.saturating_sub(record.offset);
    if record.offset.checked_add(stored).map_or(true, |end| end > archive_len) {
        return Err(Error::TruncatedRead {
            path: path.to_string(),
            offset: record.offset,
            expected: stored,
            available,
        });
    }

    reader.seek(SeekFrom::Start(record.offset))?;

    let file = File::create(&target).map_err(|source| Error::Write {
        path: target.clone(),
        source,
    })?;
    let mut writer = BufWriter::new(file);

    let write_err = |source: io::Error| Error::Write {
        path: target.clone(),
        source,
    };

    writer.write_all(&record.start).map_err(write_err)?;
    let copied = copy_exact(reader, &mut writer, stored, write_err)?;
    writer.flush().map_err(write_err)?;

    if copied < stored {
        return Err(Error::TruncatedRead {
            path: path.to_string(),
            offset: record.offset,
            expected: stored,
            available: copied,
        });
    }

    Ok(record.start.len() as u64 + copied)
}

/// Copy up to `len` bytes, keeping read and write failures apart.
fn copy_exact<R, W, F>(reader: &mut R, writer: &mut W, len: u64, write_err: F) -> Result<u64>
where
    R: Read,
    W: Write,
    F: Fn(io::Error) -> Error,
{
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE.min(usize::try_from(len).unwrap_or(usize::MAX))];
    let mut copied = 0u64;

    while copied < len {
        let want = (len - copied).min(buffer.len() as u64) as usize;
        let read = match reader.read(&mut buffer[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        };

        writer.write_all(&buffer[..read]).map_err(&write_err)?;
        copied += read as u64;
    }

    Ok(copied)
}
