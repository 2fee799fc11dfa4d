//! RPA archive reader.
//!
//! An archive is opened once: the header line is read, the version decided
//! (detected or forced), and the whole index decoded before any file is
//! extracted. File data is then streamed out one record at a time through a
//! read-only handle.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::decompress;
use crate::extract::{self, ExtractOptions, ExtractReport, FileOutcome, Progress};
use crate::header::ArchiveHeader;
use crate::version::{self, Version};
use crate::{Error, Index, IndexRecord, Result};

/// Longest header line read while detecting the version.
const MAX_HEADER_LEN: u64 = 256;

/// An opened RPA archive with its decoded index.
pub struct RpaArchive {
    /// Read-only handle to the archive file
    file: File,
    /// Archive file path
    path: PathBuf,
    /// Archive length in bytes
    len: u64,
    /// Scheme the index was read with
    version: Version,
    /// Decoded, deobfuscated index
    index: Index,
}

impl RpaArchive {
    /// Open an archive, detecting its version from the extension and header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, None)
    }

    /// Open an archive, reading it as `version` regardless of its header.
    pub fn open_as<P: AsRef<Path>>(path: P, version: Version) -> Result<Self> {
        Self::open_with(path, Some(version))
    }

    /// Open an archive with an optional forced version.
    ///
    /// A forced version is never second-guessed: if the bytes do not fit its
    /// scheme the result is a [`Error::Format`], not a fallback to detection.
    pub fn open_with<P: AsRef<Path>>(path: P, forced: Option<Version>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();

        let version = match forced {
            Some(version) => {
                debug!(%version, "using forced version");
                version
            }
            None => {
                let line = read_first_line(&mut file)?;
                version::detect(path, &line).ok_or_else(|| Error::UnknownVersion {
                    path: path.to_path_buf(),
                })?
            }
        };

        let index = read_index(&mut file, version)?;
        debug!(
            archive = %path.display(),
            %version,
            files = index.len(),
            "loaded index"
        );

        Ok(Self {
            file,
            path: path.to_path_buf(),
            len,
            version,
            index,
        })
    }

    /// Archive file path.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scheme the index was read with.
    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Archive length in bytes.
    #[inline]
    pub fn archive_len(&self) -> u64 {
        self.len
    }

    /// Number of logical files.
    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the archive holds no files.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The decoded index.
    #[inline]
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Records of a normalized logical path.
    pub fn entry(&self, path: &str) -> Option<&[IndexRecord]> {
        self.index.get(path)
    }

    /// All logical paths, sorted.
    pub fn list_paths(&self) -> Vec<&str> {
        self.index.paths()
    }

    /// Extract every file into `root`.
    pub fn extract_all<P: AsRef<Path>>(
        &self,
        root: P,
        options: &ExtractOptions,
    ) -> Result<ExtractReport> {
        self.extract_all_with_progress(root, options, |_| {})
    }

    /// Extract every file into `root`, calling `on_progress` before each one.
    ///
    /// Files are written in index order. Without `continue_on_error` the first
    /// per-file failure aborts the run and is returned; files already written
    /// stay in place.
    pub fn extract_all_with_progress<P, F>(
        &self,
        root: P,
        options: &ExtractOptions,
        mut on_progress: F,
    ) -> Result<ExtractReport>
    where
        P: AsRef<Path>,
        F: FnMut(Progress<'_>),
    {
        let root = root.as_ref();
        let total = self.index.len();
        let mut reader = BufReader::new(&self.file);
        let mut report = ExtractReport::default();

        for (index, (path, records)) in self.index.iter().enumerate() {
            on_progress(Progress { index, total, path });

            let result = match extract::extract_entry(&mut reader, self.len, path, records, root) {
                Err(e) if !(options.continue_on_error && e.is_per_file()) => return Err(e),
                Err(e) => {
                    warn!(path, error = %e, "failed to extract, continuing");
                    Err(e)
                }
                ok => ok,
            };

            report.outcomes.push(FileOutcome {
                path: path.to_string(),
                result,
            });
        }

        Ok(report)
    }

    /// Extract every file into `root` using a thread pool.
    ///
    /// Each worker reads through its own file handle. Progress events carry
    /// the file's position in index order but may arrive out of order. Without
    /// `continue_on_error` the first failure stops any further files from
    /// starting, and the earliest failure in index order is returned.
    #[cfg(feature = "parallel")]
    pub fn extract_all_parallel<P, F>(
        &self,
        root: P,
        options: &ExtractOptions,
        on_progress: F,
    ) -> Result<ExtractReport>
    where
        P: AsRef<Path>,
        F: Fn(Progress<'_>) + Sync,
    {
        use rayon::prelude::*;
        use std::sync::atomic::{AtomicBool, Ordering};

        let root = root.as_ref();
        let total = self.index.len();
        let entries: Vec<(&str, &[IndexRecord])> = self.index.iter().collect();
        let aborted = AtomicBool::new(false);

        let outcomes: Vec<FileOutcome> = entries
            .par_iter()
            .enumerate()
            .map_init(
                || File::open(&self.path).map(BufReader::new),
                |reader, (index, &(path, records))| {
                    if aborted.load(Ordering::Relaxed) {
                        return None;
                    }
                    on_progress(Progress { index, total, path });

                    let result = match reader {
                        Ok(reader) => extract::extract_entry(reader, self.len, path, records, root),
                        Err(e) => Err(Error::Io(std::io::Error::new(e.kind(), e.to_string()))),
                    };

                    if let Err(e) = &result {
                        if options.continue_on_error && e.is_per_file() {
                            warn!(path, error = %e, "failed to extract, continuing");
                        } else {
                            aborted.store(true, Ordering::Relaxed);
                        }
                    }

                    Some(FileOutcome {
                        path: path.to_string(),
                        result,
                    })
                },
            )
            .flatten()
            .collect();

        let mut report = ExtractReport::default();
        for outcome in outcomes {
            match outcome.result {
                Err(e) if !(options.continue_on_error && e.is_per_file()) => return Err(e),
                result => report.outcomes.push(FileOutcome {
                    path: outcome.path,
                    result,
                }),
            }
        }

        Ok(report)
    }
}

impl std::fmt::Debug for RpaArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpaArchive")
            .field("path", &self.path)
            .field("version", &self.version)
            .field("entries", &self.index.len())
            .finish()
    }
}

/// Read and decode the index of an archive as `version`.
///
/// The reader is rewound to read the header line, then positioned at the
/// index offset it names. Version 3 records are deobfuscated with the header
/// key before being returned.
pub fn read_index<R: Read + Seek>(reader: &mut R, version: Version) -> Result<Index> {
    let line = read_first_line(reader)?;
    let header = ArchiveHeader::parse(&line, version)?;
    debug!(
        %version,
        index_offset = header.index_offset,
        key = ?header.key,
        "parsed header"
    );

    reader.seek(SeekFrom::Start(header.index_offset))?;
    let raw = decompress::inflate(&mut *reader)?;
    debug!(bytes = raw.len(), "inflated index");

    let index = Index::from_pickle(&raw)?;

    Ok(match header.key {
        Some(key) => index.deobfuscate(key),
        None => index,
    })
}

/// Read the first line of the archive, without its newline.
fn read_first_line<R: Read + Seek>(reader: &mut R) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(0))?;

    let mut line = Vec::new();
    BufReader::new(reader.by_ref().take(MAX_HEADER_LEN)).read_until(b'\n', &mut line)?;

    if line.last() == Some(&b'\n') {
        line.pop();
    }
    Ok(line)
}
