//! Archive index: logical paths mapped to byte-range records.

use std::collections::BTreeMap;
use std::path::MAIN_SEPARATOR_STR;

use tracing::trace;

use crate::pickle::{self, Value};
use crate::{Error, Result};

/// Location of one logical file inside the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    /// Byte offset of the stored data.
    pub offset: u64,
    /// Total length of the logical file, including `start`.
    pub length: u64,
    /// Literal prefix kept in the index instead of the blob.
    pub start: Vec<u8>,
}

impl IndexRecord {
    /// Create a record.
    pub fn new(offset: u64, length: u64, start: Vec<u8>) -> Self {
        Self {
            offset,
            length,
            start,
        }
    }

    /// Number of bytes stored in the blob, or `None` if `start` is longer
    /// than the whole record.
    #[inline]
    pub fn stored_len(&self) -> Option<u64> {
        self.length.checked_sub(self.start.len() as u64)
    }

    /// XOR offset and length with `key`, leaving `start` untouched.
    #[inline]
    fn xor(&mut self, key: u64) {
        self.offset ^= key;
        self.length ^= key;
    }
}

/// Mapping from normalized logical path to its records.
///
/// Paths use the host's native separator and are kept sorted; every path has
/// at least one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    entries: BTreeMap<String, Vec<IndexRecord>>,
}

impl Index {
    /// Decode an index from a serialized object graph.
    pub fn from_pickle(data: &[u8]) -> Result<Self> {
        Self::from_value(pickle::loads(data)?)
    }

    /// Build an index from a decoded value, enforcing the record schema.
    ///
    /// The value must be a dict of path to a non-empty list of 2- or 3-item
    /// tuples `(offset, length[, start])`. Later duplicate paths replace
    /// earlier ones.
    pub fn from_value(value: Value) -> Result<Self> {
        let pairs = match value {
            Value::Dict(pairs) => pairs,
            other => {
                return Err(Error::format(format!(
                    "index must be a dict, found {}",
                    other.kind()
                )))
            }
        };

        let mut entries = BTreeMap::new();
        for (key, records) in pairs {
            let path = decode_path(key)?;
            let records = decode_records(&path, records)?;
            trace!(path = %path, records = records.len(), "index entry");
            entries.insert(normalize_path(&path), records);
        }

        Ok(Self { entries })
    }

    /// Number of logical files.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index has no files.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up the records of a normalized path.
    pub fn get(&self, path: &str) -> Option<&[IndexRecord]> {
        self.entries.get(path).map(Vec::as_slice)
    }

    /// Iterate over `(path, records)` in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[IndexRecord])> + '_ {
        self.entries
            .iter()
            .map(|(path, records)| (path.as_str(), records.as_slice()))
    }

    /// All paths, sorted lexicographically.
    pub fn paths(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// XOR every record's offset and length with `key`.
    ///
    /// Applying the same key twice restores the original index.
    #[must_use]
    pub fn deobfuscate(mut self, key: u64) -> Self {
        for record in self.entries.values_mut().flatten() {
            record.xor(key);
        }
        self
    }
}

impl FromIterator<(String, Vec<IndexRecord>)> for Index {
    /// Collect already-decoded entries, normalizing their paths.
    ///
    /// Entries without records are dropped.
    fn from_iter<I: IntoIterator<Item = (String, Vec<IndexRecord>)>>(iter: I) -> Self {
        let entries = iter
            .into_iter()
            .filter(|(_, records)| !records.is_empty())
            .map(|(path, records)| (normalize_path(&path), records))
            .collect();
        Self { entries }
    }
}

/// Apply the XOR key of a version 3 archive to every record.
pub fn deobfuscate(index: Index, key: u64) -> Index {
    index.deobfuscate(key)
}

/// Sorted list of every path in the index.
pub fn list_paths(index: &Index) -> Vec<&str> {
    index.paths()
}

/// Rewrite archive separators (`/`) to the host separator.
pub fn normalize_path(path: &str) -> String {
    path.replace('/', MAIN_SEPARATOR_STR)
}

fn decode_path(key: Value) -> Result<String> {
    match key {
        Value::Text(text) => Ok(text),
        Value::Bytes(bytes) => String::from_utf8(bytes)
            .map_err(|e| Error::format(format!("index path is not valid UTF-8: {e}"))),
        other => Err(Error::format(format!(
            "index path must be a string, found {}",
            other.kind()
        ))),
    }
}

fn decode_records(path: &str, value: Value) -> Result<Vec<IndexRecord>> {
    let items = match value {
        Value::List(items) | Value::Tuple(items) => items,
        other => {
            return Err(Error::format(format!(
                "records for {path} must be a list, found {}",
                other.kind()
            )))
        }
    };

    if items.is_empty() {
        return Err(Error::format(format!("no records for {path}")));
    }

    items
        .into_iter()
        .map(|item| decode_record(path, item))
        .collect()
}

fn decode_record(path: &str, value: Value) -> Result<IndexRecord> {
    let fields = match value {
        Value::Tuple(fields) | Value::List(fields) => fields,
        other => {
            return Err(Error::format(format!(
                "record for {path} must be a tuple, found {}",
                other.kind()
            )))
        }
    };

    let mut fields = fields.into_iter();
    let (offset, length, start) = match (fields.next(), fields.next(), fields.next(), fields.next()) {
        (Some(offset), Some(length), start, None) => (offset, length, start),
        _ => {
            return Err(Error::format(format!(
                "record for {path} must have 2 or 3 fields"
            )))
        }
    };

    let start = match start {
        None => Vec::new(),
        Some(Value::Bytes(bytes)) => bytes,
        Some(Value::Text(text)) => pickle::encode_latin1(&text)?,
        Some(other) => {
            return Err(Error::format(format!(
                "start of {path} must be bytes, found {}",
                other.kind()
            )))
        }
    };

    Ok(IndexRecord {
        offset: decode_u64(path, "offset", offset)?,
        length: decode_u64(path, "length", length)?,
        start,
    })
}

fn decode_u64(path: &str, field: &str, value: Value) -> Result<u64> {
    match value {
        Value::Int(n) => u64::try_from(n)
            .map_err(|_| Error::format(format!("{field} {n} of {path} is out of range"))),
        other => Err(Error::format(format!(
            "{field} of {path} must be an integer, found {}",
            other.kind()
        ))),
    }
}
