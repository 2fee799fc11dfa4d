//! Builders for synthetic archives.

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::ZlibEncoder;
use flate2::Compression;

/// One index record as written to the pickle.
pub struct RawRecord {
    pub offset: u64,
    pub length: u64,
    pub start: Option<Vec<u8>>,
}

/// Serialize `{path: [(offset, length[, start]), ...]}` at protocol 2.
pub fn pickle_index(entries: &[(String, Vec<RawRecord>)]) -> Vec<u8> {
    let mut out = vec![0x80, 0x02, b'}', b'('];

    for (path, records) in entries {
        out.push(b'X');
        out.extend_from_slice(&(path.len() as u32).to_le_bytes());
        out.extend_from_slice(path.as_bytes());

        out.push(b']');
        out.push(b'(');
        for record in records {
            push_int(&mut out, record.offset);
            push_int(&mut out, record.length);
            match &record.start {
                Some(start) => {
                    out.push(b'T');
                    out.extend_from_slice(&(start.len() as u32).to_le_bytes());
                    out.extend_from_slice(start);
                    out.push(0x87);
                }
                None => out.push(0x86),
            }
        }
        out.push(b'e');
    }

    out.push(b'u');
    out.push(b'.');
    out
}

fn push_int(out: &mut Vec<u8>, value: u64) {
    if value < 0x100 {
        out.push(b'K');
        out.push(value as u8);
    } else if value < 0x8000_0000 {
        out.push(b'J');
        out.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        let mut bytes = value.to_le_bytes().to_vec();
        while bytes.len() > 1 && bytes[bytes.len() - 1] == 0 {
            bytes.pop();
        }
        if bytes[bytes.len() - 1] & 0x80 != 0 {
            bytes.push(0);
        }
        out.push(0x8a);
        out.push(bytes.len() as u8);
        out.extend_from_slice(&bytes);
    }
}

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

enum Item {
    File { start: Vec<u8>, data: Vec<u8> },
    Raw { offset: u64, length: u64 },
}

/// Lays out files after a header line and appends the compressed index.
pub struct ArchiveBuilder {
    version: u8,
    key: u64,
    items: Vec<(String, Item)>,
}

impl ArchiveBuilder {
    pub fn v2() -> Self {
        Self {
            version: 2,
            key: 0,
            items: Vec::new(),
        }
    }

    pub fn v3(key: u64) -> Self {
        Self {
            version: 3,
            key,
            items: Vec::new(),
        }
    }

    pub fn file(mut self, path: &str, data: &[u8]) -> Self {
        self.items.push((
            path.to_string(),
            Item::File {
                start: Vec::new(),
                data: data.to_vec(),
            },
        ));
        self
    }

    pub fn file_with_start(mut self, path: &str, start: &[u8], data: &[u8]) -> Self {
        self.items.push((
            path.to_string(),
            Item::File {
                start: start.to_vec(),
                data: data.to_vec(),
            },
        ));
        self
    }

    /// A record pointing wherever the caller says, with no data behind it.
    pub fn raw_record(mut self, path: &str, offset: u64, length: u64) -> Self {
        self.items
            .push((path.to_string(), Item::Raw { offset, length }));
        self
    }

    fn header(&self, index_offset: u64) -> Vec<u8> {
        match self.version {
            2 => format!("RPA-2.0 {index_offset:016x}\n").into_bytes(),
            _ => format!("RPA-3.0 {index_offset:016x} {:08x}\n", self.key).into_bytes(),
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let header_len = self.header(0).len() as u64;
        let mut blob = Vec::new();
        let mut entries = Vec::new();

        for (path, item) in &self.items {
            let record = match item {
                Item::File { start, data } => {
                    let offset = header_len + blob.len() as u64;
                    blob.extend_from_slice(data);
                    RawRecord {
                        offset: offset ^ self.key,
                        length: (start.len() + data.len()) as u64 ^ self.key,
                        start: (!start.is_empty()).then(|| start.clone()),
                    }
                }
                Item::Raw { offset, length } => RawRecord {
                    offset: offset ^ self.key,
                    length: length ^ self.key,
                    start: None,
                },
            };
            entries.push((path.clone(), vec![record]));
        }

        let index_offset = header_len + blob.len() as u64;
        let mut archive = self.header(index_offset);
        archive.extend_from_slice(&blob);
        archive.extend_from_slice(&zlib(&pickle_index(&entries)));
        archive
    }

    pub fn write_to(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).unwrap();
        path
    }
}

/// Host-native form of a forward-slash path.
pub fn native(path: &str) -> String {
    path.replace('/', std::path::MAIN_SEPARATOR_STR)
}
