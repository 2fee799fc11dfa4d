//! Archive header line parsing.

use crate::{Error, Result, Version};

/// Fields decoded from the first line of an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveHeader {
    /// Scheme the line was parsed as.
    pub version: Version,
    /// Byte offset where the compressed index begins.
    pub index_offset: u64,
    /// XOR key for index records (version 3 only).
    pub key: Option<u64>,
}

impl ArchiveHeader {
    /// Width of the fixed `RPA-x.y ` marker.
    pub const MARKER_LEN: usize = 8;

    /// Parse a header line (without its trailing newline) as `version`.
    ///
    /// The marker itself is not checked, so a forced version is always
    /// attempted against whatever the line holds.
    pub fn parse(line: &[u8], version: Version) -> Result<Self> {
        match version {
            Version::V1 => Err(Error::UnsupportedVersion(Version::V1)),
            Version::V2 => {
                let rest = line.get(Self::MARKER_LEN..).ok_or_else(|| {
                    Error::format(format!("header line too short: {} bytes", line.len()))
                })?;
                let rest = std::str::from_utf8(rest)
                    .map_err(|e| Error::format(format!("header is not text: {e}")))?;
                let offset = rest
                    .split_ascii_whitespace()
                    .next()
                    .ok_or_else(|| Error::format("header is missing the index offset"))?;

                Ok(Self {
                    version,
                    index_offset: parse_hex(offset, "index offset")?,
                    key: None,
                })
            }
            Version::V3 => {
                let text = std::str::from_utf8(line)
                    .map_err(|e| Error::format(format!("header is not text: {e}")))?;
                let mut fields = text.split_ascii_whitespace().skip(1);

                let offset = fields
                    .next()
                    .ok_or_else(|| Error::format("header is missing the index offset"))?;
                let key = fields
                    .next()
                    .ok_or_else(|| Error::format("header is missing the obfuscation key"))?;

                Ok(Self {
                    version,
                    index_offset: parse_hex(offset, "index offset")?,
                    key: Some(parse_hex(key, "obfuscation key")?),
                })
            }
        }
    }
}

fn parse_hex(field: &str, what: &str) -> Result<u64> {
    u64::from_str_radix(field, 16)
        .map_err(|e| Error::format(format!("invalid {what} {field:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_v3() {
        let header = ArchiveHeader::parse(b"RPA-3.0 0000000000ab 000000ff", Version::V3).unwrap();
        assert_eq!(header.index_offset, 0xab);
        assert_eq!(header.key, Some(0xff));
    }

    #[test]
    fn test_parse_v2() {
        let header = ArchiveHeader::parse(b"RPA-2.0 00000000c0de", Version::V2).unwrap();
        assert_eq!(header.index_offset, 0xc0de);
        assert_eq!(header.key, None);
    }

    #[test]
    fn test_forced_v3_on_v2_header_fails() {
        let result = ArchiveHeader::parse(b"RPA-2.0 00000000c0de", Version::V3);
        assert!(matches!(result, Err(Error::Format(_))));
    }

    #[test]
    fn test_forced_v2_ignores_marker() {
        let header = ArchiveHeader::parse(b"XXXXXXXX000010", Version::V2).unwrap();
        assert_eq!(header.index_offset, 0x10);
    }

    #[test]
    fn test_invalid_hex() {
        assert!(matches!(
            ArchiveHeader::parse(b"RPA-2.0 zz", Version::V2),
            Err(Error::Format(_))
        ));
        assert!(matches!(
            ArchiveHeader::parse(b"RPA-2", Version::V2),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_v1_unsupported() {
        assert!(matches!(
            ArchiveHeader::parse(b"", Version::V1),
            Err(Error::UnsupportedVersion(Version::V1))
        ));
    }
}
