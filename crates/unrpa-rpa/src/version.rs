//! Archive version detection.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Extension of standard archives carrying an inline header.
pub const ARCHIVE_EXTENSION: &str = "rpa";

/// Extension of legacy index-only files.
pub const INDEX_EXTENSION: &str = "rpi";

/// Known RPA archive schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Version {
    /// Legacy scheme with the index stored in a separate `.rpi` file.
    V1 = 1,
    /// Inline header with the index offset.
    V2 = 2,
    /// Inline header with the index offset and an obfuscation key.
    V3 = 3,
}

impl Version {
    /// Header marker for version 2 archives.
    pub const MARKER_V2: &'static [u8] = b"RPA-2.0 ";

    /// Header marker for version 3 archives.
    pub const MARKER_V3: &'static [u8] = b"RPA-3.0 ";
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RPA-{}.0", *self as u8)
    }
}

impl TryFrom<u8> for Version {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            3 => Ok(Self::V3),
            other => Err(other),
        }
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let number: u8 = s
            .trim()
            .parse()
            .map_err(|_| format!("invalid version number: {s:?}"))?;

        Self::try_from(number).map_err(|n| format!("unknown version {n}, expected 1, 2 or 3"))
    }
}

/// Detect the archive version from its path and first header line.
///
/// The extension is compared case-insensitively. Index-only files are
/// version 1 regardless of content; standard archives are identified by the
/// marker their first line starts with. Returns `None` when nothing matches.
pub fn detect(path: &Path, header: &[u8]) -> Option<Version> {
    let extension = path.extension().and_then(|e| e.to_str())?;

    if extension.eq_ignore_ascii_case(INDEX_EXTENSION) {
        return Some(Version::V1);
    }

    if !extension.eq_ignore_ascii_case(ARCHIVE_EXTENSION) {
        return None;
    }

    if header.starts_with(Version::MARKER_V3) {
        Some(Version::V3)
    } else if header.starts_with(Version::MARKER_V2) {
        Some(Version::V2)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_v3() {
        let header = b"RPA-3.0 0000000000ab 000000ff\n";
        assert_eq!(detect(Path::new("a.rpa"), header), Some(Version::V3));
    }

    #[test]
    fn test_detect_v2() {
        let header = b"RPA-2.0 000000001234\n";
        assert_eq!(detect(Path::new("game/images.rpa"), header), Some(Version::V2));
    }

    #[test]
    fn test_detect_extension_case_insensitive() {
        let header = b"RPA-3.0 0000000000ab 000000ff\n";
        assert_eq!(detect(Path::new("A.RPA"), header), Some(Version::V3));
        assert_eq!(detect(Path::new("old.RPI"), b""), Some(Version::V1));
    }

    #[test]
    fn test_detect_index_only_ignores_content() {
        assert_eq!(detect(Path::new("data.rpi"), b"RPA-3.0 00 00\n"), Some(Version::V1));
    }

    #[test]
    fn test_detect_unknown() {
        assert_eq!(detect(Path::new("a.rpa"), b"PK\x03\x04"), None);
        assert_eq!(detect(Path::new("a.rpa"), b"RPA-3.0"), None);
        assert_eq!(detect(Path::new("a.zip"), b"RPA-3.0 00 00\n"), None);
        assert_eq!(detect(Path::new("archive"), b"RPA-2.0 00\n"), None);
    }

    #[test]
    fn test_version_from_str() {
        assert_eq!("3".parse::<Version>(), Ok(Version::V3));
        assert_eq!(" 1 ".parse::<Version>(), Ok(Version::V1));
        assert!("4".parse::<Version>().is_err());
        assert!("three".parse::<Version>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Version::V2.to_string(), "RPA-2.0");
        assert_eq!(Version::V3.to_string(), "RPA-3.0");
    }
}
