//! Decompression utilities for RPA archives.

use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::{Error, Result};

/// Inflate a zlib stream read from `reader` until the stream ends.
///
/// The index tail of an archive is a single zlib stream; any bytes after the
/// end of the stream are ignored.
pub fn inflate<R: Read>(reader: R) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(reader);
    let mut output = Vec::new();

    decoder
        .read_to_end(&mut output)
        .map_err(|e| Error::format(format!("index does not decompress: {e}")))?;

    Ok(output)
}
