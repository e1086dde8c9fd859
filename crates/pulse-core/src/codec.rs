//! gzip body codec.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use thiserror::Error;

/// `Content-Encoding` / `Accept-Encoding` token for this codec.
pub const GZIP: &str = "gzip";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("gzip compression failed: {0}")]
    Compress(std::io::Error),

    #[error("gzip decompression failed: {0}")]
    Decompress(std::io::Error),

    #[error("decompressed body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// gzip-compress `data`.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), Compression::default());
    encoder.write_all(data).map_err(CodecError::Compress)?;
    encoder.finish().map_err(CodecError::Compress)
}

/// Decompress a gzip stream, refusing to inflate beyond `limit` bytes.
pub fn decompress(data: &[u8], limit: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    let read = GzDecoder::new(data)
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(CodecError::Decompress)?;
    if read > limit {
        return Err(CodecError::TooLarge { limit });
    }
    Ok(out)
}

/// Whether an `Accept-Encoding` header value admits gzip.
pub fn accepts_gzip(accept_encoding: &str) -> bool {
    accept_encoding.split(',').any(|token| {
        let mut parts = token.split(';');
        let name = parts.next().unwrap_or("").trim();
        let refused = parts.any(|p| {
            p.trim()
                .strip_prefix("q=")
                .and_then(|q| q.trim().parse::<f32>().ok())
                .is_some_and(|q| q == 0.0)
        });
        (name.eq_ignore_ascii_case(GZIP) || name == "*") && !refused
    })
}
