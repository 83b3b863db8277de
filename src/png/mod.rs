//! PNG `tEXt` metadata reading and writing.
//!
//! This module provides the byte-level pieces used by the rest of the crate:
//!
//! - [`inject_text_chunk`]: Splice a `tEXt` chunk in right after `IHDR`
//! - [`embed_or_original`]: Same, but falls back to the untouched image on error
//! - [`read_text_chunks`]: Walk the chunk chain and decode every `tEXt` chunk
//!
//! The writer never walks the chunk chain. It relies on the PNG rule that the
//! first chunk is always a 13-byte `IHDR`, so the insertion point sits at a
//! fixed offset ([`IHDR_END`]). That layout is checked up front and rejected
//! with [`PngError::MalformedInput`] instead of producing a corrupt file.

mod reader;
mod writer;

pub use reader::{TextChunk, read_text_chunks};
pub use writer::{embed_or_original, inject_text_chunk};

/// The 8-byte signature every PNG file starts with.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Offset of the first byte after the `IHDR` chunk's CRC.
///
/// signature (8) + length (4) + type (4) + IHDR data (13) + CRC (4) = 33
pub const IHDR_END: usize = 33;

/// Data length of the `IHDR` chunk, fixed by the PNG specification.
pub const IHDR_DATA_LEN: u32 = 13;

/// Chunk type for uncompressed Latin-1 text.
pub const TEXT_CHUNK_TYPE: &[u8; 4] = b"tEXt";

/// Keyword used for generation parameters (the same one Stable Diffusion UIs read).
pub const PARAMETERS_KEYWORD: &str = "parameters";

// PNG chunk lengths are limited to 2^31 - 1.
pub(crate) const MAX_CHUNK_LEN: usize = 0x7FFF_FFFF;

/// Errors from PNG metadata handling.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PngError {
    /// The input is not a PNG whose first chunk is a 13-byte `IHDR`.
    #[error("malformed PNG input: {0}")]
    MalformedInput(String),

    /// The `tEXt` keyword breaks the PNG keyword rules.
    #[error("invalid tEXt keyword: {0}")]
    InvalidKeyword(String),

    /// A chunk runs past the end of the buffer.
    #[error("unexpected end of PNG data at offset {0}")]
    Truncated(usize),

    /// A chunk's stored CRC does not match its contents.
    #[error("chunk {kind} failed CRC validation")]
    BadCrc { kind: String },
}

/// Check whether a byte buffer starts with the PNG signature.
pub fn is_png(bytes: &[u8]) -> bool {
    bytes.len() >= PNG_SIGNATURE.len() && bytes[..PNG_SIGNATURE.len()] == PNG_SIGNATURE
}

/// CRC-32 (IEEE / zlib polynomial) over a chunk's type and data bytes.
pub fn crc32(kind: &[u8; 4], data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(kind);
    hasher.update(data);
    hasher.finalize()
}

/// Render a chunk type for messages, replacing non-printable bytes.
fn display_kind(kind: &[u8]) -> String {
    kind.iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
        .collect()
}
