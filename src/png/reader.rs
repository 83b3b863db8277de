use serde::Serialize;

use super::{MAX_CHUNK_LEN, PNG_SIGNATURE, PngError, TEXT_CHUNK_TYPE, crc32, display_kind};

/// A decoded `tEXt` chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    pub keyword: String,
    pub value: String,
}

/// Read every `tEXt` chunk from a PNG buffer, in file order.
///
/// Unlike the writer this walks the whole chunk chain, verifying each chunk's
/// CRC, and stops at `IEND`. Keywords are decoded as Latin-1. Values are decoded
/// as UTF-8 when valid (which is what [`inject_text_chunk`](super::inject_text_chunk)
/// writes), and as Latin-1 otherwise.
pub fn read_text_chunks(png: &[u8]) -> Result<Vec<TextChunk>, PngError> {
    if png.len() < PNG_SIGNATURE.len() || png[..PNG_SIGNATURE.len()] != PNG_SIGNATURE {
        return Err(PngError::MalformedInput("missing PNG signature".to_string()));
    }

    let mut chunks = Vec::new();
    let mut offset = PNG_SIGNATURE.len();

    while offset < png.len() {
        if offset + 8 > png.len() {
            return Err(PngError::Truncated(offset));
        }
        let len = u32::from_be_bytes([png[offset], png[offset + 1], png[offset + 2], png[offset + 3]])
            as usize;
        if len > MAX_CHUNK_LEN {
            return Err(PngError::MalformedInput(format!(
                "chunk at offset {offset} declares {len} bytes"
            )));
        }
        let kind: [u8; 4] = [png[offset + 4], png[offset + 5], png[offset + 6], png[offset + 7]];

        let data_start = offset + 8;
        let data_end = data_start + len;
        if data_end + 4 > png.len() {
            return Err(PngError::Truncated(offset));
        }
        let data = &png[data_start..data_end];
        let stored = u32::from_be_bytes([
            png[data_end],
            png[data_end + 1],
            png[data_end + 2],
            png[data_end + 3],
        ]);
        if crc32(&kind, data) != stored {
            return Err(PngError::BadCrc { kind: display_kind(&kind) });
        }

        if &kind == TEXT_CHUNK_TYPE {
            chunks.push(decode_text(data)?);
        }

        offset = data_end + 4;
        if &kind == b"IEND" {
            break;
        }
    }

    Ok(chunks)
}

fn decode_text(data: &[u8]) -> Result<TextChunk, PngError> {
    let sep = data
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| PngError::MalformedInput("tEXt chunk without keyword separator".to_string()))?;

    let keyword = latin1(&data[..sep]);
    let value_bytes = &data[sep + 1..];
    let value = match std::str::from_utf8(value_bytes) {
        Ok(s) => s.to_string(),
        Err(_) => latin1(value_bytes),
    };

    Ok(TextChunk { keyword, value })
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::png::test_support::{chunk, solid_png};

    fn png_with(chunks: &[Vec<u8>]) -> Vec<u8> {
        let mut out = PNG_SIGNATURE.to_vec();
        out.extend_from_slice(&chunk(b"IHDR", &[0, 0, 0, 1, 0, 0, 0, 1, 8, 2, 0, 0, 0]));
        for c in chunks {
            out.extend_from_slice(c);
        }
        out.extend_from_slice(&chunk(b"IEND", &[]));
        out
    }

    #[test]
    fn no_text_chunks() {
        let png = solid_png(2, 2, [0, 0, 0]);
        assert!(read_text_chunks(&png).unwrap().is_empty());
    }

    #[test]
    fn reads_in_file_order() {
        let png = png_with(&[
            chunk(b"tEXt", b"Title\0Sunset"),
            chunk(b"IDAT", &[1, 2, 3]),
            chunk(b"tEXt", b"Author\0Someone"),
        ]);
        let chunks = read_text_chunks(&png).unwrap();
        assert_eq!(
            chunks,
            vec![
                TextChunk { keyword: "Title".into(), value: "Sunset".into() },
                TextChunk { keyword: "Author".into(), value: "Someone".into() },
            ]
        );
    }

    #[test]
    fn latin1_value_fallback() {
        // 0xE9 alone is invalid UTF-8 but is 'é' in Latin-1
        let png = png_with(&[chunk(b"tEXt", b"Comment\0caf\xE9")]);
        assert_eq!(read_text_chunks(&png).unwrap()[0].value, "café");
    }

    #[test]
    fn value_may_contain_nul_after_separator() {
        let png = png_with(&[chunk(b"tEXt", b"k\0a\0b")]);
        let chunks = read_text_chunks(&png).unwrap();
        assert_eq!(chunks[0].keyword, "k");
        assert_eq!(chunks[0].value, "a\0b");
    }

    #[test]
    fn missing_separator_is_malformed() {
        let png = png_with(&[chunk(b"tEXt", b"no separator")]);
        assert!(matches!(read_text_chunks(&png), Err(PngError::MalformedInput(_))));
    }

    #[test]
    fn bad_crc_detected() {
        let mut png = png_with(&[chunk(b"tEXt", b"k\0v")]);
        // Flip a byte inside the tEXt data
        let pos = 33 + 8 + 2;
        png[pos] ^= 0xFF;
        assert_eq!(
            read_text_chunks(&png),
            Err(PngError::BadCrc { kind: "tEXt".to_string() })
        );
    }

    #[test]
    fn truncated_chunk_detected() {
        let png = png_with(&[chunk(b"tEXt", b"k\0value")]);
        let cut = &png[..33 + 10];
        assert!(matches!(read_text_chunks(cut), Err(PngError::Truncated(33))));
    }

    #[test]
    fn ignores_trailing_bytes_after_iend() {
        let mut png = png_with(&[chunk(b"tEXt", b"k\0v")]);
        png.extend_from_slice(b"trailing garbage");
        assert_eq!(read_text_chunks(&png).unwrap().len(), 1);
    }

    #[test]
    fn rejects_non_png() {
        assert!(matches!(read_text_chunks(b"GIF89a"), Err(PngError::MalformedInput(_))));
    }
}
