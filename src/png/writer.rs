use super::{IHDR_DATA_LEN, IHDR_END, MAX_CHUNK_LEN, PNG_SIGNATURE, PngError, TEXT_CHUNK_TYPE, crc32};

// PNG keywords are 1-79 bytes.
const MAX_KEYWORD_LEN: usize = 79;

/// Insert a `tEXt` chunk carrying `keyword` / `value` right after the `IHDR` chunk.
///
/// Returns a new buffer laid out as:
///
/// ```text
/// original[0..33]  signature + IHDR (length, type, 13 data bytes, CRC)
/// length           4 bytes BE, = keyword.len() + 1 + value.len()
/// "tEXt"           4 bytes
/// data             keyword, 0x00, value (UTF-8 bytes)
/// crc              4 bytes BE, CRC-32 over "tEXt" + data
/// original[33..]   every remaining chunk, untouched, IEND included
/// ```
///
/// The insertion point is fixed at [`IHDR_END`]; the chunk chain is not walked.
/// Existing `tEXt` chunks are left alone, so calling this twice with the same
/// keyword leaves two chunks with that keyword in the file.
///
/// # Errors
///
/// - [`PngError::MalformedInput`] if the buffer is shorter than 33 bytes, lacks
///   the PNG signature, or its first chunk is not a 13-byte `IHDR`.
/// - [`PngError::InvalidKeyword`] if the keyword is empty, longer than 79 bytes,
///   contains a NUL or non-printable byte, or has leading, trailing or
///   consecutive spaces.
///
/// Both are checked before any output is allocated.
///
/// # Example
///
/// ```rust
/// use flux_forge::png::{inject_text_chunk, read_text_chunks};
///
/// # fn example(png: &[u8]) -> Result<(), flux_forge::png::PngError> {
/// let tagged = inject_text_chunk(png, "parameters", "a red square\nSeed: 42")?;
/// let chunks = read_text_chunks(&tagged)?;
/// assert_eq!(chunks[0].keyword, "parameters");
/// # Ok(())
/// # }
/// ```
pub fn inject_text_chunk(original: &[u8], keyword: &str, value: &str) -> Result<Vec<u8>, PngError> {
    check_header(original)?;
    check_keyword(keyword)?;

    let data_len = keyword.len() + 1 + value.len();
    if data_len > MAX_CHUNK_LEN {
        return Err(PngError::MalformedInput(format!(
            "tEXt data of {data_len} bytes exceeds the PNG chunk limit"
        )));
    }

    let mut data = Vec::with_capacity(data_len);
    data.extend_from_slice(keyword.as_bytes());
    data.push(0);
    data.extend_from_slice(value.as_bytes());

    let crc = crc32(TEXT_CHUNK_TYPE, &data);

    let mut out = Vec::with_capacity(original.len() + 12 + data_len);
    out.extend_from_slice(&original[..IHDR_END]);
    out.extend_from_slice(&(data_len as u32).to_be_bytes());
    out.extend_from_slice(TEXT_CHUNK_TYPE);
    out.extend_from_slice(&data);
    out.extend_from_slice(&crc.to_be_bytes());
    out.extend_from_slice(&original[IHDR_END..]);

    log::debug!(
        "Injected tEXt '{keyword}' ({data_len} bytes) into {}-byte PNG",
        original.len()
    );

    Ok(out)
}

/// Like [`inject_text_chunk`], but returns the original bytes unchanged on failure.
///
/// Embedding metadata is never worth losing the image over.
pub fn embed_or_original(original: &[u8], keyword: &str, value: &str) -> Vec<u8> {
    match inject_text_chunk(original, keyword, value) {
        Ok(out) => out,
        Err(e) => {
            log::warn!("Metadata not embedded, keeping original image: {e}");
            original.to_vec()
        }
    }
}

/// Validate the fixed-offset layout the writer depends on.
fn check_header(bytes: &[u8]) -> Result<(), PngError> {
    if bytes.len() < IHDR_END {
        return Err(PngError::MalformedInput(format!(
            "{} bytes is too short for a PNG header (need at least {IHDR_END})",
            bytes.len()
        )));
    }
    if bytes[..PNG_SIGNATURE.len()] != PNG_SIGNATURE {
        return Err(PngError::MalformedInput("missing PNG signature".to_string()));
    }

    let len = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let kind = &bytes[12..16];
    if kind != b"IHDR" {
        return Err(PngError::MalformedInput(format!(
            "first chunk is {} instead of IHDR",
            super::display_kind(kind)
        )));
    }
    if len != IHDR_DATA_LEN {
        return Err(PngError::MalformedInput(format!(
            "IHDR data is {len} bytes instead of {IHDR_DATA_LEN}"
        )));
    }

    Ok(())
}

/// PNG keyword rules, restricted to printable ASCII since keywords are written as-is.
fn check_keyword(keyword: &str) -> Result<(), PngError> {
    let invalid = |reason: &str| -> Result<(), PngError> {
        Err(PngError::InvalidKeyword(format!("{keyword:?} {reason}")))
    };

    if keyword.is_empty() {
        return invalid("is empty");
    }
    if keyword.len() > MAX_KEYWORD_LEN {
        return invalid("is longer than 79 bytes");
    }
    if keyword.bytes().any(|b| b == 0) {
        return invalid("contains a NUL byte");
    }
    if !keyword.bytes().all(|b| (0x20..=0x7E).contains(&b)) {
        return invalid("contains non-printable characters");
    }
    if keyword.starts_with(' ') || keyword.ends_with(' ') {
        return invalid("has leading or trailing spaces");
    }
    if keyword.contains("  ") {
        return invalid("has consecutive spaces");
    }

    Ok(())
}
