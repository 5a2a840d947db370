//! Chunked MSZIP decoder for `versionData.mszyml`
//!
//! The stream is a 26-byte header followed by chunks, each a 4-byte magic
//! (`00 00 43 4B`) and a raw DEFLATE segment. There is no chunk size
//! framing: a chunk ends where its DEFLATE stream ends, and the whole
//! decode ends on a decoder error or end of input. A truncated tail can
//! leave garbage half-lines in the output, so lines containing bytes
//! outside the plain-text range are dropped afterwards.

use crate::error::{Result, ToolkitError};
use flate2::{Decompress, FlushDecompress, Status};
use tracing::{debug, trace};

/// Chunk magic, also required at offset 26
const MSZIP_MAGIC: [u8; 4] = [0x00, 0x00, 0x43, 0x4B];

/// Offset of the first chunk magic
const MSZIP_HEADER_LEN: usize = 26;

/// Decompression buffer growth step
const CHUNK_BUF_STEP: usize = 0x8000;

/// Decode a complete `.mszyml` blob into filtered UTF-8 text
pub fn decode_mszyml(data: &[u8]) -> Result<String> {
    let raw = decode_chunks(data)?;
    let text = String::from_utf8_lossy(&raw);
    Ok(filter_text_lines(&text))
}

/// Inflate the chunk sequence, concatenating outputs
fn decode_chunks(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < MSZIP_HEADER_LEN + MSZIP_MAGIC.len()
        || data[MSZIP_HEADER_LEN..MSZIP_HEADER_LEN + MSZIP_MAGIC.len()] != MSZIP_MAGIC
    {
        return Err(ToolkitError::Decode(
            "missing MSZIP magic at offset 26".to_string(),
        ));
    }

    let mut output = Vec::new();
    let mut pos = MSZIP_HEADER_LEN;
    while pos + MSZIP_MAGIC.len() <= data.len()
        && data[pos..pos + MSZIP_MAGIC.len()] == MSZIP_MAGIC
    {
        let chunk_start = pos + MSZIP_MAGIC.len();
        match inflate_one(&data[chunk_start..]) {
            Ok((chunk, consumed)) => {
                trace!(consumed, decoded = chunk.len(), "decoded MSZIP chunk");
                output.extend_from_slice(&chunk);
                pos = chunk_start + consumed;
            }
            Err(partial) => {
                // Truncated or corrupt tail: keep what inflated and stop.
                debug!("MSZIP tail did not decode cleanly, keeping partial output");
                output.extend_from_slice(&partial);
                break;
            }
        }
    }
    Ok(output)
}

/// Inflate one raw DEFLATE stream
///
/// `Ok` carries the decoded bytes plus how much input the stream consumed;
/// `Err` carries whatever partial output existed before the failure.
fn inflate_one(input: &[u8]) -> std::result::Result<(Vec<u8>, usize), Vec<u8>> {
    let mut decompress = Decompress::new(false);
    let mut chunk = Vec::with_capacity(CHUNK_BUF_STEP);
    loop {
        let offset = decompress.total_in() as usize;
        if chunk.capacity() == chunk.len() {
            chunk.reserve(CHUNK_BUF_STEP);
        }
        match decompress.decompress_vec(&input[offset..], &mut chunk, FlushDecompress::Finish) {
            Ok(Status::StreamEnd) => return Ok((chunk, decompress.total_in() as usize)),
            Ok(Status::Ok | Status::BufError) => {
                if offset >= input.len() && decompress.total_in() as usize == offset {
                    // End of input without a stream end: truncated tail.
                    return Err(chunk);
                }
            }
            Err(_) => return Err(chunk),
        }
    }
}

/// Drop lines containing bytes outside the plain-text range
///
/// Allowed: TAB, LF, CR, printable ASCII, and U+00A0..=U+FFFF.
fn filter_text_lines(text: &str) -> String {
    let kept: Vec<&str> = text
        .split('\n')
        .filter(|line| line.chars().all(is_allowed_char))
        .collect();
    kept.join("\n")
}

fn is_allowed_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r' | ' '..='~' | '\u{00A0}'..='\u{FFFF}')
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    /// Assemble a valid fixture: 26 filler bytes, then magic+deflate chunks
    fn build_fixture(chunks: &[&str]) -> Vec<u8> {
        let mut data = vec![0u8; MSZIP_HEADER_LEN];
        for chunk in chunks {
            data.extend_from_slice(&MSZIP_MAGIC);
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(chunk.as_bytes()).unwrap();
            data.extend_from_slice(&encoder.finish().unwrap());
        }
        data
    }

    #[test]
    fn test_single_chunk_round_trip() {
        let fixture = build_fixture(&["sV: 2\nvD:\n- v: 1.0.0\n  rP: manifests/m.yaml\n"]);
        let decoded = decode_mszyml(&fixture).unwrap();
        assert!(decoded.contains("rP: manifests/m.yaml"));
    }

    #[test]
    fn test_multi_chunk_concatenation() {
        let fixture = build_fixture(&["first half\n", "second half\n"]);
        let decoded = decode_mszyml(&fixture).unwrap();
        assert_eq!(decoded, "first half\nsecond half\n");
    }

    #[test]
    fn test_missing_magic_is_decode_error() {
        let data = vec![0u8; 64];
        let err = decode_mszyml(&data).unwrap_err();
        assert!(matches!(err, ToolkitError::Decode(_)));
    }

    #[test]
    fn test_short_input_is_decode_error() {
        assert!(decode_mszyml(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_truncated_tail_keeps_clean_lines() {
        let mut fixture = build_fixture(&["complete line\n"]);
        // Append a second chunk cut off mid-stream.
        let mut tail = Vec::new();
        tail.extend_from_slice(&MSZIP_MAGIC);
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"this chunk will be cut\n").unwrap();
        let encoded = encoder.finish().unwrap();
        tail.extend_from_slice(&encoded[..encoded.len() / 2]);
        fixture.extend_from_slice(&tail);

        let decoded = decode_mszyml(&fixture).unwrap();
        assert!(decoded.contains("complete line"));
    }

    #[test]
    fn test_line_filter_drops_binary_artifacts() {
        let filtered = filter_text_lines("good line\nbad\u{0001}line\nanother good\n");
        assert_eq!(filtered, "good line\nanother good\n");
    }

    #[test]
    fn test_yaml_parses_after_decode() {
        let fixture = build_fixture(&[
            "sV: 2\nvD:\n- v: 1.85.0\n  rP: packages/M/V/1.85.0.yaml\n- v: 1.84.2\n  rP: packages/M/V/1.84.2.yaml\n",
        ]);
        let decoded = decode_mszyml(&fixture).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&decoded).unwrap();
        let entries = parsed.get("vD").unwrap().as_sequence().unwrap();
        assert_eq!(entries.len(), 2);
        for entry in entries {
            assert!(entry.get("v").unwrap().as_str().is_some());
            assert!(entry.get("rP").unwrap().as_str().is_some());
        }
    }
}
