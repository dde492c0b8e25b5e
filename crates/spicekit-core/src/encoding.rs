//! Text encoding detection for netlists, schematics and logs
//!
//! LTspice writes UTF-16LE for some files and Windows-1252 for others, while
//! most other tools write UTF-8. Files are decoded once on load and re-encoded
//! with the same encoding on save, so untouched bytes round-trip.

use std::path::Path;

use tracing::debug;

use crate::types::Result;

/// Encoding a text file was read with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Utf8Bom,
    Utf16Le,
    Utf16LeBom,
    /// Any byte sequence that is not valid UTF-8; bytes map 1:1 to U+0000..U+00FF.
    Latin1,
    /// QSPICE schematics. Never detected; chosen by the reader of the format.
    Windows1252,
}

impl TextEncoding {
    pub fn is_utf16(self) -> bool {
        matches!(self, TextEncoding::Utf16Le | TextEncoding::Utf16LeBom)
    }
}

/// Windows-1252 characters for bytes 0x80..=0x9F. Unassigned bytes keep
/// their C1 control code point so they survive a round trip.
const CP1252_HIGH: [char; 32] = [
    '€', '\u{81}', '‚', 'ƒ', '„', '…', '†', '‡', 'ˆ', '‰', 'Š', '‹', 'Œ', '\u{8d}', 'Ž', '\u{8f}',
    '\u{90}', '‘', '’', '“', '”', '•', '\u{2013}', '\u{2014}', '˜', '™', 'š', '›', 'œ', '\u{9d}', 'ž', 'Ÿ',
];

pub(crate) fn decode_windows1252(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| match b {
            0x80..=0x9F => CP1252_HIGH[usize::from(b - 0x80)],
            _ => char::from(b),
        })
        .collect()
}

/// Windows-1252 byte for a character, if it has one.
pub(crate) fn windows1252_byte(c: char) -> Option<u8> {
    match u32::from(c) {
        code @ (0x00..=0x7F | 0xA0..=0xFF) => u8::try_from(code).ok(),
        _ => CP1252_HIGH
            .iter()
            .position(|&h| h == c)
            .and_then(|i| u8::try_from(0x80 + i).ok()),
    }
}

/// Decode bytes, reporting the encoding that was detected.
pub fn decode_text(bytes: &[u8]) -> (String, TextEncoding) {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return (String::from_utf8_lossy(rest).into_owned(), TextEncoding::Utf8Bom);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return (decode_utf16le(rest), TextEncoding::Utf16LeBom);
    }
    if looks_like_utf16le(bytes) {
        return (decode_utf16le(bytes), TextEncoding::Utf16Le);
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_string(), TextEncoding::Utf8),
        Err(_) => (bytes.iter().map(|&b| b as char).collect(), TextEncoding::Latin1),
    }
}

/// Encode text back to bytes with the given encoding.
pub fn encode_text(text: &str, encoding: TextEncoding) -> Vec<u8> {
    match encoding {
        TextEncoding::Utf8 => text.as_bytes().to_vec(),
        TextEncoding::Utf8Bom => {
            let mut out = vec![0xEF, 0xBB, 0xBF];
            out.extend_from_slice(text.as_bytes());
            out
        }
        TextEncoding::Utf16Le | TextEncoding::Utf16LeBom => {
            let mut out = Vec::with_capacity(text.len() * 2 + 2);
            if encoding == TextEncoding::Utf16LeBom {
                out.extend_from_slice(&[0xFF, 0xFE]);
            }
            for unit in text.encode_utf16() {
                out.extend_from_slice(&unit.to_le_bytes());
            }
            out
        }
        // Characters above U+00FF cannot come from a Latin-1 file; new text
        // that introduces them is written as '?'.
        TextEncoding::Latin1 => text
            .chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect(),
        TextEncoding::Windows1252 => text.chars().map(|c| windows1252_byte(c).unwrap_or(b'?')).collect(),
    }
}

/// Read and decode a text file.
pub fn read_text_file(path: &Path) -> Result<(String, TextEncoding)> {
    let bytes = std::fs::read(path)?;
    let (text, encoding) = decode_text(&bytes);
    debug!(path = %path.display(), ?encoding, bytes = bytes.len(), "Decoded text file");
    Ok((text, encoding))
}

/// Encode and write a text file.
pub fn write_text_file(path: &Path, text: &str, encoding: TextEncoding) -> Result<()> {
    std::fs::write(path, encode_text(text, encoding))?;
    Ok(())
}

/// ASCII text stored as UTF-16LE has a NUL in every odd byte.
fn looks_like_utf16le(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(64)];
    sample.len() >= 4
        && sample.len() % 2 == 0
        && sample.chunks_exact(2).all(|pair| pair[1] == 0 && pair[0] != 0)
}

pub(crate) fn decode_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}
