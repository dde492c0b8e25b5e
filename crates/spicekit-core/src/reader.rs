//! Byte cursor over a memory-mapped raw file

use byteorder::{ByteOrder, LittleEndian};
use num_complex::Complex64;

use crate::encoding::{decode_utf16le, TextEncoding};
use crate::types::{Result, SpiceError};

/// Cursor over raw file bytes: header lines, then little-endian samples
pub(crate) struct RawCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RawCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        if count > self.remaining() {
            return Err(SpiceError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Unexpected end of file",
            )));
        }
        let bytes = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(bytes)
    }

    /// Header encoding of the plot starting at the cursor. A UTF-16 byte order
    /// mark is consumed.
    pub fn detect_encoding(&mut self) -> TextEncoding {
        let rest = &self.data[self.pos..];
        if rest.starts_with(&[0xFF, 0xFE]) {
            self.pos += 2;
            TextEncoding::Utf16Le
        } else if rest.len() >= 2 && rest[0] != 0 && rest[1] == 0 {
            TextEncoding::Utf16Le
        } else {
            TextEncoding::Utf8
        }
    }

    /// Next line without its terminator, or `None` at end of data. A final
    /// line without a newline is returned as well.
    pub fn read_line(&mut self, encoding: TextEncoding) -> Option<String> {
        if self.remaining() == 0 {
            return None;
        }
        let rest = &self.data[self.pos..];
        let line = if encoding.is_utf16() {
            let end = rest
                .chunks_exact(2)
                .position(|pair| *pair == [b'\n', 0])
                .map(|units| units * 2);
            let (body, consumed) = match end {
                Some(end) => (&rest[..end], end + 2),
                None => (rest, rest.len()),
            };
            self.pos += consumed;
            decode_utf16le(body)
        } else {
            let (body, consumed) = match rest.iter().position(|&b| b == b'\n') {
                Some(end) => (&rest[..end], end + 1),
                None => (rest, rest.len()),
            };
            self.pos += consumed;
            String::from_utf8_lossy(body).into_owned()
        };
        Some(line.trim_end_matches('\r').to_string())
    }

    /// Skip blank lines and padding NULs between plots.
    pub fn skip_blank(&mut self) {
        while let Some(&b) = self.data.get(self.pos) {
            if matches!(b, b'\n' | b'\r' | b' ' | b'\t' | 0) {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    #[inline]
    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.read_bytes(4)?))
    }

    #[inline]
    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(LittleEndian::read_f64(self.read_bytes(8)?))
    }

    #[inline]
    pub fn read_complex(&mut self) -> Result<Complex64> {
        let bytes = self.read_bytes(16)?;
        Ok(Complex64::new(
            LittleEndian::read_f64(&bytes[..8]),
            LittleEndian::read_f64(&bytes[8..]),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::encode_text;

    #[test]
    fn test_lines_in_both_encodings() {
        let mut cursor = RawCursor::new(b"Title: x\r\nBinary:\n\x01\x02");
        assert_eq!(cursor.detect_encoding(), TextEncoding::Utf8);
        assert_eq!(cursor.read_line(TextEncoding::Utf8).as_deref(), Some("Title: x"));
        assert_eq!(cursor.read_line(TextEncoding::Utf8).as_deref(), Some("Binary:"));
        assert_eq!(cursor.remaining(), 2);

        let mut bytes = encode_text("Title: y\nBinary:\n", TextEncoding::Utf16Le);
        bytes.extend_from_slice(&1.5f64.to_le_bytes());
        let mut cursor = RawCursor::new(&bytes);
        let encoding = cursor.detect_encoding();
        assert!(encoding.is_utf16());
        assert_eq!(cursor.read_line(encoding).as_deref(), Some("Title: y"));
        assert_eq!(cursor.read_line(encoding).as_deref(), Some("Binary:"));
        assert_eq!(cursor.read_f64().unwrap(), 1.5);
        assert!(cursor.read_line(encoding).is_none());
    }

    #[test]
    fn test_short_read_is_eof() {
        let mut cursor = RawCursor::new(&[0, 0, 0]);
        let err = cursor.read_f32().unwrap_err();
        assert!(matches!(err, SpiceError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof));
        assert_eq!(cursor.position(), 0);
    }
}
