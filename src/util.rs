//! Byte Helpers
//!
//! Bounded big-endian reader with absolute offsets for error reporting,
//! SMAF variable-length integers, and the text helpers used by metadata chunks.

use crate::{Result, Smaf825Error};
use std::collections::BTreeMap;

/// Largest value representable by the 2-byte-limited variable-length integer
pub const MAX_LIMITED_VARIABLE_INT: u32 = 0x407F;

/// Cursor over a byte slice that remembers where the slice sits in the file
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> ByteReader<'a> {
    /// Create a reader whose offsets start at 0
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_base(data, 0)
    }

    /// Create a reader for a slice that starts at `base` in the enclosing file
    pub fn with_base(data: &'a [u8], base: usize) -> Self {
        ByteReader { data, pos: 0, base }
    }

    /// Absolute offset of the next byte
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// True when every byte has been consumed
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn ensure(&self, wanted: usize) -> Result<()> {
        if self.remaining() < wanted {
            return Err(Smaf825Error::Truncated {
                offset: self.offset(),
                wanted,
            });
        }
        Ok(())
    }

    /// Read one byte
    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        let b = self.data[self.pos];
        self.pos += 1;
        Ok(b)
    }

    /// Read a big-endian u16
    pub fn read_u16_be(&mut self) -> Result<u16> {
        let b = self.read_array::<2>()?;
        Ok(u16::from_be_bytes(b))
    }

    /// Read a little-endian u16
    pub fn read_u16_le(&mut self) -> Result<u16> {
        let b = self.read_array::<2>()?;
        Ok(u16::from_le_bytes(b))
    }

    /// Read a big-endian u32
    pub fn read_u32_be(&mut self) -> Result<u32> {
        let b = self.read_array::<4>()?;
        Ok(u32::from_be_bytes(b))
    }

    /// Read a fixed-size array
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.ensure(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    /// Read `len` bytes as a borrowed slice
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.ensure(len)?;
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Consume everything that is left
    pub fn read_rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }

    /// Split off the next `len` bytes as an independent reader with correct offsets
    pub fn sub_reader(&mut self, len: usize) -> Result<ByteReader<'a>> {
        let base = self.offset();
        let slice = self.read_bytes(len)?;
        Ok(ByteReader::with_base(slice, base))
    }
}

/// Read a SMAF variable-length integer.
///
/// Each byte carries 7 bits, most significant group first, with bit 7 set on
/// every byte but the last. When `unlimited` is false at most 2 bytes are read
/// and the second byte is combined as `(first_group << 7) + 0x80 | second`.
pub fn read_variable_int(reader: &mut ByteReader<'_>, unlimited: bool) -> Result<u32> {
    let mut result: u32 = 0;
    let mut i = 0;
    loop {
        let b = reader.read_u8()?;
        if !unlimited && i == 1 {
            return Ok((result + 0x80) | u32::from(b));
        }
        result |= u32::from(b & 0x7F);
        if b & 0x80 == 0 {
            break;
        }
        result = result
            .checked_shl(7)
            .filter(|v| *v >> 7 == result)
            .ok_or_else(|| Smaf825Error::ParseError(format!(
                "variable-length integer overflow at 0x{:X}",
                reader.offset()
            )))?;
        i += 1;
    }
    Ok(result)
}

/// Append the variable-length encoding of `value` to `out`.
///
/// Fails for values above [`MAX_LIMITED_VARIABLE_INT`] in the 2-byte-limited form.
pub fn write_variable_int(out: &mut Vec<u8>, value: u32, unlimited: bool) -> Result<()> {
    if !unlimited {
        if value < 0x80 {
            out.push(value as u8);
            return Ok(());
        }
        if value > MAX_LIMITED_VARIABLE_INT {
            return Err(Smaf825Error::ParseError(format!(
                "{value} does not fit a 2-byte variable-length integer"
            )));
        }
        let w = value - 0x80;
        out.push(0x80 | (w >> 7) as u8);
        out.push((w & 0x7F) as u8);
        return Ok(());
    }
    let mut groups = vec![(value & 0x7F) as u8];
    let mut v = value >> 7;
    while v > 0 {
        groups.push(0x80 | (v & 0x7F) as u8);
        v >>= 7;
    }
    out.extend(groups.iter().rev());
    Ok(())
}

/// Greatest common divisor; `gcd(a, 0) == a`
pub fn gcd(a: u32, b: u32) -> u32 {
    let (mut a, mut b) = (a, b);
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Decode Shift-JIS text, normalizing line endings to `\n`
pub fn decode_shift_jis(bytes: &[u8]) -> String {
    let (text, _, _) = encoding_rs::SHIFT_JIS.decode(bytes);
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Decode a fixed-width, zero-padded name field
pub fn zero_padded_string(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .rposition(|b| *b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    decode_shift_jis(&bytes[..end])
}

/// Split `TAG:value,TAG:value` option text.
///
/// A backslash escapes the next character (including `,` and `:`); pairs
/// without a colon are dropped.
pub fn split_optional_data(text: &str) -> BTreeMap<String, String> {
    let mut result = BTreeMap::new();
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ',' => {
                if !current.is_empty() {
                    pieces.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }

    for piece in pieces {
        let Some((tag, value)) = piece.split_once(':') else {
            continue;
        };
        result.insert(tag.to_string(), unescape(value));
    }
    result
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Format bytes as `[01 02 FF]`
pub fn hex(bytes: &[u8]) -> String {
    let body: Vec<String> = bytes.iter().map(|b| format!("{b:02X}")).collect();
    format!("[{}]", body.join(" "))
}

/// Prefix every line of `text` with a tab
pub fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("\t{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gcd() {
        assert_eq!(gcd(12, 8), 4);
        assert_eq!(gcd(20, 0), 20);
        assert_eq!(gcd(0, 20), 20);
        assert_eq!(gcd(5, 40), 5);
    }

    #[test]
    fn test_variable_int_both_grammars() {
        for unlimited in [false, true] {
            for value in [0u32, 127, 128, 16383] {
                let mut buf = Vec::new();
                write_variable_int(&mut buf, value, unlimited).unwrap();
                let mut reader = ByteReader::new(&buf);
                assert_eq!(read_variable_int(&mut reader, unlimited).unwrap(), value);
                assert!(reader.is_empty());
            }
        }
    }

    #[test]
    fn test_limited_variable_int_layout() {
        // 0x80 + 0x00 | 0x05 over two bytes
        let mut reader = ByteReader::new(&[0x80, 0x05]);
        assert_eq!(read_variable_int(&mut reader, false).unwrap(), 0x85);

        let mut buf = Vec::new();
        assert!(write_variable_int(&mut buf, MAX_LIMITED_VARIABLE_INT + 1, false).is_err());
    }

    #[test]
    fn test_unlimited_variable_int_three_bytes() {
        let mut reader = ByteReader::new(&[0x81, 0x80, 0x00]);
        assert_eq!(read_variable_int(&mut reader, true).unwrap(), 0x4000);
    }

    #[test]
    fn test_reader_reports_absolute_offset() {
        let data = [1u8, 2, 3];
        let mut reader = ByteReader::with_base(&data, 0x100);
        reader.read_u16_be().unwrap();
        match reader.read_u16_be() {
            Err(Smaf825Error::Truncated { offset, wanted }) => {
                assert_eq!(offset, 0x102);
                assert_eq!(wanted, 2);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_split_optional_data() {
        let options = split_optional_data(r"ST:Song\, part 1,AN:Someone,XX,CR:a\:b");
        assert_eq!(options["ST"], "Song, part 1");
        assert_eq!(options["AN"], "Someone");
        assert_eq!(options["CR"], "a:b");
        assert!(!options.contains_key("XX"));
    }

    #[test]
    fn test_zero_padded_string() {
        assert_eq!(zero_padded_string(b"Piano\0\0\0"), "Piano");
        assert_eq!(zero_padded_string(&[0, 0]), "");
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0x01, 0xAB]), "[01 AB]");
        assert_eq!(hex(&[]), "[]");
    }
}
