//! Compressed Sequence Decoding
//!
//! Mobile Standard compressed sequence chunks carry a big-endian decompressed
//! length, a pre-order encoded Huffman tree, then the bit-packed codes.
//!
//! Tree bitstream: `1` introduces an interior node followed by its left and
//! right subtrees, `0` introduces a leaf followed by its 8-bit byte value.

use crate::util::ByteReader;
use crate::{Result, Smaf825Error};

/// Number of leaf symbols
const LEAVES: usize = 256;
/// Maximum number of tree nodes (leaves + interior)
const MAX_NODES: usize = 2 * LEAVES - 1;

/// MSB-first bit reader
pub struct BitReader<'a> {
    reader: ByteReader<'a>,
    buf: u8,
    rest: u32,
}

impl<'a> BitReader<'a> {
    /// Create a bit reader over a byte reader
    pub fn new(reader: ByteReader<'a>) -> Self {
        BitReader {
            reader,
            buf: 0,
            rest: 0,
        }
    }

    /// Read one bit
    pub fn read_bit(&mut self) -> Result<bool> {
        if self.rest == 0 {
            self.buf = self.reader.read_u8()?;
            self.rest = 8;
        }
        let bit = self.buf & 0x80 != 0;
        self.buf <<= 1;
        self.rest -= 1;
        Ok(bit)
    }

    /// Read 8 bits that may straddle a byte boundary
    pub fn read_u8(&mut self) -> Result<u8> {
        let next = self.reader.read_u8()?;
        let result = self.buf | next.checked_shr(self.rest).unwrap_or(0);
        self.buf = next.checked_shl(8 - self.rest).unwrap_or(0);
        Ok(result)
    }
}

/// Tree decoder with node storage for at most 511 nodes
struct Decoder<'a> {
    bits: BitReader<'a>,
    avail: usize,
    left: [u16; MAX_NODES],
    right: [u16; MAX_NODES],
}

impl<'a> Decoder<'a> {
    fn new(bits: BitReader<'a>) -> Self {
        Decoder {
            bits,
            avail: LEAVES,
            left: [0; MAX_NODES],
            right: [0; MAX_NODES],
        }
    }

    fn read_tree(&mut self) -> Result<usize> {
        if !self.bits.read_bit()? {
            return Ok(usize::from(self.bits.read_u8()?));
        }
        let node = self.avail;
        self.avail += 1;
        if node >= MAX_NODES {
            return Err(Smaf825Error::InvalidHuffmanTable);
        }
        let left = self.read_tree()?;
        let right = self.read_tree()?;
        self.left[node] = left as u16;
        self.right[node] = right as u16;
        Ok(node)
    }

    fn decode(&mut self, len: usize) -> Result<Vec<u8>> {
        let root = self.read_tree()?;
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            let mut node = root;
            while node >= LEAVES {
                node = if self.bits.read_bit()? {
                    usize::from(self.right[node])
                } else {
                    usize::from(self.left[node])
                };
            }
            out.push(node as u8);
        }
        Ok(out)
    }
}

/// Decompress a Huffman-coded stream read from `reader`.
///
/// The result always has exactly the declared length; bytes after the last
/// code are left unread.
pub fn decompress_from(reader: &mut ByteReader<'_>) -> Result<Vec<u8>> {
    let len = reader.read_u32_be()? as usize;
    log::debug!("Decompressing huffman code ({len} bytes)");
    let body = reader.sub_reader(reader.remaining())?;
    Decoder::new(BitReader::new(body)).decode(len)
}

/// Decompress a complete Huffman-coded stream
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    decompress_from(&mut ByteReader::new(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pack a string of '0'/'1' characters MSB first
    fn pack_bits(bits: &str) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, c) in bits.chars().filter(|c| !c.is_whitespace()).enumerate() {
            if i % 8 == 0 {
                out.push(0);
            }
            if c == '1' {
                let last = out.len() - 1;
                out[last] |= 0x80 >> (i % 8);
            }
        }
        out
    }

    fn stream(len: u32, bits: &str) -> Vec<u8> {
        let mut data = len.to_be_bytes().to_vec();
        data.extend(pack_bits(bits));
        data
    }

    #[test]
    fn test_single_leaf_tree() {
        // Leaf 'A' (0x41) and no code bits at all
        let data = stream(5, "0 01000001");
        assert_eq!(data, vec![0, 0, 0, 5, 0x20, 0x80]);
        assert_eq!(decompress(&data).unwrap(), b"AAAAA");
    }

    #[test]
    fn test_two_leaf_tree() {
        // root -> ('a', 'b'); codes: a=0, b=1; message "abba"
        let data = stream(4, "1 0 01100001 0 01100010 0110");
        assert_eq!(decompress(&data).unwrap(), b"abba");
    }

    #[test]
    fn test_truncated_codes() {
        let data = stream(20, "1 0 01100001 0 01100010 0110");
        assert!(matches!(
            decompress(&data),
            Err(Smaf825Error::Truncated { .. })
        ));
    }

    #[test]
    fn test_too_many_nodes() {
        // A left-leaning chain of 256 interior nodes exceeds the 511-node store
        let bits = "1".repeat(256);
        let data = stream(1, &bits);
        assert!(matches!(
            decompress(&data),
            Err(Smaf825Error::InvalidHuffmanTable)
        ));
    }

    #[test]
    fn test_bit_reader_straddles_bytes() {
        let data = pack_bits("1 11110000 0");
        let mut bits = BitReader::new(ByteReader::new(&data));
        assert!(bits.read_bit().unwrap());
        assert_eq!(bits.read_u8().unwrap(), 0xF0);
        assert!(!bits.read_bit().unwrap());
    }
}
