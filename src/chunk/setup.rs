//! Exclusive carriers (`Mtsu`, `EXVO`)

use super::{write_section, ChunkHeader};
use crate::exclusive::{Exclusive, ExclusiveLength};
use crate::util::{hex, ByteReader};
use crate::{Result, Smaf825Error};
use serde::Serialize;
use std::fmt;

const EXCLUSIVE_STATUS: u8 = 0xF0;
const ESCAPE: u8 = 0xFF;

/// `Mtsu` chunk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetupDataChunk {
    /// Chunk header
    pub header: ChunkHeader,
    /// Exclusives in file order
    pub exclusives: Vec<Exclusive>,
    /// Bytes following the last exclusive
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unknown_stream: Vec<u8>,
}

impl SetupDataChunk {
    /// Read `[FF] F0 len data F7` records until something else shows up;
    /// the remainder is kept as an unknown stream
    pub(super) fn parse(header: ChunkHeader, body: &mut ByteReader<'_>) -> Result<Self> {
        let mut exclusives = Vec::new();
        let mut unknown_stream = Vec::new();
        while body.remaining() >= 2 {
            let mut sig = body.read_u8()?;
            if sig == ESCAPE {
                sig = body.read_u8()?;
            }
            if sig != EXCLUSIVE_STATUS {
                unknown_stream.push(sig);
                break;
            }
            exclusives.push(Exclusive::read(body, ExclusiveLength::Fixed)?);
        }
        unknown_stream.extend_from_slice(body.read_rest());
        Ok(SetupDataChunk {
            header,
            exclusives,
            unknown_stream,
        })
    }
}

impl fmt::Display for SetupDataChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines: Vec<String> = self.exclusives.iter().map(|e| e.to_string()).collect();
        if !self.unknown_stream.is_empty() {
            lines.push(format!("UnknownStream: {}", hex(&self.unknown_stream)));
        }
        write_section(f, "SetupDataChunk", &self.header, &lines)
    }
}

/// `EXVO` chunk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExvoChunk {
    /// Chunk header
    pub header: ChunkHeader,
    /// The exclusive, when the payload starts with `FF F0`
    pub exclusive: Option<Exclusive>,
    /// Raw payload otherwise
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stream: Vec<u8>,
}

impl ExvoChunk {
    pub(super) fn parse(header: ChunkHeader, body: &mut ByteReader<'_>) -> Result<Self> {
        let rest = body.read_rest();
        if rest.len() < 2 || rest[..2] != [ESCAPE, EXCLUSIVE_STATUS] {
            return Ok(ExvoChunk {
                header,
                exclusive: None,
                stream: rest.to_vec(),
            });
        }
        let mut reader = ByteReader::with_base(&rest[2..], body.offset() - rest.len() + 2);
        let exclusive = Exclusive::read(&mut reader, ExclusiveLength::Fixed)?;
        if !reader.is_empty() {
            return Err(Smaf825Error::SizeMismatch {
                offset: reader.offset(),
                declared: header.size as usize,
                consumed: header.size as usize - reader.remaining(),
            });
        }
        Ok(ExvoChunk {
            header,
            exclusive: Some(exclusive),
            stream: Vec::new(),
        })
    }
}

impl fmt::Display for ExvoChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line = match &self.exclusive {
            Some(ex) => ex.to_string(),
            None => format!("Stream: {}", hex(&self.stream)),
        };
        write_section(f, "EXVOChunk", &self.header, &[line])
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{chunk_bytes, file_bytes};
    use super::super::{Chunk, FileChunk};

    #[test]
    fn test_setup_data_with_escape_and_trailer() {
        let payload = [
            0xF0, 0x03, 0x01, 0x02, 0xF7, // plain
            0xFF, 0xF0, 0x02, 0x09, 0xF7, // escaped
            0x12, 0x34, // trailer
        ];
        let data = file_bytes(&[chunk_bytes(b"Mtsu", &payload)]);
        let file = FileChunk::parse(&data).unwrap();
        let Chunk::SetupData(setup) = &file.sub_chunks[0] else {
            panic!("expected setup data");
        };
        assert_eq!(setup.exclusives.len(), 2);
        assert_eq!(setup.exclusives[0].data, vec![0x01, 0x02]);
        assert_eq!(setup.exclusives[1].data, vec![0x09]);
        assert_eq!(setup.unknown_stream, vec![0x12, 0x34]);
    }

    #[test]
    fn test_exvo_leftover_is_error() {
        let payload = [0xFF, 0xF0, 0x02, 0x09, 0xF7, 0x00];
        let data = file_bytes(&[chunk_bytes(b"EXVO", &payload)]);
        assert!(FileChunk::parse(&data).is_err());
    }
}
