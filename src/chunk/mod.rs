//! Container Parsing
//!
//! A SMAF file is a tree of length-prefixed chunks: 4-byte ASCII signature,
//! big-endian u32 payload size, payload. The root chunk additionally ends with
//! a CRC-16 trailer.
//!
//! # Signatures
//! - `CNTI` contents info, `Dch*` data (metadata)
//! - `OPDA` optional data, `MMMG` (2-byte prefix), `VOIC` (containers)
//! - `MTR*` score track, `Mtsu` setup data, `Mtsq`/`SEQU` sequence data
//! - `EXVO` voice exclusive, `MspI` seek phrase info
//! - anything else is kept as an opaque chunk

mod contents;
mod crc;
mod score_track;
mod sequence;
mod setup;

pub use contents::{ContentsInfoChunk, ContentsOptions, DataChunk};
pub use crc::crc16;
pub use score_track::{ChannelStatus, ScoreTrackChunk};
pub use sequence::{merge_sequences, SequenceDataChunk};
pub use setup::{ExvoChunk, SetupDataChunk};

use crate::enums::ScoreTrackFormatType;
use crate::exclusive::Exclusive;
use crate::util::{hex, indent, ByteReader};
use crate::voice::{Vm35FmVoice, Vm35Voice};
use crate::{Result, Smaf825Error};
use serde::{Serialize, Serializer};
use std::fmt;

/// Size of a chunk header
pub const HEADER_SIZE: usize = 8;

/// Size of the root chunk CRC trailer
const CRC_SIZE: usize = 2;

/// 4-byte chunk signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; 4]);

impl Signature {
    /// True when the first three bytes match `prefix` (for `MTR*`, `Dch*` families)
    pub fn has_prefix(&self, prefix: &[u8; 3]) -> bool {
        self.0[..3] == prefix[..]
    }

    fn is_family(&self) -> bool {
        [b"MTR", b"ATR", b"GTR", b"Dch"]
            .iter()
            .any(|p| self.has_prefix(p))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text: String = self.0.iter().map(|&b| char::from(b)).collect();
        if self.is_family() {
            write!(f, "{}*(0x{:02X})", &text[..3], self.0[3])
        } else {
            f.write_str(&text)
        }
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let text: String = self.0.iter().map(|&b| char::from(b)).collect();
        serializer.serialize_str(&text)
    }
}

/// Signature and declared payload size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkHeader {
    /// Chunk signature
    pub signature: Signature,
    /// Declared payload size
    #[serde(skip)]
    pub size: u32,
}

impl fmt::Display for ChunkHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {} bytes", self.signature, self.size)
    }
}

/// Chunk that only holds child chunks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerChunk {
    /// Chunk header
    pub header: ChunkHeader,
    /// Child chunks in file order
    pub sub_chunks: Vec<Chunk>,
}

/// Chunk kept as raw bytes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpaqueChunk {
    /// Chunk header
    pub header: ChunkHeader,
    /// Raw payload
    pub stream: Vec<u8>,
}

/// A node of the chunk tree
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum Chunk {
    /// `CNTI`
    ContentsInfo(ContentsInfoChunk),
    /// `Dch*`
    Data(DataChunk),
    /// `OPDA`
    OptionalData(ContainerChunk),
    /// `MMMG`
    Mmmg(ContainerChunk),
    /// `VOIC`
    Voice(ContainerChunk),
    /// `EXVO`
    Exvo(ExvoChunk),
    /// `MTR*`
    ScoreTrack(ScoreTrackChunk),
    /// `Mtsu`
    SetupData(SetupDataChunk),
    /// `Mtsq` / `SEQU`
    SequenceData(SequenceDataChunk),
    /// `MspI`
    SeekPhraseInfo(OpaqueChunk),
    /// Any other signature
    Unknown(OpaqueChunk),
}

impl Chunk {
    /// Header of this chunk
    pub fn header(&self) -> &ChunkHeader {
        match self {
            Chunk::ContentsInfo(c) => &c.header,
            Chunk::Data(c) => &c.header,
            Chunk::OptionalData(c) | Chunk::Mmmg(c) | Chunk::Voice(c) => &c.header,
            Chunk::Exvo(c) => &c.header,
            Chunk::ScoreTrack(c) => &c.header,
            Chunk::SetupData(c) => &c.header,
            Chunk::SequenceData(c) => &c.header,
            Chunk::SeekPhraseInfo(c) | Chunk::Unknown(c) => &c.header,
        }
    }

    /// Child chunks (empty for leaves)
    pub fn sub_chunks(&self) -> &[Chunk] {
        match self {
            Chunk::OptionalData(c) | Chunk::Mmmg(c) | Chunk::Voice(c) => &c.sub_chunks,
            Chunk::ScoreTrack(c) => &c.sub_chunks,
            _ => &[],
        }
    }

    /// Visit this chunk and all descendants depth-first in file order
    pub fn traverse<'a>(&'a self, f: &mut dyn FnMut(&'a Chunk)) {
        f(self);
        for sub in self.sub_chunks() {
            sub.traverse(f);
        }
    }

    /// Exclusives carried directly by this chunk or its `EXVO` children
    pub fn exclusives(&self) -> Vec<&Exclusive> {
        match self {
            Chunk::SetupData(c) => c.exclusives.iter().collect(),
            Chunk::Voice(c) => c
                .sub_chunks
                .iter()
                .filter_map(|sub| match sub {
                    Chunk::Exvo(exvo) => exvo.exclusive.as_ref(),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// True for chunks that act as a voice source for playback (`Mtsu`, `VOIC`)
    pub fn is_exclusive_container(&self) -> bool {
        matches!(self, Chunk::SetupData(_) | Chunk::Voice(_))
    }
}

/// Read one chunk (header + payload) and dispatch on its signature.
///
/// `format` is passed down to sequence data chunks below a score track.
pub fn parse_chunk(reader: &mut ByteReader<'_>, format: ScoreTrackFormatType) -> Result<Chunk> {
    let from = reader.offset();
    let signature = Signature(reader.read_array::<4>()?);
    let size = reader.read_u32_be()?;
    let to = reader.offset() + size as usize;
    let header = ChunkHeader { signature, size };

    reader
        .sub_reader(size as usize)
        .and_then(|mut body| build_chunk(header, &mut body, format))
        .map_err(|e| Smaf825Error::Chunk {
            signature: signature.to_string(),
            from,
            to,
            source: Box::new(e),
        })
}

fn build_chunk(
    header: ChunkHeader,
    body: &mut ByteReader<'_>,
    format: ScoreTrackFormatType,
) -> Result<Chunk> {
    let chunk = match &header.signature.0 {
        b"CNTI" => {
            log::debug!("Creating ContentsInfoChunk");
            Chunk::ContentsInfo(ContentsInfoChunk::parse(header, body)?)
        }
        b"OPDA" => {
            log::debug!("Creating OptionalDataChunk");
            Chunk::OptionalData(parse_container(header, body)?)
        }
        b"MMMG" => {
            log::debug!("Creating MMMGChunk");
            let _prefix = body.read_u16_be()?;
            Chunk::Mmmg(parse_container(header, body)?)
        }
        b"VOIC" => {
            log::debug!("Creating VoiceChunk");
            Chunk::Voice(parse_container(header, body)?)
        }
        b"EXVO" => {
            log::debug!("Creating EXVOChunk");
            Chunk::Exvo(ExvoChunk::parse(header, body)?)
        }
        b"MspI" => {
            log::debug!("Creating SeekPhraseInfoChunk");
            Chunk::SeekPhraseInfo(OpaqueChunk {
                header,
                stream: body.read_rest().to_vec(),
            })
        }
        b"Mtsu" => {
            log::debug!("Creating SetupDataChunk");
            Chunk::SetupData(SetupDataChunk::parse(header, body)?)
        }
        b"Mtsq" => {
            log::debug!("Creating SequenceDataChunk ({format:?})");
            Chunk::SequenceData(SequenceDataChunk::parse(header, body, format)?)
        }
        b"SEQU" => {
            log::debug!("Creating SequenceDataChunk (SEQU)");
            Chunk::SequenceData(SequenceDataChunk::parse(
                header,
                body,
                ScoreTrackFormatType::Sequ,
            )?)
        }
        sig if header.signature.has_prefix(b"MTR") => {
            log::debug!("Creating ScoreTrackChunk {}", sig[3]);
            Chunk::ScoreTrack(ScoreTrackChunk::parse(header, body)?)
        }
        _ if header.signature.has_prefix(b"Dch") => {
            log::debug!("Creating DataChunk");
            Chunk::Data(DataChunk::parse(header, body)?)
        }
        _ => {
            log::debug!("Creating UnknownChunk {}", header.signature);
            Chunk::Unknown(OpaqueChunk {
                header,
                stream: body.read_rest().to_vec(),
            })
        }
    };
    Ok(chunk)
}

/// Read child chunks while a full header still fits; leftover bytes are a size error
pub(crate) fn parse_children(
    body: &mut ByteReader<'_>,
    format: ScoreTrackFormatType,
    declared: u32,
) -> Result<Vec<Chunk>> {
    let mut sub_chunks = Vec::new();
    while body.remaining() >= HEADER_SIZE {
        sub_chunks.push(parse_chunk(body, format)?);
    }
    if !body.is_empty() {
        return Err(Smaf825Error::SizeMismatch {
            offset: body.offset(),
            declared: declared as usize,
            consumed: declared as usize - body.remaining(),
        });
    }
    Ok(sub_chunks)
}

fn parse_container(header: ChunkHeader, body: &mut ByteReader<'_>) -> Result<ContainerChunk> {
    let sub_chunks = parse_children(body, ScoreTrackFormatType::default(), header.size)?;
    Ok(ContainerChunk { header, sub_chunks })
}

/// Root chunk of a SMAF file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileChunk {
    /// Root header (normally `MMMD`)
    pub header: ChunkHeader,
    /// Top-level chunks
    pub sub_chunks: Vec<Chunk>,
    /// CRC computed over header and payload
    #[serde(skip)]
    pub crc_got: u16,
    /// CRC stored in the trailer
    #[serde(skip)]
    pub crc_want: u16,
}

impl FileChunk {
    /// Parse a complete file.
    ///
    /// Children are read while at least 10 bytes (header + CRC) remain; the
    /// last 2 bytes of the payload are the CRC trailer. A CRC mismatch is only
    /// logged; see [`FileChunk::is_crc_valid`].
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);
        let signature = Signature(reader.read_array::<4>()?);
        let size = reader.read_u32_be()?;
        let header = ChunkHeader { signature, size };
        let mut body = reader.sub_reader(size as usize)?;

        let mut sub_chunks = Vec::new();
        while body.remaining() >= HEADER_SIZE + CRC_SIZE {
            sub_chunks.push(parse_chunk(&mut body, ScoreTrackFormatType::default())?);
        }
        if body.remaining() != CRC_SIZE {
            return Err(Smaf825Error::SizeMismatch {
                offset: body.offset(),
                declared: size as usize,
                consumed: size as usize + CRC_SIZE - body.remaining(),
            });
        }

        let crc_end = HEADER_SIZE + size as usize - CRC_SIZE;
        let crc_got = crc16(&data[..crc_end]);
        let crc_want = body.read_u16_be()?;
        if crc_got != crc_want {
            log::warn!("CRC mismatch (want 0x{crc_want:04X}, got 0x{crc_got:04X})");
        }

        Ok(FileChunk {
            header,
            sub_chunks,
            crc_got,
            crc_want,
        })
    }

    /// True when the trailer matches the computed CRC
    pub fn is_crc_valid(&self) -> bool {
        self.crc_got == self.crc_want
    }

    /// Visit every chunk below the root depth-first in file order
    pub fn traverse<'a>(&'a self, f: &mut dyn FnMut(&'a Chunk)) {
        for sub in &self.sub_chunks {
            sub.traverse(f);
        }
    }

    /// All exclusives found in setup data and `EXVO` chunks
    pub fn collect_exclusives(&self) -> Vec<&Exclusive> {
        let mut result = Vec::new();
        self.traverse(&mut |chunk| match chunk {
            Chunk::SetupData(c) => result.extend(c.exclusives.iter()),
            Chunk::Exvo(c) => result.extend(c.exclusive.iter()),
            _ => {}
        });
        result
    }

    /// FM voices of all collected exclusives, MA-2 voices converted
    pub fn collect_voices(&self) -> Vec<Vm35FmVoice> {
        let mut voices = Vec::new();
        for ex in self.collect_exclusives() {
            if let Some(pc) = &ex.vm35_voice_pc {
                if let Vm35Voice::Fm(v) = &pc.voice {
                    voices.push(v.clone());
                }
            }
            if let Some(pc) = &ex.vma_voice_pc {
                voices.push(pc.voice.to_vm35());
            }
        }
        voices
    }
}

impl fmt::Display for FileChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sub: Vec<String> = self.sub_chunks.iter().map(|c| c.to_string()).collect();
        sub.push(format!(
            "CRC = want: 0x{:04X}, got: 0x{:04X} ({})",
            self.crc_want,
            self.crc_got,
            if self.is_crc_valid() { "valid" } else { "invalid" }
        ));
        write!(f, "MMF File Chunk: {}\n{}", self.header, indent(&sub.join("\n")))
    }
}

/// Format `title: header` followed by indented lines
pub(crate) fn write_section(
    f: &mut fmt::Formatter<'_>,
    title: &str,
    header: &ChunkHeader,
    lines: &[String],
) -> fmt::Result {
    write!(f, "{title}: {header}")?;
    if !lines.is_empty() {
        write!(f, "\n{}", indent(&lines.join("\n")))?;
    }
    Ok(())
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let children = |c: &ContainerChunk| -> Vec<String> {
            c.sub_chunks.iter().map(|s| s.to_string()).collect()
        };
        match self {
            Chunk::ContentsInfo(c) => fmt::Display::fmt(c, f),
            Chunk::Data(c) => fmt::Display::fmt(c, f),
            Chunk::OptionalData(c) => write_section(f, "OptionalDataChunk", &c.header, &children(c)),
            Chunk::Mmmg(c) => write_section(f, "MMMGChunk", &c.header, &children(c)),
            Chunk::Voice(c) => write_section(f, "VoiceChunk", &c.header, &children(c)),
            Chunk::Exvo(c) => fmt::Display::fmt(c, f),
            Chunk::ScoreTrack(c) => fmt::Display::fmt(c, f),
            Chunk::SetupData(c) => fmt::Display::fmt(c, f),
            Chunk::SequenceData(c) => fmt::Display::fmt(c, f),
            Chunk::SeekPhraseInfo(c) => write_section(
                f,
                "SeekPhraseInfoChunk",
                &c.header,
                &[format!("Stream: {}", hex(&c.stream))],
            ),
            Chunk::Unknown(c) => write!(f, "UnknownChunk: {}", c.header),
        }
    }
}
