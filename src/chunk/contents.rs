//! Metadata chunks (`CNTI`, `Dch*`)

use super::{write_section, ChunkHeader};
use crate::util::{decode_shift_jis, hex, split_optional_data, ByteReader};
use crate::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Text fields carried by contents info and data chunks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContentsOptions {
    /// `VN`
    pub vendor: Option<String>,
    /// `CN`
    pub carrier: Option<String>,
    /// `CA`
    pub category: Option<String>,
    /// `ST`
    pub title: Option<String>,
    /// `AN`
    pub artist: Option<String>,
    /// `WW`
    pub lyric_writer: Option<String>,
    /// `SW`
    pub composer: Option<String>,
    /// `AW`
    pub arranger: Option<String>,
    /// `CR`
    pub copyright: Option<String>,
    /// `GR`
    pub management_group: Option<String>,
    /// `MI`
    pub management_info: Option<String>,
    /// `CD`
    pub created_date: Option<String>,
    /// `UD`
    pub updated_date: Option<String>,
    /// `ES`
    pub edit_status: Option<String>,
    /// `VC`
    pub vcard: Option<String>,
}

impl ContentsOptions {
    /// Build from `TAG -> value` pairs; unknown tags are dropped
    pub fn from_map(map: &BTreeMap<String, String>) -> Self {
        let get = |tag: &str| map.get(tag).cloned();
        ContentsOptions {
            vendor: get("VN"),
            carrier: get("CN"),
            category: get("CA"),
            title: get("ST"),
            artist: get("AN"),
            lyric_writer: get("WW"),
            composer: get("SW"),
            arranger: get("AW"),
            copyright: get("CR"),
            management_group: get("GR"),
            management_info: get("MI"),
            created_date: get("CD"),
            updated_date: get("UD"),
            edit_status: get("ES"),
            vcard: get("VC"),
        }
    }

    /// `artist - title`, skipping the missing parts
    pub fn summary(&self) -> String {
        [&self.artist, &self.title]
            .iter()
            .filter_map(|s| s.as_deref())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" - ")
    }

    fn lines(&self) -> Vec<String> {
        let fields = [
            ("Vendor", &self.vendor),
            ("Carrier", &self.carrier),
            ("Category", &self.category),
            ("Title", &self.title),
            ("Artist", &self.artist),
            ("LyricWriter", &self.lyric_writer),
            ("Composer", &self.composer),
            ("Arranger", &self.arranger),
            ("Copyright", &self.copyright),
            ("ManagementGroup", &self.management_group),
            ("ManagementInfo", &self.management_info),
            ("CreatedDate", &self.created_date),
            ("UpdatedDate", &self.updated_date),
            ("EditStatus", &self.edit_status),
            ("VCard", &self.vcard),
        ];
        fields
            .iter()
            .filter_map(|(name, value)| value.as_ref().map(|v| format!("{name}: {v}")))
            .collect()
    }
}

/// `CNTI` chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentsInfoChunk {
    /// Chunk header
    pub header: ChunkHeader,
    /// Contents class
    pub class: u8,
    /// Contents type
    #[serde(rename = "type")]
    pub kind: u8,
    /// Text encoding (0 = Shift-JIS)
    pub code_type: u8,
    /// Copy status
    pub copy_status: u8,
    /// Copy counts
    pub copy_counts: u8,
    /// Decoded option text, when the encoding is supported
    pub options: Option<ContentsOptions>,
    /// Raw option bytes
    #[serde(skip)]
    pub stream: Vec<u8>,
}

impl ContentsInfoChunk {
    pub(super) fn parse(header: ChunkHeader, body: &mut ByteReader<'_>) -> Result<Self> {
        let [class, kind, code_type, copy_status, copy_counts] = body.read_array::<5>()?;
        let stream = body.read_rest().to_vec();
        let options = (code_type == 0)
            .then(|| ContentsOptions::from_map(&split_optional_data(&decode_shift_jis(&stream))));
        Ok(ContentsInfoChunk {
            header,
            class,
            kind,
            code_type,
            copy_status,
            copy_counts,
            options,
            stream,
        })
    }
}

impl fmt::Display for ContentsInfoChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = vec![format!(
            "Class: 0x{:02X}, Type: 0x{:02X}, CodeType: 0x{:02X}, CopyStatus: 0x{:02X}, CopyCounts: {}",
            self.class, self.kind, self.code_type, self.copy_status, self.copy_counts
        )];
        match &self.options {
            Some(options) => lines.extend(options.lines()),
            None => lines.push(format!("Options: {}", hex(&self.stream))),
        }
        write_section(f, "ContentsInfoChunk", &self.header, &lines)
    }
}

/// `Dch*` chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataChunk {
    /// Chunk header
    pub header: ChunkHeader,
    /// Text encoding taken from the last signature byte
    pub code_type: u8,
    /// Decoded records, when the encoding is supported
    pub options: Option<ContentsOptions>,
    /// Raw payload
    #[serde(skip)]
    pub stream: Vec<u8>,
}

impl DataChunk {
    /// Records are `tag(2) size(u16 BE) value(size)`
    pub(super) fn parse(header: ChunkHeader, body: &mut ByteReader<'_>) -> Result<Self> {
        let code_type = header.signature.0[3];
        let stream = body.read_rest().to_vec();
        let options = if code_type == 0 {
            let mut map = BTreeMap::new();
            let mut records = ByteReader::with_base(&stream, body.offset() - stream.len());
            while !records.is_empty() {
                let tag = records.read_array::<2>()?;
                let size = records.read_u16_be()?;
                let value = records.read_bytes(usize::from(size))?;
                map.insert(
                    String::from_utf8_lossy(&tag).into_owned(),
                    decode_shift_jis(value),
                );
            }
            Some(ContentsOptions::from_map(&map))
        } else {
            None
        };
        Ok(DataChunk {
            header,
            code_type,
            options,
            stream,
        })
    }
}

impl fmt::Display for DataChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines = match &self.options {
            Some(options) => options.lines(),
            None => vec![format!("Stream: {}", hex(&self.stream))],
        };
        write_section(f, "DataChunk", &self.header, &lines)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{chunk_bytes, file_bytes};
    use super::super::{Chunk, FileChunk};

    #[test]
    fn test_contents_info_options() {
        let mut payload = vec![0x00, 0x01, 0x00, 0x00, 0x00];
        payload.extend(b"ST:Title\\, one,AN:Artist,");
        let data = file_bytes(&[chunk_bytes(b"CNTI", &payload)]);
        let file = FileChunk::parse(&data).unwrap();
        let Chunk::ContentsInfo(cnti) = &file.sub_chunks[0] else {
            panic!("expected CNTI");
        };
        let options = cnti.options.as_ref().unwrap();
        assert_eq!(options.title.as_deref(), Some("Title, one"));
        assert_eq!(options.summary(), "Artist - Title, one");
    }

    #[test]
    fn test_data_chunk_records() {
        let mut payload = b"ST".to_vec();
        payload.extend(3u16.to_be_bytes());
        payload.extend(b"Foo");
        payload.extend(b"AN");
        payload.extend(3u16.to_be_bytes());
        payload.extend(b"Bar");
        let data = file_bytes(&[chunk_bytes(b"Dch\x00", &payload)]);
        let file = FileChunk::parse(&data).unwrap();
        let Chunk::Data(dch) = &file.sub_chunks[0] else {
            panic!("expected Dch");
        };
        assert_eq!(dch.options.as_ref().unwrap().summary(), "Bar - Foo");
    }

    #[test]
    fn test_data_chunk_unsupported_encoding_keeps_stream() {
        let data = file_bytes(&[chunk_bytes(b"Dch\x01", &[1, 2, 3])]);
        let file = FileChunk::parse(&data).unwrap();
        let Chunk::Data(dch) = &file.sub_chunks[0] else {
            panic!("expected Dch");
        };
        assert!(dch.options.is_none());
        assert_eq!(dch.stream, vec![1, 2, 3]);
    }
}
