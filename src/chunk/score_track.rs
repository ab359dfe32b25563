//! Score track chunk (`MTR*`)

use super::{parse_children, write_section, Chunk, ChunkHeader, SequenceDataChunk};
use crate::enums::{
    ChannelType, KeyControlStatus, ScoreTrackFormatType, ScoreTrackSequenceType, CHANNEL_COUNT,
};
use crate::util::ByteReader;
use crate::{Result, Smaf825Error};
use serde::Serialize;
use std::fmt;

/// Channels addressed by the Handy Phone Standard format
const HPS_CHANNEL_COUNT: usize = 4;

/// Per-channel control flags from the score track header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    /// Melodic (On) or drum (Off) key handling
    pub key_control_status: KeyControlStatus,
    /// Vibrate in sync with this channel
    pub vibration: bool,
    /// Blink the LED in sync with this channel
    pub led: bool,
    /// Channel type
    pub channel_type: ChannelType,
}

impl ChannelStatus {
    /// Handy Phone nibble: `KCS VS CT CT`
    fn from_nibble(n: u8) -> Self {
        ChannelStatus {
            key_control_status: if n & 0x08 != 0 {
                KeyControlStatus::On
            } else {
                KeyControlStatus::Off
            },
            vibration: n & 0x04 != 0,
            led: false,
            channel_type: ChannelType::from_bits(n),
        }
    }

    /// Mobile Standard byte: `KCS KCS VS LED - - CT CT`
    fn from_byte(b: u8) -> Self {
        ChannelStatus {
            key_control_status: KeyControlStatus::from_bits(b >> 6),
            vibration: b & 0x20 != 0,
            led: b & 0x10 != 0,
            channel_type: ChannelType::from_bits(b),
        }
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KeyControl={:?} Vibration={} LED={} Type={:?}",
            self.key_control_status, self.vibration, self.led, self.channel_type
        )
    }
}

/// Milliseconds per tick for a time base code; unknown codes fall back to 2 ms
fn time_base(code: u8) -> u32 {
    match code {
        0x00 => 1,
        0x01 => 2,
        0x02 => 4,
        0x03 => 5,
        0x10 => 10,
        0x11 => 20,
        0x12 => 40,
        0x13 => 50,
        other => {
            log::warn!("Unknown time base 0x{other:02X}, using 2 msec");
            2
        }
    }
}

/// `MTR*` chunk: track header plus setup and sequence sub-chunks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreTrackChunk {
    /// Chunk header
    pub header: ChunkHeader,
    /// Event stream layout of the contained sequence data
    pub format_type: ScoreTrackFormatType,
    /// Sequence type
    pub sequence_type: ScoreTrackSequenceType,
    /// Milliseconds per duration tick
    pub duration_time_base: u32,
    /// Milliseconds per gate tick
    pub gate_time_base: u32,
    /// Per-channel status (4 entries for Handy Phone, 16 otherwise)
    pub channel_status: Vec<ChannelStatus>,
    /// Setup and sequence data chunks
    pub sub_chunks: Vec<Chunk>,
}

impl ScoreTrackChunk {
    pub(super) fn parse(header: ChunkHeader, body: &mut ByteReader<'_>) -> Result<Self> {
        let raw_format = body.read_u8()?;
        let format_type = ScoreTrackFormatType::from_header(raw_format)
            .ok_or(Smaf825Error::UnsupportedFormat(raw_format))?;
        let sequence_type = ScoreTrackSequenceType::from(body.read_u8()?);
        let duration_time_base = time_base(body.read_u8()?);
        let gate_time_base = time_base(body.read_u8()?);

        let channel_status = if format_type == ScoreTrackFormatType::HandyPhoneStandard {
            let packed = body.read_u16_be()?;
            (0..HPS_CHANNEL_COUNT)
                .map(|ch| ChannelStatus::from_nibble((packed >> (12 - 4 * ch)) as u8 & 15))
                .collect()
        } else {
            body.read_array::<CHANNEL_COUNT>()?
                .iter()
                .map(|&b| ChannelStatus::from_byte(b))
                .collect()
        };

        let sub_chunks = parse_children(body, format_type, header.size)?;
        Ok(ScoreTrackChunk {
            header,
            format_type,
            sequence_type,
            duration_time_base,
            gate_time_base,
            channel_status,
            sub_chunks,
        })
    }

    /// First sequence data chunk below this track
    pub fn sequence_data(&self) -> Option<&SequenceDataChunk> {
        self.sub_chunks.iter().find_map(|c| match c {
            Chunk::SequenceData(seq) => Some(seq),
            _ => None,
        })
    }
}

impl fmt::Display for ScoreTrackChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = vec![
            format!("FormatType: {:?}", self.format_type),
            format!("SequenceType: {:?}", self.sequence_type),
            format!("DurationTimeBase: {} msec", self.duration_time_base),
            format!("GateTimeBase: {} msec", self.gate_time_base),
        ];
        for (ch, status) in self.channel_status.iter().enumerate() {
            lines.push(format!("Ch.{ch:02} {status}"));
        }
        lines.extend(self.sub_chunks.iter().map(|c| c.to_string()));
        write_section(f, "ScoreTrackChunk", &self.header, &lines)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{chunk_bytes, file_bytes};
    use super::super::FileChunk;
    use super::*;

    #[test]
    fn test_mobile_score_track_header() {
        let mut payload = vec![0x02, 0x00, 0x02, 0x03];
        let mut status = [0x80u8; CHANNEL_COUNT];
        status[9] = 0x43;
        payload.extend(status);
        let data = file_bytes(&[chunk_bytes(b"MTR\x05", &payload)]);
        let file = FileChunk::parse(&data).unwrap();
        let Chunk::ScoreTrack(track) = &file.sub_chunks[0] else {
            panic!("expected score track");
        };
        assert_eq!(track.format_type, ScoreTrackFormatType::MobileStandardNonCompressed);
        assert_eq!(track.duration_time_base, 4);
        assert_eq!(track.gate_time_base, 5);
        assert_eq!(track.channel_status.len(), 16);
        assert_eq!(track.channel_status[0].key_control_status, KeyControlStatus::On);
        assert_eq!(track.channel_status[9].key_control_status, KeyControlStatus::Off);
        assert_eq!(track.channel_status[9].channel_type, ChannelType::Rhythm);
    }

    #[test]
    fn test_hps_channel_status_nibbles() {
        let payload = vec![0x00, 0x00, 0x11, 0x11, 0x8C, 0x00];
        let data = file_bytes(&[chunk_bytes(b"MTR\x00", &payload)]);
        let file = FileChunk::parse(&data).unwrap();
        let Chunk::ScoreTrack(track) = &file.sub_chunks[0] else {
            panic!("expected score track");
        };
        assert_eq!(track.channel_status.len(), 4);
        assert_eq!(track.channel_status[0].key_control_status, KeyControlStatus::On);
        assert!(track.channel_status[1].vibration);
        assert_eq!(track.channel_status[1].key_control_status, KeyControlStatus::On);
        assert_eq!(track.channel_status[2].key_control_status, KeyControlStatus::Off);
    }

    #[test]
    fn test_unknown_time_base_falls_back_to_2ms() {
        assert_eq!(time_base(0x13), 50);
        assert_eq!(time_base(0x04), 2);
        assert_eq!(time_base(0xFF), 2);

        let mut payload = vec![0x02, 0x00, 0x7F, 0x02];
        payload.extend([0x80u8; CHANNEL_COUNT]);
        let data = file_bytes(&[chunk_bytes(b"MTR\x05", &payload)]);
        let file = FileChunk::parse(&data).unwrap();
        let Chunk::ScoreTrack(track) = &file.sub_chunks[0] else {
            panic!("expected score track");
        };
        assert_eq!(track.duration_time_base, 2);
        assert_eq!(track.gate_time_base, 4);
    }

    #[test]
    fn test_unsupported_format_is_fatal() {
        let data = file_bytes(&[chunk_bytes(b"MTR\x05", &[0x05, 0x00, 0x02, 0x02])]);
        match FileChunk::parse(&data) {
            Err(Smaf825Error::Chunk { source, .. }) => {
                assert!(matches!(*source, Smaf825Error::UnsupportedFormat(5)))
            }
            other => panic!("unexpected result {other:?}"),
        }
    }
}
