//! Sequence data chunk (`Mtsq`, `SEQU`) and multi-track merge

use super::{write_section, ChunkHeader};
use crate::enums::ScoreTrackFormatType;
use crate::event::{grammar_for, DurationEventPair, EventContext};
use crate::huffman;
use crate::util::ByteReader;
use crate::{Result, Smaf825Error};
use serde::Serialize;
use std::fmt;

/// Channels owned by each merged track
const CHANNELS_PER_TRACK: u8 = 4;

/// Timed event stream of one score track
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceDataChunk {
    /// Chunk header
    pub header: ChunkHeader,
    /// Grammar the stream was decoded with
    pub format_type: ScoreTrackFormatType,
    /// Events in stream order
    pub events: Vec<DurationEventPair>,
}

impl SequenceDataChunk {
    /// Decode the event stream, inflating it first for the compressed format
    pub(super) fn parse(
        header: ChunkHeader,
        body: &mut ByteReader<'_>,
        format_type: ScoreTrackFormatType,
    ) -> Result<Self> {
        let events = if format_type == ScoreTrackFormatType::MobileStandardCompressed {
            let inflated = huffman::decompress_from(body)?;
            log::debug!("Decompressed {} bytes", inflated.len());
            read_events(&mut ByteReader::new(&inflated), format_type)?
        } else {
            read_events(body, format_type)?
        };
        Ok(SequenceDataChunk {
            header,
            format_type,
            events,
        })
    }

    /// Build a chunk around an already decoded stream
    pub fn from_events(events: Vec<DurationEventPair>, format_type: ScoreTrackFormatType) -> Self {
        SequenceDataChunk {
            header: ChunkHeader {
                signature: super::Signature(*b"Mtsq"),
                size: 0,
            },
            format_type,
            events,
        }
    }
}

/// Read `(duration, event)` pairs until the stream ends.
///
/// Exactly 4 remaining bytes must be a zero end-of-sequence marker. An
/// explicit end-of-track event stops reading; anything after it is ignored.
fn read_events(
    reader: &mut ByteReader<'_>,
    format_type: ScoreTrackFormatType,
) -> Result<Vec<DurationEventPair>> {
    let grammar = grammar_for(format_type);
    let mut ctx = EventContext::new();
    let mut events = Vec::new();
    while !reader.is_empty() {
        if reader.remaining() == 4 {
            let offset = reader.offset();
            let eos = reader.read_u32_be()?;
            if eos == 0 {
                break;
            }
            return Err(Smaf825Error::InvalidEvent {
                offset,
                detail: format!("0x{eos:08X} at last"),
            });
        }
        let duration = grammar.read_duration(reader)?;
        match grammar.decode_one(reader, &mut ctx)? {
            Some(event) => events.push(DurationEventPair { duration, event }),
            None => break,
        }
    }
    log::debug!("{} events ({})", events.len(), grammar.name());
    Ok(events)
}

/// Merge several tracks into one stream.
///
/// Track `i` has its channels moved up by `4 * i`. Events are ordered by
/// absolute time, ties going to the lower track index, and durations are
/// recomputed as deltas between consecutive merged events.
pub fn merge_sequences(sequences: &[&SequenceDataChunk]) -> SequenceDataChunk {
    let format_type = sequences
        .first()
        .map(|s| s.format_type)
        .unwrap_or_default();
    if let [single] = sequences {
        return (*single).clone();
    }

    let mut timed = Vec::new();
    for (track, seq) in sequences.iter().enumerate() {
        let shift = CHANNELS_PER_TRACK.saturating_mul(track as u8);
        let mut time: u64 = 0;
        for pair in &seq.events {
            time += u64::from(pair.duration);
            let mut event = pair.event.clone();
            event.shift_channel(shift);
            timed.push((time, track, event));
        }
    }
    timed.sort_by_key(|(time, track, _)| (*time, *track));

    let mut events = Vec::with_capacity(timed.len());
    let mut last = 0u64;
    for (time, _, event) in timed {
        events.push(DurationEventPair {
            duration: (time - last) as u32,
            event,
        });
        last = time;
    }
    SequenceDataChunk::from_events(events, format_type)
}

impl fmt::Display for SequenceDataChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = Vec::with_capacity(self.events.len());
        for pair in &self.events {
            if pair.duration > 0 {
                lines.push(format!("      ..{} steps..", pair.duration));
            }
            lines.push(pair.event.to_string());
        }
        write_section(f, "SequenceDataChunk", &self.header, &lines)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{chunk_bytes, file_bytes};
    use super::super::{Chunk, FileChunk};
    use super::*;
    use crate::event::Event;

    fn note(channel: u8, note: u8) -> Event {
        Event::Note {
            channel,
            note,
            velocity: 100,
            gate_time: 1,
        }
    }

    fn pair(duration: u32, event: Event) -> DurationEventPair {
        DurationEventPair { duration, event }
    }

    fn mobile_track(sequence: &[u8]) -> Vec<u8> {
        let mut payload = vec![0x02, 0x00, 0x02, 0x02];
        payload.extend([0x80u8; 16]);
        payload.extend(chunk_bytes(b"Mtsq", sequence));
        chunk_bytes(b"MTR\x05", &payload)
    }

    #[test]
    fn test_mobile_sequence_with_end_marker() {
        let data = file_bytes(&[mobile_track(&[
            0x00, 0x90, 0x3C, 0x64, 0x04, // note on
            0x02, 0xFF, 0x00, // nop after 2 ticks
            0x00, 0x00, 0x00, 0x00, // end of sequence
        ])]);
        let file = FileChunk::parse(&data).unwrap();
        assert!(file.is_crc_valid());
        let Chunk::ScoreTrack(track) = &file.sub_chunks[0] else {
            panic!("expected score track");
        };
        let seq = track.sequence_data().unwrap();
        assert_eq!(
            seq.events,
            vec![
                pair(
                    0,
                    Event::Note {
                        channel: 0,
                        note: 60,
                        velocity: 100,
                        gate_time: 4
                    }
                ),
                pair(2, Event::Nop),
            ]
        );
    }

    #[test]
    fn test_nonzero_trailer_is_fatal() {
        let data = file_bytes(&[mobile_track(&[0x00, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x01])]);
        assert!(FileChunk::parse(&data).is_err());
    }

    #[test]
    fn test_invalid_opcode_reports_offset() {
        let data = file_bytes(&[mobile_track(&[0x00, 0x70, 0x00])]);
        let err = FileChunk::parse(&data).unwrap_err();
        let mut inner = &err;
        while let Smaf825Error::Chunk { source, .. } = inner {
            inner = &**source;
        }
        match inner {
            // MMMD(8) + MTR header(8) + 20 status bytes + Mtsq header(8) + duration(1)
            Smaf825Error::InvalidEvent { offset, .. } => assert_eq!(*offset, 45),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_compressed_sequence() {
        // Single-leaf tree for 0x00 over 4 bytes → the end-of-sequence marker
        let mut stream = 4u32.to_be_bytes().to_vec();
        // bits: 0 (leaf) 00000000, then 4 zero bits for the codes
        stream.extend([0x00, 0x00]);
        let mut payload = vec![0x01, 0x00, 0x02, 0x02];
        payload.extend([0x80u8; 16]);
        payload.extend(chunk_bytes(b"Mtsq", &stream));
        let data = file_bytes(&[chunk_bytes(b"MTR\x05", &payload)]);
        let file = FileChunk::parse(&data).unwrap();
        let Chunk::ScoreTrack(track) = &file.sub_chunks[0] else {
            panic!("expected score track");
        };
        assert!(track.sequence_data().unwrap().events.is_empty());
    }

    #[test]
    fn test_merge_interleaves_by_time() {
        let a = SequenceDataChunk::from_events(
            vec![pair(0, note(0, 60)), pair(4, note(1, 62))],
            ScoreTrackFormatType::MobileStandardNonCompressed,
        );
        let b = SequenceDataChunk::from_events(
            vec![pair(2, note(0, 64)), pair(2, note(0, 65))],
            ScoreTrackFormatType::MobileStandardNonCompressed,
        );
        let merged = merge_sequences(&[&a, &b]);
        assert_eq!(
            merged.events,
            vec![
                pair(0, note(0, 60)),
                pair(2, note(4, 64)),
                pair(2, note(1, 62)),
                pair(0, note(4, 65)),
            ]
        );
    }

    #[test]
    fn test_merge_single_is_identity() {
        let a = SequenceDataChunk::from_events(
            vec![pair(3, note(2, 60))],
            ScoreTrackFormatType::HandyPhoneStandard,
        );
        assert_eq!(merge_sequences(&[&a]), a);
    }
}
