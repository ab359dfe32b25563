//! Vendor Exclusive Messages
//!
//! Exclusive payloads embedded in setup chunks and event streams. Payloads
//! that carry a Yamaha voice definition are decoded into the matching voice
//! dialect; anything else is kept as raw bytes.

use crate::enums::VoiceType;
use crate::util::{hex, indent, read_variable_int, ByteReader};
use crate::voice::{Vm35FmVersion, Vm35FmVoice, Vm35Voice, Vm35VoicePc, VmaFmVoice, VmaVoicePc};
use crate::{Result, Smaf825Error};
use serde::Serialize;
use std::fmt;

/// End-of-exclusive marker
pub const END_MARK: u8 = 0xF7;

/// How the length prefix of an exclusive is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusiveLength {
    /// One length byte
    Fixed,
    /// 2-byte-limited variable-length integer
    Variable,
}

/// Classification of an exclusive payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExclusiveKind {
    /// Not a recognized voice message
    Unknown,
    /// MA-2 (VMA) voice
    VmaVoice,
    /// MA-3/MA-5 (VM3/VM5) voice
    Vm35Voice,
}

/// A decoded exclusive message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exclusive {
    /// Message classification
    #[serde(rename = "type")]
    pub kind: ExclusiveKind,
    /// Voice type announced by the message, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_type: Option<VoiceType>,
    /// Decoded MA-2 voice
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vma_voice_pc: Option<VmaVoicePc>,
    /// Decoded MA-3/MA-5 voice
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm35_voice_pc: Option<Vm35VoicePc>,
    /// Raw payload (without the length prefix and end mark)
    pub data: Vec<u8>,
}

impl Exclusive {
    /// Read a length-prefixed exclusive terminated by `F7`.
    ///
    /// A missing end mark is tolerated: the byte found there is kept as part
    /// of the payload and a warning is logged. Voice decoding failures are
    /// also only warnings.
    pub fn read(reader: &mut ByteReader<'_>, length: ExclusiveLength) -> Result<Self> {
        let offset = reader.offset();
        let len = match length {
            ExclusiveLength::Variable => read_variable_int(reader, false)? as usize,
            ExclusiveLength::Fixed => usize::from(reader.read_u8()?),
        };
        if len == 0 {
            return Err(Smaf825Error::ParseError(format!(
                "Zero-length exclusive at 0x{offset:X}"
            )));
        }
        log::debug!("Exclusive length = {}", len - 1);
        let mut data = reader.read_bytes(len - 1)?.to_vec();
        let end = reader.read_u8()?;
        if end != END_MARK {
            log::warn!("Invalid end mark: 0x{end:02X}");
            data.push(end);
        }
        Ok(Self::from_data(data))
    }

    /// Classify a raw payload and decode any voice it carries
    pub fn from_data(data: Vec<u8>) -> Self {
        let mut ex = Exclusive {
            kind: ExclusiveKind::Unknown,
            voice_type: None,
            vma_voice_pc: None,
            vm35_voice_pc: None,
            data,
        };
        let d = &ex.data;

        if d.len() >= 10 && d[..5] == [0x43, 0x79, 0x07, 0x7F, 0x01] {
            ex.kind = ExclusiveKind::Vm35Voice;
            ex.vm35_voice_pc = decode_vm35_header_voice(d, Vm35FmVersion::Vm5, &mut ex.voice_type);
        } else if d.len() >= 10 && d[..5] == [0x43, 0x79, 0x06, 0x7F, 0x01] {
            ex.kind = ExclusiveKind::Vm35Voice;
            ex.vm35_voice_pc =
                decode_vm35_header_voice(d, Vm35FmVersion::Vm3Exclusive, &mut ex.voice_type);
        } else if d.len() >= 5 && d[..3] == [0x43, 0x05, 0x01] {
            ex.kind = ExclusiveKind::Vm35Voice;
            ex.voice_type = Some(VoiceType::Fm);
            match Vm35FmVoice::parse(&d[5..], Vm35FmVersion::Vm5) {
                Ok(voice) => {
                    ex.vm35_voice_pc = Some(Vm35VoicePc {
                        version: Vm35FmVersion::Vm5,
                        name: String::new(),
                        flag: 0,
                        bank_msb: 0,
                        bank_lsb: d[3],
                        pc: d[4],
                        drum_note: 0,
                        voice_type: VoiceType::Fm,
                        voice: Vm35Voice::Fm(voice),
                    })
                }
                Err(e) => log::warn!("VM3/VM5 voice exclusive error: {e}"),
            }
        } else if d.len() >= 6 && d[..2] == [0x43, 0x03] {
            ex.kind = ExclusiveKind::VmaVoice;
            ex.voice_type = Some(VoiceType::Fm);
            match VmaFmVoice::parse(&d[5..]) {
                Ok(voice) => {
                    ex.vma_voice_pc = Some(VmaVoicePc {
                        name: String::new(),
                        bank: d[3],
                        pc: d[4],
                        voice,
                    })
                }
                Err(e) => log::warn!("VMA voice exclusive error: {e}: {}", hex(d)),
            }
        } else {
            log::warn!("Unsupported exclusive type: {}", hex(d));
        }
        ex
    }
}

/// Decode the `43 79 0x 7F 01` layout: bank, program, drum note and type
/// header followed by an FM voice
fn decode_vm35_header_voice(
    d: &[u8],
    version: Vm35FmVersion,
    voice_type: &mut Option<VoiceType>,
) -> Option<Vm35VoicePc> {
    *voice_type = VoiceType::from_raw(d[9]);
    if *voice_type != Some(VoiceType::Fm) {
        log::warn!("Unsupported voice type: {}", d[9]);
        return None;
    }
    match Vm35FmVoice::parse(&d[10..], version) {
        Ok(voice) => Some(Vm35VoicePc {
            version,
            name: String::new(),
            flag: 0,
            bank_msb: d[5],
            bank_lsb: d[6],
            pc: d[7],
            drum_note: d[8],
            voice_type: VoiceType::Fm,
            voice: Vm35Voice::Fm(voice),
        }),
        Err(e) => {
            log::warn!("VM3/VM5 voice exclusive error: {e}");
            None
        }
    }
}

impl fmt::Display for Exclusive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Exclusive {} ({} bytes)", hex(&self.data), self.data.len())?;
        if let Some(pc) = &self.vm35_voice_pc {
            write!(f, "\n{}", indent(&pc.to_string()))?;
        }
        if let Some(pc) = &self.vma_voice_pc {
            write!(f, "\n{}", indent(&pc.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 2-operator VM5 voice body: 3 global bytes + 2 operators
    fn vm5_two_op_body() -> Vec<u8> {
        let mut body = vec![0x00, 0x79, 0x01]; // drum key 0, pan 15 bo 1, alg 1
        body.extend([0x80, 0x84, 0xF8, 0x40, 0x00, 0x10, 0x08]);
        body.extend([0x00, 0x52, 0xE4, 0x00, 0x00, 0x10, 0x00]);
        body
    }

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![(payload.len() + 1) as u8];
        out.extend_from_slice(payload);
        out.push(END_MARK);
        out
    }

    #[test]
    fn test_read_unknown_fixed_length() {
        let bytes = framed(&[0x01, 0x02, 0x03]);
        let mut reader = ByteReader::new(&bytes);
        let ex = Exclusive::read(&mut reader, ExclusiveLength::Fixed).unwrap();
        assert_eq!(ex.kind, ExclusiveKind::Unknown);
        assert_eq!(ex.data, vec![1, 2, 3]);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_missing_end_mark_is_kept() {
        let bytes = [0x03, 0xAA, 0xBB, 0xCC];
        let mut reader = ByteReader::new(&bytes);
        let ex = Exclusive::read(&mut reader, ExclusiveLength::Variable).unwrap();
        assert_eq!(ex.data, vec![0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_zero_length_rejected() {
        let mut reader = ByteReader::new(&[0x00, 0xF7]);
        assert!(Exclusive::read(&mut reader, ExclusiveLength::Fixed).is_err());
    }

    #[test]
    fn test_vm5_voice_exclusive() {
        let mut payload = vec![0x43, 0x79, 0x07, 0x7F, 0x01, 0x7C, 0x01, 0x05, 0x24, 0x00];
        payload.extend(vm5_two_op_body());
        let ex = Exclusive::from_data(payload);
        assert_eq!(ex.kind, ExclusiveKind::Vm35Voice);
        let pc = ex.vm35_voice_pc.unwrap();
        assert_eq!(pc.bank_msb, 0x7C);
        assert_eq!(pc.bank_lsb, 1);
        assert_eq!(pc.pc, 5);
        assert_eq!(pc.drum_note, 0x24);
        let Vm35Voice::Fm(voice) = pc.voice else {
            panic!("expected FM voice");
        };
        assert_eq!(voice.alg, 1);
        assert_eq!(voice.operators[0].sr, 8);
        assert_eq!(voice.operators[1].ar, 0xE);
    }

    #[test]
    fn test_short_vm5_exclusive() {
        let mut payload = vec![0x43, 0x05, 0x01, 0x02, 0x07];
        payload.extend(vm5_two_op_body());
        let ex = Exclusive::from_data(payload);
        let pc = ex.vm35_voice_pc.unwrap();
        assert_eq!(pc.bank_msb, 0);
        assert_eq!(pc.bank_lsb, 2);
        assert_eq!(pc.pc, 7);
    }

    #[test]
    fn test_vm5_voice_with_wrong_size_is_only_classified() {
        let mut payload = vec![0x43, 0x79, 0x07, 0x7F, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00];
        payload.extend(vm5_two_op_body());
        payload.push(0x00);
        let ex = Exclusive::from_data(payload);
        assert_eq!(ex.kind, ExclusiveKind::Vm35Voice);
        assert!(ex.vm35_voice_pc.is_none());
    }

    #[test]
    fn test_vma_voice_exclusive() {
        let mut payload = vec![0x43, 0x03, 0x00, 0x01, 0x09];
        payload.extend([0x0C, 0x01]); // fb 1, alg 4
        for _ in 0..4 {
            payload.extend([0x14, 0x52, 0xF4, 0x10, 0x00]);
        }
        let ex = Exclusive::from_data(payload);
        assert_eq!(ex.kind, ExclusiveKind::VmaVoice);
        let pc = ex.vma_voice_pc.unwrap();
        assert_eq!(pc.bank, 1);
        assert_eq!(pc.pc, 9);
        assert_eq!(pc.voice.alg, 4);
    }
}
