//! Program-level voice records (bank, program number, drum note + voice)

use super::vm35::{Vm35FmVersion, Vm35FmVoice};
use super::vma::VmaFmVoice;
use crate::enums::{note_name, VoiceType};
use crate::util::{hex, indent, zero_padded_string, ByteReader};
use crate::{Result, Smaf825Error};
use serde::Serialize;
use std::fmt;

/// Flag byte carried by converted MA-2 programs
const VMA_PROGRAM_FLAG: u8 = 0x24;

/// Opaque 19-byte PCM voice
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Vm35PcmVoice {
    /// Raw voice bytes
    pub raw_data: [u8; 19],
}

impl fmt::Display for Vm35PcmVoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex(&self.raw_data))
    }
}

/// Voice body of a VM3/VM5 program
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Vm35Voice {
    /// FM voice
    Fm(Vm35FmVoice),
    /// PCM voice (kept, never played)
    Pcm(Vm35PcmVoice),
}

impl fmt::Display for Vm35Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vm35Voice::Fm(v) => fmt::Display::fmt(v, f),
            Vm35Voice::Pcm(v) => fmt::Display::fmt(v, f),
        }
    }
}

/// One MA-3/MA-5 program
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Vm35VoicePc {
    /// Layout the voice was read from
    pub version: Vm35FmVersion,
    /// Program name (libraries only)
    pub name: String,
    /// Header flag byte
    #[serde(skip)]
    pub flag: u8,
    /// Bank select MSB
    pub bank_msb: u8,
    /// Bank select LSB
    pub bank_lsb: u8,
    /// Program number
    pub pc: u8,
    /// Drum note this program is bound to (0 for melodic programs)
    pub drum_note: u8,
    /// Voice type
    pub voice_type: VoiceType,
    /// Voice body
    pub voice: Vm35Voice,
}

impl Vm35VoicePc {
    /// Read a voice library record.
    ///
    /// VM5 records start with `enigma(2) name(16) flag msb lsb pc drum type`,
    /// VM3 records with `enigma(2) flag msb lsb pc drum type name(16)`. FM
    /// bodies always store 4 operators; PCM bodies are 19 opaque bytes.
    pub fn read_library_record(reader: &mut ByteReader<'_>, version: Vm35FmVersion) -> Result<Self> {
        let _enigma = reader.read_u16_be()?;
        let name;
        let header: [u8; 6];
        if version == Vm35FmVersion::Vm5 {
            name = zero_padded_string(reader.read_bytes(16)?);
            header = reader.read_array::<6>()?;
        } else {
            header = reader.read_array::<6>()?;
            name = zero_padded_string(reader.read_bytes(16)?);
        }
        let [flag, bank_msb, bank_lsb, pc, drum_note, raw_type] = header;

        let (voice_type, voice) = match VoiceType::from_raw(raw_type) {
            Some(VoiceType::Fm) => (
                VoiceType::Fm,
                Vm35Voice::Fm(Vm35FmVoice::read(reader, Vm35FmVersion::Vm3Lib, true)?),
            ),
            Some(VoiceType::Pcm) => (
                VoiceType::Pcm,
                Vm35Voice::Pcm(Vm35PcmVoice {
                    raw_data: reader.read_array::<19>()?,
                }),
            ),
            _ => {
                return Err(Smaf825Error::InvalidVoice(format!(
                    "contains unsupported type of voice: {raw_type}"
                )))
            }
        };
        Ok(Vm35VoicePc {
            version,
            name,
            flag,
            bank_msb,
            bank_lsb,
            pc,
            drum_note,
            voice_type,
            voice,
        })
    }

    /// True when the program is bound to a drum note
    pub fn is_for_drum(&self) -> bool {
        self.drum_note != 0
    }

    /// FM voice body, if any
    pub fn fm_voice(&self) -> Option<&Vm35FmVoice> {
        match &self.voice {
            Vm35Voice::Fm(v) => Some(v),
            Vm35Voice::Pcm(_) => None,
        }
    }
}

impl fmt::Display for Vm35VoicePc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bank {}-{} @{} {:?}",
            self.bank_msb, self.bank_lsb, self.pc, self.voice_type
        )?;
        if self.is_for_drum() {
            write!(f, " DrumNote={}", note_name(i32::from(self.drum_note)))?;
        }
        if !self.name.is_empty() {
            write!(f, ": [{}]", self.name)?;
        }
        write!(f, "\n{}", indent(&self.voice.to_string()))
    }
}

/// One MA-2 program
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VmaVoicePc {
    /// Program name (libraries only)
    pub name: String,
    /// Bank number
    pub bank: u8,
    /// Program number
    pub pc: u8,
    /// Voice body
    pub voice: VmaFmVoice,
}

impl VmaVoicePc {
    /// Read a library body: `enigma bank pc`, a 4-operator voice, one trailing byte
    pub fn read_library_body(reader: &mut ByteReader<'_>, name: String) -> Result<Self> {
        let [_enigma, bank, pc] = reader.read_array::<3>()?;
        let voice = VmaFmVoice::read(reader, true)?;
        let _trailer = reader.read_u8()?;
        Ok(VmaVoicePc {
            name,
            bank,
            pc,
            voice,
        })
    }

    /// Convert into an MA-3 program (bank becomes the bank LSB); MA-2 songs
    /// keep the legacy volume curve
    pub fn to_vm35(&self) -> Vm35VoicePc {
        Vm35VoicePc {
            version: Vm35FmVersion::Vm3Lib,
            name: self.name.clone(),
            flag: VMA_PROGRAM_FLAG,
            bank_msb: 0,
            bank_lsb: self.bank,
            pc: self.pc,
            drum_note: 0,
            voice_type: VoiceType::Fm,
            voice: Vm35Voice::Fm(self.voice.to_vm35()),
        }
    }
}

impl fmt::Display for VmaVoicePc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bank {} @{}", self.bank, self.pc)?;
        if !self.name.is_empty() {
            write!(f, ": [{}]", self.name)?;
        }
        write!(f, "\n{}", indent(&self.voice.to_string()))
    }
}
