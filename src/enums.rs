//! Shared Enumerations
//!
//! Channel status codes, score track formats, MIDI-style controller numbers,
//! voice types, and the note-to-frequency conversion used by the YMF825.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::Serialize;

/// Number of logical (and hardware) channels
pub const CHANNEL_COUNT: usize = 16;

/// Note number of A3 (440 Hz)
pub const NOTE_A3: i32 = 9 + 12 * 3;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Per-channel key control mode from the score track header
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, Serialize)]
pub enum KeyControlStatus {
    /// Not specified by the file
    NonSpecified = 0,
    /// Drum/rhythm semantics: each note number is its own instrument
    Off = 1,
    /// Melodic semantics
    On = 2,
}

impl KeyControlStatus {
    /// Decode a 2-bit status field; the reserved value maps to `NonSpecified`
    pub fn from_bits(bits: u8) -> Self {
        KeyControlStatus::from_u8(bits).unwrap_or(KeyControlStatus::NonSpecified)
    }
}

/// Channel type from the score track header
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, Serialize)]
pub enum ChannelType {
    /// No preference
    NoCare = 0,
    /// Melody channel
    Melody = 1,
    /// Non-melody channel
    NoMelody = 2,
    /// Rhythm channel
    Rhythm = 3,
}

impl ChannelType {
    /// Decode the low 2 bits of a status field
    pub fn from_bits(bits: u8) -> Self {
        ChannelType::from_u8(bits & 3).unwrap_or(ChannelType::NoCare)
    }
}

/// Event stream layout of a sequence data chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScoreTrackFormatType {
    /// Legacy 4-channel format (2-byte-limited durations)
    HandyPhoneStandard,
    /// Mobile Standard, Huffman-compressed event stream
    MobileStandardCompressed,
    /// Mobile Standard, plain event stream
    MobileStandardNonCompressed,
    /// `SEQU` chunk layout
    Sequ,
}

impl ScoreTrackFormatType {
    /// Decode the format byte of a score track header
    pub fn from_header(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(ScoreTrackFormatType::HandyPhoneStandard),
            0x01 => Some(ScoreTrackFormatType::MobileStandardCompressed),
            0x02 => Some(ScoreTrackFormatType::MobileStandardNonCompressed),
            _ => None,
        }
    }
}

impl Default for ScoreTrackFormatType {
    fn default() -> Self {
        ScoreTrackFormatType::HandyPhoneStandard
    }
}

/// Sequence type byte of a score track header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScoreTrackSequenceType {
    /// One continuous stream
    StreamSequence,
    /// Phrase-addressable subsequences
    Subsequence,
    /// Any other value
    Undefined(u8),
}

impl From<u8> for ScoreTrackSequenceType {
    fn from(value: u8) -> Self {
        match value {
            0 => ScoreTrackSequenceType::StreamSequence,
            1 => ScoreTrackSequenceType::Subsequence,
            other => ScoreTrackSequenceType::Undefined(other),
        }
    }
}

/// FM/PCM voice type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, Serialize)]
pub enum VoiceType {
    /// FM voice
    Fm = 0,
    /// PCM voice
    Pcm = 1,
    /// AL voice (unsupported)
    Al = 2,
}

impl VoiceType {
    /// Decode a voice type byte
    pub fn from_raw(value: u8) -> Option<Self> {
        VoiceType::from_u8(value)
    }
}

/// Control change numbers the sequencer understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Controller {
    /// Bank select MSB (0)
    BankSelectMsb,
    /// Modulation (1)
    Modulation,
    /// Data entry (6)
    DataEntry,
    /// Main volume (7)
    MainVolume,
    /// Panpot (10)
    Panpot,
    /// Expression (11)
    Expression,
    /// Bank select LSB (32)
    BankSelectLsb,
    /// RPN LSB (100)
    RpnLsb,
    /// RPN MSB (101)
    RpnMsb,
    /// All sound off (120)
    AllSoundOff,
    /// Mono mode on (126)
    MonoOn,
    /// Poly mode on (127)
    PolyOn,
    /// Any other controller number
    Other(u8),
}

impl Controller {
    /// Controller number on the wire
    pub fn number(self) -> u8 {
        match self {
            Controller::BankSelectMsb => 0,
            Controller::Modulation => 1,
            Controller::DataEntry => 6,
            Controller::MainVolume => 7,
            Controller::Panpot => 10,
            Controller::Expression => 11,
            Controller::BankSelectLsb => 32,
            Controller::RpnLsb => 100,
            Controller::RpnMsb => 101,
            Controller::AllSoundOff => 120,
            Controller::MonoOn => 126,
            Controller::PolyOn => 127,
            Controller::Other(n) => n,
        }
    }
}

impl From<u8> for Controller {
    fn from(n: u8) -> Self {
        match n {
            0 => Controller::BankSelectMsb,
            1 => Controller::Modulation,
            6 => Controller::DataEntry,
            7 => Controller::MainVolume,
            10 => Controller::Panpot,
            11 => Controller::Expression,
            32 => Controller::BankSelectLsb,
            100 => Controller::RpnLsb,
            101 => Controller::RpnMsb,
            120 => Controller::AllSoundOff,
            126 => Controller::MonoOn,
            127 => Controller::PolyOn,
            other => Controller::Other(other),
        }
    }
}

impl std::fmt::Display for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Controller::Other(n) => write!(f, "CC#{n}"),
            known => write!(f, "{known:?}({})", known.number()),
        }
    }
}

/// Number of operators used by an FM algorithm
pub fn operator_count(algorithm: u8) -> usize {
    if algorithm < 2 {
        2
    } else {
        4
    }
}

/// Note name such as `A3`
pub fn note_name(note: i32) -> String {
    let index = note.rem_euclid(12) as usize;
    format!("{}{}", NOTE_NAMES[index], note.div_euclid(12) - 1)
}

/// YMF825 block and F-number of a note
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteFreq {
    /// Octave block (0-7)
    pub block: u8,
    /// F-number (0-1023)
    pub fnum: u16,
}

/// Compute block/F-number for `note` detuned by `delta` semitones.
///
/// The block starts at `note / 12` and moves by one while the F-number falls
/// outside 0..1024; values still out of range are clamped with a warning.
pub fn note_freq(note: i32, delta: f64) -> NoteFreq {
    let fnum_k = 2f64.powi(19) / 48000.0 / 2.0;
    let f = 440.0 * 2f64.powf((f64::from(note - NOTE_A3) + delta) / 12.0);
    let mut block = (note / 12).clamp(0, 7);
    let fnum = loop {
        let fnum = (0.5 + f * fnum_k / 2f64.powi(block)).floor() as i64;
        if fnum < 0 {
            if block > 0 {
                block -= 1;
                continue;
            }
            log::warn!("Too low fnum: {}", note_name(note));
            break 0;
        } else if fnum >= 1024 {
            if block < 7 {
                block += 1;
                continue;
            }
            log::warn!("Too high fnum: {}", note_name(note));
            break 1023;
        }
        break fnum;
    };
    NoteFreq {
        block: block as u8,
        fnum: fnum as u16,
    }
}
