//! VM3/VM5 FM voices and their YMF825 tone encoding

use crate::enums::{note_name, operator_count};
use crate::util::{hex, indent, ByteReader};
use crate::{Result, Smaf825Error};
use bitflags::bitflags;
use serde::Serialize;
use std::fmt;

/// Size of one voice in the YMF825 tone table (2 global + 4 x 7 operator bytes)
pub const YMF825_TONE_BYTES: usize = 30;

/// Size of a VM3 exclusive voice before bit relocation
const VM3_EXCLUSIVE_RAW_BYTES: usize = 4 + 8 * 4;

bitflags! {
    /// Envelope flags in operator byte 0
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EnvelopeFlags: u8 {
        /// Ignore key off
        const XOF = 0x08;
        /// Keep sustain rate after key off
        const SUS = 0x02;
        /// Key scaling rate
        const KSR = 0x01;
    }
}

bitflags! {
    /// Modulation enable flags in operator byte 4
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ModulationFlags: u8 {
        /// Enable amplitude modulation
        const EAM = 0x10;
        /// Enable vibrato
        const EVB = 0x01;
    }
}

/// Byte layout a VM3/VM5 voice was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Vm35FmVersion {
    /// MA-3 voice library record (always 4 operators stored)
    Vm3Lib,
    /// MA-3 voice exclusive with relocated high bits
    Vm3Exclusive,
    /// MA-5 voice (only used operators stored)
    Vm5,
}

/// One VM3/VM5 FM operator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Vm35FmOperator {
    /// Multiplier
    pub multi: u8,
    /// Detune
    pub dt: u8,
    /// Attack rate
    pub ar: u8,
    /// Decay rate
    pub dr: u8,
    /// Sustain rate
    pub sr: u8,
    /// Release rate
    pub rr: u8,
    /// Sustain level
    pub sl: u8,
    /// Total level
    pub tl: u8,
    /// Key scaling level
    pub ksl: u8,
    /// Depth of AM
    pub dam: u8,
    /// Depth of vibrato
    pub dvb: u8,
    /// Feedback
    pub fb: u8,
    /// Wave shape
    pub ws: u8,
    /// Ignore key off
    pub xof: bool,
    /// Keep sustain rate after key off (unused by the YMF825)
    pub sus: bool,
    /// Key scaling rate
    pub ksr: bool,
    /// Enable AM
    pub eam: bool,
    /// Enable vibrato
    pub evb: bool,
}

impl Vm35FmOperator {
    //    | 7 | 6 | 5 | 4 | 3 | 2 | 1 | 0 |
    // +0 |      S R      |XOF| - |SUS|KSR|
    // +1 |      R R      |      D R      |
    // +2 |      A R      |      S L      |
    // +3 |          T L          |  KSL  |
    // +4 | - |  DAM  |EAM| - |  DVB  |EVB|
    // +5 |     MULTI     | - |    D T    |
    // +6 |        W S        |    F B    |

    /// Decode the 7-byte operator layout
    pub fn from_bytes(data: [u8; 7]) -> Self {
        let eg = EnvelopeFlags::from_bits_truncate(data[0]);
        let modulation = ModulationFlags::from_bits_truncate(data[4]);
        Vm35FmOperator {
            sr: data[0] >> 4,
            xof: eg.contains(EnvelopeFlags::XOF),
            sus: eg.contains(EnvelopeFlags::SUS),
            ksr: eg.contains(EnvelopeFlags::KSR),
            rr: data[1] >> 4,
            dr: data[1] & 15,
            ar: data[2] >> 4,
            sl: data[2] & 15,
            tl: data[3] >> 2,
            ksl: data[3] & 3,
            dam: (data[4] >> 5) & 3,
            eam: modulation.contains(ModulationFlags::EAM),
            dvb: (data[4] >> 1) & 3,
            evb: modulation.contains(ModulationFlags::EVB),
            multi: data[5] >> 4,
            dt: data[5] & 7,
            ws: data[6] >> 3,
            fb: data[6] & 7,
        }
    }

    fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self::from_bytes(reader.read_array::<7>()?))
    }

    /// Encode the 7-byte operator layout.
    ///
    /// For the YMF825 the SUS flag is cleared and reserved wave shapes are
    /// reported with a warning.
    pub fn to_bytes(&self, for_ymf825: bool) -> [u8; 7] {
        let ws = self.ws & 31;
        let mut eg = EnvelopeFlags::empty();
        eg.set(EnvelopeFlags::XOF, self.xof);
        eg.set(EnvelopeFlags::SUS, self.sus && !for_ymf825);
        eg.set(EnvelopeFlags::KSR, self.ksr);
        if for_ymf825 && (ws == 15 || ws == 23 || ws >= 31) {
            log::warn!("Invalid wave shape {ws}");
        }
        let mut modulation = ModulationFlags::empty();
        modulation.set(ModulationFlags::EAM, self.eam);
        modulation.set(ModulationFlags::EVB, self.evb);
        [
            (self.sr & 15) << 4 | eg.bits(),
            (self.rr & 15) << 4 | (self.dr & 15),
            (self.ar & 15) << 4 | (self.sl & 15),
            (self.tl & 63) << 2 | (self.ksl & 3),
            (self.dam & 3) << 5 | (self.dvb & 3) << 1 | modulation.bits(),
            (self.multi & 15) << 4 | (self.dt & 7),
            ws << 3 | (self.fb & 7),
        ]
    }
}

impl fmt::Display for Vm35FmOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut t = vec![
            format!("ADSR={},{},{},{}", self.ar, self.dr, self.sr, self.rr),
            format!("SL={}", self.sl),
            format!("TL={}", self.tl),
            format!("KSL={}", self.ksl),
            format!("FB={}", self.fb),
            format!("WS={}", self.ws),
        ];
        if self.eam {
            t.push(format!("AM={}", self.dam));
        }
        if self.evb {
            t.push(format!("VB={}", self.dvb));
        }
        for (on, name) in [(self.xof, "XOF"), (self.sus, "SUS"), (self.ksr, "KSR")] {
            if on {
                t.push(name.to_string());
            }
        }
        write!(f, "MULTI={} DT={}\n{}", self.multi, self.dt, indent(&t.join(" ")))
    }
}

/// MA-3/MA-5 FM voice
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Vm35FmVoice {
    /// Layout the voice was read from
    #[serde(skip)]
    pub version: Vm35FmVersion,
    /// Note played when this voice is used as a drum
    pub drum_key: u8,
    /// Panpot (unused by the YMF825)
    pub panpot: u8,
    /// Basic octave
    pub bo: u8,
    /// LFO frequency
    pub lfo: u8,
    /// Panpot enable (unused by the YMF825)
    pub pe: bool,
    /// Algorithm (0-7)
    pub alg: u8,
    /// Operators; only the first [`Vm35FmVoice::operator_count`] are meaningful
    pub operators: [Vm35FmOperator; 4],
}

impl Vm35FmVoice {
    /// Parse a complete voice body; every byte must be consumed
    pub fn parse(data: &[u8], version: Vm35FmVersion) -> Result<Self> {
        let voice = match version {
            Vm35FmVersion::Vm3Exclusive => {
                if data.len() != VM3_EXCLUSIVE_RAW_BYTES {
                    return Err(Smaf825Error::InvalidVoice(format!(
                        "Wrong size of VM3 exclusive voice data (want {VM3_EXCLUSIVE_RAW_BYTES}, got {} bytes): {}",
                        data.len(),
                        hex(data)
                    )));
                }
                let fixed = relocate_vm3_exclusive(data);
                let mut reader = ByteReader::new(&fixed);
                Self::read(&mut reader, version, true)?
            }
            Vm35FmVersion::Vm3Lib | Vm35FmVersion::Vm5 => {
                let mut reader = ByteReader::new(data);
                let voice = Self::read(&mut reader, version, version == Vm35FmVersion::Vm3Lib)
                    .map_err(|e| {
                        Smaf825Error::InvalidVoice(format!(
                            "{e}: {} (got {} bytes)",
                            hex(data),
                            data.len()
                        ))
                    })?;
                if !reader.is_empty() {
                    return Err(Smaf825Error::InvalidVoice(format!(
                        "Wrong size of VM3/VM5 voice data (want {}, got {} bytes): {}",
                        reader.position(),
                        data.len(),
                        hex(data)
                    )));
                }
                voice
            }
        };
        Ok(voice)
    }

    /// Read the global bytes and the used operators; with `all_operators`
    /// the unused trailing operators are read as well.
    pub(crate) fn read(
        reader: &mut ByteReader<'_>,
        version: Vm35FmVersion,
        all_operators: bool,
    ) -> Result<Self> {
        //          | 7 | 6 | 5 | 4 | 3 | 2 | 1 | 0 |
        // Global+0 |            DrumKey            |
        // Global+1 |       PANPOT      | - |  B O  |
        // Global+2 |  LFO  |PE |   -   |    ALG    |
        let global = reader.read_array::<3>()?;
        let alg = global[2] & 7;
        let count = if all_operators {
            4
        } else {
            operator_count(alg)
        };
        let mut operators = [Vm35FmOperator::default(); 4];
        for op in operators.iter_mut().take(count) {
            *op = Vm35FmOperator::read(reader)?;
        }
        Ok(Vm35FmVoice {
            version,
            drum_key: global[0],
            panpot: global[1] >> 3,
            bo: global[1] & 3,
            lfo: (global[2] >> 6) & 3,
            pe: global[2] & 0x20 != 0,
            alg,
            operators,
        })
    }

    /// Number of operators the algorithm uses
    pub fn operator_count(&self) -> usize {
        operator_count(self.alg)
    }

    /// Encode as 2 global bytes plus operators.
    ///
    /// `static_len` always emits 4 operators; `for_ymf825` clears the panpot,
    /// PE and SUS fields the chip does not use.
    pub fn to_bytes(&self, static_len: bool, for_ymf825: bool) -> Vec<u8> {
        let (pan, pe) = if for_ymf825 {
            (0, false)
        } else {
            (self.panpot, self.pe)
        };
        let mut out = vec![
            (pan & 31) << 3 | (self.bo & 3),
            (self.lfo & 3) << 6 | if pe { 0x20 } else { 0 } | (self.alg & 7),
        ];
        let count = if static_len { 4 } else { self.operator_count() };
        for op in &self.operators[..count] {
            out.extend(op.to_bytes(for_ymf825));
        }
        out
    }
}

/// Move the high bits stored in the spare bytes of a VM3 exclusive voice back
/// into their fields, producing the plain 31-byte VM3 layout
fn relocate_vm3_exclusive(data: &[u8]) -> Vec<u8> {
    let mut raw = data.to_vec();
    raw[2] |= (raw[0] << 2) & 0x80;
    raw[3] |= (raw[0] << 3) & 0x80;
    for op in 0..4 {
        let b = op * 8;
        raw[4 + b] |= (raw[b] << 4) & 0x80;
        raw[5 + b] |= (raw[b] << 5) & 0x80;
        raw[6 + b] |= (raw[b] << 6) & 0x80;
        raw[7 + b] |= (raw[b] << 7) & 0x80;
        raw[10 + b] |= (raw[8 + b] << 2) & 0x80;
        raw[11 + b] |= (raw[8 + b] << 3) & 0x80;
    }
    let mut fixed = raw[1..4].to_vec();
    for op in 0..4 {
        let b = op * 8;
        fixed.extend_from_slice(&raw[4 + b..8 + b]);
        fixed.extend_from_slice(&raw[9 + b..12 + b]);
    }
    fixed
}

impl fmt::Display for Vm35FmVoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DrumKey={} PANPOT={} LFO={} PE={} ALG={}",
            note_name(i32::from(self.drum_key)),
            self.panpot,
            self.lfo,
            self.pe,
            self.alg
        )?;
        for (i, op) in self.operators[..self.operator_count()].iter().enumerate() {
            write!(f, "\nOp #{}: {op}", i + 1)?;
        }
        write!(f, "\nRaw={}", hex(&self.to_bytes(false, false)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OP: [u8; 7] = [0x8B, 0x84, 0xF8, 0x41, 0x33, 0x15, 0x3E];

    #[test]
    fn test_operator_fields() {
        let op = Vm35FmOperator::from_bytes(OP);
        assert_eq!(op.sr, 8);
        assert!(op.xof);
        assert!(op.sus);
        assert!(op.ksr);
        assert_eq!((op.rr, op.dr), (8, 4));
        assert_eq!((op.ar, op.sl), (15, 8));
        assert_eq!((op.tl, op.ksl), (16, 1));
        assert_eq!(op.dam, 1);
        assert!(op.eam);
        assert_eq!(op.dvb, 1);
        assert!(op.evb);
        assert_eq!((op.multi, op.dt), (1, 5));
        assert_eq!((op.ws, op.fb), (7, 6));
        assert_eq!(op.to_bytes(false), OP);
    }

    #[test]
    fn test_ymf825_encoding_clears_sus() {
        let op = Vm35FmOperator::from_bytes(OP);
        assert_eq!(op.to_bytes(true)[0], 0x89);
    }

    #[test]
    fn test_vm5_two_operator_voice() {
        let mut data = vec![0x3C, 0x79, 0x21];
        data.extend(OP);
        data.extend(OP);
        let voice = Vm35FmVoice::parse(&data, Vm35FmVersion::Vm5).unwrap();
        assert_eq!(voice.drum_key, 0x3C);
        assert_eq!(voice.panpot, 15);
        assert_eq!(voice.bo, 1);
        assert!(voice.pe);
        assert_eq!(voice.alg, 1);
        assert_eq!(voice.operators[2], Vm35FmOperator::default());

        let tone = voice.to_bytes(true, true);
        assert_eq!(tone.len(), YMF825_TONE_BYTES);
        assert_eq!(tone[0], 0x01);
        assert_eq!(tone[1], 0x01);
        assert_eq!(voice.to_bytes(false, false)[..2], [0x79, 0x21]);
    }

    #[test]
    fn test_vm5_rejects_leftover() {
        let mut data = vec![0x00, 0x00, 0x01];
        data.extend(OP);
        data.extend(OP);
        data.push(0);
        assert!(matches!(
            Vm35FmVoice::parse(&data, Vm35FmVersion::Vm5),
            Err(Smaf825Error::InvalidVoice(_))
        ));
    }

    #[test]
    fn test_vm3_lib_reads_all_operators() {
        let mut data = vec![0x00, 0x00, 0x00];
        for _ in 0..4 {
            data.extend(OP);
        }
        let voice = Vm35FmVoice::parse(&data, Vm35FmVersion::Vm3Lib).unwrap();
        assert_eq!(voice.operators[3], Vm35FmOperator::from_bytes(OP));
        assert!(Vm35FmVoice::parse(&data[..17], Vm35FmVersion::Vm3Lib).is_err());
    }

    #[test]
    fn test_vm3_exclusive_bit_relocation() {
        let mut raw = [0u8; 36];
        raw[0] = 0x3F; // PN4, LF1, then op0 SR3 RR3 AR3 TL5
        raw[3] = 0x04; // alg 4
        raw[4] = 0x70; // op0 SR012
        raw[8] = 0x30; // op0 ML3, WS4
        raw[10] = 0x10; // op0 MUL012 = 1
        let voice = Vm35FmVoice::parse(&raw, Vm35FmVersion::Vm3Exclusive).unwrap();
        assert_eq!(voice.panpot, 16);
        assert_eq!(voice.lfo, 2);
        assert_eq!(voice.alg, 4);
        let op = voice.operators[0];
        assert_eq!(op.sr, 15);
        assert_eq!(op.rr, 8);
        assert_eq!(op.ar, 8);
        assert_eq!(op.tl, 32);
        assert_eq!(op.multi, 9);
        assert_eq!(op.ws, 16);

        assert!(Vm35FmVoice::parse(&raw[..35], Vm35FmVersion::Vm3Exclusive).is_err());
    }
}
