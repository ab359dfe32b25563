//! VMA (MA-2) FM voices

use super::vm35::{Vm35FmOperator, Vm35FmVersion, Vm35FmVoice};
use crate::enums::operator_count;
use crate::util::{hex, indent, ByteReader};
use crate::{Result, Smaf825Error};
use serde::Serialize;
use std::fmt;

/// One VMA FM operator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VmaFmOperator {
    /// Multiplier
    pub mult: u8,
    /// Key scaling level
    pub ksl: u8,
    /// Total level
    pub tl: u8,
    /// Attack rate
    pub ar: u8,
    /// Decay rate
    pub dr: u8,
    /// Sustain level
    pub sl: u8,
    /// Release rate
    pub rr: u8,
    /// Wave shape
    pub ws: u8,
    /// Depth of vibrato
    pub dvb: u8,
    /// Depth of AM
    pub dam: u8,
    /// Vibrato
    pub vib: bool,
    /// Envelope generator type (sustained when set)
    pub egt: bool,
    /// Keep sustain rate after key off
    pub sus: bool,
    /// Key scaling rate
    pub ksr: bool,
    /// Amplitude modulation
    pub am: bool,
}

impl VmaFmOperator {
    //    | 7 | 6 | 5 | 4 | 3 | 2 | 1 | 0 |
    // +0 |     MULT      |VIB|EGT|SUS|KSR|
    // +1 |      R R      |      D R      |
    // +2 |      A R      |      S L      |
    // +3 |          T L          |  KSL  |
    // +4 |  DVB  |  DAM  |A M|    W S    |

    /// Decode the 5-byte operator layout
    pub fn from_bytes(data: [u8; 5]) -> Self {
        VmaFmOperator {
            mult: data[0] >> 4,
            vib: data[0] & 0x08 != 0,
            egt: data[0] & 0x04 != 0,
            sus: data[0] & 0x02 != 0,
            ksr: data[0] & 0x01 != 0,
            rr: data[1] >> 4,
            dr: data[1] & 15,
            ar: data[2] >> 4,
            sl: data[2] & 15,
            tl: data[3] >> 2,
            ksl: data[3] & 3,
            dvb: (data[4] >> 6) & 3,
            dam: (data[4] >> 4) & 3,
            am: data[4] & 0x08 != 0,
            ws: data[4] & 7,
        }
    }

    /// Encode the 5-byte operator layout
    pub fn to_bytes(&self) -> [u8; 5] {
        let flag = |on: bool, bit: u8| if on { bit } else { 0 };
        [
            (self.mult & 15) << 4
                | flag(self.vib, 0x08)
                | flag(self.egt, 0x04)
                | flag(self.sus, 0x02)
                | flag(self.ksr, 0x01),
            (self.rr & 15) << 4 | (self.dr & 15),
            (self.ar & 15) << 4 | (self.sl & 15),
            (self.tl & 63) << 2 | (self.ksl & 3),
            (self.dvb & 3) << 6 | (self.dam & 3) << 4 | flag(self.am, 0x08) | (self.ws & 7),
        ]
    }

    /// Convert to a VM3/VM5 operator with the given feedback
    pub fn to_vm35(&self, fb: u8) -> Vm35FmOperator {
        Vm35FmOperator {
            multi: self.mult,
            dt: 0,
            ar: self.ar,
            dr: self.dr,
            sr: if self.egt { 0 } else { self.rr },
            rr: self.rr,
            sl: self.sl,
            tl: self.tl,
            ksl: self.ksl,
            dam: self.dam,
            dvb: self.dvb,
            fb,
            ws: self.ws,
            xof: false,
            sus: self.sus,
            ksr: self.ksr,
            eam: self.am,
            evb: self.vib,
        }
    }
}

impl fmt::Display for VmaFmOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut t = vec![
            format!("ADR={},{},{}", self.ar, self.dr, self.rr),
            format!("SL={}", self.sl),
            format!("TL={}", self.tl),
            format!("KSL={}", self.ksl),
            format!("WS={}", self.ws),
        ];
        if self.am {
            t.push(format!("AM={}", self.dam));
        }
        if self.vib {
            t.push(format!("VB={}", self.dvb));
        }
        for (on, name) in [(self.egt, "EGT"), (self.sus, "SUS"), (self.ksr, "KSR")] {
            if on {
                t.push(name.to_string());
            }
        }
        write!(f, "MULT={}\n{}", self.mult, indent(&t.join(" ")))
    }
}

/// MA-2 FM voice
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VmaFmVoice {
    /// LFO frequency
    pub lfo: u8,
    /// Feedback of the first operator
    pub fb: u8,
    /// Algorithm (0-7)
    pub alg: u8,
    /// Operators; only the first [`VmaFmVoice::operator_count`] are meaningful
    pub operators: [VmaFmOperator; 4],
}

impl VmaFmVoice {
    /// Parse a voice body.
    ///
    /// The unused operators of a 2-operator voice may be present or absent;
    /// any other leftover byte count is an error.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);
        let mut voice = Self::read(&mut reader, false)?;
        if !reader.is_empty() {
            voice.read_unused_rest(&mut reader)?;
        }
        if !reader.is_empty() {
            return Err(Smaf825Error::InvalidVoice(format!(
                "Wrong size of VMA voice data (want {}, got {}): {}",
                reader.position(),
                data.len(),
                hex(data)
            )));
        }
        Ok(voice)
    }

    /// Read the 2 global bytes and the used operators; with `all_operators`
    /// the unused trailing operators are read as well
    pub(crate) fn read(reader: &mut ByteReader<'_>, all_operators: bool) -> Result<Self> {
        //    | 7 | 6 | 5 | 4 | 3 | 2 | 1 | 0 |
        // +0 |  LFO  |    F B    |    ALG    |
        // +1 |              01?              |
        let global = reader.read_array::<2>()?;
        let mut voice = VmaFmVoice {
            lfo: (global[0] >> 6) & 3,
            fb: (global[0] >> 3) & 7,
            alg: global[0] & 7,
            operators: [VmaFmOperator::default(); 4],
        };
        for op in voice.operators.iter_mut().take(operator_count(voice.alg)) {
            *op = VmaFmOperator::from_bytes(reader.read_array::<5>()?);
        }
        if all_operators {
            voice.read_unused_rest(reader)?;
        }
        Ok(voice)
    }

    fn read_unused_rest(&mut self, reader: &mut ByteReader<'_>) -> Result<()> {
        for op in self.operators.iter_mut().skip(operator_count(self.alg)) {
            *op = VmaFmOperator::from_bytes(reader.read_array::<5>()?);
        }
        Ok(())
    }

    /// Number of operators the algorithm uses
    pub fn operator_count(&self) -> usize {
        operator_count(self.alg)
    }

    /// Encode as 2 global bytes plus operators
    pub fn to_bytes(&self, static_len: bool) -> Vec<u8> {
        let mut out = vec![
            (self.lfo & 3) << 6 | (self.fb & 7) << 3 | (self.alg & 7),
            1,
        ];
        let count = if static_len { 4 } else { self.operator_count() };
        for op in &self.operators[..count] {
            out.extend(op.to_bytes());
        }
        out
    }

    /// Convert to a VM3/VM5 voice; feedback moves onto the first operator
    pub fn to_vm35(&self) -> Vm35FmVoice {
        let mut operators = [Vm35FmOperator::default(); 4];
        for (i, (dst, src)) in operators.iter_mut().zip(&self.operators).enumerate() {
            *dst = src.to_vm35(if i == 0 { self.fb } else { 0 });
        }
        Vm35FmVoice {
            version: Vm35FmVersion::Vm3Lib,
            drum_key: 0,
            panpot: 15,
            bo: 1,
            lfo: self.lfo,
            pe: false,
            alg: self.alg,
            operators,
        }
    }
}

impl fmt::Display for VmaFmVoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LFO={} FB={} ALG={}", self.lfo, self.fb, self.alg)?;
        for (i, op) in self.operators[..self.operator_count()].iter().enumerate() {
            write!(f, "\nOp #{}: {op}", i + 1)?;
        }
        write!(f, "\nRaw={}", hex(&self.to_bytes(false)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OP: [u8; 5] = [0x1D, 0x52, 0xF4, 0x11, 0x9B];

    #[test]
    fn test_operator_fields() {
        let op = VmaFmOperator::from_bytes(OP);
        assert_eq!(op.mult, 1);
        assert!(op.vib);
        assert!(op.egt);
        assert!(!op.sus);
        assert!(op.ksr);
        assert_eq!((op.rr, op.dr, op.ar, op.sl), (5, 2, 15, 4));
        assert_eq!((op.tl, op.ksl), (4, 1));
        assert_eq!((op.dvb, op.dam), (2, 1));
        assert!(op.am);
        assert_eq!(op.ws, 3);
        assert_eq!(op.to_bytes(), OP);
    }

    #[test]
    fn test_two_operator_voice_with_and_without_padding() {
        let mut short = vec![0x48, 0x01]; // lfo 1, fb 1, alg 0
        short.extend(OP);
        short.extend(OP);
        let voice = VmaFmVoice::parse(&short).unwrap();
        assert_eq!(voice.lfo, 1);
        assert_eq!(voice.fb, 1);
        assert_eq!(voice.operators[2], VmaFmOperator::default());

        let mut padded = short.clone();
        padded.extend([0u8; 10]);
        assert!(VmaFmVoice::parse(&padded).is_ok());

        let mut odd = short;
        odd.extend([0u8; 3]);
        assert!(VmaFmVoice::parse(&odd).is_err());
    }

    #[test]
    fn test_to_vm35() {
        let mut data = vec![0x2C, 0x01]; // fb 5, alg 4
        for _ in 0..4 {
            data.extend(OP);
        }
        let vm35 = VmaFmVoice::parse(&data).unwrap().to_vm35();
        assert_eq!(vm35.panpot, 15);
        assert_eq!(vm35.bo, 1);
        assert_eq!(vm35.drum_key, 0);
        assert!(!vm35.pe);
        assert_eq!(vm35.alg, 4);
        assert_eq!(vm35.operators[0].fb, 5);
        assert_eq!(vm35.operators[1].fb, 0);
        // EGT set -> sustain rate 0
        assert_eq!(vm35.operators[0].sr, 0);
        assert_eq!(vm35.operators[0].rr, 5);
        assert!(vm35.operators[0].eam);
        assert!(vm35.operators[0].evb);
        assert_eq!(vm35.operators[0].dt, 0);
    }
}
