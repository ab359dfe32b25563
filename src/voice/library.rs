//! Voice library files

use super::program::{Vm35VoicePc, VmaVoicePc};
use super::vm35::Vm35FmVersion;
use crate::util::{zero_padded_string, ByteReader};
use crate::{Result, Smaf825Error};
use serde::Serialize;
use std::fmt;

/// Programs stored in one library
const MAX_PROGRAMS: usize = 128;

/// A parsed voice library file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "format", content = "programs")]
pub enum VoiceLibrary {
    /// MA-3 library (`FMM3`)
    Vm3(Vec<Vm35VoicePc>),
    /// MA-5 library (`VOM5`)
    Vm5(Vec<Vm35VoicePc>),
    /// MA-2 library (`FM  `)
    Vma(Vec<VmaVoicePc>),
}

impl VoiceLibrary {
    /// Parse a library file, choosing the layout from its signature.
    ///
    /// Errors carry the absolute offset reached when parsing stopped.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(data);
        let signature = reader.read_array::<4>()?;
        let size = reader.read_u32_be()? as usize;
        let mut body = reader.sub_reader(size.min(reader.remaining()))?;

        let result = match &signature {
            b"FMM3" => read_vm35_records(&mut body, Vm35FmVersion::Vm3Lib).map(VoiceLibrary::Vm3),
            b"VOM5" => read_vm35_records(&mut body, Vm35FmVersion::Vm5).map(VoiceLibrary::Vm5),
            b"FM  " => read_vma_records(&mut body).map(VoiceLibrary::Vma),
            other => {
                return Err(Smaf825Error::ParseError(format!(
                    "Unknown voice library signature \"{}\"",
                    String::from_utf8_lossy(other)
                )))
            }
        };
        result.map_err(|e| Smaf825Error::ParseError(format!("{e} at 0x{:X} bytes", body.offset())))
    }

    /// Number of programs
    pub fn len(&self) -> usize {
        match self {
            VoiceLibrary::Vm3(p) | VoiceLibrary::Vm5(p) => p.len(),
            VoiceLibrary::Vma(p) => p.len(),
        }
    }

    /// True when the library holds no programs
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn read_vm35_records(body: &mut ByteReader<'_>, version: Vm35FmVersion) -> Result<Vec<Vm35VoicePc>> {
    let mut programs = Vec::new();
    while programs.len() < MAX_PROGRAMS && !body.is_empty() {
        programs.push(Vm35VoicePc::read_library_record(body, version)?);
    }
    Ok(programs)
}

fn read_vma_records(body: &mut ByteReader<'_>) -> Result<Vec<VmaVoicePc>> {
    let mut names = Vec::new();
    while names.len() < MAX_PROGRAMS && !body.is_empty() {
        names.push(zero_padded_string(body.read_bytes(16)?));
    }
    let mut programs = Vec::with_capacity(names.len());
    for name in names {
        if body.is_empty() {
            break;
        }
        programs.push(VmaVoicePc::read_library_body(body, name)?);
    }
    Ok(programs)
}

impl fmt::Display for VoiceLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines: Vec<String> = match self {
            VoiceLibrary::Vm3(p) | VoiceLibrary::Vm5(p) => p.iter().map(|v| v.to_string()).collect(),
            VoiceLibrary::Vma(p) => p.iter().map(|v| v.to_string()).collect(),
        };
        f.write_str(&lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library(sig: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = sig.to_vec();
        out.extend((body.len() as u32).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    fn vm5_record(pc: u8) -> Vec<u8> {
        let mut r = vec![0x00, 0x00];
        r.extend([0u8; 16]);
        r.extend([0x24, 0x7C, 0x00, pc, 0x00, 0x00]);
        r.extend([0u8; 31]);
        r
    }

    #[test]
    fn test_vom5_library() {
        let mut body = vm5_record(0);
        body.extend(vm5_record(1));
        let lib = VoiceLibrary::parse(&library(b"VOM5", &body)).unwrap();
        let VoiceLibrary::Vm5(programs) = lib else {
            panic!("expected VM5 library");
        };
        assert_eq!(programs.len(), 2);
        assert_eq!(programs[1].pc, 1);
    }

    #[test]
    fn test_truncated_record_reports_offset() {
        let body = vm5_record(0);
        let err = VoiceLibrary::parse(&library(b"VOM5", &body[..40])).unwrap_err();
        assert!(err.to_string().contains("bytes"));
    }

    #[test]
    fn test_vma_library_does_not_duplicate_programs() {
        let mut body = Vec::new();
        body.extend(b"Piano\0\0\0\0\0\0\0\0\0\0\0");
        body.extend(b"Organ\0\0\0\0\0\0\0\0\0\0\0");
        for pc in 0..2u8 {
            body.extend([0x00, 0x00, pc]);
            body.extend([0x04, 0x01]);
            body.extend([0u8; 20]);
            body.push(0x00);
        }
        // Bodies are read only after 128 names; pad the name table
        let mut padded = body[..32].to_vec();
        padded.extend(std::iter::repeat(0u8).take(16 * 126));
        padded.extend_from_slice(&body[32..]);

        let lib = VoiceLibrary::parse(&library(b"FM  ", &padded)).unwrap();
        let VoiceLibrary::Vma(programs) = lib else {
            panic!("expected VMA library");
        };
        assert_eq!(programs.len(), 2);
        assert_eq!(programs[0].name, "Piano");
        assert_eq!(programs[1].name, "Organ");
        assert_eq!(programs[1].pc, 1);
    }

    #[test]
    fn test_unknown_signature() {
        assert!(VoiceLibrary::parse(&library(b"ABCD", &[])).is_err());
    }
}
