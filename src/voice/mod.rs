//! FM Voice Dialects
//!
//! Voice definitions appear in three byte layouts:
//! - VM3/VM5 (MA-3/MA-5): 7 bytes per operator, converted 1:1 into YMF825 tone data
//! - VM3 exclusive: the VM3 layout with the high bits relocated into spare bytes
//! - VMA (MA-2): 5 bytes per operator, converted into VM3/VM5 before playback
//!
//! Voice library files (`FMM3`, `VOM5`, `FM  `) bundle up to 128 programs.

mod library;
mod program;
mod vm35;
mod vma;

pub use library::VoiceLibrary;
pub use program::{Vm35PcmVoice, Vm35Voice, Vm35VoicePc, VmaVoicePc};
pub use vm35::{Vm35FmOperator, Vm35FmVersion, Vm35FmVoice, YMF825_TONE_BYTES};
pub use vma::{VmaFmOperator, VmaFmVoice};
