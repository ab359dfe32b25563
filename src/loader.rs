//! File Loader
//!
//! Reads SMAF songs and voice libraries from disk, choosing the decoder from
//! the file extension.

use crate::chunk::FileChunk;
use crate::voice::VoiceLibrary;
use crate::{Result, Smaf825Error};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::Path;

/// Anything the loader can decode
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LoadedFile {
    /// `.mmf` / `.spf` chunk tree
    Smaf(FileChunk),
    /// `.vma` / `.vm3` / `.vm5` library
    VoiceLibrary(VoiceLibrary),
}

impl fmt::Display for LoadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadedFile::Smaf(file) => fmt::Display::fmt(file, f),
            LoadedFile::VoiceLibrary(lib) => fmt::Display::fmt(lib, f),
        }
    }
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path)
        .map_err(|e| format!("Failed to read file '{}': {}", path.display(), e).into())
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

/// Load a song or a voice library
pub fn load_file(path: impl AsRef<Path>) -> Result<LoadedFile> {
    let path = path.as_ref();
    match extension(path).as_str() {
        "mmf" | "spf" => Ok(LoadedFile::Smaf(FileChunk::parse(&read(path)?)?)),
        "vma" | "vm3" | "vm5" => load_voice_library(path).map(LoadedFile::VoiceLibrary),
        _ => Err(Smaf825Error::ConfigError(format!(
            "Unknown file extension: {}",
            path.display()
        ))),
    }
}

/// Load a voice library and check that its signature matches the extension
pub fn load_voice_library(path: impl AsRef<Path>) -> Result<VoiceLibrary> {
    let path = path.as_ref();
    let library = VoiceLibrary::parse(&read(path)?)?;
    let matches = matches!(
        (extension(path).as_str(), &library),
        ("vma", VoiceLibrary::Vma(_))
            | ("vm3", VoiceLibrary::Vm3(_))
            | ("vm5", VoiceLibrary::Vm5(_))
    );
    if !matches {
        return Err(Smaf825Error::ParseError(format!(
            "{}: library signature does not match the file extension",
            path.display()
        )));
    }
    log::debug!("{} programs in {}", library.len(), path.display());
    Ok(library)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_extension() {
        assert!(matches!(
            load_file("song.mid"),
            Err(Smaf825Error::ConfigError(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_file("/nonexistent/song.MMF"),
            Err(Smaf825Error::Other(_))
        ));
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        assert_eq!(extension(Path::new("a/B.VM5")), "vm5");
        assert_eq!(extension(Path::new("noext")), "");
    }
}
