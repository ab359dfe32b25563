//! SMAF Player for the YMF825 FM Sound Chip
//!
//! Loads Yamaha SMAF mobile-music containers (`.mmf`, `.spf`), decodes their
//! FM voices and note events, and plays them in real time on a YMF825 board
//! attached through a serial bridge microcontroller.
//!
//! # Features
//! - Recursive chunk-tree parser with CRC-16/CCITT trailer check
//! - Handy Phone Standard, Mobile Standard (plain and Huffman-compressed) and
//!   SEQU event grammars
//! - VM3/VM5 and VMA FM voice dialects, including voice library files
//! - Tick-driven sequencer with drum channel splitting across idle channels
//! - Credit-flow-controlled command transport with startup handshake
//!
//! # Crate feature flags
//! - `serial` (default): real serial port backend (`serialport`)
//! - `cli` (default): the `smaf825` binary (`play` / `dump`)
//!
//! # Quick start
//! ## Inspect a file
//! ```no_run
//! use smaf825::FileChunk;
//! let data = std::fs::read("song.mmf").unwrap();
//! let file = FileChunk::parse(&data).unwrap();
//! println!("{file}");
//! ```
//!
//! ## Play on a device
//! ```no_run
//! # #[cfg(feature = "serial")]
//! # {
//! use smaf825::{CommandTransport, FileChunk, PlayOptions, Sequencer};
//! let file = FileChunk::parse(&std::fs::read("song.mmf").unwrap()).unwrap();
//! let options = PlayOptions::default();
//! let mut transport = CommandTransport::open("/dev/ttyUSB0", options.baud_rate).unwrap();
//! let (_stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
//! Sequencer::new().play(&file, &mut transport, &options, &stop_rx).unwrap();
//! # }
//! ```

#![warn(missing_docs)]

pub mod chunk; // Container Parsing
pub mod enums; // Shared Enumerations
pub mod event; // Event Grammars
pub mod exclusive; // Vendor Exclusive Messages
pub mod huffman; // Compressed Sequence Decoding
pub mod loader; // File I/O
pub mod sequencer; // Playback Engine
pub mod transport; // Serial Bridge Protocol
pub mod util; // Byte Helpers
pub mod voice; // FM Voice Dialects

/// Error types for SMAF parsing and YMF825 playback
#[derive(thiserror::Error, Debug)]
pub enum Smaf825Error {
    /// Input ended before a field could be read
    #[error("Unexpected end of data at 0x{offset:X} (wanted {wanted} more bytes)")]
    Truncated {
        /// Absolute byte offset of the read
        offset: usize,
        /// Bytes that were requested
        wanted: usize,
    },

    /// Bytes consumed by a chunk differ from its declared size
    #[error("Size mismatch at 0x{offset:X} (declared {declared}, consumed {consumed})")]
    SizeMismatch {
        /// Absolute byte offset of the chunk
        offset: usize,
        /// Size from the chunk header
        declared: usize,
        /// Bytes actually consumed
        consumed: usize,
    },

    /// Unrecognized opcode in an event stream
    #[error("Invalid event {detail} at 0x{offset:X}")]
    InvalidEvent {
        /// Absolute byte offset of the opcode
        offset: usize,
        /// Offending bytes
        detail: String,
    },

    /// Huffman tree uses more than 511 nodes
    #[error("Invalid huffman table")]
    InvalidHuffmanTable,

    /// Score track format type outside the supported set
    #[error("Unsupported FormatType {0}")]
    UnsupportedFormat(u8),

    /// Malformed FM/PCM voice record
    #[error("Invalid voice data: {0}")]
    InvalidVoice(String),

    /// Error while parsing file format
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Error inside a nested chunk, located by signature and offsets
    #[error("Creating chunk {signature} at 0x{from:X} -> 0x{to:X}: {source}")]
    Chunk {
        /// Signature of the failing chunk
        signature: String,
        /// Absolute offset of the chunk header
        from: usize,
        /// Absolute offset just past the chunk payload
        to: usize,
        /// Underlying error
        source: Box<Smaf825Error>,
    },

    /// Bridge closed or misbehaved before the handshake completed
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// Bridge sketch version outside the accepted range
    #[error("sketch version mismatch (want {min} <= version < {max}, got {got}). please rewrite \"bridge/bridge.ino\" onto Arduino")]
    VersionMismatch {
        /// Version reported by the device
        got: u32,
        /// Lowest accepted version
        min: u32,
        /// First rejected version above the range
        max: u32,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// IO error from filesystem or device
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened or configured
    #[cfg(feature = "serial")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for Smaf825Error {
    /// Converts a String into `Smaf825Error::Other`.
    ///
    /// Prefer the specific variants (`ParseError`, `ConfigError`, ...) where the
    /// failure has a known category.
    fn from(msg: String) -> Self {
        Smaf825Error::Other(msg)
    }
}

impl From<&str> for Smaf825Error {
    /// Converts a string slice into `Smaf825Error::Other`.
    fn from(msg: &str) -> Self {
        Smaf825Error::Other(msg.to_string())
    }
}

/// Result type for SMAF operations
pub type Result<T> = std::result::Result<T, Smaf825Error>;

// Public API exports
pub use chunk::{Chunk, FileChunk, ScoreTrackChunk, SequenceDataChunk, Signature};
pub use event::{DurationEventPair, Event, EventContext};
pub use exclusive::Exclusive;
pub use huffman::decompress;
pub use loader::{load_file, load_voice_library, LoadedFile};
pub use sequencer::{
    ChannelAllocation, PlayOptions, PlaybackPhase, Sequencer, SequencerState, Synthesizer,
};
pub use transport::CommandTransport;
pub use voice::{Vm35FmVoice, Vm35VoicePc, VmaFmVoice, VmaVoicePc};
