//! Serial Bridge Protocol
//!
//! Sends YMF825 register writes to a microcontroller that forwards them over
//! SPI. The bridge announces free receive buffer space with `=N` lines; the
//! host never writes more than it has been granted.
//!
//! # Threads
//! - The caller queues commands without blocking.
//! - A flush thread owns the [`Outbox`] and drains it every 8 ms. Commands,
//!   credit and flush requests reach it through one channel.
//! - A reader thread parses status lines, forwards credit and completes the
//!   startup handshake (`version N` then `ready`).
//!
//! The device names `/dev/null` and `--` select a null transport that
//! accepts and drops every command.

mod command;
mod line;
mod outbox;

pub use command::{Command, MAX_WAIT_MS};
pub use line::DeviceLine;
pub use outbox::{Outbox, INITIAL_CREDIT};

use crate::enums::note_freq;
use crate::sequencer::Synthesizer;
use crate::voice::Vm35FmVoice;
use crate::{Result, Smaf825Error};
use crossbeam_channel::{select, Receiver, Sender};
use parking_lot::Mutex;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Lowest accepted bridge sketch version
pub const SKETCH_VERSION_MIN: u32 = 120;
/// First rejected bridge sketch version
pub const SKETCH_VERSION_MAX: u32 = 140;

const FLUSH_INTERVAL: Duration = Duration::from_millis(8);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
#[cfg(feature = "serial")]
const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Register addresses
mod reg {
    pub const ANALOG_GAIN: u8 = 3;
    pub const CONTENTS_DATA: u8 = 7;
    pub const SEQUENCER: u8 = 8;
    pub const SEQ_VOL: u8 = 9;
    pub const CHANNEL_SELECT: u8 = 11;
    pub const VO_VOL: u8 = 12;
    pub const FNUM_HI: u8 = 13;
    pub const FNUM_LO: u8 = 14;
    pub const KEY: u8 = 15;
    pub const CH_VOL: u8 = 16;
    pub const XVB: u8 = 17;
    pub const FINE_TUNE_HI: u8 = 18;
    pub const FINE_TUNE_LO: u8 = 19;
    pub const MASTER_VOL: u8 = 25;
}

const KEY_ON: u8 = 0x40;
const MUTE_AND_EG_RESET: u8 = 0x30;
const ALL_KEY_OFF: u8 = 0xF6;
const TONE_DATA_END: [u8; 4] = [0x80, 0x03, 0x81, 0x80];

/// True for device names that select the null transport
pub fn is_null_device(device: &str) -> bool {
    device == "/dev/null" || device == "--"
}

/// Lifecycle of the link to the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for `ready`; holds the version seen so far
    Connecting {
        /// Last `version N` line
        version: Option<u32>,
    },
    /// Handshake complete
    Ready {
        /// Sketch version reported by the bridge
        version: u32,
    },
    /// Dry run without a device
    Null,
    /// Closed, or the handshake failed
    Closed,
}

enum Message {
    Command(Command),
    Wait(u32),
    Credit(usize),
    Flush(Sender<bool>),
}

struct Link {
    tx: Sender<Message>,
    shutdown: Arc<AtomicBool>,
    flush_thread: Option<JoinHandle<()>>,
}

/// Command sink talking to the bridge over a byte stream
pub struct CommandTransport {
    link: Option<Link>,
    state: Arc<Mutex<ConnectionState>>,
    selected_channel: Option<u8>,
}

impl CommandTransport {
    /// Open `device` at `baud` and wait for the handshake.
    ///
    /// The port uses 8 data bits, even parity and one stop bit.
    pub fn open(device: &str, baud: u32) -> Result<Self> {
        if is_null_device(device) {
            return Ok(Self::null());
        }
        log::info!("opening serial port");
        Self::open_serial(device, baud)
    }

    #[cfg(feature = "serial")]
    fn open_serial(device: &str, baud: u32) -> Result<Self> {
        use serialport::{DataBits, Parity, StopBits};
        let port = serialport::new(device, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::Even)
            .stop_bits(StopBits::One)
            .timeout(READ_TIMEOUT)
            .open()?;
        let reader = port.try_clone()?;
        Self::with_io(reader, port)
    }

    #[cfg(not(feature = "serial"))]
    fn open_serial(device: &str, _baud: u32) -> Result<Self> {
        Err(Smaf825Error::ConfigError(format!(
            "cannot open {device}: built without serial port support"
        )))
    }

    /// Transport that drops every command
    pub fn null() -> Self {
        CommandTransport {
            link: None,
            state: Arc::new(Mutex::new(ConnectionState::Null)),
            selected_channel: None,
        }
    }

    /// Run the protocol over an arbitrary reader/writer pair and wait for the
    /// handshake
    pub fn with_io<R, W>(reader: R, writer: W) -> Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let state = Arc::new(Mutex::new(ConnectionState::Connecting { version: None }));
        let shutdown = Arc::new(AtomicBool::new(false));
        let (tx, rx) = crossbeam_channel::unbounded();
        let (handshake_tx, handshake_rx) = crossbeam_channel::bounded(1);

        {
            let state = Arc::clone(&state);
            let shutdown = Arc::clone(&shutdown);
            let tx = tx.clone();
            std::thread::spawn(move || read_loop(reader, state, shutdown, tx, handshake_tx));
        }
        let flush_thread = {
            let shutdown = Arc::clone(&shutdown);
            std::thread::spawn(move || flush_loop(writer, rx, shutdown))
        };

        let mut transport = CommandTransport {
            link: Some(Link {
                tx,
                shutdown,
                flush_thread: Some(flush_thread),
            }),
            state,
            selected_channel: None,
        };
        let handshake = handshake_rx
            .recv_timeout(HANDSHAKE_TIMEOUT)
            .unwrap_or_else(|_| {
                Err(Smaf825Error::Handshake(
                    "no ready line from device".to_string(),
                ))
            });
        if let Err(e) = handshake {
            transport.close();
            return Err(e);
        }
        Ok(transport)
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Stop the background threads. Unsent bytes are dropped.
    pub fn close(&mut self) {
        let Some(mut link) = self.link.take() else {
            return;
        };
        log::info!("closing serial port");
        link.shutdown.store(true, Ordering::SeqCst);
        drop(link.tx);
        if let Some(handle) = link.flush_thread.take() {
            let _ = handle.join();
        }
        *self.state.lock() = ConnectionState::Closed;
        log::info!("done");
    }

    fn post(&mut self, message: Message) {
        if let Some(link) = &self.link {
            let _ = link.tx.send(message);
        }
    }

    fn send(&mut self, addr: u8, value: u8) {
        self.post(Message::Command(Command::write(addr, value)));
    }

    fn select_channel(&mut self, channel: u8) {
        if self.selected_channel != Some(channel) {
            self.send(reg::CHANNEL_SELECT, channel & 15);
        }
        self.selected_channel = Some(channel);
    }

    fn send_freq(&mut self, note: i32, delta: f64) {
        let f = note_freq(note, delta);
        self.send(reg::FNUM_HI, ((f.fnum >> 7 & 7) as u8) << 3 | f.block & 7);
        self.send(reg::FNUM_LO, (f.fnum & 127) as u8);
    }

    /// Fine tune from a frequency ratio (1.0 = unchanged)
    pub fn send_fine_tune_ratio(&mut self, channel: u8, ratio: f64) {
        let r = ratio + 0.5 / 512.0;
        let integer = r.floor();
        let fraction = ((r - integer) * 512.0).floor();
        self.send_fine_tune(channel, integer as u8, fraction as u16);
    }
}

impl Synthesizer for CommandTransport {
    fn send_master_volume(&mut self, volume: u8) {
        self.send(reg::MASTER_VOL, volume << 2);
    }

    fn send_analog_gain(&mut self, gain: u8) {
        self.send(reg::ANALOG_GAIN, gain);
    }

    fn send_seq_vol(&mut self, volume: u8) {
        self.send(reg::SEQ_VOL, volume << 3);
    }

    fn send_all_off(&mut self) {
        self.send(reg::SEQUENCER, ALL_KEY_OFF);
        self.send_wait(1);
        self.send(reg::SEQUENCER, 0x00);
    }

    fn send_tones(&mut self, voices: &[Vm35FmVoice]) {
        log::debug!("sending {} tones", voices.len());
        let mut data = vec![0x80 + voices.len() as u8];
        for voice in voices {
            data.extend(voice.to_bytes(true, true));
        }
        data.extend(TONE_DATA_END);
        self.post(Message::Command(Command::write_all(
            reg::CONTENTS_DATA,
            data,
        )));
    }

    fn send_key_on(&mut self, channel: u8, note: i32, delta: f64, volume: u8, tone: usize) {
        self.select_channel(channel);
        self.send(reg::VO_VOL, (volume & 31) << 2);
        self.send_freq(note, delta);
        self.send(reg::KEY, KEY_ON | (tone & 15) as u8);
    }

    fn send_key_off(&mut self, channel: u8, tone: usize) {
        self.select_channel(channel);
        self.send(reg::KEY, (tone & 15) as u8);
    }

    fn send_pitch(&mut self, channel: u8, note: i32, delta: f64) {
        self.select_channel(channel);
        self.send_freq(note, delta);
    }

    fn send_volume(&mut self, channel: u8, volume: u8, direct: bool) {
        self.select_channel(channel);
        self.send(reg::CH_VOL, (volume & 31) << 2 | u8::from(direct));
    }

    fn send_vibrato(&mut self, channel: u8, vibrato: u8) {
        self.select_channel(channel);
        self.send(reg::XVB, vibrato & 7);
    }

    fn send_fine_tune(&mut self, channel: u8, integer: u8, fraction: u16) {
        self.select_channel(channel);
        self.send(
            reg::FINE_TUNE_HI,
            (integer & 3) << 3 | (fraction >> 6 & 7) as u8,
        );
        self.send(reg::FINE_TUNE_LO, ((fraction & 63) << 1) as u8);
    }

    fn send_mute_and_eg_reset(&mut self, channel: u8) {
        self.select_channel(channel);
        self.send(reg::KEY, MUTE_AND_EG_RESET);
    }

    fn send_wait(&mut self, ms: u32) {
        self.post(Message::Wait(ms));
    }

    fn send_terminate(&mut self) {
        self.post(Message::Command(Command::Terminate));
    }

    fn flush(&mut self) -> bool {
        let Some(link) = &self.link else {
            return true;
        };
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        if link.tx.send(Message::Flush(reply_tx)).is_err() {
            return true;
        }
        reply_rx.recv().unwrap_or(true)
    }
}

impl Drop for CommandTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn read_loop<R: Read>(
    reader: R,
    state: Arc<Mutex<ConnectionState>>,
    shutdown: Arc<AtomicBool>,
    tx: Sender<Message>,
    handshake: Sender<Result<()>>,
) {
    let mut reader = BufReader::with_capacity(2048, reader);
    let mut handshake = Some(handshake);
    let mut buf = Vec::new();
    while !shutdown.load(Ordering::SeqCst) {
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => {
                if let Some(done) = handshake.take() {
                    *state.lock() = ConnectionState::Closed;
                    let _ = done.send(Err(Smaf825Error::Handshake(
                        "device closed before ready".to_string(),
                    )));
                }
                log::debug!("serial port reached end of stream");
                return;
            }
            Ok(_) if buf.last() != Some(&b'\n') => continue,
            Ok(_) => {}
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                continue;
            }
            Err(e) => {
                log::warn!("Serial port error: {e}");
                continue;
            }
        }

        let text = String::from_utf8_lossy(&buf).into_owned();
        buf.clear();
        let Some(line) = DeviceLine::parse(&text) else {
            continue;
        };
        match line {
            DeviceLine::Credit(n) => {
                let _ = tx.send(Message::Credit(n));
                continue;
            }
            DeviceLine::Version(v) => {
                if let ConnectionState::Connecting { version } = &mut *state.lock() {
                    *version = Some(v);
                }
            }
            DeviceLine::Ready => {
                if let Some(done) = handshake.take() {
                    let _ = done.send(finish_handshake(&state));
                }
            }
            DeviceLine::Other(_) => {}
        }
        log::debug!("IN: {}", text.trim_end());
    }
}

fn finish_handshake(state: &Mutex<ConnectionState>) -> Result<()> {
    let mut state = state.lock();
    let got = match *state {
        ConnectionState::Connecting { version } => version.unwrap_or(0),
        _ => 0,
    };
    if !(SKETCH_VERSION_MIN..SKETCH_VERSION_MAX).contains(&got) {
        *state = ConnectionState::Closed;
        return Err(Smaf825Error::VersionMismatch {
            got,
            min: SKETCH_VERSION_MIN,
            max: SKETCH_VERSION_MAX,
        });
    }
    *state = ConnectionState::Ready { version: got };
    Ok(())
}

fn flush_loop<W: Write>(mut writer: W, rx: Receiver<Message>, shutdown: Arc<AtomicBool>) {
    let mut outbox = Outbox::new();
    let ticker = crossbeam_channel::tick(FLUSH_INTERVAL);
    loop {
        let flush_reply = select! {
            recv(rx) -> message => match message {
                Ok(Message::Command(command)) => {
                    outbox.push(command);
                    None
                }
                Ok(Message::Wait(ms)) => {
                    outbox.push_wait(ms);
                    None
                }
                Ok(Message::Credit(n)) => {
                    outbox.add_credit(n);
                    None
                }
                Ok(Message::Flush(reply)) => Some(reply),
                Err(_) => break,
            },
            recv(ticker) -> _ => None,
        };
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        if let Err(e) = outbox.drain_to(&mut writer) {
            log::error!("Serial port write failed: {e}");
            std::process::exit(1);
        }
        if let Some(reply) = flush_reply {
            let _ = reply.send(outbox.is_empty());
        }
    }
    log::debug!("{} bytes sent", outbox.sent_total());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[derive(Clone, Default)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_null_device() {
        assert!(is_null_device("--"));
        assert!(is_null_device("/dev/null"));
        let mut t = CommandTransport::open("--", 57600).unwrap();
        assert_eq!(t.state(), ConnectionState::Null);
        t.send_all_off();
        assert!(t.flush());
    }

    #[test]
    fn test_handshake_and_register_writes() {
        let wire = SharedWriter::default();
        let reader = Cursor::new(b"hello\r\nversion 130\r\nready\r\n".to_vec());
        let mut t = CommandTransport::with_io(reader, wire.clone()).unwrap();
        assert_eq!(t.state(), ConnectionState::Ready { version: 130 });

        t.send_master_volume(48);
        t.send_vibrato(3, 7);
        t.send_key_off(3, 2);
        while !t.flush() {}
        assert_eq!(*wire.0.lock(), vec![25, 192, 11, 3, 17, 7, 15, 2]);
    }

    #[test]
    fn test_version_mismatch() {
        let reader = Cursor::new(b"version 110\nready\n".to_vec());
        match CommandTransport::with_io(reader, SharedWriter::default()) {
            Err(Smaf825Error::VersionMismatch { got, min, max }) => {
                assert_eq!((got, min, max), (110, 120, 140));
            }
            other => panic!("unexpected {:?}", other.err()),
        }
    }

    #[test]
    fn test_eof_before_ready() {
        let reader = Cursor::new(b"version 130\n".to_vec());
        assert!(matches!(
            CommandTransport::with_io(reader, SharedWriter::default()),
            Err(Smaf825Error::Handshake(_))
        ));
    }

    #[test]
    fn test_fine_tune_ratio() {
        let wire = SharedWriter::default();
        let reader = Cursor::new(b"version 120\nready\n".to_vec());
        let mut t = CommandTransport::with_io(reader, wire.clone()).unwrap();
        t.send_fine_tune_ratio(0, 1.0);
        while !t.flush() {}
        assert_eq!(*wire.0.lock(), vec![11, 0, 18, 0x08, 19, 0x00]);
    }
}
