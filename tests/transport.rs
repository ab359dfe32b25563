//! Integration tests for the serial bridge protocol

use parking_lot::Mutex;
use smaf825::chunk::crc16;
use smaf825::transport::{Command, ConnectionState, Outbox};
use smaf825::{CommandTransport, FileChunk, PlayOptions, Sequencer, Synthesizer};
use std::io::{self, Cursor, Write};
use std::sync::Arc;

#[derive(Clone, Default)]
struct Wire(Arc<Mutex<Vec<u8>>>);

impl Write for Wire {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn chunk(signature: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = signature.to_vec();
    out.extend((payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn one_note_song() -> FileChunk {
    let mut exclusive = vec![0x43, 0x79, 0x07, 0x7F, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00];
    exclusive.extend([0u8; 17]);
    let mut setup = vec![0xF0, exclusive.len() as u8 + 1];
    setup.extend(exclusive);
    setup.push(0xF7);

    let mut track = vec![0x02, 0x00, 0x02, 0x02];
    track.extend([0x80u8; 16]);
    track.extend(chunk(b"Mtsu", &setup));
    track.extend(chunk(
        b"Mtsq",
        &[0x00, 0x90, 0x45, 0x7F, 0x01, 0x02, 0xFF, 0x00, 0, 0, 0, 0],
    ));

    let payload = chunk(b"MTR\x05", &track);
    let mut data = b"MMMD".to_vec();
    data.extend(((payload.len() + 2) as u32).to_be_bytes());
    data.extend(payload);
    let crc = crc16(&data);
    data.extend(crc.to_be_bytes());
    FileChunk::parse(&data).unwrap()
}

#[test]
fn test_credit_gates_the_wire() {
    let mut outbox = Outbox::with_credit(0);
    outbox.push(Command::write_all(7, vec![0x55; 97]));
    let mut wire = Vec::new();

    assert_eq!(outbox.drain_to(&mut wire).unwrap(), 0);
    outbox.add_credit(60);
    assert_eq!(outbox.drain_to(&mut wire).unwrap(), 60);
    assert_eq!(outbox.pending_bytes(), 40);
    assert_eq!(&wire[..3], &[0x87, 0x00, 0x61]);
}

#[test]
fn test_play_over_bridge() {
    let wire = Wire::default();
    let device = Cursor::new(b"version 131\r\nready\r\n=1000\r\n".to_vec());
    let mut transport = CommandTransport::with_io(device, wire.clone()).unwrap();
    assert_eq!(transport.state(), ConnectionState::Ready { version: 131 });

    let (_stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    Sequencer::new()
        .play(
            &one_note_song(),
            &mut transport,
            &PlayOptions::default(),
            &stop_rx,
        )
        .unwrap();
    transport.close();
    assert_eq!(transport.state(), ConnectionState::Closed);

    let bytes = wire.0.lock().clone();
    assert_eq!(
        &bytes[..17],
        &[
            25, 48 << 2, // master volume
            3, 1, // analog gain
            9, 16 << 3, // seqvol
            8, 0xF6, 0xFF, 0x00, 0x01, 8, 0x00, // all off
            0x87, 0x00, 0x23, 0x81, // one tone
        ]
    );
    assert_eq!(
        &bytes[bytes.len() - 7..],
        &[8, 0xF6, 0xFF, 0x00, 0x01, 8, 0x00]
    );
    // key on: channel select, VoVol, F-number, key + tone
    let key_on = [11, 0, 12, 31 << 2];
    assert!(bytes.windows(4).any(|w| w == key_on));
    assert!(bytes.windows(2).any(|w| w == [15, 0x40]));
    assert!(bytes.windows(2).any(|w| w == [15, 0x00]));
}

#[test]
fn test_null_device_accepts_everything() {
    let mut transport = CommandTransport::open("/dev/null", 57600).unwrap();
    transport.send_tones(&[]);
    transport.send_key_on(0, 60, 0.0, 31, 0);
    transport.send_terminate();
    assert!(transport.flush());
    assert_eq!(transport.state(), ConnectionState::Null);
}
