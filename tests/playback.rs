//! Integration tests for the playback pipeline
//!
//! Builds small MMF files in memory, parses them and runs them through the
//! sequencer with a recording synthesizer.

use crossbeam_channel::bounded;
use smaf825::chunk::crc16;
use smaf825::sequencer::PlaybackPhase;
use smaf825::voice::Vm35FmVoice;
use smaf825::{FileChunk, PlayOptions, Sequencer, Synthesizer};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    MasterVolume(u8),
    AnalogGain(u8),
    SeqVol(u8),
    AllOff,
    Tones(Vec<u8>),
    KeyOn(u8, i32, u8, usize),
    KeyOff(u8, usize),
    Pitch(u8, i32),
    Volume(u8, u8),
    Vibrato(u8, u8),
    Wait(u32),
    Other,
}

#[derive(Default)]
struct Recorder {
    calls: Vec<Call>,
}

impl Recorder {
    fn without_waits(&self) -> Vec<Call> {
        self.calls
            .iter()
            .filter(|c| !matches!(c, Call::Wait(_)))
            .cloned()
            .collect()
    }
}

impl Synthesizer for Recorder {
    fn send_master_volume(&mut self, volume: u8) {
        self.calls.push(Call::MasterVolume(volume));
    }
    fn send_analog_gain(&mut self, gain: u8) {
        self.calls.push(Call::AnalogGain(gain));
    }
    fn send_seq_vol(&mut self, volume: u8) {
        self.calls.push(Call::SeqVol(volume));
    }
    fn send_all_off(&mut self) {
        self.calls.push(Call::AllOff);
    }
    fn send_tones(&mut self, voices: &[Vm35FmVoice]) {
        self.calls
            .push(Call::Tones(voices.iter().map(|v| v.drum_key).collect()));
    }
    fn send_key_on(&mut self, channel: u8, note: i32, _delta: f64, volume: u8, tone: usize) {
        self.calls.push(Call::KeyOn(channel, note, volume, tone));
    }
    fn send_key_off(&mut self, channel: u8, tone: usize) {
        self.calls.push(Call::KeyOff(channel, tone));
    }
    fn send_pitch(&mut self, channel: u8, note: i32, _delta: f64) {
        self.calls.push(Call::Pitch(channel, note));
    }
    fn send_volume(&mut self, channel: u8, volume: u8, _direct: bool) {
        self.calls.push(Call::Volume(channel, volume));
    }
    fn send_vibrato(&mut self, channel: u8, vibrato: u8) {
        self.calls.push(Call::Vibrato(channel, vibrato));
    }
    fn send_fine_tune(&mut self, _channel: u8, _integer: u8, _fraction: u16) {
        self.calls.push(Call::Other);
    }
    fn send_mute_and_eg_reset(&mut self, _channel: u8) {
        self.calls.push(Call::Other);
    }
    fn send_wait(&mut self, ms: u32) {
        self.calls.push(Call::Wait(ms));
    }
    fn send_terminate(&mut self) {
        self.calls.push(Call::Other);
    }
    fn flush(&mut self) -> bool {
        true
    }
}

fn chunk(signature: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = signature.to_vec();
    out.extend((payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn mmf(children: &[Vec<u8>]) -> Vec<u8> {
    let payload = children.concat();
    let mut out = b"MMMD".to_vec();
    out.extend(((payload.len() + 2) as u32).to_be_bytes());
    out.extend(payload);
    let crc = crc16(&out);
    out.extend(crc.to_be_bytes());
    out
}

/// `F0 len 43 79 07 7F 01 msb lsb pc drum type voice.. F7` with a two-operator voice
fn vm5_program(pc: u8, drum_note: u8, drum_key: u8) -> Vec<u8> {
    let mut payload = vec![0x43, 0x79, 0x07, 0x7F, 0x01, 0x00, 0x00, pc, drum_note, 0x00];
    payload.extend([drum_key, 0x00, 0x00]);
    payload.extend([0u8; 14]);
    let mut out = vec![0xF0, payload.len() as u8 + 1];
    out.extend(payload);
    out.push(0xF7);
    out
}

/// Mobile Standard score track with 4 ms time bases
fn score_track(channel_status: [u8; 16], setup: &[u8], sequence: &[u8]) -> Vec<u8> {
    let mut payload = vec![0x02, 0x00, 0x02, 0x02];
    payload.extend(channel_status);
    payload.extend(chunk(b"Mtsu", setup));
    payload.extend(chunk(b"Mtsq", sequence));
    chunk(b"MTR\x05", &payload)
}

fn song() -> FileChunk {
    let mut cnti = vec![0x00, 0x00, 0x00, 0x00, 0x00];
    cnti.extend(b"ST:Song,AN:Artist,");
    let data = mmf(&[
        chunk(b"CNTI", &cnti),
        score_track(
            [0x80; 16],
            &vm5_program(0, 0, 0),
            &[
                0x00, 0xB0, 0x07, 0x7F, // main volume 127
                0x00, 0x90, 0x3C, 0x7F, 0x02, // C4, gate 2
                0x03, 0xFF, 0x00, // nop after 3
                0x00, 0x00, 0x00, 0x00,
            ],
        ),
    ]);
    FileChunk::parse(&data).unwrap()
}

#[test]
fn test_prepare_reads_timing_and_title() {
    let file = song();
    let mut sequencer = Sequencer::new();
    let playback = sequencer.prepare(&file, &PlayOptions::default()).unwrap();
    assert_eq!(playback.tick_ms(), 4);
    assert_eq!(playback.duration_ticks(), 1);
    assert_eq!(playback.gate_ticks(), 1);
    assert_eq!(playback.title(), "Artist - Song");
    assert_eq!(playback.phase(), PlaybackPhase::Loaded);
    assert_eq!(sequencer.state().tones.len(), 1);
    assert!(sequencer.state().is_ma5);
}

#[test]
fn test_play_song_to_the_end() {
    let file = song();
    let mut synth = Recorder::default();
    let (_stop_tx, stop_rx) = bounded::<()>(1);
    Sequencer::new()
        .play(&file, &mut synth, &PlayOptions::default(), &stop_rx)
        .unwrap();

    assert_eq!(
        synth.without_waits(),
        vec![
            Call::MasterVolume(48),
            Call::AnalogGain(1),
            Call::SeqVol(16),
            Call::AllOff,
            Call::Tones(vec![0]),
            Call::Volume(0, 31),
            Call::KeyOn(0, 60, 31, 0),
            Call::KeyOff(0, 0),
            Call::AllOff,
        ]
    );
    assert_eq!(synth.calls[5], Call::Wait(1000));
    assert!(synth.calls.contains(&Call::Wait(4)));
}

#[test]
fn test_stop_request_cancels_infinite_loop() {
    let file = song();
    let mut synth = Recorder::default();
    let (stop_tx, stop_rx) = bounded::<()>(1);
    stop_tx.send(()).unwrap();
    let options = PlayOptions {
        loop_count: 0,
        ..Default::default()
    };
    Sequencer::new()
        .play(&file, &mut synth, &options, &stop_rx)
        .unwrap();
    assert_eq!(synth.calls.last(), Some(&Call::AllOff));
}

#[test]
fn test_invalid_options_are_rejected() {
    let file = song();
    let (_stop_tx, stop_rx) = bounded::<()>(1);
    let options = PlayOptions {
        seq_vol: 40,
        ..Default::default()
    };
    let result = Sequencer::new().play(&file, &mut Recorder::default(), &options, &stop_rx);
    assert!(result.is_err());
}

#[test]
fn test_drum_channel_is_split_onto_idle_channels() {
    let mut status = [0x80u8; 16];
    status[0] = 0x40; // key control off
    let mut setup = vm5_program(0, 38, 52);
    setup.extend(vm5_program(0, 36, 50));
    let data = mmf(&[score_track(
        status,
        &setup,
        &[
            0x00, 0x90, 0x24, 0x64, 0x02, // note 36
            0x00, 0x90, 0x26, 0x64, 0x02, // note 38
            0x01, 0xFF, 0x00, //
            0x00, 0x00, 0x00, 0x00,
        ],
    )]);
    let file = FileChunk::parse(&data).unwrap();

    let options = PlayOptions::default();
    let mut sequencer = Sequencer::new();
    let mut synth = Recorder::default();
    let mut playback = sequencer.prepare(&file, &options).unwrap();
    assert_eq!(playback.allocation().channel_to(0, 36), Some(0));
    assert_eq!(playback.allocation().channel_to(0, 38), Some(1));
    assert_eq!(playback.allocation().channels_to(0), vec![0, 1]);

    sequencer.start(&mut playback, &mut synth, &options);
    assert_eq!(playback.phase(), PlaybackPhase::Running);
    while sequencer.step(&mut playback, &mut synth) {}

    let calls = synth.without_waits();
    assert!(calls.contains(&Call::Tones(vec![50, 52])));
    assert!(calls.contains(&Call::KeyOn(0, 50, 24, 0)));
    assert!(calls.contains(&Call::KeyOn(1, 52, 24, 1)));
    assert!(calls.contains(&Call::KeyOff(0, 0)));
    assert!(calls.contains(&Call::KeyOff(1, 1)));
    assert_eq!(playback.phase(), PlaybackPhase::Stopped);
}

#[test]
fn test_missing_setup_chunk_is_an_error() {
    let mut payload = vec![0x02, 0x00, 0x02, 0x02];
    payload.extend([0x80u8; 16]);
    payload.extend(chunk(b"Mtsq", &[0x00, 0x00, 0x00, 0x00]));
    let data = mmf(&[chunk(b"MTR\x05", &payload)]);
    let file = FileChunk::parse(&data).unwrap();
    let err = Sequencer::new()
        .prepare(&file, &PlayOptions::default())
        .unwrap_err();
    assert!(err.to_string().contains("setup chunk not found"));
}
