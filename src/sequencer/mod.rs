//! Playback Engine
//!
//! Drives a [`Synthesizer`] from a parsed SMAF file in real time.
//!
//! # Timing
//! One tick lasts `gcd(duration_time_base, gate_time_base)` milliseconds
//! (20 ms when the file has no score track). Durations and gate times are
//! scaled to ticks by their time base divided by the tick length.
//!
//! # Tick
//! 1. Count down the gate of every sounding note and key off expired notes.
//! 2. While the current duration is still running, stop there.
//! 3. Otherwise run the pending event and every following zero-duration
//!    event, until an event with a positive duration becomes pending.
//!
//! Playback ends when the stream is exhausted and no note is sounding, or
//! when a stop is requested.

mod allocator;
mod options;
mod state;

pub use allocator::ChannelAllocation;
pub use options::{baud_rate_list, PlayOptions, BAUD_RATES};
pub use state::{ChannelState, SequencerState, MAX_TONES};

use crate::chunk::{merge_sequences, Chunk, ContentsOptions, FileChunk, ScoreTrackChunk, SequenceDataChunk};
use crate::enums::{Controller, KeyControlStatus, CHANNEL_COUNT};
use crate::event::Event;
use crate::exclusive::ExclusiveKind;
use crate::util::gcd;
use crate::voice::Vm35FmVoice;
use crate::{Result, Smaf825Error};
use crossbeam_channel::{select, Receiver};
use std::time::Duration;

/// Tick length used when the file has no score track
const DEFAULT_TICK_MS: u32 = 20;
/// Silence queued before the first tick
const LEAD_IN_MS: u32 = 1000;
/// Tone sent with a key off whose tone cannot be resolved
const UNRESOLVED_TONE: usize = 15;

/// Commands the sequencer issues to the sound chip
pub trait Synthesizer {
    /// Master volume (0-63)
    fn send_master_volume(&mut self, volume: u8);
    /// Analog gain (0-3)
    fn send_analog_gain(&mut self, gain: u8);
    /// Sequencer volume (0-31)
    fn send_seq_vol(&mut self, volume: u8);
    /// Silence every channel
    fn send_all_off(&mut self);
    /// Replace the tone table (at most 16 voices)
    fn send_tones(&mut self, voices: &[Vm35FmVoice]);
    /// Start `note` detuned by `delta` semitones with `volume` (0-31) and `tone`
    fn send_key_on(&mut self, channel: u8, note: i32, delta: f64, volume: u8, tone: usize);
    /// Release the note sounding on `channel`
    fn send_key_off(&mut self, channel: u8, tone: usize);
    /// Retune `note` on `channel`
    fn send_pitch(&mut self, channel: u8, note: i32, delta: f64);
    /// Channel volume (0-31)
    fn send_volume(&mut self, channel: u8, volume: u8, direct: bool);
    /// Vibrato depth (0-7)
    fn send_vibrato(&mut self, channel: u8, vibrato: u8);
    /// Fine tune as integer and 9-bit fraction
    fn send_fine_tune(&mut self, channel: u8, integer: u8, fraction: u16);
    /// Mute and reset the envelope of `channel`
    fn send_mute_and_eg_reset(&mut self, channel: u8);
    /// Let the device idle for `ms` milliseconds
    fn send_wait(&mut self, ms: u32);
    /// Tell the device the stream is over
    fn send_terminate(&mut self);
    /// Push buffered output; true once everything has been written
    fn flush(&mut self) -> bool;
}

/// Lifecycle of one playback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPhase {
    /// Prepared, nothing sent yet
    Loaded,
    /// Tick loop active
    Running,
    /// Finished or cancelled
    Stopped,
}

/// Everything one playback needs besides the shared sequencer state
#[derive(Debug, Clone)]
pub struct Playback {
    sequence: SequenceDataChunk,
    allocation: ChannelAllocation,
    tick_ms: u32,
    duration_ticks: u32,
    gate_ticks: u32,
    loop_count: u32,
    index: usize,
    duration_rest: i64,
    pending: Option<Event>,
    show_state: bool,
    phase: PlaybackPhase,
    title: String,
}

impl Playback {
    /// Current phase
    pub fn phase(&self) -> PlaybackPhase {
        self.phase
    }

    /// Milliseconds per tick
    pub fn tick_ms(&self) -> u32 {
        self.tick_ms
    }

    /// Ticks per duration unit
    pub fn duration_ticks(&self) -> u32 {
        self.duration_ticks
    }

    /// Ticks per gate unit
    pub fn gate_ticks(&self) -> u32 {
        self.gate_ticks
    }

    /// Merged event stream
    pub fn sequence(&self) -> &SequenceDataChunk {
        &self.sequence
    }

    /// Drum channel mapping
    pub fn allocation(&self) -> &ChannelAllocation {
        &self.allocation
    }

    /// `artist - title` from the file metadata (may be empty)
    pub fn title(&self) -> &str {
        &self.title
    }
}

/// `floor(0.5 + max * (v / 127) ^ curve)`
pub fn scale127(value: u8, max: u8, curve: f64) -> u8 {
    let r = (f64::from(value) / 127.0).powf(curve);
    (0.5 + f64::from(max) * r).floor() as u8
}

/// Real-time sequencer owning the channel and tone state
#[derive(Debug, Default)]
pub struct Sequencer {
    state: SequencerState,
}

impl Sequencer {
    /// Sequencer with fresh state
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequencer around existing state
    pub fn with_state(state: SequencerState) -> Self {
        Sequencer { state }
    }

    /// Current state
    pub fn state(&self) -> &SequencerState {
        &self.state
    }

    /// Give the state back, e.g. to reuse it for the next file
    pub fn into_state(self) -> SequencerState {
        self.state
    }

    /// Collect the chunks playback needs, apply channel statuses, split drum
    /// channels and fill the tone table.
    pub fn prepare(&mut self, file: &FileChunk, options: &PlayOptions) -> Result<Playback> {
        let mut info = None;
        let mut data = None;
        let mut setup = None;
        let mut score: Option<&ScoreTrackChunk> = None;
        let mut sequences = Vec::new();
        file.traverse(&mut |chunk| match chunk {
            Chunk::ContentsInfo(c) if c.options.is_some() => info = c.options.as_ref(),
            Chunk::Data(c) if c.options.is_some() => data = c.options.as_ref(),
            c if c.is_exclusive_container() => setup = Some(c),
            Chunk::ScoreTrack(c) => score = Some(c),
            Chunk::SequenceData(c) => sequences.push(c),
            _ => {}
        });
        let setup = setup.ok_or_else(|| {
            Smaf825Error::ParseError("Score track setup chunk not found".to_string())
        })?;
        if sequences.is_empty() {
            return Err(Smaf825Error::ParseError(
                "Sequence data chunk not found".to_string(),
            ));
        }

        let title = [info, data]
            .into_iter()
            .flatten()
            .map(ContentsOptions::summary)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" - ");
        if !title.is_empty() {
            log::info!("=============== playing {title}");
        }

        let mut channels_to_split = Vec::new();
        if let Some(score) = score {
            let all_off = score
                .channel_status
                .iter()
                .all(|st| st.key_control_status == KeyControlStatus::Off);
            for (ch, st) in score.channel_status.iter().enumerate() {
                let status = if all_off {
                    KeyControlStatus::On
                } else {
                    st.key_control_status
                };
                self.state.channels[ch].key_control_status = status;
                if status == KeyControlStatus::Off {
                    channels_to_split.push(ch as u8);
                }
            }
        }

        let sequence = merge_sequences(&sequences);
        let allocation = ChannelAllocation::aggregate(&sequence.events, &channels_to_split);

        log::debug!("collecting voices");
        for ex in setup.exclusives() {
            match ex.kind {
                ExclusiveKind::Vm35Voice => {
                    if let Some(v) = &ex.vm35_voice_pc {
                        if v.fm_voice().is_some()
                            && !allocation.is_ignored_pc(v.bank_msb, v.bank_lsb, v.pc, v.drum_note)
                        {
                            self.state.add_tone(v.clone());
                        }
                    }
                }
                ExclusiveKind::VmaVoice => {
                    if let Some(v) = &ex.vma_voice_pc {
                        if !allocation.is_ignored_pc(0, v.bank, v.pc, 0) {
                            self.state.add_tone(v.to_vm35());
                        }
                    }
                }
                ExclusiveKind::Unknown => {}
            }
        }

        let (tick_ms, duration_ticks, gate_ticks) = match score {
            Some(score) => {
                let tick = gcd(score.duration_time_base, score.gate_time_base).max(1);
                (
                    tick,
                    score.duration_time_base / tick,
                    score.gate_time_base / tick,
                )
            }
            None => (DEFAULT_TICK_MS, 1, 1),
        };
        log::debug!("common time base = {tick_ms} msec");
        log::debug!("durationTickCycle = {duration_ticks}");
        log::debug!("gateTickCycle = {gate_ticks}");

        Ok(Playback {
            sequence,
            allocation,
            tick_ms,
            duration_ticks,
            gate_ticks,
            loop_count: options.loop_count,
            index: 0,
            duration_rest: 0,
            pending: None,
            show_state: options.show_state,
            phase: PlaybackPhase::Loaded,
            title,
        })
    }

    /// Send volumes and the tone table, queue the lead-in wait and enter
    /// the running phase
    pub fn start(
        &mut self,
        playback: &mut Playback,
        synth: &mut dyn Synthesizer,
        options: &PlayOptions,
    ) {
        synth.send_master_volume(options.master_volume);
        synth.send_analog_gain(options.analog_gain);
        synth.send_seq_vol(options.seq_vol);
        log::debug!("sending voices");
        synth.send_all_off();
        synth.send_tones(&self.state.tone_data());
        synth.send_wait(LEAD_IN_MS);
        playback.phase = PlaybackPhase::Running;
    }

    /// Run one tick. Returns false once playback has stopped.
    pub fn step(&mut self, playback: &mut Playback, synth: &mut dyn Synthesizer) -> bool {
        if playback.phase != PlaybackPhase::Running {
            return false;
        }

        let mut key_off_found = false;
        for (ch, notes) in self.state.tick() {
            for note in notes {
                let tone = self
                    .state
                    .resolve_tone(ch, note)
                    .unwrap_or(UNRESOLVED_TONE);
                if let Some(to) = playback.allocation.channel_to(ch as u8, note) {
                    synth.send_key_off(to, tone);
                }
            }
            key_off_found = true;
        }

        playback.duration_rest -= 1;
        if playback.duration_rest > 0 {
            if key_off_found && playback.show_state {
                self.state.print();
            }
            return self.update_phase(playback);
        }

        if let Some(event) = playback.pending.take() {
            self.process_event(&playback.allocation, playback.gate_ticks, &event, synth);
        }
        let len = playback.sequence.events.len();
        let mut visited = 0;
        while playback.index < len {
            if visited == len {
                log::warn!("Sequence has no event with a duration; loop stopped");
                playback.loop_count = 1;
                playback.index = len;
                break;
            }
            visited += 1;
            let i = playback.index;
            playback.index += 1;
            if playback.index >= len && playback.loop_count != 1 {
                if playback.loop_count > 1 {
                    playback.loop_count -= 1;
                }
                playback.index = 0;
            }
            let pair = &playback.sequence.events[i];
            if pair.duration > 0 {
                if playback.show_state {
                    self.state.print();
                }
                playback.duration_rest =
                    i64::from(pair.duration) * i64::from(playback.duration_ticks);
                playback.pending = Some(pair.event.clone());
                break;
            }
            self.process_event(&playback.allocation, playback.gate_ticks, &pair.event, synth);
        }
        self.update_phase(playback)
    }

    fn update_phase(&self, playback: &mut Playback) -> bool {
        let running = playback.index < playback.sequence.events.len()
            || playback.pending.is_some()
            || self.state.has_rest();
        if !running {
            playback.phase = PlaybackPhase::Stopped;
        }
        running
    }

    /// Play `file` to the end, or until `stop` yields a message or is
    /// disconnected. Always finishes with an all-off and a full flush.
    pub fn play(
        &mut self,
        file: &FileChunk,
        synth: &mut dyn Synthesizer,
        options: &PlayOptions,
        stop: &Receiver<()>,
    ) -> Result<()> {
        options.validate()?;
        let mut playback = self.prepare(file, options)?;
        self.start(&mut playback, synth, options);

        let period = u64::from(playback.tick_ms.saturating_sub(1).max(1));
        let ticker = crossbeam_channel::tick(Duration::from_millis(period));
        while playback.phase == PlaybackPhase::Running {
            synth.send_wait(playback.tick_ms);
            select! {
                recv(stop) -> _ => {
                    log::info!("stopping playback");
                    playback.phase = PlaybackPhase::Stopped;
                    synth.send_all_off();
                }
                recv(ticker) -> _ => {
                    self.step(&mut playback, synth);
                }
            }
        }

        synth.send_all_off();
        while !synth.flush() {
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    fn process_event(
        &mut self,
        allocation: &ChannelAllocation,
        gate_ticks: u32,
        event: &Event,
        synth: &mut dyn Synthesizer,
    ) {
        let ch = event.channel();
        let chi = usize::from(ch);
        if chi >= CHANNEL_COUNT {
            log::warn!("Event on channel {ch} ignored: {event}");
            return;
        }

        match event {
            Event::Note {
                note,
                velocity,
                gate_time,
                ..
            } => {
                let is_ma5 = self.state.is_ma5;
                let cs = &mut self.state.channels[chi];
                cs.velocity = *velocity;
                cs.note_on(*note, gate_time.saturating_mul(gate_ticks));
                let vel = f64::from(cs.velocity) / 127.0;
                let exp = f64::from(cs.expression) / 127.0;
                let volume = if is_ma5 {
                    (vel + exp - 1.0).max(0.0)
                } else if vel == 0.0 || exp == 0.0 {
                    0.0
                } else {
                    (vel + exp) * 0.5
                };
                let delta = cs.pitch_delta();
                let octave_shift = cs.octave_shift;
                let drum = cs.key_control_status == KeyControlStatus::Off;

                let mut key = i32::from(*note);
                let tone = self.state.resolve_tone(chi, *note);
                if drum {
                    if let Some(voice) = tone.and_then(|t| self.state.tones[t].fm_voice()) {
                        key = i32::from(voice.drum_key);
                    }
                }
                let to = allocation.channel_to(ch, *note);
                if let (Some(to), Some(tone)) = (to, tone) {
                    synth.send_key_on(
                        to,
                        key + 12 * octave_shift,
                        delta,
                        (0.5 + 31.0 * volume).floor() as u8,
                        tone,
                    );
                }
            }
            Event::PitchBend { value, .. } => {
                let cs = &mut self.state.channels[chi];
                cs.pitch_bend = *value;
                Self::send_pitch_all(cs, allocation, ch, synth);
            }
            Event::ControlChange {
                controller, value, ..
            } => self.control_change(allocation, ch, *controller, *value, synth),
            Event::ProgramChange { program, .. } => {
                let cs = &self.state.channels[chi];
                let (msb, lsb) = (cs.bank_msb, cs.bank_lsb);
                let tone = self.state.tone_id_by_pc(msb, lsb, *program);
                let cs = &mut self.state.channels[chi];
                cs.pc = *program;
                match tone {
                    Some(tone) => cs.tone_id = tone,
                    None => log::warn!("Undefined or unsupported PC {msb}-{lsb}-@{program}"),
                }
            }
            Event::OctaveShift { value, .. } => {
                self.state.channels[chi].octave_shift = *value;
            }
            Event::FineTune { .. } | Event::Exclusive(_) | Event::Nop => {}
        }
    }

    fn send_pitch_all(
        cs: &ChannelState,
        allocation: &ChannelAllocation,
        ch: u8,
        synth: &mut dyn Synthesizer,
    ) {
        let delta = cs.pitch_delta();
        for &note in cs.gate_time_rest.keys() {
            if let Some(to) = allocation.channel_to(ch, note) {
                synth.send_pitch(to, i32::from(note), delta);
            }
        }
    }

    fn control_change(
        &mut self,
        allocation: &ChannelAllocation,
        ch: u8,
        controller: Controller,
        value: u8,
        synth: &mut dyn Synthesizer,
    ) {
        let chi = usize::from(ch);
        let cs = &mut self.state.channels[chi];
        match controller {
            Controller::BankSelectMsb => cs.bank_msb = value,
            Controller::BankSelectLsb => cs.bank_lsb = value,
            Controller::Modulation => {
                cs.modulation = value;
                for to in allocation.channels_to(ch) {
                    synth.send_vibrato(to, scale127(value, 7, 1.0));
                }
            }
            Controller::MainVolume => {
                cs.volume = value;
                for to in allocation.channels_to(ch) {
                    synth.send_volume(to, scale127(value, 31, 1.0), true);
                }
            }
            Controller::Panpot => cs.panpot = value,
            Controller::Expression => cs.expression = value,
            Controller::MonoOn => cs.mono = true,
            Controller::PolyOn => cs.mono = false,
            Controller::RpnLsb => cs.rpn_lsb = value,
            Controller::RpnMsb => cs.rpn_msb = value,
            Controller::AllSoundOff => {
                for note in cs.all_off() {
                    let tone = self
                        .state
                        .resolve_tone(chi, note)
                        .unwrap_or(UNRESOLVED_TONE);
                    if let Some(to) = allocation.channel_to(ch, note) {
                        synth.send_key_off(to, tone);
                    }
                }
            }
            Controller::DataEntry => {
                if cs.rpn_msb == 0 && cs.rpn_lsb == 0 {
                    cs.pitch_bend_range = value;
                    Self::send_pitch_all(cs, allocation, ch, synth);
                } else {
                    log::warn!("Unsupported RPN {}-{} = {value}", cs.rpn_msb, cs.rpn_lsb);
                }
            }
            Controller::Other(n) => log::warn!("Unsupported CC {n:X} = {value}"),
        }
    }
}
