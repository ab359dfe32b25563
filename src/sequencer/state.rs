//! Runtime channel state and the tone table

use crate::enums::{note_name, KeyControlStatus, CHANNEL_COUNT};
use crate::voice::{Vm35FmOperator, Vm35FmVersion, Vm35FmVoice, Vm35VoicePc};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Tones the YMF825 can hold at once
pub const MAX_TONES: usize = 16;

const STATE_HEADER: &str = "Ch Bank     PC Note      Bend Mod Vol Exp Pan Mono";
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[0;0H";

/// Voice with every operator at full attenuation
fn silent_voice() -> Vm35FmVoice {
    let mut operators = [Vm35FmOperator::default(); 4];
    for op in &mut operators {
        op.tl = 63;
    }
    Vm35FmVoice {
        version: Vm35FmVersion::Vm3Lib,
        drum_key: 0,
        panpot: 15,
        bo: 1,
        lfo: 0,
        pe: false,
        alg: 0,
        operators,
    }
}

/// State of one logical channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelState {
    /// Melodic (On) or drum (Off) key handling
    pub key_control_status: KeyControlStatus,
    /// Velocity of the last note
    pub velocity: u8,
    /// Remaining gate ticks of each sounding note
    pub gate_time_rest: BTreeMap<u8, u32>,
    /// Bank select MSB
    pub bank_msb: u8,
    /// Bank select LSB
    pub bank_lsb: u8,
    /// Program number
    pub pc: u8,
    /// Index into the tone table
    pub tone_id: usize,
    /// Pitch bend (-8192..8191)
    pub pitch_bend: i32,
    /// Pitch bend range in semitones
    pub pitch_bend_range: u8,
    /// Modulation depth
    pub modulation: u8,
    /// Channel volume
    pub volume: u8,
    /// Panpot (64 = center)
    pub panpot: u8,
    /// Expression
    pub expression: u8,
    /// Octave shift applied to new notes
    pub octave_shift: i32,
    /// Mono mode
    pub mono: bool,
    /// RPN MSB latch
    pub rpn_msb: u8,
    /// RPN LSB latch
    pub rpn_lsb: u8,
}

impl Default for ChannelState {
    fn default() -> Self {
        ChannelState {
            key_control_status: KeyControlStatus::On,
            velocity: 0,
            gate_time_rest: BTreeMap::new(),
            bank_msb: 0,
            bank_lsb: 0,
            pc: 0,
            tone_id: 0,
            pitch_bend: 0,
            pitch_bend_range: 2,
            modulation: 0,
            volume: 100,
            panpot: 64,
            expression: 127,
            octave_shift: 0,
            mono: false,
            rpn_msb: 0,
            rpn_lsb: 0,
        }
    }
}

impl ChannelState {
    /// Advance one gate tick and return the notes whose gate just expired.
    ///
    /// Notes that were started with a zero gate are dropped without being
    /// reported.
    pub fn tick(&mut self) -> Vec<u8> {
        let mut released = Vec::new();
        self.gate_time_rest.retain(|&note, rest| {
            if *rest == 0 {
                return false;
            }
            *rest -= 1;
            if *rest == 0 {
                released.push(note);
                return false;
            }
            true
        });
        released
    }

    /// Forget every sounding note and return them
    pub fn all_off(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.gate_time_rest).into_keys().collect()
    }

    /// True while a note is sounding
    pub fn has_rest(&self) -> bool {
        !self.gate_time_rest.is_empty()
    }

    /// Start gating `note`; outside drum mode this cuts the other notes
    pub fn note_on(&mut self, note: u8, gate_time: u32) {
        if self.key_control_status != KeyControlStatus::Off {
            self.gate_time_rest.clear();
        }
        self.gate_time_rest.insert(note, gate_time);
    }

    /// Pitch offset in semitones from the current bend and range
    pub fn pitch_delta(&self) -> f64 {
        f64::from(self.pitch_bend) * f64::from(self.pitch_bend_range) / 8192.0
    }

    /// One row of the state table (channel numbers start at 1)
    pub fn render(&self, num: usize) -> String {
        let mono = if self.mono { "On" } else { "Off" };
        let pan = match self.panpot {
            64 => "C".to_string(),
            p if p < 64 => format!("L{}", 64 - p),
            p => format!("R{}", p - 64),
        };
        let note = self
            .gate_time_rest
            .keys()
            .next()
            .map(|&n| format!("{}({n})", note_name(i32::from(n))))
            .unwrap_or_else(|| "-".to_string());
        format!(
            "{:2} {:3}-{:<3} {:3} {:<8} {:5} {:3} {:3} {:3} {:<3} {:<4}",
            num + 1,
            self.bank_msb,
            self.bank_lsb,
            self.pc,
            note,
            self.pitch_bend,
            self.modulation,
            self.volume,
            self.expression,
            pan,
            mono
        )
    }
}

/// Channel states plus the tone table shared by all channels.
///
/// Created once and handed to the sequencer; it is not cleared between
/// plays, so tones and channel settings carry over to the next file.
#[derive(Debug, Clone, Default)]
pub struct SequencerState {
    /// Per-channel state
    pub channels: [ChannelState; CHANNEL_COUNT],
    /// Tone table, sorted by [`SequencerState::tone_data`]
    pub tones: Vec<Vm35VoicePc>,
    /// Use the MA-5 volume curve
    pub is_ma5: bool,
}

impl SequencerState {
    /// Fresh state with default channels and no tones
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a program to the tone table; only FM programs are accepted
    pub fn add_tone(&mut self, pc: Vm35VoicePc) {
        if pc.fm_voice().is_none() {
            log::warn!(
                "Skipping non-FM tone {}-{}-@{}",
                pc.bank_msb,
                pc.bank_lsb,
                pc.pc
            );
            return;
        }
        if pc.version == Vm35FmVersion::Vm5 {
            self.is_ma5 = true;
        }
        self.tones.push(pc);
    }

    /// Sort the tone table by (drum note, program, bank LSB, bank MSB), cap it
    /// at 16 entries and return the FM voices in table order.
    ///
    /// The returned index of every voice equals its tone id; an entry without
    /// an FM voice is sent as a silent voice.
    pub fn tone_data(&mut self) -> Vec<Vm35FmVoice> {
        self.tones
            .sort_by_key(|t| (t.drum_note, t.pc, t.bank_lsb, t.bank_msb));
        if self.tones.len() > MAX_TONES {
            log::warn!(
                "Too many tones (got {} tones, want <={MAX_TONES})",
                self.tones.len()
            );
            self.tones.truncate(MAX_TONES);
        }
        self.tones
            .iter()
            .map(|t| t.fm_voice().cloned().unwrap_or_else(silent_voice))
            .collect()
    }

    /// First tone matching bank and program
    pub fn tone_id_by_pc(&self, bank_msb: u8, bank_lsb: u8, pc: u8) -> Option<usize> {
        self.tones
            .iter()
            .position(|t| t.bank_msb == bank_msb && t.bank_lsb == bank_lsb && t.pc == pc)
    }

    /// First tone matching bank, program and drum note
    pub fn tone_id_by_pc_and_drum_note(
        &self,
        bank_msb: u8,
        bank_lsb: u8,
        pc: u8,
        note: u8,
    ) -> Option<usize> {
        self.tones.iter().position(|t| {
            t.bank_msb == bank_msb && t.bank_lsb == bank_lsb && t.pc == pc && t.drum_note == note
        })
    }

    /// Tone used for `note` on `channel`: the drum lookup in Off mode, the
    /// channel's current tone otherwise
    pub fn resolve_tone(&self, channel: usize, note: u8) -> Option<usize> {
        let cs = &self.channels[channel];
        if cs.key_control_status == KeyControlStatus::Off {
            self.tone_id_by_pc_and_drum_note(cs.bank_msb, cs.bank_lsb, cs.pc, note)
        } else {
            Some(cs.tone_id)
        }
    }

    /// Advance every channel one gate tick; returns `(channel, released notes)`
    pub fn tick(&mut self) -> Vec<(usize, Vec<u8>)> {
        self.channels
            .iter_mut()
            .enumerate()
            .filter_map(|(ch, cs)| {
                let notes = cs.tick();
                (!notes.is_empty()).then_some((ch, notes))
            })
            .collect()
    }

    /// True while any channel has a sounding note
    pub fn has_rest(&self) -> bool {
        self.channels.iter().any(ChannelState::has_rest)
    }

    /// The per-channel state table
    pub fn render(&self) -> String {
        let mut out = String::from(STATE_HEADER);
        for (i, cs) in self.channels.iter().enumerate() {
            let _ = write!(out, "\n{}", cs.render(i));
        }
        out
    }

    /// Clear the terminal and print the state table
    pub fn print(&self) {
        println!("{CLEAR_SCREEN}{}", self.render());
    }
}
