//! Drum channel splitting
//!
//! The YMF825 plays one tone per channel, while a drum channel addresses a
//! different instrument per note number. Every extra note used on a drum
//! channel is therefore moved onto a channel the sequence never uses; notes
//! that find no free channel are ignored.

use crate::enums::{Controller, CHANNEL_COUNT};
use crate::event::{DurationEventPair, Event};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// `bank_msb << 24 | bank_lsb << 16 | pc << 8 | drum_note`
fn pc_key(bank_msb: u8, bank_lsb: u8, pc: u8, drum_note: u8) -> u32 {
    u32::from(bank_msb) << 24 | u32::from(bank_lsb) << 16 | u32::from(pc) << 8 | u32::from(drum_note)
}

/// Note-to-hardware-channel mapping computed from a whole sequence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelAllocation {
    used_channels: BTreeSet<u8>,
    used_notes: BTreeMap<u8, BTreeSet<u8>>,
    note_to_channel: BTreeMap<u8, BTreeMap<u8, Option<u8>>>,
    channel_to_channels: BTreeMap<u8, Vec<u8>>,
    ignored_pc: HashSet<u32>,
}

impl ChannelAllocation {
    /// Scan `events` and split each channel of `channels_to_split`.
    ///
    /// The bank and program recorded for a channel is the last one seen in
    /// the whole sequence, not the one active at each note.
    pub fn aggregate(events: &[DurationEventPair], channels_to_split: &[u8]) -> Self {
        let mut alloc = ChannelAllocation::default();
        let mut pc: BTreeMap<u8, (u8, u8, u8)> = BTreeMap::new();

        for pair in events {
            match &pair.event {
                Event::ControlChange {
                    channel,
                    controller: Controller::BankSelectMsb,
                    value,
                } => pc.entry(*channel).or_default().0 = *value,
                Event::ControlChange {
                    channel,
                    controller: Controller::BankSelectLsb,
                    value,
                } => pc.entry(*channel).or_default().1 = *value,
                Event::ProgramChange { channel, program } => {
                    pc.entry(*channel).or_default().2 = *program
                }
                Event::Note { channel, note, .. } => {
                    alloc.used_channels.insert(*channel);
                    alloc.used_notes.entry(*channel).or_default().insert(*note);
                }
                _ => {}
            }
        }

        let mut unused: Vec<u8> = (0..CHANNEL_COUNT as u8)
            .filter(|ch| !alloc.used_channels.contains(ch))
            .collect::<Vec<_>>();
        unused.reverse();

        for &ch in channels_to_split {
            let Some(notes) = alloc.used_notes.get(&ch) else {
                continue;
            };
            let (msb, lsb, program) = pc.get(&ch).copied().unwrap_or_default();
            let mut mapping = BTreeMap::new();
            let mut targets = vec![ch];
            for (i, &note) in notes.iter().enumerate() {
                if i == 0 {
                    mapping.insert(note, Some(ch));
                    continue;
                }
                match unused.pop() {
                    Some(to) => {
                        mapping.insert(note, Some(to));
                        targets.push(to);
                    }
                    None => {
                        log::warn!(
                            "Too many drum notes ({} in Ch.{ch}). {note} is ignored",
                            notes.len()
                        );
                        mapping.insert(note, None);
                        alloc.ignored_pc.insert(pc_key(msb, lsb, program, note));
                    }
                }
            }
            alloc.note_to_channel.insert(ch, mapping);
            alloc.channel_to_channels.insert(ch, targets);
        }
        alloc
    }

    /// True when the voice for this drum note was dropped for lack of channels
    pub fn is_ignored_pc(&self, bank_msb: u8, bank_lsb: u8, pc: u8, drum_note: u8) -> bool {
        self.ignored_pc
            .contains(&pc_key(bank_msb, bank_lsb, pc, drum_note))
    }

    /// Hardware channel for `note` on `channel`; `None` when the note is ignored
    pub fn channel_to(&self, channel: u8, note: u8) -> Option<u8> {
        match self.note_to_channel.get(&channel) {
            Some(mapping) => mapping.get(&note).copied().flatten(),
            None => Some(channel),
        }
    }

    /// Every hardware channel `channel` was spread over
    pub fn channels_to(&self, channel: u8) -> Vec<u8> {
        self.channel_to_channels
            .get(&channel)
            .cloned()
            .unwrap_or_else(|| vec![channel])
    }

    /// Number of channels carrying at least one note
    pub fn used_channel_count(&self) -> usize {
        self.used_channels.len()
    }

    /// Number of distinct notes used on `channel`
    pub fn used_note_count(&self, channel: u8) -> usize {
        self.used_notes.get(&channel).map_or(0, BTreeSet::len)
    }
}
