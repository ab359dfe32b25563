//! Event Grammars
//!
//! Turns the flat byte stream of a sequence data chunk into timed events.
//! Three mutually exclusive grammars exist, selected by the score track format:
//! Handy Phone Standard, `SEQU`, and Mobile Standard (compressed or not).

use crate::enums::{Controller, ScoreTrackFormatType, CHANNEL_COUNT};
use crate::exclusive::{Exclusive, ExclusiveLength};
use crate::util::{read_variable_int, ByteReader};
use crate::{Result, Smaf825Error};
use serde::Serialize;
use std::fmt;

/// Modulation depths addressed by the short-form modulation messages
const SHORT_MOD_TABLE: [u8; 16] = [
    0x00, 0x00, 0x08, 0x10, 0x18, 0x20, 0x28, 0x30, 0x38, 0x40, 0x48, 0x50, 0x60, 0x70, 0x7F, 0x7F,
];

/// Expression values addressed by the short-form expression messages
const SHORT_EXP_TABLE: [u8; 16] = [
    0x00, 0x00, 0x1F, 0x27, 0x2F, 0x37, 0x3F, 0x47, 0x4F, 0x57, 0x5F, 0x67, 0x6F, 0x77, 0x7F, 0x7F,
];

/// A decoded sequence event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Note with its own gate time
    Note {
        /// Source channel
        channel: u8,
        /// Note number
        note: u8,
        /// Velocity (0-127)
        velocity: u8,
        /// Gate time in gate ticks
        gate_time: u32,
    },
    /// Control change
    ControlChange {
        /// Source channel
        channel: u8,
        /// Controller
        controller: Controller,
        /// Value (0-127)
        value: u8,
    },
    /// Program change
    ProgramChange {
        /// Source channel
        channel: u8,
        /// Program number
        program: u8,
    },
    /// Pitch bend, centered at 0 (-8192..8191)
    PitchBend {
        /// Source channel
        channel: u8,
        /// Bend value
        value: i32,
    },
    /// Octave shift applied to future notes
    OctaveShift {
        /// Source channel
        channel: u8,
        /// Signed octave count
        value: i32,
    },
    /// Fine tune
    FineTune {
        /// Source channel
        channel: u8,
        /// Raw value
        value: u8,
    },
    /// Embedded exclusive message
    Exclusive(Exclusive),
    /// No operation
    Nop,
}

impl Event {
    /// Channel addressed by the event (0 for channel-less events)
    pub fn channel(&self) -> u8 {
        match self {
            Event::Note { channel, .. }
            | Event::ControlChange { channel, .. }
            | Event::ProgramChange { channel, .. }
            | Event::PitchBend { channel, .. }
            | Event::OctaveShift { channel, .. }
            | Event::FineTune { channel, .. } => *channel,
            Event::Exclusive(_) | Event::Nop => 0,
        }
    }

    /// Offset the channel of channel-bound events
    pub fn shift_channel(&mut self, n: u8) {
        match self {
            Event::Note { channel, .. }
            | Event::ControlChange { channel, .. }
            | Event::ProgramChange { channel, .. }
            | Event::PitchBend { channel, .. }
            | Event::OctaveShift { channel, .. }
            | Event::FineTune { channel, .. } => *channel = channel.saturating_add(n),
            Event::Exclusive(_) | Event::Nop => {}
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Note {
                channel,
                note,
                velocity,
                gate_time,
            } => write!(
                f,
                "Tr.{channel:02} Note {}({note}) Vel={velocity} Gate={gate_time}",
                crate::enums::note_name(i32::from(*note))
            ),
            Event::ControlChange {
                channel,
                controller,
                value,
            } => write!(f, "Tr.{channel:02} CC {controller} Value={value}"),
            Event::ProgramChange { channel, program } => {
                write!(f, "Tr.{channel:02} PC @{program}")
            }
            Event::PitchBend { channel, value } => write!(f, "Tr.{channel:02} PitchBend {value}"),
            Event::OctaveShift { channel, value } => {
                write!(f, "Tr.{channel:02} OctaveShift {value}")
            }
            Event::FineTune { channel, value } => write!(f, "Tr.{channel:02} Fine {value}"),
            Event::Exclusive(ex) => write!(f, "Tr.-- {ex}"),
            Event::Nop => write!(f, "Tr.-- NOP"),
        }
    }
}

/// An event preceded by the number of duration ticks to wait before it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DurationEventPair {
    /// Delay before the event, in duration ticks
    pub duration: u32,
    /// The event
    pub event: Event,
}

/// Running state shared by consecutive `decode_one` calls
#[derive(Debug, Clone)]
pub struct EventContext {
    last_velocity: [u8; CHANNEL_COUNT],
}

impl EventContext {
    /// Fresh context with every channel's last velocity at 64
    pub fn new() -> Self {
        EventContext {
            last_velocity: [64; CHANNEL_COUNT],
        }
    }

    /// Last velocity seen on a channel
    pub fn last_velocity(&self, channel: u8) -> u8 {
        self.last_velocity[usize::from(channel) % CHANNEL_COUNT]
    }
}

impl Default for EventContext {
    fn default() -> Self {
        Self::new()
    }
}

/// One event grammar
pub trait EventGrammar {
    /// Read the duration that precedes each event
    fn read_duration(&self, reader: &mut ByteReader<'_>) -> Result<u32>;

    /// Decode one event; `None` marks an explicit end of track
    fn decode_one(&self, reader: &mut ByteReader<'_>, ctx: &mut EventContext)
        -> Result<Option<Event>>;

    /// Grammar name
    fn name(&self) -> &str;
}

/// Grammar for a score track format
pub fn grammar_for(format: ScoreTrackFormatType) -> &'static dyn EventGrammar {
    match format {
        ScoreTrackFormatType::HandyPhoneStandard => &HandyPhoneGrammar,
        ScoreTrackFormatType::Sequ => &SequGrammar,
        ScoreTrackFormatType::MobileStandardCompressed
        | ScoreTrackFormatType::MobileStandardNonCompressed => &MobileGrammar,
    }
}

fn invalid(offset: usize, bytes: &[u8]) -> Smaf825Error {
    let detail: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
    Smaf825Error::InvalidEvent {
        offset,
        detail: format!("0x{detail}"),
    }
}

/// Short note form shared by the Handy Phone and `SEQU` grammars
fn read_short_note(reader: &mut ByteReader<'_>, sig: u8) -> Result<Event> {
    let octave = (sig >> 4) & 3;
    let gate_time = read_variable_int(reader, false)?;
    Ok(Event::Note {
        channel: sig >> 6,
        note: (octave + 3) * 12 + (sig & 15),
        velocity: 127,
        gate_time,
    })
}

/// Handy Phone Standard grammar
pub struct HandyPhoneGrammar;

impl EventGrammar for HandyPhoneGrammar {
    fn read_duration(&self, reader: &mut ByteReader<'_>) -> Result<u32> {
        read_variable_int(reader, false)
    }

    fn decode_one(
        &self,
        reader: &mut ByteReader<'_>,
        _ctx: &mut EventContext,
    ) -> Result<Option<Event>> {
        let offset = reader.offset();
        let sig = reader.read_u8()?;

        if sig == 0xFF {
            let sig2 = reader.read_u8()?;
            return match sig2 {
                0x00 => Ok(Some(Event::Nop)),
                0xF0 => Ok(Some(Event::Exclusive(Exclusive::read(
                    reader,
                    ExclusiveLength::Variable,
                )?))),
                _ => Err(invalid(offset, &[sig, sig2])),
            };
        }

        if sig != 0 {
            return read_short_note(reader, sig).map(Some);
        }

        let s = reader.read_u8()?;
        let channel = s >> 6;
        let event = match (s >> 4) & 3 {
            3 => {
                let value = reader.read_u8()?;
                match s & 15 {
                    0 => Event::ProgramChange {
                        channel,
                        program: value,
                    },
                    1 => Event::ControlChange {
                        channel,
                        controller: Controller::BankSelectLsb,
                        value,
                    },
                    2 => Event::OctaveShift {
                        channel,
                        value: if value >= 0x80 {
                            -(i32::from(value) - 0x80)
                        } else {
                            i32::from(value)
                        },
                    },
                    3 => Event::ControlChange {
                        channel,
                        controller: Controller::Modulation,
                        value,
                    },
                    4 => Event::PitchBend {
                        channel,
                        value: (i32::from(value) - 64) * (8192 / 64),
                    },
                    7 => Event::ControlChange {
                        channel,
                        controller: Controller::MainVolume,
                        value,
                    },
                    10 => Event::ControlChange {
                        channel,
                        controller: Controller::Panpot,
                        value,
                    },
                    11 => Event::ControlChange {
                        channel,
                        controller: Controller::Expression,
                        value,
                    },
                    _ => return Err(invalid(offset, &[sig, s])),
                }
            }
            2 => Event::ControlChange {
                channel,
                controller: Controller::Modulation,
                value: SHORT_MOD_TABLE[usize::from(s & 15)],
            },
            1 => Event::PitchBend {
                channel,
                value: (i32::from(s & 15) * 8 - 64) * (8192 / 64),
            },
            _ => Event::ControlChange {
                channel,
                controller: Controller::Expression,
                value: SHORT_EXP_TABLE[usize::from(s & 15)],
            },
        };
        Ok(Some(event))
    }

    fn name(&self) -> &str {
        "HandyPhoneStandard"
    }
}

/// `SEQU` chunk grammar
pub struct SequGrammar;

impl EventGrammar for SequGrammar {
    fn read_duration(&self, reader: &mut ByteReader<'_>) -> Result<u32> {
        read_variable_int(reader, false)
    }

    fn decode_one(
        &self,
        reader: &mut ByteReader<'_>,
        _ctx: &mut EventContext,
    ) -> Result<Option<Event>> {
        let offset = reader.offset();
        let sig = reader.read_u8()?;

        match sig {
            0x00 => {
                let s = reader.read_u8()?;
                let channel = s >> 6;
                let msg = s & 0x3F;
                let cc = |controller, value| Event::ControlChange {
                    channel,
                    controller,
                    value,
                };
                let event = match msg {
                    0x00 => Event::FineTune {
                        channel,
                        value: reader.read_u8()?,
                    },
                    0x01..=0x0E => cc(Controller::Expression, SHORT_EXP_TABLE[usize::from(msg)]),
                    0x11..=0x1E => Event::PitchBend {
                        channel,
                        value: i32::from(msg - 0x10) * 16384 / 16,
                    },
                    0x21..=0x2E => cc(
                        Controller::Modulation,
                        SHORT_MOD_TABLE[usize::from(msg - 0x20)],
                    ),
                    0x30 => Event::ProgramChange {
                        channel,
                        program: reader.read_u8()?,
                    },
                    0x31 => cc(Controller::BankSelectLsb, reader.read_u8()?),
                    0x32 => {
                        let v = i32::from(reader.read_u8()?);
                        Event::OctaveShift {
                            channel,
                            value: if v >= 0x80 { 0x80 - v } else { v },
                        }
                    }
                    0x33 => cc(Controller::Modulation, reader.read_u8()?),
                    0x34 => Event::PitchBend {
                        channel,
                        value: i32::from(reader.read_u8()?) * 16384 / 256,
                    },
                    0x36 | 0x3B => cc(Controller::Expression, reader.read_u8()?),
                    0x37 => cc(Controller::MainVolume, reader.read_u8()?),
                    0x3A => cc(Controller::Panpot, reader.read_u8()?),
                    _ => return Err(invalid(offset, &[sig, s])),
                };
                Ok(Some(event))
            }
            0xFF => {
                let sig2 = reader.read_u8()?;
                match sig2 {
                    0x00 => Ok(Some(Event::Nop)),
                    0xF0 => Ok(Some(Event::Exclusive(Exclusive::read(
                        reader,
                        ExclusiveLength::Fixed,
                    )?))),
                    _ => Err(invalid(offset, &[sig, sig2])),
                }
            }
            _ => read_short_note(reader, sig).map(Some),
        }
    }

    fn name(&self) -> &str {
        "SEQU"
    }
}

/// Mobile Standard grammar (MIDI-like status bytes)
pub struct MobileGrammar;

impl EventGrammar for MobileGrammar {
    fn read_duration(&self, reader: &mut ByteReader<'_>) -> Result<u32> {
        read_variable_int(reader, true)
    }

    fn decode_one(
        &self,
        reader: &mut ByteReader<'_>,
        ctx: &mut EventContext,
    ) -> Result<Option<Event>> {
        let offset = reader.offset();
        let sig = reader.read_u8()?;
        let channel = sig & 0x0F;

        let event = match sig & 0xF0 {
            0x80 | 0x90 => {
                let note = reader.read_u8()?;
                let velocity = if sig & 0xF0 == 0x90 {
                    let v = reader.read_u8()?;
                    ctx.last_velocity[usize::from(channel)] = v;
                    v
                } else {
                    ctx.last_velocity[usize::from(channel)]
                };
                let gate_time = read_variable_int(reader, true)?;
                Event::Note {
                    channel,
                    note,
                    velocity,
                    gate_time,
                }
            }
            0xB0 => {
                let cc = reader.read_u8()?;
                let value = reader.read_u8()?;
                Event::ControlChange {
                    channel,
                    controller: Controller::from(cc),
                    value,
                }
            }
            0xC0 => Event::ProgramChange {
                channel,
                program: reader.read_u8()?,
            },
            0xE0 => {
                let v = reader.read_u16_le()?;
                let value = i32::from((v & 0x7F) | ((v & 0x7F00) >> 1)) - 8192;
                Event::PitchBend { channel, value }
            }
            0xF0 if sig == 0xF0 => {
                Event::Exclusive(Exclusive::read(reader, ExclusiveLength::Variable)?)
            }
            0xF0 if sig == 0xFF => match reader.read_u8()? {
                0x00 => Event::Nop,
                0x2F => match reader.read_u8()? {
                    0x00 => return Ok(None),
                    s2 => return Err(invalid(offset, &[sig, 0x2F, s2])),
                },
                s => return Err(invalid(offset, &[sig, s])),
            },
            _ => return Err(invalid(offset, &[sig])),
        };
        Ok(Some(event))
    }

    fn name(&self) -> &str {
        "MobileStandard"
    }
}
