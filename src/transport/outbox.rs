//! Credit-limited output queue
//!
//! Commands are queued unencoded so consecutive waits can be merged, then
//! encoded into a byte buffer when drained. The device grants credit for as
//! many bytes as its receive buffer can take; a drain never writes more than
//! the credit left.

use super::command::{Command, MAX_WAIT_MS};
use std::io::{self, Write};

/// Receive buffer size of the bridge, granted as credit on connect
pub const INITIAL_CREDIT: usize = 60;

/// Pending commands and bytes plus the remaining credit
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    commands: Vec<Command>,
    buffer: Vec<u8>,
    credit: usize,
    sent_total: usize,
}

impl Outbox {
    /// Outbox holding the bridge's initial credit
    pub fn new() -> Self {
        Self::with_credit(INITIAL_CREDIT)
    }

    /// Outbox with an explicit starting credit
    pub fn with_credit(credit: usize) -> Self {
        Outbox {
            credit,
            ..Default::default()
        }
    }

    /// Queue a command
    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Queue a wait, extending a wait that is still the last queued command
    pub fn push_wait(&mut self, ms: u32) {
        let mut rest = ms;
        if let Some(Command::Wait(last)) = self.commands.last_mut() {
            let room = u32::from(MAX_WAIT_MS - *last).min(rest);
            *last += room as u16;
            rest -= room;
        }
        while rest > 0 {
            let chunk = rest.min(u32::from(MAX_WAIT_MS));
            self.commands.push(Command::Wait(chunk as u16));
            rest -= chunk;
        }
    }

    /// Add credit reported by the device
    pub fn add_credit(&mut self, bytes: usize) {
        self.credit = self.credit.saturating_add(bytes);
    }

    /// Encode queued commands and write as many bytes as the credit allows.
    ///
    /// Returns the number of bytes written.
    pub fn drain_to(&mut self, writer: &mut dyn Write) -> io::Result<usize> {
        for command in self.commands.drain(..) {
            command.encode(&mut self.buffer);
        }
        let len = self.buffer.len().min(self.credit);
        if len == 0 {
            return Ok(0);
        }
        let n = writer.write(&self.buffer[..len])?;
        writer.flush()?;
        self.buffer.drain(..n);
        self.sent_total += n;
        self.credit -= n;
        Ok(n)
    }

    /// True when no command or byte is waiting
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.buffer.is_empty()
    }

    /// Encoded bytes still waiting, including queued commands
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len() + self.commands.iter().map(Command::encoded_len).sum::<usize>()
    }

    /// Remaining credit
    pub fn credit(&self) -> usize {
        self.credit
    }

    /// Bytes written since creation
    pub fn sent_total(&self) -> usize {
        self.sent_total
    }
}
