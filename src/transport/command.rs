//! Wire encoding of bridge commands

/// Longest single wait; `FF FF FF` is reserved for terminate
pub const MAX_WAIT_MS: u16 = 0xFFFE;

const WAIT_PREFIX: u8 = 0xFF;
const MULTI_BYTE_FLAG: u8 = 0x80;

/// One command understood by the bridge sketch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Write `data` to register `addr` over SPI
    Spi {
        /// Register address (7 bits)
        addr: u8,
        /// Register payload
        data: Vec<u8>,
    },
    /// Idle for the given number of milliseconds
    Wait(u16),
    /// End of stream
    Terminate,
}

impl Command {
    /// Single-register write
    pub fn write(addr: u8, value: u8) -> Self {
        Command::Spi {
            addr,
            data: vec![value],
        }
    }

    /// Burst write
    pub fn write_all(addr: u8, data: Vec<u8>) -> Self {
        Command::Spi { addr, data }
    }

    /// Append the wire bytes to `out`.
    ///
    /// Single writes are `addr value`; bursts are
    /// `addr|0x80 len_hi len_lo data..`; waits are `FF ms_hi ms_lo`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Command::Spi { addr, data } if data.len() == 1 => {
                out.push(*addr);
                out.extend_from_slice(data);
            }
            Command::Spi { addr, data } => {
                let len = data.len() as u16;
                out.push(addr | MULTI_BYTE_FLAG);
                out.extend_from_slice(&len.to_be_bytes());
                out.extend_from_slice(data);
            }
            Command::Wait(ms) => {
                out.push(WAIT_PREFIX);
                out.extend_from_slice(&ms.to_be_bytes());
            }
            Command::Terminate => out.extend_from_slice(&[0xFF, 0xFF, 0xFF]),
        }
    }

    /// Encoded length in bytes
    pub fn encoded_len(&self) -> usize {
        match self {
            Command::Spi { data, .. } if data.len() == 1 => 2,
            Command::Spi { data, .. } => 3 + data.len(),
            Command::Wait(_) | Command::Terminate => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(command: Command) -> Vec<u8> {
        let mut out = Vec::new();
        command.encode(&mut out);
        assert_eq!(out.len(), command.encoded_len());
        out
    }

    #[test]
    fn test_single_register_write() {
        assert_eq!(bytes(Command::write(25, 0xC0)), vec![25, 0xC0]);
    }

    #[test]
    fn test_burst_write() {
        assert_eq!(
            bytes(Command::write_all(7, vec![0x81, 1, 2])),
            vec![0x87, 0x00, 0x03, 0x81, 1, 2]
        );
    }

    #[test]
    fn test_wait_and_terminate() {
        assert_eq!(bytes(Command::Wait(1000)), vec![0xFF, 0x03, 0xE8]);
        assert_eq!(bytes(Command::Terminate), vec![0xFF, 0xFF, 0xFF]);
        assert_ne!(bytes(Command::Wait(MAX_WAIT_MS)), bytes(Command::Terminate));
    }
}
