//! Playback configuration

use crate::{Result, Smaf825Error};

/// Baud rates the bridge sketch accepts
pub const BAUD_RATES: [u32; 12] = [
    300, 600, 1200, 2400, 4800, 9600, 14400, 19200, 28800, 38400, 57600, 115200,
];

/// Largest master volume
pub const MAX_MASTER_VOLUME: u8 = 63;
/// Largest analog gain
pub const MAX_ANALOG_GAIN: u8 = 3;
/// Largest sequencer volume
pub const MAX_SEQ_VOL: u8 = 31;

/// Options for one playback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayOptions {
    /// Number of passes through the sequence (0 = forever)
    pub loop_count: u32,
    /// Master volume (0-63)
    pub master_volume: u8,
    /// Analog gain (0-3)
    pub analog_gain: u8,
    /// Sequencer volume (0-31)
    pub seq_vol: u8,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Print the channel table while playing
    pub show_state: bool,
}

impl Default for PlayOptions {
    fn default() -> Self {
        PlayOptions {
            loop_count: 1,
            master_volume: 48,
            analog_gain: 1,
            seq_vol: 16,
            baud_rate: 57600,
            show_state: false,
        }
    }
}

impl PlayOptions {
    /// Check every value against its hardware range
    pub fn validate(&self) -> Result<()> {
        if self.master_volume > MAX_MASTER_VOLUME {
            return Err(Smaf825Error::ConfigError(format!(
                "master volume must be 0-{MAX_MASTER_VOLUME} (got {})",
                self.master_volume
            )));
        }
        if self.analog_gain > MAX_ANALOG_GAIN {
            return Err(Smaf825Error::ConfigError(format!(
                "analog gain must be 0-{MAX_ANALOG_GAIN} (got {})",
                self.analog_gain
            )));
        }
        if self.seq_vol > MAX_SEQ_VOL {
            return Err(Smaf825Error::ConfigError(format!(
                "seqvol must be 0-{MAX_SEQ_VOL} (got {})",
                self.seq_vol
            )));
        }
        if !BAUD_RATES.contains(&self.baud_rate) {
            return Err(Smaf825Error::ConfigError(format!(
                "baud rate must be one of {} (got {})",
                baud_rate_list(),
                self.baud_rate
            )));
        }
        Ok(())
    }
}

/// Accepted baud rates as `(300|600|...)`
pub fn baud_rate_list() -> String {
    let rates: Vec<String> = BAUD_RATES.iter().map(u32::to_string).collect();
    format!("({})", rates.join("|"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        assert!(PlayOptions::default().validate().is_ok());
    }

    #[test]
    fn test_out_of_range_options() {
        let cases = [
            PlayOptions {
                master_volume: 64,
                ..Default::default()
            },
            PlayOptions {
                analog_gain: 4,
                ..Default::default()
            },
            PlayOptions {
                seq_vol: 32,
                ..Default::default()
            },
            PlayOptions {
                baud_rate: 76800,
                ..Default::default()
            },
        ];
        for options in cases {
            assert!(matches!(
                options.validate(),
                Err(Smaf825Error::ConfigError(_))
            ));
        }
    }

    #[test]
    fn test_baud_rate_list() {
        assert!(baud_rate_list().starts_with("(300|600|"));
        assert!(baud_rate_list().ends_with("|115200)"));
    }
}
