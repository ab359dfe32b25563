//! Status lines sent back by the bridge

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{digit1, space1};
use nom::combinator::{all_consuming, map, map_res, value};
use nom::sequence::preceded;
use nom::IResult;

/// One line read from the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceLine {
    /// `=N`: the device freed N bytes of its receive buffer
    Credit(usize),
    /// `version N`
    Version(u32),
    /// `ready`: handshake complete
    Ready,
    /// Anything else, logged only
    Other(String),
}

fn credit(input: &str) -> IResult<&str, DeviceLine> {
    map(
        preceded(tag("="), map_res(digit1, str::parse::<usize>)),
        DeviceLine::Credit,
    )(input)
}

fn version(input: &str) -> IResult<&str, DeviceLine> {
    map(
        preceded(
            tag("version"),
            preceded(space1, map_res(digit1, str::parse::<u32>)),
        ),
        DeviceLine::Version,
    )(input)
}

fn ready(input: &str) -> IResult<&str, DeviceLine> {
    value(DeviceLine::Ready, tag("ready"))(input)
}

impl DeviceLine {
    /// Classify a line; a trailing CR/LF is ignored and empty lines give `None`
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        if line.is_empty() {
            return None;
        }
        let parsed = all_consuming(alt((credit, version, ready)))(line)
            .map(|(_, parsed)| parsed)
            .unwrap_or_else(|_| DeviceLine::Other(line.to_string()));
        Some(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_line() {
        assert_eq!(DeviceLine::parse("=60\r\n"), Some(DeviceLine::Credit(60)));
        assert_eq!(
            DeviceLine::parse("=x"),
            Some(DeviceLine::Other("=x".to_string()))
        );
    }

    #[test]
    fn test_handshake_lines() {
        assert_eq!(
            DeviceLine::parse("version 130"),
            Some(DeviceLine::Version(130))
        );
        assert_eq!(DeviceLine::parse("ready\n"), Some(DeviceLine::Ready));
        assert_eq!(
            DeviceLine::parse("ready!"),
            Some(DeviceLine::Other("ready!".to_string()))
        );
    }

    #[test]
    fn test_empty_line() {
        assert_eq!(DeviceLine::parse("\r\n"), None);
    }
}
