//! Port number domain model and validation.

use std::fmt;
use std::num::IntErrorKind;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lowest legal TCP port.
pub const MIN_PORT: i64 = 1;

/// Highest legal TCP port.
pub const MAX_PORT: i64 = 65535;

// ============================================================================
// InvalidPort
// ============================================================================

/// Why a candidate port was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InvalidPortReason {
    /// The input was not an integer.
    NotANumber,
    /// The integer was outside [1, 65535].
    OutOfRange,
    /// Another process already listens on the port.
    InUse,
}

impl InvalidPortReason {
    /// Human readable reason, as shown to the user.
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidPortReason::NotANumber => "not a number",
            InvalidPortReason::OutOfRange => "out of range",
            InvalidPortReason::InUse => "port in use",
        }
    }
}

impl fmt::Display for InvalidPortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate port failed validation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{reason}")]
pub struct InvalidPort {
    pub reason: InvalidPortReason,
}

impl InvalidPort {
    pub fn new(reason: InvalidPortReason) -> Self {
        Self { reason }
    }
}

// ============================================================================
// PortNumber
// ============================================================================

/// A validated TCP port in [1, 65535].
///
/// The only way to obtain one is through [`validate`], [`parse`] or
/// `TryFrom<u16>`, so an out-of-range value can never be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct PortNumber(u16);

impl PortNumber {
    /// The raw port value.
    pub fn get(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for PortNumber {
    type Error = InvalidPort;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        validate(i64::from(value))
    }
}

impl From<PortNumber> for u16 {
    fn from(port: PortNumber) -> Self {
        port.0
    }
}

impl fmt::Display for PortNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PortNumber {
    type Err = InvalidPort;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

/// Check that an integer is a legal TCP port.
pub fn validate(candidate: i64) -> Result<PortNumber, InvalidPort> {
    if !(MIN_PORT..=MAX_PORT).contains(&candidate) {
        return Err(InvalidPort::new(InvalidPortReason::OutOfRange));
    }
    // Range checked above.
    Ok(PortNumber(candidate as u16))
}

/// Parse user supplied text into a validated port.
///
/// Digits that overflow an `i64` are still a number, so they are reported as
/// out of range rather than "not a number".
pub fn parse(text: &str) -> Result<PortNumber, InvalidPort> {
    match text.trim().parse::<i64>() {
        Ok(candidate) => validate(candidate),
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => {
                Err(InvalidPort::new(InvalidPortReason::OutOfRange))
            }
            _ => Err(InvalidPort::new(InvalidPortReason::NotANumber)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_bounds() {
        assert_eq!(validate(1).unwrap().get(), 1);
        assert_eq!(validate(65535).unwrap().get(), 65535);
        assert_eq!(validate(443).unwrap().get(), 443);

        for bad in [i64::MIN, -1, 0, 65536, 70000, i64::MAX] {
            let err = validate(bad).unwrap_err();
            assert_eq!(err.reason, InvalidPortReason::OutOfRange, "{}", bad);
        }
    }

    #[test]
    fn test_validate_matches_range_everywhere() {
        for p in -10i64..=65545 {
            assert_eq!(validate(p).is_ok(), (1..=65535).contains(&p), "{}", p);
        }
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse("8443").unwrap().get(), 8443);
        assert_eq!(parse("  443\n").unwrap().get(), 443);
        assert_eq!(parse("+80").unwrap().get(), 80);
    }

    #[test]
    fn test_parse_not_a_number() {
        for text in ["abc", "", "   ", "12ab", "4.5", "0x50", "443 443"] {
            let err = parse(text).unwrap_err();
            assert_eq!(err.reason, InvalidPortReason::NotANumber, "{:?}", text);
            assert_eq!(err.to_string(), "not a number");
        }
    }

    #[test]
    fn test_parse_out_of_range() {
        for text in ["0", "-1", "65536", "99999999999999999999999"] {
            let err = parse(text).unwrap_err();
            assert_eq!(err.reason, InvalidPortReason::OutOfRange, "{:?}", text);
            assert_eq!(err.to_string(), "out of range");
        }
    }

    #[test]
    fn test_try_from_u16_rejects_zero() {
        assert!(PortNumber::try_from(0u16).is_err());
        assert_eq!(PortNumber::try_from(22u16).unwrap().to_string(), "22");
    }

    #[test]
    fn test_serde_validates() {
        let port: PortNumber = serde_json::from_str("8080").unwrap();
        assert_eq!(port.get(), 8080);
        assert_eq!(serde_json::to_string(&port).unwrap(), "8080");
        assert!(serde_json::from_str::<PortNumber>("0").is_err());
    }
}
