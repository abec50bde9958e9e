//! Alternate states - "no usable value" tags
//!
//! A live value may be missing, not yet known, or intentionally absent. These
//! conditions travel as [`AlternateState`] tags instead of as sentinel values so
//! they can never be mistaken for an ordinary number or string.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical sentinel text for an unavailable value
pub const STATE_UNAVAILABLE: &str = "unavailable";
/// Canonical sentinel text for an unknown value
pub const STATE_UNKNOWN: &str = "unknown";
/// Canonical sentinel text for an absent value
pub const STATE_NONE: &str = "none";
/// Canonical text for the fallback tag
pub const STATE_FALLBACK: &str = "fallback";

/// Closed set of alternate states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlternateState {
    /// Value intentionally absent (null)
    None,
    /// Value not known yet
    Unknown,
    /// Source is unavailable
    Unavailable,
    /// A fallback value is in effect
    Fallback,
}

impl AlternateState {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => STATE_NONE,
            Self::Unknown => STATE_UNKNOWN,
            Self::Unavailable => STATE_UNAVAILABLE,
            Self::Fallback => STATE_FALLBACK,
        }
    }

    /// Value used to carry this state inside an evaluation context
    pub fn sentinel_value(&self) -> Value {
        match self {
            Self::None => Value::Null,
            other => Value::String(other.as_str().to_string()),
        }
    }

    /// Whether a referenced input in this state stops evaluation early
    pub fn blocks_evaluation(&self) -> bool {
        matches!(self, Self::None | Self::Unknown | Self::Unavailable)
    }
}

impl fmt::Display for AlternateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AlternateState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            STATE_NONE => Ok(Self::None),
            STATE_UNKNOWN => Ok(Self::Unknown),
            STATE_UNAVAILABLE => Ok(Self::Unavailable),
            STATE_FALLBACK => Ok(Self::Fallback),
            _ => Err(format!("Unknown alternate state: {}", s)),
        }
    }
}

/// Screen a value for an alternate state.
///
/// `null` is [`AlternateState::None`]; the sentinel strings `unavailable`,
/// `unknown` and `none` match case-insensitively. `fallback` is never inferred
/// from text. Anything else passes through as `None`.
pub fn identify_alternate_state(value: &Value) -> Option<AlternateState> {
    match value {
        Value::Null => Some(AlternateState::None),
        Value::String(s) => {
            let lowered = s.trim().to_lowercase();
            match lowered.as_str() {
                STATE_UNAVAILABLE => Some(AlternateState::Unavailable),
                STATE_UNKNOWN => Some(AlternateState::Unknown),
                STATE_NONE => Some(AlternateState::None),
                _ => None,
            }
        },
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_identify_sentinels() {
        assert_eq!(
            identify_alternate_state(&Value::from("unavailable")),
            Some(AlternateState::Unavailable)
        );
        assert_eq!(
            identify_alternate_state(&Value::from("UNKNOWN")),
            Some(AlternateState::Unknown)
        );
        assert_eq!(
            identify_alternate_state(&Value::Null),
            Some(AlternateState::None)
        );
        assert_eq!(
            identify_alternate_state(&Value::from("None")),
            Some(AlternateState::None)
        );
    }

    #[test]
    fn test_ordinary_values_pass_through() {
        assert_eq!(identify_alternate_state(&Value::Float(0.0)), None);
        assert_eq!(identify_alternate_state(&Value::from("on")), None);
        assert_eq!(identify_alternate_state(&Value::from("fallback")), None);
        assert_eq!(identify_alternate_state(&Value::Bool(false)), None);
    }

    #[test]
    fn test_sentinel_round_trip() {
        for state in [
            AlternateState::None,
            AlternateState::Unknown,
            AlternateState::Unavailable,
        ] {
            assert_eq!(identify_alternate_state(&state.sentinel_value()), Some(state));
        }
        assert_eq!("Unavailable".parse::<AlternateState>().unwrap(), AlternateState::Unavailable);
        assert!("bogus".parse::<AlternateState>().is_err());
    }

    #[test]
    fn test_fallback_does_not_block() {
        assert!(!AlternateState::Fallback.blocks_evaluation());
        assert!(AlternateState::Unknown.blocks_evaluation());
    }
}
