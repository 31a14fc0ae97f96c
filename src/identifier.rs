use std::fmt;

use serde::{Deserialize, Serialize};

/// Digits kept for every identifier. Wider than any feed id in use and wider
/// than `u64::MAX` (20 digits), so padded forms order like the numbers.
pub const WIDTH: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    #[error("identifier is empty")]
    Empty,
    #[error("identifier {0:?} contains a non-digit character")]
    NonDigit(String),
    #[error("identifier {value:?} has {digits} significant digits, limit is {limit}", limit = WIDTH)]
    TooWide { value: String, digits: usize },
}

/// Non-negative integer of arbitrary size stored as a fixed-width,
/// zero-padded decimal string.
///
/// The padded form makes byte-wise string ordering equal to numeric ordering,
/// which is what `Ord` uses.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderedIdentifier(String);

impl OrderedIdentifier {
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IdentifierError::NonDigit(raw.to_string()));
        }
        let significant = raw.trim_start_matches('0');
        if significant.len() > WIDTH {
            return Err(IdentifierError::TooWide {
                value: raw.to_string(),
                digits: significant.len(),
            });
        }
        Ok(Self(format!("{:0>width$}", significant, width = WIDTH)))
    }

    pub fn from_u128(value: u128) -> Result<Self, IdentifierError> {
        Self::parse(&value.to_string())
    }

    /// Padded form, always `WIDTH` digits.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeral without padding, `"0"` for zero.
    pub fn numeral(&self) -> &str {
        let trimmed = self.0.trim_start_matches('0');
        if trimmed.is_empty() {
            "0"
        } else {
            trimmed
        }
    }
}

impl From<u64> for OrderedIdentifier {
    fn from(value: u64) -> Self {
        Self(format!("{:0>width$}", value, width = WIDTH))
    }
}

impl TryFrom<String> for OrderedIdentifier {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OrderedIdentifier> for String {
    fn from(value: OrderedIdentifier) -> Self {
        value.0
    }
}

impl std::str::FromStr for OrderedIdentifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for OrderedIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for OrderedIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OrderedIdentifier({})", self.numeral())
    }
}
