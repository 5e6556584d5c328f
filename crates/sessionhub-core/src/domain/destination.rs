//! Destination addresses and their normalisation.
//!
//! Callers pass phone numbers in whatever shape the business layer stored
//! them (`"084 123 4567"`, `"+258841234567"`, `"0841234567"`).  The external
//! network wants bare international digits, so every destination goes
//! through [`normalize_destination`] before it is queued or sent.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A normalised destination: international digits only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Destination(String);

impl Destination {
    /// Wraps an already-normalised value without checking it.
    pub fn new_unchecked(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DestinationError {
    #[error("destination {0:?} contains no usable digits")]
    NoDigits(String),
}

/// Normalises a raw destination.
///
/// 1. Keep ASCII digits only.
/// 2. Drop a single leading trunk `0`.
/// 3. Prefix `default_country_code` when the number does not already start
///    with it.
///
/// # Errors
///
/// Returns [`DestinationError::NoDigits`] when nothing is left after step 2.
pub fn normalize_destination(
    raw: &str,
    default_country_code: Option<&str>,
) -> Result<Destination, DestinationError> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let national = digits.strip_prefix('0').unwrap_or(&digits);

    if national.is_empty() {
        return Err(DestinationError::NoDigits(raw.to_string()));
    }

    let normalized = match default_country_code {
        Some(cc) if !cc.is_empty() && !national.starts_with(cc) => format!("{cc}{national}"),
        _ => national.to_string(),
    };
    Ok(Destination(normalized))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
