//! Phone identity normalization.
//!
//! Every contact in the system is keyed by its canonical international phone
//! number. This module turns whatever a messaging provider or a human typed
//! (`"+34 600-111-222"`, `"0034600111222"`, `"34600111222"`) into that
//! canonical form, or rejects it. Pure functions only; safe to call from any
//! task without synchronization.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A validated, canonicalized phone identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhoneNumber {
    /// International format with a leading `+`, e.g. `+34600111222`.
    pub canonical: String,
    /// ISO 3166-1 alpha-2 code of the detected country, e.g. `ES`.
    pub country_code: String,
    /// Human-readable country name, e.g. `Spain`.
    pub country_name: String,
}

impl PhoneNumber {
    /// Last four digits, for redacted logging.
    pub fn redacted(&self) -> String {
        let digits: Vec<char> = self.canonical.chars().filter(char::is_ascii_digit).collect();
        let tail: String = digits.iter().rev().take(4).rev().collect();
        format!("…{tail}")
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PhoneError {
    #[error("phone number is empty or contains no digits")]
    NoDigits,
    #[error("phone number contains invalid character `{0}`")]
    InvalidCharacter(char),
    #[error("phone number `{0}` has no recognizable country prefix")]
    UnknownCountryPrefix(String),
    #[error("phone number has {digits} national digits but {country} expects {min} to {max}")]
    InvalidLength { country: &'static str, digits: usize, min: usize, max: usize },
}

struct CountrySpec {
    dial: &'static str,
    iso: &'static str,
    name: &'static str,
    min_digits: usize,
    max_digits: usize,
}

/// Served markets. Matching is longest-dial-prefix-first, so `351` resolves
/// to Portugal before `35` could shadow it.
const SUPPORTED_COUNTRIES: &[CountrySpec] = &[
    CountrySpec { dial: "351", iso: "PT", name: "Portugal", min_digits: 9, max_digits: 9 },
    CountrySpec { dial: "34", iso: "ES", name: "Spain", min_digits: 9, max_digits: 9 },
    CountrySpec { dial: "33", iso: "FR", name: "France", min_digits: 9, max_digits: 9 },
    CountrySpec { dial: "39", iso: "IT", name: "Italy", min_digits: 9, max_digits: 10 },
    CountrySpec { dial: "44", iso: "GB", name: "United Kingdom", min_digits: 10, max_digits: 10 },
    CountrySpec { dial: "49", iso: "DE", name: "Germany", min_digits: 10, max_digits: 11 },
    CountrySpec { dial: "31", iso: "NL", name: "Netherlands", min_digits: 9, max_digits: 9 },
    CountrySpec { dial: "52", iso: "MX", name: "Mexico", min_digits: 10, max_digits: 10 },
    CountrySpec { dial: "54", iso: "AR", name: "Argentina", min_digits: 10, max_digits: 10 },
    CountrySpec { dial: "55", iso: "BR", name: "Brazil", min_digits: 10, max_digits: 11 },
    CountrySpec { dial: "57", iso: "CO", name: "Colombia", min_digits: 10, max_digits: 10 },
    CountrySpec { dial: "1", iso: "US", name: "United States", min_digits: 10, max_digits: 10 },
];

/// Validate and canonicalize a raw phone string.
///
/// Idempotent: for any accepted input, feeding the canonical output back in
/// yields the same `PhoneNumber`.
pub fn normalize(raw: &str) -> Result<PhoneNumber, PhoneError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PhoneError::NoDigits);
    }

    let mut digits = String::with_capacity(trimmed.len());
    for (index, character) in trimmed.chars().enumerate() {
        match character {
            '0'..='9' => digits.push(character),
            '+' if index == 0 => {}
            ' ' | '-' | '(' | ')' | '.' | '/' => {}
            other => return Err(PhoneError::InvalidCharacter(other)),
        }
    }
    if digits.is_empty() {
        return Err(PhoneError::NoDigits);
    }

    // `00` is the ITU international call prefix and equivalent to `+`.
    let international = digits.strip_prefix("00").unwrap_or(&digits);

    let spec = match_country(international)
        .ok_or_else(|| PhoneError::UnknownCountryPrefix(redact_raw(international)))?;

    let national = &international[spec.dial.len()..];
    if national.len() < spec.min_digits || national.len() > spec.max_digits {
        return Err(PhoneError::InvalidLength {
            country: spec.name,
            digits: national.len(),
            min: spec.min_digits,
            max: spec.max_digits,
        });
    }

    Ok(PhoneNumber {
        canonical: format!("+{}{national}", spec.dial),
        country_code: spec.iso.to_string(),
        country_name: spec.name.to_string(),
    })
}

fn match_country(digits: &str) -> Option<&'static CountrySpec> {
    let mut best: Option<&'static CountrySpec> = None;
    for spec in SUPPORTED_COUNTRIES {
        if digits.starts_with(spec.dial) && digits.len() > spec.dial.len() {
            let is_longer = best.map(|found| spec.dial.len() > found.dial.len()).unwrap_or(true);
            if is_longer {
                best = Some(spec);
            }
        }
    }
    best
}

fn redact_raw(digits: &str) -> String {
    if digits.len() <= 4 {
        digits.to_string()
    } else {
        format!("{}…", &digits[..4])
    }
}
