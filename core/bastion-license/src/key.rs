//! License key generation and shape validation.
//!
//! Keys use the format `XXXXX-XXXXX-XXXXX-XXXXX`: four groups of five
//! characters, each drawn uniformly from [`KEY_ALPHABET`]. The alphabet is
//! upper-case letters and digits minus `0`, `O`, `1` and `I`, so a key read
//! aloud or copied from print survives transcription.
//!
//! The textual shape is a public contract. [`LicenseKey::parse`] only strips
//! surrounding whitespace; it never upper-cases or repairs separators.

use crate::error::{LicenseError, LicenseResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The 32 symbols a key may contain.
pub const KEY_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Number of hyphen-separated groups in a key.
pub const GROUP_COUNT: usize = 4;

/// Characters per group.
pub const GROUP_LEN: usize = 5;

const KEY_LEN: usize = GROUP_COUNT * GROUP_LEN + (GROUP_COUNT - 1);

/// A well-formed license key.
///
/// Holding a `LicenseKey` proves the text has the right shape, not that a
/// license with this key exists.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LicenseKey(String);

impl LicenseKey {
    /// Generates a random key using the thread-local RNG.
    #[must_use]
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::thread_rng())
    }

    /// Generates a random key from the given RNG.
    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut key = String::with_capacity(KEY_LEN);
        for group in 0..GROUP_COUNT {
            if group > 0 {
                key.push('-');
            }
            for _ in 0..GROUP_LEN {
                let idx = rng.gen_range(0..KEY_ALPHABET.len());
                key.push(char::from(KEY_ALPHABET[idx]));
            }
        }
        Self(key)
    }

    /// Parses a key, accepting only the exact `XXXXX-XXXXX-XXXXX-XXXXX` shape.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidKeyFormat`] describing the first problem found.
    pub fn parse(input: &str) -> LicenseResult<Self> {
        let key = input.trim();
        check_shape(key).map_err(LicenseError::InvalidKeyFormat)?;
        Ok(Self(key.to_string()))
    }

    /// Returns true if `candidate` is exactly a key, with no surrounding whitespace.
    #[must_use]
    pub fn is_well_formed(candidate: &str) -> bool {
        check_shape(candidate).is_ok()
    }

    /// Returns the key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the key with all but the last group masked, for log lines.
    #[must_use]
    pub fn redacted(&self) -> String {
        let tail = &self.0[KEY_LEN - GROUP_LEN..];
        format!("*****-*****-*****-{tail}")
    }
}

fn check_shape(key: &str) -> Result<(), String> {
    if key.len() != KEY_LEN {
        return Err(format!("expected {KEY_LEN} characters, got {}", key.len()));
    }

    let groups: Vec<&str> = key.split('-').collect();
    if groups.len() != GROUP_COUNT {
        return Err(format!("expected {GROUP_COUNT} groups separated by '-'"));
    }

    for (n, group) in groups.iter().enumerate() {
        if group.len() != GROUP_LEN {
            return Err(format!("group {} must have {GROUP_LEN} characters", n + 1));
        }
        if let Some(bad) = group.bytes().find(|b| !KEY_ALPHABET.contains(b)) {
            return Err(format!(
                "character {:?} is not allowed in a key",
                char::from(bad)
            ));
        }
    }

    Ok(())
}

impl fmt::Display for LicenseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LicenseKey {
    type Err = LicenseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for LicenseKey {
    type Error = LicenseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        check_shape(&value).map_err(LicenseError::InvalidKeyFormat)?;
        Ok(Self(value))
    }
}

impl From<LicenseKey> for String {
    fn from(key: LicenseKey) -> Self {
        key.0
    }
}

impl AsRef<str> for LicenseKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
