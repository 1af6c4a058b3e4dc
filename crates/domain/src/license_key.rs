use std::fmt::{Display, Formatter};

use keyward_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

const KEY_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const KEY_GROUPS: usize = 5;
const KEY_GROUP_LENGTH: usize = 5;
const UNBIASED_BYTE_LIMIT: usize = 256 - 256 % KEY_ALPHABET.len();

/// Number of random symbols in one license key.
pub const LICENSE_KEY_SYMBOLS: usize = KEY_GROUPS * KEY_GROUP_LENGTH;

/// License key in the canonical `XXXXX-XXXXX-XXXXX-XXXXX-XXXXX` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LicenseKey(String);

impl LicenseKey {
    /// Parses user input into a canonical key.
    ///
    /// Case and surrounding whitespace are ignored; dashes may be omitted.
    pub fn parse(value: &str) -> AppResult<Self> {
        let symbols: Vec<u8> = value
            .trim()
            .bytes()
            .filter(|byte| *byte != b'-')
            .map(|byte| byte.to_ascii_uppercase())
            .collect();

        if symbols.len() != LICENSE_KEY_SYMBOLS {
            return Err(AppError::Validation(format!(
                "license key must contain {LICENSE_KEY_SYMBOLS} characters"
            )));
        }

        if !symbols.iter().all(|byte| KEY_ALPHABET.contains(byte)) {
            return Err(AppError::Validation(
                "license key may only contain letters A-Z and digits".to_owned(),
            ));
        }

        Ok(Self::from_symbols(&symbols))
    }

    /// Builds a key from random bytes, one symbol per accepted byte.
    ///
    /// Bytes at or above the largest multiple of the alphabet size are skipped so
    /// every symbol is equally likely. Returns `None` when too few bytes remain.
    #[must_use]
    pub fn from_entropy(bytes: &[u8]) -> Option<Self> {
        let symbols: Vec<u8> = bytes
            .iter()
            .map(|byte| usize::from(*byte))
            .filter(|byte| *byte < UNBIASED_BYTE_LIMIT)
            .map(|byte| KEY_ALPHABET[byte % KEY_ALPHABET.len()])
            .take(LICENSE_KEY_SYMBOLS)
            .collect();

        (symbols.len() == LICENSE_KEY_SYMBOLS).then(|| Self::from_symbols(&symbols))
    }

    /// Returns the canonical key string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    fn from_symbols(symbols: &[u8]) -> Self {
        let groups: Vec<String> = symbols
            .chunks(KEY_GROUP_LENGTH)
            .map(|chunk| chunk.iter().map(|byte| char::from(*byte)).collect())
            .collect();

        Self(groups.join("-"))
    }
}

impl TryFrom<String> for LicenseKey {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value.as_str())
    }
}

impl From<LicenseKey> for String {
    fn from(value: LicenseKey) -> Self {
        value.0
    }
}

impl Display for LicenseKey {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}
