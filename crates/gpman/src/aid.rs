//! Application identifiers

use std::{fmt, str::FromStr};

use derive_more::{AsRef, Deref};

use crate::{Error, Result};

/// Minimum AID length in bytes
pub const MIN_AID_LENGTH: usize = 5;
/// Maximum AID length in bytes
pub const MAX_AID_LENGTH: usize = 16;

/// Application identifier naming an on-card entity
///
/// Always between 5 and 16 bytes long. Displayed as uppercase hex.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deref, AsRef)]
#[deref(forward)]
#[as_ref(forward)]
pub struct Aid(Vec<u8>);

impl Aid {
    /// Create an AID from raw bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if !(MIN_AID_LENGTH..=MAX_AID_LENGTH).contains(&bytes.len()) {
            return Err(Error::Usage(format!(
                "AID must be {MIN_AID_LENGTH}-{MAX_AID_LENGTH} bytes, got {} ({})",
                bytes.len(),
                hex::encode_upper(&bytes)
            )));
        }
        Ok(Self(bytes))
    }

    /// Parse an AID from hex, ignoring `:` and whitespace separators
    pub fn from_hex(s: &str) -> Result<Self> {
        let cleaned: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != ':')
            .collect();
        let cleaned = cleaned
            .strip_prefix("0x")
            .or_else(|| cleaned.strip_prefix("0X"))
            .unwrap_or(&cleaned);
        let bytes = hex::decode(cleaned)
            .map_err(|e| Error::Usage(format!("invalid AID '{s}': {e}")))?;
        Self::new(bytes)
    }

    /// Raw AID bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Printable rendering of the AID bytes when they are all ASCII graphic
    pub fn readable(&self) -> Option<String> {
        self.0
            .iter()
            .all(|b| b.is_ascii_graphic())
            .then(|| self.0.iter().map(|&b| b as char).collect())
    }
}

impl FromStr for Aid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl TryFrom<&[u8]> for Aid {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        Self::new(bytes.to_vec())
    }
}

impl fmt::Display for Aid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(&self.0))
    }
}

impl fmt::Debug for Aid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Aid({self})")
    }
}
