//! Key material for secure channel authentication and key administration
//!
//! [`KeySet::resolve`] turns operator supplied overrides into the one key
//! set used for the whole run. Role specific keys replace the master key for
//! their own role only.

use std::{fmt, str::FromStr};

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{Error, Result};

/// Well known GlobalPlatform test key shipped on most development cards
pub const DEFAULT_KEY: [u8; 16] = [
    0x40, 0x41, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49, 0x4A, 0x4B, 0x4C, 0x4D, 0x4E, 0x4F,
];

/// Block cipher a key is meant for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// Two key triple DES, used by SCP01 and SCP02
    Des3,
    /// AES, used by SCP03
    Aes,
}

impl KeyType {
    /// Key type for the given secure channel protocol version
    pub const fn for_scp(version: u8) -> Self {
        if version == 3 { Self::Aes } else { Self::Des3 }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Des3 => f.write_str("3DES"),
            Self::Aes => f.write_str("AES"),
        }
    }
}

/// Raw key material, wiped from memory on drop
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Key {
    bytes: Vec<u8>,
    #[zeroize(skip)]
    kind: KeyType,
}

impl Key {
    /// Create a key, checking the length against the key type
    pub fn new(bytes: impl Into<Vec<u8>>, kind: KeyType) -> Result<Self> {
        let bytes = bytes.into();
        let valid = match kind {
            KeyType::Des3 => bytes.len() == 16,
            KeyType::Aes => matches!(bytes.len(), 16 | 24 | 32),
        };
        if !valid {
            return Err(Error::Usage(format!(
                "{kind} key cannot be {} bytes long",
                bytes.len()
            )));
        }
        Ok(Self { bytes, kind })
    }

    /// The default key for the given key type
    pub fn default_for(kind: KeyType) -> Self {
        Self {
            bytes: DEFAULT_KEY.to_vec(),
            kind,
        }
    }

    /// Parse a triple DES key from hex
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim()).map_err(|e| Error::Usage(format!("invalid key: {e}")))?;
        Self::new(bytes, KeyType::Des3)
    }

    /// Raw key bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The key type
    pub const fn kind(&self) -> KeyType {
        self.kind
    }

    /// Whether this key carries the well known default material
    pub fn is_default(&self) -> bool {
        self.bytes == DEFAULT_KEY
    }

    /// Hex rendering of the key, for the operator record printed by lock
    pub fn to_hex(&self) -> String {
        hex::encode_upper(&self.bytes)
    }
}

impl FromStr for Key {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("kind", &self.kind)
            .field("len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

/// Key diversification scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Diversification {
    /// Static keys are used as given
    #[default]
    None,
    /// EMV CPS 1.1 diversification
    Emv,
    /// VISA2 diversification
    Visa2,
}

impl Diversification {
    /// The command line flag selecting this scheme
    pub const fn flag(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Emv => "--emv",
            Self::Visa2 => "--visa2",
        }
    }
}

impl fmt::Display for Diversification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("NONE"),
            Self::Emv => f.write_str("EMV"),
            Self::Visa2 => f.write_str("VISA2"),
        }
    }
}

/// Secure channel key role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    /// Channel encryption key
    Enc,
    /// Channel MAC key
    Mac,
    /// Key encryption key, protects keys sent with PUT KEY
    Kek,
}

impl KeyRole {
    /// All roles in key identifier order
    pub const ALL: [Self; 3] = [Self::Enc, Self::Mac, Self::Kek];
}

/// Exactly three values, one per key role, in ENC, MAC, KEK order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTriple<T>([T; 3]);

impl<T> KeyTriple<T> {
    /// Create from values in ENC, MAC, KEK order
    pub const fn new(enc: T, mac: T, kek: T) -> Self {
        Self([enc, mac, kek])
    }

    /// Value for the ENC role
    pub const fn enc(&self) -> &T {
        &self.0[0]
    }

    /// Value for the MAC role
    pub const fn mac(&self) -> &T {
        &self.0[1]
    }

    /// Value for the KEK role
    pub const fn kek(&self) -> &T {
        &self.0[2]
    }

    /// Value for the given role
    pub const fn get(&self, role: KeyRole) -> &T {
        match role {
            KeyRole::Enc => &self.0[0],
            KeyRole::Mac => &self.0[1],
            KeyRole::Kek => &self.0[2],
        }
    }

    /// Iterate in ENC, MAC, KEK order
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.0.iter()
    }

    /// Apply `f` to every value, keeping the order
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> KeyTriple<U> {
        KeyTriple(self.0.map(f))
    }

    /// Apply a fallible `f` to every value, keeping the order
    pub fn try_map<U>(self, mut f: impl FnMut(T) -> Result<U>) -> Result<KeyTriple<U>> {
        let [enc, mac, kek] = self.0;
        Ok(KeyTriple::new(f(enc)?, f(mac)?, f(kek)?))
    }
}

impl<T> TryFrom<Vec<T>> for KeyTriple<T> {
    type Error = Vec<T>;

    fn try_from(values: Vec<T>) -> std::result::Result<Self, Vec<T>> {
        <[T; 3]>::try_from(values).map(Self)
    }
}

impl<'a, T> IntoIterator for &'a KeyTriple<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Operator supplied key material before resolution
#[derive(Debug, Clone, Default)]
pub struct KeyOverrides {
    /// Master key used for every role without its own key
    pub master: Option<Key>,
    /// ENC role key
    pub enc: Option<Key>,
    /// MAC role key
    pub mac: Option<Key>,
    /// KEK role key
    pub kek: Option<Key>,
    /// Key identifier for INITIALIZE UPDATE
    pub key_id: Option<u8>,
    /// Key version for INITIALIZE UPDATE
    pub key_version: Option<u8>,
    /// EMV diversification requested
    pub emv: bool,
    /// VISA2 diversification requested
    pub visa2: bool,
}

impl KeyOverrides {
    /// Whether any key material was given explicitly
    pub const fn has_explicit_keys(&self) -> bool {
        self.master.is_some() || self.enc.is_some() || self.mac.is_some() || self.kek.is_some()
    }
}

/// Resolved static keys for opening the secure channel
#[derive(Debug, Clone)]
pub struct KeySet {
    keys: KeyTriple<Key>,
    key_id: u8,
    key_version: u8,
    diversification: Diversification,
}

impl KeySet {
    /// Resolve overrides into a key set
    ///
    /// Missing role keys fall back to the master key, and a missing master
    /// key falls back to [`DEFAULT_KEY`]. Key identifier and version default
    /// to zero, which lets the card pick its current keys.
    pub fn resolve(overrides: KeyOverrides) -> Result<Self> {
        let diversification = match (overrides.emv, overrides.visa2) {
            (true, true) => {
                return Err(Error::Usage(
                    "only one of EMV and VISA2 diversification can be selected".into(),
                ));
            }
            (true, false) => Diversification::Emv,
            (false, true) => Diversification::Visa2,
            (false, false) => Diversification::None,
        };

        let master = overrides
            .master
            .unwrap_or_else(|| Key::default_for(KeyType::Des3));
        let keys = KeyTriple::new(
            overrides.enc.unwrap_or_else(|| master.clone()),
            overrides.mac.unwrap_or_else(|| master.clone()),
            overrides.kek.unwrap_or(master),
        );

        Ok(Self {
            keys,
            key_id: overrides.key_id.unwrap_or(0),
            key_version: overrides.key_version.unwrap_or(0),
            diversification,
        })
    }

    /// Static keys in ENC, MAC, KEK order
    pub const fn keys(&self) -> &KeyTriple<Key> {
        &self.keys
    }

    /// Key identifier sent in INITIALIZE UPDATE
    pub const fn key_id(&self) -> u8 {
        self.key_id
    }

    /// Key version sent in INITIALIZE UPDATE
    pub const fn key_version(&self) -> u8 {
        self.key_version
    }

    /// Requested diversification scheme
    pub const fn diversification(&self) -> Diversification {
        self.diversification
    }
}

impl Default for KeySet {
    fn default() -> Self {
        let key = Key::default_for(KeyType::Des3);
        Self {
            keys: KeyTriple::new(key.clone(), key.clone(), key),
            key_id: 0,
            key_version: 0,
            diversification: Diversification::None,
        }
    }
}

/// One key to be written with PUT KEY
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    /// Key identifier
    pub id: u8,
    /// Key version number
    pub version: u8,
    /// Key material
    pub key: Key,
}

/// One entry of the card's key information template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDescriptor {
    /// Key identifier
    pub id: u8,
    /// Key version number
    pub version: u8,
    /// Key type byte
    pub key_type: u8,
    /// Key length in bytes
    pub length: u8,
}
