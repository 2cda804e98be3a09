//! Validated run configuration
//!
//! Everything a run needs is resolved into one immutable [`Config`] before
//! any reader is touched. Parsing problems surface as [`Error::Usage`] or
//! [`Error::CapFile`] at this point, never halfway through a session.

use std::{fmt, str::FromStr};

use crate::{
    Aid, Error, Result,
    cap::ExecutableSource,
    globalplatform::constants::security_level,
    keys::{Key, KeySet},
};

/// Secure messaging applied to commands after authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityMode {
    /// Authenticate only, send commands in clear
    Clear,
    /// C-MAC on every command
    #[default]
    Mac,
    /// C-MAC plus command data encryption
    MacEnc,
}

impl SecurityMode {
    /// Security level byte for EXTERNAL AUTHENTICATE
    pub const fn security_level(&self) -> u8 {
        match self {
            Self::Clear => security_level::CLEAR,
            Self::Mac => security_level::CMAC,
            Self::MacEnc => security_level::CMAC_CDEC,
        }
    }
}

impl FromStr for SecurityMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "clr" | "clear" => Ok(Self::Clear),
            "mac" => Ok(Self::Mac),
            "enc" => Ok(Self::MacEnc),
            other => Err(Error::Usage(format!(
                "unknown security mode '{other}', expected mac, enc or clr"
            ))),
        }
    }
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clear => f.write_str("clr"),
            Self::Mac => f.write_str("mac"),
            Self::MacEnc => f.write_str("enc"),
        }
    }
}

/// Options that shape how each reader's session runs
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Tolerate protocol errors instead of aborting the run
    pub relaxed: bool,
    /// Skip to the next reader after a transport failure
    pub continue_on_error: bool,
    /// The operator expects the card to still hold factory keys
    pub virgin: bool,
    /// Forced secure channel protocol version, `None` to use what the card offers
    pub scp_version: Option<u8>,
    /// Secure messaging after authentication
    pub mode: SecurityMode,
    /// Security domain to select, `None` for the default one
    pub domain: Option<Aid>,
}

impl SessionOptions {
    /// Whether protocol errors abort the run
    pub const fn strict(&self) -> bool {
        !self.relaxed
    }
}

/// Which readers a run visits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderSelection {
    /// Only the named reader
    Named(String),
    /// Readers with a card present; more than one requires `all`
    WithCard {
        /// Allow visiting several readers
        all: bool,
    },
}

impl Default for ReaderSelection {
    fn default() -> Self {
        Self::WithCard { all: false }
    }
}

/// DELETE request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteRequest {
    /// AIDs to delete, in order
    pub aids: Vec<Aid>,
    /// Delete the load file of the default selected application instead
    pub default_selected: bool,
    /// Delete dependent objects as well
    pub with_dependents: bool,
}

/// INSTALL request
#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// Executable to load
    pub source: ExecutableSource,
    /// Applet to instantiate instead of the first one in the source
    pub applet: Option<Aid>,
    /// Instance AID, defaults to the applet AID
    pub instance: Option<Aid>,
    /// Make the new instance the default selected application
    pub make_default: bool,
    /// Remove the current default selected package first
    pub reinstall: bool,
    /// Application specific install parameters
    pub params: Option<Vec<u8>>,
}

/// Instance creation request with fully resolved AIDs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    /// New instance AID
    pub instance: Aid,
    /// Load file AID
    pub package: Aid,
    /// Applet (module) AID
    pub applet: Aid,
    /// Application specific install parameters
    pub params: Option<Vec<u8>>,
}

impl CreateRequest {
    /// Resolve package and applet AIDs
    ///
    /// Values come from `source` when given and are overridden by explicit
    /// AIDs. Fails with a usage error when either one is still missing.
    pub fn resolve(
        instance: Aid,
        source: Option<&ExecutableSource>,
        package: Option<Aid>,
        applet: Option<Aid>,
        params: Option<Vec<u8>>,
    ) -> Result<Self> {
        let package = package.or_else(|| source.map(|s| s.package_aid().clone()));
        let applet = applet.or_else(|| source.and_then(|s| s.applet_aids().first().cloned()));

        match (package, applet) {
            (Some(package), Some(applet)) => Ok(Self {
                instance,
                package,
                applet,
                params,
            }),
            _ => Err(Error::Usage(
                "create needs a package and an applet AID, from a CAP file or explicitly".into(),
            )),
        }
    }
}

/// LOCK request
#[derive(Debug, Clone)]
pub struct LockRequest {
    /// New key for all three roles
    pub key: Key,
    /// Version of the new keys
    pub version: u8,
    /// Other key material was given on the same invocation
    pub ambiguous: bool,
}

/// Everything to do with each card, in dispatch order
#[derive(Debug, Clone, Default)]
pub struct CommandRequest {
    /// Print reader, ATR and production data
    pub info: bool,
    /// APDUs sent in clear before the security domain is selected
    pub raw_apdus: Vec<Vec<u8>>,
    /// APDUs sent through the secure channel
    pub secure_apdus: Vec<Vec<u8>>,
    /// Objects to delete
    pub delete: Option<DeleteRequest>,
    /// Load file to remove with its dependents
    pub uninstall: Option<ExecutableSource>,
    /// Load file to load without installing
    pub load: Option<ExecutableSource>,
    /// Load file to load and install
    pub install: Option<InstallRequest>,
    /// Instance to create from an already loaded file
    pub create: Option<CreateRequest>,
    /// Print the registry
    pub list: bool,
    /// Replace the keys with a new key
    pub lock: Option<LockRequest>,
    /// Restore the default keys
    pub unlock: bool,
    /// Make an application the default selected one
    pub make_default: Option<Aid>,
}

impl CommandRequest {
    /// Whether any requested verb needs an authenticated secure channel
    pub const fn requires_authentication(&self) -> bool {
        !self.secure_apdus.is_empty()
            || self.delete.is_some()
            || self.uninstall.is_some()
            || self.load.is_some()
            || self.install.is_some()
            || self.create.is_some()
            || self.list
            || self.lock.is_some()
            || self.unlock
            || self.make_default.is_some()
    }

    /// Whether nothing at all was requested
    pub const fn is_empty(&self) -> bool {
        !self.info && self.raw_apdus.is_empty() && !self.requires_authentication()
    }
}

/// Immutable configuration for one run
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Resolved key set
    pub keys: KeySet,
    /// Verbs to run against every card
    pub request: CommandRequest,
    /// Session behaviour
    pub options: SessionOptions,
    /// Readers to visit
    pub readers: ReaderSelection,
}

/// Parse a hex string into bytes, as used for APDUs and install parameters
pub fn parse_hex(what: &str, s: &str) -> Result<Vec<u8>> {
    let cleaned: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&cleaned).map_err(|e| Error::Usage(format!("invalid {what} '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::cap::tests::build_cap;

    fn aid(s: &str) -> Aid {
        s.parse().unwrap()
    }

    #[test]
    fn test_security_mode() {
        assert_eq!("ENC".parse::<SecurityMode>().unwrap(), SecurityMode::MacEnc);
        assert_eq!("clr".parse::<SecurityMode>().unwrap().security_level(), 0x00);
        assert_eq!(SecurityMode::default().security_level(), 0x01);
        assert!("rmac".parse::<SecurityMode>().is_err());
    }

    #[test]
    fn test_create_resolution() {
        let source = ExecutableSource::from_reader(Cursor::new(build_cap(None))).unwrap();

        let create = CreateRequest::resolve(aid("A0000000620301AA"), Some(&source), None, None, None)
            .unwrap();
        assert_eq!(create.package, aid("A0000000620301"));
        assert_eq!(create.applet, aid("A000000062030101"));

        let create = CreateRequest::resolve(
            aid("A0000000620301AA"),
            Some(&source),
            None,
            Some(aid("A000000062030102")),
            None,
        )
        .unwrap();
        assert_eq!(create.package, aid("A0000000620301"));
        assert_eq!(create.applet, aid("A000000062030102"));

        let missing = CreateRequest::resolve(
            aid("A0000000620301AA"),
            None,
            Some(aid("A0000000620301")),
            None,
            None,
        );
        assert!(matches!(missing, Err(Error::Usage(_))));
    }

    #[test]
    fn test_requires_authentication() {
        let mut request = CommandRequest {
            info: true,
            raw_apdus: vec![vec![0x00, 0xA4, 0x04, 0x00]],
            ..Default::default()
        };
        assert!(!request.requires_authentication());
        assert!(!request.is_empty());

        request.list = true;
        assert!(request.requires_authentication());
        assert!(CommandRequest::default().is_empty());
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("APDU", "00 A4 04 00").unwrap(), vec![0x00, 0xA4, 0x04, 0x00]);
        assert!(parse_hex("APDU", "zz").is_err());
    }
}
