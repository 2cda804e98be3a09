//! Ports between the session logic and the card
//!
//! The orchestrator and dispatcher only see these traits. The PC/SC binding
//! implements [`Terminal`] and [`Connection`], the GlobalPlatform engine
//! implements the card facing ports on top of any connection, and tests
//! provide recording fakes.

use std::fmt;

use bytes::Bytes;

use crate::{
    Aid, Result,
    cap::ExecutableSource,
    config::SecurityMode,
    cplc::Cplc,
    globalplatform::Response,
    keys::{KeyDescriptor, KeyEntry, KeySet},
    registry::Registry,
};

/// A reader known to the terminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderInfo {
    /// Reader name
    pub name: String,
    /// Whether a card is inserted
    pub card_present: bool,
}

/// An open connection to a card in one reader
pub trait Connection: fmt::Debug {
    /// Acquire exclusive access to the card
    fn begin_exclusive(&mut self) -> Result<()>;

    /// Release exclusive access
    fn end_exclusive(&mut self) -> Result<()>;

    /// Disconnect from the card, leaving it powered
    fn disconnect(&mut self) -> Result<()>;

    /// Send a raw command APDU and return the raw response
    fn transmit(&mut self, command: &[u8]) -> Result<Bytes>;

    /// Answer to reset of the card
    fn atr(&self) -> Result<Bytes>;
}

impl<C: Connection + ?Sized> Connection for Box<C> {
    fn begin_exclusive(&mut self) -> Result<()> {
        (**self).begin_exclusive()
    }

    fn end_exclusive(&mut self) -> Result<()> {
        (**self).end_exclusive()
    }

    fn disconnect(&mut self) -> Result<()> {
        (**self).disconnect()
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Bytes> {
        (**self).transmit(command)
    }

    fn atr(&self) -> Result<Bytes> {
        (**self).atr()
    }
}

/// Result of selecting a security domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainInfo {
    /// AID of the selected domain, from the request or the FCI
    pub aid: Option<Aid>,
    /// Raw select response data
    pub fci: Bytes,
}

/// Secure channel establishment and secured transmission
pub trait SecureChannelEngine {
    /// Select a security domain, or the default one when `aid` is `None`
    fn select_domain(&mut self, aid: Option<&Aid>) -> Result<DomainInfo>;

    /// Read the card production life cycle data, `None` if the card has none
    fn cplc(&mut self) -> Result<Option<Cplc>>;

    /// Authenticate and open a secure channel
    ///
    /// `scp_version` of `None` uses the protocol the card reports.
    fn open_secure_channel(
        &mut self,
        keys: &KeySet,
        scp_version: Option<u8>,
        mode: SecurityMode,
    ) -> Result<()>;

    /// Send a raw APDU through the open channel
    fn transmit_secure(&mut self, command: &[u8]) -> Result<Response>;
}

/// Read access to the card registry and key information
pub trait RegistryProvider {
    /// Fresh snapshot of the registry in enumeration order
    fn registry(&mut self) -> Result<Registry>;

    /// Current key information template
    fn key_info_template(&mut self) -> Result<Vec<KeyDescriptor>>;

    /// Protocol version of the open secure channel
    fn negotiated_scp_version(&self) -> Option<u8>;
}

/// Parameters of INSTALL [for install and make selectable]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installation {
    /// Load file AID
    pub package: Aid,
    /// Module (applet class) AID
    pub applet: Aid,
    /// New instance AID
    pub instance: Aid,
    /// Privilege byte for the instance
    pub privileges: u8,
    /// Application specific install parameters
    pub params: Option<Vec<u8>>,
}

/// Card content and key management
pub trait ContentManager {
    /// Load an executable load file
    fn load(&mut self, source: &ExecutableSource) -> Result<()>;

    /// Instantiate an applet and make it selectable
    fn install_and_make_selectable(&mut self, installation: &Installation) -> Result<()>;

    /// Delete an object, optionally with everything depending on it
    fn delete(&mut self, aid: &Aid, with_dependents: bool) -> Result<()>;

    /// Write keys, adding a new key set or replacing the existing one
    fn put_keys(&mut self, entries: &[KeyEntry], replace: bool) -> Result<()>;

    /// Grant an application the given privileges, making it default selected
    fn make_default_selected(&mut self, aid: &Aid, privileges: u8) -> Result<()>;
}

/// Everything the session needs from a card
pub trait CardManager: Connection + SecureChannelEngine + RegistryProvider + ContentManager {}

impl<T> CardManager for T where T: Connection + SecureChannelEngine + RegistryProvider + ContentManager {}

/// Source of readers and card connections
pub trait Terminal {
    /// Card handle produced by [`Terminal::connect`]
    type Card: CardManager;

    /// All readers known to the terminal
    fn list_readers(&mut self) -> Result<Vec<ReaderInfo>>;

    /// Connect to the card in the named reader
    fn connect(&mut self, reader: &str) -> Result<Self::Card>;
}
