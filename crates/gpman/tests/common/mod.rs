//! Common test utilities
//!
//! A scriptable terminal with fake cards. The fakes implement the card
//! ports directly, keep a small model of the card state, and record every
//! port call so tests can check what reached the card.

#![allow(dead_code)]

use std::{cell::RefCell, collections::HashMap, io::Cursor, io::Write, rc::Rc};

use bytes::Bytes;
use hex_literal::hex;
use gpman::{
    Aid, Error, ExecutableSource, ReaderInfo, Result, SecurityMode, Terminal,
    card::{
        Connection, ContentManager, DomainInfo, Installation, RegistryProvider,
        SecureChannelEngine,
    },
    cplc::Cplc,
    globalplatform::{Response, StatusWord},
    keys::{KeyDescriptor, KeyEntry, KeySet},
    registry::{EntryKind, Privileges, Registry, RegistryEntry},
};
use zip::{ZipWriter, write::SimpleFileOptions};

/// Parse an AID from hex
pub fn aid(s: &str) -> Aid {
    s.parse().unwrap()
}

/// A port call that reached a fake card
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    BeginExclusive,
    EndExclusive,
    Disconnect,
    Transmit(Vec<u8>),
    SelectDomain(Option<Aid>),
    Cplc,
    OpenSecureChannel(SecurityMode),
    TransmitSecure(Vec<u8>),
    Registry,
    KeyInfoTemplate,
    Load(Aid),
    Install(Installation),
    Delete(Aid, bool),
    PutKeys(Vec<KeyEntry>, bool),
    MakeDefault(Aid, u8),
}

impl Call {
    /// Whether the call talks to the card through the secure channel
    pub const fn is_secure(&self) -> bool {
        matches!(
            self,
            Self::TransmitSecure(_)
                | Self::Registry
                | Self::KeyInfoTemplate
                | Self::Load(_)
                | Self::Install(_)
                | Self::Delete(..)
                | Self::PutKeys(..)
                | Self::MakeDefault(..)
        )
    }
}

/// How a scripted operation fails
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    /// The card answers with this status word
    Status(u16),
    /// The reader connection breaks
    Transport,
    /// Authentication is rejected
    Authentication,
}

impl Failure {
    fn error(self, operation: &'static str) -> Error {
        match self {
            Self::Status(sw) => Error::Protocol {
                operation,
                status: StatusWord::from_u16(sw),
            },
            Self::Transport => Error::transport(operation, "card removed"),
            Self::Authentication => {
                Error::Authentication("card cryptogram does not verify, wrong keys?".into())
            }
        }
    }
}

/// Model of one card
#[derive(Debug)]
pub struct CardState {
    pub registry: Vec<RegistryEntry>,
    pub template: Vec<KeyDescriptor>,
    pub keys: Vec<KeyEntry>,
    pub cplc: Option<Cplc>,
    pub scp_version: u8,
    pub authenticated: bool,
    pub exclusive: bool,
    pub connected: bool,
    pub failures: HashMap<&'static str, Failure>,
    pub calls: Vec<Call>,
}

impl Default for CardState {
    fn default() -> Self {
        Self {
            registry: vec![RegistryEntry {
                aid: aid("A000000151000000"),
                kind: EntryKind::IssuerSecurityDomain,
                lifecycle: 0x0F,
                privileges: Privileges(0x9E),
                modules: Vec::new(),
            }],
            template: (1..=3)
                .map(|id| KeyDescriptor {
                    id,
                    version: 0xFF,
                    key_type: 0x80,
                    length: 0x10,
                })
                .collect(),
            keys: Vec::new(),
            cplc: None,
            scp_version: 2,
            authenticated: false,
            exclusive: false,
            connected: true,
            failures: HashMap::new(),
            calls: Vec::new(),
        }
    }
}

impl CardState {
    /// Add a loaded package with its applet modules
    pub fn with_package(mut self, package: &str, modules: &[&str]) -> Self {
        self.registry.push(RegistryEntry {
            aid: aid(package),
            kind: EntryKind::ExecutableLoadFile,
            lifecycle: 0x01,
            privileges: Privileges(0x00),
            modules: modules.iter().map(|m| aid(m)).collect(),
        });
        self
    }

    /// Add an application instance
    pub fn with_application(mut self, instance: &str, privileges: u8) -> Self {
        self.registry.push(RegistryEntry {
            aid: aid(instance),
            kind: EntryKind::Application,
            lifecycle: 0x07,
            privileges: Privileges(privileges),
            modules: Vec::new(),
        });
        self
    }

    /// Make an operation fail
    pub fn failing(mut self, operation: &'static str, failure: Failure) -> Self {
        self.failures.insert(operation, failure);
        self
    }

    /// Production data with the given OS identifier
    pub fn with_os_id(mut self, os_id: u16) -> Self {
        let mut raw = [0u8; 42];
        raw[4..6].copy_from_slice(&os_id.to_be_bytes());
        self.cplc = Some(Cplc::parse(&raw).unwrap());
        self
    }

    /// Whether a call matching `f` reached the card
    pub fn called(&self, f: impl Fn(&Call) -> bool) -> bool {
        self.calls.iter().any(f)
    }
}

/// Shared handle to a card model
pub type SharedCard = Rc<RefCell<CardState>>;

/// Wrap a card model for use with the terminal
pub fn shared(state: CardState) -> SharedCard {
    Rc::new(RefCell::new(state))
}

/// Card handle given out by [`FakeTerminal::connect`]
#[derive(Debug)]
pub struct FakeCard {
    state: SharedCard,
}

impl FakeCard {
    fn record(&self, call: Call, operation: &'static str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if call.is_secure() {
            assert!(state.authenticated, "{call:?} sent without a secure channel");
        }
        state.calls.push(call);
        match state.failures.get(operation) {
            Some(failure) => Err(failure.error(operation)),
            None => Ok(()),
        }
    }
}

impl Connection for FakeCard {
    fn begin_exclusive(&mut self) -> Result<()> {
        self.record(Call::BeginExclusive, "begin_exclusive")?;
        self.state.borrow_mut().exclusive = true;
        Ok(())
    }

    fn end_exclusive(&mut self) -> Result<()> {
        self.state.borrow_mut().exclusive = false;
        self.record(Call::EndExclusive, "end_exclusive")
    }

    fn disconnect(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.connected = false;
        state.authenticated = false;
        state.calls.push(Call::Disconnect);
        Ok(())
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Bytes> {
        self.record(Call::Transmit(command.to_vec()), "transmit")?;
        Ok(Bytes::from_static(&[0x90, 0x00]))
    }

    fn atr(&self) -> Result<Bytes> {
        Ok(Bytes::from_static(&[0x3B, 0x8A, 0x80, 0x01]))
    }
}

impl SecureChannelEngine for FakeCard {
    fn select_domain(&mut self, requested: Option<&Aid>) -> Result<DomainInfo> {
        self.record(Call::SelectDomain(requested.cloned()), "select")?;
        Ok(DomainInfo {
            aid: Some(requested.cloned().unwrap_or_else(|| aid("A000000151000000"))),
            fci: Bytes::new(),
        })
    }

    fn cplc(&mut self) -> Result<Option<Cplc>> {
        self.record(Call::Cplc, "cplc")?;
        Ok(self.state.borrow().cplc.clone())
    }

    fn open_secure_channel(
        &mut self,
        _keys: &KeySet,
        _scp_version: Option<u8>,
        mode: SecurityMode,
    ) -> Result<()> {
        self.record(Call::OpenSecureChannel(mode), "authenticate")?;
        self.state.borrow_mut().authenticated = true;
        Ok(())
    }

    fn transmit_secure(&mut self, command: &[u8]) -> Result<Response> {
        self.record(Call::TransmitSecure(command.to_vec()), "transmit_secure")?;
        Ok(Response {
            data: Bytes::new(),
            status: StatusWord::from_u16(0x9000),
        })
    }
}

impl RegistryProvider for FakeCard {
    fn registry(&mut self) -> Result<Registry> {
        self.record(Call::Registry, "registry")?;
        Ok(Registry::new(self.state.borrow().registry.clone()))
    }

    fn key_info_template(&mut self) -> Result<Vec<KeyDescriptor>> {
        self.record(Call::KeyInfoTemplate, "key_info_template")?;
        Ok(self.state.borrow().template.clone())
    }

    fn negotiated_scp_version(&self) -> Option<u8> {
        let state = self.state.borrow();
        state.authenticated.then_some(state.scp_version)
    }
}

impl ContentManager for FakeCard {
    fn load(&mut self, source: &ExecutableSource) -> Result<()> {
        self.record(Call::Load(source.package_aid().clone()), "load")?;
        self.state.borrow_mut().registry.push(RegistryEntry {
            aid: source.package_aid().clone(),
            kind: EntryKind::ExecutableLoadFile,
            lifecycle: 0x01,
            privileges: Privileges(0x00),
            modules: source.applet_aids().to_vec(),
        });
        Ok(())
    }

    fn install_and_make_selectable(&mut self, installation: &Installation) -> Result<()> {
        self.record(Call::Install(installation.clone()), "install")?;
        self.state.borrow_mut().registry.push(RegistryEntry {
            aid: installation.instance.clone(),
            kind: EntryKind::Application,
            lifecycle: 0x07,
            privileges: Privileges(installation.privileges),
            modules: Vec::new(),
        });
        Ok(())
    }

    fn delete(&mut self, aid: &Aid, with_dependents: bool) -> Result<()> {
        self.record(Call::Delete(aid.clone(), with_dependents), "delete")?;
        let mut state = self.state.borrow_mut();
        let modules: Vec<Aid> = state
            .registry
            .iter()
            .filter(|entry| &entry.aid == aid)
            .flat_map(|entry| entry.modules.clone())
            .collect();
        state
            .registry
            .retain(|entry| &entry.aid != aid && !(with_dependents && modules.contains(&entry.aid)));
        Ok(())
    }

    fn put_keys(&mut self, entries: &[KeyEntry], replace: bool) -> Result<()> {
        self.record(Call::PutKeys(entries.to_vec(), replace), "put_keys")?;
        let mut state = self.state.borrow_mut();
        state.template = entries
            .iter()
            .map(|entry| KeyDescriptor {
                id: entry.id,
                version: entry.version,
                key_type: 0x80,
                length: entry.key.bytes().len() as u8,
            })
            .collect();
        state.keys = entries.to_vec();
        Ok(())
    }

    fn make_default_selected(&mut self, aid: &Aid, privileges: u8) -> Result<()> {
        self.record(Call::MakeDefault(aid.clone(), privileges), "make_default")
    }
}

/// Terminal with scripted readers
#[derive(Debug, Default)]
pub struct FakeTerminal {
    readers: Vec<(String, Option<SharedCard>)>,
    /// Readers whose connect fails with a transport error
    pub broken: Vec<String>,
    /// Readers connected to, in order
    pub connected: Vec<String>,
}

impl FakeTerminal {
    /// Add a reader holding a card
    pub fn with_card(mut self, reader: &str, card: &SharedCard) -> Self {
        self.readers.push((reader.to_owned(), Some(Rc::clone(card))));
        self
    }

    /// Add an empty reader
    pub fn with_empty_reader(mut self, reader: &str) -> Self {
        self.readers.push((reader.to_owned(), None));
        self
    }

    /// Make connecting to a reader fail
    pub fn with_broken_reader(mut self, reader: &str) -> Self {
        self.broken.push(reader.to_owned());
        self
    }
}

impl Terminal for FakeTerminal {
    type Card = FakeCard;

    fn list_readers(&mut self) -> Result<Vec<ReaderInfo>> {
        Ok(self
            .readers
            .iter()
            .map(|(name, card)| ReaderInfo {
                name: name.clone(),
                card_present: card.is_some(),
            })
            .collect())
    }

    fn connect(&mut self, reader: &str) -> Result<FakeCard> {
        self.connected.push(reader.to_owned());
        if self.broken.iter().any(|name| name == reader) {
            return Err(Error::transport("connect", "reader unavailable"));
        }
        let card = self
            .readers
            .iter()
            .find(|(name, _)| name == reader)
            .and_then(|(_, card)| card.clone())
            .ok_or_else(|| Error::transport("connect", "no card in reader"))?;
        card.borrow_mut().connected = true;
        Ok(FakeCard { state: card })
    }
}

/// Header component for package A0000000620301 version 1.0
pub const HEADER: [u8; 20] = hex!("01 0011 DECAFFED 0102 04 00 01 07 A0000000620301");

/// Applet component declaring applet A000000062030101
pub const APPLET: [u8; 15] = hex!("03 000C 01 08 A000000062030101 0042");

/// Build an in-memory CAP file with a header and an applet component
pub fn cap_file() -> ExecutableSource {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    zip.start_file("com/example/javacard/Header.cap", options).unwrap();
    zip.write_all(&HEADER).unwrap();
    zip.start_file("com/example/javacard/Applet.cap", options).unwrap();
    zip.write_all(&APPLET).unwrap();
    let bytes = zip.finish().unwrap().into_inner();
    ExecutableSource::from_reader(Cursor::new(bytes)).unwrap()
}

/// Connect to a single card and open its secure channel
pub fn authenticated(state: &SharedCard) -> FakeCard {
    let mut terminal = FakeTerminal::default().with_card("Reader 0", state);
    let mut card = terminal.connect("Reader 0").unwrap();
    card.open_secure_channel(&KeySet::default(), None, SecurityMode::Mac)
        .unwrap();
    state.borrow_mut().calls.clear();
    card
}
