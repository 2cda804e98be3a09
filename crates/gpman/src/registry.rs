//! Card registry snapshots
//!
//! A [`Registry`] is a fresh, read-only view of the card's GlobalPlatform
//! registry as returned by GET STATUS. It is never cached between commands.

use std::fmt;

use iso7816_tlv::ber::{Tlv, Value};
use tracing::trace;

use crate::{
    Aid, Error, Result,
    globalplatform::constants::{get_status_p1, tags},
};

/// Registry entry category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// The issuer security domain
    IssuerSecurityDomain,
    /// An application instance
    Application,
    /// A supplementary security domain
    SecurityDomain,
    /// An executable load file (package)
    ExecutableLoadFile,
}

impl EntryKind {
    /// GET STATUS subset (P1) that returns entries of this kind
    pub const fn get_status_p1(&self) -> u8 {
        match self {
            Self::IssuerSecurityDomain => get_status_p1::ISSUER_SECURITY_DOMAIN,
            Self::Application | Self::SecurityDomain => get_status_p1::APPLICATIONS,
            Self::ExecutableLoadFile => get_status_p1::EXEC_LOAD_FILES_AND_MODULES,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::IssuerSecurityDomain => "ISD",
            Self::Application => "App",
            Self::SecurityDomain => "SeD",
            Self::ExecutableLoadFile => "ExM",
        };
        f.write_str(name)
    }
}

/// Privilege byte of a registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Privileges(pub u8);

impl Privileges {
    /// Security domain
    pub const SECURITY_DOMAIN: u8 = 0x80;
    /// DAP verification
    pub const DAP_VERIFICATION: u8 = 0x40;
    /// Delegated management
    pub const DELEGATED_MANAGEMENT: u8 = 0x20;
    /// Card lock
    pub const CARD_LOCK: u8 = 0x10;
    /// Card terminate
    pub const CARD_TERMINATE: u8 = 0x08;
    /// Card reset, the default selected privilege
    pub const DEFAULT_SELECTED: u8 = 0x04;
    /// CVM management
    pub const CVM_MANAGEMENT: u8 = 0x02;
    /// Mandated DAP verification
    pub const MANDATED_DAP_VERIFICATION: u8 = 0x01;

    const NAMES: [(u8, &'static str); 8] = [
        (Self::SECURITY_DOMAIN, "SecurityDomain"),
        (Self::DAP_VERIFICATION, "DAPVerification"),
        (Self::DELEGATED_MANAGEMENT, "DelegatedManagement"),
        (Self::CARD_LOCK, "CardLock"),
        (Self::CARD_TERMINATE, "CardTerminate"),
        (Self::DEFAULT_SELECTED, "DefaultSelected"),
        (Self::CVM_MANAGEMENT, "CVMManagement"),
        (Self::MANDATED_DAP_VERIFICATION, "MandatedDAPVerification"),
    ];

    /// Whether every bit of `flag` is set
    pub const fn has(&self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    /// Names of the set privileges
    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.has(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl fmt::Display for Privileges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.names().join(", "))
    }
}

/// One row of the card registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    /// Entry AID
    pub aid: Aid,
    /// Entry category
    pub kind: EntryKind,
    /// Life cycle state byte
    pub lifecycle: u8,
    /// Privileges (applications and security domains only)
    pub privileges: Privileges,
    /// Executable module AIDs linked to a load file, in card order
    pub modules: Vec<Aid>,
}

impl RegistryEntry {
    /// Readable life cycle state
    pub fn lifecycle_name(&self) -> String {
        let name = match (self.kind, self.lifecycle) {
            (EntryKind::ExecutableLoadFile, 0x01) => Some("LOADED"),
            (EntryKind::IssuerSecurityDomain, 0x01) => Some("OP_READY"),
            (EntryKind::IssuerSecurityDomain, 0x07) => Some("INITIALIZED"),
            (EntryKind::IssuerSecurityDomain, 0x0F) => Some("SECURED"),
            (EntryKind::IssuerSecurityDomain, 0x7F) => Some("CARD_LOCKED"),
            (EntryKind::IssuerSecurityDomain, 0xFF) => Some("TERMINATED"),
            (_, 0x03) => Some("INSTALLED"),
            (_, 0x07) => Some("SELECTABLE"),
            (EntryKind::SecurityDomain, 0x0F) => Some("PERSONALIZED"),
            (_, state) if state & 0x83 == 0x83 => Some("LOCKED"),
            _ => None,
        };
        name.map_or_else(|| format!("0x{:02X}", self.lifecycle), str::to_owned)
    }

    /// Whether the entry holds the default selected privilege
    pub const fn is_default_selected(&self) -> bool {
        self.privileges.has(Privileges::DEFAULT_SELECTED)
    }
}

/// Snapshot of the card registry in enumeration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    entries: Vec<RegistryEntry>,
}

impl Registry {
    /// Create a registry from entries in enumeration order
    pub const fn new(entries: Vec<RegistryEntry>) -> Self {
        Self { entries }
    }

    /// All entries in enumeration order
    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    /// Iterate over entries in enumeration order
    pub fn iter(&self) -> std::slice::Iter<'_, RegistryEntry> {
        self.entries.iter()
    }

    /// Whether any entry carries the given AID
    pub fn contains(&self, aid: &Aid) -> bool {
        self.entries.iter().any(|entry| &entry.aid == aid)
    }

    /// Load file containing the default selected application, if any
    pub fn default_selected_package(&self) -> Option<&Aid> {
        let selected = self
            .entries
            .iter()
            .find(|e| e.kind == EntryKind::Application && e.is_default_selected())?;
        self.entries
            .iter()
            .filter(|e| e.kind == EntryKind::ExecutableLoadFile)
            .find(|e| e.modules.contains(&selected.aid))
            .map(|e| &e.aid)
    }
}

impl<'a> IntoIterator for &'a Registry {
    type Item = &'a RegistryEntry;
    type IntoIter = std::slice::Iter<'a, RegistryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Parse GET STATUS data returned in TLV mode (P2 = 02)
///
/// `kind` is the subset requested. Application rows are split into
/// applications and security domains by their privileges.
pub fn parse_tlv_entries(kind: EntryKind, data: &[u8]) -> Result<Vec<RegistryEntry>> {
    let mut entries = Vec::new();

    for template in Tlv::parse_all(data) {
        if template.tag().to_bytes() != [tags::REGISTRY_ENTRY] {
            trace!(tag = %hex::encode(template.tag().to_bytes()), "skipping unknown GET STATUS object");
            continue;
        }
        let Value::Constructed(children) = template.value() else {
            return Err(invalid("registry entry is not a constructed object"));
        };

        let mut aid = None;
        let mut lifecycle = 0;
        let mut privileges = Privileges::default();
        let mut modules = Vec::new();

        for child in children {
            let Value::Primitive(value) = child.value() else {
                continue;
            };
            match child.tag().to_bytes() {
                [tags::AID] => aid = Some(entry_aid(value)?),
                tag if tag == tags::LIFE_CYCLE_STATE => {
                    lifecycle = *value.first().ok_or_else(|| invalid("empty life cycle state"))?;
                }
                [tags::PRIVILEGES] => privileges = Privileges(value.first().copied().unwrap_or(0)),
                [tags::EXECUTABLE_MODULE_AID] => modules.push(entry_aid(value)?),
                _ => {}
            }
        }

        let aid = aid.ok_or_else(|| invalid("registry entry without AID"))?;
        entries.push(RegistryEntry {
            aid,
            kind: refine_kind(kind, privileges),
            lifecycle,
            privileges,
            modules,
        });
    }

    Ok(entries)
}

/// Parse GET STATUS data returned in the legacy format (P2 = 00)
///
/// Each row is `len AID lifecycle privileges`. Load file rows requested
/// with modules append `count (len AID)*`.
pub fn parse_legacy_entries(
    kind: EntryKind,
    data: &[u8],
    with_modules: bool,
) -> Result<Vec<RegistryEntry>> {
    let mut entries = Vec::new();
    let mut rest = data;

    while !rest.is_empty() {
        let (aid, tail) = take_lv(rest)?;
        let [lifecycle, privileges, tail @ ..] = tail else {
            return Err(invalid("truncated legacy registry row"));
        };
        rest = tail;

        let mut modules = Vec::new();
        if with_modules {
            let [count, tail @ ..] = rest else {
                return Err(invalid("missing module count"));
            };
            rest = tail;
            for _ in 0..*count {
                let (module, tail) = take_lv(rest)?;
                modules.push(entry_aid(module)?);
                rest = tail;
            }
        }

        let privileges = Privileges(*privileges);
        entries.push(RegistryEntry {
            aid: entry_aid(aid)?,
            kind: refine_kind(kind, privileges),
            lifecycle: *lifecycle,
            privileges,
            modules,
        });
    }

    Ok(entries)
}

fn take_lv(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let (&len, rest) = data
        .split_first()
        .ok_or_else(|| invalid("missing length byte"))?;
    if rest.len() < len as usize {
        return Err(invalid("length exceeds data"));
    }
    Ok(rest.split_at(len as usize))
}

fn refine_kind(kind: EntryKind, privileges: Privileges) -> EntryKind {
    if kind == EntryKind::Application && privileges.has(Privileges::SECURITY_DOMAIN) {
        EntryKind::SecurityDomain
    } else {
        kind
    }
}

fn entry_aid(bytes: &[u8]) -> Result<Aid> {
    Aid::new(bytes.to_vec()).map_err(|_| invalid("AID length out of range"))
}

const fn invalid(reason: &'static str) -> Error {
    Error::InvalidResponse {
        operation: "GET STATUS",
        reason,
    }
}
