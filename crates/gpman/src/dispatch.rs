//! Command dispatch
//!
//! One protocol per requested verb, run against a selected card. Verbs
//! other than the raw APDUs and the info report need the secure channel
//! opened by the session first. Each verb queries the registry fresh when
//! it needs it.

use std::fmt;

use tracing::{debug, info};

use crate::{
    Aid, Error, Result,
    cap::ExecutableSource,
    card::{CardManager, Connection, Installation, SecureChannelEngine},
    config::{CommandRequest, CreateRequest, DeleteRequest, InstallRequest, LockRequest, SessionOptions},
    cplc::Cplc,
    globalplatform::{Response, constants::status},
    keys::{Diversification, Key, KeyEntry, KeySet, KeyType},
    registry::{Privileges, Registry},
    report::Reporter,
};

/// Key identifiers of the ENC, MAC and KEK keys written by lock
pub const LOCK_KEY_IDS: [u8; 3] = [0x01, 0x02, 0x03];

/// Key version written by unlock
pub const UNLOCK_KEY_VERSION: u8 = 0x01;

/// One privileged step of a run, borrowed from the [`CommandRequest`]
#[derive(Debug, Clone, Copy)]
pub enum Verb<'a> {
    /// APDU sent through the secure channel
    SecureApdu(&'a [u8]),
    /// Delete AIDs
    Delete(&'a DeleteRequest),
    /// Remove a load file with everything depending on it
    Uninstall(&'a ExecutableSource),
    /// Load a file without installing it
    Load(&'a ExecutableSource),
    /// Load and install
    Install(&'a InstallRequest),
    /// Instantiate an applet from a loaded file
    Create(&'a CreateRequest),
    /// Print the registry
    List,
    /// Replace the keys
    Lock(&'a LockRequest),
    /// Restore the default keys
    Unlock,
    /// Make an application default selected
    MakeDefault(&'a Aid),
}

impl fmt::Display for Verb<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SecureApdu(_) => f.write_str("secure-apdu"),
            Self::Delete(_) => f.write_str("delete"),
            Self::Uninstall(_) => f.write_str("uninstall"),
            Self::Load(_) => f.write_str("load"),
            Self::Install(_) => f.write_str("install"),
            Self::Create(_) => f.write_str("create"),
            Self::List => f.write_str("list"),
            Self::Lock(_) => f.write_str("lock"),
            Self::Unlock => f.write_str("unlock"),
            Self::MakeDefault(_) => f.write_str("make-default"),
        }
    }
}

/// Privileged verbs of a request in execution order
pub fn plan(request: &CommandRequest) -> Vec<Verb<'_>> {
    let mut verbs: Vec<Verb<'_>> = request
        .secure_apdus
        .iter()
        .map(|apdu| Verb::SecureApdu(apdu))
        .collect();
    verbs.extend(request.delete.as_ref().map(Verb::Delete));
    verbs.extend(request.uninstall.as_ref().map(Verb::Uninstall));
    verbs.extend(request.load.as_ref().map(Verb::Load));
    verbs.extend(request.install.as_ref().map(Verb::Install));
    verbs.extend(request.create.as_ref().map(Verb::Create));
    if request.list {
        verbs.push(Verb::List);
    }
    verbs.extend(request.lock.as_ref().map(Verb::Lock));
    if request.unlock {
        verbs.push(Verb::Unlock);
    }
    verbs.extend(request.make_default.as_ref().map(Verb::MakeDefault));
    verbs
}

/// Send an APDU in clear and report the exchange
pub fn raw_apdu<C>(card: &mut C, apdu: &[u8], reporter: &mut dyn Reporter) -> Result<()>
where
    C: Connection + ?Sized,
{
    reporter.line(&format!(">> {}", hex::encode_upper(apdu)));
    let response = card.transmit(apdu)?;
    reporter.line(&format!("<< {}", hex::encode_upper(&response)));
    Ok(())
}

/// Report the reader name and ATR
pub fn reader_info<C>(card: &C, reader: &str, reporter: &mut dyn Reporter) -> Result<()>
where
    C: Connection + ?Sized,
{
    reporter.line(&format!("Reader: {reader}"));
    reporter.line(&format!("ATR: {}", hex::encode_upper(card.atr()?)));
    Ok(())
}

/// Report the card production life cycle data, when the card has it
pub fn card_info<C>(card: &mut C, reporter: &mut dyn Reporter) -> Result<Option<Cplc>>
where
    C: SecureChannelEngine + ?Sized,
{
    let cplc = card.cplc()?;
    match &cplc {
        Some(cplc) => {
            reporter.line("CPLC:");
            for line in cplc.to_string().lines() {
                reporter.line(line);
            }
        }
        None => reporter.line("CPLC: not available"),
    }
    Ok(cplc)
}

/// Runs privileged verbs against an authenticated card
pub struct Dispatcher<'a> {
    keys: &'a KeySet,
    options: &'a SessionOptions,
    reporter: &'a mut dyn Reporter,
}

impl fmt::Debug for Dispatcher<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("keys", &self.keys)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<'a> Dispatcher<'a> {
    /// Create a dispatcher
    pub fn new(keys: &'a KeySet, options: &'a SessionOptions, reporter: &'a mut dyn Reporter) -> Self {
        Self {
            keys,
            options,
            reporter,
        }
    }

    /// Run one verb
    pub fn run<C>(&mut self, card: &mut C, verb: &Verb<'_>) -> Result<()>
    where
        C: CardManager + ?Sized,
    {
        debug!(%verb, "dispatching");
        match *verb {
            Verb::SecureApdu(apdu) => self.secure_apdu(card, apdu),
            Verb::Delete(request) => self.delete(card, request),
            Verb::Uninstall(source) => self.uninstall(card, source),
            Verb::Load(source) => self.load(card, source),
            Verb::Install(request) => self.install(card, request),
            Verb::Create(request) => self.create(card, request),
            Verb::List => self.list(card),
            Verb::Lock(request) => self.lock(card, request),
            Verb::Unlock => self.unlock(card),
            Verb::MakeDefault(aid) => self.make_default(card, aid),
        }
    }

    fn secure_apdu<C: CardManager + ?Sized>(&mut self, card: &mut C, apdu: &[u8]) -> Result<()> {
        self.reporter.line(&format!(">> {}", hex::encode_upper(apdu)));
        let Response { data, status } = card.transmit_secure(apdu)?;
        self.reporter
            .line(&format!("<< {}{status}", hex::encode_upper(&data)));
        Ok(())
    }

    fn delete<C: CardManager + ?Sized>(&mut self, card: &mut C, request: &DeleteRequest) -> Result<()> {
        if request.default_selected {
            match card.registry()?.default_selected_package().cloned() {
                Some(package) => {
                    card.delete(&package, true)?;
                    self.reporter.line(&format!("{package} deleted."));
                }
                None => self.reporter.warning("No default selected package on card"),
            }
        }

        for aid in &request.aids {
            if !card.registry()?.contains(aid) {
                self.reporter
                    .line(&format!("Could not delete AID (not present on card): {aid}"));
                continue;
            }
            if let Err(e) = card.delete(aid, request.with_dependents) {
                self.reporter.line(&format!("Could not delete AID: {aid}"));
                if e.status() == Some(status::CONDITIONS_NOT_SATISFIED) {
                    self.reporter
                        .line("TIP: Maybe try with --deletedeps to remove dependent objects");
                }
                return Err(e);
            }
            info!(%aid, "deleted");
        }
        Ok(())
    }

    fn uninstall<C: CardManager + ?Sized>(
        &mut self,
        card: &mut C,
        source: &ExecutableSource,
    ) -> Result<()> {
        let package = source.package_aid();
        if !card.registry()?.contains(package) {
            self.reporter
                .line(&format!("{package} is not present on card!"));
            return Ok(());
        }
        card.delete(package, true)?;
        self.reporter.line(&format!("{package} deleted."));
        Ok(())
    }

    fn load<C: CardManager + ?Sized>(&mut self, card: &mut C, source: &ExecutableSource) -> Result<()> {
        debug!(package = %source.package_aid(), name = source.name(), "loading");
        card.load(source).inspect_err(|e| {
            if e.status() == Some(status::CONDITIONS_NOT_SATISFIED) {
                self.reporter.warning(
                    "Applet loading failed. Are you sure the CAP file version is compatible with your card?",
                );
            }
        })
    }

    fn install<C: CardManager + ?Sized>(&mut self, card: &mut C, request: &InstallRequest) -> Result<()> {
        if request.make_default && request.reinstall {
            if let Some(package) = card.registry()?.default_selected_package().cloned() {
                debug!(%package, "removing current default selected package");
                card.delete(&package, true)?;
            }
        }

        let source = &request.source;
        let applet = match &request.applet {
            Some(applet) => applet.clone(),
            None => source.applet_aids().first().cloned().ok_or_else(|| {
                Error::Usage(format!("CAP file {} contains no applets", source.name()))
            })?,
        };
        let instance = request.instance.clone().unwrap_or_else(|| applet.clone());

        if card.registry()?.contains(&instance) {
            self.reporter
                .warning(&format!("WARNING: Applet {instance} already present on card"));
        }

        debug!(package = %source.package_aid(), name = source.name(), "installing");
        self.load(card, source)?;

        let privileges = if request.make_default {
            Privileges::DEFAULT_SELECTED
        } else {
            0x00
        };
        card.install_and_make_selectable(&Installation {
            package: source.package_aid().clone(),
            applet,
            instance,
            privileges,
            params: request.params.clone(),
        })
    }

    fn create<C: CardManager + ?Sized>(&mut self, card: &mut C, request: &CreateRequest) -> Result<()> {
        card.install_and_make_selectable(&Installation {
            package: request.package.clone(),
            applet: request.applet.clone(),
            instance: request.instance.clone(),
            privileges: 0x00,
            params: request.params.clone(),
        })
    }

    fn list<C: CardManager + ?Sized>(&mut self, card: &mut C) -> Result<()> {
        let registry: Registry = card.registry()?;
        for entry in &registry {
            self.reporter.line(&format!("AID: {}", describe(&entry.aid)));
            self.reporter.line(&format!(
                "     {} {}: {}",
                entry.kind,
                entry.lifecycle_name(),
                entry.privileges
            ));
            for module in &entry.modules {
                self.reporter.line(&format!("     {}", describe(module)));
            }
            self.reporter.line("");
        }
        Ok(())
    }

    fn lock<C: CardManager + ?Sized>(&mut self, card: &mut C, request: &LockRequest) -> Result<()> {
        if request.ambiguous {
            let prefix = if self.options.strict() {
                "STRICT WARNING"
            } else {
                "WARNING"
            };
            self.reporter.warning(&format!(
                "{prefix}: Using --lock but specifying other keys"
            ));
        }

        let entries: Vec<KeyEntry> = LOCK_KEY_IDS
            .iter()
            .map(|&id| KeyEntry {
                id,
                version: request.version,
                key: request.key.clone(),
            })
            .collect();
        card.put_keys(&entries, self.replaces_keys())?;

        self.reporter.line(&format!(
            "Card locked with: {} {}",
            request.key.kind(),
            request.key.to_hex()
        ));
        self.reporter.line("Write this down, DO NOT FORGET/LOSE IT!");
        Ok(())
    }

    fn unlock<C: CardManager + ?Sized>(&mut self, card: &mut C) -> Result<()> {
        let current = card.key_info_template()?;
        if current.len() != 3 {
            return Err(Error::TemplateIntegrity {
                actual: current.len(),
            });
        }

        let kind = KeyType::for_scp(card.negotiated_scp_version().unwrap_or(2));
        let key = Key::default_for(kind);
        let entries: Vec<KeyEntry> = current
            .iter()
            .map(|descriptor| KeyEntry {
                id: descriptor.id,
                version: UNLOCK_KEY_VERSION,
                key: key.clone(),
            })
            .collect();
        card.put_keys(&entries, self.replaces_keys())?;

        self.reporter.line(&format!(
            "Default {} {} set as master key.",
            key.kind(),
            key.to_hex()
        ));
        Ok(())
    }

    fn make_default<C: CardManager + ?Sized>(&mut self, card: &mut C, aid: &Aid) -> Result<()> {
        card.make_default_selected(aid, Privileges::DEFAULT_SELECTED)
    }

    /// Virgin cards and diversified keys get a new key set added, others
    /// have their current keys replaced
    fn replaces_keys(&self) -> bool {
        !(self.options.virgin || self.keys.diversification() != Diversification::None)
    }
}

fn describe(aid: &Aid) -> String {
    match aid.readable() {
        Some(readable) => format!("{aid} ({readable})"),
        None => aid.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aid(s: &str) -> Aid {
        s.parse().unwrap()
    }

    #[test]
    fn test_plan_order() {
        let request = CommandRequest {
            info: true,
            raw_apdus: vec![vec![0x00, 0xA4, 0x04, 0x00, 0x00]],
            secure_apdus: vec![vec![0x80, 0xCA, 0x00, 0x66, 0x00]],
            delete: Some(DeleteRequest {
                aids: vec![aid("A000000001")],
                ..Default::default()
            }),
            list: true,
            unlock: true,
            make_default: Some(aid("A000000002")),
            ..Default::default()
        };

        let names: Vec<String> = plan(&request).iter().map(ToString::to_string).collect();
        assert_eq!(names, ["secure-apdu", "delete", "list", "unlock", "make-default"]);
        assert!(plan(&CommandRequest::default()).is_empty());
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(&aid("A000000151000000")), "A000000151000000");
        assert_eq!(describe(&aid("4F70656E5047")), "4F70656E5047 (OpenPG)");
    }
}
