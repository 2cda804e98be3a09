//! GlobalPlatform card manager engine
//!
//! [`GlobalPlatform`] speaks the card management protocol over any
//! [`Connection`]: security domain selection, SCP02 secure channels,
//! GET STATUS, content loading and installation, deletion and PUT KEY.

pub mod apdu;
pub mod constants;
pub mod scp02;

use bytes::{Bytes, BytesMut};
use iso7816_tlv::ber::{Tlv, Value};
use rand::RngCore;
use tracing::{debug, trace};

pub use apdu::{Command, Response, StatusWord};

use apdu::length_byte;

use crate::{
    Aid, Error, Result,
    cap::ExecutableSource,
    card::{
        Connection, ContentManager, DomainInfo, Installation, RegistryProvider,
        SecureChannelEngine,
    },
    config::SecurityMode,
    cplc::Cplc,
    keys::{KeyDescriptor, KeyEntry, KeySet},
    registry::{self, EntryKind, Registry, RegistryEntry},
};
use constants::{
    SECURITY_DOMAIN_AID, cla, delete_p2, get_data, get_status_p1, get_status_p2, ins, install_p1,
    load_p1, put_key_p2, select_p1, status, tags,
};
use scp02::{InitializeUpdateResponse, Scp02Channel, SessionKeys};

/// GlobalPlatform engine bound to one card connection
#[derive(Debug)]
pub struct GlobalPlatform<C> {
    connection: C,
    domain: Option<Aid>,
    channel: Option<Scp02Channel>,
    scp_version: Option<u8>,
}

impl<C: Connection> GlobalPlatform<C> {
    /// Wrap a connection
    pub const fn new(connection: C) -> Self {
        Self {
            connection,
            domain: None,
            channel: None,
            scp_version: None,
        }
    }

    /// The underlying connection
    pub const fn connection(&self) -> &C {
        &self.connection
    }

    /// Take back the underlying connection
    pub fn into_inner(self) -> C {
        self.connection
    }

    /// Whether a secure channel is open
    pub const fn is_authenticated(&self) -> bool {
        self.channel.is_some()
    }

    /// Transmit a command as is, collecting GET RESPONSE chains
    fn exchange(&mut self, command: &Command) -> Result<Response> {
        let mut response = self.transmit_command(command)?;

        if let Some(le) = response.status.correct_le() {
            let mut retry = command.clone();
            retry.le = Some(le);
            response = self.transmit_command(&retry)?;
        }

        let mut data = BytesMut::from(response.data.as_ref());
        while let Some(remaining) = response.status.remaining_bytes() {
            let get_response =
                Command::new(cla::ISO7816, ins::GET_RESPONSE, 0x00, 0x00).with_le(remaining);
            response = self.transmit_command(&get_response)?;
            data.extend_from_slice(&response.data);
        }

        Ok(Response {
            data: data.freeze(),
            status: response.status,
        })
    }

    fn transmit_command(&mut self, command: &Command) -> Result<Response> {
        let raw = command.to_bytes()?;
        trace!(command = %hex::encode_upper(&raw), "transmit");
        let response = Response::from_bytes(&self.connection.transmit(&raw)?)?;
        trace!(
            data = %hex::encode_upper(&response.data),
            sw = %response.status,
            "receive"
        );
        Ok(response)
    }

    /// Send a command, wrapping it when a secure channel is open
    fn send(&mut self, command: &Command) -> Result<Response> {
        let wrapped = match self.channel.as_mut() {
            Some(channel) => channel.wrap(command)?,
            None => command.clone(),
        };
        self.exchange(&wrapped)
    }

    /// Open a secure channel with a caller supplied host challenge
    pub(crate) fn open_with_challenge(
        &mut self,
        keys: &KeySet,
        scp_version: Option<u8>,
        mode: SecurityMode,
        host_challenge: [u8; 8],
    ) -> Result<()> {
        if let Some(version) = scp_version.filter(|v| *v != 2) {
            return Err(Error::UnsupportedScpVersion(version));
        }
        self.channel = None;
        self.scp_version = None;

        let initialize_update = Command::new(
            cla::GP,
            ins::INITIALIZE_UPDATE,
            keys.key_version(),
            keys.key_id(),
        )
        .with_data(host_challenge.to_vec())
        .with_le(0x00);
        let response = self.exchange(&initialize_update)?;
        if !response.status.is_success() {
            return Err(Error::Authentication(format!(
                "INITIALIZE UPDATE failed with {} ({})",
                response.status,
                response.status.description()
            )));
        }

        let init = InitializeUpdateResponse::parse(&response.data)
            .map_err(|e| Error::Authentication(e.to_string()))?;
        debug!(
            key_version = init.key_version,
            scp = init.scp_version,
            kdd = %hex::encode_upper(init.diversification_data),
            "INITIALIZE UPDATE"
        );
        if init.scp_version != 2 {
            return Err(Error::UnsupportedScpVersion(init.scp_version));
        }

        let static_keys = scp02::diversify(
            keys.keys(),
            keys.diversification(),
            &init.diversification_data,
        )?;
        let session = SessionKeys::derive(&static_keys, &init.sequence_counter)?;

        let card_cryptogram = scp02::calculate_cryptogram(
            session.enc(),
            &init.sequence_counter,
            &init.card_challenge,
            &host_challenge,
            false,
        )?;
        if card_cryptogram != init.card_cryptogram {
            return Err(Error::Authentication(
                "card cryptogram does not verify, wrong keys?".into(),
            ));
        }

        let host_cryptogram = scp02::calculate_cryptogram(
            session.enc(),
            &init.sequence_counter,
            &init.card_challenge,
            &host_challenge,
            true,
        )?;

        let level = mode.security_level();
        let mut channel = Scp02Channel::new(session, level);
        let external_authenticate =
            Command::new(cla::GP, ins::EXTERNAL_AUTHENTICATE, level, 0x00)
                .with_data(host_cryptogram.to_vec());
        let response = self.exchange(&channel.wrap(&external_authenticate)?)?;
        if !response.status.is_success() {
            return Err(Error::Authentication(format!(
                "EXTERNAL AUTHENTICATE failed with {} ({})",
                response.status,
                response.status.description()
            )));
        }

        debug!(mode = %mode, "secure channel established (SCP02)");
        self.channel = Some(channel);
        self.scp_version = Some(init.scp_version);
        Ok(())
    }

    /// Run GET STATUS for one subset, following `63 10` continuations
    fn query_status(&mut self, p1: u8, format: u8) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        let mut p2 = format;

        loop {
            let command = Command::new(cla::GP, ins::GET_STATUS, p1, p2)
                .with_data(vec![tags::AID, 0x00])
                .with_le(0x00);
            let response = self.send(&command)?;
            match response.status {
                status::SUCCESS => {
                    data.extend_from_slice(&response.data);
                    return Ok(data);
                }
                status::MORE_DATA => {
                    data.extend_from_slice(&response.data);
                    p2 = format | get_status_p2::NEXT;
                }
                status::REFERENCED_DATA_NOT_FOUND => return Ok(data),
                other => {
                    return Err(Error::Protocol {
                        operation: "GET STATUS",
                        status: other,
                    });
                }
            }
        }
    }

    /// Registry entries of one subset, falling back to the legacy format
    fn status_entries(&mut self, kind: EntryKind, p1: u8) -> Result<Vec<RegistryEntry>> {
        match self.query_status(p1, get_status_p2::TLV_DATA) {
            Ok(data) => registry::parse_tlv_entries(kind, &data),
            Err(e) if e.status() == Some(status::INCORRECT_P1P2) => {
                debug!(p1, "card rejected TLV GET STATUS, using legacy format");
                let data = self.query_status(p1, get_status_p2::LEGACY_DATA)?;
                registry::parse_legacy_entries(
                    kind,
                    &data,
                    p1 == get_status_p1::EXEC_LOAD_FILES_AND_MODULES,
                )
            }
            Err(e) => Err(e),
        }
    }

    fn install(&mut self, operation: &'static str, p1: u8, data: Vec<u8>) -> Result<()> {
        let command = Command::new(cla::GP, ins::INSTALL, p1, 0x00)
            .with_data(data)
            .with_le(0x00);
        self.send(&command)?.success_or(operation)?;
        Ok(())
    }

    fn security_domain(&self) -> Result<Aid> {
        match &self.domain {
            Some(aid) => Ok(aid.clone()),
            None => Aid::new(SECURITY_DOMAIN_AID.to_vec()),
        }
    }
}

impl<C: Connection> Connection for GlobalPlatform<C> {
    fn begin_exclusive(&mut self) -> Result<()> {
        self.connection.begin_exclusive()
    }

    fn end_exclusive(&mut self) -> Result<()> {
        self.connection.end_exclusive()
    }

    fn disconnect(&mut self) -> Result<()> {
        self.channel = None;
        self.connection.disconnect()
    }

    fn transmit(&mut self, command: &[u8]) -> Result<Bytes> {
        self.connection.transmit(command)
    }

    fn atr(&self) -> Result<Bytes> {
        self.connection.atr()
    }
}

impl<C: Connection> SecureChannelEngine for GlobalPlatform<C> {
    fn select_domain(&mut self, aid: Option<&Aid>) -> Result<DomainInfo> {
        self.channel = None;
        self.scp_version = None;

        let mut command = Command::new(cla::ISO7816, ins::SELECT, select_p1::BY_NAME, 0x00);
        if let Some(aid) = aid {
            command = command.with_data(aid.to_vec());
        }
        let mut response = self.exchange(&command.with_le(0x00))?;

        if aid.is_none() && !response.status.is_success() {
            debug!(sw = %response.status, "default selection failed, selecting the ISD by AID");
            let retry = Command::new(cla::ISO7816, ins::SELECT, select_p1::BY_NAME, 0x00)
                .with_data(SECURITY_DOMAIN_AID.to_vec())
                .with_le(0x00);
            response = self.exchange(&retry)?;
        }
        let response = response.success_or("SELECT")?;

        let selected = aid.cloned().or_else(|| fci_aid(&response.data));
        debug!(aid = ?selected, "security domain selected");
        self.domain = selected.clone();
        Ok(DomainInfo {
            aid: selected,
            fci: response.data,
        })
    }

    fn cplc(&mut self) -> Result<Option<Cplc>> {
        let [p1, p2] = get_data::CPLC;
        let command = Command::new(cla::GP, ins::GET_DATA, p1, p2).with_le(0x00);
        let response = self.exchange(&command)?;
        if !response.status.is_success() {
            debug!(sw = %response.status, "card has no CPLC data");
            return Ok(None);
        }
        Cplc::parse(&response.data).map(Some)
    }

    fn open_secure_channel(
        &mut self,
        keys: &KeySet,
        scp_version: Option<u8>,
        mode: SecurityMode,
    ) -> Result<()> {
        let mut host_challenge = [0u8; 8];
        rand::rng().fill_bytes(&mut host_challenge);
        self.open_with_challenge(keys, scp_version, mode, host_challenge)
    }

    fn transmit_secure(&mut self, command: &[u8]) -> Result<Response> {
        let command = Command::from_bytes(command)?;
        self.send(&command)
    }
}

impl<C: Connection> RegistryProvider for GlobalPlatform<C> {
    fn registry(&mut self) -> Result<Registry> {
        let mut entries = Vec::new();
        for kind in [EntryKind::IssuerSecurityDomain, EntryKind::Application] {
            entries.extend(self.status_entries(kind, kind.get_status_p1())?);
        }

        let kind = EntryKind::ExecutableLoadFile;
        let load_files = match self.status_entries(kind, kind.get_status_p1()) {
            Err(e) if e.status() == Some(status::INCORRECT_P1P2) => {
                self.status_entries(kind, get_status_p1::EXEC_LOAD_FILES)?
            }
            other => other?,
        };
        entries.extend(load_files);

        Ok(Registry::new(entries))
    }

    fn key_info_template(&mut self) -> Result<Vec<KeyDescriptor>> {
        let [p1, p2] = get_data::KEY_INFORMATION_TEMPLATE;
        let command = Command::new(cla::GP, ins::GET_DATA, p1, p2).with_le(0x00);
        let response = self.send(&command)?.success_or("GET DATA (key information)")?;
        Ok(parse_key_template(&response.data))
    }

    fn negotiated_scp_version(&self) -> Option<u8> {
        self.scp_version
    }
}

impl<C: Connection> ContentManager for GlobalPlatform<C> {
    fn load(&mut self, source: &ExecutableSource) -> Result<()> {
        let package = source.package_aid();
        let domain = self.security_domain()?;

        let block_size = match self.channel.as_ref() {
            Some(channel) if channel.security_level() & constants::security_level::CMAC_CDEC
                == constants::security_level::CMAC_CDEC =>
            {
                scp02::MAX_ENCRYPTED_DATA
            }
            _ => scp02::MAX_MACED_DATA,
        };
        let blocks: Vec<&[u8]> = source.load_file().chunks(block_size).collect();
        let count = blocks.len();
        // LOAD numbers its blocks with a single byte in P2
        if count > usize::from(u8::MAX) + 1 {
            return Err(Error::Usage(format!(
                "load file of {} bytes needs {count} LOAD blocks, at most 256 are possible",
                source.load_file().len()
            )));
        }

        let mut data = Vec::with_capacity(5 + package.len() + domain.len());
        data.push(length_byte("package AID", package.len())?);
        data.extend_from_slice(package);
        data.push(length_byte("security domain AID", domain.len())?);
        data.extend_from_slice(&domain);
        data.extend_from_slice(&[0x00, 0x00, 0x00]);
        self.install("INSTALL [for load]", install_p1::FOR_LOAD, data)?;

        for (index, block) in (0..=u8::MAX).zip(blocks) {
            let p1 = if usize::from(index) + 1 == count {
                load_p1::LAST_BLOCK
            } else {
                load_p1::MORE_BLOCKS
            };
            trace!(block = index, of = count, "LOAD");
            let command = Command::new(cla::GP, ins::LOAD, p1, index)
                .with_data(block.to_vec())
                .with_le(0x00);
            self.send(&command)?.success_or("LOAD")?;
        }

        debug!(package = %package, blocks = count, "load file loaded");
        Ok(())
    }

    fn install_and_make_selectable(&mut self, installation: &Installation) -> Result<()> {
        let params = match &installation.params {
            Some(params) => {
                let mut tlv = vec![tags::INSTALL_PARAMETERS];
                tlv.extend_from_slice(&crate::cap::encode_length(params.len()));
                tlv.extend_from_slice(params);
                tlv
            }
            None => vec![tags::INSTALL_PARAMETERS, 0x00],
        };

        let mut data = Vec::new();
        for aid in [&installation.package, &installation.applet, &installation.instance] {
            data.push(length_byte("AID", aid.len())?);
            data.extend_from_slice(aid);
        }
        data.extend_from_slice(&[0x01, installation.privileges]);
        data.push(length_byte("install parameters", params.len())?);
        data.extend_from_slice(&params);
        data.push(0x00);

        self.install(
            "INSTALL [for install and make selectable]",
            install_p1::FOR_INSTALL_AND_MAKE_SELECTABLE,
            data,
        )
    }

    fn delete(&mut self, aid: &Aid, with_dependents: bool) -> Result<()> {
        let p2 = if with_dependents {
            delete_p2::OBJECT_AND_RELATED
        } else {
            delete_p2::OBJECT
        };
        let mut data = vec![tags::AID, length_byte("AID", aid.len())?];
        data.extend_from_slice(aid);

        let command = Command::new(cla::GP, ins::DELETE, 0x00, p2).with_data(data);
        self.send(&command)?.success_or("DELETE")?;
        Ok(())
    }

    fn put_keys(&mut self, entries: &[KeyEntry], replace: bool) -> Result<()> {
        let channel = self.channel.as_ref().ok_or_else(|| {
            Error::Authentication("PUT KEY needs an open secure channel".into())
        })?;
        let Some(first) = entries.first() else {
            return Err(Error::Usage("PUT KEY needs at least one key".into()));
        };
        let data = channel.encode_put_key(entries)?;

        let p1 = if replace { first.version } else { 0x00 };
        let mut p2 = first.id;
        if entries.len() > 1 {
            p2 |= put_key_p2::MULTIPLE_KEYS;
        }

        let command = Command::new(cla::GP, ins::PUT_KEY, p1, p2)
            .with_data(data)
            .with_le(0x00);
        self.send(&command)?.success_or("PUT KEY")?;
        Ok(())
    }

    fn make_default_selected(&mut self, aid: &Aid, privileges: u8) -> Result<()> {
        let mut data = vec![0x00, 0x00, length_byte("AID", aid.len())?];
        data.extend_from_slice(aid);
        data.extend_from_slice(&[0x01, privileges, 0x00, 0x00]);
        self.install(
            "INSTALL [for make selectable]",
            install_p1::FOR_MAKE_SELECTABLE,
            data,
        )
    }
}

/// AID of the selected application from a SELECT response FCI (6F / 84)
fn fci_aid(fci: &[u8]) -> Option<Aid> {
    Tlv::parse_all(fci).into_iter().find_map(|tlv| match tlv.value() {
        Value::Constructed(children) if tlv.tag().to_bytes() == [0x6F] => {
            children.iter().find_map(|child| match child.value() {
                Value::Primitive(aid) if child.tag().to_bytes() == [0x84] => {
                    Aid::new(aid.clone()).ok()
                }
                _ => None,
            })
        }
        _ => None,
    })
}

/// Key descriptors from a key information template (E0 { C0 ... })
fn parse_key_template(data: &[u8]) -> Vec<KeyDescriptor> {
    fn collect(tlvs: &[Tlv], out: &mut Vec<KeyDescriptor>) {
        for tlv in tlvs {
            match tlv.value() {
                Value::Constructed(children) => collect(children, out),
                Value::Primitive(value) if tlv.tag().to_bytes() == [tags::KEY_INFORMATION] => {
                    if let &[id, version, key_type, length, ..] = value.as_slice() {
                        out.push(KeyDescriptor {
                            id,
                            version,
                            key_type,
                            length,
                        });
                    }
                }
                Value::Primitive(_) => {}
            }
        }
    }

    let mut descriptors = Vec::new();
    collect(&Tlv::parse_all(data), &mut descriptors);
    descriptors
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, io::Cursor};

    use hex_literal::hex;

    use super::*;
    use crate::{cap::tests::build_cap, keys::Key};

    const HOST_CHALLENGE: [u8; 8] = hex!("f0467f908e5ca23f");
    const INIT_UPDATE: [u8; 14] = hex!("8050000008f0467f908e5ca23f00");
    const INIT_UPDATE_RESPONSE: [u8; 30] =
        hex!("000002650183039536622002000de9c62ba1c4c8e55fcb91b6654ce49000");

    /// Connection that checks each command against a script
    ///
    /// Once the script is exhausted every command gets `fallback`.
    #[derive(Debug, Default)]
    struct ScriptedConnection {
        script: VecDeque<(Vec<u8>, Vec<u8>)>,
        fallback: Option<Vec<u8>>,
        sent: Vec<Vec<u8>>,
    }

    impl ScriptedConnection {
        fn expect(mut self, command: &[u8], response: &[u8]) -> Self {
            self.script.push_back((command.to_vec(), response.to_vec()));
            self
        }

        fn then_always(mut self, response: &[u8]) -> Self {
            self.fallback = Some(response.to_vec());
            self
        }

        fn authenticated(level: u8) -> Self {
            let external_authenticate: &[u8] = match level {
                0x00 => &hex!("84820000103ce060483aace927be1a4733452dec7a"),
                0x01 => &hex!("84820100103ce060483aace927a3cda954b0e88839"),
                _ => &hex!("84820300103ce060483aace9273e21b1f6c415651b"),
            };
            Self::default()
                .expect(&INIT_UPDATE, &INIT_UPDATE_RESPONSE)
                .expect(external_authenticate, &hex!("9000"))
        }
    }

    impl Connection for ScriptedConnection {
        fn begin_exclusive(&mut self) -> Result<()> {
            Ok(())
        }

        fn end_exclusive(&mut self) -> Result<()> {
            Ok(())
        }

        fn disconnect(&mut self) -> Result<()> {
            Ok(())
        }

        fn transmit(&mut self, command: &[u8]) -> Result<Bytes> {
            self.sent.push(command.to_vec());
            let response = match self.script.pop_front() {
                Some((expected, response)) => {
                    assert_eq!(hex::encode_upper(command), hex::encode_upper(&expected));
                    response
                }
                None => self
                    .fallback
                    .clone()
                    .unwrap_or_else(|| panic!("unexpected command {}", hex::encode_upper(command))),
            };
            Ok(Bytes::from(response))
        }

        fn atr(&self) -> Result<Bytes> {
            Ok(Bytes::from_static(&hex!("3B8A80010031C173C8400000900090")))
        }
    }

    fn open(connection: ScriptedConnection, mode: SecurityMode) -> GlobalPlatform<ScriptedConnection> {
        let mut gp = GlobalPlatform::new(connection);
        gp.open_with_challenge(&KeySet::default(), None, mode, HOST_CHALLENGE)
            .unwrap();
        gp
    }

    fn aid(s: &str) -> Aid {
        s.parse().unwrap()
    }

    #[test]
    fn test_select_falls_back_to_isd() {
        let connection = ScriptedConnection::default()
            .expect(&hex!("00A4040000"), &hex!("6A82"))
            .expect(
                &hex!("00A4040008A00000015100000000"),
                &hex!("6F108408A000000151000000A5049F6501FF9000"),
            );
        let mut gp = GlobalPlatform::new(connection);

        let info = gp.select_domain(None).unwrap();
        assert_eq!(info.aid, Some(aid("A000000151000000")));
        assert_eq!(info.fci.len(), 18);
    }

    #[test]
    fn test_exchange_handles_wrong_le_and_get_response() {
        let connection = ScriptedConnection::default()
            .expect(&hex!("80CA9F7F00"), &hex!("6C2D"))
            .expect(&hex!("80CA9F7F2D"), &hex!("9F7F2A 4790 5040 1671 6124"))
            .expect(&hex!("00C0000024"), &[&[0u8; 36][..], &hex!("9000")].concat());
        let mut gp = GlobalPlatform::new(connection);

        let cplc = gp.cplc().unwrap().unwrap();
        assert_eq!(cplc.ic_fabricator(), 0x4790);
        assert_eq!(cplc.os_id(), 0x1671);
    }

    #[test]
    fn test_cplc_absent() {
        let connection = ScriptedConnection::default().expect(&hex!("80CA9F7F00"), &hex!("6A88"));
        let mut gp = GlobalPlatform::new(connection);
        assert!(gp.cplc().unwrap().is_none());
    }

    #[test]
    fn test_open_secure_channel() {
        let gp = open(ScriptedConnection::authenticated(0x01), SecurityMode::Mac);
        assert!(gp.is_authenticated());
        assert_eq!(gp.negotiated_scp_version(), Some(2));
    }

    #[test]
    fn test_wrong_keys_fail_authentication() {
        let connection = ScriptedConnection::default().expect(&INIT_UPDATE, &INIT_UPDATE_RESPONSE);
        let mut gp = GlobalPlatform::new(connection);
        let keys = KeySet::resolve(crate::keys::KeyOverrides {
            master: Some(Key::from_hex("00112233445566778899AABBCCDDEEFF").unwrap()),
            ..Default::default()
        })
        .unwrap();

        let err = gp
            .open_with_challenge(&keys, None, SecurityMode::Mac, HOST_CHALLENGE)
            .unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert!(!gp.is_authenticated());
    }

    #[test]
    fn test_forced_scp_version() {
        let mut gp = GlobalPlatform::new(ScriptedConnection::default());
        let err = gp
            .open_with_challenge(&KeySet::default(), Some(3), SecurityMode::Mac, HOST_CHALLENGE)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedScpVersion(3)));
    }

    #[test]
    fn test_initialize_update_rejected() {
        let connection = ScriptedConnection::default().expect(&INIT_UPDATE, &hex!("6A88"));
        let mut gp = GlobalPlatform::new(connection);
        let err = gp
            .open_with_challenge(&KeySet::default(), None, SecurityMode::Mac, HOST_CHALLENGE)
            .unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[test]
    fn test_registry_over_mac_channel() {
        let connection = ScriptedConnection::authenticated(0x01)
            .expect(
                &hex!("84F280020A4F002ED8456FC8B4BF8F00"),
                &hex!("E3114F08A0000001510000009F70010FC5019E9000"),
            )
            .expect(
                &hex!("84F240020A4F00017F4686172B38F900"),
                &hex!("E3114F08D2760000850101019F700107C50104 6310"),
            )
            .expect(
                &hex!("84F240030A4F00128DC7245B1578AD00"),
                &hex!("E3114F08A0000001515350419F70010FC501809000"),
            )
            .expect(
                &hex!("84F210020A4F001000EC404E502D6300"),
                &hex!("E3174F07D27600008501019F700101 8408D276000085010101 9000"),
            );
        let mut gp = open(connection, SecurityMode::Mac);

        let registry = gp.registry().unwrap();
        let kinds: Vec<_> = registry.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            [
                EntryKind::IssuerSecurityDomain,
                EntryKind::Application,
                EntryKind::SecurityDomain,
                EntryKind::ExecutableLoadFile,
            ]
        );
        assert_eq!(registry.default_selected_package(), Some(&aid("D2760000850101")));
    }

    #[test]
    fn test_put_keys_add() {
        let connection = ScriptedConnection::authenticated(0x01).expect(
            &hex!(
                "84D800814B01801092816D2576E70E70AA5D584271B5383503FB0975"
                "801092816D2576E70E70AA5D584271B5383503FB0975"
                "801092816D2576E70E70AA5D584271B5383503FB0975C3D3868292CE63F500"
            ),
            &hex!("019000"),
        );
        let mut gp = open(connection, SecurityMode::Mac);

        let key = Key::from_hex("00112233445566778899AABBCCDDEEFF").unwrap();
        let entries: Vec<_> = (1..=3)
            .map(|id| KeyEntry {
                id,
                version: 0x01,
                key: key.clone(),
            })
            .collect();
        gp.put_keys(&entries, false).unwrap();
    }

    #[test]
    fn test_delete_over_encrypted_channel() {
        let connection = ScriptedConnection::authenticated(0x03).expect(
            &hex!("84E4000010CEDB6FF8F3F1AD923AE16385D1536090"),
            &hex!("009000"),
        );
        let mut gp = open(connection, SecurityMode::MacEnc);
        gp.delete(&aid("A000000001"), false).unwrap();
    }

    #[test]
    fn test_delete_not_found() {
        let connection = ScriptedConnection::authenticated(0x00)
            .expect(&hex!("80E40080074F05A000000001"), &hex!("6A88"));
        let mut gp = open(connection, SecurityMode::Clear);

        let err = gp.delete(&aid("A000000001"), true).unwrap_err();
        assert_eq!(err.status(), Some(status::REFERENCED_DATA_NOT_FOUND));
    }

    #[test]
    fn test_load_splits_blocks() {
        let source = ExecutableSource::from_reader(Cursor::new(build_cap(None))).unwrap();
        let connection = ScriptedConnection::authenticated(0x00)
            .expect(
                &hex!("80E6020014 07A0000000620301 08A000000151000000 000000 00"),
                &hex!("009000"),
            )
            .then_always(&hex!("9000"));
        let mut gp = open(connection, SecurityMode::Clear);

        gp.load(&source).unwrap();

        let loads: Vec<_> = gp.connection().sent[3..].to_vec();
        assert!(!loads.is_empty());
        let mut data = Vec::new();
        for (index, command) in loads.iter().enumerate() {
            assert_eq!(&command[..2], &[0x80, ins::LOAD]);
            let last = index + 1 == loads.len();
            assert_eq!(command[2], if last { 0x80 } else { 0x00 });
            assert_eq!(command[3] as usize, index);
            let lc = command[4] as usize;
            data.extend_from_slice(&command[5..5 + lc]);
        }
        assert_eq!(data, source.load_file());
    }

    #[test]
    fn test_install_and_make_selectable() {
        let connection = ScriptedConnection::authenticated(0x00).expect(
            &hex!(
                "80E60C0023"
                "07A0000000620301 08A000000062030101 09A00000006203010101"
                "0100 04C9020102 00 00"
            ),
            &hex!("009000"),
        );
        let mut gp = open(connection, SecurityMode::Clear);

        gp.install_and_make_selectable(&Installation {
            package: aid("A0000000620301"),
            applet: aid("A000000062030101"),
            instance: aid("A00000006203010101"),
            privileges: 0x00,
            params: Some(vec![0x01, 0x02]),
        })
        .unwrap();
    }

    #[test]
    fn test_oversize_install_parameters_are_rejected() {
        let mut gp = open(ScriptedConnection::authenticated(0x00), SecurityMode::Clear);

        let err = gp
            .install_and_make_selectable(&Installation {
                package: aid("A0000000620301"),
                applet: aid("A000000062030101"),
                instance: aid("A000000062030101"),
                privileges: 0x00,
                params: Some(vec![0xAA; 300]),
            })
            .unwrap_err();

        assert!(matches!(err, Error::Usage(_)));
        assert_eq!(gp.connection().sent.len(), 2);
    }

    #[test]
    fn test_oversize_secure_apdu_is_rejected() {
        let mut gp = open(ScriptedConnection::authenticated(0x00), SecurityMode::Clear);

        let oversize = Command::new(0x80, 0xE2, 0x90, 0x00).with_data(vec![0x00; 300]);

        assert!(matches!(gp.send(&oversize), Err(Error::Usage(_))));
        assert_eq!(gp.connection().sent.len(), 2);
    }

    #[test]
    fn test_make_default_selected() {
        let connection = ScriptedConnection::authenticated(0x00).expect(
            &hex!("80E608000F 0000 08D276000085010101 0104 0000 00"),
            &hex!("009000"),
        );
        let mut gp = open(connection, SecurityMode::Clear);
        gp.make_default_selected(&aid("D276000085010101"), 0x04).unwrap();
    }

    #[test]
    fn test_key_information_template() {
        let descriptors = parse_key_template(&hex!(
            "E012 C00401018010 C00402018010 C00403018010"
        ));
        assert_eq!(descriptors.len(), 3);
        assert_eq!(descriptors[2].id, 0x03);
        assert_eq!(descriptors[0].version, 0x01);
        assert_eq!(descriptors[0].key_type, constants::key_type::DES);
    }
}
