//! Cryptographic operations and command wrapping for the SCP02 protocol
//!
//! Key derivation, cryptogram calculation, the retail C-MAC with ICV
//! encryption, command data encryption, EMV/VISA2 key diversification and
//! PUT KEY data encoding.

use cipher::{
    BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit, block_padding::NoPadding,
    generic_array::GenericArray,
};
use des::{Des, TdesEde3};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    Error, Result,
    globalplatform::{
        apdu::Command,
        constants::{cla, ins, key_type, security_level},
    },
    keys::{Diversification, Key, KeyEntry, KeyTriple, KeyType},
};

/// Derivation purpose for encryption key
pub const DERIVATION_ENC: [u8; 2] = [0x01, 0x82];
/// Derivation purpose for C-MAC key
pub const DERIVATION_MAC: [u8; 2] = [0x01, 0x01];
/// Derivation purpose for data encryption key
pub const DERIVATION_DEK: [u8; 2] = [0x01, 0x81];

/// Largest command data that still fits a short APDU once a C-MAC is added
pub const MAX_MACED_DATA: usize = 255 - 8;
/// Largest command data that still fits once padded, encrypted and MACed
pub const MAX_ENCRYPTED_DATA: usize = 255 - 16;

/// Parsed INITIALIZE UPDATE response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializeUpdateResponse {
    /// Key diversification data
    pub diversification_data: [u8; 10],
    /// Key version of the keys the card selected
    pub key_version: u8,
    /// Secure channel protocol identifier
    pub scp_version: u8,
    /// Sequence counter
    pub sequence_counter: [u8; 2],
    /// Card challenge
    pub card_challenge: [u8; 6],
    /// Card cryptogram
    pub card_cryptogram: [u8; 8],
}

impl InitializeUpdateResponse {
    /// Parse the 28 byte response body
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() != 28 {
            return Err(Error::InvalidResponse {
                operation: "INITIALIZE UPDATE",
                reason: "response must be 28 bytes",
            });
        }
        let mut response = Self {
            diversification_data: [0; 10],
            key_version: data[10],
            scp_version: data[11],
            sequence_counter: [data[12], data[13]],
            card_challenge: [0; 6],
            card_cryptogram: [0; 8],
        };
        response.diversification_data.copy_from_slice(&data[..10]);
        response.card_challenge.copy_from_slice(&data[14..20]);
        response.card_cryptogram.copy_from_slice(&data[20..28]);
        Ok(response)
    }
}

/// SCP02 session keys
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    enc: [u8; 16],
    mac: [u8; 16],
    dek: [u8; 16],
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

impl SessionKeys {
    /// Derive session keys from the static ENC, MAC and KEK keys
    pub fn derive(keys: &KeyTriple<Key>, sequence_counter: &[u8; 2]) -> Result<Self> {
        Ok(Self {
            enc: derive_key(keys.enc().bytes(), sequence_counter, &DERIVATION_ENC)?,
            mac: derive_key(keys.mac().bytes(), sequence_counter, &DERIVATION_MAC)?,
            dek: derive_key(keys.kek().bytes(), sequence_counter, &DERIVATION_DEK)?,
        })
    }

    /// Session encryption key
    pub const fn enc(&self) -> &[u8; 16] {
        &self.enc
    }

    /// Session C-MAC key
    pub const fn mac(&self) -> &[u8; 16] {
        &self.mac
    }

    /// Session data encryption key
    pub const fn dek(&self) -> &[u8; 16] {
        &self.dek
    }
}

/// An established SCP02 channel that wraps outgoing commands
#[derive(Debug)]
pub struct Scp02Channel {
    keys: SessionKeys,
    security_level: u8,
    icv: Option<[u8; 8]>,
}

impl Scp02Channel {
    /// Create a channel for the given session keys and security level
    pub const fn new(keys: SessionKeys, security_level: u8) -> Self {
        Self {
            keys,
            security_level,
            icv: None,
        }
    }

    /// Session keys of this channel
    pub const fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    /// Security level requested with EXTERNAL AUTHENTICATE
    pub const fn security_level(&self) -> u8 {
        self.security_level
    }

    /// Wrap a command with a C-MAC, encrypting its data when requested
    ///
    /// The MAC is computed over the plain command with Lc increased by 8.
    /// The ICV is the previous MAC encrypted with single DES, or zero for
    /// the first command.
    pub fn wrap(&mut self, command: &Command) -> Result<Command> {
        if self.security_level == security_level::CLEAR && self.icv.is_some() {
            return Ok(command.clone());
        }

        let data = &command.data;
        let encrypt = self.security_level & security_level::CMAC_CDEC == security_level::CMAC_CDEC
            && command.ins != ins::EXTERNAL_AUTHENTICATE
            && !data.is_empty();
        let limit = if encrypt { MAX_ENCRYPTED_DATA } else { MAX_MACED_DATA };
        if data.len() > limit {
            return Err(Error::Usage(format!(
                "command data of {} bytes is too long for secure messaging",
                data.len()
            )));
        }

        let cla = command.cla | cla::SECURE_MESSAGING;
        let mut mac_input = Vec::with_capacity(5 + data.len());
        mac_input.extend_from_slice(&[cla, command.ins, command.p1, command.p2]);
        mac_input.push((data.len() + 8) as u8);
        mac_input.extend_from_slice(data);

        let icv = match self.icv {
            Some(previous) => encrypt_icv(&self.keys.mac, &previous)?,
            None => [0; 8],
        };
        let mac = mac_full_3des(&self.keys.mac, &icv, &mac_input)?;
        self.icv = Some(mac);

        let mut body = if encrypt {
            tdes_cbc_encrypt(&self.keys.enc, &[0; 8], &pad_iso7816(data))?
        } else {
            data.to_vec()
        };
        body.extend_from_slice(&mac);

        let mut wrapped = Command::new(cla, command.ins, command.p1, command.p2).with_data(body);
        wrapped.le = command.le;
        Ok(wrapped)
    }

    /// Encode PUT KEY data for the given keys
    ///
    /// Layout: new version, then per key the type, length, key encrypted
    /// with the session DEK, and a three byte check value.
    pub fn encode_put_key(&self, entries: &[KeyEntry]) -> Result<Vec<u8>> {
        let first = entries
            .first()
            .ok_or_else(|| Error::Usage("PUT KEY needs at least one key".into()))?;

        let mut data = vec![first.version];
        for entry in entries {
            if entry.key.kind() != KeyType::Des3 {
                return Err(Error::Crypto("only triple DES keys can be written over SCP02"));
            }
            let encrypted = tdes_ecb_encrypt(&self.keys.dek, entry.key.bytes())?;
            data.push(key_type::DES);
            data.push(encrypted.len() as u8);
            data.extend_from_slice(&encrypted);
            data.push(0x03);
            data.extend_from_slice(&key_check_value(entry.key.bytes())?);
        }
        Ok(data)
    }
}

/// Derive static keys from a master key with EMV or VISA2 diversification
pub fn diversify(
    keys: &KeyTriple<Key>,
    mode: Diversification,
    diversification_data: &[u8; 10],
) -> Result<KeyTriple<Key>> {
    let kdd = diversification_data;
    let derive = |master: &Key, role: u8| -> Result<Key> {
        let mut data = [0u8; 16];
        match mode {
            Diversification::None => return Ok(master.clone()),
            Diversification::Emv => {
                data[0..6].copy_from_slice(&kdd[4..10]);
                data[8..14].copy_from_slice(&kdd[4..10]);
            }
            Diversification::Visa2 => {
                data[0..2].copy_from_slice(&kdd[0..2]);
                data[2..6].copy_from_slice(&kdd[4..8]);
                data[8..10].copy_from_slice(&kdd[0..2]);
                data[10..14].copy_from_slice(&kdd[4..8]);
            }
        }
        data[6] = 0xF0;
        data[7] = role;
        data[14] = 0x0F;
        data[15] = role;
        Key::new(tdes_ecb_encrypt(master.bytes(), &data)?, KeyType::Des3)
    };

    Ok(KeyTriple::new(
        derive(keys.enc(), 1)?,
        derive(keys.mac(), 2)?,
        derive(keys.kek(), 3)?,
    ))
}

/// Derive a session key from a static key, the sequence counter and a purpose
pub fn derive_key(card_key: &[u8], sequence_counter: &[u8; 2], purpose: &[u8; 2]) -> Result<[u8; 16]> {
    let mut data = [0u8; 16];
    data[0..2].copy_from_slice(purpose);
    data[2..4].copy_from_slice(sequence_counter);

    let encrypted = tdes_cbc_encrypt(card_key, &[0; 8], &data)?;
    let mut key = [0u8; 16];
    key.copy_from_slice(&encrypted);
    Ok(key)
}

/// Calculate the card or host cryptogram
///
/// The card cryptogram covers host challenge, sequence counter and card
/// challenge. The host cryptogram covers sequence counter, card challenge
/// and host challenge.
pub fn calculate_cryptogram(
    enc_key: &[u8],
    sequence_counter: &[u8; 2],
    card_challenge: &[u8; 6],
    host_challenge: &[u8; 8],
    for_host: bool,
) -> Result<[u8; 8]> {
    let mut data = Vec::with_capacity(24);
    if for_host {
        data.extend_from_slice(sequence_counter);
        data.extend_from_slice(card_challenge);
        data.extend_from_slice(host_challenge);
    } else {
        data.extend_from_slice(host_challenge);
        data.extend_from_slice(sequence_counter);
        data.extend_from_slice(card_challenge);
    }

    let encrypted = tdes_cbc_encrypt(enc_key, &[0; 8], &pad_iso7816(&data))?;
    let mut cryptogram = [0u8; 8];
    cryptogram.copy_from_slice(&encrypted[encrypted.len() - 8..]);
    Ok(cryptogram)
}

/// Retail MAC: single DES CBC over all blocks but the last, triple DES on the last
pub fn mac_full_3des(key: &[u8], iv: &[u8; 8], data: &[u8]) -> Result<[u8; 8]> {
    let padded = pad_iso7816(data);
    let des = single_des(key)?;
    let tdes = triple_des(key)?;

    let mut chain = GenericArray::clone_from_slice(iv);
    let (head, last) = padded.split_at(padded.len() - 8);
    for block in head.chunks_exact(8) {
        xor_into(&mut chain, block);
        des.encrypt_block(&mut chain);
    }
    xor_into(&mut chain, last);
    tdes.encrypt_block(&mut chain);

    let mut mac = [0u8; 8];
    mac.copy_from_slice(&chain);
    Ok(mac)
}

/// Encrypt the ICV with single DES under the first half of the MAC key
pub fn encrypt_icv(mac_key: &[u8], icv: &[u8; 8]) -> Result<[u8; 8]> {
    let mut block = GenericArray::clone_from_slice(icv);
    single_des(mac_key)?.encrypt_block(&mut block);
    let mut encrypted = [0u8; 8];
    encrypted.copy_from_slice(&block);
    Ok(encrypted)
}

/// Key check value: the first three bytes of a zero block encrypted with the key
pub fn key_check_value(key: &[u8]) -> Result<[u8; 3]> {
    let encrypted = tdes_ecb_encrypt(key, &[0; 8])?;
    Ok([encrypted[0], encrypted[1], encrypted[2]])
}

/// Append 80 and zero bytes up to the next block boundary
pub fn pad_iso7816(data: &[u8]) -> Vec<u8> {
    let mut padded = Vec::with_capacity(data.len() + 8);
    padded.extend_from_slice(data);
    padded.push(0x80);
    while padded.len() % 8 != 0 {
        padded.push(0x00);
    }
    padded
}

fn xor_into(block: &mut GenericArray<u8, cipher::consts::U8>, data: &[u8]) {
    for (a, b) in block.iter_mut().zip(data) {
        *a ^= *b;
    }
}

/// Expand a two key triple DES key to the K1 K2 K1 form
fn expand_key(key: &[u8]) -> Result<[u8; 24]> {
    if key.len() != 16 {
        return Err(Error::Crypto("triple DES keys must be 16 bytes"));
    }
    let mut expanded = [0u8; 24];
    expanded[..16].copy_from_slice(key);
    expanded[16..].copy_from_slice(&key[..8]);
    Ok(expanded)
}

fn triple_des(key: &[u8]) -> Result<TdesEde3> {
    TdesEde3::new_from_slice(&expand_key(key)?).map_err(|_| Error::Crypto("invalid triple DES key"))
}

fn single_des(key: &[u8]) -> Result<Des> {
    let half = key.get(..8).ok_or(Error::Crypto("DES key must be 8 bytes"))?;
    Des::new_from_slice(half).map_err(|_| Error::Crypto("invalid DES key"))
}

fn tdes_ecb_encrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() % 8 != 0 {
        return Err(Error::Crypto("ECB input must be block aligned"));
    }
    let cipher = triple_des(key)?;
    let mut out = data.to_vec();
    for block in out.chunks_exact_mut(8) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(out)
}

fn tdes_cbc_encrypt(key: &[u8], iv: &[u8; 8], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() % 8 != 0 {
        return Err(Error::Crypto("CBC input must be block aligned"));
    }
    let encryptor = cbc::Encryptor::<TdesEde3>::new_from_slices(&expand_key(key)?, iv)
        .map_err(|_| Error::Crypto("invalid triple DES key"))?;
    Ok(encryptor.encrypt_padded_vec_mut::<NoPadding>(data))
}
