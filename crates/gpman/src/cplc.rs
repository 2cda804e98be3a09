//! Card Production Life Cycle data

use std::fmt;

use crate::{Error, Result};

/// Length of the CPLC data object
pub const CPLC_LENGTH: usize = 42;

/// Field names and widths, in the order they appear in the data object
const FIELDS: &[(&str, usize)] = &[
    ("ICFabricator", 2),
    ("ICType", 2),
    ("OperatingSystemID", 2),
    ("OperatingSystemReleaseDate", 2),
    ("OperatingSystemReleaseLevel", 2),
    ("ICFabricationDate", 2),
    ("ICSerialNumber", 4),
    ("ICBatchIdentifier", 2),
    ("ICModuleFabricator", 2),
    ("ICModulePackagingDate", 2),
    ("ICCManufacturer", 2),
    ("ICEmbeddingDate", 2),
    ("ICPrePersonalizer", 2),
    ("ICPrePersonalizationEquipmentDate", 2),
    ("ICPrePersonalizationEquipmentID", 4),
    ("ICPersonalizer", 2),
    ("ICPersonalizationDate", 2),
    ("ICPersonalizationEquipmentID", 4),
];

/// Parsed CPLC data object (GET DATA 9F7F)
#[derive(Clone, PartialEq, Eq)]
pub struct Cplc([u8; CPLC_LENGTH]);

impl Cplc {
    /// Parse the GET DATA response, with or without the 9F7F header
    pub fn parse(data: &[u8]) -> Result<Self> {
        let body = match data {
            [0x9F, 0x7F, len, rest @ ..] if *len as usize == rest.len() => rest,
            _ => data,
        };
        let raw: [u8; CPLC_LENGTH] = body.try_into().map_err(|_| Error::InvalidResponse {
            operation: "GET DATA (CPLC)",
            reason: "CPLC must be 42 bytes",
        })?;
        Ok(Self(raw))
    }

    /// Raw CPLC bytes
    pub const fn as_bytes(&self) -> &[u8; CPLC_LENGTH] {
        &self.0
    }

    /// Operating system identifier
    pub const fn os_id(&self) -> u16 {
        u16::from_be_bytes([self.0[4], self.0[5]])
    }

    /// IC fabricator identifier
    pub const fn ic_fabricator(&self) -> u16 {
        u16::from_be_bytes([self.0[0], self.0[1]])
    }

    /// IC serial number
    pub fn serial_number(&self) -> [u8; 4] {
        let mut serial = [0; 4];
        serial.copy_from_slice(&self.0[12..16]);
        serial
    }

    /// Named fields in data object order
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &[u8])> + '_ {
        FIELDS.iter().scan(0usize, |offset, &(name, width)| {
            let value = &self.0[*offset..*offset + width];
            *offset += width;
            Some((name, value))
        })
    }
}

impl fmt::Debug for Cplc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cplc({})", hex::encode_upper(self.0))
    }
}

impl fmt::Display for Cplc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.fields() {
            writeln!(f, "  {name}={}", hex::encode_upper(value))?;
        }
        Ok(())
    }
}
