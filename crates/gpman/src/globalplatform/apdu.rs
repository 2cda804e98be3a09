//! Command and response APDUs
//!
//! Short-length ISO 7816-4 APDUs as exchanged with a GlobalPlatform card.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// Status Word (SW1-SW2) from an APDU response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    /// First status byte (SW1)
    pub sw1: u8,
    /// Second status byte (SW2)
    pub sw2: u8,
}

impl StatusWord {
    /// Create a new status word
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Create from a u16 value (SW1 | SW2)
    pub const fn from_u16(status: u16) -> Self {
        Self {
            sw1: (status >> 8) as u8,
            sw2: status as u8,
        }
    }

    /// Convert to a u16 value (SW1 | SW2)
    pub const fn to_u16(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Check if this status word indicates success (90 00)
    pub const fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Get the number of remaining bytes when SW1 = 61
    pub const fn remaining_bytes(&self) -> Option<u8> {
        if self.sw1 == 0x61 {
            Some(self.sw2)
        } else {
            None
        }
    }

    /// Get the exact length the card asked for when SW1 = 6C
    pub const fn correct_le(&self) -> Option<u8> {
        if self.sw1 == 0x6C {
            Some(self.sw2)
        } else {
            None
        }
    }

    /// Get a description of this status word
    pub const fn description(&self) -> &'static str {
        match (self.sw1, self.sw2) {
            (0x90, 0x00) => "Success",
            (0x61, _) => "More data available",
            (0x62, 0x83) => "Selected file invalidated",
            (0x63, 0x00) => "Authentication of host cryptogram failed",
            (0x63, 0x10) => "More data available",
            (0x63, n) if (n & 0xF0) == 0xC0 => "Counter value",
            (0x65, 0x81) => "Memory failure",
            (0x67, 0x00) => "Wrong length",
            (0x68, 0x82) => "Secure messaging not supported",
            (0x69, 0x82) => "Security status not satisfied",
            (0x69, 0x83) => "Authentication method blocked",
            (0x69, 0x84) => "Referenced data invalidated",
            (0x69, 0x85) => "Conditions of use not satisfied",
            (0x69, 0x86) => "Command not allowed",
            (0x6A, 0x80) => "Incorrect parameters in the data field",
            (0x6A, 0x81) => "Function not supported",
            (0x6A, 0x82) => "File not found",
            (0x6A, 0x84) => "Not enough memory space",
            (0x6A, 0x86) => "Incorrect parameters P1-P2",
            (0x6A, 0x88) => "Referenced data not found",
            (0x6C, _) => "Wrong Le field",
            (0x6D, 0x00) => "Instruction code not supported or invalid",
            (0x6E, 0x00) => "Class not supported",
            (0x6F, 0x00) => "No precise diagnosis",
            _ => "Unknown status word",
        }
    }
}

impl From<u16> for StatusWord {
    fn from(status: u16) -> Self {
        Self::from_u16(status)
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.sw1, self.sw2)
    }
}

/// A command APDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// First parameter
    pub p1: u8,
    /// Second parameter
    pub p2: u8,
    /// Command data, empty when absent
    pub data: Bytes,
    /// Expected response length
    pub le: Option<u8>,
}

impl Command {
    /// Create a command without data or Le
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Bytes::new(),
            le: None,
        }
    }

    /// Attach a data field
    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    /// Attach an Le field
    pub const fn with_le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// Parse a raw command from its wire form
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        let header = raw
            .get(..4)
            .ok_or_else(|| Error::Usage(format!("APDU too short: {}", hex::encode_upper(raw))))?;
        let command = Self::new(header[0], header[1], header[2], header[3]);

        match raw.len() {
            4 => Ok(command),
            5 => Ok(command.with_le(raw[4])),
            _ => {
                let lc = raw[4] as usize;
                let body = &raw[5..];
                if body.len() == lc {
                    Ok(command.with_data(Bytes::copy_from_slice(body)))
                } else if body.len() == lc + 1 {
                    Ok(command
                        .with_data(Bytes::copy_from_slice(&body[..lc]))
                        .with_le(body[lc]))
                } else {
                    Err(Error::Usage(format!(
                        "APDU length does not match Lc: {}",
                        hex::encode_upper(raw)
                    )))
                }
            }
        }
    }

    /// Encode the command to its short form wire encoding
    ///
    /// Fails with a usage error when the data does not fit a one byte Lc.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(6 + self.data.len());
        buf.put_u8(self.cla);
        buf.put_u8(self.ins);
        buf.put_u8(self.p1);
        buf.put_u8(self.p2);
        if !self.data.is_empty() {
            buf.put_u8(length_byte("command data", self.data.len())?);
            buf.put_slice(&self.data);
        }
        if let Some(le) = self.le {
            buf.put_u8(le);
        }
        Ok(buf.freeze())
    }
}

/// A length that must fit the one byte length fields of short APDUs
pub(crate) fn length_byte(what: &str, len: usize) -> Result<u8> {
    u8::try_from(len)
        .map_err(|_| Error::Usage(format!("{what} of {len} bytes does not fit a short APDU")))
}

/// A response APDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response data
    pub data: Bytes,
    /// Trailing status word
    pub status: StatusWord,
}

impl Response {
    /// Split a raw response into data and status word
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < 2 {
            return Err(Error::InvalidResponse {
                operation: "TRANSMIT",
                reason: "response shorter than a status word",
            });
        }
        let (data, sw) = raw.split_at(raw.len() - 2);
        Ok(Self {
            data: Bytes::copy_from_slice(data),
            status: StatusWord::new(sw[0], sw[1]),
        })
    }

    /// Wire form: data followed by the status word
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.data.len() + 2);
        buf.put_slice(&self.data);
        buf.put_u8(self.status.sw1);
        buf.put_u8(self.status.sw2);
        buf.freeze()
    }

    /// Succeed on 9000, otherwise fail with a protocol error for `operation`
    pub fn success_or(self, operation: &'static str) -> Result<Self> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(Error::Protocol {
                operation,
                status: self.status,
            })
        }
    }
}
