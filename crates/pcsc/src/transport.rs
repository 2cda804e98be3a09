//! PC/SC card connection

use std::fmt;

use bytes::Bytes;
use gpman::Connection;
use pcsc::{Attribute, Card, Disposition, MAX_BUFFER_SIZE};
use tracing::{debug, trace};

use crate::{
    config::{PcscConfig, ShareMode},
    error::PcscError,
};

/// Connection to the card in one PC/SC reader
pub struct PcscConnection {
    /// Card connection, `None` once disconnected
    card: Option<Card>,
    /// Reader name
    reader_name: String,
    /// Configuration
    config: PcscConfig,
    /// Whether the card is held exclusively
    exclusive: bool,
}

impl fmt::Debug for PcscConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscConnection")
            .field("reader_name", &self.reader_name)
            .field("connected", &self.card.is_some())
            .field("config", &self.config)
            .field("exclusive", &self.exclusive)
            .finish()
    }
}

impl PcscConnection {
    pub(crate) fn new(card: Card, reader_name: &str, config: PcscConfig) -> Self {
        Self {
            card: Some(card),
            reader_name: reader_name.to_owned(),
            config,
            exclusive: false,
        }
    }

    /// Get the reader name
    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    fn card(&self) -> Result<&Card, PcscError> {
        self.card.as_ref().ok_or(PcscError::Disconnected)
    }

    fn card_mut(&mut self) -> Result<&mut Card, PcscError> {
        self.card.as_mut().ok_or(PcscError::Disconnected)
    }

    /// Reconnect with another share mode, keeping the card powered
    fn reshare(&mut self, mode: ShareMode) -> Result<(), PcscError> {
        let protocols = self.config.protocols;
        self.card_mut()?
            .reconnect(mode.into(), protocols, Disposition::LeaveCard)?;
        Ok(())
    }
}

impl Connection for PcscConnection {
    fn begin_exclusive(&mut self) -> gpman::Result<()> {
        if !self.exclusive {
            self.reshare(ShareMode::Exclusive)
                .map_err(|e| e.during("begin exclusive"))?;
            self.exclusive = true;
            debug!(reader = %self.reader_name, "exclusive access");
        }
        Ok(())
    }

    fn end_exclusive(&mut self) -> gpman::Result<()> {
        if self.exclusive {
            self.exclusive = false;
            self.reshare(ShareMode::Shared)
                .map_err(|e| e.during("end exclusive"))?;
        }
        Ok(())
    }

    fn disconnect(&mut self) -> gpman::Result<()> {
        self.exclusive = false;
        if let Some(card) = self.card.take() {
            card.disconnect(Disposition::LeaveCard)
                .map_err(|(_, e)| PcscError::from(e).during("disconnect"))?;
            debug!(reader = %self.reader_name, "disconnected");
        }
        Ok(())
    }

    fn transmit(&mut self, command: &[u8]) -> gpman::Result<Bytes> {
        let mut response_buffer = [0u8; MAX_BUFFER_SIZE];
        let card = self.card_mut().map_err(|e| e.during("transmit"))?;
        let response = card
            .transmit(command, &mut response_buffer)
            .map_err(|e| PcscError::from(e).during("transmit"))?;
        trace!(len = response.len(), "PC/SC response");
        Ok(Bytes::copy_from_slice(response))
    }

    fn atr(&self) -> gpman::Result<Bytes> {
        self.card()
            .and_then(|card| Ok(card.get_attribute_owned(Attribute::AtrString)?))
            .map(Bytes::from)
            .map_err(|e| e.during("read ATR"))
    }
}

impl Drop for PcscConnection {
    fn drop(&mut self) {
        if let Some(card) = self.card.take() {
            let _ = card.disconnect(Disposition::LeaveCard);
        }
    }
}
