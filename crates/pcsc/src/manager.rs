//! PC/SC terminal: reader discovery and card connections

use std::{ffi::CString, fmt};

use gpman::{GlobalPlatform, ReaderInfo, Terminal};
use pcsc::{Context, Scope};
use tracing::debug;

use crate::{config::PcscConfig, error::PcscError, reader::PcscReader, transport::PcscConnection};

/// Terminal backed by the system PC/SC service
pub struct PcscTerminal {
    /// PC/SC context
    context: Context,
    /// Connection settings
    config: PcscConfig,
}

impl fmt::Debug for PcscTerminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscTerminal")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PcscTerminal {
    /// Establish a PC/SC context
    pub fn new() -> Result<Self, PcscError> {
        Self::with_config(PcscConfig::default())
    }

    /// Establish a PC/SC context with custom connection settings
    pub fn with_config(config: PcscConfig) -> Result<Self, PcscError> {
        let context = Context::establish(Scope::User)?;
        Ok(Self { context, config })
    }

    /// List all available card readers with their card state
    pub fn readers(&self) -> Result<Vec<PcscReader>, PcscError> {
        let readers = match self.context.list_readers_owned() {
            Ok(readers) => readers,
            Err(pcsc::Error::NoReadersAvailable) => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if readers.is_empty() {
            return Err(PcscError::NoReadersAvailable);
        }

        let mut result = Vec::with_capacity(readers.len());
        for reader_name in readers {
            let mut reader_states =
                vec![pcsc::ReaderState::new(reader_name.clone(), pcsc::State::UNAWARE)];

            match self.context.get_status_change(None, &mut reader_states) {
                Ok(()) => result.push(PcscReader::from_reader_state(&reader_states[0])),
                Err(e) => {
                    // If we can't get status, assume no card
                    debug!(reader = ?reader_name, error = %e, "no reader status");
                    result.push(PcscReader::new(
                        reader_name.to_string_lossy().into_owned(),
                        false,
                        None,
                    ));
                }
            }
        }

        Ok(result)
    }

    /// Open a raw connection to the card in a reader
    pub fn open(&self, reader_name: &str) -> Result<PcscConnection, PcscError> {
        let reader = CString::new(reader_name)
            .map_err(|_| PcscError::InvalidReaderName(reader_name.to_owned()))?;

        match self
            .context
            .connect(&reader, self.config.share_mode.into(), self.config.protocols)
        {
            Ok(card) => {
                debug!(reader = reader_name, "connected");
                Ok(PcscConnection::new(card, reader_name, self.config))
            }
            Err(pcsc::Error::NoSmartcard) => Err(PcscError::NoCard(reader_name.to_owned())),
            Err(e) => Err(e.into()),
        }
    }
}

impl Terminal for PcscTerminal {
    type Card = GlobalPlatform<PcscConnection>;

    fn list_readers(&mut self) -> gpman::Result<Vec<ReaderInfo>> {
        match self.readers() {
            Ok(readers) => Ok(readers.into_iter().map(ReaderInfo::from).collect()),
            Err(PcscError::NoReadersAvailable) => Ok(Vec::new()),
            Err(e) => Err(e.during("list readers")),
        }
    }

    fn connect(&mut self, reader: &str) -> gpman::Result<Self::Card> {
        self.open(reader)
            .map(GlobalPlatform::new)
            .map_err(|e| e.during("connect"))
    }
}
