//! Error types for the PC/SC binding

use std::fmt;

/// PC/SC-specific errors
#[derive(Debug, thiserror::Error)]
pub enum PcscError {
    /// PC/SC error
    Pcsc(#[from] pcsc::Error),

    /// No readers available
    NoReadersAvailable,

    /// Reader name cannot be passed to PC/SC
    InvalidReaderName(String),

    /// No card present in reader
    NoCard(String),

    /// The connection was already closed
    Disconnected,
}

impl fmt::Display for PcscError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pcsc(e) => write!(f, "PC/SC error: {e}"),
            Self::NoReadersAvailable => write!(f, "No readers available"),
            Self::InvalidReaderName(r) => write!(f, "Invalid reader name: {r}"),
            Self::NoCard(r) => write!(f, "No card present in reader: {r}"),
            Self::Disconnected => write!(f, "Card connection already closed"),
        }
    }
}

impl PcscError {
    /// Turn into a transport error for the given operation
    pub fn during(self, operation: &'static str) -> gpman::Error {
        gpman::Error::transport(operation, self)
    }
}

impl From<PcscError> for gpman::Error {
    fn from(error: PcscError) -> Self {
        error.during("PC/SC")
    }
}
