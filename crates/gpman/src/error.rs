//! Error types for card management operations

use thiserror::Error;

use crate::{globalplatform::StatusWord, keys::Diversification};

/// Result type for card management operations
pub type Result<T> = std::result::Result<T, Error>;

/// The coarse failure categories the run loop decides on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Contradictory or missing parameters, found before any device I/O
    Usage,
    /// Reader or connection level failure
    Transport,
    /// The card rejected an operation
    Protocol,
    /// Secure channel establishment failed
    Authentication,
    /// The card reported state that must not be acted upon
    Integrity,
}

/// Error type for card management operations
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid operator input
    #[error("{0}")]
    Usage(String),

    /// Executable load file could not be parsed
    #[error("CAP file error: {0}")]
    CapFile(String),

    /// Reader or connection failure
    #[error("{operation} failed: {message}")]
    Transport {
        /// Operation being attempted
        operation: &'static str,
        /// Message from the transport layer
        message: String,
    },

    /// The card answered with an error status word
    #[error("{operation} failed with {status} ({})", .status.description())]
    Protocol {
        /// Command being attempted
        operation: &'static str,
        /// Status word returned by the card
        status: StatusWord,
    },

    /// The card answered with data that cannot be interpreted
    #[error("invalid response to {operation}: {reason}")]
    InvalidResponse {
        /// Command being attempted
        operation: &'static str,
        /// What was wrong with the response
        reason: &'static str,
    },

    /// Card authentication failed
    #[error("card authentication failed: {0}")]
    Authentication(String),

    /// Unsupported SCP version
    #[error("unsupported SCP version: SCP{0:02}")]
    UnsupportedScpVersion(u8),

    /// The card likely uses diversified keys that were not requested
    #[error("card requires {suggested} key diversification")]
    DiversificationRequired {
        /// Diversification scheme suggested by the card production data
        suggested: Diversification,
    },

    /// The key information template does not describe three keys
    #[error("template has bad length: {actual} entries, expected 3")]
    TemplateIntegrity {
        /// Number of entries found
        actual: usize,
    },

    /// Cryptographic operation failed
    #[error("cryptographic error: {0}")]
    Crypto(&'static str),

    /// I/O error while reading local files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a transport error from any displayable cause
    pub fn transport(operation: &'static str, cause: impl std::fmt::Display) -> Self {
        Self::Transport {
            operation,
            message: cause.to_string(),
        }
    }

    /// The failure category of this error
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Usage(_)
            | Self::CapFile(_)
            | Self::DiversificationRequired { .. }
            | Self::Crypto(_)
            | Self::Io(_) => ErrorKind::Usage,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Protocol { .. } | Self::InvalidResponse { .. } => ErrorKind::Protocol,
            Self::Authentication(_) | Self::UnsupportedScpVersion(_) => ErrorKind::Authentication,
            Self::TemplateIntegrity { .. } => ErrorKind::Integrity,
        }
    }

    /// Status word carried by a protocol error
    pub const fn status(&self) -> Option<StatusWord> {
        match self {
            Self::Protocol { status, .. } => Some(*status),
            _ => None,
        }
    }
}
