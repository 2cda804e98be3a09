//! Error classification
//!
//! Every failure of a reader session is turned into a [`Verdict`] that the
//! run loop acts on. The decision only looks at [`Error::kind`] and the
//! session options.

use crate::{Error, ErrorKind, config::SessionOptions};

/// What the run does after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Log it and go on with the next command
    Continue,
    /// Stop working with this reader, go on with the next one
    SkipReader,
    /// Stop the whole run
    Abort,
}

/// Where in the reader session the failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Before the dispatcher runs: connect, select, gate, authenticate
    Setup,
    /// While running one of the requested commands
    Dispatch,
}

/// Classify a failure
pub fn classify(error: &Error, options: &SessionOptions, stage: Stage) -> Verdict {
    match error.kind() {
        ErrorKind::Usage | ErrorKind::Integrity => Verdict::Abort,
        ErrorKind::Transport if options.continue_on_error => Verdict::SkipReader,
        ErrorKind::Transport => Verdict::Abort,
        ErrorKind::Protocol if options.relaxed => match stage {
            Stage::Setup => Verdict::SkipReader,
            Stage::Dispatch => Verdict::Continue,
        },
        ErrorKind::Protocol => Verdict::Abort,
        // a failed authentication already cost the card one retry
        ErrorKind::Authentication if options.relaxed || options.continue_on_error => {
            Verdict::SkipReader
        }
        ErrorKind::Authentication => Verdict::Abort,
    }
}
