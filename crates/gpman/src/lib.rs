//! GlobalPlatform card management
//!
//! This crate manages GlobalPlatform smart cards: it loads, installs and
//! deletes executables, lists the card registry, and administers the
//! secure channel keys.
//!
//! A run is described by one immutable [`Config`]. The [`Orchestrator`]
//! walks the readers of a [`Terminal`], selects the security domain,
//! checks the diversification gate, authenticates when needed and hands
//! every requested verb to the [`Dispatcher`]. Failures are classified per
//! reader into continue, skip or abort.
//!
//! The card side is reached through the ports in [`card`]. The
//! [`GlobalPlatform`] engine implements them on top of any raw
//! [`Connection`].

pub mod aid;
pub mod cap;
pub mod card;
pub mod classify;
pub mod config;
pub mod cplc;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod globalplatform;
pub mod keys;
pub mod registry;
pub mod report;
pub mod session;

pub use aid::Aid;
pub use cap::ExecutableSource;
pub use card::{CardManager, Connection, ReaderInfo, Terminal};
pub use classify::{Stage, Verdict, classify};
pub use config::{CommandRequest, Config, ReaderSelection, SecurityMode, SessionOptions};
pub use dispatch::Dispatcher;
pub use error::{Error, ErrorKind, Result};
pub use globalplatform::GlobalPlatform;
pub use keys::{Diversification, Key, KeyOverrides, KeySet, KeyType};
pub use registry::{Registry, RegistryEntry};
pub use report::{MemoryReporter, Reporter};
pub use session::{Orchestrator, ReaderOutcome, RunReport};
