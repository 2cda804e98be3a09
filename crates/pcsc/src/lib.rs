//! PC/SC binding for gpman
//!
//! [`PcscTerminal`] implements the [`gpman::Terminal`] port on top of the
//! system PC/SC service, handing out [`gpman::GlobalPlatform`] engines over
//! a [`PcscConnection`].
//!
//! # Examples
//!
//! ```no_run
//! use gpman::Terminal;
//! use gpman_pcsc::PcscTerminal;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut terminal = PcscTerminal::new()?;
//! for reader in terminal.list_readers()? {
//!     println!("{} {}", if reader.card_present { "[*]" } else { "[ ]" }, reader.name);
//! }
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod config;
mod error;
mod manager;
mod reader;
mod transport;

pub use config::{PcscConfig, ShareMode};
pub use error::PcscError;
pub use manager::PcscTerminal;
pub use reader::PcscReader;
pub use transport::PcscConnection;

// Re-export some pcsc types for convenience
pub use pcsc::{Protocol, Protocols};
