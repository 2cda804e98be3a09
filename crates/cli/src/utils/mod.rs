//! Helpers for the gpman command line

pub(crate) mod config;
pub(crate) mod display;
pub(crate) mod dump;
pub(crate) mod reader;
