//! alderd — a spanning-tree IRC daemon.
//!
//! Clients connect on one side; peer servers federate the channel and
//! nickname namespace on the other, converging through timestamp rules
//! after every net merge. The crate is a daemon first; the library
//! surface exists for the integration tests, which drive two in-memory
//! networks through the same entry points the sockets use.

pub mod commands;
pub mod config;
pub mod error;
pub mod hooks;
pub mod link;
pub mod modes;
pub mod network;
pub mod state;

/// The version string used in 002/004/351 and the CAPAB exchange.
pub fn version_string() -> String {
    format!("alderd-{}", env!("CARGO_PKG_VERSION"))
}
