//! The socket layer.
//!
//! Listeners accept client and server-link connections; each connection
//! runs a reader task and a writer task around the shared state lock.
//! Everything stateful funnels through [`crate::state::Network`] under
//! one lock held per inbound line, which gives the protocol its ordering
//! guarantees without any locking inside the data model.

pub mod connection;
pub mod gateway;
pub mod sendq;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::state::Network;

/// The one lock around the whole data model.
pub type Shared = Arc<Mutex<Network>>;
