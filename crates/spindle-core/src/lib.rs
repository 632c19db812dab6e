//! Client transport for Electrum-style JSON-RPC servers.
//!
//! One [`Session`] multiplexes many requests over a single, optionally
//! TLS-protected TCP connection, pairing responses with their requests and
//! surfacing subscription notifications to the caller.

pub mod config;
pub mod correlation;
pub mod endpoint;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod transport;
pub mod trust;

#[cfg(test)]
mod test_util;

pub use config::{ConnectionOptions, SessionConfig};
pub use endpoint::{Endpoint, TransportKind};
pub use error::CoreError;
pub use session::{Inbound, Response, Session, SessionState};
