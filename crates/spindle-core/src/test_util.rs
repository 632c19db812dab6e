//! Shared builders for `spindle-core` unit tests.

use serde_json::{json, Value};

use crate::protocol::OutboundRequest;

/// A request with no parameters.
pub fn request(method: &str, wire_id: u64) -> OutboundRequest {
    OutboundRequest::new(method, Vec::new(), wire_id)
}

/// The `server.version` handshake every Electrum client opens with.
pub fn server_version(wire_id: u64) -> OutboundRequest {
    OutboundRequest::new("server.version", vec![json!("1.1"), json!("1.1")], wire_id)
}

/// A `blockchain.headers.subscribe` notification frame.
pub fn header_notification(height: u64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "blockchain.headers.subscribe",
        "params": [{"height": height, "hex": "00"}],
    })
}
