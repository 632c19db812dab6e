//! JSON-RPC 2.0 wire types and inbound frame classification.

use serde_json::{Map, Value};

use crate::error::{ProtocolError, RpcError};

/// A request issued by the layer above, identified on the wire by `wire_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: String,
    pub params: Vec<Value>,
    pub wire_id: u64,
}

impl OutboundRequest {
    pub fn new(method: impl Into<String>, params: Vec<Value>, wire_id: u64) -> Self {
        Self {
            method: method.into(),
            params,
            wire_id,
        }
    }

    /// Serialize as one newline-terminated frame.
    pub fn to_frame(&self) -> Vec<u8> {
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.wire_id,
            method: &self.method,
            params: &self.params,
        };
        // Serializing a struct of strings, integers and `Value`s cannot fail.
        let mut frame = serde_json::to_vec(&req).unwrap_or_default();
        frame.push(b'\n');
        frame
    }
}

#[derive(serde::Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a [Value],
}

/// One decoded inbound frame, classified at the framing boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// A frame carrying an `id`. `payload` is the frame minus `id` and
    /// `jsonrpc`, i.e. `{"result": ..}` or `{"error": ..}`.
    Response { wire_id: u64, payload: Value },
    /// A frame without an `id`, delivered whole.
    Notification { payload: Value },
    Malformed(Malformed),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Malformed {
    Protocol(ProtocolError),
    StreamClosed,
}

/// Classify a single line received from the server.
pub fn classify_line(line: &[u8]) -> InboundMessage {
    match serde_json::from_slice::<Value>(line) {
        Ok(value) => classify(value),
        Err(e) => InboundMessage::Malformed(Malformed::Protocol(ProtocolError::InvalidJson(
            e.to_string(),
        ))),
    }
}

pub fn classify(value: Value) -> InboundMessage {
    let mut object = match value {
        Value::Object(object) => object,
        other => {
            return InboundMessage::Malformed(Malformed::Protocol(ProtocolError::NotAnObject(
                other,
            )))
        }
    };

    match object.remove("id") {
        None | Some(Value::Null) => InboundMessage::Notification {
            payload: Value::Object(object),
        },
        Some(id) => match id.as_u64() {
            Some(wire_id) => {
                object.remove("jsonrpc");
                InboundMessage::Response {
                    wire_id,
                    payload: Value::Object(object),
                }
            }
            None => InboundMessage::Malformed(Malformed::Protocol(ProtocolError::InvalidId(id))),
        },
    }
}

/// Extract the `result` of a response payload, or decode its `error`.
pub fn response_result(payload: Value) -> Result<Value, RpcError> {
    let mut object: Map<String, Value> = match payload {
        Value::Object(object) => object,
        other => {
            return Err(RpcError::InvalidResponse(format!(
                "response payload is not an object: {other}"
            )))
        }
    };

    match object.remove("error") {
        Some(Value::Null) | None => Ok(object.remove("result").unwrap_or(Value::Null)),
        Some(err) => Err(parse_jsonrpc_error(err)),
    }
}

/// Parse a JSON-RPC error value into a structured [`RpcError`].
///
/// Standard errors look like `{"code": <int>, "message": <string>}`; anything
/// else is kept verbatim as an invalid response.
pub fn parse_jsonrpc_error(err: Value) -> RpcError {
    #[derive(serde::Deserialize)]
    struct JsonRpcError {
        code: i64,
        message: String,
    }

    match serde_json::from_value::<JsonRpcError>(err.clone()) {
        Ok(parsed) => RpcError::ServerError {
            code: parsed.code,
            message: parsed.message,
        },
        Err(_) => RpcError::InvalidResponse(format!("non-standard JSON-RPC error: {err}")),
    }
}
