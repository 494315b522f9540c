//! JSON-RPC envelopes exchanged with the MCP server.
//!
//! An envelope is kept as the exact bytes the client sent. The bridge only ever
//! looks at the `id` member: a non-null `id` marks a request that expects one
//! response, an absent or `null` `id` marks a notification.

use crate::error::{BridgeError, Result};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Value, value::RawValue};
use std::fmt;

#[derive(Deserialize)]
struct IdOnly {
    #[serde(default)]
    id: Option<Value>,
}

/// Extract the JSON-RPC `id` of a serialized message.
///
/// Returns `None` for notifications (`id` absent or `null`) and for anything
/// that is not a JSON object.
pub fn message_id(message: &[u8]) -> Option<Value> {
    try_message_id(message).ok().flatten()
}

/// Like [`message_id`], but reports lines that are not JSON objects.
pub fn try_message_id(message: &[u8]) -> serde_json::Result<Option<Value>> {
    serde_json::from_slice::<IdOnly>(message).map(|parsed| parsed.id)
}

/// Compare two JSON-RPC ids.
///
/// Numbers compare by value so that `1` and `1.0` are the same id.
pub fn ids_match(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => {
            l == r || matches!((l.as_f64(), r.as_f64()), (Some(a), Some(b)) if a == b)
        }
        _ => left == right,
    }
}

/// A single JSON-RPC message on its way to the MCP server.
#[derive(Debug, Clone)]
pub struct Envelope {
    raw: Bytes,
    id: Option<Value>,
}

impl Envelope {
    /// Decode one JSON value from an HTTP body.
    ///
    /// The value's bytes are kept verbatim, except that a pretty-printed body is
    /// compacted onto a single line so it cannot break stdio line framing.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let raw: &RawValue = serde_json::from_slice(body).map_err(BridgeError::InvalidMessage)?;
        let text = raw.get();
        let bytes = if text.contains(['\n', '\r']) {
            let value: Value = serde_json::from_str(text)?;
            Bytes::from(serde_json::to_vec(&value)?)
        } else {
            Bytes::copy_from_slice(text.as_bytes())
        };
        Ok(Self::from_bytes(bytes))
    }

    /// Wrap bytes that are already a single-line JSON message.
    pub fn from_bytes(raw: Bytes) -> Self {
        let id = message_id(&raw);
        Self { raw, id }
    }

    pub fn id(&self) -> Option<&Value> {
        self.id.as_ref()
    }

    /// True when the message carries a non-null `id` and therefore expects a response.
    pub fn is_request(&self) -> bool {
        self.id.is_some()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn into_bytes(self) -> Bytes {
        self.raw
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.raw))
    }
}
