//! Request/response middleware.
//!
//! A [`Transform`] sees every message on one side of the bridge and may rewrite
//! it. Request transforms run in the supervisor worker right before the write to
//! stdin, so a rewritten `id` is the one used for correlation. Response
//! transforms run on the correlated reply before it is handed back to the HTTP
//! caller.

use bytes::Bytes;
use regex::RegexSet;
use serde_json::Value;
use std::{fmt, sync::Arc};
use tracing::{debug, info};

/// Rewrites a serialized JSON-RPC message.
pub trait Transform: Send + Sync {
    fn transform(&self, message: Bytes) -> Bytes;
}

impl<F> Transform for F
where
    F: Fn(Bytes) -> Bytes + Send + Sync,
{
    fn transform(&self, message: Bytes) -> Bytes {
        self(message)
    }
}

pub type SharedTransform = Arc<dyn Transform>;

/// Patterns SQLcl uses when a statement fails but the tool call itself succeeds.
pub const ORACLE_ERROR_PATTERNS: &[&str] = &[r"(?i)ORA-\d+", r"Error:"];

/// Flags tool results whose text reports a domain error.
///
/// Some MCP servers answer a failed operation with a successful JSON-RPC result
/// that merely contains the error text. Generic clients then treat the call as
/// succeeded. This transform scans `result.content[]` text items and sets
/// `result.isError = true` when any of them matches.
#[derive(Clone)]
pub struct ErrorMarker {
    patterns: RegexSet,
}

impl ErrorMarker {
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            patterns: RegexSet::new(patterns)?,
        })
    }

    /// Marker for Oracle `ORA-nnnnn` codes and SQLcl `Error:` lines.
    pub fn oracle() -> Self {
        Self::new(ORACLE_ERROR_PATTERNS).expect("built-in Oracle patterns are valid")
    }

    fn mark(&self, response: &mut Value) -> bool {
        let Some(result) = response.get_mut("result").and_then(Value::as_object_mut) else {
            return false;
        };

        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            return false;
        }

        let matched = result
            .get("content")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .find(|text| self.patterns.is_match(text));

        match matched {
            Some(text) => {
                info!("Detected domain error in tool result: {}", text);
                result.insert("isError".to_string(), Value::Bool(true));
                true
            }
            None => false,
        }
    }
}

impl Transform for ErrorMarker {
    fn transform(&self, message: Bytes) -> Bytes {
        let Ok(mut response) = serde_json::from_slice::<Value>(&message) else {
            return message;
        };

        if !self.mark(&mut response) {
            return message;
        }

        match serde_json::to_vec(&response) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                debug!("Failed to re-serialize marked response: {}", e);
                message
            }
        }
    }
}

impl fmt::Debug for ErrorMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorMarker")
            .field("patterns", &self.patterns.patterns())
            .finish()
    }
}
