//! Line-delimited JSON-RPC wire types for the mail-server protocol.
//!
//! Each request is one JSON object written as a single line; each
//! response is one JSON object read back as a single line. The `id`
//! field is a per-exchange sequence (0 for the first call on a
//! connection, 1 for the second); a mismatched response id is logged
//! and processing continues.

use ledgermail_types::{MailError, MessageId, Result, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Methods and peer error codes
// ---------------------------------------------------------------------------

/// Stores a message on the server; may reject with a peer error code.
pub const METHOD_STORE_MESSAGE: &str = "mail_store_message";

/// Fetches a message by id; used both for confirmation after a store
/// and for inventory downloads.
pub const METHOD_FETCH_MESSAGE: &str = "mail_fetch_message";

/// Pages the `(timestamp, message_id)` inventory for an address.
pub const METHOD_FETCH_INVENTORY: &str = "mail_fetch_inventory";

/// The server already holds this message; treated as success.
pub const ERROR_ALREADY_STORED: &str = "message_already_stored";

/// The content timestamp is stale; the proof of work must be redone.
pub const ERROR_TIMESTAMP_TOO_OLD: &str = "timestamp_too_old";

/// One inventory entry: when the server indexed the message, and its id.
pub type InventoryEntry = (Timestamp, MessageId);

// ---------------------------------------------------------------------------
// RpcRequest
// ---------------------------------------------------------------------------

/// A single JSON-RPC request line.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Per-exchange sequence number.
    pub id: u64,
    /// Method name.
    pub method: String,
    /// Positional parameters.
    pub params: Vec<Value>,
}

impl RpcRequest {
    /// Builds a request from already-encoded parameters; see
    /// [`to_value`] for encoding them.
    pub fn new(id: u64, method: &str, params: Vec<Value>) -> Self {
        Self {
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-encodes one rpc parameter.
///
/// # Errors
///
/// Returns [`MailError::Protocol`] if the parameter cannot be
/// serialized.
pub fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| MailError::Protocol {
        reason: format!("failed to encode rpc parameter: {e}"),
    })
}

// ---------------------------------------------------------------------------
// RpcResponse
// ---------------------------------------------------------------------------

/// A single JSON-RPC response line.
///
/// Exactly one of `result` and `error` is expected to be present.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Echo of the request's sequence number.
    pub id: u64,
    /// Successful result value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error value; a bare string code or an object with a `name` or
    /// `message` field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl RpcResponse {
    /// Builds a success response.
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Builds an error response from a peer error code or message.
    pub fn failure(id: u64, error: &str) -> Self {
        Self {
            id,
            result: None,
            error: Some(Value::String(error.to_string())),
        }
    }

    /// Extracts the error text, if the response carries an error.
    ///
    /// Servers report errors either as a bare string code or as an
    /// exception object; for objects, the `name` field is preferred
    /// over `message`.
    pub fn error_text(&self) -> Option<String> {
        let error = self.error.as_ref()?;
        match error {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map
                .get("name")
                .or_else(|| map.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| Some(error.to_string())),
            other => Some(other.to_string()),
        }
    }

    /// Returns the result value, converting a peer error into
    /// [`MailError::Peer`].
    ///
    /// # Errors
    ///
    /// - [`MailError::Peer`] if the response carries an error.
    /// - [`MailError::Protocol`] if neither field is present.
    pub fn into_result(self) -> Result<Value> {
        if let Some(text) = self.error_text() {
            return Err(MailError::Peer { reason: text });
        }
        self.result.ok_or_else(|| MailError::Protocol {
            reason: "rpc response carries neither result nor error".into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_line_shape() -> Result<()> {
        let request = RpcRequest::new(
            0,
            METHOD_FETCH_MESSAGE,
            vec![to_value(&MessageId::new([1u8; 20]))?],
        );
        let line = serde_json::to_string(&request).map_err(|e| MailError::Protocol {
            reason: e.to_string(),
        })?;
        assert!(line.starts_with("{\"id\":0,\"method\":\"mail_fetch_message\""));
        Ok(())
    }

    #[test]
    fn error_text_from_string() {
        let response = RpcResponse::failure(0, ERROR_ALREADY_STORED);
        assert_eq!(response.error_text().as_deref(), Some(ERROR_ALREADY_STORED));
    }

    #[test]
    fn error_text_from_exception_object() {
        let response = RpcResponse {
            id: 0,
            result: None,
            error: Some(serde_json::json!({"name": ERROR_TIMESTAMP_TOO_OLD, "code": 37})),
        };
        assert_eq!(response.error_text().as_deref(), Some(ERROR_TIMESTAMP_TOO_OLD));
    }

    #[test]
    fn success_has_no_error_text() {
        let response = RpcResponse::success(1, Value::Null);
        assert!(response.error_text().is_none());
    }

    #[test]
    fn into_result_converts_errors() {
        let response = RpcResponse::failure(0, "disk full");
        match response.into_result() {
            Err(MailError::Peer { reason }) => assert_eq!(reason, "disk full"),
            other => panic!("expected peer error, got {other:?}"),
        }
    }

    #[test]
    fn error_field_omitted_on_success_wire() {
        let line = serde_json::to_string(&RpcResponse::success(0, Value::Bool(true))).unwrap();
        assert!(!line.contains("error"));
    }
}
