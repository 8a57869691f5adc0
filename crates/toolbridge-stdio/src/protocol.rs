//! JSON-RPC 2.0 envelopes for the MCP wire protocol.
//!
//! One JSON object per line on the child's stdin/stdout. Envelopes are
//! built and structurally validated here; nothing else in the crate touches
//! raw wire shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Protocol version string required on every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Errors from building or interpreting JSON-RPC envelopes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("request method must be a non-empty string")]
    MissingMethod,

    #[error("response requires exactly one of result or error")]
    ResultXorError,

    #[error("response error requires a message")]
    MissingErrorMessage,

    #[error("response id does not match request id: sent {sent}, received {received}")]
    IdMismatch { sent: String, received: String },

    #[error("malformed JSON-RPC frame: {0}")]
    Malformed(String),
}

/// JSON-RPC request id: numeric for the fixed handshake ids, UUID text for
/// everything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    Text(String),
}

impl RequestId {
    /// Generate a fresh UUID id.
    #[must_use]
    pub fn fresh() -> Self {
        Self::Text(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: RequestId,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl JsonRpcResponse {
    /// The result payload, if present.
    #[must_use]
    pub const fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// The error object, if present.
    #[must_use]
    pub const fn error(&self) -> Option<&RpcError> {
        self.error.as_ref()
    }
}

/// Build a request envelope.
///
/// `params` is omitted from the serialized form entirely when `None`.
/// `id = None` assigns a fresh UUID.
pub fn request(
    method: &str,
    params: Option<Value>,
    id: Option<RequestId>,
) -> Result<JsonRpcRequest, ProtocolError> {
    if method.is_empty() {
        return Err(ProtocolError::MissingMethod);
    }
    Ok(JsonRpcRequest {
        jsonrpc: JSONRPC_VERSION.to_string(),
        method: method.to_string(),
        params,
        id: id.unwrap_or_else(RequestId::fresh),
    })
}

/// Build a response envelope.
///
/// Exactly one of `result`/`error` is required. The error object requires a
/// message; `code` defaults to -1 and `data` is passed through untouched.
pub fn response(
    result: Option<Value>,
    error: Option<Value>,
    id: RequestId,
) -> Result<JsonRpcResponse, ProtocolError> {
    if result.is_some() == error.is_some() {
        return Err(ProtocolError::ResultXorError);
    }

    let error = match error {
        None => None,
        Some(raw) => {
            let message = raw
                .get("message")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .ok_or(ProtocolError::MissingErrorMessage)?
                .to_string();
            let code = raw.get("code").and_then(Value::as_i64).unwrap_or(-1);
            let data = raw.get("data").cloned();
            Some(RpcError {
                code,
                message,
                data,
            })
        }
    };

    Ok(JsonRpcResponse {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id: Some(id),
        result,
        error,
    })
}

/// Structural validity of a raw request frame.
#[must_use]
pub fn is_valid_request(frame: &Value) -> bool {
    let Some(obj) = frame.as_object() else {
        return false;
    };
    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return false;
    }
    if !obj.get("method").is_some_and(Value::is_string) {
        return false;
    }
    // params, when present, must be structured (by-position or by-name)
    if let Some(params) = obj.get("params") {
        if !params.is_object() && !params.is_array() {
            return false;
        }
    }
    obj.contains_key("id")
}

/// Structural validity of a raw response frame.
#[must_use]
pub fn is_valid_response(frame: &Value) -> bool {
    let Some(obj) = frame.as_object() else {
        return false;
    };
    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return false;
    }
    if !obj.contains_key("id") {
        return false;
    }
    let has_result = obj.contains_key("result");
    let has_error = obj.contains_key("error");
    has_result != has_error
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serialization_omits_none_params() {
        let req = request("tools/list", None, Some(RequestId::Number(2))).unwrap();
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"tools/list\""));
        assert!(json.contains("\"id\":2"));
        assert!(!json.contains("params"));
    }

    #[test]
    fn request_assigns_fresh_uuid_id() {
        let req = request("tools/call", Some(json!({"name": "x"})), None).unwrap();
        match req.id {
            RequestId::Text(ref s) => assert_eq!(s.len(), 36),
            RequestId::Number(_) => panic!("expected UUID id"),
        }
    }

    #[test]
    fn request_rejects_empty_method() {
        assert_eq!(request("", None, None), Err(ProtocolError::MissingMethod));
    }

    #[test]
    fn response_requires_exactly_one_of_result_and_error() {
        let both = response(
            Some(json!({})),
            Some(json!({"message": "boom"})),
            RequestId::Number(1),
        );
        assert_eq!(both.unwrap_err(), ProtocolError::ResultXorError);

        let neither = response(None, None, RequestId::Number(1));
        assert_eq!(neither.unwrap_err(), ProtocolError::ResultXorError);
    }

    #[test]
    fn response_error_defaults_code_and_passes_data() {
        let resp = response(
            None,
            Some(json!({"message": "boom", "data": {"hint": "x"}})),
            RequestId::Number(1),
        )
        .unwrap();
        let err = resp.error().unwrap();
        assert_eq!(err.code, -1);
        assert_eq!(err.message, "boom");
        assert_eq!(err.data.as_ref().unwrap()["hint"], "x");
    }

    #[test]
    fn response_error_requires_message() {
        let resp = response(None, Some(json!({"code": -32600})), RequestId::Number(1));
        assert_eq!(resp.unwrap_err(), ProtocolError::MissingErrorMessage);
    }

    #[test]
    fn valid_request_predicate() {
        assert!(is_valid_request(&json!({
            "jsonrpc": "2.0", "method": "initialize", "id": 1
        })));
        // wrong version
        assert!(!is_valid_request(&json!({
            "jsonrpc": "1.0", "method": "initialize", "id": 1
        })));
        // params must be structured
        assert!(!is_valid_request(&json!({
            "jsonrpc": "2.0", "method": "x", "params": "scalar", "id": 1
        })));
        // missing id
        assert!(!is_valid_request(&json!({
            "jsonrpc": "2.0", "method": "x"
        })));
    }

    #[test]
    fn valid_response_predicate() {
        assert!(is_valid_response(&json!({
            "jsonrpc": "2.0", "id": 1, "result": {}
        })));
        assert!(is_valid_response(&json!({
            "jsonrpc": "2.0", "id": 1, "error": {"code": -32600, "message": "bad"}
        })));
        // both result and error
        assert!(!is_valid_response(&json!({
            "jsonrpc": "2.0", "id": 1, "result": {}, "error": {"message": "bad"}
        })));
        // neither
        assert!(!is_valid_response(&json!({"jsonrpc": "2.0", "id": 1})));
    }

    #[test]
    fn response_parsing_round_trip() {
        let parsed: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#).unwrap();
        assert_eq!(parsed.id, Some(RequestId::Number(1)));
        assert!(parsed.result().is_some());
        assert!(parsed.error().is_none());

        let parsed: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":"abc","error":{"code":-32601,"message":"Tool not found"}}"#,
        )
        .unwrap();
        assert_eq!(parsed.id, Some(RequestId::Text("abc".to_string())));
        assert_eq!(parsed.error().unwrap().code, -32601);
    }
}
