//! Failures surfaced by backend queries.

use serde::Deserialize;
use serde_json::Value;

/// Reserved JSON-RPC error codes the info pipeline reacts to.
pub mod codes {
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const REQUEST_CANCELLED: i64 = -32800;
    /// The document changed while the request was in flight.
    pub const CONTENT_MODIFIED: i64 = -32801;
    /// The RPC session expired; connect again and retry.
    pub const RPC_NEEDS_RECONNECT: i64 = -32900;
    pub const WORKER_EXITED: i64 = -32901;
    pub const WORKER_CRASHED: i64 = -32902;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// A well-formed JSON-RPC error object.
    #[error("{message} (code {code})")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    /// A rejection that does not follow the JSON-RPC error shape.
    #[error("{}", render_payload(.0))]
    Payload(Value),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("`{method}` timed out after {secs}s")]
    Timeout { method: String, secs: u64 },
    #[error("malformed `{method}` response: {reason}")]
    Decode { method: String, reason: String },
}

#[derive(Deserialize)]
struct ErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

fn render_payload(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl BackendError {
    /// Classify the `error` member of a response.
    #[must_use]
    pub fn from_response_error(value: Value) -> Self {
        match serde_json::from_value::<ErrorObject>(value.clone()) {
            Ok(obj) => Self::Rpc {
                code: obj.code,
                message: obj.message,
                data: obj.data,
            },
            Err(_) => Self::Payload(value),
        }
    }

    #[must_use]
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub(crate) fn decode(method: &str, err: &serde_json::Error) -> Self {
        Self::Decode {
            method: method.to_string(),
            reason: err.to_string(),
        }
    }

    #[must_use]
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_content_modified(&self) -> bool {
        self.code() == Some(codes::CONTENT_MODIFIED)
    }

    #[must_use]
    pub fn is_method_not_found(&self) -> bool {
        self.code() == Some(codes::METHOD_NOT_FOUND)
    }

    #[must_use]
    pub fn needs_reconnect(&self) -> bool {
        self.code() == Some(codes::RPC_NEEDS_RECONNECT)
    }

    /// A rejection carrying nothing reportable: `null`, `{}`, `[]` or `""`.
    #[must_use]
    pub fn is_empty_sentinel(&self) -> bool {
        match self {
            Self::Payload(Value::Null) => true,
            Self::Payload(Value::Object(map)) => map.is_empty(),
            Self::Payload(Value::Array(items)) => items.is_empty(),
            Self::Payload(Value::String(s)) => s.trim().is_empty(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_object_becomes_rpc_variant() {
        let err = BackendError::from_response_error(serde_json::json!({
            "code": -32801,
            "message": "content modified"
        }));
        assert!(err.is_content_modified());
        assert!(!err.is_method_not_found());
        assert_eq!(err.to_string(), "content modified (code -32801)");
    }

    #[test]
    fn method_not_found_and_reconnect_codes() {
        assert!(BackendError::rpc(codes::METHOD_NOT_FOUND, "no").is_method_not_found());
        assert!(BackendError::rpc(codes::RPC_NEEDS_RECONNECT, "stale").needs_reconnect());
    }

    #[test]
    fn non_standard_payload_is_kept_verbatim() {
        let err = BackendError::from_response_error(serde_json::json!({ "reason": "worker gone" }));
        assert!(matches!(err, BackendError::Payload(_)));
        assert!(!err.is_empty_sentinel());
        assert_eq!(err.to_string(), r#"{"reason":"worker gone"}"#);
    }

    #[test]
    fn empty_payloads_are_sentinels() {
        for value in [
            serde_json::json!({}),
            serde_json::json!(null),
            serde_json::json!([]),
            serde_json::json!("  "),
        ] {
            assert!(BackendError::from_response_error(value).is_empty_sentinel());
        }
    }

    #[test]
    fn transport_errors_are_not_sentinels() {
        assert!(!BackendError::Transport("closed".into()).is_empty_sentinel());
        assert_eq!(BackendError::Transport("closed".into()).code(), None);
    }
}
