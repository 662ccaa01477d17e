//! Request/response envelopes (JSON-RPC 2.0).
//!
//! A [`RequestEnvelope`] is built from raw JSON by [`parse_envelope`], which
//! performs the shape checks; anything it rejects is answered with a
//! [`ResponseEnvelope`] carrying `ParseError` or `InvalidRequest`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RpcError;

pub const JSONRPC_VERSION: &str = "2.0";
/// Methods under this prefix may omit `id` and are never answered.
pub const NOTIFICATION_PREFIX: &str = "notifications/";

/// A validated incoming request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    /// Correlation token, echoed unchanged. Only notifications may omit it.
    pub id: Option<Value>,
    pub method: String,
    pub params: Map<String, Value>,
}

impl RequestEnvelope {
    pub fn new(
        id: impl Into<Value>,
        method: impl Into<String>,
        params: Map<String, Value>,
    ) -> Self {
        Self {
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.starts_with(NOTIFICATION_PREFIX)
    }
}

/// Exactly one of `result` / `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    #[serde(rename = "result")]
    Result(Value),
    #[serde(rename = "error")]
    Error(RpcError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl ResponseEnvelope {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            outcome: Outcome::Result(result),
        }
    }

    pub fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            outcome: Outcome::Error(error),
        }
    }

    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Result(v) => Some(v),
            Outcome::Error(_) => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&RpcError> {
        match &self.outcome {
            Outcome::Result(_) => None,
            Outcome::Error(e) => Some(e),
        }
    }

    /// Serialize to a single line (no embedded newlines).
    #[must_use]
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            // Only reachable if a handler produced a non-serializable value.
            let error = serde_json::json!({
                "code": -32603,
                "message": format!("Internal error: {e}"),
            });
            format!(r#"{{"jsonrpc":"2.0","id":null,"error":{error}}}"#)
        })
    }
}

/// Parse one raw frame (a stdio line or an HTTP body).
///
/// On failure returns the response to send back: `ParseError` with a null id
/// for non-JSON input, `InvalidRequest` echoing the id when it is readable.
pub fn parse_envelope(raw: &str) -> Result<RequestEnvelope, ResponseEnvelope> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| ResponseEnvelope::failure(Value::Null, RpcError::parse_error(e)))?;
    envelope_from_value(value)
}

/// Shape-check an already decoded JSON value.
pub fn envelope_from_value(value: Value) -> Result<RequestEnvelope, ResponseEnvelope> {
    let Value::Object(mut obj) = value else {
        return Err(ResponseEnvelope::failure(
            Value::Null,
            RpcError::invalid_request("envelope must be a JSON object"),
        ));
    };

    let id = match obj.remove("id") {
        None => None,
        Some(v @ (Value::String(_) | Value::Number(_) | Value::Null)) => Some(v),
        Some(_) => {
            return Err(ResponseEnvelope::failure(
                Value::Null,
                RpcError::invalid_request("id must be a string or number"),
            ));
        }
    };
    let echo = id.clone().unwrap_or(Value::Null);

    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(ResponseEnvelope::failure(
            echo,
            RpcError::invalid_request("jsonrpc must be \"2.0\""),
        ));
    }

    let method = match obj.remove("method") {
        Some(Value::String(m)) if !m.is_empty() => m,
        _ => {
            return Err(ResponseEnvelope::failure(
                echo,
                RpcError::invalid_request("method must be a non-empty string"),
            ));
        }
    };

    let params = match obj.remove("params") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(p)) => p,
        Some(_) => {
            return Err(ResponseEnvelope::failure(
                echo,
                RpcError::invalid_request("params must be an object"),
            ));
        }
    };

    Ok(RequestEnvelope { id, method, params })
}
