//! Error taxonomy shared by the dispatcher and both transports.
//!
//! Every failure that reaches a peer is an [`RpcError`] carried inside a
//! response envelope. Handler-level failures are raised as [`ToolError`] and
//! converted at the dispatcher boundary; nothing crosses a transport
//! unconverted.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::appliance::UpstreamError;

/// Fixed set of error kinds a response envelope may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    UpstreamUnavailable,
    Unauthorized,
}

impl ErrorCode {
    /// Integer code used on the wire.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::UpstreamUnavailable => -32001,
            Self::Unauthorized => -32002,
        }
    }

    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            -32700 => Some(Self::ParseError),
            -32600 => Some(Self::InvalidRequest),
            -32601 => Some(Self::MethodNotFound),
            -32602 => Some(Self::InvalidParams),
            -32603 => Some(Self::InternalError),
            -32001 => Some(Self::UpstreamUnavailable),
            -32002 => Some(Self::Unauthorized),
            _ => None,
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i64::deserialize(deserializer)?;
        Self::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown error code {code}")))
    }
}

/// The `error` member of a response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(detail: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::ParseError, format!("Parse error: {detail}"))
    }

    pub fn invalid_request(detail: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::InvalidRequest, format!("Invalid request: {detail}"))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("Method not found: {method}"),
        )
    }

    /// InvalidParams naming the offending field and the type it should have.
    pub fn invalid_params(field: &str, expected: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
            .with_data(json!({ "field": field, "expected": expected }))
    }

    /// Uniform credential failure. Never says why the token was rejected.
    #[must_use]
    pub fn unauthorized() -> Self {
        Self::new(ErrorCode::Unauthorized, "Unauthorized")
    }
}

/// Failure raised by a tool handler.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// An argument passed schema validation but violates a tool-level rule.
    #[error("invalid value for '{field}': {message}")]
    InvalidParams {
        field: String,
        expected: String,
        message: String,
    },
    /// The appliance could not be reached or answered unusably.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    /// Anything else that went wrong inside the handler.
    #[error("{0}")]
    Internal(String),
}

impl From<ToolError> for RpcError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::InvalidParams {
                field,
                expected,
                message,
            } => RpcError::invalid_params(&field, &expected, message),
            ToolError::Upstream(e) => RpcError::new(
                ErrorCode::UpstreamUnavailable,
                format!("Appliance unavailable: {e}"),
            ),
            ToolError::Internal(msg) => {
                RpcError::new(ErrorCode::InternalError, format!("Internal error: {msg}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_integers() {
        for code in [
            ErrorCode::ParseError,
            ErrorCode::InvalidRequest,
            ErrorCode::MethodNotFound,
            ErrorCode::InvalidParams,
            ErrorCode::InternalError,
            ErrorCode::UpstreamUnavailable,
            ErrorCode::Unauthorized,
        ] {
            assert_eq!(ErrorCode::from_code(code.code()), Some(code));
        }
        assert_eq!(ErrorCode::from_code(0), None);
    }

    #[test]
    fn invalid_params_carries_field_and_type() {
        let err = RpcError::invalid_params("limit", "integer", "bad limit");
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["code"], -32602);
        assert_eq!(v["data"]["field"], "limit");
        assert_eq!(v["data"]["expected"], "integer");
    }

    #[test]
    fn upstream_tool_error_maps_to_upstream_code() {
        let err: RpcError = ToolError::Upstream(UpstreamError::Timeout).into();
        assert_eq!(err.code, ErrorCode::UpstreamUnavailable);
    }
}
