//! Transport-agnostic request dispatcher.
//!
//! [`Dispatcher::dispatch`] turns one [`RequestEnvelope`] into at most one
//! [`ResponseEnvelope`]. Both transports call it; neither contains any
//! routing logic of its own.
//!
//! ## Supported methods
//!
//! | Method              | Description                                 |
//! |---------------------|---------------------------------------------|
//! | `initialize`        | Handshake, returns capabilities             |
//! | `ping`              | Liveness check                              |
//! | `tools/list`        | Registered tools in registration order      |
//! | `tools/call`        | Invoke a tool, result as MCP text content   |
//! | *tool name*         | Invoke a tool, result returned verbatim     |
//!
//! Every handler runs on its own task, bounded by the configured timeout.
//! A panic inside a handler surfaces as `InternalError`, an expired timeout
//! as `UpstreamUnavailable`. Notifications (`notifications/*` without an
//! `id`) are never answered; any other envelope without an `id` is an
//! `InvalidRequest` answered with a null id.
//!
//! When a change feed is attached, every successful rule change is also
//! published there as a [`RULES_CHANGED`] notification.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::appliance::Appliance;
use crate::config::DispatchConfig;
use crate::error::{ErrorCode, RpcError};
use crate::oui::OuiTable;
use crate::protocol::{parse_envelope, envelope_from_value, RequestEnvelope, ResponseEnvelope};
use crate::tools::{self, ToolDescriptor, ToolRegistry};

pub const SERVER_NAME: &str = "opnsense-mcp";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
/// Offered when the client does not state a protocol version.
pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const RULES_CHANGED: &str = "notifications/rules/changed";

pub struct Dispatcher {
    registry: ToolRegistry,
    appliance: Arc<dyn Appliance>,
    oui: Arc<OuiTable>,
    reject_unknown_params: bool,
    handler_timeout: Duration,
    changes: Option<mpsc::Sender<Value>>,
}

/// Aborts the spawned handler when the caller stops waiting for it.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Dispatcher {
    pub fn new(
        registry: ToolRegistry,
        appliance: Arc<dyn Appliance>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            registry,
            appliance,
            oui: OuiTable::bundled(),
            reject_unknown_params: config.reject_unknown_params,
            handler_timeout: Duration::from_secs(config.handler_timeout_secs),
            changes: None,
        }
    }

    #[must_use]
    pub fn with_oui_table(mut self, oui: Arc<OuiTable>) -> Self {
        self.oui = oui;
        self
    }

    /// Publish rule changes on `feed`. A full feed drops the notification.
    #[must_use]
    pub fn with_change_feed(mut self, feed: mpsc::Sender<Value>) -> Self {
        self.changes = Some(feed);
        self
    }

    #[must_use]
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Parse and dispatch one raw frame.
    pub async fn dispatch_str(&self, raw: &str) -> Option<ResponseEnvelope> {
        match parse_envelope(raw) {
            Ok(request) => self.dispatch(request).await,
            Err(response) => Some(response),
        }
    }

    /// Dispatch an already decoded JSON body.
    pub async fn dispatch_value(&self, value: Value) -> Option<ResponseEnvelope> {
        match envelope_from_value(value) {
            Ok(request) => self.dispatch(request).await,
            Err(response) => Some(response),
        }
    }

    pub async fn dispatch(&self, request: RequestEnvelope) -> Option<ResponseEnvelope> {
        if request.is_notification() {
            debug!(method = %request.method, "notification received");
            return None;
        }
        let Some(id) = request.id else {
            warn!(method = %request.method, "request without id rejected");
            return Some(ResponseEnvelope::failure(
                Value::Null,
                RpcError::invalid_request("id is required for non-notification methods"),
            ));
        };

        let started = Instant::now();
        let outcome = match request.method.as_str() {
            "initialize" => Ok(Self::initialize(&request.params)),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.tools_list()),
            "tools/call" => self.tools_call(&request.params).await,
            method => match self.registry.resolve(method) {
                Ok(tool) => self.call_tool(tool, &request.params).await,
                Err(e) => Err(e),
            },
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        Some(match outcome {
            Ok(result) => {
                debug!(method = %request.method, elapsed_ms, "request completed");
                ResponseEnvelope::success(id, result)
            }
            Err(error) => {
                warn!(
                    method = %request.method,
                    code = error.code.code(),
                    message = %error.message,
                    elapsed_ms,
                    "request failed"
                );
                ResponseEnvelope::failure(id, error)
            }
        })
    }

    fn initialize(params: &Map<String, Value>) -> Value {
        let version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty() && *v != "undefined")
            .unwrap_or(PROTOCOL_VERSION);
        json!({
            "protocolVersion": version,
            "capabilities": {
                "tools": { "listChanged": false }
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": SERVER_VERSION
            }
        })
    }

    fn tools_list(&self) -> Value {
        let tools: Vec<Value> = self.registry.list().map(ToolDescriptor::to_json).collect();
        json!({ "tools": tools })
    }

    async fn tools_call(&self, params: &Map<String, Value>) -> Result<Value, RpcError> {
        let name = params.get("name").and_then(Value::as_str).ok_or_else(|| {
            RpcError::invalid_params("name", "string", "tools/call requires a tool 'name'")
        })?;
        let empty = Map::new();
        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => &empty,
            Some(Value::Object(args)) => args,
            Some(_) => {
                return Err(RpcError::invalid_params(
                    "arguments",
                    "object",
                    "tool 'arguments' must be an object",
                ))
            }
        };

        let tool = self.registry.resolve(name)?;
        let value = self.call_tool(tool, arguments).await?;
        let text = serde_json::to_string_pretty(&value).unwrap_or_default();
        Ok(json!({
            "content": [{ "type": "text", "text": text }],
            "structuredContent": value,
        }))
    }

    /// Validate, then run the handler on its own task.
    async fn call_tool(
        &self,
        tool: &ToolDescriptor,
        params: &Map<String, Value>,
    ) -> Result<Value, RpcError> {
        let args = tool
            .input_schema
            .validate(params, self.reject_unknown_params)?;

        let kind = tool.kind;
        let appliance = Arc::clone(&self.appliance);
        let oui = Arc::clone(&self.oui);
        let mut task = AbortOnDrop(tokio::spawn(async move {
            tools::invoke(kind, appliance.as_ref(), &oui, &args).await
        }));

        match tokio::time::timeout(self.handler_timeout, &mut task.0).await {
            Ok(Ok(Ok(value))) => {
                info!(tool = tool.name, "tool call succeeded");
                if kind.is_mutating() {
                    self.publish_change(tool.name, &value);
                }
                Ok(value)
            }
            Ok(Ok(Err(e))) => Err(e.into()),
            Ok(Err(join)) if join.is_panic() => {
                warn!(tool = tool.name, "tool handler panicked");
                Err(RpcError::new(
                    ErrorCode::InternalError,
                    format!("Internal error: tool '{}' failed unexpectedly", tool.name),
                ))
            }
            Ok(Err(join)) => Err(RpcError::new(
                ErrorCode::InternalError,
                format!("Internal error: {join}"),
            )),
            Err(_) => Err(RpcError::new(
                ErrorCode::UpstreamUnavailable,
                format!(
                    "Appliance unavailable: tool '{}' timed out after {}s",
                    tool.name,
                    self.handler_timeout.as_secs_f64()
                ),
            )),
        }
    }

    fn publish_change(&self, tool: &str, result: &Value) {
        let Some(feed) = &self.changes else {
            return;
        };
        let notification = json!({
            "jsonrpc": "2.0",
            "method": RULES_CHANGED,
            "params": { "tool": tool, "result": result },
        });
        if let Err(e) = feed.try_send(notification) {
            warn!(tool, error = %e, "rule change not published");
        }
    }
}
