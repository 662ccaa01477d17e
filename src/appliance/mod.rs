//! Data source adapters for the OPNsense appliance.
//!
//! [`Appliance`] is the seam between tool handlers and the firewall. The
//! production implementation is [`client::ApplianceClient`]; tests substitute
//! an in-memory fake. Adapters only fetch and normalize; reconciliation of
//! neighbor and lease tables happens in [`crate::reconcile`].

pub mod client;
pub mod records;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

pub use client::ApplianceClient;
pub use records::{
    FirewallRule, LeaseRecord, LeaseState, LldpNeighbor, LogEntry, NeighborRecord, RuleSpec,
};

/// Errors surfaced by an appliance adapter. All of them map to
/// `UpstreamUnavailable` on the wire.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// The request did not complete within its time bound.
    #[error("request to appliance timed out")]
    Timeout,
    /// Connection refused, DNS failure, TLS failure, ...
    #[error("HTTP request failed: {0}")]
    Request(reqwest::Error),
    /// The appliance returned a non-2xx status.
    #[error("appliance returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    /// The body was not the JSON shape we expected.
    #[error("unexpected response from appliance: {0}")]
    Protocol(String),
    /// The appliance understood the request but refused it.
    #[error("appliance rejected the request: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Request(e)
        }
    }
}

/// Per-resource accessors. Each call is an independent fetch; nothing is
/// cached between calls.
#[async_trait]
pub trait Appliance: Send + Sync {
    /// ARP and NDP entries combined.
    async fn neighbors(&self) -> Result<Vec<NeighborRecord>, UpstreamError>;

    /// DHCPv4 and DHCPv6 leases combined.
    async fn leases(&self) -> Result<Vec<LeaseRecord>, UpstreamError>;

    async fn lldp_neighbors(&self) -> Result<Vec<LldpNeighbor>, UpstreamError>;

    /// Raw system status document.
    async fn system_status(&self) -> Result<Value, UpstreamError>;

    /// Most recent filter log lines, at most `limit`.
    async fn firewall_logs(&self, limit: u32) -> Result<Vec<LogEntry>, UpstreamError>;

    async fn firewall_rules(&self) -> Result<Vec<FirewallRule>, UpstreamError>;

    /// Create a rule and return its UUID. Changes are staged until
    /// [`Appliance::apply_changes`].
    async fn add_rule(&self, rule: &RuleSpec) -> Result<String, UpstreamError>;

    async fn delete_rule(&self, uuid: Uuid) -> Result<(), UpstreamError>;

    /// Savepoint + apply; returns the revision.
    async fn apply_changes(&self) -> Result<String, UpstreamError>;

    /// Interface identifier → description.
    async fn interface_names(&self) -> Result<BTreeMap<String, String>, UpstreamError>;
}
