//! HTTP client for the OPNsense REST API.
//!
//! [`ApplianceClient`] wraps `reqwest::Client` and implements [`Appliance`]
//! with one method per resource. Every request carries HTTP Basic
//! credentials (API key / secret) and is bounded by the configured connect
//! and request timeouts.
//!
//! ## Error handling
//!
//! Non-2xx responses are parsed for a `message` or `error` field in the JSON
//! body; if that fails the raw body is used. OPNsense also reports failures
//! inside 200 responses as `{"result": "failed"}`, which is surfaced as
//! [`UpstreamError::Rejected`].

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use uuid::Uuid;

use super::records::{
    parse_lldp, FirewallRule, LeaseRecord, LldpNeighbor, LogEntry, NeighborRecord, RuleSpec,
};
use super::{Appliance, UpstreamError};
use crate::config::ApplianceConfig;

const ARP: &str = "/api/diagnostics/interface/get_arp";
const NDP: &str = "/api/diagnostics/interface/get_ndp";
const DHCPV4_LEASES: &str = "/api/dhcpv4/leases/search_lease";
const DHCPV6_LEASES: &str = "/api/dhcpv6/leases/search_lease";
const LLDP_NEIGHBORS: &str = "/api/lldpd/service/neighbor";
const SYSTEM_STATUS: &str = "/api/core/system/status";
const FIREWALL_LOG: &str = "/api/diagnostics/firewall/log";
const SEARCH_RULES: &str = "/api/firewall/filter/search_rule";
const ADD_RULE: &str = "/api/firewall/filter/add_rule";
const DEL_RULE: &str = "/api/firewall/filter/del_rule";
const SAVEPOINT: &str = "/api/firewall/filter/savepoint";
const APPLY: &str = "/api/firewall/filter/apply";
const INTERFACE_NAMES: &str = "/api/diagnostics/interface/get_interface_names";

/// HTTP client for a single OPNsense appliance.
pub struct ApplianceClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl ApplianceClient {
    pub fn new(config: &ApplianceConfig) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.verify_tls)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        // Accept a bare host name as well as a full URL
        let trimmed = config.url.trim_end_matches('/');
        let base_url = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        };

        Ok(Self {
            http,
            base_url,
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
        })
    }

    /// The appliance base URL (without trailing slash).
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(&self, path: &str) -> Result<Value, UpstreamError> {
        debug!(path, "GET appliance");
        let resp = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .send()
            .await?;
        Self::handle_response(resp).await
    }

    async fn post(&self, path: &str, body: Option<&Value>) -> Result<Value, UpstreamError> {
        debug!(path, "POST appliance");
        let mut req = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .basic_auth(&self.api_key, Some(&self.api_secret));
        req = match body {
            Some(b) => req.json(b),
            None => req.json(&serde_json::json!({})),
        };
        Self::handle_response(req.send().await?).await
    }

    async fn handle_response(resp: reqwest::Response) -> Result<Value, UpstreamError> {
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| {
                    v.get("message")
                        .or_else(|| v.get("error"))
                        .and_then(Value::as_str)
                        .map(String::from)
                })
                .unwrap_or(body);
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| UpstreamError::Protocol(format!("invalid JSON: {e}")))?;
        if value.get("result").and_then(Value::as_str) == Some("failed") {
            let message = value
                .get("validations")
                .map(Value::to_string)
                .or_else(|| value.get("message").and_then(Value::as_str).map(String::from))
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(UpstreamError::Rejected(message));
        }
        Ok(value)
    }
}

/// Rows from either a bare array or a `{"rows": [...]}` search result.
fn rows(value: Value, what: &str) -> Vec<Value> {
    match value {
        Value::Array(a) => a,
        Value::Object(mut o) => match o.remove("rows") {
            Some(Value::Array(a)) => a,
            _ => {
                warn!("unexpected {what} response shape, treating as empty");
                Vec::new()
            }
        },
        _ => {
            warn!("unexpected {what} response shape, treating as empty");
            Vec::new()
        }
    }
}

#[async_trait]
impl Appliance for ApplianceClient {
    async fn neighbors(&self) -> Result<Vec<NeighborRecord>, UpstreamError> {
        let (arp, ndp) = tokio::try_join!(self.get(ARP), self.get(NDP))?;
        Ok(rows(arp, "ARP")
            .iter()
            .chain(rows(ndp, "NDP").iter())
            .filter_map(NeighborRecord::from_row)
            .collect())
    }

    async fn leases(&self) -> Result<Vec<LeaseRecord>, UpstreamError> {
        let v4 = self.get(DHCPV4_LEASES).await?;
        // DHCPv6 is frequently not enabled; its endpoint then 404s.
        let v6 = match self.get(DHCPV6_LEASES).await {
            Ok(v) => v,
            Err(UpstreamError::Status { status: 404, .. }) => {
                debug!("DHCPv6 lease endpoint not present");
                Value::Array(Vec::new())
            }
            Err(e) => return Err(e),
        };
        Ok(rows(v4, "DHCPv4")
            .iter()
            .chain(rows(v6, "DHCPv6").iter())
            .filter_map(LeaseRecord::from_row)
            .collect())
    }

    async fn lldp_neighbors(&self) -> Result<Vec<LldpNeighbor>, UpstreamError> {
        let value = self.get(LLDP_NEIGHBORS).await?;
        let text = value
            .get("response")
            .and_then(Value::as_str)
            .ok_or_else(|| UpstreamError::Protocol("LLDP response missing 'response'".into()))?;
        Ok(parse_lldp(text))
    }

    async fn system_status(&self) -> Result<Value, UpstreamError> {
        self.get(SYSTEM_STATUS).await
    }

    async fn firewall_logs(&self, limit: u32) -> Result<Vec<LogEntry>, UpstreamError> {
        let value = self.get(&format!("{FIREWALL_LOG}?limit={limit}")).await?;
        let all = rows(value, "firewall log");
        let total = all.len();
        let entries: Vec<LogEntry> = all.iter().filter_map(LogEntry::from_row).collect();
        if entries.len() < total {
            debug!(skipped = total - entries.len(), "unparseable firewall log rows");
        }
        Ok(entries)
    }

    async fn firewall_rules(&self) -> Result<Vec<FirewallRule>, UpstreamError> {
        let value = self.get(SEARCH_RULES).await?;
        let mut rules: Vec<FirewallRule> = rows(value, "firewall rules")
            .iter()
            .filter_map(FirewallRule::from_row)
            .collect();
        rules.sort_by_key(|r| r.sequence);
        Ok(rules)
    }

    async fn add_rule(&self, rule: &RuleSpec) -> Result<String, UpstreamError> {
        let resp = self.post(ADD_RULE, Some(&rule.to_api_body())).await?;
        resp.get("uuid")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| UpstreamError::Protocol(format!("add_rule returned no uuid: {resp}")))
    }

    async fn delete_rule(&self, uuid: Uuid) -> Result<(), UpstreamError> {
        let resp = self.post(&del_rule_path(uuid), None).await?;
        match resp.get("result").and_then(Value::as_str) {
            Some("deleted") => Ok(()),
            _ => Err(UpstreamError::Rejected(format!("rule {uuid} not deleted: {resp}"))),
        }
    }

    async fn apply_changes(&self) -> Result<String, UpstreamError> {
        let savepoint = self.post(SAVEPOINT, None).await?;
        let revision = savepoint
            .get("revision")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| UpstreamError::Protocol("savepoint returned no revision".into()))?;

        let applied = self.post(&format!("{APPLY}/{revision}"), None).await?;
        let status = applied
            .get("status")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_ascii_lowercase());
        if status.as_deref() == Some("ok") {
            Ok(revision)
        } else {
            Err(UpstreamError::Rejected(format!("apply failed: {applied}")))
        }
    }

    async fn interface_names(&self) -> Result<BTreeMap<String, String>, UpstreamError> {
        let value = self.get(INTERFACE_NAMES).await?;
        let Value::Object(map) = value else {
            return Err(UpstreamError::Protocol("interface names is not an object".into()));
        };
        Ok(map
            .into_iter()
            .map(|(k, v)| {
                let desc = v.as_str().map_or_else(|| v.to_string(), String::from);
                (k, desc)
            })
            .collect())
    }
}

/// The rule id is the only caller-supplied path segment; its hyphenated
/// form contains nothing that needs escaping.
fn del_rule_path(uuid: Uuid) -> String {
    format!("{DEL_RULE}/{}", uuid.hyphenated())
}
