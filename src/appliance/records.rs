//! Normalized records returned by the appliance adapters.
//!
//! OPNsense rows are loosely typed (numbers as strings, renamed keys between
//! plugin versions). Each `from_row` constructor accepts the known spellings
//! and returns `None` for rows that lack the identity fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One ARP (IPv4) or NDP (IPv6) neighbor cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborRecord {
    pub ip: String,
    pub mac: String,
    pub interface: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default)]
    pub is_permanent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
}

impl NeighborRecord {
    pub fn from_row(row: &Value) -> Option<Self> {
        let ip = str_field(row, &["ip", "address"])?;
        let mac = normalize_mac(&str_field(row, &["mac"])?);
        if mac.is_empty() {
            return None;
        }
        Some(Self {
            ip,
            mac,
            interface: str_field(row, &["intf", "interface"]).unwrap_or_default(),
            hostname: str_field(row, &["hostname"]),
            is_permanent: bool_field(row, &["permanent"]).unwrap_or(false),
            manufacturer: str_field(row, &["manufacturer"]),
        })
    }
}

/// DHCP server's view of a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseState {
    Active,
    Expired,
    Unknown,
}

impl LeaseState {
    fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "active" | "online" | "static" => Self::Active,
            "expired" | "free" | "released" | "offline" | "abandoned" => Self::Expired,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub ip: String,
    pub mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub reported_status: LeaseState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

impl LeaseRecord {
    pub fn from_row(row: &Value) -> Option<Self> {
        let mac = normalize_mac(&str_field(row, &["mac", "hwaddr"])?);
        if mac.is_empty() {
            return None;
        }
        let reported_status = match str_field(row, &["state", "status"]) {
            Some(label) => LeaseState::from_label(&label),
            None => match bool_field(row, &["online"]) {
                Some(true) => LeaseState::Active,
                Some(false) => LeaseState::Expired,
                None => LeaseState::Unknown,
            },
        };
        Some(Self {
            ip: str_field(row, &["address", "ip"]).unwrap_or_default(),
            mac,
            hostname: str_field(row, &["hostname", "client-hostname"]),
            reported_status,
            expires_at: str_field(row, &["ends", "end"]),
        })
    }
}

/// A neighbor announced over LLDP.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LldpNeighbor {
    pub interface: String,
    pub chassis_id: String,
    pub port_id: String,
    pub system_name: String,
    pub system_description: String,
    pub port_description: String,
    pub capabilities: String,
    pub management_address: String,
}

/// Parse `lldpctl` text output into neighbor records.
///
/// Blocks start with `Interface:`; only capabilities marked `on` are kept.
pub fn parse_lldp(text: &str) -> Vec<LldpNeighbor> {
    let mut neighbors = Vec::new();
    for block in text.split("Interface:").skip(1) {
        let block = block.trim();
        if block.is_empty() || block.starts_with('-') {
            continue;
        }
        let mut lines = block.lines();
        let interface = lines
            .next()
            .and_then(|l| l.split(',').next())
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if interface.is_empty() {
            continue;
        }

        let mut n = LldpNeighbor {
            interface,
            ..LldpNeighbor::default()
        };
        let mut caps = Vec::new();
        for line in lines {
            if let Some(v) = after(line, "ChassisID:") {
                n.chassis_id = v.trim_start_matches("mac ").to_string();
            } else if let Some(v) = after(line, "SysName:") {
                n.system_name = v.to_string();
            } else if let Some(v) = after(line, "SysDescr:") {
                n.system_description = v.to_string();
            } else if let Some(v) = after(line, "MgmtIP:") {
                n.management_address = v.to_string();
            } else if let Some(v) = after(line, "PortID:") {
                n.port_id = v.trim_start_matches("ifname ").to_string();
            } else if let Some(v) = after(line, "PortDescr:") {
                n.port_description = v.to_string();
            } else if let Some(v) = after(line, "Capability:") {
                if v.ends_with(", on") {
                    if let Some(cap) = v.split(',').next() {
                        caps.push(cap.trim().to_string());
                    }
                }
            }
        }
        n.capabilities = caps.join(", ");
        neighbors.push(n);
    }
    neighbors
}

fn after<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.split_once(marker).map(|(_, rest)| rest.trim())
}

/// A filter rule as listed by the appliance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub uuid: String,
    pub sequence: u32,
    pub description: String,
    pub interface: String,
    pub action: String,
    pub protocol: String,
    pub source_net: String,
    pub source_port: String,
    pub destination_net: String,
    pub destination_port: String,
    pub enabled: bool,
    pub direction: String,
    pub ipprotocol: String,
    pub gateway: String,
}

impl FirewallRule {
    pub fn from_row(row: &Value) -> Option<Self> {
        let any = || "any".to_string();
        Some(Self {
            uuid: str_field(row, &["uuid", "id"])?,
            sequence: str_field(row, &["sequence"])
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            description: str_field(row, &["description"]).unwrap_or_default(),
            interface: str_field(row, &["interface"]).unwrap_or_default(),
            action: str_field(row, &["action"]).unwrap_or_else(|| "pass".to_string()),
            protocol: str_field(row, &["protocol"]).unwrap_or_else(any),
            source_net: str_field(row, &["source_net"]).unwrap_or_else(any),
            source_port: str_field(row, &["source_port"]).unwrap_or_else(any),
            destination_net: str_field(row, &["destination_net"]).unwrap_or_else(any),
            destination_port: str_field(row, &["destination_port"]).unwrap_or_else(any),
            enabled: bool_field(row, &["enabled"]).unwrap_or(true),
            direction: str_field(row, &["direction"]).unwrap_or_else(|| "in".to_string()),
            ipprotocol: str_field(row, &["ipprotocol"]).unwrap_or_else(|| "inet".to_string()),
            gateway: str_field(row, &["gateway"]).unwrap_or_default(),
        })
    }
}

/// Fields for a new filter rule, already defaulted and checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleSpec {
    pub description: String,
    pub interface: String,
    pub action: String,
    pub protocol: String,
    pub source_net: String,
    pub source_port: String,
    pub destination_net: String,
    pub destination_port: String,
    pub direction: String,
    pub ipprotocol: String,
    pub enabled: bool,
    pub gateway: String,
}

impl RuleSpec {
    /// Body for `add_rule`. Ports and gateway are omitted when left at default.
    #[must_use]
    pub fn to_api_body(&self) -> Value {
        let mut rule = serde_json::json!({
            "description": self.description,
            "interface": self.interface,
            "action": self.action,
            "protocol": self.protocol.to_ascii_uppercase(),
            "source_net": self.source_net,
            "destination_net": self.destination_net,
            "enabled": if self.enabled { "1" } else { "0" },
            "direction": self.direction,
            "ipprotocol": self.ipprotocol,
        });
        if self.source_port != "any" {
            rule["source_port"] = Value::String(self.source_port.clone());
        }
        if self.destination_port != "any" {
            rule["destination_port"] = Value::String(self.destination_port.clone());
        }
        if !self.gateway.is_empty() {
            rule["gateway"] = Value::String(self.gateway.clone());
        }
        serde_json::json!({ "rule": rule })
    }
}

/// One parsed filter log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub interface: String,
    pub action: String,
    pub protocol: String,
    pub src_ip: String,
    pub src_port: Option<u16>,
    pub dst_ip: String,
    pub dst_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl LogEntry {
    pub fn from_row(row: &Value) -> Option<Self> {
        Some(Self {
            timestamp: str_field(row, &["__timestamp__", "timestamp"]).unwrap_or_default(),
            interface: str_field(row, &["interface"]).unwrap_or_default(),
            action: str_field(row, &["action"])?.to_ascii_lowercase(),
            protocol: str_field(row, &["protoname", "protocol"])
                .unwrap_or_default()
                .to_ascii_lowercase(),
            src_ip: str_field(row, &["src", "src_ip"])?,
            src_port: str_field(row, &["srcport", "src_port"]).and_then(|p| p.parse().ok()),
            dst_ip: str_field(row, &["dst", "dst_ip"])?,
            dst_port: str_field(row, &["dstport", "dst_port"]).and_then(|p| p.parse().ok()),
            rule_id: str_field(row, &["rid", "rule_id"]),
            description: str_field(row, &["label", "description"]),
        })
    }
}

/// Lower-case, colon-separated MAC.
#[must_use]
pub fn normalize_mac(mac: &str) -> String {
    mac.trim().to_ascii_lowercase().replace('-', ":")
}

/// First non-empty value among `keys`, stringifying numbers.
fn str_field(row: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match row.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Accepts JSON booleans as well as the appliance's `"1"`/`"0"` strings.
fn bool_field(row: &Value, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|k| match row.get(*k)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    })
}
