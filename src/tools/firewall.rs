//! Firewall log and rule tools.

use std::collections::HashMap;
use std::hash::Hash;

use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::{bool_arg, int_arg, str_arg, to_value, Args};
use crate::appliance::{Appliance, LogEntry, RuleSpec};
use crate::error::ToolError;

/// Log lines fetched when `limit` is not given.
pub const DEFAULT_LOG_LIMIT: u32 = 500;

const TOP_N: usize = 10;

pub async fn get_logs(appliance: &dyn Appliance, args: &Args) -> Result<Value, ToolError> {
    let limit = match int_arg(args, "limit") {
        None => DEFAULT_LOG_LIMIT,
        Some(n) => u32::try_from(n)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| ToolError::InvalidParams {
                field: "limit".into(),
                expected: "positive integer".into(),
                message: format!("limit must be between 1 and {}, got {n}", u32::MAX),
            })?,
    };

    let action = str_arg(args, "action");
    let src_ip = str_arg(args, "src_ip");
    let dst_ip = str_arg(args, "dst_ip");
    let protocol = str_arg(args, "protocol");

    let logs: Vec<LogEntry> = appliance
        .firewall_logs(limit)
        .await?
        .into_iter()
        .filter(|e| action.is_none_or(|a| e.action.eq_ignore_ascii_case(a)))
        .filter(|e| src_ip.is_none_or(|ip| e.src_ip == ip))
        .filter(|e| dst_ip.is_none_or(|ip| e.dst_ip == ip))
        .filter(|e| protocol.is_none_or(|p| e.protocol.eq_ignore_ascii_case(p)))
        .collect();

    Ok(json!({
        "summary": summarize_logs(&logs),
        "logs": to_value(&logs)?,
    }))
}

/// Totals, per-action counts and top talkers over the filtered entries.
fn summarize_logs(logs: &[LogEntry]) -> Value {
    let mut actions: HashMap<&str, usize> = HashMap::new();
    for e in logs {
        *actions.entry(e.action.as_str()).or_default() += 1;
    }

    let time_range = logs
        .iter()
        .map(|e| e.timestamp.as_str())
        .filter(|t| !t.is_empty())
        .fold(None, |range: Option<(&str, &str)>, t| match range {
            None => Some((t, t)),
            Some((lo, hi)) => Some((lo.min(t), hi.max(t))),
        });

    json!({
        "total_entries": logs.len(),
        "action_counts": actions,
        "top_source_ips": top_n(logs.iter().map(|e| e.src_ip.as_str())),
        "top_destination_ips": top_n(logs.iter().map(|e| e.dst_ip.as_str())),
        "top_blocked_ports": top_n(
            logs.iter()
                .filter(|e| e.action == "block")
                .filter_map(|e| e.dst_port)
        ),
        "time_range": time_range.map(|(first, last)| json!({ "first": first, "last": last })),
    })
}

/// `[[key, count], ...]`, most frequent first, ties broken by key.
fn top_n<K>(items: impl Iterator<Item = K>) -> Value
where
    K: Hash + Eq + Ord + serde::Serialize,
{
    let mut counts: HashMap<K, usize> = HashMap::new();
    for k in items {
        *counts.entry(k).or_default() += 1;
    }
    let mut ranked: Vec<(K, usize)> = counts.into_iter().collect();
    ranked.sort_by(|(ka, ca), (kb, cb)| cb.cmp(ca).then_with(|| ka.cmp(kb)));
    ranked.truncate(TOP_N);
    json!(ranked)
}

pub async fn fw_rules(appliance: &dyn Appliance, args: &Args) -> Result<Value, ToolError> {
    let interface = str_arg(args, "interface");
    let action = str_arg(args, "action");
    let protocol = str_arg(args, "protocol");
    let enabled = bool_arg(args, "enabled");

    let rules: Vec<_> = appliance
        .firewall_rules()
        .await?
        .into_iter()
        .filter(|r| {
            interface.is_none_or(|i| r.interface.split(',').any(|ri| ri.eq_ignore_ascii_case(i)))
        })
        .filter(|r| action.is_none_or(|a| r.action.eq_ignore_ascii_case(a)))
        .filter(|r| protocol.is_none_or(|p| r.protocol.eq_ignore_ascii_case(p)))
        .filter(|r| enabled.is_none_or(|en| r.enabled == en))
        .collect();

    Ok(json!({ "count": rules.len(), "rules": to_value(&rules)? }))
}

fn rule_spec(args: &Args) -> Result<RuleSpec, ToolError> {
    let text = |name: &str, default: &str| str_arg(args, name).unwrap_or(default).to_string();
    let lower = |name: &str, default: &str| text(name, default).to_ascii_lowercase();

    let description = str_arg(args, "description")
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .ok_or_else(|| ToolError::InvalidParams {
            field: "description".into(),
            expected: "string".into(),
            message: "description must not be empty".into(),
        })?
        .to_string();

    Ok(RuleSpec {
        description,
        interface: text("interface", "lan"),
        action: lower("action", "pass"),
        protocol: lower("protocol", "any"),
        source_net: text("source_net", "any"),
        source_port: text("source_port", "any"),
        destination_net: text("destination_net", "any"),
        destination_port: text("destination_port", "any"),
        direction: lower("direction", "in"),
        ipprotocol: lower("ipprotocol", "inet"),
        enabled: bool_arg(args, "enabled").unwrap_or(true),
        gateway: text("gateway", ""),
    })
}

pub async fn mkfw_rule(appliance: &dyn Appliance, args: &Args) -> Result<Value, ToolError> {
    let spec = rule_spec(args)?;
    let uuid = appliance.add_rule(&spec).await?;
    info!(%uuid, description = %spec.description, action = %spec.action, "firewall rule created");

    let revision = if bool_arg(args, "apply").unwrap_or(true) {
        Some(appliance.apply_changes().await?)
    } else {
        None
    };

    Ok(json!({
        "uuid": uuid,
        "rule": to_value(&spec)?,
        "applied": revision.is_some(),
        "revision": revision,
    }))
}

pub async fn rmfw_rule(appliance: &dyn Appliance, args: &Args) -> Result<Value, ToolError> {
    let uuid = str_arg(args, "rule_uuid")
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
        .ok_or_else(|| ToolError::InvalidParams {
            field: "rule_uuid".into(),
            expected: "uuid".into(),
            message: "rule_uuid must be a rule UUID as listed by fw_rules".into(),
        })?;
    appliance.delete_rule(uuid).await?;
    info!(%uuid, "firewall rule deleted");

    let revision = if bool_arg(args, "apply").unwrap_or(true) {
        Some(appliance.apply_changes().await?)
    } else {
        None
    };

    Ok(json!({
        "deleted": uuid.hyphenated().to_string(),
        "applied": revision.is_some(),
        "revision": revision,
    }))
}
