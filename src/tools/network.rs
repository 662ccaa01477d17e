//! Read-only network state tools.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Value};
use tracing::debug;

use super::{str_arg, to_value, Args};
use crate::appliance::records::normalize_mac;
use crate::appliance::Appliance;
use crate::error::ToolError;
use crate::oui::OuiTable;
use crate::reconcile::{reconcile, EffectiveStatus, HostStatus};

pub async fn system(appliance: &dyn Appliance) -> Result<Value, ToolError> {
    Ok(appliance.system_status().await?)
}

/// Neighbor table entries, each annotated with the reconciled status of its
/// MAC and, when the appliance did not name one, the vendor from `oui`.
pub async fn arp(
    appliance: &dyn Appliance,
    oui: &OuiTable,
    args: &Args,
) -> Result<Value, ToolError> {
    let (neighbors, leases) = tokio::try_join!(appliance.neighbors(), appliance.leases())?;

    let hosts = reconcile(&neighbors, &leases, str_arg(args, "search"));
    let by_mac: HashMap<&str, &HostStatus> = hosts.iter().map(|h| (h.mac.as_str(), h)).collect();
    let mac_filter = str_arg(args, "mac").map(normalize_mac);
    let ip_filter = str_arg(args, "ip");

    let mut entries = Vec::new();
    for n in &neighbors {
        let Some(host) = by_mac.get(n.mac.as_str()) else {
            continue;
        };
        if mac_filter.as_deref().is_some_and(|m| m != n.mac) {
            continue;
        }
        if ip_filter.is_some_and(|ip| !ip.eq_ignore_ascii_case(&n.ip)) {
            continue;
        }
        let mut entry = to_value(n)?;
        entry["dhcp_status"] = to_value(&host.dhcp_status)?;
        entry["effective_status"] = to_value(&host.effective_status)?;
        if n.hostname.is_none() && !host.hostname.is_empty() {
            entry["hostname"] = Value::String(host.hostname.clone());
        }
        if n.manufacturer.as_deref().is_none_or(str::is_empty) {
            if let Some(vendor) = oui.lookup(&n.mac) {
                entry["manufacturer"] = Value::String(vendor.to_string());
            }
        }
        entries.push(entry);
    }
    debug!(total = neighbors.len(), matched = entries.len(), "arp");

    Ok(json!({ "count": entries.len(), "entries": entries }))
}

/// Raw leases plus the reconciled view of the same hosts.
pub async fn dhcp(appliance: &dyn Appliance, args: &Args) -> Result<Value, ToolError> {
    let (neighbors, leases) = tokio::try_join!(appliance.neighbors(), appliance.leases())?;

    let hosts = reconcile(&neighbors, &leases, str_arg(args, "search"));
    let macs: HashSet<&str> = hosts.iter().map(|h| h.mac.as_str()).collect();
    let matching: Vec<_> = leases.iter().filter(|l| macs.contains(l.mac.as_str())).collect();

    Ok(json!({
        "leases": to_value(&matching)?,
        "hosts": to_value(&hosts)?,
        "summary": summarize(&hosts),
    }))
}

pub async fn hosts(appliance: &dyn Appliance, args: &Args) -> Result<Value, ToolError> {
    let (neighbors, leases) = tokio::try_join!(appliance.neighbors(), appliance.leases())?;
    let hosts = reconcile(&neighbors, &leases, str_arg(args, "search"));
    Ok(json!({
        "hosts": to_value(&hosts)?,
        "summary": summarize(&hosts),
    }))
}

fn summarize(hosts: &[HostStatus]) -> Value {
    let count = |s: EffectiveStatus| hosts.iter().filter(|h| h.effective_status == s).count();
    json!({
        "total": hosts.len(),
        "online": count(EffectiveStatus::Online),
        "offline": count(EffectiveStatus::Offline),
        "ghost": count(EffectiveStatus::Ghost),
        "unknown": count(EffectiveStatus::Unknown),
        "discrepancies": hosts.iter().filter(|h| h.discrepancy).count(),
    })
}

pub async fn lldp(appliance: &dyn Appliance) -> Result<Value, ToolError> {
    let neighbors = appliance.lldp_neighbors().await?;
    Ok(json!({ "count": neighbors.len(), "neighbors": to_value(&neighbors)? }))
}

pub async fn interface_list(appliance: &dyn Appliance) -> Result<Value, ToolError> {
    to_value(&appliance.interface_names().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appliance::{LeaseRecord, LeaseState, NeighborRecord};
    use crate::tools::fake::FakeAppliance;

    fn args(v: Value) -> Args {
        v.as_object().cloned().unwrap_or_default()
    }

    fn fixture() -> FakeAppliance {
        let neighbor = |ip: &str, mac: &str| NeighborRecord {
            ip: ip.into(),
            mac: mac.into(),
            interface: "igb1".into(),
            hostname: None,
            is_permanent: false,
            manufacturer: None,
        };
        FakeAppliance {
            neighbors: vec![
                neighbor("10.0.0.5", "aa:bb:cc:dd:ee:01"),
                neighbor("10.0.0.6", "aa:bb:cc:dd:ee:03"),
            ],
            leases: vec![
                LeaseRecord {
                    ip: "10.0.0.5".into(),
                    mac: "aa:bb:cc:dd:ee:01".into(),
                    hostname: Some("laptop".into()),
                    reported_status: LeaseState::Expired,
                    expires_at: None,
                },
                LeaseRecord {
                    ip: "10.0.0.7".into(),
                    mac: "aa:bb:cc:dd:ee:02".into(),
                    hostname: Some("phone".into()),
                    reported_status: LeaseState::Active,
                    expires_at: None,
                },
            ],
            ..FakeAppliance::default()
        }
    }

    #[tokio::test]
    async fn hosts_reports_ghosts_and_discrepancies() {
        let out = hosts(&fixture(), &Args::new()).await.unwrap();
        assert_eq!(out["summary"]["total"], 3);
        assert_eq!(out["summary"]["ghost"], 1);
        assert_eq!(out["summary"]["discrepancies"], 2);
    }

    #[tokio::test]
    async fn arp_annotates_with_reconciled_status() {
        let out = arp(&fixture(), &OuiTable::default(), &args(json!({"search": "LAPTOP"})))
            .await
            .unwrap();
        assert_eq!(out["count"], 1);
        let entry = &out["entries"][0];
        assert_eq!(entry["ip"], "10.0.0.5");
        assert_eq!(entry["dhcp_status"], "expired");
        assert_eq!(entry["effective_status"], "online");
        assert_eq!(entry["hostname"], "laptop");
    }

    #[tokio::test]
    async fn arp_exact_mac_filter() {
        let filter = args(json!({"mac": "AA-BB-CC-DD-EE-03"}));
        let out = arp(&fixture(), &OuiTable::default(), &filter).await.unwrap();
        assert_eq!(out["count"], 1);
        assert_eq!(out["entries"][0]["dhcp_status"], "unknown");
    }

    #[tokio::test]
    async fn arp_names_the_vendor_from_the_mac_prefix() {
        let mut fake = fixture();
        fake.neighbors[0].mac = "00:50:56:aa:bb:01".into();
        fake.neighbors[1].manufacturer = Some("Reported By Appliance".into());

        let out = arp(&fake, &OuiTable::bundled(), &Args::new()).await.unwrap();
        assert_eq!(out["entries"][0]["manufacturer"], "VMware, Inc.");
        assert_eq!(out["entries"][1]["manufacturer"], "Reported By Appliance");
    }

    #[tokio::test]
    async fn dhcp_filters_leases_with_the_same_search() {
        let out = dhcp(&fixture(), &args(json!({"search": "phone"}))).await.unwrap();
        assert_eq!(out["leases"].as_array().unwrap().len(), 1);
        assert_eq!(out["hosts"][0]["effective_status"], "ghost");

        let none = dhcp(&fixture(), &args(json!({"search": "nas"}))).await.unwrap();
        assert!(none["hosts"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn interface_list_is_a_map() {
        let out = interface_list(&fixture()).await.unwrap();
        assert_eq!(out["igb1"], "LAN");
    }
}
