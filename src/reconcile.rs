//! Host reconciliation: merges the ARP/NDP neighbor table with DHCP leases
//! into one status row per MAC address.
//!
//! The neighbor table is ground truth for link presence; the lease table is
//! the DHCP server's bookkeeping and may lag or outlive real presence. The
//! effective status is a pure function of `(dhcp_status, arp_present)`:
//!
//! | dhcp_status | arp_present | effective_status | discrepancy |
//! |-------------|-------------|------------------|-------------|
//! | active      | true        | online           | false       |
//! | active      | false       | ghost            | true        |
//! | expired     | true        | online           | true        |
//! | expired     | false       | offline          | false       |
//! | unknown     | true        | online           | false       |
//! | unknown     | false       | unknown          | false       |
//!
//! Everything here is built fresh per call and dropped on return.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::appliance::records::normalize_mac;
use crate::appliance::{LeaseRecord, LeaseState, NeighborRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectiveStatus {
    Online,
    Offline,
    /// Active lease, but nothing on the link.
    Ghost,
    Unknown,
}

/// Derived per-host view. Never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStatus {
    pub ip: String,
    pub mac: String,
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    pub dhcp_status: LeaseState,
    pub arp_present: bool,
    pub effective_status: EffectiveStatus,
    pub discrepancy: bool,
}

/// The decision table.
#[must_use]
pub fn classify(dhcp_status: LeaseState, arp_present: bool) -> (EffectiveStatus, bool) {
    match (dhcp_status, arp_present) {
        (LeaseState::Active, true) => (EffectiveStatus::Online, false),
        (LeaseState::Active, false) => (EffectiveStatus::Ghost, true),
        (LeaseState::Expired, true) => (EffectiveStatus::Online, true),
        (LeaseState::Expired, false) => (EffectiveStatus::Offline, false),
        (LeaseState::Unknown, true) => (EffectiveStatus::Online, false),
        (LeaseState::Unknown, false) => (EffectiveStatus::Unknown, false),
    }
}

/// Everything known about one MAC while merging.
#[derive(Default)]
struct HostEntry<'a> {
    neighbor: Option<&'a NeighborRecord>,
    lease: Option<&'a LeaseRecord>,
    /// Every IP seen for this MAC in either table.
    addresses: Vec<&'a str>,
    neighbor_hostname: Option<&'a str>,
}

type NeighborRank<'a> = (bool, &'a str, &'a str, Option<&'a str>);
type LeaseRank<'a> = (bool, bool, &'a str, Option<&'a str>, Option<&'a str>);

/// IPv4 before IPv6, then lowest address. The remaining fields only break
/// ties, so the pick never depends on input order.
fn neighbor_rank(n: &NeighborRecord) -> NeighborRank<'_> {
    (
        n.ip.contains(':'),
        n.ip.as_str(),
        n.interface.as_str(),
        n.hostname.as_deref(),
    )
}

/// Active leases win, then IPv4, then lowest address, then the remaining
/// fields as tie-breakers.
fn lease_rank(l: &LeaseRecord) -> LeaseRank<'_> {
    (
        l.reported_status != LeaseState::Active,
        l.ip.contains(':'),
        l.ip.as_str(),
        l.hostname.as_deref(),
        l.expires_at.as_deref(),
    )
}

/// Merge both tables into one [`HostStatus`] per MAC.
///
/// `filter` matches hostname, IP, or MAC case-insensitively and exactly;
/// `None`, empty, or `*` returns every host. A filter that matches nothing
/// yields an empty list.
#[must_use]
pub fn reconcile(
    neighbors: &[NeighborRecord],
    leases: &[LeaseRecord],
    filter: Option<&str>,
) -> Vec<HostStatus> {
    let mut index: IndexMap<String, HostEntry<'_>> =
        IndexMap::with_capacity(neighbors.len() + leases.len());

    for n in neighbors {
        let entry = index.entry(normalize_mac(&n.mac)).or_default();
        entry.addresses.push(&n.ip);
        if entry.neighbor.is_none_or(|cur| neighbor_rank(n) < neighbor_rank(cur)) {
            entry.neighbor = Some(n);
        }
        if let Some(h) = n.hostname.as_deref().filter(|h| !h.is_empty()) {
            if entry.neighbor_hostname.is_none_or(|cur| h < cur) {
                entry.neighbor_hostname = Some(h);
            }
        }
    }

    for l in leases {
        let entry = index.entry(normalize_mac(&l.mac)).or_default();
        if !l.ip.is_empty() {
            entry.addresses.push(&l.ip);
        }
        if entry.lease.is_none_or(|cur| lease_rank(l) < lease_rank(cur)) {
            entry.lease = Some(l);
        }
    }

    let matcher = HostFilter::new(filter);
    index
        .into_iter()
        .filter(|(mac, entry)| matcher.matches(mac, entry))
        .map(|(mac, entry)| build_status(mac, &entry))
        .collect()
}

fn build_status(mac: String, entry: &HostEntry<'_>) -> HostStatus {
    let arp_present = entry.neighbor.is_some();
    let dhcp_status = entry.lease.map_or(LeaseState::Unknown, |l| l.reported_status);
    let (effective_status, discrepancy) = classify(dhcp_status, arp_present);

    let ip = entry
        .lease
        .map(|l| l.ip.as_str())
        .filter(|ip| !ip.is_empty())
        .or_else(|| entry.neighbor.map(|n| n.ip.as_str()))
        .unwrap_or_default()
        .to_string();
    let hostname = entry
        .lease
        .and_then(|l| l.hostname.as_deref())
        .filter(|h| !h.is_empty())
        .or(entry.neighbor_hostname)
        .unwrap_or_default()
        .to_string();

    HostStatus {
        ip,
        mac,
        hostname,
        interface: entry
            .neighbor
            .map(|n| n.interface.clone())
            .filter(|i| !i.is_empty()),
        dhcp_status,
        arp_present,
        effective_status,
        discrepancy,
    }
}

struct HostFilter {
    needle: Option<String>,
}

impl HostFilter {
    fn new(filter: Option<&str>) -> Self {
        let needle = filter
            .map(str::trim)
            .filter(|f| !f.is_empty() && *f != "*")
            .map(str::to_ascii_lowercase);
        Self { needle }
    }

    fn matches(&self, mac: &str, entry: &HostEntry<'_>) -> bool {
        let Some(needle) = &self.needle else {
            return true;
        };
        if normalize_mac(needle) == mac {
            return true;
        }
        if entry.addresses.iter().any(|ip| ip.eq_ignore_ascii_case(needle)) {
            return true;
        }
        let lease_host = entry.lease.and_then(|l| l.hostname.as_deref());
        [lease_host, entry.neighbor_hostname]
            .into_iter()
            .flatten()
            .any(|h| h.eq_ignore_ascii_case(needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neighbor(ip: &str, mac: &str) -> NeighborRecord {
        NeighborRecord {
            ip: ip.into(),
            mac: mac.into(),
            interface: "igb1".into(),
            hostname: None,
            is_permanent: false,
            manufacturer: None,
        }
    }

    fn lease(ip: &str, mac: &str, status: LeaseState) -> LeaseRecord {
        LeaseRecord {
            ip: ip.into(),
            mac: mac.into(),
            hostname: None,
            reported_status: status,
            expires_at: None,
        }
    }

    fn sorted(mut hosts: Vec<HostStatus>) -> Vec<HostStatus> {
        hosts.sort_by(|a, b| a.mac.cmp(&b.mac));
        hosts
    }

    #[test]
    fn decision_table() {
        let cases = [
            (LeaseState::Active, true, EffectiveStatus::Online, false),
            (LeaseState::Active, false, EffectiveStatus::Ghost, true),
            (LeaseState::Expired, true, EffectiveStatus::Online, true),
            (LeaseState::Expired, false, EffectiveStatus::Offline, false),
            (LeaseState::Unknown, true, EffectiveStatus::Online, false),
            (LeaseState::Unknown, false, EffectiveStatus::Unknown, false),
        ];
        for (dhcp, present, status, discrepancy) in cases {
            let mac = "aa:bb:cc:dd:ee:10";
            let neighbors = if present {
                vec![neighbor("10.0.0.10", mac)]
            } else {
                vec![]
            };
            let leases = match dhcp {
                LeaseState::Unknown => vec![],
                s => vec![lease("10.0.0.10", mac, s)],
            };
            let hosts = reconcile(&neighbors, &leases, None);
            if !present && dhcp == LeaseState::Unknown {
                // No source mentions the MAC at all.
                assert!(hosts.is_empty());
                assert_eq!(classify(dhcp, present), (status, discrepancy));
                continue;
            }
            assert_eq!(hosts.len(), 1, "{dhcp:?}/{present}");
            assert_eq!(hosts[0].dhcp_status, dhcp);
            assert_eq!(hosts[0].arp_present, present);
            assert_eq!(hosts[0].effective_status, status, "{dhcp:?}/{present}");
            assert_eq!(hosts[0].discrepancy, discrepancy, "{dhcp:?}/{present}");
        }
    }

    #[test]
    fn lease_with_unknown_state_and_no_neighbor_is_unknown() {
        let leases = [lease("10.0.0.3", "aa:bb:cc:dd:ee:03", LeaseState::Unknown)];
        let hosts = reconcile(&[], &leases, None);
        assert_eq!(hosts[0].effective_status, EffectiveStatus::Unknown);
        assert!(!hosts[0].discrepancy);
    }

    #[test]
    fn expired_lease_but_present_is_online_with_discrepancy() {
        let hosts = reconcile(
            &[neighbor("10.0.0.5", "AA:BB:CC:DD:EE:01")],
            &[lease("10.0.0.5", "AA:BB:CC:DD:EE:01", LeaseState::Expired)],
            None,
        );
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].effective_status, EffectiveStatus::Online);
        assert!(hosts[0].discrepancy);
        assert_eq!(hosts[0].mac, "aa:bb:cc:dd:ee:01");
    }

    #[test]
    fn active_lease_without_neighbor_is_ghost() {
        let hosts = reconcile(&[], &[lease("", "AA:BB:CC:DD:EE:02", LeaseState::Active)], None);
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].effective_status, EffectiveStatus::Ghost);
        assert!(hosts[0].discrepancy);
    }

    #[test]
    fn mac_keys_are_case_and_separator_insensitive() {
        let hosts = reconcile(
            &[neighbor("10.0.0.8", "aa-bb-cc-dd-ee-08")],
            &[lease("10.0.0.8", "AA:BB:CC:DD:EE:08", LeaseState::Active)],
            None,
        );
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].effective_status, EffectiveStatus::Online);
    }

    #[test]
    fn lease_ip_and_hostname_are_preferred() {
        let mut n = neighbor("10.0.0.99", "aa:bb:cc:dd:ee:04");
        n.hostname = Some("from-arp".into());
        let mut l = lease("10.0.0.4", "aa:bb:cc:dd:ee:04", LeaseState::Active);
        l.hostname = Some("from-dhcp".into());

        let hosts = reconcile(&[n.clone()], &[l], None);
        assert_eq!(hosts[0].ip, "10.0.0.4");
        assert_eq!(hosts[0].hostname, "from-dhcp");

        // Without a lease the neighbor supplies both.
        let hosts = reconcile(&[n], &[], None);
        assert_eq!(hosts[0].ip, "10.0.0.99");
        assert_eq!(hosts[0].hostname, "from-arp");
    }

    #[test]
    fn hostname_empty_when_no_source_has_one() {
        let hosts = reconcile(&[neighbor("10.0.0.6", "aa:bb:cc:dd:ee:06")], &[], None);
        assert_eq!(hosts[0].hostname, "");
    }

    #[test]
    fn tied_rows_pick_the_same_representative_in_any_order() {
        let mac = "aa:bb:cc:dd:ee:30";
        let mut n_alpha = neighbor("10.0.0.30", mac);
        n_alpha.interface = "igb0".into();
        n_alpha.hostname = Some("alpha".into());
        let mut n_beta = neighbor("10.0.0.30", mac);
        n_beta.interface = "igb1".into();
        n_beta.hostname = Some("beta".into());

        let mut l_alpha = lease("10.0.0.30", mac, LeaseState::Active);
        l_alpha.hostname = Some("alpha".into());
        l_alpha.expires_at = Some("2026-01-02 00:00:00".into());
        let mut l_beta = lease("10.0.0.30", mac, LeaseState::Active);
        l_beta.hostname = Some("beta".into());
        l_beta.expires_at = Some("2026-01-01 00:00:00".into());

        let forward = reconcile(
            &[n_alpha.clone(), n_beta.clone()],
            &[l_alpha.clone(), l_beta.clone()],
            None,
        );
        let backward = reconcile(&[n_beta, n_alpha], &[l_beta, l_alpha], None);
        assert_eq!(forward, backward);
        assert_eq!(forward[0].hostname, "alpha");
        assert_eq!(forward[0].interface.as_deref(), Some("igb0"));
    }

    #[test]
    fn order_independent() {
        let mut n2 = neighbor("fe80::2", "aa:bb:cc:dd:ee:02");
        n2.hostname = Some("printer".into());
        let neighbors = vec![
            neighbor("10.0.0.1", "aa:bb:cc:dd:ee:01"),
            neighbor("10.0.0.2", "aa:bb:cc:dd:ee:02"),
            n2,
            neighbor("10.0.0.9", "aa:bb:cc:dd:ee:09"),
        ];
        let leases = vec![
            lease("10.0.0.1", "aa:bb:cc:dd:ee:01", LeaseState::Expired),
            lease("10.0.0.2", "aa:bb:cc:dd:ee:02", LeaseState::Active),
            lease("10.0.0.20", "aa:bb:cc:dd:ee:02", LeaseState::Expired),
            lease("10.0.0.3", "aa:bb:cc:dd:ee:03", LeaseState::Active),
        ];
        let forward = sorted(reconcile(&neighbors, &leases, None));

        let mut rn = neighbors.clone();
        rn.reverse();
        let mut rl = leases.clone();
        rl.rotate_left(1);
        let permuted = sorted(reconcile(&rn, &rl, None));

        assert_eq!(forward, permuted);
        assert_eq!(forward, sorted(reconcile(&neighbors, &leases, None)));
        assert_eq!(forward.len(), 4);
        let dual = forward.iter().find(|h| h.mac == "aa:bb:cc:dd:ee:02").unwrap();
        assert_eq!(dual.ip, "10.0.0.2");
        assert_eq!(dual.dhcp_status, LeaseState::Active);
    }

    #[test]
    fn wildcard_returns_everything() {
        let neighbors = vec![
            neighbor("10.0.0.1", "aa:bb:cc:dd:ee:01"),
            neighbor("10.0.0.2", "aa:bb:cc:dd:ee:02"),
        ];
        assert_eq!(reconcile(&neighbors, &[], Some("*")).len(), 2);
        assert_eq!(reconcile(&neighbors, &[], Some("")).len(), 2);
    }

    #[test]
    fn non_matching_filter_is_empty_not_error() {
        let neighbors = vec![neighbor("10.0.0.1", "aa:bb:cc:dd:ee:01")];
        assert!(reconcile(&neighbors, &[], Some("nas")).is_empty());
    }

    #[test]
    fn filter_matches_ip_mac_and_hostname() {
        let mut l = lease("10.0.0.7", "aa:bb:cc:dd:ee:07", LeaseState::Active);
        l.hostname = Some("NAS".into());
        let neighbors = vec![
            neighbor("10.0.0.7", "aa:bb:cc:dd:ee:07"),
            neighbor("10.0.0.8", "aa:bb:cc:dd:ee:08"),
        ];
        let leases = vec![l];

        let by_host = reconcile(&neighbors, &leases, Some("nas"));
        assert_eq!(by_host.len(), 1);
        assert_eq!(by_host[0].mac, "aa:bb:cc:dd:ee:07");

        let by_mac = reconcile(&neighbors, &leases, Some("AA:BB:CC:DD:EE:08"));
        assert_eq!(by_mac.len(), 1);
        assert_eq!(by_mac[0].ip, "10.0.0.8");

        let by_ip = reconcile(&neighbors, &leases, Some("10.0.0.7"));
        assert_eq!(by_ip.len(), 1);
        assert_eq!(by_ip[0].hostname, "NAS");
    }
}
