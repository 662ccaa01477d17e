//! Manufacturer lookup by OUI, the first three octets of a MAC address.
//!
//! Tables use the IEEE `oui.csv` layout (`Assignment` and `Organization Name`
//! columns). A short table of common vendors is compiled in; set
//! `appliance.oui_db` to a full download of
//! <https://standards-oui.ieee.org/oui/oui.csv> to cover every vendor.

use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, OnceLock};

use serde::Deserialize;
use tracing::{info, warn};

const BUNDLED: &str = include_str!("../data/oui.csv");

#[derive(Debug, thiserror::Error)]
pub enum OuiError {
    #[error("failed to open OUI table {path}: {source}")]
    Open { path: String, source: csv::Error },
    #[error("malformed OUI table: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Deserialize)]
struct Row {
    #[serde(rename = "Assignment")]
    assignment: String,
    #[serde(rename = "Organization Name")]
    organization: String,
}

/// Vendor names keyed by lowercase six-hex-digit prefix.
#[derive(Debug, Default)]
pub struct OuiTable {
    vendors: HashMap<String, String>,
}

impl OuiTable {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, OuiError> {
        Self::from_csv(csv::Reader::from_reader(reader))
    }

    pub fn load(path: &str) -> Result<Self, OuiError> {
        let reader = csv::Reader::from_path(path).map_err(|source| OuiError::Open {
            path: path.to_string(),
            source,
        })?;
        Self::from_csv(reader)
    }

    fn from_csv<R: Read>(mut reader: csv::Reader<R>) -> Result<Self, OuiError> {
        let mut vendors = HashMap::new();
        for row in reader.deserialize::<Row>() {
            let row = row?;
            let organization = row.organization.trim();
            let digits: String = row
                .assignment
                .chars()
                .filter(char::is_ascii_hexdigit)
                .collect();
            if digits.len() == 6 && !organization.is_empty() {
                vendors.insert(digits.to_ascii_lowercase(), organization.to_string());
            }
        }
        Ok(Self { vendors })
    }

    /// The compiled-in table, parsed on first use.
    pub fn bundled() -> Arc<Self> {
        static TABLE: OnceLock<Arc<OuiTable>> = OnceLock::new();
        TABLE
            .get_or_init(|| match Self::from_reader(BUNDLED.as_bytes()) {
                Ok(table) => Arc::new(table),
                Err(e) => {
                    warn!("bundled OUI table unusable: {e}");
                    Arc::default()
                }
            })
            .clone()
    }

    /// The table at `path`, or the bundled one when no path is configured.
    pub fn resolve(path: Option<&str>) -> Result<Arc<Self>, OuiError> {
        match path.filter(|p| !p.is_empty()) {
            Some(p) => {
                let table = Self::load(p)?;
                info!(path = p, vendors = table.len(), "loaded OUI table");
                Ok(Arc::new(table))
            }
            None => Ok(Self::bundled()),
        }
    }

    /// Vendor registered for the MAC's prefix. Separators and case are ignored.
    pub fn lookup(&self, mac: &str) -> Option<&str> {
        let prefix: String = mac
            .chars()
            .filter(char::is_ascii_hexdigit)
            .take(6)
            .map(|c| c.to_ascii_lowercase())
            .collect();
        if prefix.len() < 6 {
            return None;
        }
        self.vendors.get(&prefix).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vendors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vendors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_table_knows_common_vendors() {
        let table = OuiTable::bundled();
        assert!(!table.is_empty());
        assert_eq!(table.lookup("00:50:56:ab:cd:ef"), Some("VMware, Inc."));
        assert_eq!(table.lookup("B8-27-EB-01-02-03"), Some("Raspberry Pi Foundation"));
        assert_eq!(table.lookup("0800.2712.3456"), Some("PCS Systemtechnik GmbH"));
    }

    #[test]
    fn unknown_or_short_mac_has_no_vendor() {
        let table = OuiTable::bundled();
        assert_eq!(table.lookup("02:00:00:00:00:01"), None);
        assert_eq!(table.lookup("00:50"), None);
        assert_eq!(table.lookup(""), None);
    }

    #[test]
    fn ieee_layout_with_quoted_names() {
        let csv = "Registry,Assignment,Organization Name,Organization Address\n\
                   MA-L,AABBCC,\"Example, Ltd.\",Somewhere\n\
                   MA-L,XYZ,Broken Row,Nowhere\n\
                   MA-L,DDEEFF,  ,Blank Name\n";
        let table = OuiTable::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup("aa:bb:cc:00:00:01"), Some("Example, Ltd."));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = OuiTable::resolve(Some("/nonexistent/oui.csv")).unwrap_err();
        assert!(matches!(err, OuiError::Open { .. }));
        assert!(OuiTable::resolve(None).unwrap().len() >= 10);
    }
}
