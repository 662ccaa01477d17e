//! Tool definitions and handlers.
//!
//! [`registry`] declares what is callable and with which arguments;
//! [`invoke`] routes a resolved [`ToolKind`] to its handler. Handlers receive
//! arguments that have already passed schema validation.
//!
//! ## Tool categories
//!
//! **Network state** ([`network`]): `system`, `arp`, `dhcp`, `hosts`, `lldp`,
//! `interface_list`
//!
//! **Firewall** ([`firewall`]): `get_logs`, `fw_rules`, `mkfw_rule`, `rmfw_rule`

pub mod firewall;
pub mod network;
pub mod registry;
pub mod schema;

use serde_json::{Map, Value};

pub use registry::{RegistryError, ToolDescriptor, ToolKind, ToolRegistry};
pub use schema::{FieldType, InputSchema};

use crate::appliance::Appliance;
use crate::error::ToolError;
use crate::oui::OuiTable;

/// Validated arguments of one call.
pub type Args = Map<String, Value>;

pub async fn invoke(
    kind: ToolKind,
    appliance: &dyn Appliance,
    oui: &OuiTable,
    args: &Args,
) -> Result<Value, ToolError> {
    match kind {
        ToolKind::System => network::system(appliance).await,
        ToolKind::Arp => network::arp(appliance, oui, args).await,
        ToolKind::Dhcp => network::dhcp(appliance, args).await,
        ToolKind::Hosts => network::hosts(appliance, args).await,
        ToolKind::Lldp => network::lldp(appliance).await,
        ToolKind::InterfaceList => network::interface_list(appliance).await,
        ToolKind::GetLogs => firewall::get_logs(appliance, args).await,
        ToolKind::FwRules => firewall::fw_rules(appliance, args).await,
        ToolKind::MkFwRule => firewall::mkfw_rule(appliance, args).await,
        ToolKind::RmFwRule => firewall::rmfw_rule(appliance, args).await,
    }
}

fn str_arg<'a>(args: &'a Args, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn bool_arg(args: &Args, name: &str) -> Option<bool> {
    args.get(name).and_then(Value::as_bool)
}

fn int_arg(args: &Args, name: &str) -> Option<i64> {
    args.get(name).and_then(Value::as_i64)
}

/// Serialize a handler result. Only fails on non-string map keys, which
/// none of our records have.
fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::Internal(format!("serialize result: {e}")))
}
