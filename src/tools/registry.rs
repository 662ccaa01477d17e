//! Tool registry: the single source of truth for what is callable.
//!
//! Populated once at startup by [`ToolRegistry::builtin`] and read-only
//! afterwards, so lookups need no locking.

use indexmap::IndexMap;
use serde_json::{json, Value};

use super::schema::{FieldType, InputSchema};
use crate::error::RpcError;

/// Closed set of tools. One variant per registered name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    System,
    Arp,
    Dhcp,
    Hosts,
    Lldp,
    GetLogs,
    FwRules,
    MkFwRule,
    RmFwRule,
    InterfaceList,
}

impl ToolKind {
    /// Tools that change appliance state.
    pub fn is_mutating(self) -> bool {
        matches!(self, Self::MkFwRule | Self::RmFwRule)
    }
}

#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: InputSchema,
    pub kind: ToolKind,
}

impl ToolDescriptor {
    /// Entry for a `tools/list` response.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema.to_json(),
        })
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),
}

#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: IndexMap<&'static str, ToolDescriptor>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<(), RegistryError> {
        if self.tools.contains_key(descriptor.name) {
            return Err(RegistryError::DuplicateTool(descriptor.name.to_string()));
        }
        self.tools.insert(descriptor.name, descriptor);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<&ToolDescriptor, RpcError> {
        self.tools
            .get(name)
            .ok_or_else(|| RpcError::method_not_found(name))
    }

    /// Descriptors in registration order.
    pub fn list(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Registry holding every built-in tool.
    pub fn builtin() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for descriptor in builtin_descriptors() {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }
}

const SEARCH_DESC: &str = "Hostname, IP or MAC to match exactly (case-insensitive). \
                           '*' or omitted returns everything.";

fn builtin_descriptors() -> Vec<ToolDescriptor> {
    use FieldType::{Boolean, Integer, String};

    vec![
        ToolDescriptor {
            name: "system",
            description: "Get firewall system status: versions, uptime, CPU, memory and \
                          disk usage.",
            input_schema: InputSchema::new(),
            kind: ToolKind::System,
        },
        ToolDescriptor {
            name: "arp",
            description: "List the ARP (IPv4) and NDP (IPv6) neighbor tables. Each entry is \
                          annotated with its vendor, the DHCP lease state and the reconciled \
                          status of its MAC.",
            input_schema: InputSchema::new()
                .optional("search", String, SEARCH_DESC)
                .optional("mac", String, "Only entries with this MAC address.")
                .optional("ip", String, "Only entries with this IP address."),
            kind: ToolKind::Arp,
        },
        ToolDescriptor {
            name: "dhcp",
            description: "List DHCPv4 and DHCPv6 leases together with the reconciled host \
                          status (online, offline, ghost, unknown) of each MAC.",
            input_schema: InputSchema::new().optional("search", String, SEARCH_DESC),
            kind: ToolKind::Dhcp,
        },
        ToolDescriptor {
            name: "hosts",
            description: "Reconciled per-host view merging neighbor presence with DHCP lease \
                          state. Flags ghosts (active lease, nothing on the link) and other \
                          discrepancies.",
            input_schema: InputSchema::new().optional("search", String, SEARCH_DESC),
            kind: ToolKind::Hosts,
        },
        ToolDescriptor {
            name: "lldp",
            description: "List LLDP neighbors seen on the firewall's interfaces.",
            input_schema: InputSchema::new(),
            kind: ToolKind::Lldp,
        },
        ToolDescriptor {
            name: "get_logs",
            description: "Fetch recent firewall log entries with optional filters, plus a \
                          summary of actions, top talkers and top blocked ports.",
            input_schema: InputSchema::new()
                .optional("limit", Integer, "Log lines to fetch from the firewall. Default 500.")
                .optional("action", String, "Only entries with this action (pass, block, reject).")
                .optional("src_ip", String, "Only entries from this source IP.")
                .optional("dst_ip", String, "Only entries to this destination IP.")
                .optional("protocol", String, "Only entries with this protocol (tcp, udp, ...)."),
            kind: ToolKind::GetLogs,
        },
        ToolDescriptor {
            name: "fw_rules",
            description: "List firewall filter rules in evaluation order, optionally filtered.",
            input_schema: InputSchema::new()
                .optional("interface", String, "Only rules on this interface.")
                .optional("action", String, "Only rules with this action.")
                .optional("enabled", Boolean, "Only enabled (true) or disabled (false) rules.")
                .optional("protocol", String, "Only rules for this protocol."),
            kind: ToolKind::FwRules,
        },
        ToolDescriptor {
            name: "mkfw_rule",
            description: "Create a firewall filter rule. Changes are applied immediately \
                          unless apply is false.",
            input_schema: InputSchema::new()
                .required("description", String, "Rule description.")
                .optional("interface", String, "Interface identifier. Default lan.")
                .one_of("action", &["pass", "block", "reject"], "Rule action. Default pass.")
                .optional("protocol", String, "Protocol (any, tcp, udp, icmp, ...). Default any.")
                .optional("source_net", String, "Source network or address. Default any.")
                .optional("source_port", String, "Source port or range. Default any.")
                .optional("destination_net", String, "Destination network or address. Default any.")
                .optional("destination_port", String, "Destination port or range. Default any.")
                .one_of("direction", &["in", "out"], "Traffic direction. Default in.")
                .one_of("ipprotocol", &["inet", "inet6"], "Address family. Default inet.")
                .optional("enabled", Boolean, "Whether the rule is active. Default true.")
                .optional("gateway", String, "Policy-routing gateway. Default none.")
                .optional("apply", Boolean, "Apply pending changes after creating. Default true."),
            kind: ToolKind::MkFwRule,
        },
        ToolDescriptor {
            name: "rmfw_rule",
            description: "Delete a firewall filter rule by UUID.",
            input_schema: InputSchema::new()
                .required("rule_uuid", String, "UUID of the rule, as listed by fw_rules.")
                .optional("apply", Boolean, "Apply pending changes after deleting. Default true."),
            kind: ToolKind::RmFwRule,
        },
        ToolDescriptor {
            name: "interface_list",
            description: "Map of interface identifiers to their descriptions.",
            input_schema: InputSchema::new(),
            kind: ToolKind::InterfaceList,
        },
    ]
}
