#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

//! opnsense-mcp library: a tool-oriented JSON-RPC server over the OPNsense API.
//!
//! - `protocol` and `error`: envelopes and the error taxonomy
//! - `appliance`: the `Appliance` seam and its HTTP client
//! - `reconcile`: merges neighbor and lease tables into host status
//! - `oui`: vendor lookup by MAC prefix
//! - `tools`: registry, schemas and handlers
//! - `dispatch`: transport-agnostic request dispatcher
//! - `auth`: JWT bearer guard
//! - `subscriptions`: event subscription hub
//! - `transport`: stdio and HTTP + SSE adapters

pub mod appliance;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod oui;
pub mod protocol;
pub mod reconcile;
pub mod subscriptions;
pub mod tools;
pub mod transport;

pub use appliance::{Appliance, ApplianceClient};
pub use config::Config;
pub use dispatch::Dispatcher;
pub use error::{ErrorCode, RpcError};
pub use protocol::{RequestEnvelope, ResponseEnvelope};
pub use reconcile::{reconcile, EffectiveStatus, HostStatus};
