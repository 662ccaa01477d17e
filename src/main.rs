//! # opnsense-mcp
//!
//! Exposes an OPNsense firewall's state (neighbors, DHCP leases, LLDP, rules,
//! logs) to AI agents as MCP tools, and lets them create and delete rules.
//!
//! ## Subcommands
//!
//! - `opnsense-mcp stdio` (default): serve one peer over stdin/stdout
//! - `opnsense-mcp serve`: HTTP + SSE server for many peers, JWT protected
//! - `opnsense-mcp token --subject <name>`: mint a bearer token for `serve`
//!
//! All subcommands accept `--config <path>`.
//!
//! ## Architecture
//!
//! ```text
//! main.rs            entry point, clap subcommands, tracing, graceful shutdown
//! config.rs          TOML + env-var configuration
//! protocol.rs        JSON-RPC envelopes and shape checks
//! error.rs           wire error codes, handler errors
//! appliance/
//!   mod.rs           Appliance trait, UpstreamError
//!   client.rs        reqwest client for the OPNsense REST API
//!   records.rs       normalized records, LLDP text parser
//! reconcile.rs       neighbor + lease reconciliation
//! tools/
//!   registry.rs      ToolRegistry, built-in tool descriptors
//!   schema.rs        input schemas and validation
//!   network.rs       system, arp, dhcp, hosts, lldp, interface_list
//!   firewall.rs      get_logs, fw_rules, mkfw_rule, rmfw_rule
//! dispatch.rs        Dispatcher (MCP methods, timeouts, panic capture)
//! oui.rs             vendor lookup by MAC prefix
//! auth.rs            JWT bearer middleware, token issuance
//! subscriptions.rs   SSE subscription hub
//! transport/
//!   stdio.rs         line-delimited adapter
//!   http.rs          axum router and handlers
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use opnsense_mcp::auth::AuthGuard;
use opnsense_mcp::config::Config;
use opnsense_mcp::oui::OuiTable;
use opnsense_mcp::tools::ToolRegistry;
use opnsense_mcp::transport::{http, stdio};
use opnsense_mcp::{ApplianceClient, Dispatcher};

/// MCP server for OPNsense firewalls.
#[derive(Parser)]
#[command(name = "opnsense-mcp", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a single peer over stdin/stdout (default when no subcommand given).
    Stdio,
    /// Run the HTTP + SSE server.
    Serve,
    /// Print a signed bearer token for the HTTP server.
    Token {
        /// Subject (client name) recorded in the token.
        #[arg(long, default_value = "mcp-client")]
        subject: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("opnsense-mcp: {e}");
            return ExitCode::FAILURE;
        }
    };

    // stdout belongs to the protocol in stdio mode, so logs always go to stderr.
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command.unwrap_or(Commands::Stdio) {
        Commands::Stdio => run_stdio(&config).await,
        Commands::Serve => run_server(&config).await,
        Commands::Token { subject } => print_token(&config, &subject),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn build_dispatcher(config: &Config) -> Result<Dispatcher, BoxError> {
    config.validate_appliance()?;
    let client = ApplianceClient::new(&config.appliance)?;
    info!(appliance = client.base_url(), "using appliance");
    let registry = ToolRegistry::builtin()?;
    let oui = OuiTable::resolve(config.appliance.oui_db.as_deref())?;
    Ok(Dispatcher::new(registry, Arc::new(client), &config.dispatch).with_oui_table(oui))
}

async fn run_stdio(config: &Config) -> Result<(), BoxError> {
    info!("opnsense-mcp v{} starting on stdio", env!("CARGO_PKG_VERSION"));
    let dispatcher = build_dispatcher(config)?;
    stdio::run(&dispatcher).await?;
    Ok(())
}

async fn run_server(config: &Config) -> Result<(), BoxError> {
    info!("opnsense-mcp v{} starting", env!("CARGO_PKG_VERSION"));
    config.validate_auth()?;

    let dispatcher = build_dispatcher(config)?;
    let guard = Arc::new(AuthGuard::new(&config.auth));
    let state = http::AppState::new(dispatcher, &config.server);
    let hub = state.hub.clone();
    let app = http::router(state, guard, config.server.cors);

    http::serve(&config.server.listen, app, shutdown_signal()).await?;

    info!(open_subscriptions = hub.len(), "Shutting down");
    Ok(())
}

fn print_token(config: &Config, subject: &str) -> Result<(), BoxError> {
    config.validate_auth()?;
    let token = AuthGuard::new(&config.auth).issue_token(subject)?;
    println!("{token}");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
