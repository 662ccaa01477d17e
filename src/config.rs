//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables**: `OPNSENSE_API_HOST`, `OPNSENSE_API_KEY`,
//!    `OPNSENSE_API_SECRET`, `OPNSENSE_SSL_VERIFY`, `MCP_LISTEN`,
//!    `MCP_JWT_SECRET`, `LOG_LEVEL`
//! 2. **Config file**: path via `--config <path>`, or `opnsense-mcp.toml` in CWD
//! 3. **Compiled defaults**: see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [appliance]
//! url = "https://192.168.1.1"
//! api_key = "key"
//! api_secret = "secret"
//! verify_tls = false
//! connect_timeout_secs = 10
//! timeout_secs = 30
//! oui_db = "/usr/share/ieee-data/oui.csv"
//!
//! [server]
//! listen = "127.0.0.1:8080"
//! max_subscriptions = 64
//! keepalive_secs = 15
//! subscription_buffer = 32
//! cors = true
//!
//! [auth]
//! jwt_secret = "your-signing-secret"
//! token_ttl_minutes = 30
//!
//! [dispatch]
//! reject_unknown_params = true
//! handler_timeout_secs = 45
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::Path;

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "opnsense-mcp.toml";

/// Placeholder secret; `serve` and `token` refuse to run with it.
pub const DEFAULT_JWT_SECRET: &str = "change-me";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub appliance: ApplianceConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection to the firewall appliance's REST API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplianceConfig {
    /// Base URL or bare host. Override with `OPNSENSE_API_HOST`.
    #[serde(default)]
    pub url: String,
    /// API key. Override with `OPNSENSE_API_KEY`.
    #[serde(default)]
    pub api_key: String,
    /// API secret. Override with `OPNSENSE_API_SECRET`.
    #[serde(default)]
    pub api_secret: String,
    /// Verify the appliance's TLS certificate (default false; appliances
    /// usually run self-signed). Override with `OPNSENSE_SSL_VERIFY`.
    #[serde(default)]
    pub verify_tls: bool,
    /// TCP connect timeout in seconds (default 10).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds (default 30).
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
    /// IEEE `oui.csv` used to name neighbor vendors. The compiled-in
    /// table is used when unset.
    #[serde(default)]
    pub oui_db: Option<String>,
}

/// HTTP + SSE transport settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `127.0.0.1:8080`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum concurrently open event subscriptions (default 64).
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions: usize,
    /// Seconds between keep-alive frames on idle subscriptions (default 15).
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    /// Outbound queue depth per subscription (default 32).
    #[serde(default = "default_subscription_buffer")]
    pub subscription_buffer: usize,
    /// Attach a permissive CORS layer (default true).
    #[serde(default = "default_cors")]
    pub cors: bool,
}

/// Bearer token verification.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC signing secret. Override with `MCP_JWT_SECRET`.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    /// Lifetime of tokens minted by `opnsense-mcp token` (default 30).
    #[serde(default = "default_token_ttl")]
    pub token_ttl_minutes: u64,
}

/// Request dispatcher policy.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Reject arguments not declared in a tool's schema (default true).
    /// When false they are ignored.
    #[serde(default = "default_reject_unknown")]
    pub reject_unknown_params: bool,
    /// Upper bound on a single handler invocation in seconds (default 45).
    #[serde(default = "default_handler_timeout")]
    pub handler_timeout_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_connect_timeout() -> u64 {
    10
}
fn default_request_timeout() -> u64 {
    30
}
fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_max_subscriptions() -> usize {
    64
}
fn default_keepalive() -> u64 {
    15
}
fn default_subscription_buffer() -> usize {
    32
}
fn default_cors() -> bool {
    true
}
fn default_jwt_secret() -> String {
    DEFAULT_JWT_SECRET.to_string()
}
fn default_token_ttl() -> u64 {
    30
}
fn default_reject_unknown() -> bool {
    true
}
fn default_handler_timeout() -> u64 {
    45
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ApplianceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            verify_tls: false,
            connect_timeout_secs: default_connect_timeout(),
            timeout_secs: default_request_timeout(),
            oui_db: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_subscriptions: default_max_subscriptions(),
            keepalive_secs: default_keepalive(),
            subscription_buffer: default_subscription_buffer(),
            cors: default_cors(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_ttl_minutes: default_token_ttl(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            reject_unknown_params: default_reject_unknown(),
            handler_timeout_secs: default_handler_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = if let Some(p) = path {
            Self::from_file(p)?
        } else if Path::new(DEFAULT_CONFIG_FILE).exists() {
            Self::from_file(DEFAULT_CONFIG_FILE)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Apply environment overrides; `lookup` is injected so tests don't touch
    /// the process environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("OPNSENSE_API_HOST") {
            self.appliance.url = v;
        }
        if let Some(v) = lookup("OPNSENSE_API_KEY") {
            self.appliance.api_key = v;
        }
        if let Some(v) = lookup("OPNSENSE_API_SECRET") {
            self.appliance.api_secret = v;
        }
        if let Some(v) = lookup("OPNSENSE_SSL_VERIFY") {
            self.appliance.verify_tls = v.eq_ignore_ascii_case("true") || v == "1";
        }
        if let Some(v) = lookup("MCP_LISTEN") {
            self.server.listen = v;
        }
        if let Some(v) = lookup("MCP_JWT_SECRET") {
            self.auth.jwt_secret = v;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.logging.level = v.to_ascii_lowercase();
        }
    }

    /// The signing secret must be set and must not be the placeholder.
    pub fn validate_auth(&self) -> Result<(), ConfigError> {
        let secret = self.auth.jwt_secret.trim();
        if secret.is_empty() || secret == DEFAULT_JWT_SECRET {
            return Err(ConfigError::Invalid(
                "jwt secret is not set (MCP_JWT_SECRET or [auth].jwt_secret)".into(),
            ));
        }
        Ok(())
    }

    /// Check that the appliance connection is usable.
    pub fn validate_appliance(&self) -> Result<(), ConfigError> {
        if self.appliance.url.is_empty() {
            return Err(ConfigError::Invalid(
                "appliance url is not set (OPNSENSE_API_HOST or [appliance].url)".into(),
            ));
        }
        if self.appliance.api_key.is_empty() || self.appliance.api_secret.is_empty() {
            return Err(ConfigError::Invalid(
                "appliance credentials are not set (OPNSENSE_API_KEY / OPNSENSE_API_SECRET)".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_file_is_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:8080");
        assert_eq!(config.auth.jwt_secret, DEFAULT_JWT_SECRET);
        assert!(config.dispatch.reject_unknown_params);
        assert_eq!(config.appliance.timeout_secs, 30);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [appliance]
            url = "fw.lan"
            timeout_secs = 5

            [dispatch]
            reject_unknown_params = false
            "#,
        )
        .unwrap();
        assert_eq!(config.appliance.url, "fw.lan");
        assert_eq!(config.appliance.timeout_secs, 5);
        assert_eq!(config.appliance.connect_timeout_secs, 10);
        assert!(!config.dispatch.reject_unknown_params);
        assert_eq!(config.dispatch.handler_timeout_secs, 45);
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("OPNSENSE_API_HOST", "10.0.0.1"),
            ("OPNSENSE_SSL_VERIFY", "TRUE"),
            ("MCP_JWT_SECRET", "s3cret"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.apply_env(|k| env.get(k).map(|v| (*v).to_string()));
        assert_eq!(config.appliance.url, "10.0.0.1");
        assert!(config.appliance.verify_tls);
        assert_eq!(config.auth.jwt_secret, "s3cret");
        assert_eq!(config.server.listen, "127.0.0.1:8080");
    }

    #[test]
    fn missing_credentials_fail_validation() {
        let mut config = Config::default();
        config.appliance.url = "fw.lan".into();
        assert!(config.validate_appliance().is_err());
        config.appliance.api_key = "k".into();
        config.appliance.api_secret = "s".into();
        assert!(config.validate_appliance().is_ok());
    }

    #[test]
    fn placeholder_or_blank_jwt_secret_is_refused() {
        let mut config = Config::default();
        assert!(matches!(config.validate_auth(), Err(ConfigError::Invalid(_))));
        config.auth.jwt_secret = "  ".into();
        assert!(config.validate_auth().is_err());
        config.auth.jwt_secret = "a-real-secret".into();
        assert!(config.validate_auth().is_ok());
    }

    #[test]
    fn oui_db_is_optional() {
        assert_eq!(Config::default().appliance.oui_db, None);
        let config: Config =
            toml::from_str("[appliance]\noui_db = \"/srv/oui.csv\"\n").unwrap();
        assert_eq!(config.appliance.oui_db.as_deref(), Some("/srv/oui.csv"));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = Config::load(Some("/nonexistent/opnsense-mcp.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
