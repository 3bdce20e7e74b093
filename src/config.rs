//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub webmention: WebmentionConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "blog.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://blog.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Webmention processing configuration
///
/// Everything the verification and submission pipelines consult at
/// runtime. Tests swap the whole struct rather than patching globals.
#[derive(Debug, Clone, Deserialize)]
pub struct WebmentionConfig {
    /// Timeout for outbound HTTP requests, in seconds
    pub timeout_seconds: u64,
    /// Maximum retry attempts for a failed fetch or submission
    pub max_retries: u32,
    /// Minimum delay between retry attempts, in seconds
    pub retry_interval_seconds: u64,
    /// Run verification/submission on spawned worker tasks instead of
    /// deferring to pending rows drained by an operator command
    pub use_background_worker: bool,
    /// Approve incoming mentions without moderation
    pub auto_approve: bool,
    /// Accept mentions where source and target share our domain
    pub allow_self_mentions: bool,
    /// Drop incoming mentions whose target does not resolve to a local object
    pub incoming_target_model_required: bool,
    /// Only accept mentions whose source host matches one of these patterns
    #[serde(default)]
    pub domains_incoming_allow: Vec<HostPattern>,
    /// Reject mentions whose source host matches one of these patterns
    #[serde(default)]
    pub domains_incoming_deny: Vec<HostPattern>,
    /// Only send mentions to hosts matching one of these patterns
    #[serde(default)]
    pub domains_outgoing_allow: Vec<HostPattern>,
    /// Never send mentions to hosts matching one of these patterns
    #[serde(default)]
    pub domains_outgoing_deny: Vec<HostPattern>,
    /// Query field used when a route registers a capture with no mapping
    pub default_url_parameter_mapping: String,
    /// User-Agent header for all outbound requests
    pub user_agent: String,
    /// Expose the status dashboard endpoint without authentication
    pub dashboard_public: bool,
}

impl WebmentionConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds)
    }

    pub fn retry_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retry_interval_seconds as i64)
    }

    /// Evaluate the incoming allow/deny policy against a host.
    pub fn accepts_incoming_host(&self, host: &str) -> bool {
        host_allowed(host, &self.domains_incoming_allow, &self.domains_incoming_deny)
    }

    /// Evaluate the outgoing allow/deny policy against a host.
    pub fn accepts_outgoing_host(&self, host: &str) -> bool {
        host_allowed(host, &self.domains_outgoing_allow, &self.domains_outgoing_deny)
    }
}

fn host_allowed(host: &str, allow: &[HostPattern], deny: &[HostPattern]) -> bool {
    if !allow.is_empty() {
        return allow.iter().any(|p| p.matches(host));
    }
    !deny.iter().any(|p| p.matches(host))
}

/// A host pattern: either an exact hostname or a `*.` wildcard prefix.
///
/// `*.example.org` matches `example.org` itself and any depth of
/// subdomain; it never matches `notexample.org`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct HostPattern(pub String);

impl HostPattern {
    pub fn matches(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        let pattern = self.0.trim_end_matches('.').to_ascii_lowercase();

        if let Some(suffix) = pattern.strip_prefix("*.") {
            host == suffix || host.ends_with(&format!(".{}", suffix))
        } else {
            host == pattern
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (RUSTMENTION_*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.protocol", "http")?
            .set_default("database.path", "data/rustmention.db")?
            .set_default("webmention.timeout_seconds", 10)?
            .set_default("webmention.max_retries", 5)?
            .set_default("webmention.retry_interval_seconds", 600)?
            .set_default("webmention.use_background_worker", false)?
            .set_default("webmention.auto_approve", false)?
            .set_default("webmention.allow_self_mentions", true)?
            .set_default("webmention.incoming_target_model_required", false)?
            .set_default("webmention.default_url_parameter_mapping", "id")?
            .set_default(
                "webmention.user_agent",
                format!("rustmention/{}", env!("CARGO_PKG_VERSION")),
            )?
            .set_default("webmention.dashboard_public", false)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (RUSTMENTION_*)
            .add_source(
                Environment::with_prefix("RUSTMENTION")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        if !matches!(self.server.protocol.as_str(), "http" | "https") {
            return Err(crate::error::AppError::Config(
                "server.protocol must be 'http' or 'https'".to_string(),
            ));
        }

        if self.webmention.timeout_seconds == 0 {
            return Err(crate::error::AppError::Config(
                "webmention.timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if !self.webmention.domains_incoming_allow.is_empty()
            && !self.webmention.domains_incoming_deny.is_empty()
        {
            return Err(crate::error::AppError::Config(
                "webmention.domains_incoming_allow and domains_incoming_deny are mutually exclusive"
                    .to_string(),
            ));
        }

        if !self.webmention.domains_outgoing_allow.is_empty()
            && !self.webmention.domains_outgoing_deny.is_empty()
        {
            return Err(crate::error::AppError::Config(
                "webmention.domains_outgoing_allow and domains_outgoing_deny are mutually exclusive"
                    .to_string(),
            ));
        }

        Ok(())
    }
}
