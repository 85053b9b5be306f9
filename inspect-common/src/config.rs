//! Bootstrap configuration loading
//!
//! Settings are resolved in priority order:
//! 1. Command-line argument (handled by the binary via clap)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled defaults
//!
//! A missing config file is never fatal: a warning is logged and the
//! compiled defaults are used. A config file that exists but cannot be
//! parsed is a `Config` error.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Detector names accepted in `[detectors] order`
pub const KNOWN_DETECTORS: [&str; 3] = ["local", "cloud", "mock"];

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "INSPECT_CONFIG";

/// Environment variable carrying the cloud detector bearer token
pub const CLOUD_TOKEN_ENV_VAR: &str = "INSPECT_CLOUD_TOKEN";

/// Environment variable overriding the cloud detector endpoint
pub const CLOUD_ENDPOINT_ENV_VAR: &str = "INSPECT_CLOUD_ENDPOINT";

/// Bootstrap configuration loaded from TOML
///
/// These settings cannot change while the service runs.
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Address the HTTP server binds to
    #[serde(default = "default_bind")]
    pub bind: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub detectors: DetectorsConfig,

    #[serde(default)]
    pub shell: ShellConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level or EnvFilter directive, used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Detector pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DetectorsConfig {
    /// Preference order; when absent it is derived from what is configured
    #[serde(default)]
    pub order: Option<Vec<String>>,

    /// Per-variant model load timeout
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,

    /// Per-variant analysis timeout
    #[serde(default = "default_analyze_timeout_ms")]
    pub analyze_timeout_ms: u64,

    #[serde(default)]
    pub local: LocalDetectorConfig,

    #[serde(default)]
    pub cloud: CloudDetectorConfig,
}

/// On-device model settings
#[derive(Debug, Clone, Deserialize)]
pub struct LocalDetectorConfig {
    /// Path to the JSON model file
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
}

/// Cloud inference settings
#[derive(Debug, Clone, Deserialize)]
pub struct CloudDetectorConfig {
    /// Base URL of the inference service (no trailing slash required)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Bearer token issued by the authentication backend
    #[serde(default)]
    pub api_token: Option<String>,

    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Offline shell cache settings
#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
    /// Versioned cache name, bumped on every asset-list change
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    /// Origin the shell assets are served from
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Origin-relative asset paths primed at install time
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,

    /// Directory for the persistent cache (in-memory when absent)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5780
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_load_timeout_ms() -> u64 {
    15_000
}

fn default_analyze_timeout_ms() -> u64 {
    10_000
}

fn default_model_path() -> PathBuf {
    PathBuf::from("models/defect-linear.json")
}

fn default_requests_per_second() -> u32 {
    5
}

fn default_request_timeout_ms() -> u64 {
    8_000
}

fn default_cache_version() -> String {
    "inspect-shell-v1".to_string()
}

fn default_origin() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_assets() -> Vec<String> {
    vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/static/app.css".to_string(),
        "/static/app.js".to_string(),
    ]
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            logging: LoggingConfig::default(),
            detectors: DetectorsConfig::default(),
            shell: ShellConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Default for DetectorsConfig {
    fn default() -> Self {
        Self {
            order: None,
            load_timeout_ms: default_load_timeout_ms(),
            analyze_timeout_ms: default_analyze_timeout_ms(),
            local: LocalDetectorConfig::default(),
            cloud: CloudDetectorConfig::default(),
        }
    }
}

impl Default for LocalDetectorConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
        }
    }
}

impl Default for CloudDetectorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_token: None,
            requests_per_second: default_requests_per_second(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            cache_version: default_cache_version(),
            origin: default_origin(),
            assets: default_assets(),
            cache_dir: None,
        }
    }
}

impl DetectorsConfig {
    /// Detector preference order in effect
    ///
    /// An explicit `order` wins. Otherwise: local, then cloud when an
    /// endpoint is configured, then mock as the terminal fallback.
    pub fn effective_order(&self) -> Vec<String> {
        match &self.order {
            Some(order) if !order.is_empty() => {
                order.iter().map(|name| name.trim().to_ascii_lowercase()).collect()
            }
            _ => {
                let mut order = vec!["local".to_string()];
                if self.cloud.endpoint.is_some() {
                    order.push("cloud".to_string());
                }
                order.push("mock".to_string());
                order
            }
        }
    }
}

impl TomlConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Apply environment overrides that take priority over the file
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var(CLOUD_TOKEN_ENV_VAR) {
            if !token.trim().is_empty() {
                self.detectors.cloud.api_token = Some(token);
            }
        }
        if let Ok(endpoint) = std::env::var(CLOUD_ENDPOINT_ENV_VAR) {
            if !endpoint.trim().is_empty() {
                self.detectors.cloud.endpoint = Some(endpoint);
            }
        }
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        let order = self.detectors.effective_order();
        let mut seen: Vec<&str> = Vec::with_capacity(order.len());

        for name in &order {
            if !KNOWN_DETECTORS.contains(&name.as_str()) {
                return Err(Error::Config(format!(
                    "Unknown detector '{}' in [detectors] order (expected one of: {})",
                    name,
                    KNOWN_DETECTORS.join(", ")
                )));
            }
            if seen.contains(&name.as_str()) {
                return Err(Error::Config(format!(
                    "Detector '{}' listed more than once in [detectors] order",
                    name
                )));
            }
            seen.push(name);
        }

        if seen.contains(&"local") && self.detectors.local.model_path.as_os_str().is_empty() {
            return Err(Error::Config(
                "Local detector enabled but [detectors.local] model_path is empty".to_string(),
            ));
        }

        if seen.contains(&"cloud") && self.detectors.cloud.endpoint.is_none() {
            return Err(Error::Config(format!(
                "Cloud detector enabled but no endpoint configured. Set [detectors.cloud] endpoint or {}",
                CLOUD_ENDPOINT_ENV_VAR
            )));
        }

        if self.detectors.cloud.requests_per_second == 0 {
            return Err(Error::Config(
                "[detectors.cloud] requests_per_second must be at least 1".to_string(),
            ));
        }

        if self.shell.cache_version.trim().is_empty() {
            return Err(Error::Config("[shell] cache_version must not be empty".to_string()));
        }

        if !is_valid_cache_name(&self.shell.cache_version) {
            return Err(Error::Config(format!(
                "[shell] cache_version '{}' may only contain ASCII letters, digits, '.', '-' and '_', and must not start with '.'",
                self.shell.cache_version
            )));
        }

        Ok(())
    }
}

/// Whether `name` is usable as a shell cache name
///
/// ASCII alphanumerics plus `.`, `-` and `_`, non-empty, no leading `.`.
/// Dot-prefixed names are reserved for storage bookkeeping.
pub fn is_valid_cache_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

/// Resolve which config file to read
///
/// CLI argument → `INSPECT_CONFIG` → platform config dir. Returns `None`
/// when no candidate exists on disk.
pub fn resolve_config_path(cli_arg: Option<&Path>, module_name: &str) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let file_name = format!("{}.toml", module_name);
    let user_config = dirs::config_dir().map(|d| d.join("inspect").join(&file_name));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/inspect").join(&file_name);
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Load configuration from an optional path, falling back to defaults
///
/// Environment overrides are applied and the result is validated.
pub fn load_config(path: Option<&Path>) -> Result<TomlConfig> {
    let mut config = match path {
        Some(path) if path.exists() => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
            let config = TomlConfig::from_toml_str(&content)?;
            info!("Configuration loaded from {}", path.display());
            config
        }
        Some(path) => {
            warn!(
                "Config file {} not found, using compiled defaults",
                path.display()
            );
            TomlConfig::default()
        }
        None => {
            warn!("No config file found, using compiled defaults");
            TomlConfig::default()
        }
    };

    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}
