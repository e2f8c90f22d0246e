use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Allowed range for `api.cache_duration_secs`
pub const MIN_CACHE_DURATION_SECS: u64 = 15;
pub const MAX_CACHE_DURATION_SECS: u64 = 600;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level catnip configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Controls log formatting (default: production)
    #[serde(default)]
    pub mode: Mode,

    /// Public host[:port] of catnip itself, used to build wakeup links
    #[serde(default)]
    pub catnip_url: String,

    #[serde(default)]
    pub server: ServerConfig,

    /// O-Neko API connection
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Development,
    #[default]
    Production,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" => Ok(Mode::Development),
            "production" => Ok(Mode::Production),
            other => Err(format!(
                "mode must be 'development' or 'production', got '{}'",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Main HTTP port (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Port serving /metrics and /up (default: 8081). When equal to `port`
    /// the main listener serves them.
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Upper bound for handling one request (default: 30)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// How long open connections may drain on shutdown (default: 5)
    #[serde(default = "default_shutdown_grace_period")]
    pub shutdown_grace_period_secs: u64,

    /// Path to TLS certificate file (PEM format)
    pub tls_cert: Option<String>,

    /// Path to TLS private key file (PEM format)
    pub tls_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_port(),
            metrics_port: default_metrics_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_grace_period_secs: default_shutdown_grace_period(),
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_secs)
    }

    /// Whether /metrics and /up share the main listener
    pub fn metrics_on_main_port(&self) -> bool {
        self.metrics_port == self.port
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    /// Base URL of the O-Neko instance
    #[serde(default)]
    pub base_url: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// TTL of cached API responses (default: 60)
    #[serde(default = "default_cache_duration")]
    pub cache_duration_secs: u64,

    /// Timeout for a single API call (default: 30)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            password: String::new(),
            cache_duration_secs: default_cache_duration(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ApiConfig {
    pub fn cache_duration(&self) -> Duration {
        Duration::from_secs(self.cache_duration_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default log level when RUST_LOG is unset (default: info)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_metrics_port() -> u16 {
    8081
}

fn default_request_timeout() -> u64 {
    30
}

fn default_shutdown_grace_period() -> u64 {
    5
}

fn default_cache_duration() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content, |key| std::env::var(key).ok())
    }

    /// Parse configuration from TOML text, reading overrides through `env`
    pub fn from_toml<F>(content: &str, env: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: Config = toml::from_str(content)?;
        config.apply_env_overrides(env)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Override file values with `ONEKO_*` environment variables
    pub fn apply_env_overrides<F>(&mut self, env: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = env("ONEKO_API_BASEURL") {
            self.api.base_url = value;
        }
        if let Some(value) = env("ONEKO_API_AUTH_USERNAME") {
            self.api.username = value;
        }
        if let Some(value) = env("ONEKO_API_AUTH_PASSWORD") {
            self.api.password = value;
        }
        if let Some(value) = env("ONEKO_CATNIPURL") {
            self.catnip_url = value;
        }
        if let Some(value) = env("ONEKO_LOGGING_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = env("ONEKO_MODE") {
            self.mode = value
                .parse()
                .map_err(|e: String| anyhow::anyhow!("ONEKO_MODE: {}", e))?;
        }
        Ok(())
    }

    /// Bring free-form values into canonical shape
    fn normalize(&mut self) {
        self.catnip_url = normalize_catnip_url(&self.catnip_url);
        self.logging.level = self.logging.level.trim().to_ascii_lowercase();
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if self.catnip_url.is_empty() {
            errors.push("catnip_url is required".to_string());
        } else if !is_host_with_optional_port(&self.catnip_url) {
            errors.push(format!(
                "catnip_url '{}' must be a hostname with an optional port",
                self.catnip_url
            ));
        }

        if self.api.base_url.is_empty() {
            errors.push("api.base_url is required".to_string());
        } else if !(self.api.base_url.starts_with("http://")
            || self.api.base_url.starts_with("https://"))
        {
            errors.push(format!(
                "api.base_url '{}' must start with http:// or https://",
                self.api.base_url
            ));
        }

        if self.api.username.is_empty() || self.api.password.is_empty() {
            errors.push("api.username and api.password must be set".to_string());
        }

        if !(MIN_CACHE_DURATION_SECS..=MAX_CACHE_DURATION_SECS)
            .contains(&self.api.cache_duration_secs)
        {
            errors.push(format!(
                "api.cache_duration_secs must be between {} and {}, got {}",
                MIN_CACHE_DURATION_SECS, MAX_CACHE_DURATION_SECS, self.api.cache_duration_secs
            ));
        }

        if self.api.request_timeout_secs == 0 {
            errors.push("api.request_timeout_secs must be greater than 0".to_string());
        }

        if self.server.port == 0 {
            errors.push("server.port must be greater than 0".to_string());
        }

        if self.server.metrics_port == 0 {
            errors.push("server.metrics_port must be greater than 0".to_string());
        }

        if self.server.request_timeout_secs == 0 {
            errors.push("server.request_timeout_secs must be greater than 0".to_string());
        }

        if self.server.tls_cert.is_some() != self.server.tls_key.is_some() {
            errors.push("server.tls_cert and server.tls_key must be set together".to_string());
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(format!(
                "logging.level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.logging.level
            ));
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}

/// Trim, lowercase and drop any `scheme://` prefix
fn normalize_catnip_url(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    match lowered.split_once("://") {
        Some((scheme, rest))
            if !scheme.is_empty()
                && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') =>
        {
            rest.to_string()
        }
        _ => lowered,
    }
}

fn is_host_with_optional_port(value: &str) -> bool {
    let (host, port) = match value.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (value, None),
    };

    let host_ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
    let port_ok = port.map_or(true, |p| {
        (1..=5).contains(&p.len()) && p.chars().all(|c| c.is_ascii_digit())
    });

    host_ok && port_ok
}
