use config::{Config as ConfigLoader, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use threadline_transport::Redactor;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub redaction: RedactionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: None,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl ServerConfig {
    /// Whole-request timeout. Unset means streams may stay open indefinitely.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// Completed runs kept in memory.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
        }
    }
}

/// Extra names to redact on top of the built-in list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedactionConfig {
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub body_fields: Vec<String>,
}

impl RedactionConfig {
    pub fn redactor(&self) -> Redactor {
        let redactor = self
            .headers
            .iter()
            .fold(Redactor::new(), |r, name| r.with_header(name));
        self.body_fields
            .iter()
            .fold(redactor, |r, field| r.with_body_field(field))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_cache_capacity() -> usize {
    64
}

fn default_max_concurrent_fetches() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl ClientConfig {
    /// Load configuration from TOML files and environment variables
    ///
    /// Hierarchy (weakest to strongest):
    /// 1. config/default.toml
    /// 2. config/{ENV}.toml (if ENV is set)
    /// 3. Environment variables prefixed with `THREADLINE__`,
    ///    e.g. `THREADLINE__SERVER__BASE_URL`
    ///
    /// Bearer tokens are never read here.
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("ENV").unwrap_or_else(|_| "dev".to_string());

        let config = ConfigLoader::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::with_prefix("THREADLINE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load config from a specific path (useful for testing)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        ConfigLoader::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        ConfigLoader::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_structure() {
        let toml = r#"
            [server]
            base_url = "https://api.example.com/v1"
            timeout_ms = 30000

            [history]
            cache_capacity = 8

            [redaction]
            headers = ["x-session"]
            body_fields = ["ssn"]

            [logging]
            level = "debug"
            format = "json"
        "#;

        let config = ClientConfig::from_toml_str(toml).unwrap();
        assert_eq!(
            config.server.base_url.as_deref(),
            Some("https://api.example.com/v1")
        );
        assert_eq!(config.server.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.server.connect_timeout_ms, 5_000);
        assert_eq!(config.history.cache_capacity, 8);
        assert_eq!(config.history.max_concurrent_fetches, 4);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ClientConfig::from_toml_str("").unwrap();
        assert!(config.server.base_url.is_none());
        assert!(config.server.timeout().is_none());
        assert_eq!(config.history.cache_capacity, 64);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_redaction_extends_defaults() {
        let config = ClientConfig::from_toml_str(
            r#"
            [redaction]
            body_fields = ["ssn"]
            "#,
        )
        .unwrap();

        let redactor = config.redaction.redactor();
        let body = br#"{"ssn": "123-45-6789", "password": "hunter2", "name": "Ada"}"#;
        let redacted = format!("{:?}", redactor.redact_body(Some(&body[..])));
        assert!(!redacted.contains("123-45-6789"));
        assert!(!redacted.contains("hunter2"));
        assert!(redacted.contains("Ada"));
    }
}
