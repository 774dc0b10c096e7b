use crate::aggregator::QueueNames;
use crate::error::{AppError, Result};
use crate::logging::{Level, WriterConfig, WriterDefaults};
use crate::messaging::BrokerConfig;
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identity reported by health checks and stamped on log records
    pub service: ServiceConfig,

    /// HTTP server configuration
    pub server: ServerConfig,

    /// Broker connection
    #[serde(default)]
    pub messaging: BrokerConfig,

    /// This process's own log records
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Consumer side of the log exchange
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> std::result::Result<Self, config::ConfigError> {
        let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string());

        config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables (prefix: STATUS_PAGE_)
            .add_source(
                config::Environment::with_prefix("STATUS_PAGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Reject values the services cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.service.name.trim().is_empty() {
            return Err(AppError::Validation("service.name must not be empty".to_string()));
        }
        if self.messaging.url.trim().is_empty() {
            return Err(AppError::Validation("messaging.url must not be empty".to_string()));
        }
        if self.messaging.connect_timeout_ms == 0 {
            return Err(AppError::Validation(
                "messaging.connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.aggregator.app_queue == self.aggregator.request_queue {
            return Err(AppError::Validation(format!(
                "aggregator queues must differ, both are '{}'",
                self.aggregator.app_queue
            )));
        }

        // sled locks its directory, so every store writer needs its own path
        let mut store_paths = Vec::new();
        for writer in self
            .aggregator
            .app_writers
            .iter()
            .chain(&self.aggregator.request_writers)
        {
            if let Some(path) = writer.store_path() {
                if store_paths.contains(&path) {
                    return Err(AppError::Validation(format!(
                        "store writers must use distinct paths, {} is used twice",
                        path.display()
                    )));
                }
                store_paths.push(path);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,

    #[serde(default = "default_environment")]
    pub environment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_http_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Maximum severity emitted by this process
    #[serde(default)]
    pub level: Level,

    /// Send records to the log exchange instead of the local writers
    #[serde(default)]
    pub publish: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            publish: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Default level for writers without their own
    #[serde(default = "default_aggregator_level")]
    pub level: Level,

    #[serde(default = "default_app_queue")]
    pub app_queue: String,

    #[serde(default = "default_request_queue")]
    pub request_queue: String,

    /// Writers for application records
    #[serde(default = "default_writers", alias = "writers")]
    pub app_writers: Vec<WriterConfig>,

    /// Writers for HTTP request records
    #[serde(default = "default_writers")]
    pub request_writers: Vec<WriterConfig>,
}

impl AggregatorConfig {
    pub fn app_writer_defaults(&self) -> WriterDefaults {
        WriterDefaults::app(self.level)
    }

    pub fn request_writer_defaults(&self) -> WriterDefaults {
        WriterDefaults::request(self.level)
    }

    pub fn queue_names(&self, exchange: &str) -> QueueNames {
        QueueNames {
            exchange: exchange.to_string(),
            app_queue: self.app_queue.clone(),
            request_queue: self.request_queue.clone(),
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            level: default_aggregator_level(),
            app_queue: default_app_queue(),
            request_queue: default_request_queue(),
            app_writers: default_writers(),
            request_writers: default_writers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            json_logs: false,
            prometheus_enabled: true,
        }
    }
}

fn default_service_name() -> String {
    "logger".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    3000
}

fn default_aggregator_level() -> Level {
    Level::Debug
}

fn default_app_queue() -> String {
    "applog".to_string()
}

fn default_request_queue() -> String {
    "reqlog".to_string()
}

fn default_writers() -> Vec<WriterConfig> {
    vec![WriterConfig::console()]
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::WriterTarget;
    use crate::messaging::BrokerBackend;

    fn embedded() -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_default_config_values() {
        assert_eq!(default_http_port(), 3000);
        assert_eq!(default_app_queue(), "applog");
        assert_eq!(default_request_queue(), "reqlog");
        assert!(default_true());
    }

    #[test]
    fn test_embedded_defaults() {
        let config = embedded();
        assert_eq!(config.service.name, "logger");
        assert_eq!(config.messaging.backend, BrokerBackend::Amqp);
        assert_eq!(config.messaging.connect_timeout_ms, 5000);
        assert_eq!(config.messaging.exchange, "logs");
        assert_eq!(config.aggregator.level, Level::Debug);
        assert_eq!(config.logging.level, Level::Info);
        assert!(matches!(config.aggregator.app_writers[0].target, WriterTarget::Console));
        assert!(matches!(config.aggregator.request_writers[0].target, WriterTarget::Console));
        config.validate().unwrap();
    }

    #[test]
    fn test_writer_defaults_differ_per_kind() {
        let config = AggregatorConfig::default();
        let app = config.app_writer_defaults();
        let request = config.request_writer_defaults();
        assert_eq!(app.level, Level::Debug);
        assert_ne!(app.file_prefix, request.file_prefix);
        assert_ne!(app.collection, request.collection);
    }

    #[test]
    fn test_validate_rejects_shared_store_path() {
        let mut config = embedded();
        config.aggregator.app_writers = vec![WriterConfig::store("/var/lib/status/logs")];
        config.aggregator.request_writers = vec![WriterConfig::store("/var/lib/status/logs")];
        assert!(matches!(config.validate(), Err(AppError::Validation(_))));

        config.aggregator.request_writers = vec![WriterConfig::store("/var/lib/status/requests")];
        config.validate().unwrap();
    }

    #[test]
    fn test_legacy_writers_key_feeds_app_writers() {
        let config: AggregatorConfig = serde_json::from_value(serde_json::json!({
            "writers": [{"kind": "file", "directory": "/var/log/status"}]
        }))
        .unwrap();
        assert!(matches!(config.app_writers[0].target, WriterTarget::File { .. }));
        assert!(matches!(config.request_writers[0].target, WriterTarget::Console));
    }

    #[test]
    fn test_validate_rejects_shared_queue() {
        let mut config = embedded();
        config.aggregator.request_queue = config.aggregator.app_queue.clone();
        assert!(matches!(config.validate(), Err(AppError::Validation(_))));
    }
}
