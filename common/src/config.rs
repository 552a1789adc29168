// Configuration management with layered configuration (file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub nats: NatsSettings,
    pub handler: HandlerSettings,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsSettings {
    pub url: String,
    pub connection_name: String,
    #[serde(default = "default_ack_timeout_seconds")]
    pub ack_timeout_seconds: u64,
}

fn default_ack_timeout_seconds() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerSettings {
    /// Topic receiving an entry for every delivered schedule
    pub history_topic: String,
    /// Subject the scheduler publishes trigger events on
    pub trigger_subject: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub metrics_port: u16,
    pub tracing_endpoint: Option<String>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Local overrides, not committed
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.nats.url.is_empty() {
            return Err("NATS URL cannot be empty".to_string());
        }
        if self.nats.ack_timeout_seconds == 0 {
            return Err("NATS ack_timeout_seconds must be greater than 0".to_string());
        }

        if self.handler.history_topic.is_empty() {
            return Err("Handler history_topic cannot be empty".to_string());
        }
        if self.handler.trigger_subject.is_empty() {
            return Err("Handler trigger_subject cannot be empty".to_string());
        }

        if self.observability.metrics_port == 0 {
            return Err("Metrics port must be greater than 0".to_string());
        }

        Ok(())
    }

    pub fn nats_config(&self) -> crate::queue::NatsConfig {
        crate::queue::NatsConfig {
            url: self.nats.url.clone(),
            connection_name: self.nats.connection_name.clone(),
            ack_timeout_seconds: self.nats.ack_timeout_seconds,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            nats: NatsSettings {
                url: "nats://localhost:4222".to_string(),
                connection_name: "scheduler-handler".to_string(),
                ack_timeout_seconds: default_ack_timeout_seconds(),
            },
            handler: HandlerSettings {
                history_topic: "schedules-history".to_string(),
                trigger_subject: "schedules.triggered".to_string(),
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: 9090,
                tracing_endpoint: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_catches_empty_nats_url() {
        let mut settings = Settings::default();
        settings.nats.url = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_empty_history_topic() {
        let mut settings = Settings::default();
        settings.handler.history_topic = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_zero_metrics_port() {
        let mut settings = Settings::default();
        settings.observability.metrics_port = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_nats_config_from_settings() {
        let settings = Settings::default();
        let nats = settings.nats_config();
        assert_eq!(nats.url, settings.nats.url);
        assert_eq!(nats.ack_timeout_seconds, 30);
    }

    #[test]
    fn test_load_from_path_reads_default_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            r#"
[nats]
url = "nats://broker:4222"
connection_name = "handler-test"

[handler]
history_topic = "history"
trigger_subject = "triggers"

[observability]
log_level = "debug"
metrics_port = 9100
"#,
        )
        .unwrap();

        let settings = Settings::load_from_path(dir.path()).unwrap();
        assert_eq!(settings.nats.url, "nats://broker:4222");
        assert_eq!(settings.nats.ack_timeout_seconds, 30);
        assert_eq!(settings.handler.history_topic, "history");
        assert!(settings.validate().is_ok());
    }
}
