use std::time::Duration;

use common_kafka::config::{ConfigError, KafkaConfig};
use envconfig::Envconfig;
use tracing::Level;

#[derive(Envconfig, Debug, Clone)]
pub struct MonitorConfig {
    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(from = "KAFKA_CONSUMERGROUP")]
    pub kafka_consumer_group: String,

    #[envconfig(from = "KAFKA_TOPIC")]
    pub kafka_topic: String,

    #[envconfig(from = "POLL_INTERVAL_MS", default = "30000")]
    pub poll_interval_ms: u64,

    // Samples retained before the rules engine gets a say; 60 samples at
    // the default cadence is a 30-minute window
    #[envconfig(from = "WINDOW_SIZE", default = "60")]
    pub window_size: usize,

    #[envconfig(from = "MAX_CONSECUTIVE_FAILURES", default = "3")]
    pub max_consecutive_failures: u32,

    #[envconfig(from = "COMMITTED_TIMEOUT_MS", default = "20000")]
    pub committed_timeout_ms: u64,

    #[envconfig(from = "WATERMARK_TIMEOUT_MS", default = "40000")]
    pub watermark_timeout_ms: u64,

    #[envconfig(from = "METADATA_TIMEOUT_MS", default = "10000")]
    pub metadata_timeout_ms: u64,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: Level,

    #[envconfig(from = "METRICS_PORT", default = "9090")]
    pub metrics_port: u16,
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn committed_timeout(&self) -> Duration {
        Duration::from_millis(self.committed_timeout_ms)
    }

    pub fn watermark_timeout(&self) -> Duration {
        Duration::from_millis(self.watermark_timeout_ms)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.kafka.validate()?;
        if self.kafka_topic.trim().is_empty() {
            return Err(ConfigError::NoTopics);
        }
        if self.window_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "window_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_consecutive_failures",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
