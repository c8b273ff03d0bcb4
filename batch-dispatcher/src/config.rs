use std::time::Duration;

use common_kafka::config::{ConfigError, ConsumerConfig, KafkaConfig};
use envconfig::Envconfig;

#[derive(Envconfig, Debug, Clone)]
pub struct DispatcherConfig {
    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    #[envconfig(nested = true)]
    pub consumer: ConsumerConfig,

    // Upper bound on the number of messages handed to the processor at once
    #[envconfig(default = "1000")]
    pub max_batch_size: usize,

    // How long the poll loop waits to fill a mixed batch before splitting
    // it by partition
    #[envconfig(default = "100")]
    pub poll_batch_timeout_ms: u64,

    // 0 means one worker per core
    #[envconfig(default = "0")]
    pub worker_count: usize,

    #[envconfig(default = "5000")]
    pub commit_interval_ms: u64,

    // Byte budget for batches queued or being handled; the poll loop stalls
    // once it is exhausted
    #[envconfig(default = "33554432")]
    pub max_in_flight_bytes: usize,
}

impl DispatcherConfig {
    pub fn poll_batch_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_batch_timeout_ms)
    }

    pub fn commit_interval(&self) -> Duration {
        Duration::from_millis(self.commit_interval_ms)
    }

    pub fn effective_worker_count(&self) -> usize {
        if self.worker_count == 0 {
            num_cpus::get()
        } else {
            self.worker_count
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.kafka.validate()?;
        self.consumer.validate()?;
        if self.max_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_in_flight_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_in_flight_bytes",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> DispatcherConfig {
        DispatcherConfig {
            kafka: KafkaConfig {
                client_id: "dispatcher-test".to_string(),
                kafka_hosts: "localhost:9092".to_string(),
                kafka_tls: false,
                kafka_statistics_interval_ms: None,
                kafka_producer_linger_ms: 20,
                kafka_producer_queue_mib: 400,
                kafka_message_timeout_ms: 20000,
                kafka_compression_codec: "none".to_string(),
                kafka_producer_acks: common_kafka::config::Acks::All,
            },
            consumer: ConsumerConfig {
                kafka_consumer_group: "dispatcher-test".to_string(),
                kafka_consumer_topics: "events".to_string(),
                kafka_consumer_offset_reset: "earliest".to_string(),
            },
            max_batch_size: 1000,
            poll_batch_timeout_ms: 100,
            worker_count: 0,
            commit_interval_ms: 5000,
            max_in_flight_bytes: 32 * 1024 * 1024,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
        assert!(base_config().effective_worker_count() >= 1);
    }

    #[test]
    fn empty_topics_fail_validation() {
        let mut config = base_config();
        config.consumer.kafka_consumer_topics = "".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::NoTopics)));
    }

    #[test]
    fn bad_broker_uri_fails_validation() {
        let mut config = base_config();
        config.kafka.kafka_hosts = "no spaces allowed".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBrokerAddress(_))
        ));
    }

    #[test]
    fn zero_batch_size_fails_validation() {
        let mut config = base_config();
        config.max_batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "max_batch_size"
        ));
    }
}
