use std::str::FromStr;

use envconfig::Envconfig;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("broker address {0:?} is neither a URI with an authority nor host:port")]
    InvalidBrokerAddress(String),
    #[error("no brokers configured")]
    NoBrokers,
    #[error("no topics configured")]
    NoTopics,
    #[error("client id must not be empty")]
    EmptyClientId,
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Producer acknowledgement level, mapped onto librdkafka's `acks` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acks {
    All,
    Leader,
    None,
}

#[derive(Error, Debug)]
#[error("unrecognized acks value {0:?}, expected all, leader or none")]
pub struct ParseAcksError(String);

impl FromStr for Acks {
    type Err = ParseAcksError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" | "-1" => Ok(Acks::All),
            "leader" | "1" => Ok(Acks::Leader),
            "none" | "0" => Ok(Acks::None),
            other => Err(ParseAcksError(other.to_string())),
        }
    }
}

impl Acks {
    pub fn broker_value(self) -> &'static str {
        match self {
            Acks::All => "all",
            Acks::Leader => "1",
            Acks::None => "0",
        }
    }
}

#[derive(Envconfig, Debug, Clone)]
pub struct KafkaConfig {
    #[envconfig(from = "KAFKA_CLIENT_ID", default = "kafka-coordination")]
    pub client_id: String,

    #[envconfig(from = "KAFKA_HOSTS", default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(from = "KAFKA_TLS", default = "false")]
    pub kafka_tls: bool,

    pub kafka_statistics_interval_ms: Option<u32>,

    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic

    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32, // Time before we stop retrying producing a message: 20 seconds

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd

    #[envconfig(default = "all")]
    pub kafka_producer_acks: Acks,
}

impl KafkaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::EmptyClientId);
        }
        validate_broker_list(&self.kafka_hosts)
    }
}

#[derive(Envconfig, Debug, Clone)]
pub struct ConsumerConfig {
    pub kafka_consumer_group: String,

    // Comma-separated list of topics to subscribe to
    pub kafka_consumer_topics: String,

    // We default to "earliest" for this, but if you're bringing up a new service, you probably want "latest"
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest
}

impl ConsumerConfig {
    /// Because the consumer config is so application specific, we
    /// can't set good defaults in the derive macro, so we expose a way
    /// for users to set them here before init'ing their main config struct
    pub fn set_defaults(consumer_group: &str, consumer_topics: &str) {
        if std::env::var("KAFKA_CONSUMER_GROUP").is_err() {
            std::env::set_var("KAFKA_CONSUMER_GROUP", consumer_group);
        }
        if std::env::var("KAFKA_CONSUMER_TOPICS").is_err() {
            std::env::set_var("KAFKA_CONSUMER_TOPICS", consumer_topics);
        }
    }

    pub fn topics(&self) -> Vec<String> {
        self.kafka_consumer_topics
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topics().is_empty() {
            return Err(ConfigError::NoTopics);
        }
        Ok(())
    }
}

static HOST_PORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9.-]*:\d{1,5}$").expect("static regex"));

/// Validate a comma-separated broker list. Each entry must either parse as
/// an absolute URI with a non-empty authority (`kafka://broker:9092`) or
/// match a bare `host:port`.
pub fn validate_broker_list(hosts: &str) -> Result<(), ConfigError> {
    let entries: Vec<&str> = hosts
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .collect();
    if entries.is_empty() {
        return Err(ConfigError::NoBrokers);
    }
    for entry in entries {
        if !broker_entry_is_valid(entry) {
            return Err(ConfigError::InvalidBrokerAddress(entry.to_string()));
        }
    }
    Ok(())
}

fn broker_entry_is_valid(entry: &str) -> bool {
    // `Url::parse("broker:9092")` succeeds with "broker" as the scheme and
    // no host, so a bare host:port has to be caught by the regex fallback.
    if let Ok(url) = Url::parse(entry) {
        if url.host_str().is_some_and(|h| !h.is_empty()) {
            return true;
        }
    }
    HOST_PORT_RE.is_match(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_port_is_valid() {
        assert!(validate_broker_list("localhost:9092").is_ok());
        assert!(validate_broker_list("kafka-0.kafka.svc.cluster.local:9092").is_ok());
        assert!(validate_broker_list("broker-a:9092,broker-b:9093").is_ok());
    }

    #[test]
    fn uri_with_authority_is_valid() {
        assert!(validate_broker_list("kafka://broker:9092").is_ok());
        assert!(validate_broker_list("plaintext://10.0.0.1:9092").is_ok());
    }

    #[test]
    fn garbage_brokers_are_rejected() {
        assert!(matches!(
            validate_broker_list("not a broker"),
            Err(ConfigError::InvalidBrokerAddress(_))
        ));
        assert!(matches!(
            validate_broker_list("localhost"),
            Err(ConfigError::InvalidBrokerAddress(_))
        ));
        assert!(matches!(validate_broker_list(""), Err(ConfigError::NoBrokers)));
        assert!(matches!(validate_broker_list(" , "), Err(ConfigError::NoBrokers)));
    }

    #[test]
    fn acks_parse_round_trip() {
        assert_eq!("all".parse::<Acks>().unwrap(), Acks::All);
        assert_eq!("-1".parse::<Acks>().unwrap(), Acks::All);
        assert_eq!("Leader".parse::<Acks>().unwrap(), Acks::Leader);
        assert_eq!("0".parse::<Acks>().unwrap(), Acks::None);
        assert!("two".parse::<Acks>().is_err());
        assert_eq!(Acks::All.broker_value(), "all");
        assert_eq!(Acks::Leader.broker_value(), "1");
        assert_eq!(Acks::None.broker_value(), "0");
    }

    #[test]
    fn topics_split_ignores_blanks() {
        let config = ConsumerConfig {
            kafka_consumer_group: "group".to_string(),
            kafka_consumer_topics: "events, audit ,".to_string(),
            kafka_consumer_offset_reset: "earliest".to_string(),
        };
        assert_eq!(config.topics(), vec!["events", "audit"]);
        assert!(config.validate().is_ok());

        let empty = ConsumerConfig {
            kafka_consumer_topics: " ,".to_string(),
            ..config
        };
        assert!(matches!(empty.validate(), Err(ConfigError::NoTopics)));
    }
}
