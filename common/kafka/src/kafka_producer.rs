use futures::future::join_all;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{ClientConfig, ClientContext, Statistics};
use serde::Serialize;
use serde_json::error::Error as SerdeError;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;

pub struct ProducerStatsContext;

impl ClientContext for ProducerStatsContext {
    fn stats(&self, statistics: Statistics) {
        metrics::counter!(crate::kafka_consumer::CLIENT_STATS_EVENTS).increment(1);
        debug!(name = %statistics.name, "librdkafka statistics tick");
    }
}

pub async fn create_kafka_producer(
    config: &KafkaConfig,
) -> Result<FutureProducer<ProducerStatsContext>, KafkaError> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("client.id", &config.client_id)
        .set("acks", config.kafka_producer_acks.broker_value())
        .set("linger.ms", config.kafka_producer_linger_ms.to_string())
        .set(
            "message.timeout.ms",
            config.kafka_message_timeout_ms.to_string(),
        )
        .set(
            "compression.codec",
            config.kafka_compression_codec.to_owned(),
        )
        .set(
            "queue.buffering.max.kbytes",
            (config.kafka_producer_queue_mib * 1024).to_string(),
        );

    if let Some(interval) = config.kafka_statistics_interval_ms {
        client_config.set("statistics.interval.ms", interval.to_string());
    }

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    }

    debug!("rdkafka configuration: {:?}", client_config);
    let api: FutureProducer<ProducerStatsContext> =
        client_config.create_with_context(ProducerStatsContext)?;

    // "Ping" the Kafka brokers by requesting metadata
    match api
        .client()
        .fetch_metadata(None, std::time::Duration::from_secs(2))
    {
        Ok(metadata) => {
            info!(
                "Successfully connected to Kafka brokers. Found {} topics.",
                metadata.topics().len()
            );
        }
        Err(err) => {
            error!("Failed to fetch metadata from Kafka brokers: {:?}", err);
            return Err(err);
        }
    }

    Ok(api)
}

#[derive(Error, Debug)]
pub enum ProduceError {
    #[error("failed to serialize: {error}")]
    SerializationError { error: SerdeError },
    #[error("failed to produce to kafka: {error}")]
    KafkaProduceError { error: KafkaError },
    #[error("failed to produce to kafka (timeout)")]
    KafkaProduceCanceled,
}

/// Serialize each `(key, value)` pair to JSON, produce all records, and
/// await every delivery confirmation.
pub async fn send_keyed_iter_to_kafka<T>(
    kafka_producer: &FutureProducer<ProducerStatsContext>,
    topic: &str,
    iter: impl IntoIterator<Item = (Option<String>, T)>,
) -> Result<(), ProduceError>
where
    T: Serialize,
{
    let mut payloads = Vec::new();

    for (key, value) in iter {
        let payload = serde_json::to_string(&value)
            .map_err(|e| ProduceError::SerializationError { error: e })?;
        payloads.push((key, payload));
    }

    if payloads.is_empty() {
        return Ok(());
    }

    let mut delivery_futures = Vec::new();

    for (key, payload) in &payloads {
        match kafka_producer.send_result(FutureRecord {
            topic,
            payload: Some(payload),
            partition: None,
            key: key.as_ref(),
            timestamp: None,
            headers: None,
        }) {
            Ok(future) => delivery_futures.push(future),
            Err((error, _)) => return Err(ProduceError::KafkaProduceError { error }),
        }
    }

    for result in join_all(delivery_futures).await {
        match result {
            Ok(Ok(_)) => {}
            Ok(Err((error, _))) => return Err(ProduceError::KafkaProduceError { error }),
            Err(_) => {
                // Cancelled due to timeout while retrying
                return Err(ProduceError::KafkaProduceCanceled);
            }
        }
    }

    Ok(())
}
