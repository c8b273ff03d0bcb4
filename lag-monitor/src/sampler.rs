use std::sync::Arc;
use std::time::Duration;

use common_kafka::kafka_consumer::TrackedConsumerContext;
use common_kafka::offset::OffsetValue;
use metrics::counter;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::TopicPartitionList;
use thiserror::Error;
use tracing::warn;

use crate::config::MonitorConfig;
use crate::metrics::PARTITIONS_SKIPPED;
use crate::sample::PartitionProgress;

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("failed to read current assignment: {0}")]
    Assignment(#[source] KafkaError),
    #[error("failed to fetch metadata for topic {topic}: {source}")]
    Metadata {
        topic: String,
        #[source]
        source: KafkaError,
    },
    #[error("topic {0} is unknown to the cluster")]
    UnknownTopic(String),
    #[error("failed to fetch committed offsets: {0}")]
    Committed(#[source] KafkaError),
}

/// Observes committed, earliest and high-watermark offsets for one topic
/// through an existing consumer handle.
///
/// The sampler never subscribes and never joins the group; it only reads
/// state, so it is safe to point at a live dispatcher's consumer or at a
/// standalone observer consumer. The broker round-trips block the caller
/// for up to the configured timeouts.
pub struct ProgressSampler {
    consumer: Arc<StreamConsumer<TrackedConsumerContext>>,
    topic: String,
    committed_timeout: Duration,
    watermark_timeout: Duration,
    metadata_timeout: Duration,
}

impl ProgressSampler {
    pub fn new(
        consumer: Arc<StreamConsumer<TrackedConsumerContext>>,
        topic: String,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            consumer,
            topic,
            committed_timeout: config.committed_timeout(),
            watermark_timeout: config.watermark_timeout(),
            metadata_timeout: config.metadata_timeout(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Sample every partition of the topic. Partitions whose committed or
    /// watermark lookup fails individually are skipped for this window.
    pub fn sample(&self) -> Result<Vec<PartitionProgress>, SamplerError> {
        let partitions = self.partitions_to_sample()?;
        if partitions.is_empty() {
            return Ok(Vec::new());
        }

        let mut tpl = TopicPartitionList::new();
        for partition in &partitions {
            tpl.add_partition(&self.topic, *partition);
        }
        let committed = self
            .consumer
            .committed_offsets(tpl, self.committed_timeout)
            .map_err(SamplerError::Committed)?;

        let mut samples = Vec::with_capacity(partitions.len());
        for element in committed.elements() {
            let partition = element.partition();
            if let Err(err) = element.error() {
                warn!(
                    topic = %self.topic,
                    partition,
                    error = %err,
                    "committed offset lookup failed, skipping partition for this window"
                );
                counter!(PARTITIONS_SKIPPED).increment(1);
                continue;
            }
            let consumer_offset = OffsetValue::from_rdkafka(element.offset());

            match self
                .consumer
                .fetch_watermarks(&self.topic, partition, self.watermark_timeout)
            {
                Ok((low, high)) => samples.push(PartitionProgress::new(
                    partition,
                    consumer_offset,
                    OffsetValue::from_raw(low),
                    OffsetValue::from_raw(high),
                )),
                Err(err) => {
                    warn!(
                        topic = %self.topic,
                        partition,
                        error = %err,
                        "watermark lookup failed, skipping partition for this window"
                    );
                    counter!(PARTITIONS_SKIPPED).increment(1);
                }
            }
        }

        samples.sort_by_key(|s| s.partition);
        Ok(samples)
    }

    /// The consumer's current assignment for the topic, or the cluster's
    /// partition list when the consumer has none (observer mode, or a
    /// subscription that has not been assigned yet).
    fn partitions_to_sample(&self) -> Result<Vec<i32>, SamplerError> {
        let assignment = self
            .consumer
            .assignment()
            .map_err(SamplerError::Assignment)?;
        let mut partitions: Vec<i32> = assignment
            .elements()
            .iter()
            .filter(|e| e.topic() == self.topic)
            .map(|e| e.partition())
            .collect();

        if partitions.is_empty() {
            let metadata = self
                .consumer
                .fetch_metadata(Some(self.topic.as_str()), self.metadata_timeout)
                .map_err(|source| SamplerError::Metadata {
                    topic: self.topic.clone(),
                    source,
                })?;
            let topic_meta = metadata
                .topics()
                .iter()
                .find(|t| t.name() == self.topic)
                .ok_or_else(|| SamplerError::UnknownTopic(self.topic.clone()))?;
            partitions = topic_meta.partitions().iter().map(|p| p.id()).collect();
        }

        partitions.sort_unstable();
        Ok(partitions)
    }
}
