use std::sync::Arc;

use rdkafka::consumer::{BaseConsumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::{ClientConfig, ClientContext, Statistics};
use tracing::{debug, warn};

use crate::config::KafkaConfig;
use crate::rebalance::RebalanceHandler;

pub const CLIENT_STATS_EVENTS: &str = "kafka_client_stats_events_total";

/// Consumer context that forwards rebalance callbacks to a
/// [`RebalanceHandler`] and counts statistics ticks as a liveness signal.
pub struct TrackedConsumerContext {
    handler: Arc<dyn RebalanceHandler>,
}

impl TrackedConsumerContext {
    pub fn new(handler: Arc<dyn RebalanceHandler>) -> Self {
        Self { handler }
    }
}

impl ClientContext for TrackedConsumerContext {
    fn stats(&self, statistics: Statistics) {
        // The callback firing at all means the librdkafka poll loop is alive.
        metrics::counter!(CLIENT_STATS_EVENTS).increment(1);
        debug!(name = %statistics.name, "librdkafka statistics tick");
    }
}

impl ConsumerContext for TrackedConsumerContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(partitions) = rebalance {
            // Rebalance callbacks arrive on the driver thread; handler
            // futures must complete without external wakeups.
            if let Err(err) =
                futures::executor::block_on(self.handler.on_partitions_revoked(partitions))
            {
                warn!(error = ?err, "partition revoke handler failed");
            }
        }
    }

    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(partitions) => {
                debug!(count = partitions.count(), "partitions assigned");
                if let Err(err) =
                    futures::executor::block_on(self.handler.on_partitions_assigned(partitions))
                {
                    warn!(error = ?err, "partition assign handler failed");
                }
            }
            Rebalance::Revoke(_) => {}
            Rebalance::Error(err) => warn!(error = %err, "rebalance error"),
        }
    }
}

/// Build a manually-committed stream consumer for the given group.
///
/// The consumer is not subscribed to anything; callers decide whether to
/// subscribe (the dispatcher) or to only inspect group state (the lag
/// monitor's sampler).
pub fn create_consumer(
    config: &KafkaConfig,
    group_id: &str,
    offset_reset: &str,
    handler: Arc<dyn RebalanceHandler>,
) -> Result<StreamConsumer<TrackedConsumerContext>, KafkaError> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_hosts)
        .set("client.id", &config.client_id)
        .set("group.id", group_id)
        .set("enable.auto.commit", "false")
        .set("enable.auto.offset.store", "false")
        .set("enable.partition.eof", "false")
        .set("auto.offset.reset", offset_reset)
        .set("session.timeout.ms", "6000")
        .set("heartbeat.interval.ms", "2000");

    if let Some(interval) = config.kafka_statistics_interval_ms {
        client_config.set("statistics.interval.ms", interval.to_string());
    }

    if config.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    }

    debug!("rdkafka configuration: {:?}", client_config);
    let consumer: StreamConsumer<TrackedConsumerContext> =
        client_config.create_with_context(TrackedConsumerContext::new(handler))?;
    Ok(consumer)
}
