use metrics::{describe_counter, describe_gauge, gauge};

use crate::rules::Verdict;

// Metrics constants
pub const METRIC_CONSUMER_LAG: &str = "consumer_lag";
pub const METRIC_PARTITION_STATUS: &str = "consumer_partition_status";
pub const SAMPLER_FAILURES: &str = "lag_monitor_sampler_failures";
pub const PARTITIONS_SKIPPED: &str = "lag_monitor_partitions_skipped";

/// Register all metrics with descriptions
pub fn register_metrics() {
    describe_gauge!(
        METRIC_CONSUMER_LAG,
        "Number of messages behind for the consumer group"
    );
    describe_gauge!(
        METRIC_PARTITION_STATUS,
        "Rules engine verdict per partition: 0 healthy, 1 stalled, 2 lagging"
    );
    describe_counter!(
        SAMPLER_FAILURES,
        "Failed attempts to sample consumer progress"
    );
    describe_counter!(
        PARTITIONS_SKIPPED,
        "Partitions skipped for a window because an offset lookup failed"
    );
}

/// Record the consumer lag count metric
pub fn record_partition_lag(topic: &str, partition: i32, consumergroup: &str, lag: i64) {
    gauge!(METRIC_CONSUMER_LAG,
        "topic" => topic.to_string(),
        "partition" => format!("{partition}"),
        "consumergroup" => consumergroup.to_string(),
    )
    .set(lag as f64);
}

/// Record the rules engine verdict for a partition
pub fn record_partition_status(topic: &str, partition: i32, consumergroup: &str, verdict: Verdict) {
    let status = match verdict {
        Verdict::Healthy => 0.0,
        Verdict::Stalled { .. } => 1.0,
        Verdict::Lagging => 2.0,
    };
    gauge!(METRIC_PARTITION_STATUS,
        "topic" => topic.to_string(),
        "partition" => format!("{partition}"),
        "consumergroup" => consumergroup.to_string(),
    )
    .set(status);
}
