use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use common_kafka::kafka_consumer::create_consumer;
use common_kafka::rebalance::AssignmentBroadcaster;
use envconfig::Envconfig;
use lag_monitor::config::MonitorConfig;
use lag_monitor::monitor::{LagMonitor, LoggingVerdictHandler};
use lag_monitor::sampler::ProgressSampler;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from environment variables
    let config = MonitorConfig::init_from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    // Setup tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_max_level(config.log_level)
        .init();

    info!("Starting lag-monitor with config: {:?}", config);

    lag_monitor::metrics::register_metrics();

    // Setup Prometheus metrics exporter
    let metrics_addr = format!("0.0.0.0:{}", config.metrics_port).parse::<SocketAddr>()?;
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!("Metrics server listening on {}", metrics_addr);

    // An observer consumer: it reads the group's committed cursors but
    // never subscribes, so it does not join the group.
    let consumer = Arc::new(
        create_consumer(
            &config.kafka,
            &config.kafka_consumer_group,
            "earliest",
            AssignmentBroadcaster::new(16),
        )
        .context("Failed to create Kafka consumer")?,
    );

    let sampler = ProgressSampler::new(consumer, config.kafka_topic.clone(), &config);
    let verdicts = Arc::new(LoggingVerdictHandler {
        group_id: config.kafka_consumer_group.clone(),
    });
    let monitor = LagMonitor::new(sampler, &config, verdicts);

    info!("Monitoring consumer group: {}", config.kafka_consumer_group);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    monitor.run(shutdown).await.context("lag monitor terminated")?;
    Ok(())
}
