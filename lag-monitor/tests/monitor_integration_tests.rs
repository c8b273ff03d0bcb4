use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use batch_dispatcher::{
    Batch, BatchDispatcher, BatchProcessor, DispatcherConfig, DispatcherHandle,
};
use common_kafka::config::{Acks, ConsumerConfig, KafkaConfig};
use common_kafka::kafka_consumer::create_consumer;
use common_kafka::offset::OffsetValue;
use common_kafka::rebalance::AssignmentBroadcaster;
use lag_monitor::config::MonitorConfig;
use lag_monitor::monitor::{LagMonitor, VerdictHandler};
use lag_monitor::rules::Verdict;
use lag_monitor::sampler::ProgressSampler;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use serde::{Deserialize, Serialize};
use tracing::Level;
use uuid::Uuid;

const TEST_TOPIC_BASE: &str = "lag-monitor-integration-test";

fn broker() -> String {
    std::env::var("TEST_KAFKA_BROKER").unwrap_or_else(|_| "localhost:9092".to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TestEvent {
    message_id: i64,
}

fn kafka_config() -> KafkaConfig {
    KafkaConfig {
        client_id: "lag-monitor-tests".to_string(),
        kafka_hosts: broker(),
        kafka_tls: false,
        kafka_statistics_interval_ms: None,
        kafka_producer_linger_ms: 20,
        kafka_producer_queue_mib: 400,
        kafka_message_timeout_ms: 20000,
        kafka_compression_codec: "none".to_string(),
        kafka_producer_acks: Acks::All,
    }
}

fn monitor_config(topic: &str, group_id: &str, window_size: usize) -> MonitorConfig {
    MonitorConfig {
        kafka: kafka_config(),
        kafka_consumer_group: group_id.to_string(),
        kafka_topic: topic.to_string(),
        poll_interval_ms: 500,
        window_size,
        max_consecutive_failures: 3,
        committed_timeout_ms: 20000,
        watermark_timeout_ms: 40000,
        metadata_timeout_ms: 10000,
        log_level: Level::INFO,
        metrics_port: 0,
    }
}

async fn create_topic_with_partitions(topic: &str, num_partitions: i32) -> Result<()> {
    let admin_client: AdminClient<DefaultClientContext> = ClientConfig::new()
        .set("bootstrap.servers", broker())
        .create()?;

    let new_topic = NewTopic::new(topic, num_partitions, TopicReplication::Fixed(1));
    let opts = AdminOptions::new().operation_timeout(Some(Duration::from_secs(5)));

    let results = admin_client.create_topics(&[new_topic], &opts).await?;
    for result in results {
        match result {
            Ok(_) => {}
            Err((_, rdkafka::types::RDKafkaErrorCode::TopicAlreadyExists)) => {}
            Err((topic_name, err)) => {
                return Err(anyhow::anyhow!(
                    "Failed to create topic {topic_name}: {err:?}"
                ));
            }
        }
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    Ok(())
}

async fn produce_to_partition(topic: &str, partition: i32, count: i64) -> Result<()> {
    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", broker())
        .set("message.timeout.ms", "5000")
        .create()?;

    for message_id in 0..count {
        let payload = serde_json::to_string(&TestEvent { message_id })?;
        let key = message_id.to_string();
        let record = FutureRecord::to(topic)
            .key(&key)
            .payload(&payload)
            .partition(partition);
        producer
            .send(record, Timeout::After(Duration::from_secs(5)))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to send message: {e}"))?;
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}

#[tokio::test]
#[ignore] // Requires a running Kafka broker; run with: cargo test -- --ignored
async fn sampler_observes_watermarks_without_joining_the_group() -> Result<()> {
    let topic = format!("{}-{}", TEST_TOPIC_BASE, Uuid::now_v7());
    let group_id = format!("observer-{}", Uuid::now_v7());
    create_topic_with_partitions(&topic, 2).await?;

    produce_to_partition(&topic, 0, 10).await?;
    produce_to_partition(&topic, 1, 5).await?;

    let config = monitor_config(&topic, &group_id, 3);
    let consumer = Arc::new(create_consumer(
        &config.kafka,
        &group_id,
        "earliest",
        AssignmentBroadcaster::new(4),
    )?);
    let sampler = ProgressSampler::new(consumer, topic.clone(), &config);

    let samples = sampler.sample()?;
    assert_eq!(samples.len(), 2, "expected one sample per partition");

    let p0 = samples.iter().find(|s| s.partition == 0).unwrap();
    assert_eq!(p0.high_watermark, OffsetValue::Valid(10));
    assert!(p0.consumer_offset.is_missing(), "group never committed");
    assert_eq!(p0.lag, 10, "never-committed lag is high minus earliest");

    let p1 = samples.iter().find(|s| s.partition == 1).unwrap();
    assert_eq!(p1.high_watermark, OffsetValue::Valid(5));
    assert_eq!(p1.lag, 5);

    Ok(())
}

struct CountingProcessor {
    handled: Arc<AtomicUsize>,
}

#[async_trait]
impl BatchProcessor<TestEvent> for CountingProcessor {
    async fn process_batch(
        &self,
        _consumer: &DispatcherHandle,
        batch: Batch<TestEvent>,
    ) -> Result<()> {
        self.handled.fetch_add(batch.len(), Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone, Default)]
struct CapturingVerdicts {
    latest: Arc<Mutex<Option<BTreeMap<i32, Verdict>>>>,
}

impl VerdictHandler for CapturingVerdicts {
    fn on_verdicts(&self, _topic: &str, verdicts: &BTreeMap<i32, Verdict>) {
        *self.latest.lock().unwrap() = Some(verdicts.clone());
    }
}

#[tokio::test]
#[ignore] // Requires a running Kafka broker; run with: cargo test -- --ignored
async fn monitor_reports_healthy_for_a_caught_up_group() -> Result<()> {
    let topic = format!("{}-{}", TEST_TOPIC_BASE, Uuid::now_v7());
    let group_id = format!("healthy-{}", Uuid::now_v7());
    create_topic_with_partitions(&topic, 1).await?;
    produce_to_partition(&topic, 0, 20).await?;

    let handled = Arc::new(AtomicUsize::new(0));
    let dispatcher_config = DispatcherConfig {
        kafka: kafka_config(),
        consumer: ConsumerConfig {
            kafka_consumer_group: group_id.clone(),
            kafka_consumer_topics: topic.clone(),
            kafka_consumer_offset_reset: "earliest".to_string(),
        },
        max_batch_size: 10,
        poll_batch_timeout_ms: 100,
        worker_count: 2,
        commit_interval_ms: 250,
        max_in_flight_bytes: 32 * 1024 * 1024,
    };
    let handle = BatchDispatcher::start(
        dispatcher_config,
        CountingProcessor {
            handled: handled.clone(),
        },
    )?;

    let verdicts = CapturingVerdicts::default();
    let monitor = LagMonitor::for_dispatcher(
        &handle,
        &monitor_config(&topic, &group_id, 3),
        Arc::new(verdicts.clone()),
    );

    let composition = tokio::spawn(monitor.run_alongside(handle.clone()));

    // wait until the group has consumed, committed, and a full window of
    // healthy samples has been classified
    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    loop {
        if tokio::time::Instant::now() > deadline {
            panic!(
                "no healthy verdict observed; handled={}",
                handled.load(Ordering::SeqCst)
            );
        }
        let latest = verdicts.latest.lock().unwrap().clone();
        if handled.load(Ordering::SeqCst) == 20 {
            if let Some(map) = latest {
                if map.get(&0) == Some(&Verdict::Healthy) {
                    break;
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    handle.stop();
    composition
        .await
        .expect("composition task should not panic")?;

    Ok(())
}
