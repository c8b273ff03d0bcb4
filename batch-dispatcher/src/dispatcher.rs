use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use common_kafka::config::ConfigError;
use common_kafka::kafka_consumer::{create_consumer, TrackedConsumerContext};
use common_kafka::rebalance::AssignmentBroadcaster;
use common_kafka::types::Partition;
use metrics::counter;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{Message, OwnedMessage};
use rdkafka::{Offset, TopicPartitionList};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::DispatcherConfig;
use crate::handle::{DispatcherHandle, DispatcherState};
use crate::message::{Batch, DecodedMessage};
use crate::metric_consts::{
    BATCHES_DISCARDED, BATCHES_DISPATCHED, COMMIT_FAILURES, DECODE_FAILURES, HANDLER_FAILURES,
    MESSAGES_DECODED, MESSAGES_HANDLED, RECV_ERRORS,
};
use crate::processor::BatchProcessor;
use crate::tracker::InFlightTracker;

#[derive(Error, Debug)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to create kafka consumer: {0}")]
    Kafka(#[from] KafkaError),
}

pub struct BatchDispatcher;

impl BatchDispatcher {
    /// Validate the configuration, subscribe, and start the pipeline.
    ///
    /// The returned handle controls the dispatcher; the pipeline runs until
    /// [`DispatcherHandle::stop`] is called or the processor returns an
    /// error.
    pub fn start<T, P>(
        config: DispatcherConfig,
        processor: P,
    ) -> Result<DispatcherHandle, StartError>
    where
        T: DeserializeOwned + Send + 'static,
        P: BatchProcessor<T> + 'static,
    {
        config.validate()?;

        let broadcaster = AssignmentBroadcaster::new(16);
        let consumer = Arc::new(create_consumer(
            &config.kafka,
            &config.consumer.kafka_consumer_group,
            &config.consumer.kafka_consumer_offset_reset,
            broadcaster.clone(),
        )?);

        let topics = config.consumer.topics();
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topic_refs)?;

        info!(
            topics = ?topics,
            group_id = %config.consumer.kafka_consumer_group,
            workers = config.effective_worker_count(),
            max_batch_size = config.max_batch_size,
            "kafka dispatcher subscribed"
        );

        let handle = DispatcherHandle::new(consumer.clone(), broadcaster.sender());
        let tracker = Arc::new(InFlightTracker::new(config.max_in_flight_bytes));
        let processor: Arc<dyn BatchProcessor<T>> = Arc::new(processor);

        tokio::spawn(run(config, consumer, tracker, handle.clone(), processor));

        Ok(handle)
    }
}

async fn run<T>(
    config: DispatcherConfig,
    consumer: Arc<StreamConsumer<TrackedConsumerContext>>,
    tracker: Arc<InFlightTracker<T>>,
    handle: DispatcherHandle,
    processor: Arc<dyn BatchProcessor<T>>,
) where
    T: DeserializeOwned + Send + 'static,
{
    let shutdown = handle.shutdown_token();
    let workers = TaskTracker::new();
    let semaphore = Arc::new(Semaphore::new(config.effective_worker_count()));

    let poll = poll_loop(&config, &consumer, &tracker, &shutdown);
    let schedule = scheduler_loop(&tracker, &semaphore, &workers, &shutdown, &handle, &processor);
    let commit = committer_loop(&consumer, &tracker, &shutdown, config.commit_interval());
    tokio::join!(poll, schedule, commit);

    handle.set_state(DispatcherState::Draining);

    let discarded = tracker.discard_queued();
    if discarded > 0 {
        info!(discarded, "discarded undispatched batches during drain");
        counter!(BATCHES_DISCARDED).increment(discarded as u64);
    }

    workers.close();
    workers.wait().await;

    // everything acknowledged before the drain gets one last synchronous commit
    commit_pending(&consumer, &tracker, CommitMode::Sync);

    let final_state = if handle.is_faulted() {
        DispatcherState::Faulted
    } else {
        DispatcherState::Completed
    };
    handle.set_state(final_state);
    info!(state = ?final_state, "dispatcher drained");
}

async fn poll_loop<T>(
    config: &DispatcherConfig,
    consumer: &StreamConsumer<TrackedConsumerContext>,
    tracker: &InFlightTracker<T>,
    shutdown: &CancellationToken,
) where
    T: DeserializeOwned,
{
    'poll: loop {
        if shutdown.is_cancelled() {
            break;
        }

        let (raw, recv_failed) = collect_raw_batch(
            consumer,
            shutdown,
            config.max_batch_size,
            config.poll_batch_timeout(),
        )
        .await;

        if !raw.is_empty() {
            for batch in split_by_partition::<T>(raw) {
                tokio::select! {
                    _ = shutdown.cancelled() => break 'poll,
                    _ = tracker.enqueue(batch) => {}
                }
            }
        } else if recv_failed {
            // repeated recv failures must not spin the loop
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
        }
    }
    debug!("poll loop exited");
}

/// Pull up to `max_batch_size` records off the wire, giving up after
/// `poll_timeout` without a record so partial batches still ship.
async fn collect_raw_batch(
    consumer: &StreamConsumer<TrackedConsumerContext>,
    shutdown: &CancellationToken,
    max_batch_size: usize,
    poll_timeout: Duration,
) -> (Vec<OwnedMessage>, bool) {
    let mut messages = Vec::with_capacity(max_batch_size);
    let mut recv_failed = false;

    while messages.len() < max_batch_size {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            recv = timeout(poll_timeout, consumer.recv()) => match recv {
                Ok(Ok(message)) => messages.push(message.detach()),
                Ok(Err(err)) => {
                    warn!(error = %err, "kafka recv error");
                    counter!(RECV_ERRORS).increment(1);
                    recv_failed = true;
                    break;
                }
                Err(_) => break, // timeout, ship what we have
            }
        }
    }

    (messages, recv_failed)
}

struct GroupAccumulator<T> {
    messages: Vec<DecodedMessage<T>>,
    next_offset: i64,
    byte_size: usize,
}

/// Split a mixed poll batch into partition-homogeneous groups, preserving
/// the per-partition order the broker delivered.
fn split_by_partition<T>(messages: Vec<OwnedMessage>) -> Vec<Batch<T>>
where
    T: DeserializeOwned,
{
    let mut groups: BTreeMap<Partition, GroupAccumulator<T>> = BTreeMap::new();

    for message in messages {
        let partition = Partition::new(message.topic(), message.partition());
        let group = groups
            .entry(partition.clone())
            .or_insert_with(|| GroupAccumulator {
                messages: Vec::new(),
                next_offset: 0,
                byte_size: 0,
            });
        // the group covers every raw offset seen, decodable or not
        group.next_offset = message.offset() + 1;

        if let Some(payload) = decode::<T>(&message) {
            group.byte_size += message.payload().map_or(0, <[u8]>::len)
                + message.key().map_or(0, <[u8]>::len);
            group.messages.push(DecodedMessage {
                partition,
                offset: message.offset(),
                key: message.key().map(<[u8]>::to_vec),
                timestamp: message.timestamp().to_millis(),
                payload,
            });
            counter!(MESSAGES_DECODED).increment(1);
        }
    }

    groups
        .into_iter()
        .map(|(partition, group)| {
            Batch::new(partition, group.messages, group.next_offset, group.byte_size)
        })
        .collect()
}

fn decode<T>(message: &OwnedMessage) -> Option<T>
where
    T: DeserializeOwned,
{
    let Some(payload) = message.payload() else {
        warn!(
            topic = message.topic(),
            partition = message.partition(),
            offset = message.offset(),
            "skipping record with empty payload"
        );
        counter!(DECODE_FAILURES).increment(1);
        return None;
    };

    match serde_json::from_slice(payload) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(
                topic = message.topic(),
                partition = message.partition(),
                offset = message.offset(),
                error = %err,
                "skipping undecodable record"
            );
            counter!(DECODE_FAILURES).increment(1);
            None
        }
    }
}

async fn scheduler_loop<T>(
    tracker: &Arc<InFlightTracker<T>>,
    semaphore: &Arc<Semaphore>,
    workers: &TaskTracker,
    shutdown: &CancellationToken,
    handle: &DispatcherHandle,
    processor: &Arc<dyn BatchProcessor<T>>,
) where
    T: Send + 'static,
{
    loop {
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let batch = tokio::select! {
            _ = shutdown.cancelled() => break,
            batch = tracker.next_ready() => batch,
        };

        counter!(BATCHES_DISPATCHED).increment(1);
        let tracker = tracker.clone();
        let handle = handle.clone();
        let processor = processor.clone();
        workers.spawn(async move {
            let _permit = permit;
            run_batch(tracker, handle, processor, batch).await;
        });
    }
    debug!("scheduler exited");
}

async fn run_batch<T>(
    tracker: Arc<InFlightTracker<T>>,
    handle: DispatcherHandle,
    processor: Arc<dyn BatchProcessor<T>>,
    batch: Batch<T>,
) where
    T: Send + 'static,
{
    let partition = batch.partition().clone();
    let next_offset = batch.next_offset();
    let bytes = batch.byte_size();
    let len = batch.len();

    if batch.is_empty() {
        // nothing decodable in the group; advance the cursor past it
        tracker.complete(&partition, next_offset, bytes);
        return;
    }

    match processor.process_batch(&handle, batch).await {
        Ok(()) => {
            tracker.complete(&partition, next_offset, bytes);
            counter!(MESSAGES_HANDLED).increment(len as u64);
            debug!(partition = %partition, next_offset, "batch handled");
        }
        Err(err) => {
            error!(
                partition = %partition,
                error = ?err,
                "batch handler failed, faulting dispatcher"
            );
            counter!(HANDLER_FAILURES).increment(1);
            tracker.release(&partition, bytes);
            handle.fault(err);
        }
    }
}

async fn committer_loop<T>(
    consumer: &StreamConsumer<TrackedConsumerContext>,
    tracker: &InFlightTracker<T>,
    shutdown: &CancellationToken,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => commit_pending(consumer, tracker, CommitMode::Async),
        }
    }
    debug!("committer exited");
}

fn commit_pending<T>(
    consumer: &StreamConsumer<TrackedConsumerContext>,
    tracker: &InFlightTracker<T>,
    mode: CommitMode,
) {
    let pending = tracker.take_commit_offsets();
    if pending.is_empty() {
        return;
    }

    let mut tpl = TopicPartitionList::new();
    for po in &pending {
        if let Err(err) = tpl.add_partition_offset(
            po.partition().topic(),
            po.partition().partition_number(),
            Offset::Offset(po.offset()),
        ) {
            warn!(partition = %po.partition(), error = %err, "invalid commit entry");
        }
    }

    match consumer.commit(&tpl, mode) {
        Ok(()) => debug!(partitions = pending.len(), "committed offsets"),
        Err(err) => {
            warn!(error = %err, "offset commit failed; will retry");
            counter!(COMMIT_FAILURES).increment(1);
            tracker.restore_dirty(&pending);
        }
    }
}
