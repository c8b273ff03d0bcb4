use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use common_kafka::types::{Partition, PartitionOffset};
use metrics::gauge;
use tokio::sync::Notify;

use crate::message::Batch;
use crate::metric_consts::{IN_FLIGHT_PARTITIONS, QUEUED_BYTES};

struct PartitionState<T> {
    queue: VecDeque<Batch<T>>,
    in_flight: bool,
    // One past the highest acknowledged offset; only ever moves forward
    next_commit: Option<i64>,
    dirty: bool,
}

impl<T> Default for PartitionState<T> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            in_flight: false,
            next_commit: None,
            dirty: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackerStats {
    pub in_flight: usize,
    pub queued_batches: usize,
    pub queued_bytes: usize,
    pub completed: u64,
    pub failed: u64,
}

struct TrackerState<T> {
    partitions: HashMap<Partition, PartitionState<T>>,
    queued_bytes: usize,
    in_flight: usize,
    completed: u64,
    failed: u64,
}

/// Partition queues, the in-flight set, and the per-partition commit
/// cursors, all guarded by one lock.
///
/// The scheduling rule lives in [`InFlightTracker::next_ready`]: a
/// partition with an in-flight batch is never handed out again until the
/// previous batch completed, which is what serializes handler invocations
/// per partition.
pub struct InFlightTracker<T> {
    state: Mutex<TrackerState<T>>,
    ready: Notify,
    capacity: Notify,
    max_in_flight_bytes: usize,
}

impl<T> InFlightTracker<T> {
    pub fn new(max_in_flight_bytes: usize) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                partitions: HashMap::new(),
                queued_bytes: 0,
                in_flight: 0,
                completed: 0,
                failed: 0,
            }),
            ready: Notify::new(),
            capacity: Notify::new(),
            max_in_flight_bytes,
        }
    }

    /// Append a batch to its partition's queue, waiting until the in-flight
    /// byte budget has room. An oversized batch is admitted when the
    /// tracker is otherwise empty, so progress is always possible.
    pub async fn enqueue(&self, batch: Batch<T>) {
        self.reserve(batch.byte_size()).await;
        {
            let mut state = self.state.lock().unwrap();
            state
                .partitions
                .entry(batch.partition().clone())
                .or_default()
                .queue
                .push_back(batch);
        }
        self.ready.notify_one();
    }

    async fn reserve(&self, bytes: usize) {
        loop {
            let notified = self.capacity.notified();
            {
                let mut state = self.state.lock().unwrap();
                if state.queued_bytes == 0
                    || state.queued_bytes + bytes <= self.max_in_flight_bytes
                {
                    state.queued_bytes += bytes;
                    gauge!(QUEUED_BYTES).set(state.queued_bytes as f64);
                    return;
                }
            }
            notified.await;
        }
    }

    /// Wait for a batch that can be dispatched under the per-partition
    /// exclusion rule, marking its partition in-flight.
    pub async fn next_ready(&self) -> Batch<T> {
        loop {
            let notified = self.ready.notified();
            if let Some(batch) = self.pop_ready() {
                return batch;
            }
            notified.await;
        }
    }

    fn pop_ready(&self) -> Option<Batch<T>> {
        let mut state = self.state.lock().unwrap();
        let key = state
            .partitions
            .iter()
            .find(|(_, p)| !p.in_flight && !p.queue.is_empty())
            .map(|(k, _)| k.clone())?;
        let partition = state.partitions.get_mut(&key)?;
        partition.in_flight = true;
        let batch = partition.queue.pop_front();
        state.in_flight += 1;
        gauge!(IN_FLIGHT_PARTITIONS).set(state.in_flight as f64);
        batch
    }

    /// Acknowledge the in-flight batch for `partition`; `next_offset`
    /// becomes the partition's commit cursor. The cursor never regresses.
    pub fn complete(&self, partition: &Partition, next_offset: i64, bytes: usize) {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(p) = state.partitions.get_mut(partition) {
                p.in_flight = false;
                if p.next_commit.map_or(true, |c| next_offset > c) {
                    p.next_commit = Some(next_offset);
                    p.dirty = true;
                }
            }
            state.in_flight = state.in_flight.saturating_sub(1);
            state.completed += 1;
            state.queued_bytes = state.queued_bytes.saturating_sub(bytes);
            gauge!(IN_FLIGHT_PARTITIONS).set(state.in_flight as f64);
            gauge!(QUEUED_BYTES).set(state.queued_bytes as f64);
        }
        self.capacity.notify_waiters();
        self.ready.notify_one();
    }

    /// Release the in-flight marker without advancing the cursor (handler
    /// failure path).
    pub fn release(&self, partition: &Partition, bytes: usize) {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(p) = state.partitions.get_mut(partition) {
                p.in_flight = false;
            }
            state.in_flight = state.in_flight.saturating_sub(1);
            state.failed += 1;
            state.queued_bytes = state.queued_bytes.saturating_sub(bytes);
            gauge!(IN_FLIGHT_PARTITIONS).set(state.in_flight as f64);
            gauge!(QUEUED_BYTES).set(state.queued_bytes as f64);
        }
        self.capacity.notify_waiters();
        self.ready.notify_one();
    }

    /// Drain the commit cursors that advanced since the last call, sorted
    /// by partition.
    pub fn take_commit_offsets(&self) -> Vec<PartitionOffset> {
        let mut state = self.state.lock().unwrap();
        let mut offsets: Vec<PartitionOffset> = state
            .partitions
            .iter_mut()
            .filter(|(_, p)| p.dirty)
            .filter_map(|(k, p)| {
                p.dirty = false;
                p.next_commit
                    .map(|offset| PartitionOffset::new(k.clone(), offset))
            })
            .collect();
        offsets.sort();
        offsets
    }

    /// Put cursors back on the dirty list after a failed commit so the next
    /// round retries them (at their latest position).
    pub fn restore_dirty(&self, offsets: &[PartitionOffset]) {
        let mut state = self.state.lock().unwrap();
        for po in offsets {
            if let Some(p) = state.partitions.get_mut(po.partition()) {
                p.dirty = true;
            }
        }
    }

    /// Throw away everything queued but not yet dispatched. Returns the
    /// number of discarded batches.
    pub fn discard_queued(&self) -> usize {
        let discarded;
        {
            let mut state = self.state.lock().unwrap();
            let mut count = 0usize;
            let mut freed = 0usize;
            for p in state.partitions.values_mut() {
                while let Some(batch) = p.queue.pop_front() {
                    count += 1;
                    freed += batch.byte_size();
                }
            }
            state.queued_bytes = state.queued_bytes.saturating_sub(freed);
            gauge!(QUEUED_BYTES).set(state.queued_bytes as f64);
            discarded = count;
        }
        self.capacity.notify_waiters();
        discarded
    }

    pub fn stats(&self) -> TrackerStats {
        let state = self.state.lock().unwrap();
        TrackerStats {
            in_flight: state.in_flight,
            queued_batches: state.partitions.values().map(|p| p.queue.len()).sum(),
            queued_bytes: state.queued_bytes,
            completed: state.completed,
            failed: state.failed,
        }
    }
}
