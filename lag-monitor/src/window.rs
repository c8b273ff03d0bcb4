use std::collections::VecDeque;
use std::sync::Mutex;

use crate::sample::PartitionProgress;

/// Fixed-capacity sliding window of progress samples, one entry per
/// sampling tick.
///
/// Snapshots are only handed out once the window is full: the rules engine
/// has nothing useful to say about short windows, and an empty snapshot
/// doubles as the "not enough data yet" signal.
pub struct SampleWindow {
    entries: Mutex<VecDeque<Vec<PartitionProgress>>>,
    capacity: usize,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append the newest tick, evicting the oldest entry at capacity.
    pub fn push(&self, samples: Vec<PartitionProgress>) {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(samples);
    }

    /// Copy of all entries in insertion order iff the window is full,
    /// otherwise empty.
    pub fn snapshot_if_full(&self) -> Vec<Vec<PartitionProgress>> {
        let entries = self.entries.lock().unwrap();
        if entries.len() < self.capacity {
            return Vec::new();
        }
        entries.iter().cloned().collect()
    }

    pub fn reset(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common_kafka::offset::OffsetValue;

    fn tick(partition: i32, lag_marker: i64) -> Vec<PartitionProgress> {
        vec![PartitionProgress::new(
            partition,
            OffsetValue::Valid(0),
            OffsetValue::Valid(0),
            OffsetValue::Valid(lag_marker),
        )]
    }

    #[test]
    fn partial_window_yields_no_snapshot() {
        let window = SampleWindow::new(3);
        window.push(tick(0, 1));
        window.push(tick(0, 2));
        assert!(window.snapshot_if_full().is_empty());
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn full_window_snapshots_in_insertion_order() {
        let window = SampleWindow::new(3);
        for lag in 1..=3 {
            window.push(tick(0, lag));
        }
        let snapshot = window.snapshot_if_full();
        assert_eq!(snapshot.len(), 3);
        let lags: Vec<i64> = snapshot.iter().map(|entry| entry[0].lag).collect();
        assert_eq!(lags, vec![1, 2, 3]);
    }

    #[test]
    fn oldest_entry_is_evicted_at_capacity() {
        let window = SampleWindow::new(3);
        for lag in 1..=5 {
            window.push(tick(0, lag));
        }
        let snapshot = window.snapshot_if_full();
        let lags: Vec<i64> = snapshot.iter().map(|entry| entry[0].lag).collect();
        assert_eq!(lags, vec![3, 4, 5]);
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn reset_restores_the_empty_state() {
        let window = SampleWindow::new(2);
        window.push(tick(0, 1));
        window.push(tick(0, 2));
        assert!(!window.snapshot_if_full().is_empty());

        window.reset();
        assert!(window.is_empty());
        assert!(window.snapshot_if_full().is_empty());
    }
}
