use std::collections::BTreeMap;

use common_kafka::offset::OffsetValue;

use crate::sample::PartitionProgress;

/// Per-partition classification over a full sample window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Healthy,
    /// Offsets stopped advancing while lag is non-zero.
    Stalled { lag: i64 },
    /// Lag never decreased across the whole window.
    Lagging,
}

/// Classify every partition seen in the window. Pure: the same window
/// always produces the same verdicts. Window fullness is the caller's
/// concern ([`crate::window::SampleWindow::snapshot_if_full`]).
pub fn classify(window: &[Vec<PartitionProgress>]) -> BTreeMap<i32, Verdict> {
    let mut series: BTreeMap<i32, Vec<&PartitionProgress>> = BTreeMap::new();
    for tick in window {
        for sample in tick {
            series.entry(sample.partition).or_default().push(sample);
        }
    }
    series
        .into_iter()
        .map(|(partition, samples)| (partition, classify_series(&samples)))
        .collect()
}

/// Rules in priority order; the first that fires wins.
fn classify_series(series: &[&PartitionProgress]) -> Verdict {
    // zero lag anywhere in the window is proof of life
    if series.iter().any(|s| s.lag == 0) {
        return Verdict::Healthy;
    }

    let (first, last) = match (series.first(), series.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Verdict::Healthy,
    };

    if offsets_stalled(first.consumer_offset, last.consumer_offset) && last.lag != 0 {
        return Verdict::Stalled { lag: last.lag };
    }

    let improved = series.windows(2).any(|pair| pair[1].lag < pair[0].lag);
    if !improved {
        return Verdict::Lagging;
    }

    Verdict::Healthy
}

/// Did the committed offset fail to advance between the window's first and
/// last observation?
fn offsets_stalled(first: OffsetValue, last: OffsetValue) -> bool {
    match (first, last) {
        (OffsetValue::Valid(a), OffsetValue::Valid(b)) => b - a <= 0,
        // first observation for this partition; judge it next window
        (OffsetValue::Missing, OffsetValue::Valid(_)) => false,
        // a committed offset that disappeared is suspicious
        (OffsetValue::Valid(_), OffsetValue::Missing) => true,
        (OffsetValue::Missing, OffsetValue::Missing) => true,
    }
}
