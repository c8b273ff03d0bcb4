use common_kafka::offset::OffsetValue;

/// One observation of a partition's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionProgress {
    pub partition: i32,
    pub consumer_offset: OffsetValue,
    pub earliest_offset: OffsetValue,
    pub high_watermark: OffsetValue,
    pub lag: i64,
}

impl PartitionProgress {
    /// Derive lag at construction time. A group that has never committed
    /// is charged `high − earliest` (the actually-retained backlog) rather
    /// than the full watermark, and anything unmeasurable counts as zero.
    pub fn new(
        partition: i32,
        consumer_offset: OffsetValue,
        earliest_offset: OffsetValue,
        high_watermark: OffsetValue,
    ) -> Self {
        let lag = match (consumer_offset, high_watermark) {
            (OffsetValue::Valid(committed), OffsetValue::Valid(high)) => high - committed,
            (OffsetValue::Missing, OffsetValue::Valid(high)) => match earliest_offset {
                OffsetValue::Valid(earliest) => high - earliest,
                OffsetValue::Missing => 0,
            },
            _ => 0,
        };
        Self {
            partition,
            consumer_offset,
            earliest_offset,
            high_watermark,
            lag,
        }
    }
}

pub fn total_lag(samples: &[PartitionProgress]) -> i64 {
    samples.iter().map(|s| s.lag).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lag_is_watermark_minus_committed() {
        let sample = PartitionProgress::new(
            0,
            OffsetValue::Valid(40),
            OffsetValue::Valid(0),
            OffsetValue::Valid(100),
        );
        assert_eq!(sample.lag, 60);
    }

    #[test]
    fn never_committed_group_is_charged_the_retained_backlog() {
        let sample = PartitionProgress::new(
            0,
            OffsetValue::Missing,
            OffsetValue::Valid(30),
            OffsetValue::Valid(100),
        );
        assert_eq!(sample.lag, 70);
        assert!(sample.consumer_offset.is_missing());
    }

    #[test]
    fn unmeasurable_partitions_report_zero_lag() {
        let no_watermark = PartitionProgress::new(
            0,
            OffsetValue::Valid(10),
            OffsetValue::Valid(0),
            OffsetValue::Missing,
        );
        assert_eq!(no_watermark.lag, 0);

        let nothing_known = PartitionProgress::new(
            0,
            OffsetValue::Missing,
            OffsetValue::Missing,
            OffsetValue::Missing,
        );
        assert_eq!(nothing_known.lag, 0);

        let no_earliest = PartitionProgress::new(
            0,
            OffsetValue::Missing,
            OffsetValue::Missing,
            OffsetValue::Valid(50),
        );
        assert_eq!(no_earliest.lag, 0);
    }

    #[test]
    fn total_lag_sums_partitions() {
        let samples = vec![
            PartitionProgress::new(0, OffsetValue::Valid(5), OffsetValue::Valid(0), OffsetValue::Valid(10)),
            PartitionProgress::new(1, OffsetValue::Valid(0), OffsetValue::Valid(0), OffsetValue::Valid(7)),
        ];
        assert_eq!(total_lag(&samples), 12);
    }
}
