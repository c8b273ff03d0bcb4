use rdkafka::Offset;

/// Raw value librdkafka reports when a group has no committed offset for a
/// partition.
pub const UNSET_OFFSET: i64 = -1001;

/// A committed or watermark offset as reported by the broker.
///
/// The broker's "no offset" sentinel is decoded to [`OffsetValue::Missing`]
/// here, at the ingress; nothing downstream ever compares against the raw
/// sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OffsetValue {
    Missing,
    Valid(i64),
}

impl OffsetValue {
    /// Decode a raw broker offset. Any negative value, the −1001 sentinel
    /// included, means no offset.
    pub fn from_raw(raw: i64) -> Self {
        if raw >= 0 {
            OffsetValue::Valid(raw)
        } else {
            OffsetValue::Missing
        }
    }

    pub fn from_rdkafka(offset: Offset) -> Self {
        match offset {
            Offset::Offset(n) => Self::from_raw(n),
            _ => OffsetValue::Missing,
        }
    }

    pub fn to_raw(self) -> i64 {
        match self {
            OffsetValue::Valid(n) => n,
            OffsetValue::Missing => UNSET_OFFSET,
        }
    }

    pub fn is_missing(self) -> bool {
        matches!(self, OffsetValue::Missing)
    }

    pub fn value(self) -> Option<i64> {
        match self {
            OffsetValue::Valid(n) => Some(n),
            OffsetValue::Missing => None,
        }
    }
}
