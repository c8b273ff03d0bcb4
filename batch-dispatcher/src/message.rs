use common_kafka::types::Partition;

/// A single record after payload decoding.
#[derive(Debug, Clone)]
pub struct DecodedMessage<T> {
    pub partition: Partition,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub timestamp: Option<i64>,
    pub payload: T,
}

/// A partition-homogeneous, offset-ordered group of decoded records.
///
/// `next_offset` is one past the highest raw offset the group covers,
/// including records that failed to decode; committing it acknowledges the
/// whole group.
#[derive(Debug)]
pub struct Batch<T> {
    partition: Partition,
    messages: Vec<DecodedMessage<T>>,
    next_offset: i64,
    byte_size: usize,
}

impl<T> Batch<T> {
    pub(crate) fn new(
        partition: Partition,
        messages: Vec<DecodedMessage<T>>,
        next_offset: i64,
        byte_size: usize,
    ) -> Self {
        debug_assert!(messages.iter().all(|m| m.partition == partition));
        debug_assert!(messages.windows(2).all(|w| w[0].offset < w[1].offset));
        debug_assert!(messages.last().map_or(true, |m| m.offset < next_offset));
        Self {
            partition,
            messages,
            next_offset,
            byte_size,
        }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn messages(&self) -> &[DecodedMessage<T>] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<DecodedMessage<T>> {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn first_offset(&self) -> Option<i64> {
        self.messages.first().map(|m| m.offset)
    }

    pub fn last_offset(&self) -> Option<i64> {
        self.messages.last().map(|m| m.offset)
    }

    pub fn next_offset(&self) -> i64 {
        self.next_offset
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }
}
