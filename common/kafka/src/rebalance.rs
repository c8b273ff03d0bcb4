use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rdkafka::TopicPartitionList;
use tokio::sync::broadcast;

use crate::types::Partition;

/// Callbacks invoked from the consumer's rebalance protocol.
///
/// Handlers run on the rebalance callback thread and must complete without
/// external wakeups; anything heavier should be handed off to a channel.
#[async_trait]
pub trait RebalanceHandler: Send + Sync {
    async fn on_partitions_assigned(&self, partitions: &TopicPartitionList) -> Result<()>;
    async fn on_partitions_revoked(&self, partitions: &TopicPartitionList) -> Result<()>;
}

/// A partition assignment notification, as observed by monitors.
#[derive(Debug, Clone)]
pub struct AssignmentEvent {
    pub partitions: Vec<Partition>,
}

impl AssignmentEvent {
    pub fn mentions_topic(&self, topic: &str) -> bool {
        self.partitions.iter().any(|p| p.topic() == topic)
    }
}

/// Fans assignment events out to any number of broadcast subscribers.
pub struct AssignmentBroadcaster {
    sender: broadcast::Sender<AssignmentEvent>,
}

impl AssignmentBroadcaster {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity);
        Arc::new(Self { sender })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AssignmentEvent> {
        self.sender.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<AssignmentEvent> {
        self.sender.clone()
    }
}

#[async_trait]
impl RebalanceHandler for AssignmentBroadcaster {
    async fn on_partitions_assigned(&self, partitions: &TopicPartitionList) -> Result<()> {
        let event = AssignmentEvent {
            partitions: partitions
                .elements()
                .iter()
                .map(|e| Partition::new(e.topic(), e.partition()))
                .collect(),
        };
        // send only fails when there are no subscribers
        drop(self.sender.send(event));
        Ok(())
    }

    async fn on_partitions_revoked(&self, _partitions: &TopicPartitionList) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn assignment_events_reach_subscribers() {
        let broadcaster = AssignmentBroadcaster::new(4);
        let mut rx = broadcaster.subscribe();

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition("events", 0);
        tpl.add_partition("events", 3);
        broadcaster.on_partitions_assigned(&tpl).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event.partitions,
            vec![Partition::new("events", 0), Partition::new("events", 3)]
        );
        assert!(event.mentions_topic("events"));
        assert!(!event.mentions_topic("audit"));
    }

    #[tokio::test]
    async fn send_without_subscribers_is_not_an_error() {
        let broadcaster = AssignmentBroadcaster::new(4);
        let tpl = TopicPartitionList::new();
        assert!(broadcaster.on_partitions_assigned(&tpl).await.is_ok());
    }
}
