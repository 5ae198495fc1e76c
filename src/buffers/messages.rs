use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rdkafka::Message as _;
use tracing::warn;

use crate::buffers::RawMessagesBuffer;
use crate::messages::{Batch, Message};
use crate::routing::SubscriptionGroup;
use crate::types::Partition;

/// Per-(topic, partition) message batches built from one poll cycle. A
/// partition whose records were all filtered out keeps an empty batch so the
/// listener can schedule idle work for it.
#[derive(Default)]
pub struct MessagesBuffer {
    batches: Vec<(Partition, Batch)>,
}

impl MessagesBuffer {
    /// Consumes the raw buffer, deserializing records through each topic's
    /// deserializer and applying topic filters. Per-partition order is the
    /// arrival order; duplicates were already dropped by the raw buffer.
    pub fn remap(raw: &mut RawMessagesBuffer, group: &SubscriptionGroup) -> Self {
        let mut buffer = MessagesBuffer::default();

        for record in raw.drain() {
            let Some(topic) = group.topic(record.topic()) else {
                warn!(
                    topic = record.topic(),
                    "record from unrouted topic dropped"
                );
                continue;
            };

            let partition = Partition::new(record.topic().to_string(), record.partition());
            let message = Message::build(&record, topic.deserializer());

            let expired = topic.expiring_ttl().is_some_and(|ttl| is_older_than(&message, ttl));
            let filtered = topic.filter().is_some_and(|f| !f(&message));

            let batch = buffer.batch_entry(partition);
            if !expired && !filtered {
                batch.push(message);
            }
        }

        buffer
    }

    fn batch_entry(&mut self, partition: Partition) -> &mut Batch {
        if let Some(index) = self.batches.iter().position(|(p, _)| *p == partition) {
            return &mut self.batches[index].1;
        }
        self.batches
            .push((partition.clone(), Batch::empty(partition)));
        &mut self.batches.last_mut().unwrap().1
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Partition, &Batch)> {
        self.batches.iter().map(|(p, b)| (p, b))
    }

    pub fn into_batches(self) -> Vec<(Partition, Batch)> {
        self.batches
    }

    /// Total message count across partitions.
    pub fn len(&self) -> usize {
        self.batches.iter().map(|(_, b)| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn partitions_count(&self) -> usize {
        self.batches.len()
    }

    pub fn clear(&mut self) {
        self.batches.clear();
    }
}

fn is_older_than(message: &Message, ttl: Duration) -> bool {
    let Some(timestamp_ms) = message.timestamp_ms() else {
        return false;
    };
    let Ok(now) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return false;
    };
    let age_ms = now.as_millis() as i64 - timestamp_ms;
    age_ms > ttl.as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::consumer::{Consumer, ConsumerHandle};
    use crate::routing::Topic;
    use async_trait::async_trait;
    use rdkafka::message::{OwnedMessage, Timestamp};
    use std::sync::Arc;

    struct NoopConsumer;

    #[async_trait]
    impl Consumer for NoopConsumer {
        async fn consume(
            &mut self,
            _batch: &Batch,
            _handle: &ConsumerHandle,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn record(topic: &str, partition: i32, offset: i64) -> OwnedMessage {
        OwnedMessage::new(
            Some(format!(r#"{{"offset":{offset}}}"#).into_bytes()),
            None,
            topic.to_string(),
            Timestamp::NotAvailable,
            partition,
            offset,
            None,
        )
    }

    fn group(topics: Vec<Arc<Topic>>) -> SubscriptionGroup {
        SubscriptionGroup::new("g1", topics, &Config::init_with_defaults().unwrap())
    }

    #[test]
    fn test_remap_groups_by_partition_in_order() {
        let group = group(vec![Topic::builder("events", Arc::new(|| Box::new(NoopConsumer) as Box<dyn Consumer>)).build()]);

        let mut raw = RawMessagesBuffer::new();
        raw.push(record("events", 0, 0));
        raw.push(record("events", 1, 0));
        raw.push(record("events", 0, 1));
        raw.push(record("events", 1, 1));

        let buffer = MessagesBuffer::remap(&mut raw, &group);
        assert!(raw.is_empty());
        assert_eq!(buffer.partitions_count(), 2);
        assert_eq!(buffer.len(), 4);

        for (_, batch) in buffer.iter() {
            let offsets: Vec<i64> = batch.messages().iter().map(|m| m.offset()).collect();
            assert_eq!(offsets, vec![0, 1]);
        }
    }

    #[test]
    fn test_remap_drops_unrouted_topics() {
        let group = group(vec![Topic::builder("events", Arc::new(|| Box::new(NoopConsumer) as Box<dyn Consumer>)).build()]);

        let mut raw = RawMessagesBuffer::new();
        raw.push(record("other", 0, 0));
        raw.push(record("events", 0, 0));

        let buffer = MessagesBuffer::remap(&mut raw, &group);
        assert_eq!(buffer.partitions_count(), 1);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_filtered_partition_keeps_empty_batch() {
        let topic = Topic::builder("events", Arc::new(|| Box::new(NoopConsumer) as Box<dyn Consumer>))
            .filter(Arc::new(|m| m.offset() > 100))
            .build();
        let group = group(vec![topic]);

        let mut raw = RawMessagesBuffer::new();
        raw.push(record("events", 0, 0));
        raw.push(record("events", 0, 1));

        let buffer = MessagesBuffer::remap(&mut raw, &group);
        assert_eq!(buffer.partitions_count(), 1);
        assert!(buffer.is_empty());

        let (_, batch) = buffer.iter().next().unwrap();
        assert!(batch.is_empty());
    }
}
