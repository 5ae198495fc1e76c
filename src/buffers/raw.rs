use std::collections::HashSet;

use rdkafka::message::OwnedMessage;
use rdkafka::Message as _;

/// Staging area for records fetched within one poll window, in arrival order.
/// Cleared every cycle.
#[derive(Default)]
pub struct RawMessagesBuffer {
    records: Vec<OwnedMessage>,
}

impl RawMessagesBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: OwnedMessage) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Drops every record from one partition. Used when the partition was
    /// revoked mid-poll.
    pub fn delete(&mut self, topic: &str, partition: i32) {
        self.records
            .retain(|r| !(r.topic() == topic && r.partition() == partition));
    }

    /// Drops all but the last occurrence of each (topic, partition, offset).
    /// A rebalance that hands a partition back mid-poll can re-fetch offsets
    /// already buffered; the refetched copy wins.
    pub fn uniq(&mut self) {
        let mut seen: HashSet<(String, i32, i64)> = HashSet::new();
        let mut kept: Vec<OwnedMessage> = Vec::with_capacity(self.records.len());

        for record in self.records.drain(..).rev() {
            let key = (record.topic().to_string(), record.partition(), record.offset());
            if seen.insert(key) {
                kept.push(record);
            }
        }

        kept.reverse();
        self.records = kept;
    }

    pub fn drain(&mut self) -> impl Iterator<Item = OwnedMessage> + '_ {
        self.records.drain(..)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OwnedMessage> {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rdkafka::message::Timestamp;

    fn record(topic: &str, partition: i32, offset: i64, payload: &str) -> OwnedMessage {
        OwnedMessage::new(
            Some(payload.as_bytes().to_vec()),
            None,
            topic.to_string(),
            Timestamp::NotAvailable,
            partition,
            offset,
            None,
        )
    }

    #[test]
    fn test_push_and_clear() {
        let mut buffer = RawMessagesBuffer::new();
        assert!(buffer.is_empty());

        buffer.push(record("a", 0, 0, "x"));
        buffer.push(record("a", 0, 1, "y"));
        assert_eq!(buffer.len(), 2);

        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_delete_removes_only_target_partition() {
        let mut buffer = RawMessagesBuffer::new();
        buffer.push(record("a", 0, 0, "x"));
        buffer.push(record("a", 1, 0, "y"));
        buffer.push(record("b", 0, 0, "z"));

        buffer.delete("a", 0);

        let remaining: Vec<_> = buffer
            .iter()
            .map(|r| (r.topic().to_string(), r.partition()))
            .collect();
        assert_eq!(
            remaining,
            vec![("a".to_string(), 1), ("b".to_string(), 0)]
        );
    }

    #[test]
    fn test_uniq_keeps_last_occurrence() {
        let mut buffer = RawMessagesBuffer::new();
        buffer.push(record("a", 0, 0, "first"));
        buffer.push(record("a", 0, 1, "only"));
        buffer.push(record("a", 0, 0, "second"));

        buffer.uniq();

        let records: Vec<_> = buffer
            .iter()
            .map(|r| {
                (
                    r.offset(),
                    String::from_utf8(r.payload().unwrap().to_vec()).unwrap(),
                )
            })
            .collect();
        assert_eq!(
            records,
            vec![(1, "only".to_string()), (0, "second".to_string())]
        );
    }

    #[test]
    fn test_uniq_distinguishes_partitions() {
        let mut buffer = RawMessagesBuffer::new();
        buffer.push(record("a", 0, 5, "p0"));
        buffer.push(record("a", 1, 5, "p1"));

        buffer.uniq();
        assert_eq!(buffer.len(), 2);
    }
}
