use std::fmt;

use rdkafka::topic_partition_list::TopicPartitionListElem;
use rdkafka::{Offset, TopicPartitionList};

/// A (topic, partition) pair, the unit of assignment, pausing and coordination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition {
    topic: String,
    partition_number: i32,
}

impl Partition {
    pub fn new(topic: impl Into<String>, partition_number: i32) -> Self {
        Self {
            topic: topic.into(),
            partition_number,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition_number(&self) -> i32 {
        self.partition_number
    }

    /// Single-element TPL for driver pause/resume/seek calls.
    pub fn to_tpl(&self, offset: Offset) -> TopicPartitionList {
        let mut tpl = TopicPartitionList::new();
        // add_partition_offset only fails on invalid offsets, which `Offset`
        // construction already rules out
        let _ = tpl.add_partition_offset(&self.topic, self.partition_number, offset);
        tpl
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition_number)
    }
}

impl From<TopicPartitionListElem<'_>> for Partition {
    fn from(elem: TopicPartitionListElem<'_>) -> Self {
        Self::new(elem.topic().to_string(), elem.partition())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionOffset {
    partition: Partition,
    offset: i64,
}

impl PartitionOffset {
    pub fn new(partition: Partition, offset: i64) -> Self {
        Self { partition, offset }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn topic(&self) -> &str {
        self.partition.topic()
    }

    pub fn partition_number(&self) -> i32 {
        self.partition.partition_number()
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }
}

/// Collects partitions into a driver TPL, offsets set to `Invalid` since the
/// driver resolves them itself on pause/resume.
pub fn partitions_to_tpl<'a>(partitions: impl IntoIterator<Item = &'a Partition>) -> TopicPartitionList {
    let mut tpl = TopicPartitionList::new();
    for partition in partitions {
        tpl.add_partition(partition.topic(), partition.partition_number());
    }
    tpl
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_display_and_tpl() {
        let partition = Partition::new("events", 3);
        assert_eq!(partition.to_string(), "events-3");

        let tpl = partition.to_tpl(Offset::Offset(42));
        assert_eq!(tpl.count(), 1);
        let elem = tpl.elements().pop().unwrap();
        assert_eq!(elem.topic(), "events");
        assert_eq!(elem.partition(), 3);
        assert_eq!(elem.offset(), Offset::Offset(42));
    }

    #[test]
    fn test_partitions_to_tpl() {
        let partitions = vec![Partition::new("a", 0), Partition::new("a", 1), Partition::new("b", 0)];
        let tpl = partitions_to_tpl(&partitions);
        assert_eq!(tpl.count(), 3);
    }
}
