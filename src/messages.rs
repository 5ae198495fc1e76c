use std::time::SystemTime;

use rdkafka::message::{Headers, OwnedMessage};
use rdkafka::Message as _;
use serde::de::DeserializeOwned;

use crate::types::Partition;

/// Deserializes raw record payloads into structured values. Topics pick their
/// deserializer; the default treats payloads as JSON.
pub trait Deserializer: Send + Sync {
    fn deserialize(&self, raw: &[u8]) -> anyhow::Result<serde_json::Value>;
}

pub struct JsonDeserializer;

impl Deserializer for JsonDeserializer {
    fn deserialize(&self, raw: &[u8]) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::from_slice(raw)?)
    }
}

/// A consumed record after deserialization. Deserialization failures keep the
/// raw payload and surface the error to the consumer instead of dropping the
/// record.
#[derive(Debug, Clone)]
pub struct Message {
    topic: String,
    partition: i32,
    offset: i64,
    key: Option<Vec<u8>>,
    raw_payload: Option<Vec<u8>>,
    headers: Vec<(String, Vec<u8>)>,
    timestamp_ms: Option<i64>,
    payload: Option<serde_json::Value>,
    deserialization_error: Option<String>,
    received_at: SystemTime,
}

impl Message {
    pub fn build(raw: &OwnedMessage, deserializer: &dyn Deserializer) -> Self {
        let raw_payload = raw.payload().map(|p| p.to_vec());
        let (payload, deserialization_error) = match raw.payload() {
            Some(bytes) => match deserializer.deserialize(bytes) {
                Ok(value) => (Some(value), None),
                Err(e) => (None, Some(e.to_string())),
            },
            None => (None, None),
        };

        let headers = raw
            .headers()
            .map(|hs| {
                hs.iter()
                    .map(|h| {
                        (
                            h.key.to_string(),
                            h.value.map(|v| v.to_vec()).unwrap_or_default(),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            topic: raw.topic().to_string(),
            partition: raw.partition(),
            offset: raw.offset(),
            key: raw.key().map(|k| k.to_vec()),
            raw_payload,
            headers,
            timestamp_ms: raw.timestamp().to_millis(),
            payload,
            deserialization_error,
            received_at: SystemTime::now(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    pub fn raw_payload(&self) -> Option<&[u8]> {
        self.raw_payload.as_deref()
    }

    pub fn headers(&self) -> &[(String, Vec<u8>)] {
        &self.headers
    }

    pub fn timestamp_ms(&self) -> Option<i64> {
        self.timestamp_ms
    }

    pub fn payload(&self) -> anyhow::Result<&serde_json::Value> {
        match (&self.payload, &self.deserialization_error) {
            (Some(value), _) => Ok(value),
            (None, Some(error)) => anyhow::bail!("payload deserialization failed: {error}"),
            (None, None) => anyhow::bail!("message has no payload"),
        }
    }

    /// Deserializes the raw payload into a concrete type, bypassing the
    /// topic deserializer.
    pub fn payload_as<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        match &self.raw_payload {
            Some(bytes) => Ok(serde_json::from_slice(bytes)?),
            None => anyhow::bail!("message has no payload"),
        }
    }

    pub fn received_at(&self) -> SystemTime {
        self.received_at
    }

    pub fn partition_ref(&self) -> Partition {
        Partition::new(self.topic.clone(), self.partition)
    }
}

/// An in-order slice of one partition's messages handed to a consumer.
#[derive(Debug, Clone)]
pub struct Batch {
    partition: Partition,
    messages: Vec<Message>,
}

impl Batch {
    pub fn new(partition: Partition, messages: Vec<Message>) -> Self {
        Self {
            partition,
            messages,
        }
    }

    pub fn empty(partition: Partition) -> Self {
        Self {
            partition,
            messages: Vec::new(),
        }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn first_offset(&self) -> Option<i64> {
        self.messages.first().map(|m| m.offset())
    }

    pub fn last_offset(&self) -> Option<i64> {
        self.messages.last().map(|m| m.offset())
    }

    /// Splits off the tail starting at `index`, keeping per-partition order
    /// in both halves.
    pub fn split_at(self, index: usize) -> (Batch, Batch) {
        let mut head = self.messages;
        let tail = head.split_off(index.min(head.len()));
        (
            Batch::new(self.partition.clone(), head),
            Batch::new(self.partition, tail),
        )
    }
}
