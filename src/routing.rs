use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::consumer::ConsumerFactory;
use crate::messages::{Batch, Deserializer, JsonDeserializer, Message};

/// Fans one partition's batch out to virtual groups. Implementations must
/// keep per-partition order inside every sub-batch.
pub trait Partitioner: Send + Sync {
    fn call(&self, batch: Batch) -> Vec<(String, Batch)>;
}

/// Default: the whole batch goes to a single virtual group.
pub struct SinglePartitioner;

impl Partitioner for SinglePartitioner {
    fn call(&self, batch: Batch) -> Vec<(String, Batch)> {
        vec![("0".to_string(), batch)]
    }
}

#[derive(Debug, Clone)]
pub struct DlqPolicy {
    pub target_topic: String,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct ThrottlePolicy {
    pub limit: usize,
    pub interval: Duration,
}

pub type MessageFilter = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// Validated topic descriptor, produced by the routing layer and immutable
/// afterwards. The flags select the processing strategy.
pub struct Topic {
    name: String,
    consumer_factory: ConsumerFactory,
    deserializer: Arc<dyn Deserializer>,
    manual_offset_management: bool,
    long_running_job: bool,
    dead_letter_queue: Option<DlqPolicy>,
    throttling: Option<ThrottlePolicy>,
    partitioner: Arc<dyn Partitioner>,
    filter: Option<MessageFilter>,
    expiring_ttl: Option<Duration>,
    delay: Option<Duration>,
}

impl Topic {
    pub fn builder(name: impl Into<String>, consumer_factory: ConsumerFactory) -> TopicBuilder {
        TopicBuilder {
            topic: Topic {
                name: name.into(),
                consumer_factory,
                deserializer: Arc::new(JsonDeserializer),
                manual_offset_management: false,
                long_running_job: false,
                dead_letter_queue: None,
                throttling: None,
                partitioner: Arc::new(SinglePartitioner),
                filter: None,
                expiring_ttl: None,
                delay: None,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn consumer_factory(&self) -> &ConsumerFactory {
        &self.consumer_factory
    }

    pub fn deserializer(&self) -> &dyn Deserializer {
        self.deserializer.as_ref()
    }

    pub fn manual_offset_management(&self) -> bool {
        self.manual_offset_management
    }

    pub fn long_running_job(&self) -> bool {
        self.long_running_job
    }

    pub fn dead_letter_queue(&self) -> Option<&DlqPolicy> {
        self.dead_letter_queue.as_ref()
    }

    pub fn throttling(&self) -> Option<&ThrottlePolicy> {
        self.throttling.as_ref()
    }

    pub fn partitioner(&self) -> &dyn Partitioner {
        self.partitioner.as_ref()
    }

    pub fn filter(&self) -> Option<&MessageFilter> {
        self.filter.as_ref()
    }

    pub fn expiring_ttl(&self) -> Option<Duration> {
        self.expiring_ttl
    }

    pub fn delay(&self) -> Option<Duration> {
        self.delay
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("manual_offset_management", &self.manual_offset_management)
            .field("long_running_job", &self.long_running_job)
            .field("dead_letter_queue", &self.dead_letter_queue)
            .field("throttling", &self.throttling)
            .finish()
    }
}

pub struct TopicBuilder {
    topic: Topic,
}

impl TopicBuilder {
    pub fn deserializer(mut self, deserializer: Arc<dyn Deserializer>) -> Self {
        self.topic.deserializer = deserializer;
        self
    }

    pub fn manual_offset_management(mut self, enabled: bool) -> Self {
        self.topic.manual_offset_management = enabled;
        self
    }

    pub fn long_running_job(mut self, enabled: bool) -> Self {
        self.topic.long_running_job = enabled;
        self
    }

    pub fn dead_letter_queue(mut self, target_topic: impl Into<String>, max_retries: u32) -> Self {
        self.topic.dead_letter_queue = Some(DlqPolicy {
            target_topic: target_topic.into(),
            max_retries,
        });
        self
    }

    pub fn throttling(mut self, limit: usize, interval: Duration) -> Self {
        self.topic.throttling = Some(ThrottlePolicy { limit, interval });
        self
    }

    pub fn virtual_partitions(mut self, partitioner: Arc<dyn Partitioner>) -> Self {
        self.topic.partitioner = partitioner;
        self
    }

    pub fn filter(mut self, filter: MessageFilter) -> Self {
        self.topic.filter = Some(filter);
        self
    }

    pub fn expiring(mut self, ttl: Duration) -> Self {
        self.topic.expiring_ttl = Some(ttl);
        self
    }

    pub fn delaying(mut self, delay: Duration) -> Self {
        self.topic.delay = Some(delay);
        self
    }

    pub fn build(self) -> Arc<Topic> {
        Arc::new(self.topic)
    }
}

/// A set of topics polled together by one listener through one driver
/// consumer. Immutable after construction.
pub struct SubscriptionGroup {
    id: String,
    topics: Vec<Arc<Topic>>,
    kafka_overrides: Vec<(String, String)>,
    max_wait_time: Duration,
    max_messages: usize,
}

impl SubscriptionGroup {
    pub fn new(id: impl Into<String>, topics: Vec<Arc<Topic>>, config: &Config) -> Self {
        Self {
            id: id.into(),
            topics,
            kafka_overrides: Vec::new(),
            max_wait_time: config.max_wait_time(),
            max_messages: config.max_messages,
        }
    }

    pub fn with_kafka_overrides(mut self, overrides: Vec<(String, String)>) -> Self {
        self.kafka_overrides = overrides;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topics(&self) -> &[Arc<Topic>] {
        &self.topics
    }

    pub fn topic(&self, name: &str) -> Option<&Arc<Topic>> {
        self.topics.iter().find(|t| t.name() == name)
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.topics.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn kafka_overrides(&self) -> &[(String, String)] {
        &self.kafka_overrides
    }

    pub fn max_wait_time(&self) -> Duration {
        self.max_wait_time
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }
}
