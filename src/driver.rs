use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::OwnedMessage;
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tracing::debug;

use crate::monitor::Monitor;
use crate::rebalance::{ConductorConsumerContext, RebalanceManager};

/// The native-driver surface the runtime consumes. Everything above this
/// trait is driver-agnostic; production uses the rdkafka implementation and
/// tests use a scripted one.
#[async_trait]
pub trait KafkaDriver: Send + Sync {
    fn subscribe(&self, topics: &[String]) -> KafkaResult<()>;

    /// One fetch attempt bounded by `timeout`. `None` means the window
    /// elapsed without a record.
    async fn poll(&self, timeout: Duration) -> Option<KafkaResult<OwnedMessage>>;

    fn pause(&self, tpl: &TopicPartitionList) -> KafkaResult<()>;

    fn resume(&self, tpl: &TopicPartitionList) -> KafkaResult<()>;

    fn seek(
        &self,
        topic: &str,
        partition: i32,
        offset: Offset,
        timeout: Duration,
    ) -> KafkaResult<()>;

    fn store_offset(&self, topic: &str, partition: i32, offset: i64) -> KafkaResult<()>;

    /// Commits the given TPL, or the whole consumer state when `None`.
    fn commit(&self, tpl: Option<&TopicPartitionList>, async_commit: bool) -> KafkaResult<()>;

    fn assignment(&self) -> KafkaResult<TopicPartitionList>;

    fn assignment_lost(&self) -> bool;

    fn offsets_for_times(
        &self,
        tpl: TopicPartitionList,
        timeout: Duration,
    ) -> KafkaResult<TopicPartitionList>;

    fn unsubscribe(&self);

    fn close(&self);

    fn name(&self) -> String;
}

/// Builds a fresh driver bound to the given rebalance manager. The client
/// invokes it at construction and again on reset.
pub type DriverFactory =
    Arc<dyn Fn(Arc<RebalanceManager>) -> anyhow::Result<Arc<dyn KafkaDriver>> + Send + Sync>;

/// rdkafka-backed driver. Rebalance callbacks and statistics flow through
/// `ConductorConsumerContext` on librdkafka's thread.
pub struct RdKafkaDriver {
    consumer: RwLock<Option<Arc<StreamConsumer<ConductorConsumerContext>>>>,
    manager: Arc<RebalanceManager>,
    name: String,
}

impl RdKafkaDriver {
    pub fn new(
        config: &ClientConfig,
        manager: Arc<RebalanceManager>,
        monitor: Arc<Monitor>,
    ) -> anyhow::Result<Self> {
        let context = ConductorConsumerContext::new(manager.clone(), monitor);
        let consumer: StreamConsumer<ConductorConsumerContext> =
            config.create_with_context(context)?;
        let name = config
            .get("client.id")
            .unwrap_or("kafka-conductor")
            .to_string();

        Ok(Self {
            consumer: RwLock::new(Some(Arc::new(consumer))),
            manager,
            name,
        })
    }

    /// Factory the client uses to build and rebuild drivers.
    pub fn factory(config: ClientConfig, monitor: Arc<Monitor>) -> DriverFactory {
        Arc::new(move |manager| {
            Ok(Arc::new(RdKafkaDriver::new(&config, manager, monitor.clone())?) as Arc<dyn KafkaDriver>)
        })
    }

    fn consumer(&self) -> KafkaResult<Arc<StreamConsumer<ConductorConsumerContext>>> {
        self.consumer
            .read()
            .unwrap()
            .clone()
            .ok_or(KafkaError::Canceled)
    }
}

#[async_trait]
impl KafkaDriver for RdKafkaDriver {
    fn subscribe(&self, topics: &[String]) -> KafkaResult<()> {
        let refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer()?.subscribe(&refs)
    }

    async fn poll(&self, timeout: Duration) -> Option<KafkaResult<OwnedMessage>> {
        let consumer = self.consumer().ok()?;
        match tokio::time::timeout(timeout, consumer.recv()).await {
            Ok(Ok(message)) => Some(Ok(message.detach())),
            Ok(Err(e)) => Some(Err(e)),
            Err(_) => None,
        }
    }

    fn pause(&self, tpl: &TopicPartitionList) -> KafkaResult<()> {
        self.consumer()?.pause(tpl)
    }

    fn resume(&self, tpl: &TopicPartitionList) -> KafkaResult<()> {
        self.consumer()?.resume(tpl)
    }

    fn seek(
        &self,
        topic: &str,
        partition: i32,
        offset: Offset,
        timeout: Duration,
    ) -> KafkaResult<()> {
        self.consumer()?.seek(topic, partition, offset, timeout)
    }

    fn store_offset(&self, topic: &str, partition: i32, offset: i64) -> KafkaResult<()> {
        self.consumer()?.store_offset(topic, partition, offset)
    }

    fn commit(&self, tpl: Option<&TopicPartitionList>, async_commit: bool) -> KafkaResult<()> {
        let consumer = self.consumer()?;
        let mode = if async_commit {
            CommitMode::Async
        } else {
            CommitMode::Sync
        };
        match tpl {
            Some(tpl) => consumer.commit(tpl, mode),
            None => consumer.commit_consumer_state(mode),
        }
    }

    fn assignment(&self) -> KafkaResult<TopicPartitionList> {
        self.consumer()?.assignment()
    }

    fn assignment_lost(&self) -> bool {
        self.manager.assignment_lost()
    }

    fn offsets_for_times(
        &self,
        tpl: TopicPartitionList,
        timeout: Duration,
    ) -> KafkaResult<TopicPartitionList> {
        self.consumer()?.offsets_for_times(tpl, timeout)
    }

    fn unsubscribe(&self) {
        if let Ok(consumer) = self.consumer() {
            consumer.unsubscribe();
        }
    }

    fn close(&self) {
        debug!(name = %self.name, "closing driver consumer");
        self.consumer.write().unwrap().take();
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}
