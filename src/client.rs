use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use rdkafka::error::KafkaError;
use rdkafka::Offset;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::driver::{DriverFactory, KafkaDriver};
use crate::error::{
    classify_commit_error, classify_poll_error, store_offset_rejected, CommitDisposition,
    ConductorError, ErrorType, PollErrorDisposition, Result,
};
use crate::buffers::RawMessagesBuffer;
use crate::messages::Message;
use crate::metrics_names::{
    CLIENT_BATCH_COLLECTION_DURATION_MS, CLIENT_BATCH_FILL_RATIO, CLIENT_BATCH_SIZE,
    CLIENT_COMMIT_FAILURES, CLIENT_PAUSES, CLIENT_POLL_ERRORS, CLIENT_POLL_RETRIES,
    CLIENT_RESUMES,
};
use crate::monitor::Event;
use crate::rebalance::RebalanceManager;
use crate::routing::SubscriptionGroup;
use crate::runtime::Runtime;
use crate::time_tracker::TimeTracker;
use crate::types::Partition;

/// Upper bound on the pre-close wait for the first rebalance under the
/// cooperative-sticky strategy.
pub const COOPERATIVE_STICKY_MAX_WAIT: Duration = Duration::from_secs(60);

const MAX_POLL_RETRIES: u32 = 20;
const COORDINATOR_RELOAD_BACKOFF: Duration = Duration::from_secs(1);
const TIME_BASED_SEEK_TIMEOUT: Duration = Duration::from_millis(2000);
const TIME_BASED_SEEK_ATTEMPTS: u32 = 3;
const PING_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOffset {
    /// Concrete offset; `-1` means latest.
    Offset(i64),
    /// Millisecond timestamp resolved through the driver.
    Timestamp(i64),
}

#[derive(Debug, Clone)]
pub struct SeekTarget {
    pub partition: Partition,
    pub offset: SeekOffset,
}

/// Thread-safe facade over the native driver for one subscription group.
/// Enforces what the driver cannot: no use after close, serialized
/// pause/resume/seek, and the poll/commit retry policies.
pub struct Client {
    id: String,
    runtime: Arc<Runtime>,
    subscription_group: Arc<SubscriptionGroup>,
    driver_factory: DriverFactory,
    driver: RwLock<Arc<dyn KafkaDriver>>,
    rebalance_manager: Arc<RebalanceManager>,
    paused_tpls: Mutex<HashMap<Partition, rdkafka::TopicPartitionList>>,
    // Serializes pause/resume/seek against each other
    op_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
    // Poll retry streak; the window restarts every batch_poll but the
    // attempt count survives until a record comes through
    poll_tracker: Mutex<TimeTracker>,
    poll_error_reported: AtomicBool,
}

impl Client {
    pub fn new(
        runtime: Arc<Runtime>,
        subscription_group: Arc<SubscriptionGroup>,
        driver_factory: DriverFactory,
    ) -> Result<Self> {
        let rebalance_manager = Arc::new(RebalanceManager::new());
        let driver =
            driver_factory(rebalance_manager.clone()).map_err(ConductorError::DriverBuild)?;
        driver.subscribe(&subscription_group.topic_names())?;

        let id = format!(
            "{}-{}",
            runtime.config.client_id,
            subscription_group.id()
        );
        let poll_tracker = Mutex::new(TimeTracker::new(subscription_group.max_wait_time()));

        Ok(Self {
            id,
            runtime,
            subscription_group,
            driver_factory,
            driver: RwLock::new(driver),
            rebalance_manager,
            paused_tpls: Mutex::new(HashMap::new()),
            op_lock: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
            poll_tracker,
            poll_error_reported: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subscription_group(&self) -> &Arc<SubscriptionGroup> {
        &self.subscription_group
    }

    pub fn rebalance_manager(&self) -> &Arc<RebalanceManager> {
        &self.rebalance_manager
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn driver(&self) -> Arc<dyn KafkaDriver> {
        self.driver.read().unwrap().clone()
    }

    /// Fetches up to `max_messages` within the `max_wait_time` window.
    /// Stops early when a rebalance is observed (stripping records from
    /// revoked partitions and deduplicating re-fetched ones) or when a poll
    /// comes back empty.
    pub async fn batch_poll(&self) -> Result<RawMessagesBuffer> {
        let started = Instant::now();
        let mut buffer = RawMessagesBuffer::new();
        let max_messages = self.subscription_group.max_messages();
        let mut rebalanced = false;

        // new window, same retry streak
        self.poll_tracker.lock().unwrap().checkpoint();

        loop {
            let (exceeded, remaining) = {
                let tracker = self.poll_tracker.lock().unwrap();
                (tracker.exceeded(), tracker.remaining())
            };
            if self.closed() || exceeded || buffer.len() >= max_messages {
                break;
            }

            match self.driver().poll(remaining).await {
                None => break,
                Some(Ok(record)) => {
                    self.poll_tracker.lock().unwrap().reset_attempts();
                    self.poll_error_reported.store(false, Ordering::SeqCst);
                    buffer.push(record);
                    if self.rebalance_manager.changed() {
                        rebalanced = true;
                        break;
                    }
                }
                Some(Err(error)) => match classify_poll_error(&error) {
                    PollErrorDisposition::Fatal => return Err(error.into()),
                    PollErrorDisposition::UnknownTopicOrPartition => {
                        if self.runtime.config.allow_auto_create_topics {
                            buffer.clear();
                            return Ok(buffer);
                        }
                        if self.runtime.status.done() {
                            return Err(error.into());
                        }
                        self.retry_poll(error, true).await?;
                    }
                    PollErrorDisposition::Retryable { early_report } => {
                        self.retry_poll(error, early_report).await?;
                    }
                },
            }
        }

        if rebalanced || self.rebalance_manager.changed() {
            for partition in self.rebalance_manager.revoked_partitions() {
                buffer.delete(partition.topic(), partition.partition_number());
            }
            buffer.uniq();
        }

        metrics::histogram!(CLIENT_BATCH_SIZE).record(buffer.len() as f64);
        metrics::histogram!(CLIENT_BATCH_FILL_RATIO)
            .record(buffer.len() as f64 / max_messages as f64);
        metrics::histogram!(CLIENT_BATCH_COLLECTION_DURATION_MS)
            .record(started.elapsed().as_millis() as f64);

        Ok(buffer)
    }

    async fn retry_poll(&self, error: KafkaError, early_report: bool) -> Result<()> {
        let (attempt, delay) = {
            let mut tracker = self.poll_tracker.lock().unwrap();
            let attempt = tracker.attempt();
            if attempt > MAX_POLL_RETRIES {
                tracker.reset_attempts();
                return Err(ConductorError::PollRetriesExhausted {
                    attempts: attempt - 1,
                    source: error,
                });
            }
            (attempt, tracker.backoff())
        };

        if early_report && !self.poll_error_reported.swap(true, Ordering::SeqCst) {
            self.runtime.monitor.notify(Event::ErrorOccurred {
                error_type: ErrorType::ClientPoll,
                details: error.to_string(),
            });
        }

        metrics::counter!(CLIENT_POLL_ERRORS).increment(1);
        metrics::counter!(CLIENT_POLL_RETRIES).increment(1);
        debug!(client = %self.id, attempt, error = %error, "poll retry");
        sleep(delay).await;
        Ok(())
    }

    /// Stores the message's offset for the next commit. Returns false when
    /// ownership is gone or the consumer is mid-transition.
    pub fn store_offset(&self, message: &Message) -> Result<bool> {
        match self
            .driver()
            .store_offset(message.topic(), message.partition(), message.offset())
        {
            Ok(()) => Ok(true),
            Err(error) if store_offset_rejected(&error) => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    /// Commits stored offsets. `false` means partition ownership is gone;
    /// nothing-to-commit counts as success; coordinator load retries after a
    /// one second sleep.
    pub async fn commit_offsets(&self, sync: bool) -> Result<bool> {
        loop {
            match self.driver().commit(None, !sync) {
                Ok(()) => return Ok(true),
                Err(error) => match classify_commit_error(&error) {
                    CommitDisposition::OwnershipLost => return Ok(false),
                    CommitDisposition::NothingToCommit => return Ok(true),
                    CommitDisposition::RetryAfterDelay => {
                        warn!(client = %self.id, "commit blocked on coordinator load, retrying");
                        sleep(COORDINATOR_RELOAD_BACKOFF).await;
                    }
                    CommitDisposition::Fatal => {
                        metrics::counter!(CLIENT_COMMIT_FAILURES).increment(1);
                        return Err(error.into());
                    }
                },
            }
        }
    }

    pub async fn seek(&self, target: SeekTarget) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        if self.closed() {
            return Err(ConductorError::ClientClosed);
        }

        let offset = match target.offset {
            SeekOffset::Offset(-1) => Offset::End,
            SeekOffset::Offset(offset) => Offset::Offset(offset),
            SeekOffset::Timestamp(timestamp) => {
                self.resolve_time_offset(&target.partition, timestamp)?
            }
        };

        self.driver()
            .seek(
                target.partition.topic(),
                target.partition.partition_number(),
                offset,
                TIME_BASED_SEEK_TIMEOUT,
            )
            .map_err(Into::into)
    }

    fn resolve_time_offset(&self, partition: &Partition, timestamp: i64) -> Result<Offset> {
        let query = partition.to_tpl(Offset::Offset(timestamp));
        let mut last_error = None;

        for _ in 0..TIME_BASED_SEEK_ATTEMPTS {
            match self
                .driver()
                .offsets_for_times(query.clone(), TIME_BASED_SEEK_TIMEOUT)
            {
                Ok(resolved) => {
                    let elem = resolved.elements().into_iter().find(|e| {
                        e.topic() == partition.topic()
                            && e.partition() == partition.partition_number()
                    });
                    return match elem.map(|e| e.offset()) {
                        Some(Offset::Offset(-1)) | Some(Offset::End) => Ok(Offset::End),
                        Some(Offset::Offset(offset)) => Ok(Offset::Offset(offset)),
                        _ => Err(ConductorError::InvalidTimeBasedOffset {
                            partition: partition.to_string(),
                        }),
                    };
                }
                Err(error) => last_error = Some(error),
            }
        }

        Err(last_error
            .map(Into::into)
            .unwrap_or(ConductorError::InvalidTimeBasedOffset {
                partition: partition.to_string(),
            }))
    }

    /// Pauses one partition at the given offset. The TPL snapshot is cached
    /// so the matching resume works even after a revocation cycle.
    pub async fn pause(&self, topic: &str, partition: i32, offset: i64) {
        let _guard = self.op_lock.lock().await;
        if self.closed() {
            return;
        }

        let key = Partition::new(topic, partition);
        let tpl = key.to_tpl(Offset::Offset(offset));

        if let Err(error) = self.driver().pause(&tpl) {
            warn!(client = %self.id, partition = %key, error = %error, "pause failed");
            return;
        }

        self.paused_tpls.lock().unwrap().insert(key, tpl);
        metrics::counter!(CLIENT_PAUSES).increment(1);
        self.runtime.monitor.notify(Event::ClientPause {
            topic: topic.to_string(),
            partition,
            offset,
        });
    }

    /// Resumes a previously paused partition using the cached TPL. The cache
    /// entry is dropped even if the driver call fails.
    pub async fn resume(&self, topic: &str, partition: i32) {
        let _guard = self.op_lock.lock().await;
        if self.closed() {
            return;
        }

        let key = Partition::new(topic, partition);
        let Some(tpl) = self.paused_tpls.lock().unwrap().remove(&key) else {
            return;
        };

        if let Err(error) = self.driver().resume(&tpl) {
            warn!(client = %self.id, partition = %key, error = %error, "resume failed");
        }

        metrics::counter!(CLIENT_RESUMES).increment(1);
        self.runtime.monitor.notify(Event::ClientResume {
            topic: topic.to_string(),
            partition,
        });
    }

    /// One short poll that swallows every driver error. Keeps the rebalance
    /// callbacks pumping while the process drains during shutdown.
    pub async fn ping(&self) {
        if self.closed() {
            return;
        }
        let _ = self.driver().poll(PING_TIMEOUT).await;
    }

    pub fn mark_as_consumed(&self, message: &Message) -> bool {
        match self.store_offset(message) {
            Ok(true) => !self.driver().assignment_lost(),
            Ok(false) => false,
            Err(error) => {
                warn!(client = %self.id, error = %error, "store_offset failed");
                false
            }
        }
    }

    pub async fn mark_as_consumed_sync(&self, message: &Message) -> bool {
        if !self.mark_as_consumed(message) {
            return false;
        }
        self.commit_offsets(true).await.unwrap_or(false)
    }

    /// Final stop. Under cooperative-sticky the first rebalance must have
    /// happened before closing, otherwise the native library can crash; wait
    /// for it up to `COOPERATIVE_STICKY_MAX_WAIT`.
    pub async fn stop(&self) {
        if self.runtime.config.cooperative_sticky() && !self.rebalance_manager.active() {
            let deadline = Instant::now() + COOPERATIVE_STICKY_MAX_WAIT;
            while Instant::now() < deadline && !self.rebalance_manager.active() {
                self.ping().await;
                sleep(Duration::from_millis(100)).await;
            }
        }
        self.close().await;
    }

    /// Idempotent close, serialized process-wide so at most one driver close
    /// runs at a time.
    pub async fn close(&self) {
        let _shutdown_guard = self.runtime.shutdown_lock().await;
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(client = %self.id, "closing client");
        self.driver().close();
    }

    /// Closes and rebuilds the driver consumer, preserving the client's
    /// identity. Used by the listener's crash recovery.
    pub async fn reset(&self) -> Result<()> {
        self.close().await;

        self.rebalance_manager.clear();
        let driver = (self.driver_factory)(self.rebalance_manager.clone())
            .map_err(ConductorError::DriverBuild)?;
        driver.subscribe(&self.subscription_group.topic_names())?;

        *self.driver.write().unwrap() = driver;
        self.paused_tpls.lock().unwrap().clear();
        self.poll_tracker.lock().unwrap().reset_attempts();
        self.poll_error_reported.store(false, Ordering::SeqCst);
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::consumer::{Consumer, ConsumerHandle};
    use crate::messages::{Batch, JsonDeserializer};
    use crate::routing::Topic;
    use crate::test_support::{test_config, test_record, MockDriver};
    use async_trait::async_trait;
    use rdkafka::error::RDKafkaErrorCode;
    use rdkafka::TopicPartitionList;

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

    fn setup_with(config: Config) -> (Arc<Runtime>, Arc<MockDriver>, Client) {
        let runtime = Runtime::new(config);
        let topic = Topic::builder(
            "events",
            Arc::new(|| Box::new(NoopConsumer) as Box<dyn Consumer>),
        )
        .build();
        let group = Arc::new(SubscriptionGroup::new(
            "g1",
            vec![topic],
            &runtime.config,
        ));
        let driver = MockDriver::new();
        let client =
            Client::new(runtime.clone(), group, MockDriver::factory(driver.clone())).unwrap();
        (runtime, driver, client)
    }

    fn setup() -> (Arc<Runtime>, Arc<MockDriver>, Client) {
        setup_with(test_config())
    }

    fn message(offset: i64) -> Message {
        Message::build(&test_record("events", 0, offset, "{}"), &JsonDeserializer)
    }

    #[tokio::test]
    async fn test_client_subscribes_on_build() {
        let (_, driver, client) = setup();
        assert_eq!(
            *driver.subscriptions.lock().unwrap(),
            vec![vec!["events".to_string()]]
        );
        assert_eq!(client.id(), "kafka-conductor-g1");
    }

    #[tokio::test]
    async fn test_batch_poll_respects_max_messages() {
        let (_, driver, client) = setup();
        for offset in 0..10 {
            driver.enqueue_record("events", 0, offset, "{}");
        }

        let first = client.batch_poll().await.unwrap();
        assert_eq!(first.len(), 5);

        let second = client.batch_poll().await.unwrap();
        assert_eq!(second.len(), 5);

        let third = client.batch_poll().await.unwrap();
        assert!(third.is_empty());
    }

    #[tokio::test]
    async fn test_batch_poll_stops_on_empty_poll() {
        let (_, driver, client) = setup();
        driver.enqueue_record("events", 0, 0, "{}");
        driver.enqueue_record("events", 0, 1, "{}");

        let buffer = client.batch_poll().await.unwrap();
        assert_eq!(buffer.len(), 2);
    }

    #[tokio::test]
    async fn test_batch_poll_strips_revoked_partitions() {
        let (_, driver, client) = setup();
        driver.enqueue_record("events", 1, 0, "{}");
        driver.enqueue_record("events", 0, 0, "{}");

        client
            .rebalance_manager()
            .record_revoked(vec![Partition::new("events", 1)]);

        let buffer = client.batch_poll().await.unwrap();
        assert!(buffer.iter().all(|r| {
            use rdkafka::Message as _;
            r.partition() == 0
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_poll_errors_reported_once_then_recover() {
        let (runtime, driver, client) = setup();
        let mut events = runtime.monitor.subscribe();

        for _ in 0..3 {
            driver.enqueue_error(KafkaError::MessageConsumption(
                RDKafkaErrorCode::NetworkException,
            ));
        }
        driver.enqueue_record("events", 0, 0, "{}");

        let mut collected = 0;
        for _ in 0..10 {
            collected += client.batch_poll().await.unwrap().len();
            if collected > 0 {
                break;
            }
        }
        assert_eq!(collected, 1);

        let mut poll_errors = 0;
        while let Ok(event) = events.try_recv() {
            if let Event::ErrorOccurred { error_type, .. } = event {
                if error_type == ErrorType::ClientPoll {
                    poll_errors += 1;
                }
            }
        }
        assert_eq!(poll_errors, 1);
        // the driver consumer was never rebuilt
        assert_eq!(driver.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_retries_exhaust_after_twenty_attempts() {
        let (_, driver, client) = setup();
        for _ in 0..30 {
            driver.enqueue_error(KafkaError::MessageConsumption(
                RDKafkaErrorCode::BrokerTransportFailure,
            ));
        }

        let mut exhausted = false;
        for _ in 0..40 {
            match client.batch_poll().await {
                Ok(_) => {}
                Err(ConductorError::PollRetriesExhausted { attempts, .. }) => {
                    assert_eq!(attempts, 20);
                    exhausted = true;
                    break;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(exhausted);
    }

    #[tokio::test]
    async fn test_unknown_topic_with_auto_create_is_empty_poll() {
        let mut config = test_config();
        config.allow_auto_create_topics = true;
        let (_, driver, client) = setup_with(config);

        driver.enqueue_error(KafkaError::MessageConsumption(
            RDKafkaErrorCode::UnknownTopicOrPartition,
        ));
        driver.enqueue_record("events", 0, 0, "{}");

        let buffer = client.batch_poll().await.unwrap();
        assert!(buffer.is_empty());
        // the record is picked up by the next cycle
        let buffer = client.batch_poll().await.unwrap();
        assert_eq!(buffer.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_topic_is_fatal_during_shutdown() {
        let (runtime, driver, client) = setup();
        runtime.status.run();
        runtime.status.stop();

        driver.enqueue_error(KafkaError::MessageConsumption(
            RDKafkaErrorCode::UnknownTopicOrPartition,
        ));

        assert!(client.batch_poll().await.is_err());
    }

    #[tokio::test]
    async fn test_commit_ownership_lost_returns_false() {
        let (_, driver, client) = setup();
        driver.enqueue_commit_error(KafkaError::ConsumerCommit(
            RDKafkaErrorCode::AssignmentLost,
        ));
        assert!(!client.commit_offsets(true).await.unwrap());

        driver.enqueue_commit_error(KafkaError::ConsumerCommit(
            RDKafkaErrorCode::UnknownMemberId,
        ));
        assert!(!client.commit_offsets(true).await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_no_offset_is_success() {
        let (_, driver, client) = setup();
        driver.enqueue_commit_error(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset));
        assert!(client.commit_offsets(false).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_retries_on_coordinator_load() {
        let (_, driver, client) = setup();
        driver.enqueue_commit_error(KafkaError::ConsumerCommit(
            RDKafkaErrorCode::CoordinatorLoadInProgress,
        ));

        assert!(client.commit_offsets(true).await.unwrap());
        assert_eq!(driver.commit_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_store_offset_rejection_is_false_not_error() {
        let (_, driver, client) = setup();
        driver.enqueue_store_error(KafkaError::StoreOffset(RDKafkaErrorCode::AssignmentLost));
        assert!(!client.store_offset(&message(3)).unwrap());

        assert!(client.store_offset(&message(3)).unwrap());
        assert_eq!(
            *driver.stored.lock().unwrap(),
            vec![("events".to_string(), 0, 3)]
        );
    }

    #[tokio::test]
    async fn test_mark_as_consumed_requires_ownership() {
        let (_, driver, client) = setup();
        assert!(client.mark_as_consumed(&message(1)));

        driver.set_assignment_lost(true);
        assert!(!client.mark_as_consumed(&message(2)));
    }

    #[tokio::test]
    async fn test_mark_as_consumed_sync_commits() {
        let (_, driver, client) = setup();
        assert!(client.mark_as_consumed_sync(&message(9)).await);
        assert_eq!(
            driver.committed.lock().unwrap().get(&("events".to_string(), 0)),
            Some(&10)
        );
    }

    #[tokio::test]
    async fn test_pause_resume_uses_cached_tpl_once() {
        let (runtime, driver, client) = setup();
        let mut events = runtime.monitor.subscribe();

        client.pause("events", 0, 5).await;
        assert_eq!(
            *driver.paused.lock().unwrap(),
            vec![(Partition::new("events", 0), 5)]
        );
        assert_eq!(events.recv().await.unwrap().name(), "client.pause");

        client.resume("events", 0).await;
        assert_eq!(
            *driver.resumed.lock().unwrap(),
            vec![Partition::new("events", 0)]
        );
        assert_eq!(events.recv().await.unwrap().name(), "client.resume");

        // cache entry is gone; a second resume is a no-op
        client.resume("events", 0).await;
        assert_eq!(driver.resumed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pause_is_noop_after_close() {
        let (_, driver, client) = setup();
        client.close().await;

        client.pause("events", 0, 5).await;
        client.resume("events", 0).await;
        assert!(driver.paused.lock().unwrap().is_empty());
        assert!(driver.resumed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_happens_at_most_once() {
        let (_, driver, client) = setup();
        let client = Arc::new(client);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let client = client.clone();
            handles.push(tokio::spawn(async move { client.close().await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        client.stop().await;

        assert_eq!(driver.close_calls.load(Ordering::SeqCst), 1);
        assert!(client.closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooperative_sticky_stop_waits_for_first_rebalance() {
        let mut config = test_config();
        config.partition_assignment_strategy = "cooperative-sticky".to_string();
        let (_, driver, client) = setup_with(config);
        let client = Arc::new(client);

        let stopper = {
            let client = client.clone();
            tokio::spawn(async move { client.stop().await })
        };

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!driver.is_closed());

        client
            .rebalance_manager()
            .record_assigned(vec![Partition::new("events", 0)]);

        tokio::time::timeout(Duration::from_secs(5), stopper)
            .await
            .expect("stop should finish once the rebalance arrived")
            .unwrap();
        assert_eq!(driver.close_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooperative_sticky_stop_gives_up_after_max_wait() {
        let mut config = test_config();
        config.partition_assignment_strategy = "cooperative-sticky".to_string();
        let (_, driver, client) = setup_with(config);

        client.stop().await;
        assert_eq!(driver.close_calls.load(Ordering::SeqCst), 1);
        assert!(driver.is_closed());
    }

    #[tokio::test]
    async fn test_reset_rebuilds_preserving_identity() {
        let (_, driver, client) = setup();
        let id = client.id().to_string();
        client.pause("events", 0, 0).await;

        client.reset().await.unwrap();

        assert_eq!(client.id(), id);
        assert!(!client.closed());
        assert_eq!(driver.builds.load(Ordering::SeqCst), 2);
        assert_eq!(driver.close_calls.load(Ordering::SeqCst), 1);
        assert_eq!(driver.subscriptions.lock().unwrap().len(), 2);

        // paused cache was dropped with the old consumer
        client.resume("events", 0).await;
        assert!(driver.resumed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_seek_with_concrete_offset() {
        let (_, driver, client) = setup();
        client
            .seek(SeekTarget {
                partition: Partition::new("events", 0),
                offset: SeekOffset::Offset(42),
            })
            .await
            .unwrap();

        assert_eq!(
            *driver.seeks.lock().unwrap(),
            vec![(Partition::new("events", 0), Offset::Offset(42))]
        );
    }

    #[tokio::test]
    async fn test_seek_minus_one_means_latest() {
        let (_, driver, client) = setup();
        client
            .seek(SeekTarget {
                partition: Partition::new("events", 0),
                offset: SeekOffset::Offset(-1),
            })
            .await
            .unwrap();

        assert_eq!(
            *driver.seeks.lock().unwrap(),
            vec![(Partition::new("events", 0), Offset::End)]
        );
    }

    #[tokio::test]
    async fn test_seek_resolves_timestamp() {
        let (_, driver, client) = setup();
        let mut resolved = TopicPartitionList::new();
        resolved
            .add_partition_offset("events", 0, Offset::Offset(77))
            .unwrap();
        driver.set_offsets_for_times_response(Ok(resolved));

        client
            .seek(SeekTarget {
                partition: Partition::new("events", 0),
                offset: SeekOffset::Timestamp(1_700_000_000_000),
            })
            .await
            .unwrap();

        assert_eq!(
            *driver.seeks.lock().unwrap(),
            vec![(Partition::new("events", 0), Offset::Offset(77))]
        );
    }

    #[tokio::test]
    async fn test_seek_unresolved_timestamp_fails_loudly() {
        let (_, driver, client) = setup();
        let mut resolved = TopicPartitionList::new();
        resolved.add_partition("events", 0);
        driver.set_offsets_for_times_response(Ok(resolved));

        let result = client
            .seek(SeekTarget {
                partition: Partition::new("events", 0),
                offset: SeekOffset::Timestamp(1_700_000_000_000),
            })
            .await;

        assert!(matches!(
            result,
            Err(ConductorError::InvalidTimeBasedOffset { .. })
        ));
        assert!(driver.seeks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ping_swallows_errors() {
        let (_, driver, client) = setup();
        driver.enqueue_error(KafkaError::MessageConsumption(
            RDKafkaErrorCode::BrokerTransportFailure,
        ));
        client.ping().await;
        client.close().await;
        client.ping().await;
        assert_eq!(driver.poll_calls.load(Ordering::SeqCst), 1);
    }
}
