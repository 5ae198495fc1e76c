//! Scripted driver and builders shared by unit and scenario tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::{OwnedMessage, Timestamp};
use rdkafka::{Offset, TopicPartitionList};

use crate::config::Config;
use crate::driver::{DriverFactory, KafkaDriver};
use crate::rebalance::RebalanceManager;
use crate::types::Partition;

pub fn test_config() -> Config {
    let mut config = Config::init_with_defaults().expect("default config");
    config.max_wait_time_ms = 100;
    config.max_messages = 5;
    config.pause_timeout_ms = 100;
    config.pause_max_timeout_ms = 1000;
    config.shutdown_timeout_ms = 5000;
    config.concurrency = 2;
    config
}

pub fn test_record(topic: &str, partition: i32, offset: i64, payload: &str) -> OwnedMessage {
    OwnedMessage::new(
        Some(payload.as_bytes().to_vec()),
        Some(b"key".to_vec()),
        topic.to_string(),
        Timestamp::CreateTime(1_700_000_000_000 + offset),
        partition,
        offset,
        None,
    )
}

enum PollStep {
    Record(OwnedMessage),
    Error(KafkaError),
    /// One empty poll window.
    Silence,
}

/// Scripted driver: polls replay a queued sequence of records, errors and
/// empty windows; every control operation is recorded for assertions.
pub struct MockDriver {
    manager: Mutex<Option<Arc<RebalanceManager>>>,
    script: Mutex<VecDeque<PollStep>>,
    store_errors: Mutex<VecDeque<KafkaError>>,
    commit_errors: Mutex<VecDeque<KafkaError>>,
    offsets_for_times_response: Mutex<Option<KafkaResult<TopicPartitionList>>>,
    pub stored: Mutex<Vec<(String, i32, i64)>>,
    pub committed: Mutex<HashMap<(String, i32), i64>>,
    pub commit_calls: AtomicUsize,
    pub paused: Mutex<Vec<(Partition, i64)>>,
    pub resumed: Mutex<Vec<Partition>>,
    pub seeks: Mutex<Vec<(Partition, Offset)>>,
    pub subscriptions: Mutex<Vec<Vec<String>>>,
    pub poll_calls: AtomicUsize,
    pub close_calls: AtomicUsize,
    pub builds: AtomicUsize,
    closed: AtomicBool,
    lost: AtomicBool,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self {
            manager: Mutex::new(None),
            script: Mutex::new(VecDeque::new()),
            store_errors: Mutex::new(VecDeque::new()),
            commit_errors: Mutex::new(VecDeque::new()),
            offsets_for_times_response: Mutex::new(None),
            stored: Mutex::new(Vec::new()),
            committed: Mutex::new(HashMap::new()),
            commit_calls: AtomicUsize::new(0),
            paused: Mutex::new(Vec::new()),
            resumed: Mutex::new(Vec::new()),
            seeks: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            poll_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            builds: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            lost: AtomicBool::new(false),
        }
    }
}

impl MockDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Factory that hands the same mock to the client on every build,
    /// adopting the client's rebalance manager.
    pub fn factory(driver: Arc<MockDriver>) -> DriverFactory {
        Arc::new(move |manager| {
            *driver.manager.lock().unwrap() = Some(manager);
            driver.builds.fetch_add(1, Ordering::SeqCst);
            driver.closed.store(false, Ordering::SeqCst);
            Ok(driver.clone() as Arc<dyn KafkaDriver>)
        })
    }

    /// The rebalance manager the owning client bound to this driver.
    pub fn rebalance_manager(&self) -> Arc<RebalanceManager> {
        self.manager
            .lock()
            .unwrap()
            .clone()
            .expect("driver not built yet")
    }

    pub fn enqueue_record(&self, topic: &str, partition: i32, offset: i64, payload: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(PollStep::Record(test_record(topic, partition, offset, payload)));
    }

    pub fn enqueue_error(&self, error: KafkaError) {
        self.script.lock().unwrap().push_back(PollStep::Error(error));
    }

    pub fn enqueue_silence(&self) {
        self.script.lock().unwrap().push_back(PollStep::Silence);
    }

    pub fn enqueue_store_error(&self, error: KafkaError) {
        self.store_errors.lock().unwrap().push_back(error);
    }

    pub fn enqueue_commit_error(&self, error: KafkaError) {
        self.commit_errors.lock().unwrap().push_back(error);
    }

    pub fn set_offsets_for_times_response(&self, response: KafkaResult<TopicPartitionList>) {
        *self.offsets_for_times_response.lock().unwrap() = Some(response);
    }

    pub fn set_assignment_lost(&self, lost: bool) {
        self.lost.store(lost, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn script_len(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

#[async_trait]
impl KafkaDriver for MockDriver {
    fn subscribe(&self, topics: &[String]) -> KafkaResult<()> {
        self.subscriptions.lock().unwrap().push(topics.to_vec());
        Ok(())
    }

    async fn poll(&self, timeout: Duration) -> Option<KafkaResult<OwnedMessage>> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        tokio::task::yield_now().await;
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(PollStep::Record(record)) => Some(Ok(record)),
            Some(PollStep::Error(error)) => Some(Err(error)),
            Some(PollStep::Silence) | None => {
                // an empty poll blocks for the window, like the real driver
                tokio::time::sleep(timeout).await;
                None
            }
        }
    }

    fn pause(&self, tpl: &TopicPartitionList) -> KafkaResult<()> {
        for elem in tpl.elements() {
            let offset = match elem.offset() {
                Offset::Offset(o) => o,
                _ => -1,
            };
            self.paused
                .lock()
                .unwrap()
                .push((Partition::new(elem.topic(), elem.partition()), offset));
        }
        Ok(())
    }

    fn resume(&self, tpl: &TopicPartitionList) -> KafkaResult<()> {
        for elem in tpl.elements() {
            self.resumed
                .lock()
                .unwrap()
                .push(Partition::new(elem.topic(), elem.partition()));
        }
        Ok(())
    }

    fn seek(
        &self,
        topic: &str,
        partition: i32,
        offset: Offset,
        _timeout: Duration,
    ) -> KafkaResult<()> {
        self.seeks
            .lock()
            .unwrap()
            .push((Partition::new(topic, partition), offset));
        Ok(())
    }

    fn store_offset(&self, topic: &str, partition: i32, offset: i64) -> KafkaResult<()> {
        if let Some(error) = self.store_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.stored
            .lock()
            .unwrap()
            .push((topic.to_string(), partition, offset));
        Ok(())
    }

    fn commit(&self, _tpl: Option<&TopicPartitionList>, _async_commit: bool) -> KafkaResult<()> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.commit_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        // Kafka commits the next offset to consume
        let mut committed = self.committed.lock().unwrap();
        for (topic, partition, offset) in self.stored.lock().unwrap().iter() {
            let entry = committed.entry((topic.clone(), *partition)).or_insert(0);
            *entry = (*entry).max(offset + 1);
        }
        Ok(())
    }

    fn assignment(&self) -> KafkaResult<TopicPartitionList> {
        Ok(TopicPartitionList::new())
    }

    fn assignment_lost(&self) -> bool {
        if self.lost.load(Ordering::SeqCst) {
            return true;
        }
        self.manager
            .lock()
            .unwrap()
            .as_ref()
            .map(|m| m.assignment_lost())
            .unwrap_or(false)
    }

    fn offsets_for_times(
        &self,
        tpl: TopicPartitionList,
        _timeout: Duration,
    ) -> KafkaResult<TopicPartitionList> {
        match self.offsets_for_times_response.lock().unwrap().take() {
            Some(response) => response,
            None => Ok(tpl),
        }
    }

    fn unsubscribe(&self) {}

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        // librdkafka commits stored offsets on close by default
        let _ = self.commit(None, false);
    }

    fn name(&self) -> String {
        "mock".to_string()
    }
}
