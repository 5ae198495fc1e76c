use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::client::{Client, SeekOffset, SeekTarget};
use crate::consumer::{Consumer, ConsumerHandle};
use crate::coordinator::Coordinator;
use crate::error::ErrorType;
use crate::messages::{Batch, Message};
use crate::metrics_names::{CONSUMER_BATCHES, CONSUMER_MESSAGES, CONSUMER_RETRIES, DLQ_DISPATCHES, THROTTLE_PAUSES};
use crate::monitor::Event;
use crate::routing::Topic;
use crate::runtime::Runtime;
use crate::types::Partition;

/// Binds one consumer instance to a (topic, partition, virtual group) and
/// drives its lifecycle hooks. The instance is cached across batches when
/// consumer persistence is on, otherwise rebuilt per batch.
pub struct Executor {
    id: String,
    group_id: String,
    partition: Partition,
    topic: Arc<Topic>,
    coordinator: Arc<Coordinator>,
    client: Arc<Client>,
    runtime: Arc<Runtime>,
    consumer: tokio::sync::Mutex<Option<Box<dyn Consumer>>>,
    pending: Mutex<Option<Batch>>,
    materialized: AtomicBool,
}

impl Executor {
    pub fn new(
        group_id: String,
        partition: Partition,
        topic: Arc<Topic>,
        coordinator: Arc<Coordinator>,
        client: Arc<Client>,
        runtime: Arc<Runtime>,
    ) -> Self {
        let id = format!("{}-{}-{}", client.id(), partition, group_id);
        Self {
            id,
            group_id,
            partition,
            topic,
            coordinator,
            client,
            runtime,
            consumer: tokio::sync::Mutex::new(None),
            pending: Mutex::new(None),
            materialized: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn topic(&self) -> &Arc<Topic> {
        &self.topic
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// Runs on the listener task before the job is handed to the queue.
    /// Stages the batch; long-running jobs additionally pause the partition
    /// so polling cannot refetch it while a worker holds it.
    pub async fn before_enqueue(&self, batch: Batch) {
        if self.topic.long_running_job() {
            if let Some(first) = batch.first_offset() {
                self.client
                    .pause(self.partition.topic(), self.partition.partition_number(), first)
                    .await;
            }
        }
        *self.pending.lock().unwrap() = Some(batch);
    }

    /// Worker-side consumption: throttling and delay admission, the consume
    /// hook, then offset management or failure handling.
    pub async fn consume(&self) {
        let Some(batch) = self.pending.lock().unwrap().take() else {
            return;
        };

        if self.delay_batch(&batch).await {
            return;
        }

        let batch = match self.throttle_batch(batch).await {
            Some(batch) => batch,
            None => return,
        };

        let attempt = self.coordinator.attempt();
        if attempt > 0 {
            metrics::counter!(CONSUMER_RETRIES).increment(1);
            self.runtime.monitor.notify(Event::ConsumerConsumingRetry {
                topic: self.partition.topic().to_string(),
                partition: self.partition.partition_number(),
                offset: batch.first_offset().unwrap_or(0),
                attempt,
            });
        }

        let result = {
            let mut consumer = self.consumer.lock().await;
            let instance = self.materialize(&mut consumer);
            let handle = ConsumerHandle::new(self.client.clone(), &self.coordinator);
            instance.consume(&batch, &handle).await
        };

        metrics::counter!(CONSUMER_BATCHES, "topic" => self.partition.topic().to_string())
            .increment(1);

        match result {
            Ok(()) => {
                self.coordinator.reset_attempt();
                metrics::counter!(CONSUMER_MESSAGES).increment(batch.len() as u64);
                if !self.topic.manual_offset_management() {
                    if let Some(last) = batch.messages().last() {
                        if self.client.mark_as_consumed(last) {
                            self.coordinator.record_marked(last.offset());
                        }
                    }
                }
                if !self.runtime.config.consumer_persistence {
                    self.consumer.lock().await.take();
                    self.materialized.store(false, Ordering::SeqCst);
                }
            }
            Err(error) => self.handle_consume_error(&batch, error).await,
        }
    }

    /// Empty batch for a partition whose records were all filtered out.
    pub async fn idle(&self) {
        self.pending.lock().unwrap().take();
        debug!(executor = %self.id, "idle cycle");
    }

    /// Only fires if an instance was ever materialized.
    pub async fn revoked(&self) {
        if !self.materialized.load(Ordering::SeqCst) {
            return;
        }
        let mut consumer = self.consumer.lock().await;
        if let Some(instance) = consumer.as_mut() {
            if let Err(error) = instance.revoked().await {
                self.runtime.monitor.notify(Event::ErrorOccurred {
                    error_type: ErrorType::ConsumerRevoked,
                    details: error.to_string(),
                });
            }
        }
        consumer.take();
    }

    /// Only fires if an instance was ever materialized.
    pub async fn shutdown(&self) {
        if !self.materialized.load(Ordering::SeqCst) {
            return;
        }
        let mut consumer = self.consumer.lock().await;
        if let Some(instance) = consumer.as_mut() {
            if let Err(error) = instance.shutdown().await {
                self.runtime.monitor.notify(Event::ErrorOccurred {
                    error_type: ErrorType::ConsumerShutdown,
                    details: error.to_string(),
                });
            }
        }
        consumer.take();
    }

    fn materialize<'a>(
        &self,
        slot: &'a mut Option<Box<dyn Consumer>>,
    ) -> &'a mut Box<dyn Consumer> {
        if slot.is_none() {
            *slot = Some((self.topic.consumer_factory())());
            self.materialized.store(true, Ordering::SeqCst);
        }
        slot.as_mut().unwrap()
    }

    /// Delayed topics only see messages older than the configured delay.
    /// A too-young batch is pushed back: seek to its head and pause until
    /// the first message matures.
    async fn delay_batch(&self, batch: &Batch) -> bool {
        let Some(delay) = self.topic.delay() else {
            return false;
        };
        let Some(first) = batch.messages().first() else {
            return false;
        };
        let Some(timestamp_ms) = first.timestamp_ms() else {
            return false;
        };

        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(i64::MAX);
        let mature_at = timestamp_ms + delay.as_millis() as i64;
        if now_ms >= mature_at {
            return false;
        }

        let offset = first.offset();
        self.seek_to(offset).await;
        self.coordinator
            .pause(std::time::Duration::from_millis((mature_at - now_ms) as u64));
        self.client
            .pause(self.partition.topic(), self.partition.partition_number(), offset)
            .await;
        true
    }

    /// Applies the throttling window; returns the admitted head of the batch
    /// or `None` when nothing was admitted this interval.
    async fn throttle_batch(&self, batch: Batch) -> Option<Batch> {
        let Some(policy) = self.topic.throttling() else {
            return Some(batch);
        };

        let (admitted, reopens) =
            self.coordinator
                .throttle_admit(batch.len(), policy.limit, policy.interval);
        if admitted >= batch.len() {
            return Some(batch);
        }

        let (head, tail) = batch.split_at(admitted);
        let first_blocked = tail.first_offset().expect("tail is non-empty");

        metrics::counter!(THROTTLE_PAUSES).increment(1);
        self.runtime.monitor.notify(Event::FilteringThrottled {
            topic: self.partition.topic().to_string(),
            partition: self.partition.partition_number(),
            offset: first_blocked,
        });

        // The blocked suffix is replayed once the window reopens
        self.seek_to(first_blocked).await;
        self.runtime.monitor.notify(Event::FilteringSeek {
            topic: self.partition.topic().to_string(),
            partition: self.partition.partition_number(),
            offset: first_blocked,
        });
        self.coordinator
            .pause(reopens.unwrap_or(policy.interval));
        self.client
            .pause(
                self.partition.topic(),
                self.partition.partition_number(),
                first_blocked,
            )
            .await;

        if head.is_empty() {
            None
        } else {
            Some(head)
        }
    }

    async fn handle_consume_error(&self, batch: &Batch, error: anyhow::Error) {
        self.runtime.monitor.notify(Event::ErrorOccurred {
            error_type: ErrorType::ConsumerConsume,
            details: error.to_string(),
        });

        let attempt = self.coordinator.increment_attempt();

        if let Some(policy) = self.topic.dead_letter_queue() {
            if attempt > policy.max_retries && self.dispatch_to_dlq(batch, policy.target_topic.clone()).await {
                return;
            }
        }

        // Replay from the last marked offset with a growing pause
        let replay = self
            .coordinator
            .marked_offset()
            .map(|o| o + 1)
            .or(batch.first_offset())
            .unwrap_or(0);
        self.seek_to(replay).await;
        self.coordinator.pause_with_backoff();
        self.client
            .pause(self.partition.topic(), self.partition.partition_number(), replay)
            .await;
    }

    /// Pushes the first unmarked message to the DLQ and moves past it.
    /// Returns false when no dispatcher is wired so the regular retry path
    /// applies.
    async fn dispatch_to_dlq(&self, batch: &Batch, target_topic: String) -> bool {
        let Some(dispatcher) = self.runtime.dlq_dispatcher() else {
            warn!(executor = %self.id, "dead letter queue configured but no dispatcher wired");
            return false;
        };

        let marked = self.coordinator.marked_offset().unwrap_or(-1);
        let offending: Option<&Message> = batch
            .messages()
            .iter()
            .find(|m| m.offset() > marked)
            .or_else(|| batch.messages().first());
        let Some(offending) = offending else {
            return false;
        };

        if let Err(error) = dispatcher.dispatch(&target_topic, offending).await {
            warn!(executor = %self.id, error = %error, "dead letter dispatch failed");
            return false;
        }

        metrics::counter!(DLQ_DISPATCHES, "topic" => self.partition.topic().to_string())
            .increment(1);
        self.runtime.monitor.notify(Event::DeadLetterQueueDispatched {
            topic: offending.topic().to_string(),
            partition: offending.partition(),
            offset: offending.offset(),
        });

        if self.client.mark_as_consumed(offending) {
            self.coordinator.record_marked(offending.offset());
        }
        self.seek_to(offending.offset() + 1).await;
        self.coordinator.reset_attempt();
        true
    }

    async fn seek_to(&self, offset: i64) {
        let target = SeekTarget {
            partition: self.partition.clone(),
            offset: SeekOffset::Offset(offset),
        };
        if let Err(error) = self.client.seek(target).await {
            warn!(executor = %self.id, offset, error = %error, "seek failed");
        }
    }
}

/// Executors for one listener, keyed by (partition, virtual group).
#[derive(Default)]
pub struct ExecutorsBuffer {
    executors: HashMap<(Partition, String), Arc<Executor>>,
}

impl ExecutorsBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn find_or_create(
        &mut self,
        partition: &Partition,
        group_id: &str,
        topic: &Arc<Topic>,
        coordinator: &Arc<Coordinator>,
        client: &Arc<Client>,
        runtime: &Arc<Runtime>,
    ) -> Arc<Executor> {
        self.executors
            .entry((partition.clone(), group_id.to_string()))
            .or_insert_with(|| {
                Arc::new(Executor::new(
                    group_id.to_string(),
                    partition.clone(),
                    topic.clone(),
                    coordinator.clone(),
                    client.clone(),
                    runtime.clone(),
                ))
            })
            .clone()
    }

    pub fn find_all(&self, partition: &Partition) -> Vec<Arc<Executor>> {
        self.executors
            .iter()
            .filter(|((p, _), _)| p == partition)
            .map(|(_, executor)| executor.clone())
            .collect()
    }

    /// Removes and returns every executor bound to the partition.
    pub fn revoke(&mut self, partition: &Partition) -> Vec<Arc<Executor>> {
        let keys: Vec<_> = self
            .executors
            .keys()
            .filter(|(p, _)| p == partition)
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|key| self.executors.remove(&key))
            .collect()
    }

    pub fn each(&self) -> impl Iterator<Item = &Arc<Executor>> {
        self.executors.values()
    }

    pub fn clear(&mut self) {
        self.executors.clear();
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}
