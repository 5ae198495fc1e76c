use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;

use crate::client::Client;
use crate::coordinator::Coordinator;
use crate::messages::{Batch, Message};

/// User-supplied consumption logic. One instance serves one
/// (topic, partition, virtual group) binding and is never invoked from two
/// workers at once.
#[async_trait]
pub trait Consumer: Send {
    async fn consume(&mut self, batch: &Batch, handle: &ConsumerHandle) -> anyhow::Result<()>;

    /// Partition ownership was lost or given away.
    async fn revoked(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Process is shutting down; the instance will not be used again.
    async fn shutdown(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub type ConsumerFactory = Arc<dyn Fn() -> Box<dyn Consumer> + Send + Sync>;

/// Contract the coordinator uses to push repeatedly-failing messages out of
/// the partition. The dispatcher itself (producer, target topic management)
/// lives outside the core.
#[async_trait]
pub trait DlqDispatcher: Send + Sync {
    async fn dispatch(&self, target_topic: &str, message: &Message) -> anyhow::Result<()>;
}

/// Capabilities handed to a consumer during `consume`: offset management and
/// flow control for the partition the batch came from. Holds the client
/// strongly and the coordinator weakly; both outlive the call through the
/// executor that made it.
pub struct ConsumerHandle {
    client: Arc<Client>,
    coordinator: Weak<Coordinator>,
}

impl ConsumerHandle {
    pub(crate) fn new(client: Arc<Client>, coordinator: &Arc<Coordinator>) -> Self {
        Self {
            client,
            coordinator: Arc::downgrade(coordinator),
        }
    }

    /// Stores the message offset for the next commit. Returns false when
    /// partition ownership is gone.
    pub async fn mark_as_consumed(&self, message: &Message) -> bool {
        let marked = self.client.mark_as_consumed(message);
        if marked {
            if let Some(coordinator) = self.coordinator.upgrade() {
                coordinator.record_marked(message.offset());
            }
        }
        marked
    }

    /// `mark_as_consumed` followed by a synchronous commit.
    pub async fn mark_as_consumed_sync(&self, message: &Message) -> bool {
        if !self.mark_as_consumed(message).await {
            return false;
        }
        self.client.commit_offsets(true).await.unwrap_or(false)
    }

    /// Pauses the partition; polling resumes after `timeout` (or the
    /// configured pause timeout when not given).
    pub async fn pause(&self, offset: i64, timeout: Option<Duration>) {
        let Some(coordinator) = self.coordinator.upgrade() else {
            return;
        };
        let partition = coordinator.partition().clone();
        match timeout {
            Some(timeout) => coordinator.pause(timeout),
            None => coordinator.pause_with_backoff(),
        }
        self.client
            .pause(partition.topic(), partition.partition_number(), offset)
            .await;
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }
}
