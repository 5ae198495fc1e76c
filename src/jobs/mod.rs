pub mod queue;
pub mod scheduler;
pub mod worker;

pub use queue::JobsQueue;
pub use scheduler::{FifoScheduler, Scheduler};
pub use worker::WorkerPool;

use std::sync::{Arc, Mutex};

use crate::executor::Executor;
use crate::messages::Batch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Consume,
    Idle,
    Revoked,
    Shutdown,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Consume => "consume",
            JobKind::Idle => "idle",
            JobKind::Revoked => "revoked",
            JobKind::Shutdown => "shutdown",
        }
    }
}

/// A unit of work for one executor. Created by the listener, pushed through
/// the queue, executed by a worker, then completed back to the queue.
pub struct Job {
    kind: JobKind,
    executor: Arc<Executor>,
    subscription_group_id: String,
    batch: Mutex<Option<Batch>>,
}

impl Job {
    pub fn consume(
        subscription_group_id: impl Into<String>,
        executor: Arc<Executor>,
        batch: Batch,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind: JobKind::Consume,
            executor,
            subscription_group_id: subscription_group_id.into(),
            batch: Mutex::new(Some(batch)),
        })
    }

    pub fn idle(subscription_group_id: impl Into<String>, executor: Arc<Executor>) -> Arc<Self> {
        Arc::new(Self {
            kind: JobKind::Idle,
            executor,
            subscription_group_id: subscription_group_id.into(),
            batch: Mutex::new(None),
        })
    }

    pub fn revoked(subscription_group_id: impl Into<String>, executor: Arc<Executor>) -> Arc<Self> {
        Arc::new(Self {
            kind: JobKind::Revoked,
            executor,
            subscription_group_id: subscription_group_id.into(),
            batch: Mutex::new(None),
        })
    }

    pub fn shutdown(subscription_group_id: impl Into<String>, executor: Arc<Executor>) -> Arc<Self> {
        Arc::new(Self {
            kind: JobKind::Shutdown,
            executor,
            subscription_group_id: subscription_group_id.into(),
            batch: Mutex::new(None),
        })
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn subscription_group_id(&self) -> &str {
        &self.subscription_group_id
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Listener-side staging, run synchronously before the job enters the
    /// queue.
    pub async fn before_enqueue(&self) {
        if self.kind == JobKind::Consume {
            let batch = self.batch.lock().unwrap().take();
            if let Some(batch) = batch {
                self.executor.before_enqueue(batch).await;
            }
        }
    }

    /// Worker-side execution. Consume jobs release their coordinator slot
    /// when done; long-running jobs resume the partition their staging
    /// paused. User errors never escape the executor hooks; an `Err` here is
    /// an internal fault the worker reports and survives.
    pub async fn run(&self) -> anyhow::Result<()> {
        match self.kind {
            JobKind::Consume => {
                self.executor.consume().await;
                if self.executor.topic().long_running_job() {
                    let partition = self.executor.partition().clone();
                    // resume is a no-op if a failure pause replaced the
                    // long-running pause in the meantime
                    if !self.executor.coordinator().paused() {
                        self.executor
                            .client()
                            .resume(partition.topic(), partition.partition_number())
                            .await;
                    }
                }
                self.executor.coordinator().decrement();
            }
            JobKind::Idle => self.executor.idle().await,
            JobKind::Revoked => self.executor.revoked().await,
            JobKind::Shutdown => self.executor.shutdown().await,
        }
        Ok(())
    }
}
