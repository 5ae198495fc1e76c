use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::buffers::MessagesBuffer;
use crate::client::Client;
use crate::coordinator::CoordinatorsBuffer;
use crate::driver::DriverFactory;
use crate::error::{ErrorType, Result};
use crate::executor::ExecutorsBuffer;
use crate::jobs::{Job, JobsQueue, Scheduler};
use crate::metrics_names::{
    LISTENER_FETCH_LOOPS, LISTENER_RECOVERIES, LISTENER_SHUTDOWN_DRAIN_MS,
};
use crate::monitor::Event;
use crate::routing::SubscriptionGroup;
use crate::runtime::Runtime;
use crate::types::Partition;

const RECOVERY_BACKOFF: Duration = Duration::from_secs(1);

/// Rendezvous for the subscription groups sharing one Kafka consumer group
/// in this process: the last listener to finish its own work releases the
/// others to close their clients.
pub struct ConsumerGroupCoordinator {
    remaining: AtomicUsize,
    notify: Notify,
}

impl ConsumerGroupCoordinator {
    pub fn new(group_size: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(group_size),
            notify: Notify::new(),
        })
    }

    pub fn finish_work(&self, listener_id: &str) {
        let left = self
            .remaining
            .fetch_sub(1, Ordering::SeqCst)
            .saturating_sub(1);
        info!(listener_id, left, "listener finished work");
        self.notify.notify_waiters();
    }

    pub fn shutdown_ready(&self) -> bool {
        self.remaining.load(Ordering::SeqCst) == 0
    }

    /// Always invoked in a listener's cleanup path so no peer stays parked.
    pub fn unlock(&self) {
        self.notify.notify_waiters();
    }
}

/// Drives one subscription group: poll, remap, schedule, wait; plus the
/// shutdown and crash-recovery sequences.
pub struct Listener {
    id: String,
    runtime: Arc<Runtime>,
    subscription_group: Arc<SubscriptionGroup>,
    client: Arc<Client>,
    coordinators: Mutex<CoordinatorsBuffer>,
    executors: Mutex<ExecutorsBuffer>,
    queue: Arc<JobsQueue>,
    scheduler: Arc<dyn Scheduler>,
    group_coordinator: Arc<ConsumerGroupCoordinator>,
    stopped: AtomicBool,
    // Guards forceful shutdown against the normal shutdown sequence
    shutdown_lock: tokio::sync::Mutex<()>,
}

impl Listener {
    pub fn new(
        runtime: Arc<Runtime>,
        subscription_group: Arc<SubscriptionGroup>,
        driver_factory: DriverFactory,
        queue: Arc<JobsQueue>,
        scheduler: Arc<dyn Scheduler>,
        group_coordinator: Arc<ConsumerGroupCoordinator>,
    ) -> Result<Arc<Self>> {
        let client = Arc::new(Client::new(
            runtime.clone(),
            subscription_group.clone(),
            driver_factory,
        )?);
        let id = format!("listener-{}", subscription_group.id());

        Ok(Arc::new(Self {
            id,
            coordinators: Mutex::new(CoordinatorsBuffer::new(runtime.config.clone())),
            executors: Mutex::new(ExecutorsBuffer::new()),
            runtime,
            subscription_group,
            client,
            queue,
            scheduler,
            group_coordinator,
            stopped: AtomicBool::new(false),
            shutdown_lock: tokio::sync::Mutex::new(()),
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Main entry: loops the fetch cycle, restarting after any error until
    /// the process stops.
    pub async fn run(self: Arc<Self>) {
        loop {
            match self.fetch_loop().await {
                Ok(()) => break,
                Err(error) => {
                    self.runtime.monitor.notify(Event::ErrorOccurred {
                        error_type: ErrorType::ListenerFetchLoop,
                        details: error.to_string(),
                    });
                    if self.stopped() || self.runtime.status.stopping() {
                        break;
                    }
                    self.recover().await;
                }
            }
        }
        self.group_coordinator.unlock();
    }

    async fn fetch_loop(&self) -> Result<()> {
        self.runtime
            .monitor
            .notify(Event::ConnectionListenerBeforeFetchLoop {
                subscription_group_id: self.subscription_group.id().to_string(),
            });

        while !self.runtime.status.done() {
            self.iteration().await?;
        }

        self.shutdown_sequence().await;
        Ok(())
    }

    async fn iteration(&self) -> Result<()> {
        self.resume_expired_pauses().await;

        self.runtime
            .monitor
            .notify(Event::ConnectionListenerFetchLoop {
                subscription_group_id: self.subscription_group.id().to_string(),
            });
        metrics::counter!(LISTENER_FETCH_LOOPS).increment(1);

        let started = Instant::now();
        let mut raw = self.client.batch_poll().await?;
        let buffer = MessagesBuffer::remap(&mut raw, &self.subscription_group);

        self.runtime
            .monitor
            .notify(Event::ConnectionListenerFetchLoopReceived {
                subscription_group_id: self.subscription_group.id().to_string(),
                messages_count: buffer.len(),
                time: started.elapsed(),
            });

        if self.client.rebalance_manager().changed() {
            self.handle_rebalance().await;
        }

        self.schedule_consumption(buffer).await;
        self.queue.wait(self.subscription_group.id()).await;
        Ok(())
    }

    async fn resume_expired_pauses(&self) {
        let mut expired: Vec<Partition> = Vec::new();
        self.coordinators
            .lock()
            .unwrap()
            .resume(|partition| expired.push(partition.clone()));

        for partition in expired {
            self.client
                .resume(partition.topic(), partition.partition_number())
                .await;
        }
    }

    /// Revocations observed during the poll: build revoked jobs for every
    /// affected executor, drop their buffers, and drain before any new
    /// consumption for those partitions is scheduled.
    async fn handle_rebalance(&self) {
        let manager = self.client.rebalance_manager();
        let revoked = manager.revoked_partitions();
        manager.clear();

        if revoked.is_empty() {
            return;
        }

        let mut jobs = Vec::new();
        {
            let mut coordinators = self.coordinators.lock().unwrap();
            let mut executors = self.executors.lock().unwrap();
            for partition in &revoked {
                coordinators.revoke(partition);
                for executor in executors.revoke(partition) {
                    jobs.push(Job::revoked(self.subscription_group.id(), executor));
                }
            }
        }

        if jobs.is_empty() {
            return;
        }

        info!(listener = %self.id, count = jobs.len(), "scheduling revocation jobs");
        self.scheduler.schedule_revocation(&self.queue, jobs);
        self.queue.wait(self.subscription_group.id()).await;
    }

    async fn schedule_consumption(&self, buffer: MessagesBuffer) {
        let mut jobs = Vec::new();
        {
            let mut coordinators = self.coordinators.lock().unwrap();
            let mut executors = self.executors.lock().unwrap();

            for (partition, batch) in buffer.into_batches() {
                let Some(topic) = self.subscription_group.topic(partition.topic()) else {
                    continue;
                };
                let coordinator = coordinators.find_or_create(&partition);

                if batch.is_empty() {
                    let executor = executors.find_or_create(
                        &partition,
                        "0",
                        topic,
                        &coordinator,
                        &self.client,
                        &self.runtime,
                    );
                    jobs.push(Job::idle(self.subscription_group.id(), executor));
                    continue;
                }

                coordinator.start(&batch);
                for (group_id, sub_batch) in topic.partitioner().call(batch) {
                    let executor = executors.find_or_create(
                        &partition,
                        &group_id,
                        topic,
                        &coordinator,
                        &self.client,
                        &self.runtime,
                    );
                    coordinator.increment();
                    jobs.push(Job::consume(
                        self.subscription_group.id(),
                        executor,
                        sub_batch,
                    ));
                }
            }
        }

        for job in &jobs {
            job.before_enqueue().await;
        }
        self.scheduler.schedule_consumption(&self.queue, jobs);
    }

    /// Drain-then-close: keep the session alive with pings while work
    /// finishes, run shutdown jobs, rendezvous with the other listeners of
    /// this consumer group, then stop the client.
    async fn shutdown_sequence(&self) {
        let _guard = self.shutdown_lock.lock().await;
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let drain_started = Instant::now();
        let deadline = drain_started + self.runtime.config.shutdown_timeout();
        let gid = self.subscription_group.id().to_string();

        self.wait_with_ping(deadline, || self.queue.is_empty(&gid)).await;

        if self.runtime.status.quiet_mode() {
            self.runtime.status.quieted();
            while !self.runtime.status.stopping() {
                self.client.ping().await;
                sleep(self.runtime.config.tick_interval()).await;
            }
        }

        let jobs: Vec<_> = {
            let executors = self.executors.lock().unwrap();
            executors
                .each()
                .map(|executor| Job::shutdown(&gid, executor.clone()))
                .collect()
        };
        if !jobs.is_empty() {
            info!(listener = %self.id, count = jobs.len(), "scheduling shutdown jobs");
            self.scheduler.schedule_shutdown(&self.queue, jobs);
        }
        self.wait_with_ping(deadline, || self.queue.is_empty(&gid)).await;

        self.group_coordinator.finish_work(&self.id);
        self.wait_with_ping(deadline, || self.group_coordinator.shutdown_ready())
            .await;

        // one last ping so a rebalance triggered by peers is observed
        self.client.ping().await;
        self.client.stop().await;

        metrics::histogram!(LISTENER_SHUTDOWN_DRAIN_MS)
            .record(drain_started.elapsed().as_millis() as f64);
        info!(listener = %self.id, "listener stopped");
    }

    async fn wait_with_ping(&self, deadline: Instant, condition: impl Fn() -> bool) {
        while !condition() && Instant::now() < deadline {
            self.client.ping().await;
            sleep(self.runtime.config.tick_interval()).await;
        }
    }

    /// Post-crash restart: drop this group's pending jobs, rebuild the
    /// driver consumer, reset per-partition state and re-enter the loop.
    async fn recover(&self) {
        metrics::counter!(LISTENER_RECOVERIES).increment(1);
        warn!(listener = %self.id, "restarting after fetch loop failure");

        self.queue.clear(self.subscription_group.id());
        if let Err(error) = self.client.reset().await {
            warn!(listener = %self.id, error = %error, "client reset failed");
        }
        self.coordinators.lock().unwrap().reset();
        self.executors.lock().unwrap().clear();

        sleep(RECOVERY_BACKOFF).await;
    }

    /// Forceful shutdown from the supervisor. Safe to race with the normal
    /// sequence; whichever runs first wins and the other becomes a no-op.
    pub async fn shutdown(&self) {
        let _guard = self.shutdown_lock.lock().await;
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let gid = self.subscription_group.id().to_string();
        let deadline = Instant::now() + self.runtime.config.shutdown_timeout();

        let jobs: Vec<_> = {
            let executors = self.executors.lock().unwrap();
            executors
                .each()
                .map(|executor| Job::shutdown(&gid, executor.clone()))
                .collect()
        };
        if !jobs.is_empty() {
            self.scheduler.schedule_shutdown(&self.queue, jobs);
        }
        self.wait_with_ping(deadline, || self.queue.is_empty(&gid)).await;

        self.group_coordinator.finish_work(&self.id);
        self.client.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_coordinator_countdown() {
        let coordinator = ConsumerGroupCoordinator::new(2);
        assert!(!coordinator.shutdown_ready());

        coordinator.finish_work("a");
        assert!(!coordinator.shutdown_ready());

        coordinator.finish_work("b");
        assert!(coordinator.shutdown_ready());
    }

    #[test]
    fn test_group_coordinator_unlock_is_idempotent() {
        let coordinator = ConsumerGroupCoordinator::new(1);
        coordinator.unlock();
        coordinator.unlock();
        assert!(!coordinator.shutdown_ready());
    }
}
