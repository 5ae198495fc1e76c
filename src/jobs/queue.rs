use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::jobs::Job;
use crate::metrics_names::{JOBS_QUEUE_IN_FLIGHT, JOBS_QUEUE_PENDING};

#[derive(Default, Clone, Copy)]
struct GroupCounts {
    pending: usize,
    in_flight: usize,
}

#[derive(Default)]
struct Inner {
    queue: VecDeque<Arc<Job>>,
    counts: HashMap<String, GroupCounts>,
    closed: bool,
}

/// Process-wide job distribution: a FIFO shared by all workers plus
/// per-subscription-group accounting so each listener can wait for its own
/// work to drain. Push never blocks; backpressure comes from listeners
/// waiting on their group before the next fetch.
#[derive(Default)]
pub struct JobsQueue {
    inner: Mutex<Inner>,
    work_notify: Notify,
    drain_notify: Notify,
}

impl JobsQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, job: Arc<Job>) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return;
            }
            let gid = job.subscription_group_id().to_string();
            let counts = inner.counts.entry(gid.clone()).or_default();
            counts.pending += 1;
            metrics::gauge!(JOBS_QUEUE_PENDING, "group" => gid).set(counts.pending as f64);
            inner.queue.push_back(job);
        }
        self.work_notify.notify_one();
    }

    /// Blocks until a job is available or the queue closes. `None` means
    /// closed and drained.
    pub async fn pop(&self) -> Option<Arc<Job>> {
        loop {
            let notified = self.work_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(job) = inner.queue.pop_front() {
                    let gid = job.subscription_group_id().to_string();
                    let counts = inner.counts.entry(gid.clone()).or_default();
                    counts.pending = counts.pending.saturating_sub(1);
                    counts.in_flight += 1;
                    metrics::gauge!(JOBS_QUEUE_PENDING, "group" => gid.clone())
                        .set(counts.pending as f64);
                    metrics::gauge!(JOBS_QUEUE_IN_FLIGHT, "group" => gid)
                        .set(counts.in_flight as f64);
                    return Some(job);
                }
                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Workers report completion here; wakes every `wait` caller.
    pub fn complete(&self, job: &Arc<Job>) {
        {
            let mut inner = self.inner.lock().unwrap();
            let gid = job.subscription_group_id().to_string();
            let counts = inner.counts.entry(gid.clone()).or_default();
            counts.in_flight = counts.in_flight.saturating_sub(1);
            metrics::gauge!(JOBS_QUEUE_IN_FLIGHT, "group" => gid).set(counts.in_flight as f64);
        }
        self.drain_notify.notify_waiters();
    }

    /// True when the group has nothing pending and nothing in flight.
    pub fn is_empty(&self, subscription_group_id: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .counts
            .get(subscription_group_id)
            .map(|c| c.pending == 0 && c.in_flight == 0)
            .unwrap_or(true)
    }

    /// Blocks until the group drains (pending and in-flight both zero) or
    /// the queue closes.
    pub async fn wait(&self, subscription_group_id: &str) {
        loop {
            let notified = self.drain_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let inner = self.inner.lock().unwrap();
                let drained = inner
                    .counts
                    .get(subscription_group_id)
                    .map(|c| c.pending == 0 && c.in_flight == 0)
                    .unwrap_or(true);
                if drained || inner.closed {
                    return;
                }
            }

            notified.await;
        }
    }

    /// Drops the group's pending jobs. In-flight counters are preserved so
    /// `wait` stays correct for jobs already handed to workers.
    pub fn clear(&self, subscription_group_id: &str) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner
                .queue
                .retain(|job| job.subscription_group_id() != subscription_group_id);
            if let Some(counts) = inner.counts.get_mut(subscription_group_id) {
                counts.pending = 0;
            }
            metrics::gauge!(JOBS_QUEUE_PENDING, "group" => subscription_group_id.to_string())
                .set(0.0);
        }
        self.drain_notify.notify_waiters();
    }

    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
        self.work_notify.notify_waiters();
        self.drain_notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }
}
