use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::config::Config;
use crate::messages::Batch;
use crate::types::Partition;

/// Per-(topic, partition) processing state: scheduled work units, the pause
/// timer, revocation and retry bookkeeping, and strategy scratch state
/// (throttling window, pending seek offset).
pub struct Coordinator {
    partition: Partition,
    running_jobs: AtomicUsize,
    revoked: AtomicBool,
    paused: AtomicBool,
    pause_until: Mutex<Option<Instant>>,
    attempt: AtomicU32,
    // Highest offset explicitly marked as consumed; -1 until the first mark
    marked_offset: AtomicI64,
    // Offset to seek to before the next batch; -1 when unset
    seek_offset: AtomicI64,
    // Throttling window
    throttle_window_start: Mutex<Option<Instant>>,
    throttle_used: AtomicUsize,
    pause_timeout: Duration,
    pause_max_timeout: Duration,
    exponential_backoff: bool,
}

impl Coordinator {
    pub fn new(partition: Partition, config: &Config) -> Self {
        Self {
            partition,
            running_jobs: AtomicUsize::new(0),
            revoked: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            pause_until: Mutex::new(None),
            attempt: AtomicU32::new(0),
            marked_offset: AtomicI64::new(-1),
            seek_offset: AtomicI64::new(-1),
            throttle_window_start: Mutex::new(None),
            throttle_used: AtomicUsize::new(0),
            pause_timeout: config.pause_timeout(),
            pause_max_timeout: config.pause_max_timeout(),
            exponential_backoff: config.pause_with_exponential_backoff,
        }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Resets per-batch counters before scheduling work for a new batch.
    pub fn start(&self, _batch: &Batch) {
        self.running_jobs.store(0, Ordering::SeqCst);
    }

    pub fn increment(&self) {
        self.running_jobs.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement(&self) {
        let previous = self.running_jobs.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "job counter underflow on {}", self.partition);
    }

    pub fn running_jobs(&self) -> usize {
        self.running_jobs.load(Ordering::SeqCst)
    }

    /// Finished means no scheduled work remains, or the partition was revoked
    /// and remaining work is moot.
    pub fn finished(&self) -> bool {
        self.revoked() || self.running_jobs() == 0
    }

    pub fn revoke(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }

    pub fn revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }

    pub fn pause(&self, timeout: Duration) {
        *self.pause_until.lock().unwrap() = Some(Instant::now() + timeout);
        self.paused.store(true, Ordering::SeqCst);
        debug!(partition = %self.partition, ?timeout, "paused");
    }

    /// Pause driven by a processing failure; the delay grows with the attempt
    /// counter when exponential backoff is on.
    pub fn pause_with_backoff(&self) {
        let attempt = self.attempt.load(Ordering::SeqCst).max(1);
        let timeout = if self.exponential_backoff {
            let exp = (attempt - 1).min(16);
            self.pause_timeout
                .saturating_mul(1u32 << exp)
                .min(self.pause_max_timeout)
        } else {
            self.pause_timeout
        };
        self.pause(timeout);
    }

    pub fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Clears the pause if its timer expired. Returns true exactly once per
    /// expiry so the caller can issue the driver resume.
    pub fn resume_if_expired(&self) -> bool {
        if !self.paused() {
            return false;
        }
        let mut pause_until = self.pause_until.lock().unwrap();
        match *pause_until {
            Some(deadline) if Instant::now() >= deadline => {
                *pause_until = None;
                self.paused.store(false, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    pub fn increment_attempt(&self) -> u32 {
        self.attempt.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn reset_attempt(&self) {
        self.attempt.store(0, Ordering::SeqCst);
    }

    pub fn record_marked(&self, offset: i64) {
        self.marked_offset.fetch_max(offset, Ordering::SeqCst);
    }

    pub fn marked_offset(&self) -> Option<i64> {
        match self.marked_offset.load(Ordering::SeqCst) {
            -1 => None,
            offset => Some(offset),
        }
    }

    pub fn set_seek_offset(&self, offset: i64) {
        self.seek_offset.store(offset, Ordering::SeqCst);
    }

    pub fn take_seek_offset(&self) -> Option<i64> {
        match self.seek_offset.swap(-1, Ordering::SeqCst) {
            -1 => None,
            offset => Some(offset),
        }
    }

    /// Throttling admission: how many of `requested` messages fit in the
    /// current window. Returns the admitted count and, when the window is
    /// exhausted, the time until it reopens.
    pub fn throttle_admit(
        &self,
        requested: usize,
        limit: usize,
        interval: Duration,
    ) -> (usize, Option<Duration>) {
        let mut window_start = self.throttle_window_start.lock().unwrap();
        let now = Instant::now();

        match *window_start {
            Some(start) if now.duration_since(start) < interval => {}
            _ => {
                *window_start = Some(now);
                self.throttle_used.store(0, Ordering::SeqCst);
            }
        }

        let used = self.throttle_used.load(Ordering::SeqCst);
        let available = limit.saturating_sub(used);
        let admitted = requested.min(available);
        self.throttle_used.fetch_add(admitted, Ordering::SeqCst);

        if admitted < requested {
            let reopens = window_start
                .map(|start| interval.saturating_sub(now.duration_since(start)))
                .unwrap_or(interval);
            (admitted, Some(reopens))
        } else {
            (admitted, None)
        }
    }
}

/// Owns one Coordinator per active (topic, partition) for a listener.
pub struct CoordinatorsBuffer {
    config: Config,
    coordinators: HashMap<Partition, Arc<Coordinator>>,
}

impl CoordinatorsBuffer {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            coordinators: HashMap::new(),
        }
    }

    pub fn find_or_create(&mut self, partition: &Partition) -> Arc<Coordinator> {
        self.coordinators
            .entry(partition.clone())
            .or_insert_with(|| Arc::new(Coordinator::new(partition.clone(), &self.config)))
            .clone()
    }

    pub fn get(&self, partition: &Partition) -> Option<Arc<Coordinator>> {
        self.coordinators.get(partition).cloned()
    }

    /// Yields every partition whose pause just expired.
    pub fn resume(&self, mut f: impl FnMut(&Partition)) {
        for (partition, coordinator) in &self.coordinators {
            if coordinator.resume_if_expired() {
                f(partition);
            }
        }
    }

    /// Marks the partition revoked and drops it from the buffer so a future
    /// reassignment starts from clean state.
    pub fn revoke(&mut self, partition: &Partition) {
        if let Some(coordinator) = self.coordinators.remove(partition) {
            coordinator.revoke();
        }
    }

    pub fn reset(&mut self) {
        self.coordinators.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::init_with_defaults().unwrap()
    }

    fn coordinator() -> Coordinator {
        Coordinator::new(Partition::new("events", 0), &config())
    }

    #[test]
    fn test_job_counting() {
        let coordinator = coordinator();
        assert!(coordinator.finished());

        coordinator.increment();
        coordinator.increment();
        assert!(!coordinator.finished());

        coordinator.decrement();
        coordinator.decrement();
        assert!(coordinator.finished());
    }

    #[test]
    fn test_revoked_overrides_counter() {
        let coordinator = coordinator();
        coordinator.increment();
        assert!(!coordinator.finished());

        coordinator.revoke();
        assert!(coordinator.finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_resume_cycle() {
        let coordinator = coordinator();
        assert!(!coordinator.resume_if_expired());

        coordinator.pause(Duration::from_millis(500));
        assert!(coordinator.paused());
        assert!(!coordinator.resume_if_expired());

        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(coordinator.resume_if_expired());
        assert!(!coordinator.paused());
        // a second check must not fire again
        assert!(!coordinator.resume_if_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_pause_grows_and_caps() {
        let mut cfg = config();
        cfg.pause_timeout_ms = 1000;
        cfg.pause_max_timeout_ms = 3000;
        let coordinator = Coordinator::new(Partition::new("events", 0), &cfg);

        coordinator.increment_attempt();
        coordinator.pause_with_backoff();
        let first = *coordinator.pause_until.lock().unwrap();

        coordinator.increment_attempt();
        coordinator.increment_attempt();
        coordinator.pause_with_backoff();
        let capped = *coordinator.pause_until.lock().unwrap();

        let now = Instant::now();
        assert_eq!(first.unwrap() - now, Duration::from_millis(1000));
        assert_eq!(capped.unwrap() - now, Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_admission() {
        let coordinator = coordinator();
        let interval = Duration::from_secs(60);

        let (admitted, backoff) = coordinator.throttle_admit(5, 2, interval);
        assert_eq!(admitted, 2);
        assert!(backoff.is_some());

        let (admitted, _) = coordinator.throttle_admit(1, 2, interval);
        assert_eq!(admitted, 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        let (admitted, backoff) = coordinator.throttle_admit(2, 2, interval);
        assert_eq!(admitted, 2);
        assert!(backoff.is_none());
    }

    #[test]
    fn test_marked_and_seek_offsets() {
        let coordinator = coordinator();
        assert_eq!(coordinator.marked_offset(), None);

        coordinator.record_marked(4);
        coordinator.record_marked(2);
        assert_eq!(coordinator.marked_offset(), Some(4));

        assert_eq!(coordinator.take_seek_offset(), None);
        coordinator.set_seek_offset(7);
        assert_eq!(coordinator.take_seek_offset(), Some(7));
        assert_eq!(coordinator.take_seek_offset(), None);
    }

    #[test]
    fn test_buffer_find_or_create_and_revoke() {
        let mut buffer = CoordinatorsBuffer::new(config());
        let partition = Partition::new("events", 3);

        let a = buffer.find_or_create(&partition);
        let b = buffer.find_or_create(&partition);
        assert!(Arc::ptr_eq(&a, &b));

        buffer.revoke(&partition);
        assert!(a.revoked());
        let c = buffer.find_or_create(&partition);
        assert!(!c.revoked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffer_resume_yields_expired_only() {
        let mut buffer = CoordinatorsBuffer::new(config());
        let expired = Partition::new("events", 0);
        let pending = Partition::new("events", 1);

        buffer.find_or_create(&expired).pause(Duration::from_millis(100));
        buffer.find_or_create(&pending).pause(Duration::from_secs(60));

        tokio::time::advance(Duration::from_millis(200)).await;

        let mut resumed = Vec::new();
        buffer.resume(|p| resumed.push(p.clone()));
        assert_eq!(resumed, vec![expired]);
    }
}
