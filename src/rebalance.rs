use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rdkafka::consumer::{BaseConsumer, ConsumerContext, Rebalance};
use rdkafka::{ClientContext, TopicPartitionList};
use tracing::{error, info};

use crate::monitor::{Event, Monitor};
use crate::types::Partition;

#[derive(Default)]
struct RebalanceState {
    assigned: HashSet<Partition>,
    revoked: HashSet<Partition>,
    lost: HashSet<Partition>,
    changed: bool,
    active: bool,
}

/// Records the driver's rebalance callbacks. Written only from the driver's
/// callback thread, read from the listener; the mutex publishes the flags.
#[derive(Default)]
pub struct RebalanceManager {
    state: Mutex<RebalanceState>,
}

impl RebalanceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_assigned(&self, partitions: Vec<Partition>) {
        let mut state = self.state.lock().unwrap();
        state.assigned.extend(partitions);
        state.changed = true;
        state.active = true;
    }

    pub fn record_revoked(&self, partitions: Vec<Partition>) {
        let mut state = self.state.lock().unwrap();
        state.revoked.extend(partitions);
        state.changed = true;
        state.active = true;
    }

    pub fn record_lost(&self, partitions: Vec<Partition>) {
        let mut state = self.state.lock().unwrap();
        // lost stays a subset of revoked
        state.revoked.extend(partitions.iter().cloned());
        state.lost.extend(partitions);
        state.changed = true;
        state.active = true;
    }

    pub fn changed(&self) -> bool {
        self.state.lock().unwrap().changed
    }

    /// True once the first rebalance callback of any kind arrived.
    pub fn active(&self) -> bool {
        self.state.lock().unwrap().active
    }

    pub fn assigned_partitions(&self) -> Vec<Partition> {
        self.state.lock().unwrap().assigned.iter().cloned().collect()
    }

    /// Revoked union lost.
    pub fn revoked_partitions(&self) -> Vec<Partition> {
        self.state.lock().unwrap().revoked.iter().cloned().collect()
    }

    pub fn lost_partitions(&self) -> Vec<Partition> {
        self.state.lock().unwrap().lost.iter().cloned().collect()
    }

    pub fn assignment_lost(&self) -> bool {
        !self.state.lock().unwrap().lost.is_empty()
    }

    /// Clears the change sets and the changed flag; `active` survives.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.assigned.clear();
        state.revoked.clear();
        state.lost.clear();
        state.changed = false;
    }
}

fn to_partitions(tpl: &TopicPartitionList) -> Vec<Partition> {
    tpl.elements().into_iter().map(Partition::from).collect()
}

/// Driver context wired into the rdkafka consumer. Publishes rebalances into
/// the manager and statistics into the monitor; never calls user code from
/// the driver thread.
pub struct ConductorConsumerContext {
    manager: Arc<RebalanceManager>,
    monitor: Arc<Monitor>,
}

impl ConductorConsumerContext {
    pub fn new(manager: Arc<RebalanceManager>, monitor: Arc<Monitor>) -> Self {
        Self { manager, monitor }
    }
}

impl ClientContext for ConductorConsumerContext {
    fn stats(&self, statistics: rdkafka::Statistics) {
        self.monitor.notify(Event::StatisticsEmitted {
            payload: format!("{statistics:?}"),
        });
    }
}

impl ConsumerContext for ConductorConsumerContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(partitions) => {
                info!(count = partitions.count(), "partitions revoked");
                self.manager.record_revoked(to_partitions(partitions));
            }
            Rebalance::Assign(_) => {}
            Rebalance::Error(e) => {
                // a rebalance error means the whole assignment is gone
                error!(error = %e, "rebalance failed, assignment lost");
                let assigned = self.manager.assigned_partitions();
                self.manager.record_lost(assigned);
            }
        }
    }

    fn post_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Assign(partitions) => {
                info!(count = partitions.count(), "partitions assigned");
                self.manager.record_assigned(to_partitions(partitions));
            }
            Rebalance::Revoke(_) => {}
            Rebalance::Error(e) => {
                error!(error = %e, "post-rebalance error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partitions(topic: &str, numbers: &[i32]) -> Vec<Partition> {
        numbers.iter().map(|n| Partition::new(topic, *n)).collect()
    }

    #[test]
    fn test_starts_inactive_and_unchanged() {
        let manager = RebalanceManager::new();
        assert!(!manager.active());
        assert!(!manager.changed());
        assert!(!manager.assignment_lost());
    }

    #[test]
    fn test_assignment_sets_flags() {
        let manager = RebalanceManager::new();
        manager.record_assigned(partitions("events", &[0, 1]));

        assert!(manager.active());
        assert!(manager.changed());
        assert_eq!(manager.assigned_partitions().len(), 2);
        assert!(manager.revoked_partitions().is_empty());
    }

    #[test]
    fn test_lost_is_subset_of_revoked() {
        let manager = RebalanceManager::new();
        manager.record_revoked(partitions("events", &[0]));
        manager.record_lost(partitions("events", &[1]));

        let revoked = manager.revoked_partitions();
        assert_eq!(revoked.len(), 2);
        assert_eq!(manager.lost_partitions(), partitions("events", &[1]));
        assert!(manager.assignment_lost());
    }

    #[test]
    fn test_clear_preserves_active() {
        let manager = RebalanceManager::new();
        manager.record_assigned(partitions("events", &[0]));
        manager.record_revoked(partitions("events", &[0]));

        manager.clear();

        assert!(!manager.changed());
        assert!(manager.assigned_partitions().is_empty());
        assert!(manager.revoked_partitions().is_empty());
        assert!(manager.active());
    }
}
