use std::sync::Arc;

use crate::jobs::{Job, JobsQueue};

/// Policy for handing jobs to the queue. The default enqueues in submission
/// order; alternatives may interleave groups for fairness but must keep
/// per-partition submission order.
pub trait Scheduler: Send + Sync {
    fn schedule_consumption(&self, queue: &JobsQueue, jobs: Vec<Arc<Job>>) {
        for job in jobs {
            queue.push(job);
        }
    }

    fn schedule_revocation(&self, queue: &JobsQueue, jobs: Vec<Arc<Job>>) {
        for job in jobs {
            queue.push(job);
        }
    }

    fn schedule_shutdown(&self, queue: &JobsQueue, jobs: Vec<Arc<Job>>) {
        for job in jobs {
            queue.push(job);
        }
    }
}

/// Submission-order scheduling.
pub struct FifoScheduler;

impl Scheduler for FifoScheduler {}
