use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::ErrorType;
use crate::jobs::JobsQueue;
use crate::metrics_names::{WORKER_ERRORS, WORKER_PROCESSING_DURATION_MS};
use crate::monitor::Event;
use crate::runtime::Runtime;

/// Pool of `concurrency` worker tasks draining the shared jobs queue.
/// Workers survive every job failure; user errors are handled inside the
/// executor hooks and reported through the monitor.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(runtime: Arc<Runtime>, queue: Arc<JobsQueue>) -> Self {
        let concurrency = runtime.config.concurrency;
        info!(concurrency, "starting worker pool");

        let handles = (0..concurrency)
            .map(|worker_id| {
                let runtime = runtime.clone();
                let queue = queue.clone();
                tokio::spawn(async move {
                    Self::worker_loop(worker_id, runtime, queue).await;
                })
            })
            .collect();

        Self { handles }
    }

    async fn worker_loop(worker_id: usize, runtime: Arc<Runtime>, queue: Arc<JobsQueue>) {
        debug!(worker_id, "worker started");

        while let Some(job) = queue.pop().await {
            let kind = job.kind().as_str();
            runtime.monitor.notify(Event::WorkerProcess { job_kind: kind });

            let started = Instant::now();
            if let Err(error) = job.run().await {
                metrics::counter!(WORKER_ERRORS).increment(1);
                runtime.monitor.notify(Event::ErrorOccurred {
                    error_type: ErrorType::WorkerProcess,
                    details: error.to_string(),
                });
            }
            let elapsed = started.elapsed();

            metrics::histogram!(WORKER_PROCESSING_DURATION_MS, "kind" => kind)
                .record(elapsed.as_millis() as f64);
            runtime.monitor.notify(Event::WorkerProcessed {
                job_kind: kind,
                time: elapsed,
            });

            queue.complete(&job);
            runtime.monitor.notify(Event::WorkerCompleted { job_kind: kind });
        }

        debug!(worker_id, "worker shutting down");
    }

    /// Waits for every worker to exit; call after closing the queue.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
