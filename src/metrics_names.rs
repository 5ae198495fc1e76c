//! Metric name constants, kept in one place so dashboards and alerts have a
//! single source of truth.

// Client / polling
pub const CLIENT_POLL_ERRORS: &str = "conductor_client_poll_errors_total";
pub const CLIENT_POLL_RETRIES: &str = "conductor_client_poll_retries_total";
pub const CLIENT_BATCH_SIZE: &str = "conductor_client_batch_size";
pub const CLIENT_BATCH_FILL_RATIO: &str = "conductor_client_batch_fill_ratio";
pub const CLIENT_BATCH_COLLECTION_DURATION_MS: &str =
    "conductor_client_batch_collection_duration_ms";
pub const CLIENT_COMMIT_FAILURES: &str = "conductor_client_commit_failures_total";
pub const CLIENT_PAUSES: &str = "conductor_client_pauses_total";
pub const CLIENT_RESUMES: &str = "conductor_client_resumes_total";

// Jobs queue
pub const JOBS_QUEUE_PENDING: &str = "conductor_jobs_queue_pending";
pub const JOBS_QUEUE_IN_FLIGHT: &str = "conductor_jobs_queue_in_flight";

// Workers
pub const WORKER_PROCESSING_DURATION_MS: &str = "conductor_worker_processing_duration_ms";
pub const WORKER_ERRORS: &str = "conductor_worker_errors_total";

// Consumption outcomes
pub const CONSUMER_BATCHES: &str = "conductor_consumer_batches_total";
pub const CONSUMER_RETRIES: &str = "conductor_consumer_retries_total";
pub const CONSUMER_MESSAGES: &str = "conductor_consumer_messages_total";
pub const DLQ_DISPATCHES: &str = "conductor_dlq_dispatches_total";
pub const THROTTLE_PAUSES: &str = "conductor_throttle_pauses_total";

// Listener
pub const LISTENER_FETCH_LOOPS: &str = "conductor_listener_fetch_loops_total";
pub const LISTENER_RECOVERIES: &str = "conductor_listener_recoveries_total";
pub const LISTENER_SHUTDOWN_DRAIN_MS: &str = "conductor_listener_shutdown_drain_ms";
