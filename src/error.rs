use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use thiserror::Error;

/// Errors surfaced by the runtime to its embedder or to consumer code.
#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),

    #[error("time-based offset did not resolve for {partition}")]
    InvalidTimeBasedOffset { partition: String },

    #[error("client is closed")]
    ClientClosed,

    #[error("polling failed after {attempts} attempts: {source}")]
    PollRetriesExhausted {
        attempts: u32,
        #[source]
        source: KafkaError,
    },

    #[error("driver build failed: {0}")]
    DriverBuild(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ConductorError>;

/// Canonical `error.occurred` type strings emitted through the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    ClientPoll,
    ListenerFetchLoop,
    ConsumerConsume,
    ConsumerRevoked,
    ConsumerBeforeEnqueue,
    ConsumerBeforeConsume,
    ConsumerAfterConsume,
    ConsumerIdle,
    ConsumerShutdown,
    WorkerProcess,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::ClientPoll => "connection.client.poll.error",
            ErrorType::ListenerFetchLoop => "connection.listener.fetch_loop.error",
            ErrorType::ConsumerConsume => "consumer.consume.error",
            ErrorType::ConsumerRevoked => "consumer.revoked.error",
            ErrorType::ConsumerBeforeEnqueue => "consumer.before_enqueue.error",
            ErrorType::ConsumerBeforeConsume => "consumer.before_consume.error",
            ErrorType::ConsumerAfterConsume => "consumer.after_consume.error",
            ErrorType::ConsumerIdle => "consumer.idle.error",
            ErrorType::ConsumerShutdown => "consumer.shutdown.error",
            ErrorType::WorkerProcess => "worker.process.error",
        }
    }
}

/// How the poll loop should react to a driver error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollErrorDisposition {
    /// Retry with backoff, bounded by the attempt budget.
    Retryable { early_report: bool },
    /// Missing topic: empty poll when auto-create is on, fatal during
    /// shutdown, otherwise retried.
    UnknownTopicOrPartition,
    Fatal,
}

pub fn classify_poll_error(error: &KafkaError) -> PollErrorDisposition {
    match kafka_error_code(error) {
        Some(RDKafkaErrorCode::UnknownTopicOrPartition) => {
            PollErrorDisposition::UnknownTopicOrPartition
        }
        Some(
            RDKafkaErrorCode::PollExceeded
            | RDKafkaErrorCode::NetworkException
            | RDKafkaErrorCode::BrokerTransportFailure,
        ) => PollErrorDisposition::Retryable { early_report: true },
        Some(RDKafkaErrorCode::Fatal | RDKafkaErrorCode::Authentication) => {
            PollErrorDisposition::Fatal
        }
        _ => match error {
            KafkaError::MessageConsumptionFatal(_) => PollErrorDisposition::Fatal,
            _ => PollErrorDisposition::Retryable { early_report: false },
        },
    }
}

/// Outcome classification for offset commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitDisposition {
    /// `false` result: partition ownership is gone.
    OwnershipLost,
    /// Nothing to commit counts as success.
    NothingToCommit,
    /// Transient coordinator load: sleep and retry.
    RetryAfterDelay,
    Fatal,
}

pub fn classify_commit_error(error: &KafkaError) -> CommitDisposition {
    match kafka_error_code(error) {
        Some(RDKafkaErrorCode::AssignmentLost | RDKafkaErrorCode::UnknownMemberId) => {
            CommitDisposition::OwnershipLost
        }
        Some(RDKafkaErrorCode::NoOffset) => CommitDisposition::NothingToCommit,
        Some(RDKafkaErrorCode::CoordinatorLoadInProgress) => CommitDisposition::RetryAfterDelay,
        _ => CommitDisposition::Fatal,
    }
}

/// `true` when a store_offset failure should become a `false` return instead
/// of an error: ownership gone or the consumer is in a transitional state.
pub fn store_offset_rejected(error: &KafkaError) -> bool {
    matches!(
        kafka_error_code(error),
        Some(RDKafkaErrorCode::AssignmentLost | RDKafkaErrorCode::State)
    )
}

pub fn kafka_error_code(error: &KafkaError) -> Option<RDKafkaErrorCode> {
    error.rdkafka_error_code()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_error_classification() {
        let transport = KafkaError::MessageConsumption(RDKafkaErrorCode::BrokerTransportFailure);
        assert_eq!(
            classify_poll_error(&transport),
            PollErrorDisposition::Retryable { early_report: true }
        );

        let missing = KafkaError::MessageConsumption(RDKafkaErrorCode::UnknownTopicOrPartition);
        assert_eq!(
            classify_poll_error(&missing),
            PollErrorDisposition::UnknownTopicOrPartition
        );

        let timeout = KafkaError::MessageConsumption(RDKafkaErrorCode::OperationTimedOut);
        assert_eq!(
            classify_poll_error(&timeout),
            PollErrorDisposition::Retryable { early_report: false }
        );

        let fatal = KafkaError::MessageConsumptionFatal(RDKafkaErrorCode::BadMessage);
        assert_eq!(classify_poll_error(&fatal), PollErrorDisposition::Fatal);
    }

    #[test]
    fn test_commit_error_classification() {
        let lost = KafkaError::ConsumerCommit(RDKafkaErrorCode::AssignmentLost);
        assert_eq!(classify_commit_error(&lost), CommitDisposition::OwnershipLost);

        let unknown = KafkaError::ConsumerCommit(RDKafkaErrorCode::UnknownMemberId);
        assert_eq!(
            classify_commit_error(&unknown),
            CommitDisposition::OwnershipLost
        );

        let empty = KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset);
        assert_eq!(
            classify_commit_error(&empty),
            CommitDisposition::NothingToCommit
        );

        let loading = KafkaError::ConsumerCommit(RDKafkaErrorCode::CoordinatorLoadInProgress);
        assert_eq!(
            classify_commit_error(&loading),
            CommitDisposition::RetryAfterDelay
        );

        let other = KafkaError::ConsumerCommit(RDKafkaErrorCode::InvalidPartitions);
        assert_eq!(classify_commit_error(&other), CommitDisposition::Fatal);
    }

    #[test]
    fn test_store_offset_rejection() {
        assert!(store_offset_rejected(&KafkaError::StoreOffset(
            RDKafkaErrorCode::AssignmentLost
        )));
        assert!(store_offset_rejected(&KafkaError::StoreOffset(
            RDKafkaErrorCode::State
        )));
        assert!(!store_offset_rejected(&KafkaError::StoreOffset(
            RDKafkaErrorCode::UnknownPartition
        )));
    }

    #[test]
    fn test_error_type_strings() {
        assert_eq!(ErrorType::ClientPoll.as_str(), "connection.client.poll.error");
        assert_eq!(ErrorType::WorkerProcess.as_str(), "worker.process.error");
        assert_eq!(ErrorType::ConsumerConsume.as_str(), "consumer.consume.error");
    }
}
