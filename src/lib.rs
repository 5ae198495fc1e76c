//! Core runtime of a Kafka consumer framework: polling, cooperative
//! rebalancing, worker scheduling and the pause/resume/offset lifecycle.
//! The CLI wrapper, routing DSL, producer and instrumentation sinks live
//! outside this crate and talk to it through the types re-exported below.

pub mod buffers;
pub mod client;
pub mod config;
pub mod consumer;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod executor;
pub mod jobs;
pub mod listener;
pub mod messages;
pub mod metrics_names;
pub mod monitor;
pub mod rebalance;
pub mod routing;
pub mod runtime;
pub mod status;
pub mod test_support;
pub mod time_tracker;
pub mod types;

// Public API - what embedders of the runtime should use
pub use client::{Client, SeekOffset, SeekTarget, COOPERATIVE_STICKY_MAX_WAIT};
pub use config::Config;
pub use consumer::{Consumer, ConsumerHandle, DlqDispatcher};
pub use driver::{DriverFactory, KafkaDriver, RdKafkaDriver};
pub use error::{ConductorError, ErrorType};
pub use jobs::{FifoScheduler, JobsQueue, Scheduler, WorkerPool};
pub use listener::{ConsumerGroupCoordinator, Listener};
pub use messages::{Batch, Deserializer, JsonDeserializer, Message};
pub use monitor::{Event, Monitor};
pub use routing::{Partitioner, SubscriptionGroup, Topic};
pub use runtime::Runtime;
pub use status::{AppStatus, ProcessState};
pub use types::{Partition, PartitionOffset};
