use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::ErrorType;

/// Structured events emitted by the core. Instrumentation sinks subscribe to
/// the monitor; the core itself only publishes.
#[derive(Debug, Clone)]
pub enum Event {
    ConnectionListenerBeforeFetchLoop {
        subscription_group_id: String,
    },
    ConnectionListenerFetchLoop {
        subscription_group_id: String,
    },
    ConnectionListenerFetchLoopReceived {
        subscription_group_id: String,
        messages_count: usize,
        time: Duration,
    },
    ClientPause {
        topic: String,
        partition: i32,
        offset: i64,
    },
    ClientResume {
        topic: String,
        partition: i32,
    },
    ErrorOccurred {
        error_type: ErrorType,
        details: String,
    },
    WorkerProcess {
        job_kind: &'static str,
    },
    WorkerProcessed {
        job_kind: &'static str,
        time: Duration,
    },
    WorkerCompleted {
        job_kind: &'static str,
    },
    ConsumerConsumingRetry {
        topic: String,
        partition: i32,
        offset: i64,
        attempt: u32,
    },
    DeadLetterQueueDispatched {
        topic: String,
        partition: i32,
        offset: i64,
    },
    FilteringThrottled {
        topic: String,
        partition: i32,
        offset: i64,
    },
    FilteringSeek {
        topic: String,
        partition: i32,
        offset: i64,
    },
    AppRunning,
    AppStopping,
    AppStopped,
    AppQuieting,
    AppQuiet,
    ProcessNoticeSignal {
        signal: String,
    },
    StatisticsEmitted {
        payload: String,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::ConnectionListenerBeforeFetchLoop { .. } => {
                "connection.listener.before_fetch_loop"
            }
            Event::ConnectionListenerFetchLoop { .. } => "connection.listener.fetch_loop",
            Event::ConnectionListenerFetchLoopReceived { .. } => {
                "connection.listener.fetch_loop.received"
            }
            Event::ClientPause { .. } => "client.pause",
            Event::ClientResume { .. } => "client.resume",
            Event::ErrorOccurred { .. } => "error.occurred",
            Event::WorkerProcess { .. } => "worker.process",
            Event::WorkerProcessed { .. } => "worker.processed",
            Event::WorkerCompleted { .. } => "worker.completed",
            Event::ConsumerConsumingRetry { .. } => "consumer.consuming.retry",
            Event::DeadLetterQueueDispatched { .. } => "dead_letter_queue.dispatched",
            Event::FilteringThrottled { .. } => "filtering.throttled",
            Event::FilteringSeek { .. } => "filtering.seek",
            Event::AppRunning => "app.running",
            Event::AppStopping => "app.stopping",
            Event::AppStopped => "app.stopped",
            Event::AppQuieting => "app.quieting",
            Event::AppQuiet => "app.quiet",
            Event::ProcessNoticeSignal { .. } => "process.notice_signal",
            Event::StatisticsEmitted { .. } => "statistics.emitted",
        }
    }
}

/// Fan-out point for runtime events. Subscribers receive every event on an
/// unbounded channel; dropped receivers are pruned on the next notify.
#[derive(Default)]
pub struct Monitor {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Event>>>,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    pub fn notify(&self, event: Event) {
        self.log(&event);
        metrics::counter!("conductor_events_total", "event" => event.name()).increment(1);

        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn log(&self, event: &Event) {
        match event {
            Event::ErrorOccurred {
                error_type,
                details,
            } => {
                if *error_type == ErrorType::WorkerProcess {
                    error!(error_type = error_type.as_str(), details, "runtime error");
                } else {
                    warn!(error_type = error_type.as_str(), details, "runtime error");
                }
            }
            Event::AppRunning
            | Event::AppStopping
            | Event::AppStopped
            | Event::AppQuieting
            | Event::AppQuiet => {
                tracing::info!(event = event.name(), "process state change");
            }
            _ => debug!(event = event.name(), "event"),
        }
    }
}
