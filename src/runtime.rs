use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::config::Config;
use crate::consumer::DlqDispatcher;
use crate::monitor::Monitor;
use crate::status::AppStatus;

/// Process-wide dependencies injected into every component. Tests build a
/// fresh Runtime instead of touching globals.
pub struct Runtime {
    pub config: Config,
    pub monitor: Arc<Monitor>,
    pub status: Arc<AppStatus>,
    dlq_dispatcher: Option<Arc<dyn DlqDispatcher>>,
    // Serializes driver close across every client this process creates
    shutdown_mutex: Mutex<()>,
}

impl Runtime {
    pub fn new(config: Config) -> Arc<Self> {
        let monitor = Arc::new(Monitor::new());
        let status = Arc::new(AppStatus::new(monitor.clone()));
        Arc::new(Self {
            config,
            monitor,
            status,
            dlq_dispatcher: None,
            shutdown_mutex: Mutex::new(()),
        })
    }

    pub fn with_dlq_dispatcher(
        config: Config,
        dispatcher: Arc<dyn DlqDispatcher>,
    ) -> Arc<Self> {
        let monitor = Arc::new(Monitor::new());
        let status = Arc::new(AppStatus::new(monitor.clone()));
        Arc::new(Self {
            config,
            monitor,
            status,
            dlq_dispatcher: Some(dispatcher),
            shutdown_mutex: Mutex::new(()),
        })
    }

    pub fn dlq_dispatcher(&self) -> Option<Arc<dyn DlqDispatcher>> {
        self.dlq_dispatcher.clone()
    }

    /// Held for the duration of a driver close; at most one close runs at a
    /// time process-wide.
    pub async fn shutdown_lock(&self) -> MutexGuard<'_, ()> {
        self.shutdown_mutex.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_lock_is_exclusive() {
        let runtime = Runtime::new(Config::init_with_defaults().unwrap());

        let guard = runtime.shutdown_lock().await;
        assert!(runtime.shutdown_mutex.try_lock().is_err());
        drop(guard);
        assert!(runtime.shutdown_mutex.try_lock().is_ok());
    }
}
