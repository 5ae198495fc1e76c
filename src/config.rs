use std::time::Duration;

use anyhow::Result;
use envconfig::Envconfig;

pub const COOPERATIVE_STICKY: &str = "cooperative-sticky";

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    // Kafka connection
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "kafka-conductor")]
    pub client_id: String,

    #[envconfig(default = "kafka-conductor")]
    pub group_id: String,

    #[envconfig(default = "latest")]
    pub kafka_consumer_offset_reset: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    // Assignment strategy passed straight to the driver; the runtime only
    // inspects it for the cooperative-sticky pre-close wait
    #[envconfig(default = "range,roundrobin")]
    pub partition_assignment_strategy: String,

    #[envconfig(default = "false")]
    pub allow_auto_create_topics: bool,

    // Processing
    #[envconfig(default = "5")]
    pub concurrency: usize,

    #[envconfig(default = "1000")]
    pub max_wait_time_ms: u64,

    #[envconfig(default = "100")]
    pub max_messages: usize,

    #[envconfig(default = "true")]
    pub consumer_persistence: bool,

    // Error-driven pausing
    #[envconfig(default = "1000")]
    pub pause_timeout_ms: u64,

    #[envconfig(default = "30000")]
    pub pause_max_timeout_ms: u64,

    #[envconfig(default = "true")]
    pub pause_with_exponential_backoff: bool,

    // Shutdown
    #[envconfig(default = "60000")]
    pub shutdown_timeout_ms: u64,

    // Cadence of keep-alive pings while draining during shutdown
    #[envconfig(default = "200")]
    pub tick_interval_ms: u64,

    // Attempts before the DLQ contract kicks in for a failing batch
    #[envconfig(default = "3")]
    pub max_retries: u32,
}

impl Config {
    /// Initialize from environment variables (for production and tests).
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be greater than zero");
        }
        if self.max_wait_time_ms == 0 {
            anyhow::bail!("max_wait_time_ms must be greater than zero");
        }
        if self.max_messages == 0 {
            anyhow::bail!("max_messages must be greater than zero");
        }
        if self.pause_timeout_ms == 0 {
            anyhow::bail!("pause_timeout_ms must be greater than zero");
        }
        if self.pause_max_timeout_ms < self.pause_timeout_ms {
            anyhow::bail!(
                "pause_max_timeout_ms ({}) must not be lower than pause_timeout_ms ({})",
                self.pause_max_timeout_ms,
                self.pause_timeout_ms
            );
        }
        if self.shutdown_timeout_ms <= self.max_wait_time_ms {
            anyhow::bail!(
                "shutdown_timeout_ms ({}) must be greater than max_wait_time_ms ({})",
                self.shutdown_timeout_ms,
                self.max_wait_time_ms
            );
        }
        if self.client_id.is_empty()
            || !self
                .client_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            anyhow::bail!(
                "client_id '{}' is not a valid Kafka name (alphanumeric, '.', '_', '-')",
                self.client_id
            );
        }
        Ok(())
    }

    pub fn max_wait_time(&self) -> Duration {
        Duration::from_millis(self.max_wait_time_ms)
    }

    pub fn pause_timeout(&self) -> Duration {
        Duration::from_millis(self.pause_timeout_ms)
    }

    pub fn pause_max_timeout(&self) -> Duration {
        Duration::from_millis(self.pause_max_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn cooperative_sticky(&self) -> bool {
        self.partition_assignment_strategy
            .split(',')
            .any(|s| s.trim() == COOPERATIVE_STICKY)
    }

    /// Build the driver configuration, applying per-subscription-group
    /// overrides last so they win.
    pub fn build_consumer_config(
        &self,
        group_overrides: &[(String, String)],
    ) -> rdkafka::ClientConfig {
        let mut config = rdkafka::ClientConfig::new();
        config
            .set("bootstrap.servers", &self.kafka_hosts)
            .set("client.id", &self.client_id)
            .set("group.id", &self.group_id)
            .set("auto.offset.reset", &self.kafka_consumer_offset_reset)
            .set(
                "partition.assignment.strategy",
                &self.partition_assignment_strategy,
            )
            .set(
                "allow.auto.create.topics",
                self.allow_auto_create_topics.to_string(),
            )
            .set("enable.auto.offset.store", "false")
            .set("statistics.interval.ms", "10000");

        if self.kafka_tls {
            config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }

        for (key, value) in group_overrides {
            config.set(key, value);
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::init_with_defaults().unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_pause_bounds() {
        let mut cfg = config();
        cfg.pause_timeout_ms = 5000;
        cfg.pause_max_timeout_ms = 1000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_shutdown_must_exceed_poll_window() {
        let mut cfg = config();
        cfg.shutdown_timeout_ms = cfg.max_wait_time_ms;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_client_id_format() {
        let mut cfg = config();
        cfg.client_id = "valid.client_id-1".to_string();
        assert!(cfg.validate().is_ok());

        cfg.client_id = "spaces are bad".to_string();
        assert!(cfg.validate().is_err());

        cfg.client_id = String::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_cooperative_sticky_detection() {
        let mut cfg = config();
        assert!(!cfg.cooperative_sticky());

        cfg.partition_assignment_strategy = "cooperative-sticky".to_string();
        assert!(cfg.cooperative_sticky());

        cfg.partition_assignment_strategy = "range, cooperative-sticky".to_string();
        assert!(cfg.cooperative_sticky());
    }

    #[test]
    fn test_group_overrides_win() {
        let cfg = config();
        let overrides = vec![("auto.offset.reset".to_string(), "earliest".to_string())];
        let client_config = cfg.build_consumer_config(&overrides);
        assert_eq!(client_config.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(client_config.get("enable.auto.offset.store"), Some("false"));
    }
}
