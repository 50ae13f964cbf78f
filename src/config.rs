use serde::Deserialize;
use std::time::Duration;

use crate::queue::PollerConfig;

// ============================================================================
// Configuration
// ============================================================================
//
// Layered: built-in defaults, then an optional `orderflow.toml` in the
// working directory, then `ORDERFLOW__<SECTION>__<KEY>` environment variables
// (e.g. `ORDERFLOW__QUEUE__MAX_RECEIVE_COUNT=5`).
//
// ============================================================================

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub metrics_port: u16,
    pub log_filter: String,
    pub function: FunctionSettings,
    pub queue: QueueSettings,
    pub stream: StreamSettings,
    pub archive: ArchiveSettings,
    pub alarms: AlarmSettings,
    pub realtime: RealtimeSettings,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FunctionSettings {
    pub timeout_secs: u64,
    pub async_retry_attempts: u32,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueSettings {
    pub max_receive_count: u32,
    pub visibility_timeout_secs: u64,
    pub batch_size: usize,
    pub max_batching_window_secs: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamSettings {
    pub batch_size: usize,
    pub retry_attempts: u32,
    pub bisect_on_error: bool,
    pub poll_interval_secs: u64,
    pub retention_hours: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArchiveSettings {
    pub retention_days: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlarmSettings {
    pub evaluation_interval_secs: u64,
    pub notification_email: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RealtimeSettings {
    pub upload_base_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            metrics_port: 9090,
            log_filter: "info,orderflow=debug".to_string(),
            function: FunctionSettings::default(),
            queue: QueueSettings::default(),
            stream: StreamSettings::default(),
            archive: ArchiveSettings::default(),
            alarms: AlarmSettings::default(),
            realtime: RealtimeSettings::default(),
        }
    }
}

impl Default for FunctionSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            async_retry_attempts: 3,
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_receive_count: 3,
            visibility_timeout_secs: 30,
            batch_size: 5,
            max_batching_window_secs: 10,
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            retry_attempts: 3,
            bisect_on_error: true,
            poll_interval_secs: 1,
            retention_hours: 24,
        }
    }
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self { retention_days: 10 }
    }
}

impl Default for AlarmSettings {
    fn default() -> Self {
        Self {
            evaluation_interval_secs: 60,
            notification_email: "alarms@orderflow.local".to_string(),
        }
    }
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            upload_base_url: "https://uploads.orderflow.local/invoices".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name("orderflow").required(false))
            .add_source(
                ::config::Environment::with_prefix("ORDERFLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn function_timeout(&self) -> Duration {
        Duration::from_secs(self.function.timeout_secs)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.queue.visibility_timeout_secs)
    }

    pub fn poller(&self) -> PollerConfig {
        PollerConfig {
            batch_size: self.queue.batch_size,
            max_batching_window: Duration::from_secs(self.queue.max_batching_window_secs),
        }
    }

    pub fn archive_retention(&self) -> Duration {
        Duration::from_secs(self.archive.retention_days * 24 * 60 * 60)
    }

    pub fn stream_retention(&self) -> Duration {
        Duration::from_secs(self.stream.retention_hours.max(1) * 60 * 60)
    }

    pub fn alarm_evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.alarms.evaluation_interval_secs.max(1))
    }

    pub fn stream_poll_interval(&self) -> Duration {
        Duration::from_secs(self.stream.poll_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_topology_constants() {
        let config = AppConfig::default();
        assert_eq!(config.function_timeout(), Duration::from_secs(30));
        assert_eq!(config.queue.max_receive_count, 3);
        assert_eq!(config.poller().batch_size, 5);
        assert_eq!(config.poller().max_batching_window, Duration::from_secs(10));
        assert_eq!(config.archive_retention(), Duration::from_secs(864_000));
        assert!(config.stream.bisect_on_error);
        assert_eq!(config.stream_retention(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_partial_sources_keep_defaults() {
        let settings = ::config::Config::builder()
            .set_override("queue.max_receive_count", 5i64)
            .unwrap()
            .build()
            .unwrap();
        let config: AppConfig = settings.try_deserialize().unwrap();

        assert_eq!(config.queue.max_receive_count, 5);
        assert_eq!(config.queue.batch_size, 5);
        assert_eq!(config.metrics_port, 9090);
    }
}
