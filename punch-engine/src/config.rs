//! Engine configuration file.
//!
//! Everything is optional except the stations themselves; a missing
//! section takes its defaults.
//!
//! ```toml
//! [event]
//! date = "2026-05-09"
//! zero_time = "08:00:00"
//! stage = 1
//!
//! [checker]
//! lookahead = 2
//! close_of_course = "18:00:00"
//!
//! [[stations]]
//! id = 1
//! name = "finish"
//! mode = "readout"
//! transport = { kind = "serial", port = "/dev/ttyUSB0" }
//! ```

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveTime};
use serde::Deserialize;
use tracing::info;

use crate::checker::CheckerConfig;
use crate::domain::{PunchTime, StageId};
use crate::ingest::QueueConfig;
use crate::pipeline::PipelineConfig;
use crate::publisher::LiveResultsConfig;
use crate::resolver::CacheConfig;
use crate::transport::{RetryPolicy, SessionContext, StationConfig};

/// Errors loading or validating the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Which race the engine is reading.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventSettings {
    /// Event date. Today when unset.
    pub date: Option<NaiveDate>,
    /// Station times without a PM flag are read forward from here.
    pub zero_time: NaiveTime,
    pub stage: StageId,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            date: None,
            zero_time: NaiveTime::default(),
            stage: StageId(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueSettings {
    pub capacity: usize,
    pub dedup_tolerance_ms: u64,
    pub reorder_window_ms: u64,
    pub idle_flush_ms: u64,
    pub inactivity_secs: u64,
    pub reread_window_mins: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: 1024,
            dedup_tolerance_ms: 2000,
            reorder_window_ms: 500,
            idle_flush_ms: 250,
            inactivity_secs: 30,
            reread_window_mins: 360,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckerSettings {
    pub lookahead: Option<usize>,
    pub max_check_to_start_secs: u64,
    /// Time of day on the event date.
    pub close_of_course: Option<NaiveTime>,
}

impl Default for CheckerSettings {
    fn default() -> Self {
        Self {
            lookahead: None,
            max_check_to_start_secs: 3600,
            close_of_course: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub reply_timeout_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay_ms: 500,
            max_delay_ms: 8000,
            reply_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    pub max_capacity: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            max_capacity: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebSettings {
    pub bind: SocketAddr,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub event: EventSettings,
    pub queue: QueueSettings,
    pub checker: CheckerSettings,
    pub retry: RetrySettings,
    pub cache: CacheSettings,
    pub web: WebSettings,
    pub live_results: Option<LiveResultsConfig>,
    pub stations: Vec<StationConfig>,
}

impl EngineConfig {
    /// Load and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), stations = config.stations.len(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.capacity == 0 {
            return Err(ConfigError::invalid("queue.capacity", "must be at least 1"));
        }
        if self.queue.idle_flush_ms == 0 {
            return Err(ConfigError::invalid("queue.idle_flush_ms", "must be positive"));
        }
        if self.queue.inactivity_secs == 0 {
            return Err(ConfigError::invalid("queue.inactivity_secs", "must be positive"));
        }
        if self.checker.max_check_to_start_secs > 86_400 {
            return Err(ConfigError::invalid(
                "checker.max_check_to_start_secs",
                "must not exceed one day",
            ));
        }
        if self.retry.attempts == 0 {
            return Err(ConfigError::invalid("retry.attempts", "must be at least 1"));
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return Err(ConfigError::invalid(
                "retry.max_delay_ms",
                "must not be below retry.initial_delay_ms",
            ));
        }
        if let Some(live) = &self.live_results {
            if !live.url.starts_with("http://") && !live.url.starts_with("https://") {
                return Err(ConfigError::invalid("live_results.url", "must be an http(s) URL"));
            }
        }

        let mut seen = HashSet::new();
        for (i, station) in self.stations.iter().enumerate() {
            if !seen.insert(station.id) {
                return Err(ConfigError::invalid(
                    format!("stations[{i}].id"),
                    format!("station {} is configured twice", station.id),
                ));
            }
        }
        Ok(())
    }

    /// Turn off checksum verification on every station.
    pub fn without_crc(mut self) -> Self {
        for station in &mut self.stations {
            station.crc_enabled = false;
        }
        self
    }

    pub fn with_stations(mut self, stations: Vec<StationConfig>) -> Self {
        self.stations = stations;
        self
    }

    pub fn event_date(&self) -> NaiveDate {
        self.event
            .date
            .unwrap_or_else(|| Local::now().date_naive())
    }

    pub fn zero_time(&self) -> PunchTime {
        PunchTime::new(self.event_date(), self.event.zero_time)
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig::default()
            .with_dedup_tolerance(chrono::Duration::milliseconds(signed(self.queue.dedup_tolerance_ms)))
            .with_reorder_window(chrono::Duration::milliseconds(signed(self.queue.reorder_window_ms)))
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::default()
            .with_stage(self.event.stage)
            .with_queue(self.queue_config())
            .with_idle_flush(Duration::from_millis(self.queue.idle_flush_ms))
            .with_inactivity(Duration::from_secs(self.queue.inactivity_secs))
            .with_reread_window(Duration::from_secs(
                self.queue.reread_window_mins.saturating_mul(60),
            ))
    }

    pub fn checker_config(&self) -> CheckerConfig {
        let date = self.event_date();
        CheckerConfig::default()
            .with_lookahead(self.checker.lookahead)
            .with_max_check_to_start(chrono::Duration::seconds(signed(
                self.checker.max_check_to_start_secs,
            )))
            .with_close_of_course(self.checker.close_of_course.map(|t| PunchTime::new(date, t)))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_attempts(self.retry.attempts)
            .with_delays(
                Duration::from_millis(self.retry.initial_delay_ms),
                Duration::from_millis(self.retry.max_delay_ms),
            )
    }

    pub fn session_context(&self) -> SessionContext {
        SessionContext::new(self.zero_time())
            .with_retry(self.retry_policy())
            .with_reply_timeout(Duration::from_millis(self.retry.reply_timeout_ms))
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            ttl: Duration::from_secs(self.cache.ttl_secs),
            max_capacity: self.cache.max_capacity,
        }
    }
}

fn signed(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
