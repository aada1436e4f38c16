use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use crate::pool::gate::admission_interval;

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// This is the top-level configuration structure loaded from
// `config.json`.
//
// It defines:
// - The record source the workers fetch from
// - The aggregate rate ceiling and pool sizing
// - Restart behaviour, metrics exposition and output format
//
// Every section is optional; missing sections take the
// defaults documented on each struct.
//
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// Where records are fetched from
    pub source: SourceConfig,

    /// Aggregate admission rate shared by the whole pool
    pub rate: RateConfig,

    /// Worker pool and collector channel sizing
    pub pool: PoolConfig,

    /// What happens to a worker after its first failure
    pub restart: RestartConfig,

    /// Metrics endpoint and periodic report
    pub metrics: MetricsConfig,

    /// How the consumer renders records
    pub output: OutputConfig,

    /// Optional debug configuration
    pub debug: Option<DebugConfig>,
}

/// Validation failures detected before any task is spawned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("rate.max_rate must be greater than zero")]
    ZeroRate,
    #[error("rate.period_secs must be greater than zero")]
    ZeroPeriod,
    #[error("rate.period_secs ({0}) is not a representable duration")]
    PeriodOutOfRange(String),
    #[error("rate.period_secs / rate.max_rate rounds down to a zero admission interval")]
    ZeroInterval,
    #[error("rate.burst must be greater than zero")]
    ZeroBurst,
    #[error("pool.workers must be greater than zero")]
    ZeroWorkers,
    #[error("pool.channel_capacity must be greater than zero")]
    ZeroCapacity,
    #[error("restart.initial_delay_ms ({initial}) exceeds restart.max_delay_ms ({max})")]
    InvertedBackoff { initial: u64, max: u64 },
    #[error("source.url is required for the http source")]
    MissingUrl,
}

impl Config {
    /// Checks every numeric knob the pool relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate.max_rate == 0 {
            return Err(ConfigError::ZeroRate);
        }
        if self.rate.period_secs <= 0.0 || !self.rate.period_secs.is_finite() {
            return Err(ConfigError::ZeroPeriod);
        }
        if admission_interval(self.rate.max_rate, self.rate.period()?).is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if self.rate.burst == 0 {
            return Err(ConfigError::ZeroBurst);
        }
        if self.pool.workers == Some(0) {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.pool.channel_capacity == Some(0) {
            return Err(ConfigError::ZeroCapacity);
        }
        if let RestartConfig::Backoff {
            initial_delay_ms,
            max_delay_ms,
            ..
        } = self.restart
        {
            if initial_delay_ms > max_delay_ms {
                return Err(ConfigError::InvertedBackoff {
                    initial: initial_delay_ms,
                    max: max_delay_ms,
                });
            }
        }
        if self.source.kind == SourceKind::Http && self.source.url.trim().is_empty() {
            return Err(ConfigError::MissingUrl);
        }
        Ok(())
    }

    /// Number of workers; defaults to `rate.max_rate`.
    pub fn workers(&self) -> usize {
        self.pool.workers.unwrap_or(self.rate.max_rate as usize)
    }

    /// Collector channel capacity; defaults to the pool size.
    pub fn channel_capacity(&self) -> usize {
        self.pool.channel_capacity.unwrap_or_else(|| self.workers())
    }

    pub fn debug_log(&self) -> bool {
        self.debug.as_ref().is_some_and(|d| d.log.unwrap_or(false))
    }
}

// ------------------------------------------------------------
// Source configuration
// ------------------------------------------------------------
//
// Notes:
// - `timeout_ms` is absent by default: a fetch has no deadline
//   unless one is configured.
// - `demo` generates quotes locally and never touches the network.
//
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Http,
    Demo,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,

    /// Endpoint returning one JSON quote per GET
    pub url: String,

    /// Optional per-request timeout in milliseconds
    pub timeout_ms: Option<u64>,

    pub user_agent: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Http,
            url: "https://api.quotable.io/random".to_string(),
            timeout_ms: None,
            user_agent: None,
        }
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

// ------------------------------------------------------------
// Rate configuration
// ------------------------------------------------------------
//
// `max_rate` admissions per `period_secs`, spread evenly:
// one admission every period / max_rate.
//
// `burst` is the number of unclaimed admissions the gate may
// hold while every worker is busy. 1 means a missed admission
// is simply lost.
//
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RateConfig {
    pub max_rate: u32,
    pub period_secs: f64,
    pub burst: usize,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            max_rate: 90,
            period_secs: 60.0,
            burst: 1,
        }
    }
}

impl RateConfig {
    pub fn period(&self) -> Result<Duration, ConfigError> {
        Duration::try_from_secs_f64(self.period_secs)
            .map_err(|_| ConfigError::PeriodOutOfRange(self.period_secs.to_string()))
    }
}

// ------------------------------------------------------------
// Pool configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of fetch workers (defaults to `rate.max_rate`)
    pub workers: Option<usize>,

    /// Collector channel capacity (defaults to `workers`)
    pub channel_capacity: Option<usize>,
}

// ------------------------------------------------------------
// Restart configuration
// ------------------------------------------------------------
//
// `never` keeps the fail-fast contract: a worker that fails
// once is gone for good. `backoff` re-enters the admission
// loop after an exponentially growing delay.
//
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(tag = "policy", rename_all = "lowercase")]
pub enum RestartConfig {
    #[default]
    Never,
    Backoff {
        initial_delay_ms: u64,
        max_delay_ms: u64,
        #[serde(default)]
        max_restarts: Option<u32>,
    },
}

// ------------------------------------------------------------
// Metrics configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MetricsConfig {
    /// Address of the `/metrics` endpoint; `null` disables it
    pub listen: Option<SocketAddr>,

    /// Seconds between two metrics log lines; 0 disables them
    pub report_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen: Some(SocketAddr::from(([0, 0, 0, 0], 8080))),
            report_interval_secs: 10,
        }
    }
}

// ------------------------------------------------------------
// Output configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
}

// ------------------------------------------------------------
// Debug configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
pub struct DebugConfig {
    /// Enables debug-level logging
    pub log: Option<bool>,
}
