//! Scheduler tuning. Defaults suit a browser-like host; every field can be overridden from the
//! environment with `SchedulerConfig::from_env`.

use crate::{ConfigError, StarvationPolicy};
use std::str::FromStr;
use std::time::Duration;

/// Remaining time reported by the synthetic deadlines of the timer fallback.
pub const FALLBACK_TIME_REMAINING: Duration = Duration::from_millis(16);

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Smallest reported remaining idle time the scheduler acts on.
    pub minimum_idle_time: Duration,
    /// Upper bound on how long one idle slot keeps starting tasks, whatever the host reports.
    pub maximum_idle_time: Duration,
    /// Delay before re-requesting an idle slot after a skip; also the fallback timer period.
    pub idle_retry_delay: Duration,
    /// Consecutive skips of the same head task before starvation is reported. The warning
    /// fires on the skip that reaches this count; 0 disables detection.
    pub max_consecutive_attempts: u32,
    /// Subscribe to page visibility changes.
    pub enable_tab_visibility: bool,
    /// Record processing time and idle-time averages.
    pub enable_performance_monitoring: bool,
    pub starvation_policy: StarvationPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            minimum_idle_time: Duration::from_millis(5),
            maximum_idle_time: Duration::from_millis(50),
            idle_retry_delay: Duration::from_millis(100),
            max_consecutive_attempts: 3,
            enable_tab_visibility: true,
            enable_performance_monitoring: true,
            starvation_policy: StarvationPolicy::Warn,
        }
    }
}

impl SchedulerConfig {
    /// Defaults overridden by `IDLE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `IDLE_*` key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(ms) = parse::<u64, _>(&lookup, "IDLE_MINIMUM_IDLE_TIME_MS")? {
            cfg.minimum_idle_time = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "IDLE_MAXIMUM_IDLE_TIME_MS")? {
            cfg.maximum_idle_time = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "IDLE_RETRY_DELAY_MS")? {
            cfg.idle_retry_delay = Duration::from_millis(ms);
        }
        if let Some(n) = parse::<u32, _>(&lookup, "IDLE_MAX_CONSECUTIVE_ATTEMPTS")? {
            cfg.max_consecutive_attempts = n;
        }
        if let Some(b) = parse_bool(&lookup, "IDLE_ENABLE_TAB_VISIBILITY")? {
            cfg.enable_tab_visibility = b;
        }
        if let Some(b) = parse_bool(&lookup, "IDLE_ENABLE_PERFORMANCE_MONITORING")? {
            cfg.enable_performance_monitoring = b;
        }
        if let Some(p) = parse::<StarvationPolicy, _>(&lookup, "IDLE_STARVATION_POLICY")? {
            cfg.starvation_policy = p;
        }
        Ok(cfg)
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
    }
}

fn parse_bool<F>(lookup: &F, key: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        },
    }
}
