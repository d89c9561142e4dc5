//! Scheduler lifecycle state and the starvation policy that governs repeatedly skipped tasks.

use serde::{Deserialize, Serialize};

/// State of the idle-time scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    /// No work scheduled, no idle-slot request outstanding.
    #[default]
    Idle,
    /// Requesting idle slots and/or executing tasks.
    Processing,
    /// Queue kept, idle-slot requests suspended (explicit pause or hidden page).
    Paused,
}

impl SchedulerState {
    pub fn as_str(self) -> &'static str {
        match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Processing => "processing",
            SchedulerState::Paused => "paused",
        }
    }
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do once the head-of-queue task has been skipped `max_consecutive_attempts` times
/// in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StarvationPolicy {
    /// Log and count a starvation warning, then keep waiting for a large enough slot.
    #[default]
    Warn,
    /// Start the task at the next evaluation with at least `minimum_idle_time` remaining,
    /// ignoring its estimated duration.
    #[serde(alias = "force")]
    ForceRun,
}

impl std::str::FromStr for StarvationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "warn" => Ok(StarvationPolicy::Warn),
            "force" | "forcerun" => Ok(StarvationPolicy::ForceRun),
            other => Err(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_serializes_lowercase() {
        let s = serde_json::to_string(&SchedulerState::Processing).unwrap();
        assert_eq!(s, "\"processing\"");
        assert_eq!(SchedulerState::default(), SchedulerState::Idle);
    }

    #[test]
    fn starvation_policy_parses_aliases() {
        assert_eq!("warn".parse::<StarvationPolicy>(), Ok(StarvationPolicy::Warn));
        assert_eq!("Force".parse::<StarvationPolicy>(), Ok(StarvationPolicy::ForceRun));
        assert_eq!("force_run".parse::<StarvationPolicy>(), Ok(StarvationPolicy::ForceRun));
        assert!("drop".parse::<StarvationPolicy>().is_err());
    }
}
