//! Tiering of storage keys into critical, important and background work.

use idle_types::{Classification, PriorityTier, StorageMetadata};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Domain rules the classifier applies. Markers are matched case-insensitively as substrings
/// of the storage key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationRules {
    /// Keys the application cannot function without (settings, roster, ...).
    pub critical_markers: Vec<String>,
    /// Keys naming the open or most recent record.
    pub important_markers: Vec<String>,
    /// Records accessed this close to `StorageMetadata::as_of` count as recent.
    pub recent_window: Duration,
    pub critical_default_size: u64,
    pub important_default_size: u64,
    pub background_default_size: u64,
}

impl Default for ClassificationRules {
    fn default() -> Self {
        Self {
            critical_markers: ["settings", "roster", "auth", "schema"]
                .into_iter()
                .map(String::from)
                .collect(),
            important_markers: vec!["current".to_string()],
            recent_window: Duration::from_secs(24 * 60 * 60),
            critical_default_size: 2 * 1024,
            important_default_size: 16 * 1024,
            background_default_size: 64 * 1024,
        }
    }
}

impl ClassificationRules {
    pub fn default_size(&self, tier: PriorityTier) -> u64 {
        match tier {
            PriorityTier::Critical => self.critical_default_size,
            PriorityTier::Important => self.important_default_size,
            PriorityTier::Background => self.background_default_size,
        }
    }
}

fn find_marker<'a>(key: &str, markers: &'a [String]) -> Option<&'a str> {
    markers
        .iter()
        .map(String::as_str)
        .find(|m| !m.is_empty() && key.contains(m.to_ascii_lowercase().as_str()))
}

/// Age of the record at `as_of`, when both timestamps are known and it falls inside `window`.
/// An access stamped after `as_of` counts as age zero.
fn recent_age(metadata: &StorageMetadata, window: Duration) -> Option<Duration> {
    let (last, as_of) = (metadata.last_accessed?, metadata.as_of?);
    let age = (as_of - last).to_std().unwrap_or(Duration::ZERO);
    (age <= window).then_some(age)
}

/// Assign a tier, size estimate and justification to one storage key. Pure and deterministic:
/// recency is measured against `metadata.as_of`, never the wall clock.
pub fn classify(
    key: &str,
    metadata: &StorageMetadata,
    rules: &ClassificationRules,
) -> Classification {
    let lowered = key.to_ascii_lowercase();
    let (priority, mut reasoning) = if let Some(m) = find_marker(&lowered, &rules.critical_markers)
    {
        (
            PriorityTier::Critical,
            format!("key contains critical marker '{m}'"),
        )
    } else if metadata.is_active {
        (PriorityTier::Important, "record is marked active".to_string())
    } else if let Some(age) = recent_age(metadata, rules.recent_window) {
        (
            PriorityTier::Important,
            format!(
                "last accessed {}s before reference time, within the {}s recency window",
                age.as_secs(),
                rules.recent_window.as_secs()
            ),
        )
    } else if let Some(m) = find_marker(&lowered, &rules.important_markers) {
        (
            PriorityTier::Important,
            format!("key contains important marker '{m}'"),
        )
    } else {
        (
            PriorityTier::Background,
            "archival record with no recent access; safe to defer".to_string(),
        )
    };

    let estimated_size = match metadata.size_bytes {
        Some(size) => size,
        None => {
            reasoning.push_str(" (size from tier default)");
            rules.default_size(priority)
        }
    };

    Classification {
        key: key.to_string(),
        priority,
        estimated_size,
        reasoning,
    }
}

/// [`classify`] with [`ClassificationRules::default`].
pub fn classify_default(key: &str, metadata: &StorageMetadata) -> Classification {
    classify(key, metadata, &ClassificationRules::default())
}
