//! Batch planning: split classified records into immediate and deferred work.

use crate::classify::{classify, ClassificationRules};
use idle_types::{Classification, StorageMetadata, Task, TaskProcessor};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// A batch of records split into work to do now and work to hand to the idle-time scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkPlan {
    /// Critical and important records, in input order.
    pub immediate: Vec<Classification>,
    /// Background records, smallest first (ties by key).
    pub deferred: Vec<Classification>,
}

impl WorkPlan {
    /// Turn the deferred records into scheduler tasks. Priority is the position in
    /// `deferred`; the duration estimate comes from the size at `bytes_per_ms` throughput.
    pub fn into_tasks<F>(self, bytes_per_ms: u64, mut make_processor: F) -> Vec<Task>
    where
        F: FnMut(&Classification) -> Arc<dyn TaskProcessor>,
    {
        self.deferred
            .iter()
            .enumerate()
            .map(|(i, c)| Task {
                id: c.key.clone(),
                name: format!("{} {}", c.priority, c.key),
                priority: i32::try_from(i).unwrap_or(i32::MAX),
                estimated_duration: c.estimated_duration(bytes_per_ms),
                processor: make_processor(c),
                on_error: None,
            })
            .collect()
    }
}

/// Classify a batch. Repeated keys keep their first occurrence.
pub fn plan<I, K>(entries: I, rules: &ClassificationRules) -> WorkPlan
where
    I: IntoIterator<Item = (K, StorageMetadata)>,
    K: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = WorkPlan::default();
    for (key, metadata) in entries {
        let key = key.as_ref();
        if !seen.insert(key.to_string()) {
            tracing::debug!(key, "duplicate key in work plan ignored");
            continue;
        }
        let c = classify(key, &metadata, rules);
        if c.priority.is_deferrable() {
            out.deferred.push(c);
        } else {
            out.immediate.push(c);
        }
    }
    out.deferred
        .sort_by(|a, b| a.estimated_size.cmp(&b.estimated_size).then_with(|| a.key.cmp(&b.key)));
    tracing::debug!(
        immediate = out.immediate.len(),
        deferred = out.deferred.len(),
        "work plan built"
    );
    out
}
