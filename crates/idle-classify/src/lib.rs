//! Work classifier: decides which stored records must be handled now and which can be left
//! to the idle-time scheduler.

mod classify;
mod plan;

pub use classify::{classify, classify_default, ClassificationRules};
pub use idle_types::{Classification, PriorityTier, StorageMetadata};
pub use plan::{plan, WorkPlan};
