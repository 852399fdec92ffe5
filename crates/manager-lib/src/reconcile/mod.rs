//! Desired-state reconciliation
//!
//! One pass reads the engine, diffs every declared container against what
//! is running, and converges by creating, recreating, pruning and starting.
//! Specs are handled strictly one after another so a recreate never races a
//! prune or create touching the same name.

mod comparator;
mod freshness;
mod r#loop;
mod observed;
mod orchestrator;
mod pruner;

#[cfg(test)]
mod tests;

pub use comparator::{compare, decide, mismatched_fields};
pub use freshness::{resolve_image_id, FreshnessChecker};
pub use observed::{ObservedState, ObservedStateReader};
pub use orchestrator::LifecycleOrchestrator;
pub use pruner::{unwanted, PruneReport, Pruner};
pub use r#loop::{ContainerAction, ContainerOutcome, PassReport, Reconciler};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a pass does with the remaining specs once one container fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep converging the other containers, report all failures at the end
    #[default]
    BestEffort,
    /// Stop the pass at the first failure
    FailFast,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::BestEffort => write!(f, "best_effort"),
            FailurePolicy::FailFast => write!(f, "fail_fast"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "best_effort" => Ok(FailurePolicy::BestEffort),
            "fail_fast" => Ok(FailurePolicy::FailFast),
            other => Err(format!("unknown failure policy: {}", other)),
        }
    }
}
