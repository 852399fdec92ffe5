//! Removal of undeclared containers
//!
//! Destructive and unconditional: every observed container whose name is not
//! declared is stopped and removed. Enabled only through
//! `remove_unwanted_containers`.

use super::observed::ObservedState;
use super::orchestrator::LifecycleOrchestrator;
use super::FailurePolicy;
use crate::error::ContainerFailure;
use crate::models::{ContainerSummary, DesiredContainerSpec};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Observed containers whose names are absent from `desired`
pub fn unwanted<'a>(
    observed: &'a ObservedState,
    desired: &[DesiredContainerSpec],
) -> Vec<&'a ContainerSummary> {
    let declared: HashSet<&str> = desired.iter().map(|d| d.name.as_str()).collect();
    observed
        .containers()
        .iter()
        .filter(|c| !declared.contains(c.name.as_str()))
        .collect()
}

/// Names removed and failures hit during one prune
#[derive(Debug, Clone, Default)]
pub struct PruneReport {
    pub removed: Vec<String>,
    pub failures: Vec<ContainerFailure>,
}

#[derive(Clone)]
pub struct Pruner {
    orchestrator: LifecycleOrchestrator,
}

impl Pruner {
    pub fn new(orchestrator: LifecycleOrchestrator) -> Self {
        Self { orchestrator }
    }

    pub async fn prune(
        &self,
        observed: &ObservedState,
        desired: &[DesiredContainerSpec],
        policy: FailurePolicy,
    ) -> PruneReport {
        let mut report = PruneReport::default();

        for container in unwanted(observed, desired) {
            info!(container = %container.name, id = %container.id, "Container not desired, removing");
            match self.orchestrator.delete(&container.id).await {
                Ok(()) => {
                    debug!(container = %container.name, "Container removed");
                    report.removed.push(container.name.clone());
                }
                Err(e) => {
                    warn!(container = %container.name, error = %e, "Failed to remove unwanted container");
                    report.failures.push(ContainerFailure::new(container.name.clone(), &e));
                    if policy == FailurePolicy::FailFast {
                        break;
                    }
                }
            }
        }

        report
    }
}
