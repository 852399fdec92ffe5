//! The reconciliation pass
//!
//! Per pass: optionally prune against the observed set taken at the start,
//! then for each declared spec in order converge it (create, or recreate on
//! mismatch, or refresh a stale image) and issue a start. Start is sent even
//! when nothing else changed, since a declared but stopped container is
//! drift too.

use super::comparator::decide;
use super::freshness::FreshnessChecker;
use super::observed::ObservedStateReader;
use super::orchestrator::LifecycleOrchestrator;
use super::pruner::Pruner;
use super::FailurePolicy;
use crate::desired::ConfigSnapshot;
use crate::engine::ContainerEngine;
use crate::error::{ContainerFailure, ManagerError, Result};
use crate::models::{DesiredContainerSpec, MismatchedField, ReconciliationDecision};
use crate::observability::{ManagerMetrics, StructuredLogger};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Something a pass did to one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerAction {
    Created,
    Recreated(Vec<MismatchedField>),
    RefreshedImage,
    Started,
}

impl fmt::Display for ContainerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerAction::Created => write!(f, "created"),
            ContainerAction::Recreated(fields) => {
                let fields = fields
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                write!(f, "recreated ({})", fields)
            }
            ContainerAction::RefreshedImage => write!(f, "refreshed image"),
            ContainerAction::Started => write!(f, "started"),
        }
    }
}

/// A converged container and how it got there
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerOutcome {
    pub name: String,
    pub id: String,
    pub actions: Vec<ContainerAction>,
}

/// Result of one pass
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    pub config_version: u64,
    pub pruned: Vec<String>,
    pub outcomes: Vec<ContainerOutcome>,
    pub failures: Vec<ContainerFailure>,
}

impl PassReport {
    pub fn outcome(&self, name: &str) -> Option<&ContainerOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }
}

impl fmt::Display for PassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for name in &self.pruned {
            writeln!(f, "{}: removed", name)?;
        }
        for outcome in &self.outcomes {
            let actions = outcome
                .actions
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            writeln!(f, "{}: {}", outcome.name, actions)?;
        }
        for failure in &self.failures {
            writeln!(f, "{}: failed: {}", failure.container, failure.cause)?;
        }
        Ok(())
    }
}

/// Failures a pass adds to the failure counter
pub(super) fn failure_count(result: &Result<PassReport>) -> usize {
    match result {
        Ok(report) => report.failures.len(),
        // The pass failed before any container was attempted
        Err(_) => 1,
    }
}

/// Drives reconciliation passes against one engine
///
/// Passes are serialized: a second trigger waits for the running pass.
#[derive(Clone)]
pub struct Reconciler {
    reader: ObservedStateReader,
    orchestrator: LifecycleOrchestrator,
    freshness: FreshnessChecker,
    pruner: Pruner,
    policy: FailurePolicy,
    logger: StructuredLogger,
    metrics: ManagerMetrics,
    pass_lock: Arc<Mutex<()>>,
}

impl Reconciler {
    pub fn new(engine: Arc<dyn ContainerEngine>, policy: FailurePolicy) -> Self {
        let orchestrator = LifecycleOrchestrator::new(engine.clone());
        Self {
            reader: ObservedStateReader::new(engine.clone()),
            freshness: FreshnessChecker::new(engine),
            pruner: Pruner::new(orchestrator.clone()),
            orchestrator,
            policy,
            logger: StructuredLogger::new("local"),
            metrics: ManagerMetrics::new(),
            pass_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Run one pass over `snapshot`.
    ///
    /// Returns `ManagerError::Reconcile` carrying every per-container failure
    /// if any container did not converge. An engine that cannot be listed at
    /// the start of the pass fails the whole pass.
    pub async fn run_pass(&self, snapshot: &ConfigSnapshot) -> Result<PassReport> {
        let _guard = self.pass_lock.lock().await;
        let started = Instant::now();

        let result = self.pass(snapshot).await;

        let failed = failure_count(&result);
        let elapsed = started.elapsed();
        self.metrics.observe_reconcile_pass(elapsed.as_secs_f64(), failed);

        let report = result?;
        self.logger.log_pass(
            snapshot.version,
            report.outcomes.len(),
            report.failures.len(),
            elapsed.as_millis(),
        );

        if report.failures.is_empty() {
            Ok(report)
        } else {
            Err(ManagerError::Reconcile(report.failures))
        }
    }

    async fn pass(&self, snapshot: &ConfigSnapshot) -> Result<PassReport> {
        let mut report = PassReport {
            config_version: snapshot.version,
            ..Default::default()
        };

        let observed = self.reader.read().await?;
        debug!(
            observed = observed.len(),
            desired = snapshot.specs.len(),
            "Starting reconciliation pass"
        );

        if snapshot.app.remove_unwanted_containers {
            let pruned = self
                .pruner
                .prune(&observed, &snapshot.specs, self.policy)
                .await;
            for name in &pruned.removed {
                self.logger.log_pruned(name);
            }
            report.pruned = pruned.removed;
            report.failures = pruned.failures;
            if self.policy == FailurePolicy::FailFast && !report.failures.is_empty() {
                return Ok(report);
            }
        }

        for spec in &snapshot.specs {
            match self.converge(spec, snapshot.app.update_check).await {
                Ok(outcome) => {
                    self.logger.log_started(&outcome.name, &outcome.id);
                    report.outcomes.push(outcome);
                }
                Err(e) => {
                    warn!(container = %spec.name, error = %e, "Container did not converge");
                    report.failures.push(ContainerFailure::new(spec.name.clone(), &e));
                    if self.policy == FailurePolicy::FailFast {
                        break;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Bring one declared container to its desired state and start it
    async fn converge(&self, spec: &DesiredContainerSpec, update_check: bool) -> Result<ContainerOutcome> {
        let mut actions = Vec::new();

        let current = match self.reader.read().await?.find(&spec.name) {
            Some(summary) => Some(self.reader.inspect(&summary.id).await?),
            None => None,
        };

        match decide(Some(spec), current.as_ref()) {
            ReconciliationDecision::Create => {
                if self.orchestrator.ensure(spec).await? {
                    self.logger.log_created(&spec.name, &spec.image);
                    actions.push(ContainerAction::Created);
                }
            }
            ReconciliationDecision::Recreate(fields) => {
                if let Some(current) = &current {
                    self.orchestrator.recreate(&current.id, spec).await?;
                    self.logger.log_recreated(&spec.name, &fields);
                    actions.push(ContainerAction::Recreated(fields));
                }
            }
            ReconciliationDecision::NoOp | ReconciliationDecision::RemovePruned => {
                debug!(container = %spec.name, "Container matches desired configuration");
            }
        }

        let mut id = self.reader.resolve_id(&spec.name).await?;

        // A container built in this pass already runs the freshest local image
        if update_check && actions.is_empty() && !self.freshness.is_up_to_date(&id, spec).await? {
            self.orchestrator.recreate(&id, spec).await?;
            self.logger.log_stale_image(&spec.name, &spec.image);
            actions.push(ContainerAction::RefreshedImage);
            id = self.reader.resolve_id(&spec.name).await?;
        }

        self.orchestrator.start(&id).await?;
        actions.push(ContainerAction::Started);

        Ok(ContainerOutcome {
            name: spec.name.clone(),
            id,
            actions,
        })
    }
}
