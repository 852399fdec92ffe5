//! Concurrent stats fan-out and fan-in
//!
//! One task per container, at most `concurrency` of them talking to the
//! engine at once. Results come back over two channels sized to the
//! container count, so no task ever blocks on a full buffer. Both channels
//! are drained only after every task has been joined.

use super::{DerivedMetrics, MetricsSink};
use crate::engine::ContainerEngine;
use crate::error::{ManagerError, Result, StatsFailure};
use crate::models::{ContainerStatsSample, ContainerSummary};
use crate::observability::{ManagerMetrics, StructuredLogger};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default number of concurrent stats queries
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Everything one collection produced
#[derive(Debug, Clone, Default)]
pub struct CollectionOutcome {
    pub metrics: Vec<DerivedMetrics>,
    pub errors: Vec<StatsFailure>,
}

#[derive(Clone)]
pub struct StatsAggregator {
    engine: Arc<dyn ContainerEngine>,
    concurrency: usize,
    metrics: ManagerMetrics,
    logger: StructuredLogger,
}

impl StatsAggregator {
    pub fn new(engine: Arc<dyn ContainerEngine>, concurrency: usize) -> Self {
        Self {
            engine,
            concurrency: concurrency.max(1),
            metrics: ManagerMetrics::new(),
            logger: StructuredLogger::new("local"),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Query every container in `containers`. Each container ends up in
    /// exactly one of `metrics` or `errors`.
    pub async fn collect(&self, containers: &[ContainerSummary]) -> CollectionOutcome {
        let n = containers.len();
        if n == 0 {
            return CollectionOutcome::default();
        }

        let (sample_tx, mut sample_rx) = mpsc::channel::<ContainerStatsSample>(n);
        let (error_tx, mut error_rx) = mpsc::channel::<StatsFailure>(n);
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for container in containers {
            let engine = self.engine.clone();
            let permits = permits.clone();
            let sample_tx = sample_tx.clone();
            let error_tx = error_tx.clone();
            let id = container.id.clone();
            let name = container.name.clone();

            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => engine.stats_one_shot(&id).await,
                    Err(e) => Err(ManagerError::EngineUnavailable(e.to_string())),
                };
                match result {
                    Ok(mut sample) => {
                        if sample.container_name.is_empty() {
                            sample.container_name = name;
                        }
                        sample.container_id = id;
                        let _ = sample_tx.send(sample).await;
                    }
                    Err(e) => {
                        let _ = error_tx
                            .send(StatsFailure {
                                container_id: id,
                                cause: e.to_string(),
                            })
                            .await;
                    }
                }
            });
        }

        // Only the task clones keep the channels open from here on
        drop(sample_tx);
        drop(error_tx);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Stats task ended abnormally");
            }
        }

        let mut outcome = CollectionOutcome::default();
        let mut seen = HashSet::with_capacity(n);

        while let Some(sample) = sample_rx.recv().await {
            seen.insert(sample.container_id.clone());
            outcome.metrics.push(DerivedMetrics::from(&sample));
        }
        while let Some(failure) = error_rx.recv().await {
            seen.insert(failure.container_id.clone());
            outcome.errors.push(failure);
        }

        // A task that panicked delivered nothing
        for container in containers {
            if !seen.contains(&container.id) {
                outcome.errors.push(StatsFailure {
                    container_id: container.id.clone(),
                    cause: "stats task aborted".to_string(),
                });
            }
        }

        outcome.errors.sort_by(|a, b| a.container_id.cmp(&b.container_id));
        debug!(
            containers = n,
            collected = outcome.metrics.len(),
            errors = outcome.errors.len(),
            "Stats collection finished"
        );
        outcome
    }

    /// List containers, collect their stats and record them into `sink`.
    ///
    /// Successful samples are always recorded. Failures come back as one
    /// `StatsCollectionPartial` error. Returns the number of containers
    /// recorded.
    pub async fn scrape(&self, sink: &dyn MetricsSink) -> Result<usize> {
        let started = Instant::now();
        let containers = self.engine.list_containers().await?;

        let outcome = self.collect(&containers).await;
        for metrics in &outcome.metrics {
            sink.record(metrics);
        }

        let elapsed = started.elapsed();
        self.metrics.observe_stats_scrape(
            elapsed.as_secs_f64(),
            containers.len(),
            outcome.errors.len(),
        );
        self.logger
            .log_scrape(containers.len(), outcome.errors.len(), elapsed.as_millis());

        if outcome.errors.is_empty() {
            Ok(outcome.metrics.len())
        } else {
            Err(ManagerError::StatsCollectionPartial(outcome.errors))
        }
    }
}
