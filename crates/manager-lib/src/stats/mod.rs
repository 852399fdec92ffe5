//! Container stats aggregation
//!
//! Queries one stats sample per container concurrently, turns each sample
//! into derived gauges and hands them to a [`MetricsSink`]. Failed queries
//! are batched into a single error after every query has finished.

mod aggregator;
mod derive;

pub use aggregator::{CollectionOutcome, StatsAggregator, DEFAULT_CONCURRENCY};
pub use derive::{cpu_percent, memory_usage_overall, DerivedMetrics};

/// Destination of derived per-container metrics
pub trait MetricsSink: Send + Sync {
    fn record(&self, metrics: &DerivedMetrics);
}
