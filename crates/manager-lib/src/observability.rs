//! Observability infrastructure for the container manager
//!
//! Provides:
//! - Per-container Prometheus gauges fed by the stats aggregator
//! - Prometheus metrics about the manager itself (passes, failures, latency)
//! - Structured JSON logging of lifecycle events with tracing

use crate::models::MismatchedField;
use crate::stats::{DerivedMetrics, MetricsSink};
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_gauge, GaugeVec,
    Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for engine-bound operations (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

const CONTAINER_LABELS: &[&str] = &["container_id", "container_name"];

/// Global container gauges (registered once)
static CONTAINER_GAUGES: OnceLock<ContainerGaugesInner> = OnceLock::new();

/// Global manager metrics (registered once)
static MANAGER_METRICS: OnceLock<ManagerMetricsInner> = OnceLock::new();

fn container_gauge(name: &str, help: &str) -> GaugeVec {
    register_gauge_vec!(name, help, CONTAINER_LABELS)
        .unwrap_or_else(|e| panic!("Failed to register {}: {}", name, e))
}

struct ContainerGaugesInner {
    cpu_usage_total: GaugeVec,
    memory_usage: GaugeVec,
    memory_max_usage: GaugeVec,
    memory_limit: GaugeVec,
    memory_cache: GaugeVec,
    memory_rss: GaugeVec,
    memory_usage_overall: GaugeVec,
    network_rx_bytes: GaugeVec,
    network_tx_bytes: GaugeVec,
    block_io_read_bytes: GaugeVec,
    block_io_write_bytes: GaugeVec,
}

impl ContainerGaugesInner {
    fn new() -> Self {
        Self {
            cpu_usage_total: container_gauge(
                "docker_cpu_usage_total",
                "CPU usage of Docker containers in percent",
            ),
            memory_usage: container_gauge("docker_memory_usage", "Memory usage of Docker containers"),
            memory_max_usage: container_gauge(
                "docker_memory_max_usage",
                "Maximum memory usage of Docker containers",
            ),
            memory_limit: container_gauge("docker_memory_limit", "Memory limit of Docker containers"),
            memory_cache: container_gauge(
                "docker_memory_cache",
                "Cache memory usage of Docker containers",
            ),
            memory_rss: container_gauge("docker_memory_rss", "RSS memory usage of Docker containers"),
            memory_usage_overall: container_gauge(
                "docker_memory_usage_overall",
                "Memory usage of Docker containers excluding page cache",
            ),
            network_rx_bytes: container_gauge(
                "docker_network_rx_bytes",
                "Network received bytes of Docker containers",
            ),
            network_tx_bytes: container_gauge(
                "docker_network_tx_bytes",
                "Network transmitted bytes of Docker containers",
            ),
            block_io_read_bytes: container_gauge(
                "docker_block_io_read_bytes",
                "Block IO read bytes of Docker containers",
            ),
            block_io_write_bytes: container_gauge(
                "docker_block_io_write_bytes",
                "Block IO write bytes of Docker containers",
            ),
        }
    }
}

/// Per-container gauges, labelled by `(container_id, container_name)`
///
/// Series of removed containers are never evicted: they keep their last value
/// until the process restarts.
#[derive(Clone)]
pub struct ContainerGauges {
    _private: (),
}

impl Default for ContainerGauges {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerGauges {
    pub fn new() -> Self {
        CONTAINER_GAUGES.get_or_init(ContainerGaugesInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ContainerGaugesInner {
        CONTAINER_GAUGES.get_or_init(ContainerGaugesInner::new)
    }

    /// Current CPU gauge value for a label pair, if the series exists
    pub fn cpu_percent(&self, container_id: &str, container_name: &str) -> f64 {
        self.inner()
            .cpu_usage_total
            .with_label_values(&[container_id, container_name])
            .get()
    }

    /// Current overall memory gauge value for a label pair
    pub fn memory_usage_overall(&self, container_id: &str, container_name: &str) -> f64 {
        self.inner()
            .memory_usage_overall
            .with_label_values(&[container_id, container_name])
            .get()
    }
}

impl MetricsSink for ContainerGauges {
    fn record(&self, m: &DerivedMetrics) {
        let inner = self.inner();
        let labels = [m.container_id.as_str(), m.container_name.as_str()];

        inner.cpu_usage_total.with_label_values(&labels).set(m.cpu_percent);
        inner.memory_usage.with_label_values(&labels).set(m.memory_usage);
        inner.memory_max_usage.with_label_values(&labels).set(m.memory_max_usage);
        inner.memory_limit.with_label_values(&labels).set(m.memory_limit);
        inner.memory_cache.with_label_values(&labels).set(m.memory_cache);
        inner.memory_rss.with_label_values(&labels).set(m.memory_rss);
        inner
            .memory_usage_overall
            .with_label_values(&labels)
            .set(m.memory_usage_overall);
        inner
            .network_rx_bytes
            .with_label_values(&labels)
            .set(m.network_rx_bytes as f64);
        inner
            .network_tx_bytes
            .with_label_values(&labels)
            .set(m.network_tx_bytes as f64);
        inner
            .block_io_read_bytes
            .with_label_values(&labels)
            .set(m.block_io_read_bytes as f64);
        inner
            .block_io_write_bytes
            .with_label_values(&labels)
            .set(m.block_io_write_bytes as f64);
    }
}

struct ManagerMetricsInner {
    reconcile_passes: IntCounter,
    reconcile_failures: IntCounter,
    reconcile_duration_seconds: Histogram,
    stats_collection_seconds: Histogram,
    stats_errors: IntCounter,
    containers_observed: IntGauge,
    config_version: IntGauge,
}

impl ManagerMetricsInner {
    fn new() -> Self {
        Self {
            reconcile_passes: register_int_counter!(
                "docker_manager_reconcile_passes_total",
                "Total number of reconciliation passes"
            )
            .expect("Failed to register reconcile_passes"),

            reconcile_failures: register_int_counter!(
                "docker_manager_reconcile_failures_total",
                "Total number of containers that failed to converge"
            )
            .expect("Failed to register reconcile_failures"),

            reconcile_duration_seconds: register_histogram!(
                "docker_manager_reconcile_duration_seconds",
                "Time spent in one reconciliation pass",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register reconcile_duration_seconds"),

            stats_collection_seconds: register_histogram!(
                "docker_manager_stats_collection_seconds",
                "Time spent collecting stats from all containers",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register stats_collection_seconds"),

            stats_errors: register_int_counter!(
                "docker_manager_stats_errors_total",
                "Total number of failed per-container stats queries"
            )
            .expect("Failed to register stats_errors"),

            containers_observed: register_int_gauge!(
                "docker_manager_containers_observed",
                "Number of containers seen by the last stats scrape"
            )
            .expect("Failed to register containers_observed"),

            config_version: register_int_gauge!(
                "docker_manager_config_version",
                "Version of the active desired configuration"
            )
            .expect("Failed to register config_version"),
        }
    }
}

/// Metrics about the manager's own operation
///
/// A lightweight handle; clones share the global instance.
#[derive(Clone)]
pub struct ManagerMetrics {
    _private: (),
}

impl Default for ManagerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagerMetrics {
    pub fn new() -> Self {
        MANAGER_METRICS.get_or_init(ManagerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ManagerMetricsInner {
        MANAGER_METRICS.get_or_init(ManagerMetricsInner::new)
    }

    pub fn observe_reconcile_pass(&self, duration_secs: f64, failures: usize) {
        let inner = self.inner();
        inner.reconcile_passes.inc();
        inner.reconcile_failures.inc_by(failures as u64);
        inner.reconcile_duration_seconds.observe(duration_secs);
    }

    pub fn observe_stats_scrape(&self, duration_secs: f64, containers: usize, errors: usize) {
        let inner = self.inner();
        inner.stats_collection_seconds.observe(duration_secs);
        inner.containers_observed.set(containers as i64);
        inner.stats_errors.inc_by(errors as u64);
    }

    pub fn set_config_version(&self, version: u64) {
        self.inner().config_version.set(version as i64);
    }
}

/// Structured logger for lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    host: String,
}

impl StructuredLogger {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn log_created(&self, container: &str, image: &str) {
        info!(
            event = "container_created",
            host = %self.host,
            container = %container,
            image = %image,
            "Container created"
        );
    }

    pub fn log_recreated(&self, container: &str, fields: &[MismatchedField]) {
        let fields = fields
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        info!(
            event = "container_recreated",
            host = %self.host,
            container = %container,
            mismatched = %fields,
            "Container configuration does not match, recreated it"
        );
    }

    pub fn log_stale_image(&self, container: &str, image: &str) {
        info!(
            event = "stale_image",
            host = %self.host,
            container = %container,
            image = %image,
            "Container is not up to date, recreated it"
        );
    }

    pub fn log_pruned(&self, container: &str) {
        info!(
            event = "container_pruned",
            host = %self.host,
            container = %container,
            "Unwanted container removed"
        );
    }

    pub fn log_started(&self, container: &str, id: &str) {
        info!(
            event = "container_started",
            host = %self.host,
            container = %container,
            id = %id,
            "Container started"
        );
    }

    pub fn log_pass(&self, config_version: u64, converged: usize, failed: usize, elapsed_ms: u128) {
        if failed == 0 {
            info!(
                event = "reconcile_pass",
                host = %self.host,
                config_version,
                converged,
                elapsed_ms,
                "Containers reconciled"
            );
        } else {
            warn!(
                event = "reconcile_pass",
                host = %self.host,
                config_version,
                converged,
                failed,
                elapsed_ms,
                "Reconciliation finished with failures"
            );
        }
    }

    pub fn log_config_reload(&self, version: u64, containers: usize) {
        info!(
            event = "config_reloaded",
            host = %self.host,
            version,
            containers,
            "Config reloaded"
        );
    }

    pub fn log_scrape(&self, containers: usize, errors: usize, elapsed_ms: u128) {
        if errors == 0 {
            info!(
                event = "stats_scrape",
                host = %self.host,
                containers,
                elapsed_ms,
                "Updated container metrics"
            );
        } else {
            warn!(
                event = "stats_scrape",
                host = %self.host,
                containers,
                errors,
                elapsed_ms,
                "Container metrics partially updated"
            );
        }
    }
}
