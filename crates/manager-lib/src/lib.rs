//! Declarative Docker container manager
//!
//! This crate provides the core functionality for:
//! - Loading the desired container set from a YAML document
//! - Reconciling running containers against it (create, recreate, prune, start)
//! - Detecting stale images after a registry-side tag update
//! - Concurrent per-container stats collection into Prometheus gauges
//! - Health checks and observability

pub mod desired;
pub mod engine;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod reconcile;
pub mod stats;

pub use desired::{ConfigSnapshot, ConfigStore, ManagerConfig};
pub use error::{ManagerError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ContainerGauges, ManagerMetrics, StructuredLogger};
pub use reconcile::{FailurePolicy, PassReport, Reconciler};
pub use stats::{MetricsSink, StatsAggregator};
