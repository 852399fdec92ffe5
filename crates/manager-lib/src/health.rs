//! Health tracking for the container manager
//!
//! Each part of the manager reports its own status; `/healthz` folds them
//! into one verdict and `/readyz` additionally requires the startup checks
//! (config loaded, engine answered a ping) to have passed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Status one manager component last reported, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Last operation succeeded
    Healthy,
    /// Working, but the last operation had partial failures
    Degraded,
    /// Cannot do its job, e.g. the engine does not answer
    Unhealthy,
}

impl ComponentStatus {
    /// Degraded components still serve requests
    pub fn is_operational(&self) -> bool {
        *self < ComponentStatus::Unhealthy
    }
}

/// A component's last reported status, with the error that caused it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix seconds of the report
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn reported(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::reported(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::reported(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::reported(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across all components; healthy when none are registered
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|health| health.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Names under which the manager's parts report
pub mod components {
    /// Docker daemon reachability, from pings and failed engine calls
    pub const ENGINE: &str = "engine";
    /// Last configuration load or reload
    pub const CONFIG: &str = "config";
    /// Last reconciliation pass
    pub const RECONCILER: &str = "reconciler";
    /// Last stats scrape
    pub const STATS: &str = "stats";

    pub const ALL: &[&str] = &[ENGINE, CONFIG, RECONCILER, STATS];
}

/// Shared, cloneable view of every component's health plus the startup flag
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    /// Empty registry, not ready
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(RwLock::new(false)),
        }
    }

    /// Register every manager component as healthy
    pub async fn register_all(&self) {
        let mut registered = self.components.write().await;
        for name in components::ALL {
            registered.insert(name.to_string(), ComponentHealth::healthy());
        }
    }

    pub async fn register(&self, name: &str) {
        self.set_healthy(name).await;
    }

    /// Replace the report for `name`, registering it if needed
    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.components.write().await.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    /// Partial failure; the component keeps serving
    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    /// The component cannot work until a later success resets it
    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Flip once startup (config load, first engine ping) has finished
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Snapshot of every component and the overall verdict
    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Ready once started, for as long as no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let started = *self.ready.read().await;
        let operational = self.health().await.status.is_operational();

        let reason = match (started, operational) {
            (false, _) => Some("Manager not yet initialized"),
            (true, false) => Some("Critical component unhealthy"),
            (true, true) => None,
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason: reason.map(str::to_string),
        }
    }
}
