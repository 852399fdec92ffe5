//! HTTP API for reconciliation triggers, config reload, metrics and health

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use manager_lib::{
    desired::{ConfigStore, ManagerConfig},
    engine::ContainerEngine,
    health::{components, ComponentStatus, HealthRegistry},
    observability::{ContainerGauges, ManagerMetrics, StructuredLogger},
    reconcile::{FailurePolicy, Reconciler},
    stats::StatsAggregator,
    ManagerError,
};
use prometheus::{Encoder, TextEncoder};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<dyn ContainerEngine>,
    pub store: ConfigStore,
    pub config_path: PathBuf,
    pub reconciler: Reconciler,
    pub aggregator: StatsAggregator,
    pub gauges: ContainerGauges,
    pub metrics: ManagerMetrics,
    pub health_registry: HealthRegistry,
    pub logger: StructuredLogger,
    pub serve_partial_metrics: bool,
}

impl AppState {
    pub fn new(engine: Arc<dyn ContainerEngine>, store: ConfigStore, config_path: PathBuf) -> Self {
        Self {
            reconciler: Reconciler::new(engine.clone(), FailurePolicy::default()),
            aggregator: StatsAggregator::new(engine.clone(), manager_lib::stats::DEFAULT_CONCURRENCY),
            engine,
            store,
            config_path,
            gauges: ContainerGauges::new(),
            metrics: ManagerMetrics::new(),
            health_registry: HealthRegistry::new(),
            logger: StructuredLogger::new("local"),
            serve_partial_metrics: false,
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.reconciler =
            Reconciler::new(self.engine.clone(), policy).with_logger(self.logger.clone());
        self
    }

    pub fn with_stats_concurrency(mut self, concurrency: usize) -> Self {
        self.aggregator =
            StatsAggregator::new(self.engine.clone(), concurrency).with_logger(self.logger.clone());
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.reconciler = self.reconciler.with_logger(logger.clone());
        self.aggregator = self.aggregator.with_logger(logger.clone());
        self.logger = logger;
        self
    }

    pub fn with_partial_metrics(mut self, serve_partial_metrics: bool) -> Self {
        self.serve_partial_metrics = serve_partial_metrics;
        self
    }

    pub fn with_health_registry(mut self, health_registry: HealthRegistry) -> Self {
        self.health_registry = health_registry;
        self
    }

    /// Mark the engine unhealthy when `err`, or any container failure it
    /// aggregates, says the engine cannot be reached
    async fn note_engine_error(&self, err: &ManagerError) {
        if err.is_engine_unreachable() {
            self.health_registry
                .set_unhealthy(components::ENGINE, err.to_string())
                .await;
        }
    }
}

fn internal_error(err: impl ToString) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
}

/// Run one reconciliation pass against the current configuration
async fn update(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.store.snapshot().await;

    match state.reconciler.run_pass(&snapshot).await {
        Ok(report) => {
            state.health_registry.set_healthy(components::RECONCILER).await;
            state.health_registry.set_healthy(components::ENGINE).await;
            (StatusCode::OK, format!("Containers reconciled\n{}", report)).into_response()
        }
        Err(e) => {
            error!(error = %e, config_version = snapshot.version, "Reconciliation failed");
            state
                .health_registry
                .set_degraded(components::RECONCILER, e.to_string())
                .await;
            state.note_engine_error(&e).await;
            internal_error(e)
        }
    }
}

/// Re-read the configuration file and swap it in. The previous configuration
/// stays active if the file is unreadable or invalid.
async fn reload(State(state): State<Arc<AppState>>) -> Response {
    let result = match ManagerConfig::load(&state.config_path) {
        Ok(config) => state.store.replace(config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(version) => {
            let containers = state.store.snapshot().await.specs.len();
            state.metrics.set_config_version(version);
            state.logger.log_config_reload(version, containers);
            state.health_registry.set_healthy(components::CONFIG).await;
            (StatusCode::OK, "Config reloaded\n").into_response()
        }
        Err(e) => {
            error!(error = %e, path = %state.config_path.display(), "Config reload failed");
            state
                .health_registry
                .set_degraded(
                    components::CONFIG,
                    format!("reload failed, previous configuration active: {}", e),
                )
                .await;
            internal_error(e)
        }
    }
}

/// Refresh container gauges, then serve the Prometheus exposition
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.aggregator.scrape(&state.gauges).await {
        Ok(_) => {
            state.health_registry.set_healthy(components::STATS).await;
        }
        Err(e @ ManagerError::StatsCollectionPartial(_)) => {
            state
                .health_registry
                .set_degraded(components::STATS, e.to_string())
                .await;
            if !state.serve_partial_metrics {
                return internal_error(e);
            }
            warn!(error = %e, "Serving partial container metrics");
        }
        Err(e) => {
            error!(error = %e, "Could not list containers");
            state
                .health_registry
                .set_unhealthy(components::STATS, e.to_string())
                .await;
            state.note_engine_error(&e).await;
            return internal_error(e);
        }
    }

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return internal_error(e);
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Health check response - returns 200 if healthy or degraded, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.engine.ping().await {
        Ok(()) => state.health_registry.set_healthy(components::ENGINE).await,
        Err(e) => {
            state
                .health_registry
                .set_unhealthy(components::ENGINE, e.to_string())
                .await
        }
    }

    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/update", get(update).post(update))
        .route("/reload", get(reload).post(reload))
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

/// Serve the API until Ctrl-C
pub async fn serve(listen_addr: &str, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    info!(addr = %listen_addr, "Beginning to serve");

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
