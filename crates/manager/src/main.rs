//! docker-manager - declarative Docker container manager
//!
//! Keeps the containers on one host in line with a YAML document and
//! exposes per-container resource metrics for Prometheus.

use anyhow::{Context, Result};
use docker_manager::{api, config::AgentConfig};
use manager_lib::{
    desired::{ConfigStore, ManagerConfig},
    engine::{ContainerEngine, DockerEngine},
    health::{components, HealthRegistry},
    observability::{ManagerMetrics, StructuredLogger},
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = AgentConfig::load()?;
    let desired = ManagerConfig::load(&settings.config_path)
        .with_context(|| format!("Error reading config {}", settings.config_path.display()))?;

    let default_level = if desired.app_config.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().json())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config_path = %settings.config_path.display(),
        failure_policy = %settings.failure_policy,
        "Starting docker-manager"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let store = ConfigStore::new(desired).context("Error converting config")?;
    let snapshot = store.snapshot().await;
    let metrics = ManagerMetrics::new();
    metrics.set_config_version(snapshot.version);

    let engine: Arc<dyn ContainerEngine> = Arc::new(
        DockerEngine::connect(settings.timeouts()).context("Error creating Docker client")?,
    );
    if let Err(e) = engine.ping().await {
        error!(error = %e, "Container engine did not answer ping");
        health_registry
            .set_unhealthy(components::ENGINE, e.to_string())
            .await;
    }

    let logger = StructuredLogger::new(settings.host.clone());
    logger.log_config_reload(snapshot.version, snapshot.specs.len());

    let state = api::AppState::new(engine, store, settings.config_path.clone())
        .with_logger(logger)
        .with_policy(settings.policy()?)
        .with_stats_concurrency(settings.stats_concurrency)
        .with_partial_metrics(settings.serve_partial_metrics)
        .with_health_registry(health_registry.clone());

    health_registry.set_ready(true).await;

    api::serve(&settings.listen_addr, Arc::new(state)).await?;
    info!("Shutting down");

    Ok(())
}
