//! Container lifecycle sequencing
//!
//! A recreate is always stop, then remove, then create. Names are unique in
//! the engine, so the old container must be gone before the new one is
//! created. Nothing here retries: a failed recreate leaves the container
//! absent and the error goes back to the caller.

use super::observed::ObservedStateReader;
use crate::engine::ContainerEngine;
use crate::error::Result;
use crate::models::DesiredContainerSpec;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct LifecycleOrchestrator {
    engine: Arc<dyn ContainerEngine>,
    reader: ObservedStateReader,
}

impl LifecycleOrchestrator {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self {
            reader: ObservedStateReader::new(engine.clone()),
            engine,
        }
    }

    /// Create the container unless one with the same name exists.
    /// Returns whether a container was created.
    pub async fn ensure(&self, desired: &DesiredContainerSpec) -> Result<bool> {
        if self.reader.read().await?.find(&desired.name).is_some() {
            debug!(container = %desired.name, "Container already exists");
            return Ok(false);
        }

        info!(container = %desired.name, image = %desired.image, "Container not found, creating it");
        self.create(desired).await?;
        Ok(true)
    }

    /// Replace the container `engine_id` with a fresh one built from `desired`
    pub async fn recreate(&self, engine_id: &str, desired: &DesiredContainerSpec) -> Result<bool> {
        self.delete(engine_id).await?;
        let new_id = self.create(desired).await?;
        info!(
            container = %desired.name,
            old_id = %engine_id,
            new_id = %new_id,
            "Container recreated"
        );
        Ok(true)
    }

    /// Stop and remove. A container that is already stopped or already gone
    /// counts as deleted.
    pub async fn delete(&self, engine_id: &str) -> Result<()> {
        match self.engine.stop_container(engine_id).await {
            Err(e) if e.is_not_found() => {
                debug!(id = %engine_id, "Container already gone on stop");
                return Ok(());
            }
            other => other?,
        }

        match self.engine.remove_container(engine_id).await {
            Err(e) if e.is_not_found() => {
                debug!(id = %engine_id, "Container already gone on remove");
                Ok(())
            }
            other => other,
        }
    }

    /// Start the container; starting a running container is a no-op
    pub async fn start(&self, engine_id: &str) -> Result<()> {
        self.engine.start_container(engine_id).await
    }

    /// Create, pulling the image first if the engine does not have it locally
    async fn create(&self, desired: &DesiredContainerSpec) -> Result<String> {
        match self.engine.create_container(desired).await {
            Err(e) if e.is_not_found() => {
                info!(container = %desired.name, image = %desired.image, "Image missing locally, pulling");
                self.engine.pull_image(&desired.image).await?;
                self.engine.create_container(desired).await
            }
            other => other,
        }
    }
}
