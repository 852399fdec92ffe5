//! Observed-state reader
//!
//! Inventories are read fresh from the engine on every call and never cached
//! across passes.

use crate::engine::ContainerEngine;
use crate::error::{ManagerError, Result};
use crate::models::{ContainerSummary, ObservedContainer};
use std::sync::Arc;

/// One inventory read, joined by container name
#[derive(Debug, Clone, Default)]
pub struct ObservedState {
    containers: Vec<ContainerSummary>,
}

impl ObservedState {
    pub fn new(containers: Vec<ContainerSummary>) -> Self {
        Self { containers }
    }

    pub fn find(&self, name: &str) -> Option<&ContainerSummary> {
        self.containers.iter().find(|c| c.name == name)
    }

    pub fn containers(&self) -> &[ContainerSummary] {
        &self.containers
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

#[derive(Clone)]
pub struct ObservedStateReader {
    engine: Arc<dyn ContainerEngine>,
}

impl ObservedStateReader {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    pub async fn read(&self) -> Result<ObservedState> {
        Ok(ObservedState::new(self.engine.list_containers().await?))
    }

    pub async fn inspect(&self, id: &str) -> Result<ObservedContainer> {
        self.engine.inspect_container(id).await
    }

    /// Current engine id of the container called `name`
    pub async fn resolve_id(&self, name: &str) -> Result<String> {
        self.read()
            .await?
            .find(name)
            .map(|c| c.id.clone())
            .ok_or_else(|| ManagerError::NotFound(format!("container {} not found", name)))
    }
}
