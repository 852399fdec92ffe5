//! Container engine capability
//!
//! The reconciler and the stats aggregator only talk to the engine through
//! [`ContainerEngine`]. [`DockerEngine`] implements it over the Docker Engine
//! API; the in-memory `FakeEngine` backs the test suites.

mod docker;
#[cfg(any(test, feature = "testing"))]
mod fake;

pub use docker::{DockerEngine, EngineTimeouts};
#[cfg(any(test, feature = "testing"))]
pub use fake::{EngineCall, FakeEngine};

use crate::error::Result;
use crate::models::{
    ContainerStatsSample, ContainerSummary, DesiredContainerSpec, ImageSummary, ObservedContainer,
    PortMap, PortSet,
};

pub use async_trait::async_trait;

/// Operations the manager consumes from a container engine
///
/// Every call is a blocking request/response from the caller's point of view.
/// Implementations report an absent container or image as
/// [`ManagerError::NotFound`](crate::error::ManagerError::NotFound).
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// List every container, running or not
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>>;

    /// Inspect one container by engine id.
    ///
    /// `exposed_ports` holds only what the container itself declared, see
    /// [`declared_exposed_ports`].
    async fn inspect_container(&self, id: &str) -> Result<ObservedContainer>;

    /// Create (but do not start) a container; returns the new engine id
    async fn create_container(&self, spec: &DesiredContainerSpec) -> Result<String>;

    /// Start a container. Starting a running container succeeds.
    async fn start_container(&self, id: &str) -> Result<()>;

    async fn stop_container(&self, id: &str) -> Result<()>;

    async fn remove_container(&self, id: &str) -> Result<()>;

    /// Pull `reference` from its registry, waiting for completion
    async fn pull_image(&self, reference: &str) -> Result<()>;

    async fn list_images(&self) -> Result<Vec<ImageSummary>>;

    /// Fetch a single, non-streaming stats reading
    async fn stats_one_shot(&self, id: &str) -> Result<ContainerStatsSample>;

    /// Cheap reachability check
    async fn ping(&self) -> Result<()>;
}

/// Strip image defaults from a container's exposed ports.
///
/// The engine merges the image's `EXPOSE` list into the container config, so
/// inspection cannot tell a declared port from an inherited one. A port the
/// image exposes is kept only when a host binding claims it; every declared
/// port carries a binding.
pub fn declared_exposed_ports(exposed: &PortSet, bindings: &PortMap, image_defaults: &PortSet) -> PortSet {
    exposed
        .iter()
        .filter(|port| !image_defaults.contains(port) || bindings.contains_key(port))
        .cloned()
        .collect()
}
