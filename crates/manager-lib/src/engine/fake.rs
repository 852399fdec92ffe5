//! In-memory container engine for tests
//!
//! Mirrors the engine semantics the reconciler relies on: unique names,
//! remove refuses running containers, create needs the image locally, pulls
//! resolve against a fake registry, images may carry default exposed ports
//! that end up in their containers' config. Every call is recorded.

use super::{async_trait, declared_exposed_ports, ContainerEngine};
use crate::error::{ManagerError, Result};
use crate::models::{
    ContainerStatsSample, ContainerSummary, DesiredContainerSpec, ImageSummary, ObservedContainer,
    PortKey, PortSet,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// A recorded engine call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EngineCall {
    ListContainers,
    Inspect(String),
    /// Carries the container name
    Create(String),
    Start(String),
    Stop(String),
    Remove(String),
    Pull(String),
    ListImages,
    Stats(String),
    Ping,
}

#[derive(Debug, Clone)]
struct FakeContainer {
    observed: ObservedContainer,
    running: bool,
}

#[derive(Default)]
struct State {
    containers: Vec<FakeContainer>,
    images: Vec<ImageSummary>,
    registry: HashMap<String, String>,
    /// Exposed ports baked into an image, by image id
    image_ports: HashMap<String, PortSet>,
    stats: HashMap<String, ContainerStatsSample>,
    failures: HashMap<EngineCall, String>,
    disconnects: HashSet<EngineCall>,
    unavailable: bool,
    calls: Vec<EngineCall>,
    next_id: u64,
}

impl State {
    fn find(&self, id: &str) -> Option<usize> {
        self.containers.iter().position(|c| c.observed.id == id)
    }

    fn local_image(&self, reference: &str) -> Option<String> {
        self.images
            .iter()
            .find(|img| img.repo_tags.iter().any(|t| t == reference))
            .map(|img| img.id.clone())
    }

    fn tag_image(&mut self, reference: &str, id: &str) {
        for image in &mut self.images {
            image.repo_tags.retain(|t| t != reference);
        }
        match self.images.iter_mut().find(|img| img.id == id) {
            Some(image) => image.repo_tags.push(reference.to_string()),
            None => self.images.push(ImageSummary {
                id: id.to_string(),
                repo_tags: vec![reference.to_string()],
            }),
        }
    }

    fn insert(&mut self, spec: &DesiredContainerSpec, image_id: String, running: bool) -> String {
        self.next_id += 1;
        let id = format!("fake-{:04}", self.next_id);
        // The engine merges the image's exposed ports into the container config
        let mut exposed_ports = spec.exposed_ports.clone();
        if let Some(defaults) = self.image_ports.get(&image_id) {
            exposed_ports.extend(defaults.iter().cloned());
        }
        self.containers.push(FakeContainer {
            observed: ObservedContainer {
                id: id.clone(),
                name: spec.name.clone(),
                image_id,
                image: spec.image.clone(),
                exposed_ports,
                port_bindings: spec.port_bindings.clone(),
                env: spec.env.clone(),
                cmd: spec.cmd.clone(),
            },
            running,
        });
        id
    }
}

/// In-memory [`ContainerEngine`]
#[derive(Clone, Default)]
pub struct FakeEngine {
    state: Arc<Mutex<State>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("fake engine state poisoned")
    }

    /// Record `call` and return the injected failure for it, if any
    fn enter(&self, call: EngineCall) -> Result<MutexGuard<'_, State>> {
        let mut state = self.state();
        state.calls.push(call.clone());
        if state.unavailable || state.disconnects.contains(&call) {
            return Err(ManagerError::EngineUnavailable(
                "connection refused".to_string(),
            ));
        }
        if let Some(message) = state.failures.get(&call) {
            return Err(ManagerError::engine(500, message.clone()));
        }
        Ok(state)
    }

    /// Make `reference` available both locally and in the registry
    pub fn with_image(self, reference: &str, id: &str) -> Self {
        {
            let mut state = self.state();
            state.registry.insert(reference.to_string(), id.to_string());
            state.tag_image(reference, id);
        }
        self
    }

    /// Give image `id` default exposed ports, as an `EXPOSE` line would
    pub fn with_image_ports(self, id: &str, ports: impl IntoIterator<Item = PortKey>) -> Self {
        self.state()
            .image_ports
            .entry(id.to_string())
            .or_default()
            .extend(ports);
        self
    }

    /// Simulate a new push of `reference` to the registry
    pub fn publish_image(&self, reference: &str, id: &str) {
        self.state()
            .registry
            .insert(reference.to_string(), id.to_string());
    }

    /// Make pulls of `reference` succeed without tagging anything locally
    pub fn publish_dangling(&self, reference: &str) {
        self.state()
            .registry
            .insert(reference.to_string(), String::new());
    }

    /// Seed a container as if created from `spec`; returns its id
    pub fn seed_container(&self, spec: &DesiredContainerSpec, running: bool) -> String {
        let mut state = self.state();
        let image_id = state
            .local_image(&spec.image)
            .unwrap_or_else(|| format!("sha256:{}", spec.image));
        state.insert(spec, image_id, running)
    }

    /// Overwrite the observed state of an existing container
    pub fn mutate_container(&self, name: &str, f: impl FnOnce(&mut ObservedContainer)) {
        let mut state = self.state();
        if let Some(c) = state.containers.iter_mut().find(|c| c.observed.name == name) {
            f(&mut c.observed);
        }
    }

    pub fn set_stats(&self, id: &str, sample: ContainerStatsSample) {
        self.state().stats.insert(id.to_string(), sample);
    }

    /// Fail every future occurrence of `call` with `message`
    pub fn fail_on(&self, call: EngineCall, message: &str) {
        self.state().failures.insert(call, message.to_string());
    }

    /// Fail every future occurrence of `call` as if the engine went away
    pub fn disconnect_on(&self, call: EngineCall) {
        self.state().disconnects.insert(call);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failures.clear();
        state.disconnects.clear();
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn count(&self, pred: impl Fn(&EngineCall) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    /// Stored record of `name`, including ports merged in from its image
    pub fn container(&self, name: &str) -> Option<ObservedContainer> {
        self.state()
            .containers
            .iter()
            .find(|c| c.observed.name == name)
            .map(|c| c.observed.clone())
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.state()
            .containers
            .iter()
            .any(|c| c.observed.name == name && c.running)
    }

    pub fn names(&self) -> Vec<String> {
        self.state()
            .containers
            .iter()
            .map(|c| c.observed.name.clone())
            .collect()
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let state = self.enter(EngineCall::ListContainers)?;
        Ok(state
            .containers
            .iter()
            .map(|c| ContainerSummary {
                id: c.observed.id.clone(),
                name: c.observed.name.clone(),
                image_id: c.observed.image_id.clone(),
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ObservedContainer> {
        let state = self.enter(EngineCall::Inspect(id.to_string()))?;
        let mut observed = state
            .find(id)
            .map(|i| state.containers[i].observed.clone())
            .ok_or_else(|| ManagerError::NotFound(format!("no such container: {}", id)))?;
        if let Some(defaults) = state.image_ports.get(&observed.image_id) {
            observed.exposed_ports =
                declared_exposed_ports(&observed.exposed_ports, &observed.port_bindings, defaults);
        }
        Ok(observed)
    }

    async fn create_container(&self, spec: &DesiredContainerSpec) -> Result<String> {
        let mut state = self.enter(EngineCall::Create(spec.name.clone()))?;
        if state.containers.iter().any(|c| c.observed.name == spec.name) {
            return Err(ManagerError::Conflict {
                name: spec.name.clone(),
                message: "name already in use".to_string(),
            });
        }
        let image_id = state
            .local_image(&spec.image)
            .ok_or_else(|| ManagerError::NotFound(format!("no such image: {}", spec.image)))?;
        Ok(state.insert(spec, image_id, false))
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let mut state = self.enter(EngineCall::Start(id.to_string()))?;
        let i = state
            .find(id)
            .ok_or_else(|| ManagerError::NotFound(format!("no such container: {}", id)))?;
        state.containers[i].running = true;
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> Result<()> {
        let mut state = self.enter(EngineCall::Stop(id.to_string()))?;
        let i = state
            .find(id)
            .ok_or_else(|| ManagerError::NotFound(format!("no such container: {}", id)))?;
        state.containers[i].running = false;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let mut state = self.enter(EngineCall::Remove(id.to_string()))?;
        let i = state
            .find(id)
            .ok_or_else(|| ManagerError::NotFound(format!("no such container: {}", id)))?;
        if state.containers[i].running {
            return Err(ManagerError::engine(
                409,
                "cannot remove a running container",
            ));
        }
        state.containers.remove(i);
        Ok(())
    }

    async fn pull_image(&self, reference: &str) -> Result<()> {
        let mut state = self.enter(EngineCall::Pull(reference.to_string()))?;
        let id = state
            .registry
            .get(reference)
            .cloned()
            .ok_or_else(|| ManagerError::NotFound(format!("manifest unknown: {}", reference)))?;
        if !id.is_empty() {
            state.tag_image(reference, &id);
        }
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        let state = self.enter(EngineCall::ListImages)?;
        Ok(state.images.clone())
    }

    async fn stats_one_shot(&self, id: &str) -> Result<ContainerStatsSample> {
        let state = self.enter(EngineCall::Stats(id.to_string()))?;
        let i = state
            .find(id)
            .ok_or_else(|| ManagerError::NotFound(format!("no such container: {}", id)))?;
        let name = state.containers[i].observed.name.clone();
        Ok(state
            .stats
            .get(id)
            .cloned()
            .unwrap_or_else(|| ContainerStatsSample {
                container_id: id.to_string(),
                container_name: name,
                ..Default::default()
            }))
    }

    async fn ping(&self) -> Result<()> {
        let _state = self.enter(EngineCall::Ping)?;
        Ok(())
    }
}
