//! Docker Engine API adapter
//!
//! Translates between the manager's models and bollard's request/response
//! types, classifies engine errors and puts a deadline on every call.

use super::{async_trait, declared_exposed_ports, ContainerEngine};
use crate::error::{ManagerError, Result};
use crate::models::{
    BlockIoEntry, ContainerStatsSample, ContainerSummary, CpuCounters, DesiredContainerSpec,
    HostBinding, ImageSummary, MemoryCounters, NetworkCounters, ObservedContainer, PortKey,
    PortMap, PortSet,
};
use bollard::container::{
    CPUStats, Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    MemoryStatsStats, RemoveContainerOptions, StartContainerOptions, Stats, StatsOptions,
    StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// Deadlines for engine calls
#[derive(Debug, Clone, Copy)]
pub struct EngineTimeouts {
    /// Applied to every call except image pulls
    pub default: Duration,
    /// Applied to image pulls, which download layers
    pub pull: Duration,
}

impl Default for EngineTimeouts {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(30),
            pull: Duration::from_secs(300),
        }
    }
}

/// [`ContainerEngine`] backed by the local Docker daemon
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
    timeouts: EngineTimeouts,
}

impl DockerEngine {
    /// Connect using the platform defaults (`DOCKER_HOST` or the local socket)
    pub fn connect(timeouts: EngineTimeouts) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ManagerError::EngineUnavailable(e.to_string()))?;

        info!(
            default_timeout_secs = timeouts.default.as_secs(),
            pull_timeout_secs = timeouts.pull.as_secs(),
            "Docker client configured"
        );

        Ok(Self { docker, timeouts })
    }

    async fn call<T, F>(&self, operation: &str, subject: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, BollardError>>,
    {
        bounded(operation, self.timeouts.default, async {
            fut.await.map_err(|e| classify(e, subject))
        })
        .await
    }

    /// Ports the image of container `name` exposes by default
    async fn image_exposed_ports(&self, name: &str, image_id: &str) -> Result<PortSet> {
        let ambiguous = |reason: String| ManagerError::ComparisonAmbiguous {
            name: name.to_string(),
            reason,
        };
        if image_id.is_empty() {
            return Err(ambiguous(
                "inspection names no image to tell inherited ports from declared ones".to_string(),
            ));
        }

        let image = self
            .call("inspect image", image_id, self.docker.inspect_image(image_id))
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    ambiguous(format!("image {} is gone, its exposed ports are unknown", image_id))
                } else {
                    e
                }
            })?;

        match image.config.and_then(|c| c.exposed_ports) {
            Some(ports) => parse_ports(name, ports.keys()),
            None => Ok(PortSet::new()),
        }
    }
}

async fn bounded<T, F>(operation: &str, deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(ManagerError::Timeout {
            operation: operation.to_string(),
            after: deadline,
        }),
    }
}

fn classify(err: BollardError, subject: &str) -> ManagerError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => ManagerError::NotFound(format!("{}: {}", subject, message)),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => ManagerError::engine(status_code, message),
        other => ManagerError::EngineUnavailable(other.to_string()),
    }
}

fn strip_name(raw: &str) -> String {
    raw.trim_start_matches('/').to_string()
}

/// Split an image reference into the `fromImage`/`tag` pair the pull endpoint
/// expects. References without a tag or digest pull `latest`.
fn split_reference(reference: &str) -> (String, String) {
    if reference.contains('@') {
        return (reference.to_string(), String::new());
    }
    let last_segment_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    match reference[last_segment_start..].rfind(':') {
        Some(pos) => {
            let split = last_segment_start + pos;
            (
                reference[..split].to_string(),
                reference[split + 1..].to_string(),
            )
        }
        None => (reference.to_string(), "latest".to_string()),
    }
}

fn parse_ports<'a>(name: &str, keys: impl Iterator<Item = &'a String>) -> Result<PortSet> {
    keys.map(|raw| {
        PortKey::parse(raw).ok_or_else(|| ManagerError::ComparisonAmbiguous {
            name: name.to_string(),
            reason: format!("unparsable exposed port {:?}", raw),
        })
    })
    .collect()
}

fn parse_bindings(
    name: &str,
    bindings: HashMap<String, Option<Vec<PortBinding>>>,
) -> Result<PortMap> {
    let mut map = PortMap::new();
    for (raw, hosts) in bindings {
        let key = PortKey::parse(&raw).ok_or_else(|| ManagerError::ComparisonAmbiguous {
            name: name.to_string(),
            reason: format!("unparsable port binding {:?}", raw),
        })?;
        let entry = map.entry(key).or_default();
        for host in hosts.unwrap_or_default() {
            entry.insert(HostBinding::new(
                host.host_ip.unwrap_or_default(),
                host.host_port.unwrap_or_default(),
            ));
        }
    }
    Ok(map)
}

fn create_config(spec: &DesiredContainerSpec) -> Config<String> {
    let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
        .exposed_ports
        .iter()
        .map(|port| (port.to_string(), HashMap::new()))
        .collect();

    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
        .port_bindings
        .iter()
        .map(|(port, hosts)| {
            let hosts = hosts
                .iter()
                .map(|h| PortBinding {
                    host_ip: Some(h.host_ip.clone()),
                    host_port: Some(h.host_port.clone()),
                })
                .collect();
            (port.to_string(), Some(hosts))
        })
        .collect();

    Config {
        image: Some(spec.image.clone()),
        exposed_ports: Some(exposed_ports),
        env: Some(spec.env.clone()),
        cmd: if spec.cmd.is_empty() {
            None
        } else {
            Some(spec.cmd.clone())
        },
        host_config: Some(HostConfig {
            port_bindings: Some(port_bindings),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn cpu_counters(stats: &CPUStats) -> CpuCounters {
    let percpu = stats
        .cpu_usage
        .percpu_usage
        .as_ref()
        .map(|v| v.len() as u32)
        .unwrap_or(0);
    CpuCounters {
        total_usage: stats.cpu_usage.total_usage,
        system_usage: stats.system_cpu_usage.unwrap_or(0),
        online_cpus: stats.online_cpus.map(|n| n as u32).unwrap_or(percpu),
    }
}

fn stats_sample(stats: Stats) -> ContainerStatsSample {
    // cgroup v2 reports page cache as `file` and rss as `anon`
    let (cache, rss) = match &stats.memory_stats.stats {
        Some(MemoryStatsStats::V1(v1)) => (v1.cache, v1.rss),
        Some(MemoryStatsStats::V2(v2)) => (v2.file, v2.anon),
        None => (0, 0),
    };

    let networks = stats
        .networks
        .unwrap_or_default()
        .into_iter()
        .map(|(interface, net)| NetworkCounters {
            interface,
            rx_bytes: net.rx_bytes,
            tx_bytes: net.tx_bytes,
        })
        .collect();

    let block_io = stats
        .blkio_stats
        .io_service_bytes_recursive
        .unwrap_or_default()
        .into_iter()
        .map(|entry| BlockIoEntry {
            major: entry.major,
            minor: entry.minor,
            op: entry.op,
            value: entry.value,
        })
        .collect();

    ContainerStatsSample {
        container_id: stats.id,
        container_name: strip_name(&stats.name),
        cpu: cpu_counters(&stats.cpu_stats),
        precpu: cpu_counters(&stats.precpu_stats),
        memory: MemoryCounters {
            usage: stats.memory_stats.usage.unwrap_or(0),
            max_usage: stats.memory_stats.max_usage.unwrap_or(0),
            limit: stats.memory_stats.limit.unwrap_or(0),
            cache,
            rss,
        },
        networks,
        block_io,
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let containers = self
            .call(
                "list containers",
                "containers",
                self.docker.list_containers(Some(options)),
            )
            .await?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .as_ref()
                    .and_then(|names| names.first())
                    .map(|n| strip_name(n))
                    .unwrap_or_default();
                Some(ContainerSummary {
                    id,
                    name,
                    image_id: c.image_id.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ObservedContainer> {
        let response = self
            .call(
                "inspect container",
                id,
                self.docker
                    .inspect_container(id, None::<InspectContainerOptions>),
            )
            .await?;

        let name = response
            .name
            .as_deref()
            .map(strip_name)
            .unwrap_or_default();
        let config = response
            .config
            .ok_or_else(|| ManagerError::ComparisonAmbiguous {
                name: name.clone(),
                reason: "inspection has no container config".to_string(),
            })?;

        let exposed_ports = match &config.exposed_ports {
            Some(ports) => parse_ports(&name, ports.keys())?,
            None => PortSet::new(),
        };
        let port_bindings = match response.host_config.and_then(|h| h.port_bindings) {
            Some(bindings) => parse_bindings(&name, bindings)?,
            None => PortMap::new(),
        };
        let image_id = response.image.unwrap_or_default();

        // Unbound ports may come from the image's EXPOSE list
        let exposed_ports = if exposed_ports.iter().all(|p| port_bindings.contains_key(p)) {
            exposed_ports
        } else {
            let defaults = self.image_exposed_ports(&name, &image_id).await?;
            declared_exposed_ports(&exposed_ports, &port_bindings, &defaults)
        };

        Ok(ObservedContainer {
            id: response.id.unwrap_or_else(|| id.to_string()),
            name,
            image_id,
            image: config.image.unwrap_or_default(),
            exposed_ports,
            port_bindings,
            env: config.env.unwrap_or_default(),
            cmd: config.cmd.unwrap_or_default(),
        })
    }

    async fn create_container(&self, spec: &DesiredContainerSpec) -> Result<String> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let result = bounded("create container", self.timeouts.default, async {
            self.docker
                .create_container(Some(options), create_config(spec))
                .await
                .map_err(|e| match e {
                    BollardError::DockerResponseServerError {
                        status_code: 409,
                        message,
                    } => ManagerError::Conflict {
                        name: spec.name.clone(),
                        message,
                    },
                    other => classify(other, &spec.image),
                })
        })
        .await?;

        for warning in &result.warnings {
            debug!(container = %spec.name, warning = %warning, "Engine warning on create");
        }
        Ok(result.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        match self
            .call(
                "start container",
                id,
                self.docker
                    .start_container(id, None::<StartContainerOptions<String>>),
            )
            .await
        {
            Err(e) if e.is_not_modified() => Ok(()),
            other => other,
        }
    }

    async fn stop_container(&self, id: &str) -> Result<()> {
        match self
            .call(
                "stop container",
                id,
                self.docker.stop_container(id, None::<StopContainerOptions>),
            )
            .await
        {
            Err(e) if e.is_not_modified() => Ok(()),
            other => other,
        }
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.call(
            "remove container",
            id,
            self.docker
                .remove_container(id, None::<RemoveContainerOptions>),
        )
        .await
    }

    async fn pull_image(&self, reference: &str) -> Result<()> {
        let (from_image, tag) = split_reference(reference);
        let options = CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };

        bounded("pull image", self.timeouts.pull, async {
            let mut progress = self.docker.create_image(Some(options), None, None);
            // Progress output is drained and discarded; only completion matters
            while let Some(item) = progress.next().await {
                item.map_err(|e| classify(e, reference))?;
            }
            Ok(())
        })
        .await
    }

    async fn list_images(&self) -> Result<Vec<ImageSummary>> {
        let options = ListImagesOptions::<String> {
            all: false,
            ..Default::default()
        };
        let images = self
            .call("list images", "images", self.docker.list_images(Some(options)))
            .await?;

        Ok(images
            .into_iter()
            .map(|image| ImageSummary {
                id: image.id,
                repo_tags: image.repo_tags,
            })
            .collect())
    }

    async fn stats_one_shot(&self, id: &str) -> Result<ContainerStatsSample> {
        // stream=false without one_shot lets the engine take two readings, so
        // the previous-CPU counters are populated
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };

        bounded("container stats", self.timeouts.default, async {
            let mut stream = self.docker.stats(id, Some(options));
            match stream.next().await {
                Some(Ok(stats)) => Ok(stats_sample(stats)),
                Some(Err(e)) => Err(classify(e, id)),
                None => Err(ManagerError::engine(0, "engine returned no stats")),
            }
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        self.call("ping", "engine", self.docker.ping()).await?;
        Ok(())
    }
}
