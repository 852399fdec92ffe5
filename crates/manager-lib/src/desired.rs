//! Desired-state configuration
//!
//! The operator's configuration document, its conversion into
//! [`DesiredContainerSpec`]s and the process-wide [`ConfigStore`] that
//! reloads swap wholesale.

use crate::error::{ManagerError, Result};
use crate::models::{DesiredContainerSpec, HostBinding, PortKey};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

const PROTOCOLS: &[&str] = &["tcp", "udp", "sctp"];

/// Behaviour switches of the manager
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub debug: bool,
    /// Pull images and recreate containers running a stale image
    #[serde(default)]
    pub update_check: bool,
    /// Delete observed containers absent from the desired set
    #[serde(default)]
    pub remove_unwanted_containers: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBindingConfig {
    pub port: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub host_ip: String,
    #[serde(default)]
    pub host_port: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub port_bindings: Vec<PortBindingConfig>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub cmd: Vec<String>,
}

/// The configuration document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(default)]
    pub app_config: AppConfig,
    #[serde(default)]
    pub containers: Vec<ContainerConfig>,
}

impl PortBindingConfig {
    fn port_key(&self, container: &str) -> Result<PortKey> {
        let port: u16 = self.port.trim().parse().map_err(|_| {
            ManagerError::ConfigInvalid(format!(
                "container {}: invalid port {:?}",
                container, self.port
            ))
        })?;
        let protocol = match self.protocol.trim() {
            "" => "tcp".to_string(),
            p => p.to_ascii_lowercase(),
        };
        if !PROTOCOLS.contains(&protocol.as_str()) {
            return Err(ManagerError::ConfigInvalid(format!(
                "container {}: unsupported protocol {:?}",
                container, self.protocol
            )));
        }
        Ok(PortKey::new(port, protocol))
    }
}

impl ContainerConfig {
    pub fn to_spec(&self) -> Result<DesiredContainerSpec> {
        if self.name.trim().is_empty() {
            return Err(ManagerError::ConfigInvalid(
                "container with empty name".to_string(),
            ));
        }
        if self.image.trim().is_empty() {
            return Err(ManagerError::ConfigInvalid(format!(
                "container {}: empty image",
                self.name
            )));
        }

        let mut spec = DesiredContainerSpec::new(&self.name, &self.image).with_cmd(&self.cmd);
        spec.env = self.env.clone();
        for binding in &self.port_bindings {
            let key = binding.port_key(&self.name)?;
            spec = spec.with_port(key, HostBinding::new(&binding.host_ip, &binding.host_port));
        }
        Ok(spec)
    }
}

impl ManagerConfig {
    /// Read and validate the YAML document at `path`
    pub fn load(path: &Path) -> Result<Self> {
        let source = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml))
            .build()?;
        let parsed: ManagerConfig = source.try_deserialize()?;
        parsed.desired_specs()?;
        debug!(path = %path.display(), containers = parsed.containers.len(), "Parsed configuration");
        Ok(parsed)
    }

    /// Desired specs in declaration order. Names must be unique.
    pub fn desired_specs(&self) -> Result<Vec<DesiredContainerSpec>> {
        let mut seen = HashSet::new();
        self.containers
            .iter()
            .map(|c| {
                if !seen.insert(c.name.as_str()) {
                    return Err(ManagerError::ConfigInvalid(format!(
                        "duplicate container name {}",
                        c.name
                    )));
                }
                c.to_spec()
            })
            .collect()
    }
}

/// An immutable, versioned view of the configuration
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub version: u64,
    pub app: AppConfig,
    pub specs: Vec<DesiredContainerSpec>,
}

/// Process-wide current configuration
///
/// Readers copy the `Arc` out and release the lock immediately, so a pass
/// works on one consistent snapshot while a reload swaps in the next.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    current: Arc<RwLock<Arc<ConfigSnapshot>>>,
}

impl ConfigStore {
    pub fn new(config: ManagerConfig) -> Result<Self> {
        let snapshot = ConfigSnapshot {
            version: 1,
            specs: config.desired_specs()?,
            app: config.app_config,
        };
        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(snapshot))),
        })
    }

    pub async fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.current.read().await.clone()
    }

    /// Validate and install `config`; returns the new version. On error the
    /// current snapshot stays active.
    pub async fn replace(&self, config: ManagerConfig) -> Result<u64> {
        let specs = config.desired_specs()?;
        let mut current = self.current.write().await;
        let version = current.version + 1;
        *current = Arc::new(ConfigSnapshot {
            version,
            app: config.app_config,
            specs,
        });
        info!(version, containers = current.specs.len(), "Configuration replaced");
        Ok(version)
    }
}
