//! Core data models for the container manager

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A container port qualified by its protocol, e.g. `80/tcp`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortKey {
    pub port: u16,
    pub protocol: String,
}

impl PortKey {
    pub fn new(port: u16, protocol: impl Into<String>) -> Self {
        Self {
            port,
            protocol: protocol.into(),
        }
    }

    /// Parse the engine's `port/protocol` notation. A bare port means tcp.
    pub fn parse(raw: &str) -> Option<Self> {
        let (port, protocol) = match raw.split_once('/') {
            Some((port, protocol)) => (port, protocol),
            None => (raw, "tcp"),
        };
        let port = port.trim().parse().ok()?;
        Some(Self::new(port, protocol.trim().to_ascii_lowercase()))
    }
}

impl fmt::Display for PortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol)
    }
}

/// Host side of a port binding
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostBinding {
    pub host_ip: String,
    pub host_port: String,
}

impl HostBinding {
    pub fn new(host_ip: impl Into<String>, host_port: impl Into<String>) -> Self {
        Self {
            host_ip: host_ip.into(),
            host_port: host_port.into(),
        }
    }
}

pub type PortSet = BTreeSet<PortKey>;

/// Port key to host bindings. Bindings are kept as a set so engine ordering
/// never registers as drift.
pub type PortMap = BTreeMap<PortKey, BTreeSet<HostBinding>>;

/// Operator-declared target state for one named container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredContainerSpec {
    pub name: String,
    pub image: String,
    pub exposed_ports: PortSet,
    pub port_bindings: PortMap,
    pub env: Vec<String>,
    pub cmd: Vec<String>,
}

impl DesiredContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            exposed_ports: PortSet::new(),
            port_bindings: PortMap::new(),
            env: Vec::new(),
            cmd: Vec::new(),
        }
    }

    /// Expose `port` and bind it to `binding` on the host
    pub fn with_port(mut self, port: PortKey, binding: HostBinding) -> Self {
        self.exposed_ports.insert(port.clone());
        self.port_bindings.entry(port).or_default().insert(binding);
        self
    }

    pub fn with_env(mut self, entry: impl Into<String>) -> Self {
        self.env.push(entry.into());
        self
    }

    pub fn with_cmd<I, S>(mut self, cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = cmd.into_iter().map(Into::into).collect();
        self
    }
}

/// One entry of the engine's container inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image_id: String,
}

/// Inspection detail of a live container
///
/// `id` changes across recreation; `name` is the stable join key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedContainer {
    pub id: String,
    pub name: String,
    /// Content identifier of the running image
    pub image_id: String,
    /// Image reference the container was created from
    pub image: String,
    pub exposed_ports: PortSet,
    pub port_bindings: PortMap,
    pub env: Vec<String>,
    pub cmd: Vec<String>,
}

/// Entry of the engine's local image index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub id: String,
    pub repo_tags: Vec<String>,
}

/// Fields the comparator checks, in comparison order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchedField {
    ExposedPorts,
    PortBindings,
    Image,
    Cmd,
}

impl fmt::Display for MismatchedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MismatchedField::ExposedPorts => "exposed_ports",
            MismatchedField::PortBindings => "port_bindings",
            MismatchedField::Image => "image",
            MismatchedField::Cmd => "cmd",
        };
        f.write_str(name)
    }
}

/// Outcome of comparing desired against observed state for one name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconciliationDecision {
    NoOp,
    Create,
    Recreate(Vec<MismatchedField>),
    RemovePruned,
}

/// CPU counters of one stats reading
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuCounters {
    pub total_usage: u64,
    pub system_usage: u64,
    pub online_cpus: u32,
}

/// Memory counters of one stats reading
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryCounters {
    pub usage: u64,
    pub max_usage: u64,
    pub limit: u64,
    pub cache: u64,
    pub rss: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkCounters {
    pub interface: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockIoEntry {
    pub major: u64,
    pub minor: u64,
    pub op: String,
    pub value: u64,
}

/// Raw stats counters for one container, consumed once per scrape
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerStatsSample {
    pub container_id: String,
    pub container_name: String,
    pub cpu: CpuCounters,
    pub precpu: CpuCounters,
    pub memory: MemoryCounters,
    pub networks: Vec<NetworkCounters>,
    pub block_io: Vec<BlockIoEntry>,
}
