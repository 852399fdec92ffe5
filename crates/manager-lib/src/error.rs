//! Error types for the container manager
//!
//! Engine failures are classified once, in the engine adapter, so the
//! reconciliation code can tell an idempotent "already gone" from a real
//! failure without string matching.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for manager operations
pub type Result<T> = std::result::Result<T, ManagerError>;

/// One failed container in a stats scrape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsFailure {
    pub container_id: String,
    pub cause: String,
}

impl fmt::Display for StatsFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "could not fetch stats for container {}: {}",
            self.container_id, self.cause
        )
    }
}

/// One failed container in a reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerFailure {
    pub container: String,
    pub cause: String,
    /// The engine could not be reached while handling this container
    pub engine_unreachable: bool,
}

impl ContainerFailure {
    pub fn new(container: impl Into<String>, err: &ManagerError) -> Self {
        Self {
            container: container.into(),
            cause: err.to_string(),
            engine_unreachable: err.is_engine_unreachable(),
        }
    }
}

impl fmt::Display for ContainerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.container, self.cause)
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur while reconciling or observing containers
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Transport-level failure talking to the engine
    #[error("container engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Container or image absent
    #[error("not found: {0}")]
    NotFound(String),

    /// A container with the requested name already exists
    #[error("name conflict for container {name}: {message}")]
    Conflict { name: String, message: String },

    /// Configuration could not be read or validated
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Observed state lacks the fields needed for a structural comparison
    #[error("cannot compare container {name}: {reason}")]
    ComparisonAmbiguous { name: String, reason: String },

    /// One or more per-container stats queries failed
    #[error("errors occurred: [{}]", join(.0))]
    StatsCollectionPartial(Vec<StatsFailure>),

    /// An engine call exceeded its deadline
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout { operation: String, after: Duration },

    /// Any other engine-side failure
    #[error("engine error (status {status}): {message}")]
    Engine { status: u16, message: String },

    /// Image reference could not be resolved in the local index after a pull
    #[error("could not find the latest image for {0}")]
    ImageUnresolved(String),

    /// Aggregated per-container failures of a best-effort pass
    #[error("reconciliation failed for {} container(s): {}", .0.len(), join(.0))]
    Reconcile(Vec<ContainerFailure>),
}

impl ManagerError {
    /// HTTP status codes the engine uses for "nothing to do"
    const NOT_MODIFIED: u16 = 304;

    pub fn engine(status: u16, message: impl Into<String>) -> Self {
        ManagerError::Engine {
            status,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ManagerError::NotFound(_))
    }

    /// Transport failure or missed deadline, directly or on any container of
    /// an aggregated pass failure
    pub fn is_engine_unreachable(&self) -> bool {
        match self {
            ManagerError::EngineUnavailable(_) | ManagerError::Timeout { .. } => true,
            ManagerError::Reconcile(failures) => failures.iter().any(|f| f.engine_unreachable),
            _ => false,
        }
    }

    /// Stop on a stopped container or start on a running one
    pub fn is_not_modified(&self) -> bool {
        matches!(self, ManagerError::Engine { status, .. } if *status == Self::NOT_MODIFIED)
    }
}

impl From<config::ConfigError> for ManagerError {
    fn from(err: config::ConfigError) -> Self {
        ManagerError::ConfigInvalid(err.to_string())
    }
}
