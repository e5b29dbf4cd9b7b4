// Shared types for the fleet workspace: the error taxonomy, the container
// status vocabulary and the capability contract every container runtime
// collaborator has to satisfy.

use std::fmt::Display;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("'{0}' not found")]
    NotFound(String),

    #[error("'{0}' already exists")]
    DuplicateName(String),

    #[error("no image selected")]
    NoSelection,

    #[error("invalid port {0}: must be in 10001..=65535")]
    InvalidPort(u32),

    #[error("incomplete config: {0}")]
    IncompleteConfig(String),

    #[error("format error: {0}")]
    FormatError(String),

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error("port {0} already in use")]
    PortInUse(u16),

    #[error("no free port accepted by the runtime after {attempts} attempts")]
    PortExhausted { attempts: u32 },

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("incomplete command after '{0}'")]
    IncompleteCommand(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FleetError>;

/// Status of one container as reported by the runtime collaborator.
///
/// `Unallocated` stands in when the collaborator cannot resolve the
/// container reference at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
    Unallocated,
}

impl ContainerStatus {
    /// Containers in these states hold resources and must be stopped
    /// before removal.
    pub fn is_stoppable(self) -> bool {
        matches!(self, ContainerStatus::Running | ContainerStatus::Created)
    }
}

impl Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Restarting => "restarting",
            ContainerStatus::Exited => "exited",
            ContainerStatus::Dead => "dead",
            ContainerStatus::Unallocated => "unallocated",
        };
        write!(f, "{s}")
    }
}

/// One entry of the runtime's local image catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeImage {
    /// Human-facing reference, e.g. `ubuntu:22.04`.
    pub reference: String,
    /// Runtime-assigned image id.
    pub id: String,
}

/// Host-to-container TCP port mapping for one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Service port inside the container.
    pub inner: u16,
    /// Host-facing port the service is published on.
    pub outer: u16,
}

/// Abstract capability set of the external container runtime.
///
/// The core depends only on this contract; `fleet-runtime` provides the
/// Docker-backed implementation and an in-memory double for tests. All
/// calls are blocking from the caller's point of view and may take
/// arbitrarily long (image builds in particular).
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List the runtime's local image catalog.
    async fn list_images(&self) -> Result<Vec<RuntimeImage>>;

    /// Build an image from `context_dir` using the named dockerfile within
    /// it, tagging the result. Returns the runtime image id.
    async fn build_image(&self, context_dir: &Path, dockerfile: &str, tag: &str) -> Result<String>;

    /// Create and start a container from `image` publishing `mapping`.
    /// Returns the runtime container reference. A host-port collision is
    /// reported as [`FleetError::PortInUse`] so callers can retry with a
    /// fresh port.
    async fn run_container(&self, name: &str, image: &str, mapping: PortMapping)
        -> Result<String>;

    async fn start_container(&self, container: &str) -> Result<()>;

    async fn stop_container(&self, container: &str) -> Result<()>;

    async fn remove_container(&self, container: &str) -> Result<()>;

    async fn remove_image(&self, image: &str) -> Result<()>;

    /// Current status of a container, or [`ContainerStatus::Unallocated`]
    /// if the reference cannot be resolved.
    async fn status(&self, container: &str) -> Result<ContainerStatus>;
}
