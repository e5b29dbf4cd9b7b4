//! Container-runtime collaborators for the fleet workspace.
//!
//! [`DockerRuntime`] drives a local Docker daemon through bollard;
//! [`MemoryRuntime`] is a deterministic in-memory double that the core's
//! tests run against.

pub mod docker;
pub mod memory;

pub use docker::DockerRuntime;
pub use memory::MemoryRuntime;

// Re-export so downstream crates name the same bollard version.
pub use bollard;
