use async_trait::async_trait;
use thiserror::Error;

use crate::types::ContainerInfo;

pub mod docker;
pub use docker::DockerRuntime;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("cannot connect to container runtime: {0}")]
    Connect(String),
    #[error("no such container: {0}")]
    NotFound(String),
    #[error("inspect of container {container} failed: {reason}")]
    Inspect { container: String, reason: String },
}

/// Read-only view of the container runtime, used to validate preconditions
/// before touching the datastore or the kernel.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Resolve a container name or id to its identity, run state and PID.
    /// Works for stopped containers as long as the runtime still knows
    /// them; the PID is then absent.
    async fn container_info(&self, container: &str) -> Result<ContainerInfo, RuntimeError>;
}
