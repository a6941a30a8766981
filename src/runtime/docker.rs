use async_trait::async_trait;
use bollard::Docker;
use log::debug;

use super::{ContainerRuntime, RuntimeError};
use crate::types::ContainerInfo;

/// Container info accessor backed by the local Docker daemon.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon using default settings.
    /// This handles the unix socket on Linux.
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Connect(e.to_string()))?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn container_info(&self, container: &str) -> Result<ContainerInfo, RuntimeError> {
        let detail = self
            .docker
            .inspect_container(container, None)
            .await
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                } => RuntimeError::NotFound(container.to_string()),
                other => RuntimeError::Inspect {
                    container: container.to_string(),
                    reason: other.to_string(),
                },
            })?;

        let id = detail.id.ok_or_else(|| RuntimeError::Inspect {
            container: container.to_string(),
            reason: "inspect response carried no container id".into(),
        })?;

        let state = detail.state.unwrap_or_default();
        let running = state.running.unwrap_or(false);
        // Docker reports Pid 0 for containers that are not running.
        let pid = match state.pid {
            Some(p) if p > 0 => Some(p as u32),
            _ => None,
        };

        debug!("container {container}: id={id} running={running} pid={pid:?}");
        Ok(ContainerInfo { id, running, pid })
    }
}
