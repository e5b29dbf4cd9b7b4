//! Docker-backed [`ContainerRuntime`] using bollard.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, RemoveContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{BuildImageOptions, ListImagesOptions, RemoveImageOptions};
use bollard::models::{ContainerStateStatusEnum, HostConfig, PortBinding};
use bollard::Docker;
use fleet_common::{ContainerRuntime, ContainerStatus, FleetError, PortMapping, Result, RuntimeImage};
use futures::StreamExt;
use tracing::{debug, info, warn};

/// Container runtime backed by the local Docker daemon.
pub struct DockerRuntime {
    docker: Docker,
}

impl std::fmt::Debug for DockerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerRuntime").finish_non_exhaustive()
    }
}

impl DockerRuntime {
    /// Connect with platform defaults and verify the daemon answers a ping.
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| FleetError::Runtime(format!("failed to connect to Docker: {e}")))?;
        docker
            .ping()
            .await
            .map_err(|e| FleetError::Runtime(format!("Docker ping failed: {e}")))?;
        info!("connected to Docker daemon");
        Ok(Self { docker })
    }

    /// Wrap a pre-configured bollard client.
    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    async fn force_remove(&self, container: &str) {
        let opts = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(container, Some(opts)).await {
            warn!(container, error = %e, "failed to clean up container");
        }
    }
}

/// The daemon reports a host-port collision as a 500 with one of these
/// phrases in the message, depending on the network driver.
fn is_port_conflict(err: &BollardError) -> bool {
    match err {
        BollardError::DockerResponseServerError { message, .. } => {
            message.contains("port is already allocated")
                || message.contains("address already in use")
        }
        _ => false,
    }
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn map_status(status: Option<ContainerStateStatusEnum>) -> ContainerStatus {
    match status {
        Some(ContainerStateStatusEnum::CREATED) => ContainerStatus::Created,
        Some(ContainerStateStatusEnum::RUNNING) => ContainerStatus::Running,
        Some(ContainerStateStatusEnum::PAUSED) => ContainerStatus::Paused,
        Some(ContainerStateStatusEnum::RESTARTING) => ContainerStatus::Restarting,
        Some(ContainerStateStatusEnum::EXITED) => ContainerStatus::Exited,
        Some(ContainerStateStatusEnum::REMOVING) => ContainerStatus::Exited,
        Some(ContainerStateStatusEnum::DEAD) => ContainerStatus::Dead,
        _ => ContainerStatus::Unallocated,
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_images(&self) -> Result<Vec<RuntimeImage>> {
        let summaries = self
            .docker
            .list_images(Some(ListImagesOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await
            .map_err(|e| FleetError::Runtime(format!("failed to list images: {e}")))?;

        let mut images = Vec::new();
        for summary in summaries {
            for tag in &summary.repo_tags {
                if tag == "<none>:<none>" {
                    continue;
                }
                images.push(RuntimeImage {
                    reference: tag.clone(),
                    id: summary.id.clone(),
                });
            }
        }
        Ok(images)
    }

    async fn build_image(&self, context_dir: &Path, dockerfile: &str, tag: &str) -> Result<String> {
        // The daemon wants the build context as a tar stream.
        let mut builder = tar::Builder::new(Vec::new());
        builder.append_dir_all(".", context_dir)?;
        let context = builder.into_inner()?;

        let options = BuildImageOptions {
            dockerfile: dockerfile.to_string(),
            t: tag.to_string(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(context.into()));
        while let Some(item) = stream.next().await {
            let info = item.map_err(|e| FleetError::BuildFailed(e.to_string()))?;
            if let Some(message) = info.error {
                return Err(FleetError::BuildFailed(message));
            }
            if let Some(line) = info.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    debug!(target: "fleet::build", "{line}");
                }
            }
        }

        let inspect = self
            .docker
            .inspect_image(tag)
            .await
            .map_err(|e| FleetError::BuildFailed(format!("built image not found: {e}")))?;
        inspect
            .id
            .ok_or_else(|| FleetError::BuildFailed(format!("no image id reported for {tag}")))
    }

    async fn run_container(
        &self,
        name: &str,
        image: &str,
        mapping: PortMapping,
    ) -> Result<String> {
        let inner_key = format!("{}/tcp", mapping.inner);

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            inner_key.clone(),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(mapping.outer.to_string()),
            }]),
        );
        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(inner_key, HashMap::new());

        let config = ContainerConfig {
            image: Some(image.to_string()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.to_string(),
                    ..Default::default()
                }),
                config,
            )
            .await
            .map_err(|e| {
                if is_port_conflict(&e) {
                    FleetError::PortInUse(mapping.outer)
                } else {
                    FleetError::Runtime(format!("container creation failed: {e}"))
                }
            })?;

        match self.docker.start_container::<String>(&created.id, None).await {
            Ok(()) => {
                debug!(container = %created.id, outer = mapping.outer, "container started");
                Ok(created.id)
            }
            Err(e) if is_port_conflict(&e) => {
                // The port was grabbed between our probe and the start call;
                // drop the half-created container so the caller can retry.
                self.force_remove(&created.id).await;
                Err(FleetError::PortInUse(mapping.outer))
            }
            Err(e) => {
                self.force_remove(&created.id).await;
                Err(FleetError::Runtime(format!("container start failed: {e}")))
            }
        }
    }

    async fn start_container(&self, container: &str) -> Result<()> {
        self.docker
            .start_container::<String>(container, None)
            .await
            .map_err(|e| FleetError::Runtime(format!("container start failed: {e}")))
    }

    async fn stop_container(&self, container: &str) -> Result<()> {
        match self
            .docker
            .stop_container(container, Some(StopContainerOptions { t: 10 }))
            .await
        {
            Ok(()) => Ok(()),
            // 304: already stopped.
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(FleetError::Runtime(format!("container stop failed: {e}"))),
        }
    }

    async fn remove_container(&self, container: &str) -> Result<()> {
        self.docker
            .remove_container(
                container,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| FleetError::Runtime(format!("container removal failed: {e}")))
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        self.docker
            .remove_image(
                image,
                Some(RemoveImageOptions {
                    force: true,
                    ..Default::default()
                }),
                None,
            )
            .await
            .map_err(|e| FleetError::Runtime(format!("image removal failed: {e}")))?;
        Ok(())
    }

    async fn status(&self, container: &str) -> Result<ContainerStatus> {
        match self.docker.inspect_container(container, None).await {
            Ok(inspect) => Ok(map_status(inspect.state.and_then(|s| s.status))),
            Err(e) if is_not_found(&e) => Ok(ContainerStatus::Unallocated),
            Err(e) => Err(FleetError::Runtime(format!(
                "container inspect failed: {e}"
            ))),
        }
    }
}
