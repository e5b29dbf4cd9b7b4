//! Container lifecycle: building the challenge image and creating,
//! starting, stopping and deleting the containers spawned from it.
//!
//! Per-id failures inside a bulk operation are reported and skipped;
//! malformed range sets abort before any deletion. Compaction runs once
//! per delete call, after all deletions in the call are applied.

use fleet_common::{ContainerRuntime, FleetError, Result};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::FleetConfig;
use crate::ids::{self, IdRange};
use crate::image::{ChallengeImage, ContainerRecord};
use crate::{bundle, ports};

/// Freshly generated per-container secret.
pub fn generate_flag(prefix: &str) -> String {
    format!("{prefix}{{{}}}", Uuid::new_v4())
}

fn missing_fields(image: &ChallengeImage) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if image.parent.is_none() {
        missing.push("parent image");
    }
    if image.deploy.files().is_empty() {
        missing.push("deploy files");
    }
    if image.deploy.entry().is_empty() {
        missing.push("entry");
    }
    if image.port() == 0 {
        missing.push("port");
    }
    missing
}

/// Build the runtime image for a fully configured challenge.
///
/// Fails with `IncompleteConfig` before any side effect when a required
/// field is missing; a collaborator failure is surfaced as `BuildFailed`
/// and leaves the image unallocated.
pub async fn build(
    image: &mut ChallengeImage,
    runtime: &dyn ContainerRuntime,
    config: &FleetConfig,
) -> Result<()> {
    let missing = missing_fields(image);
    if !missing.is_empty() {
        return Err(FleetError::IncompleteConfig(missing.join(", ")));
    }
    if !image.deploy.entry_covered() {
        return Err(FleetError::IncompleteConfig(format!(
            "entry '{}' is not covered by the deploy files",
            image.deploy.entry()
        )));
    }

    let bundle_path = bundle::package_bundle(&image.deploy, config.state_dir())?;
    let context = bundle::render_context(image, config.state_dir(), &bundle_path)?;

    info!(image = image.name(), "building image");
    let image_id = runtime
        .build_image(&context, "Dockerfile", image.name())
        .await?;
    info!(image = image.name(), id = %image_id, "image built");
    image.built = Some(image_id);
    Ok(())
}

/// Create `count` new containers: each gets the next dense id, an outer
/// port honoring `port_preference` when possible, and its own flag (a
/// caller-supplied flag is shared; generated flags are never reused across
/// containers in one call). A runtime port collision triggers a retry with
/// a fresh free port, bounded by `config.port_retries`.
pub async fn create_containers(
    image: &mut ChallengeImage,
    runtime: &dyn ContainerRuntime,
    config: &FleetConfig,
    count: u32,
    port_preference: Option<u16>,
    flag_preference: Option<&str>,
) -> Result<()> {
    let image_ref = image
        .built
        .clone()
        .ok_or_else(|| FleetError::IncompleteConfig("image is not built yet".to_string()))?;

    for _ in 0..count {
        let id = ids::next_id(&image.containers);
        let mut outer = ports::allocate(port_preference)?;
        let flag = match flag_preference {
            Some(flag) => flag.to_string(),
            None => generate_flag(&config.flag_prefix),
        };
        let name = format!("fleet-{}-{}", image.name(), Uuid::new_v4().simple());

        let mut attempts = 0u32;
        let runtime_ref = loop {
            let mapping = fleet_common::PortMapping {
                inner: image.port(),
                outer,
            };
            match runtime.run_container(&name, &image_ref, mapping).await {
                Ok(r) => break r,
                Err(FleetError::PortInUse(p)) => {
                    attempts += 1;
                    if attempts >= config.port_retries {
                        return Err(FleetError::PortExhausted { attempts });
                    }
                    // Only the port changes on retry.
                    outer = ports::reallocate(p)?;
                }
                Err(e) => return Err(e),
            }
        };

        info!(
            image = image.name(),
            id,
            port = outer,
            container = %runtime_ref,
            "container created"
        );
        image.containers.insert(
            id,
            ContainerRecord {
                id,
                flag,
                outer_port: outer,
                runtime_ref,
            },
        );
    }
    Ok(())
}

/// Start existing containers by id range. Out-of-range ids are reported
/// and skipped; containers already running are left alone.
pub async fn start_existing(
    image: &ChallengeImage,
    runtime: &dyn ContainerRuntime,
    ranges: &[IdRange],
) -> Result<()> {
    ids::validate_ranges(ranges)?;
    let count = image.container_count() as u32;
    for id in ids::expand_ranges(ranges) {
        if id == 0 || id > count {
            error!(
                image = image.name(),
                id, count, "container id out of bounds"
            );
            continue;
        }
        let Some(record) = image.containers.get(&id) else {
            error!(image = image.name(), id, "container not found");
            continue;
        };
        let status = runtime.status(&record.runtime_ref).await?;
        if status == fleet_common::ContainerStatus::Running {
            continue;
        }
        runtime.start_container(&record.runtime_ref).await?;
        info!(image = image.name(), id, "container started");
    }
    Ok(())
}

/// Stop containers by id range; only running/created containers are
/// stopped. Missing ids are reported and skipped.
pub async fn stop_containers(
    image: &ChallengeImage,
    runtime: &dyn ContainerRuntime,
    ranges: &[IdRange],
) -> Result<()> {
    ids::validate_ranges(ranges)?;
    for id in ids::expand_ranges(ranges) {
        let Some(record) = image.containers.get(&id) else {
            error!(image = image.name(), id, "container not found");
            continue;
        };
        let status = runtime.status(&record.runtime_ref).await?;
        if status.is_stoppable() {
            runtime.stop_container(&record.runtime_ref).await?;
            info!(image = image.name(), id, "container stopped");
        }
    }
    Ok(())
}

/// Delete containers by id range: stop if needed, remove from the runtime,
/// drop the record, then compact ids once for the whole call.
pub async fn delete_containers(
    image: &mut ChallengeImage,
    runtime: &dyn ContainerRuntime,
    ranges: &[IdRange],
) -> Result<()> {
    ids::validate_ranges(ranges)?;
    for id in ids::expand_ranges(ranges) {
        let Some(record) = image.containers.get(&id) else {
            error!(image = image.name(), id, "container not found");
            continue;
        };
        let status = runtime.status(&record.runtime_ref).await?;
        if status.is_stoppable() {
            runtime.stop_container(&record.runtime_ref).await?;
        }
        if let Err(e) = runtime.remove_container(&record.runtime_ref).await {
            warn!(image = image.name(), id, error = %e, "runtime removal failed, record kept");
            continue;
        }
        image.containers.remove(&id);
        info!(image = image.name(), id, "container deleted");
    }
    ids::compact(&mut image.containers);
    Ok(())
}

/// Stop and remove every container unconditionally, then clear the map.
pub async fn delete_all(image: &mut ChallengeImage, runtime: &dyn ContainerRuntime) -> Result<()> {
    for record in image.containers.values() {
        let status = runtime.status(&record.runtime_ref).await?;
        if status.is_stoppable() {
            runtime.stop_container(&record.runtime_ref).await?;
        }
        if let Err(e) = runtime.remove_container(&record.runtime_ref).await {
            warn!(image = image.name(), id = record.id, error = %e, "runtime removal failed");
        }
    }
    image.containers.clear();
    info!(image = image.name(), "all containers deleted");
    Ok(())
}
