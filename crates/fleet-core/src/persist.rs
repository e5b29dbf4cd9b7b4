//! Fleet snapshot persistence.
//!
//! The whole registry is serialized to YAML after every successful
//! mutating operation, bounding data loss to one command. On load,
//! parent/built references that the runtime no longer resolves are dropped
//! with a warning, containers whose runtime reference is gone are dropped
//! likewise, and the survivors are renumbered densely.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use fleet_common::{ContainerRuntime, ContainerStatus, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::deploy::DeployDescriptor;
use crate::image::{ChallengeImage, ContainerRecord};
use crate::registry::ImageRegistry;

#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FleetSnapshot {
    pub images: Vec<ImageSnapshot>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageSnapshot {
    pub name: String,
    pub parent: Option<String>,
    pub built: Option<String>,
    pub apt: BTreeSet<String>,
    pub basedir: String,
    pub files: BTreeSet<String>,
    pub entry: String,
    pub port: u16,
    pub containers: Vec<ContainerSnapshot>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerSnapshot {
    pub flag: String,
    pub outer_port: u16,
    pub runtime_ref: String,
}

pub fn snapshot(registry: &ImageRegistry) -> FleetSnapshot {
    FleetSnapshot {
        images: registry
            .iter()
            .map(|image| ImageSnapshot {
                name: image.name().to_string(),
                parent: image.parent.clone(),
                built: image.built.clone(),
                apt: image.apt.clone(),
                basedir: image.deploy.basedir().to_string(),
                files: image.deploy.files().clone(),
                entry: image.deploy.entry().to_string(),
                port: image.port(),
                containers: image
                    .containers
                    .values()
                    .map(|c| ContainerSnapshot {
                        flag: c.flag.clone(),
                        outer_port: c.outer_port,
                        runtime_ref: c.runtime_ref.clone(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

pub fn save(registry: &ImageRegistry, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let yaml = serde_yaml::to_string(&snapshot(registry))
        .map_err(|e| fleet_common::FleetError::Runtime(format!("snapshot encoding failed: {e}")))?;
    fs::write(path, yaml)?;
    Ok(())
}

/// Restore a registry from `path`. A missing file yields an empty registry.
pub async fn load(path: &Path, runtime: &dyn ContainerRuntime) -> Result<ImageRegistry> {
    if !path.exists() {
        return Ok(ImageRegistry::new());
    }
    let yaml = fs::read_to_string(path)?;
    let snapshot: FleetSnapshot = serde_yaml::from_str(&yaml)
        .map_err(|e| fleet_common::FleetError::Runtime(format!("snapshot decoding failed: {e}")))?;
    restore(snapshot, runtime).await
}

/// Rebuild the in-memory model, pruning entities the runtime no longer
/// resolves instead of failing the whole load.
pub async fn restore(
    snapshot: FleetSnapshot,
    runtime: &dyn ContainerRuntime,
) -> Result<ImageRegistry> {
    let catalog = runtime.list_images().await?;
    let known_refs: BTreeSet<&str> = catalog.iter().map(|i| i.reference.as_str()).collect();
    let known_ids: BTreeSet<&str> = catalog.iter().map(|i| i.id.as_str()).collect();

    let mut registry = ImageRegistry::new();
    for entry in snapshot.images {
        let mut image = match ChallengeImage::new(&entry.name) {
            Ok(image) => image,
            Err(e) => {
                error!(name = %entry.name, error = %e, "dropping unloadable image");
                continue;
            }
        };

        image.parent = match entry.parent {
            Some(parent) if known_refs.contains(parent.as_str()) => Some(parent),
            Some(parent) => {
                warn!(image = %entry.name, parent, "parent image no longer present, dropped");
                None
            }
            None => None,
        };
        image.built = match entry.built {
            Some(built) if known_ids.contains(built.as_str()) => Some(built),
            Some(built) => {
                warn!(image = %entry.name, built, "built artifact no longer present, dropped");
                None
            }
            None => None,
        };
        image.apt = entry.apt;
        image.deploy = DeployDescriptor::restore(entry.basedir, entry.files, entry.entry);
        image.restore_port(entry.port);

        // Containers whose runtime reference is gone are discarded; the
        // rest are renumbered densely in snapshot order.
        let mut id = 0u32;
        for container in entry.containers {
            let status = runtime.status(&container.runtime_ref).await?;
            if status == ContainerStatus::Unallocated {
                warn!(
                    image = %entry.name,
                    container = %container.runtime_ref,
                    "container no longer present, dropped"
                );
                continue;
            }
            id += 1;
            image.containers.insert(
                id,
                ContainerRecord {
                    id,
                    flag: container.flag,
                    outer_port: container.outer_port,
                    runtime_ref: container.runtime_ref,
                },
            );
        }

        if let Err(e) = registry.insert(image) {
            error!(name = %entry.name, error = %e, "dropping duplicate snapshot entry");
        }
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_common::PortMapping;
    use fleet_runtime::MemoryRuntime;

    async fn populated_runtime() -> (MemoryRuntime, String, String) {
        let runtime = MemoryRuntime::new();
        runtime.seed_image("ubuntu:22.04");
        let built = runtime
            .build_image(Path::new("."), "Dockerfile", "pwn")
            .await
            .unwrap();
        let ctr = runtime
            .run_container(
                "c1",
                "pwn",
                PortMapping {
                    inner: 13337,
                    outer: 24000,
                },
            )
            .await
            .unwrap();
        (runtime, built, ctr)
    }

    fn sample_snapshot(built: &str, ctr: &str) -> FleetSnapshot {
        FleetSnapshot {
            images: vec![ImageSnapshot {
                name: "pwn".to_string(),
                parent: Some("ubuntu:22.04".to_string()),
                built: Some(built.to_string()),
                apt: ["xinetd", "zip"].iter().map(|s| s.to_string()).collect(),
                basedir: "/tmp/chal".to_string(),
                files: ["run.sh"].iter().map(|s| s.to_string()).collect(),
                entry: "run.sh".to_string(),
                port: 13337,
                containers: vec![
                    ContainerSnapshot {
                        flag: "flag{a}".to_string(),
                        outer_port: 24000,
                        runtime_ref: ctr.to_string(),
                    },
                    ContainerSnapshot {
                        flag: "flag{gone}".to_string(),
                        outer_port: 24001,
                        runtime_ref: "mem-ctr-vanished".to_string(),
                    },
                ],
            }],
        }
    }

    #[tokio::test]
    async fn round_trip_preserves_configuration() {
        let (runtime, built, ctr) = populated_runtime().await;
        let registry = restore(sample_snapshot(&built, &ctr), &runtime)
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.yaml");
        save(&registry, &path).unwrap();
        let reloaded = load(&path, &runtime).await.unwrap();

        let a = reloaded.get("pwn").unwrap();
        let b = registry.get("pwn").unwrap();
        assert_eq!(a.parent, b.parent);
        assert_eq!(a.built, b.built);
        assert_eq!(a.apt, b.apt);
        assert_eq!(a.deploy, b.deploy);
        assert_eq!(a.port(), b.port());
        assert_eq!(a.containers, b.containers);
    }

    #[tokio::test]
    async fn unresolvable_references_are_pruned() {
        let (runtime, built, ctr) = populated_runtime().await;
        let mut snap = sample_snapshot(&built, &ctr);
        snap.images[0].parent = Some("debian:now-gone".to_string());

        let registry = restore(snap, &runtime).await.unwrap();
        let image = registry.get("pwn").unwrap();
        assert_eq!(image.parent, None);
        assert_eq!(image.built.as_deref(), Some(built.as_str()));

        // Of the two persisted containers only the resolvable one survives,
        // renumbered to id 1.
        assert_eq!(image.container_count(), 1);
        let record = &image.containers[&1];
        assert_eq!(record.id, 1);
        assert_eq!(record.flag, "flag{a}");
        assert_eq!(record.outer_port, 24000);
    }

    #[tokio::test]
    async fn missing_snapshot_file_yields_empty_registry() {
        let runtime = MemoryRuntime::new();
        let dir = tempfile::tempdir().unwrap();
        let registry = load(&dir.path().join("absent.yaml"), &runtime)
            .await
            .unwrap();
        assert!(registry.is_empty());
    }
}
