//! In-memory [`ContainerRuntime`] double.
//!
//! Keeps the catalog and container table in plain maps and models host-port
//! collisions through an explicit occupied-port set, so the core's retry
//! path can be exercised without a daemon.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use fleet_common::{ContainerRuntime, ContainerStatus, FleetError, PortMapping, Result, RuntimeImage};

#[derive(Debug, Clone)]
pub struct MemContainer {
    pub image: String,
    pub mapping: PortMapping,
    pub status: ContainerStatus,
}

#[derive(Default)]
pub struct MemoryRuntime {
    images: Mutex<BTreeMap<String, String>>,
    containers: Mutex<BTreeMap<String, MemContainer>>,
    occupied: Mutex<BTreeSet<u16>>,
    next: AtomicU64,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}-{n}")
    }

    fn lock<'a, T>(m: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        m.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Register an image reference in the catalog, as if it had been pulled.
    pub fn seed_image(&self, reference: &str) -> String {
        let id = self.next_id("sha256:mem");
        Self::lock(&self.images).insert(reference.to_string(), id.clone());
        id
    }

    /// Mark a host port as taken so the next `run_container` on it fails
    /// with `PortInUse`.
    pub fn occupy_port(&self, port: u16) {
        Self::lock(&self.occupied).insert(port);
    }

    pub fn release_port(&self, port: u16) {
        Self::lock(&self.occupied).remove(&port);
    }

    /// Force a container into a given status (e.g. `Exited`).
    pub fn set_status(&self, container: &str, status: ContainerStatus) {
        if let Some(c) = Self::lock(&self.containers).get_mut(container) {
            c.status = status;
        }
    }

    /// Drop a container record entirely, as if it had been removed behind
    /// our back.
    pub fn forget_container(&self, container: &str) {
        Self::lock(&self.containers).remove(container);
    }

    pub fn container(&self, container: &str) -> Option<MemContainer> {
        Self::lock(&self.containers).get(container).cloned()
    }

    pub fn container_count(&self) -> usize {
        Self::lock(&self.containers).len()
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn list_images(&self) -> Result<Vec<RuntimeImage>> {
        Ok(Self::lock(&self.images)
            .iter()
            .map(|(reference, id)| RuntimeImage {
                reference: reference.clone(),
                id: id.clone(),
            })
            .collect())
    }

    async fn build_image(&self, _context_dir: &Path, _dockerfile: &str, tag: &str) -> Result<String> {
        let id = self.next_id("sha256:mem");
        Self::lock(&self.images).insert(tag.to_string(), id.clone());
        Ok(id)
    }

    async fn run_container(
        &self,
        _name: &str,
        image: &str,
        mapping: PortMapping,
    ) -> Result<String> {
        {
            let images = Self::lock(&self.images);
            if !images.contains_key(image) && !images.values().any(|id| id == image) {
                return Err(FleetError::Runtime(format!("no such image: {image}")));
            }
        }
        {
            let mut occupied = Self::lock(&self.occupied);
            if occupied.contains(&mapping.outer) {
                return Err(FleetError::PortInUse(mapping.outer));
            }
            occupied.insert(mapping.outer);
        }
        let id = self.next_id("mem-ctr");
        Self::lock(&self.containers).insert(
            id.clone(),
            MemContainer {
                image: image.to_string(),
                mapping,
                status: ContainerStatus::Running,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, container: &str) -> Result<()> {
        let mut containers = Self::lock(&self.containers);
        let record = containers
            .get_mut(container)
            .ok_or_else(|| FleetError::NotFound(container.to_string()))?;
        record.status = ContainerStatus::Running;
        Self::lock(&self.occupied).insert(record.mapping.outer);
        Ok(())
    }

    async fn stop_container(&self, container: &str) -> Result<()> {
        let mut containers = Self::lock(&self.containers);
        let record = containers
            .get_mut(container)
            .ok_or_else(|| FleetError::NotFound(container.to_string()))?;
        record.status = ContainerStatus::Exited;
        Self::lock(&self.occupied).remove(&record.mapping.outer);
        Ok(())
    }

    async fn remove_container(&self, container: &str) -> Result<()> {
        let removed = Self::lock(&self.containers)
            .remove(container)
            .ok_or_else(|| FleetError::NotFound(container.to_string()))?;
        Self::lock(&self.occupied).remove(&removed.mapping.outer);
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        let mut images = Self::lock(&self.images);
        let before = images.len();
        images.retain(|reference, id| reference != image && id != image);
        if images.len() == before {
            return Err(FleetError::NotFound(image.to_string()));
        }
        Ok(())
    }

    async fn status(&self, container: &str) -> Result<ContainerStatus> {
        Ok(Self::lock(&self.containers)
            .get(container)
            .map(|c| c.status)
            .unwrap_or(ContainerStatus::Unallocated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn port_collision_surfaces_as_port_in_use() {
        let runtime = MemoryRuntime::new();
        runtime.seed_image("challenge");
        runtime.occupy_port(12000);

        let mapping = PortMapping {
            inner: 10001,
            outer: 12000,
        };
        let err = runtime
            .run_container("c1", "challenge", mapping)
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::PortInUse(12000)));

        runtime.release_port(12000);
        let id = runtime
            .run_container("c1", "challenge", mapping)
            .await
            .unwrap();
        assert_eq!(
            runtime.status(&id).await.unwrap(),
            ContainerStatus::Running
        );
    }

    #[tokio::test]
    async fn unresolvable_container_reports_unallocated() {
        let runtime = MemoryRuntime::new();
        assert_eq!(
            runtime.status("missing").await.unwrap(),
            ContainerStatus::Unallocated
        );
    }
}
