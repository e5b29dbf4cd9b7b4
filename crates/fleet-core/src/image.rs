//! The challenge image entity and its container records.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;

use fleet_common::{FleetError, Result};

use crate::deploy::DeployDescriptor;
use crate::names;

/// Packages baked into every challenge image unless removed.
pub const DEFAULT_APT_PACKAGES: &[&str] = &["xinetd", "lib32z1", "zip"];

/// Exclusive lower / inclusive upper bound of a valid service port.
pub const PORT_MIN_EXCLUSIVE: u32 = 10000;
pub const PORT_MAX: u32 = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    /// No built artifact exists yet.
    Unallocated,
    /// A runtime image has been built from the current configuration.
    Built,
}

impl Display for ImageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageStatus::Unallocated => write!(f, "unallocated"),
            ImageStatus::Built => write!(f, "built"),
        }
    }
}

/// One container spawned from a built challenge image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    /// Positive id, dense with its siblings (`1..=N`).
    pub id: u32,
    /// Secret associated 1:1 with this container.
    pub flag: String,
    /// Host-facing port the service is published on.
    pub outer_port: u16,
    /// Reference to the externally managed container.
    pub runtime_ref: String,
}

/// A named, user-configured definition of a deployable challenge service.
#[derive(Debug, Clone)]
pub struct ChallengeImage {
    name: String,
    /// Base runtime image this challenge builds on.
    pub parent: Option<String>,
    pub apt: BTreeSet<String>,
    pub deploy: DeployDescriptor,
    port: u16,
    /// Runtime id of the built artifact; `None` means [`ImageStatus::Unallocated`].
    pub built: Option<String>,
    pub containers: BTreeMap<u32, ContainerRecord>,
}

impl ChallengeImage {
    pub fn new(name: &str) -> Result<Self> {
        names::validate_name(name)?;
        Ok(Self {
            name: name.to_string(),
            parent: None,
            apt: DEFAULT_APT_PACKAGES.iter().map(|p| p.to_string()).collect(),
            deploy: DeployDescriptor::default(),
            port: 0,
            built: None,
            containers: BTreeMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Internal service port; 0 means unset.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn set_port(&mut self, port: u32) -> Result<()> {
        if port <= PORT_MIN_EXCLUSIVE || port > PORT_MAX {
            return Err(FleetError::InvalidPort(port));
        }
        self.port = port as u16;
        Ok(())
    }

    pub(crate) fn restore_port(&mut self, port: u16) {
        self.port = port;
    }

    pub fn status(&self) -> ImageStatus {
        if self.built.is_some() {
            ImageStatus::Built
        } else {
            ImageStatus::Unallocated
        }
    }

    pub fn container_count(&self) -> usize {
        self.containers.len()
    }
}
