//! Image registry: owns the set of named challenge image definitions and
//! enforces name uniqueness. Listing order is creation order.

use fleet_common::{FleetError, Result};
use tracing::info;

use crate::image::ChallengeImage;

/// What to do when removing an image that still has containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovePolicy {
    /// Prompt and proceed only on an affirmative answer.
    Ask,
    /// Delete containers first, then the image, unconditionally.
    Force,
    /// Leave the image and its containers untouched.
    SkipIfBusy,
}

#[derive(Debug, Default)]
pub struct ImageRegistry {
    images: Vec<ChallengeImage>,
}

impl ImageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.images.iter().any(|i| i.name() == name)
    }

    /// Insert a new unbuilt image. Name comparison is exact string
    /// equality, so `pwn_0` created by hand and `pwn_0` produced by
    /// `pwn*2` expansion collide.
    pub fn create(&mut self, name: &str) -> Result<&mut ChallengeImage> {
        if self.contains(name) {
            return Err(FleetError::DuplicateName(name.to_string()));
        }
        let image = ChallengeImage::new(name)?;
        info!(name, "image created");
        self.images.push(image);
        Ok(self.images.last_mut().expect("just pushed"))
    }

    pub(crate) fn insert(&mut self, image: ChallengeImage) -> Result<()> {
        if self.contains(image.name()) {
            return Err(FleetError::DuplicateName(image.name().to_string()));
        }
        self.images.push(image);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ChallengeImage> {
        self.images.iter().find(|i| i.name() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ChallengeImage> {
        self.images.iter_mut().find(|i| i.name() == name)
    }

    /// Detach an image from the registry, returning the entity so the
    /// caller can tear down its runtime artifacts.
    pub fn remove(&mut self, name: &str) -> Result<ChallengeImage> {
        let idx = self
            .images
            .iter()
            .position(|i| i.name() == name)
            .ok_or_else(|| FleetError::NotFound(name.to_string()))?;
        Ok(self.images.remove(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChallengeImage> {
        self.images.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ChallengeImage> {
        self.images.iter_mut()
    }

    pub fn names(&self) -> Vec<&str> {
        self.images.iter().map(|i| i.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_rejected() {
        let mut registry = ImageRegistry::new();
        registry.create("pwn_0").unwrap();
        assert!(matches!(
            registry.create("pwn_0"),
            Err(FleetError::DuplicateName(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn listing_order_is_creation_order() {
        let mut registry = ImageRegistry::new();
        registry.create("zzz").unwrap();
        registry.create("aaa").unwrap();
        assert_eq!(registry.names(), vec!["zzz", "aaa"]);
    }

    #[test]
    fn remove_returns_the_entity() {
        let mut registry = ImageRegistry::new();
        registry.create("foo").unwrap();
        let image = registry.remove("foo").unwrap();
        assert_eq!(image.name(), "foo");
        assert!(registry.is_empty());
        assert!(matches!(
            registry.remove("foo"),
            Err(FleetError::NotFound(_))
        ));
    }
}
