//! Fleet state manager: the entity model for challenge images and their
//! containers, the allocators that keep container ids dense and host ports
//! free, the deploy-bundle fingerprint cache, the command dispatch tree and
//! the [`FleetManager`] façade the CLI drives.

pub mod bundle;
pub mod config;
pub mod deploy;
pub mod dispatch;
pub mod ids;
pub mod image;
pub mod lifecycle;
pub mod manager;
pub mod names;
pub mod persist;
pub mod ports;
pub mod registry;

pub use config::FleetConfig;
pub use deploy::DeployDescriptor;
pub use dispatch::{CommandTree, Op};
pub use image::{ChallengeImage, ContainerRecord, ImageStatus};
pub use manager::{AssumeYes, Command, FleetManager, Prompter, RunTarget, Target};
pub use registry::{ImageRegistry, RemovePolicy};

pub use fleet_common as common;
