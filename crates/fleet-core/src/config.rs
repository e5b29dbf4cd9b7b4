//! Process-wide settings for the fleet manager.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Root of the on-disk state: build contexts, bundle cache and the
    /// persisted fleet snapshot all live under here.
    pub state_dir: PathBuf,
    /// Prefix of generated flags, rendered as `<prefix>{<uuid>}`.
    pub flag_prefix: String,
    /// How many fresh ports to offer the runtime before giving up with
    /// `PortExhausted`.
    pub port_retries: u32,
    /// Suppress interactive confirmation; busy images are skipped instead
    /// of prompting. Set when replaying a command script.
    pub script_mode: bool,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("runtime"),
            flag_prefix: "flag".to_string(),
            port_retries: 16,
            script_mode: false,
        }
    }
}

impl FleetConfig {
    pub fn with_state_dir(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            ..Default::default()
        }
    }

    /// Location of the persisted fleet snapshot.
    pub fn snapshot_path(&self) -> PathBuf {
        self.state_dir.join("fleet.yaml")
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }
}
