//! Runtime configuration
//!
//! Paths default to the production locations. Each can be redirected through
//! the environment, which is how tests and staging hosts point the layer at a
//! fake sysfs tree or an alternate control device.

use obmm_abi::{ubc, OBMM_DEV_PATH};
use std::path::PathBuf;

/// Overrides [`ObmmConfig::sysfs_root`].
pub const ENV_SYSFS_ROOT: &str = "OBMM_SYSFS_ROOT";
/// Overrides [`ObmmConfig::device_path`].
pub const ENV_DEV_PATH: &str = "OBMM_DEV_PATH";
/// Overrides [`ObmmConfig::desc_dir`].
pub const ENV_DESC_DIR: &str = "OBMM_DESC_DIR";

/// Default directory for exchanged memory descriptors.
pub const DEFAULT_DESC_DIR: &str = "/tmp/memlink";

/// Where the layer finds its collaborators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObmmConfig {
    /// Root holding `ub_bus_controller*` directories
    pub sysfs_root: PathBuf,

    /// Control device
    pub device_path: PathBuf,

    /// Directory for descriptor JSON files
    pub desc_dir: PathBuf,
}

impl Default for ObmmConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from(ubc::SYSFS_DEVICES_ROOT),
            device_path: PathBuf::from(OBMM_DEV_PATH),
            desc_dir: PathBuf::from(DEFAULT_DESC_DIR),
        }
    }
}

impl ObmmConfig {
    /// Defaults, overridden by `OBMM_SYSFS_ROOT`, `OBMM_DEV_PATH` and
    /// `OBMM_DESC_DIR` when set.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(root) = lookup(ENV_SYSFS_ROOT) {
            config.sysfs_root = PathBuf::from(root);
        }
        if let Some(dev) = lookup(ENV_DEV_PATH) {
            config.device_path = PathBuf::from(dev);
        }
        if let Some(dir) = lookup(ENV_DESC_DIR) {
            config.desc_dir = PathBuf::from(dir);
        }
        tracing::debug!(
            "OBMM config: sysfs_root={}, device={}, desc_dir={}",
            config.sysfs_root.display(),
            config.device_path.display(),
            config.desc_dir.display()
        );
        config
    }

    /// Replace the sysfs root
    #[must_use]
    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }

    /// Replace the control device path
    #[must_use]
    pub fn with_device_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.device_path = path.into();
        self
    }

    /// Replace the descriptor directory
    #[must_use]
    pub fn with_desc_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.desc_dir = dir.into();
        self
    }
}
