//! Runtime bus-controller discovery
//!
//! Controllers are found by index under the sysfs root, matching
//! `ub_bus_controller<N>/*/ubc`, and resolved by EID by reading each one's
//! `eid` attribute. Nothing is cached: every call rescans, so a controller
//! that appears or disappears between calls is picked up (or missed)
//! accordingly.
//!
//! The `eid` attribute holds only the low 32 bits of the controller EID.
//! It is placed in the low bytes of a zeroed 16-byte buffer before the
//! comparison, so only endpoints whose upper 96 bits are zero can resolve.

use crate::attr::read_attr;
use crate::eid::Eid;
use crate::error::{ObmmError, Result};
use glob::{glob_with, MatchOptions, Pattern};
use obmm_abi::ubc::{self, attr, MAX_CONTROLLERS, MAX_PATH};
use obmm_abi::EID_SIZE;
use std::path::{Path, PathBuf};

/// View of the UB bus-controller sysfs tree
#[derive(Debug, Clone)]
pub struct UbcTree {
    root: PathBuf,
}

/// A controller matched by EID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Controller {
    /// Controller index (0..8)
    pub index: u32,

    /// Attribute directory
    pub path: PathBuf,
}

/// Vendor-relevant attributes of the controller owning an EID.
///
/// Produced by one resolution and consumed by the vendor info builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusControllerNode {
    /// UMMU mapping index
    pub ummu_mapping: u32,

    /// NUMA node the controller is attached to
    pub numa_id: i32,
}

/// Everything readable about one controller (for listings)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerInfo {
    /// Controller index
    pub index: u32,

    /// Attribute directory
    pub path: PathBuf,

    /// EID as resolution sees it
    pub eid: Option<Eid>,

    /// UMMU mapping index
    pub ummu_mapping: Option<i32>,

    /// NUMA node
    pub numa_id: Option<i32>,

    /// Primary channel adapter
    pub primary_cna: Option<u32>,
}

impl UbcTree {
    /// Tree rooted at `root` (normally `/sys/devices`)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Sysfs root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Attribute directory of controller `index`.
    ///
    /// Expands `<root>/ub_bus_controller<index>/*/ubc` and takes the parent
    /// of the first match. Hidden entries do not match `*`, as in `glob(3)`.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchDevice` if nothing matches, `InvalidArgument` if the
    /// root is not valid UTF-8 or the resulting path is `MAX_PATH` bytes or
    /// longer.
    pub fn controller_path(&self, index: u32) -> Result<PathBuf> {
        let root = self.root.to_str().ok_or_else(|| {
            ObmmError::invalid_argument(format!(
                "sysfs root {} is not UTF-8",
                self.root.display()
            ))
        })?;
        let pattern = format!(
            "{}/{}/*/{}",
            Pattern::escape(root),
            ubc::controller_dir_name(index),
            ubc::CONTROLLER_MARKER
        );
        let options = MatchOptions {
            require_literal_leading_dot: true,
            ..MatchOptions::new()
        };

        let matches = glob_with(&pattern, options)
            .map_err(|e| ObmmError::invalid_argument(format!("bad pattern {pattern}: {e}")))?;

        let Some(path) = matches
            .flatten()
            .next()
            .and_then(|marker| marker.parent().map(Path::to_path_buf))
        else {
            return Err(ObmmError::no_such_device(format!(
                "controller {index} has no {} entry",
                ubc::CONTROLLER_MARKER
            )));
        };

        if path.as_os_str().len() >= MAX_PATH {
            return Err(ObmmError::invalid_argument(format!(
                "controller path {} exceeds {MAX_PATH} bytes",
                path.display()
            )));
        }

        tracing::debug!("Controller {index}: {}", path.display());
        Ok(path)
    }

    /// Find the controller whose `eid` attribute equals `eid`.
    ///
    /// Indices that do not resolve are skipped; a resolved controller with
    /// an unreadable `eid` ends the search.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchDevice` if no controller matches within
    /// `MAX_CONTROLLERS` indices or a present controller's `eid` is unreadable.
    pub fn find_controller(&self, eid: &Eid) -> Result<Controller> {
        for index in 0..MAX_CONTROLLERS {
            let Ok(path) = self.controller_path(index) else {
                continue;
            };

            let Ok(raw) = read_attr(&path, attr::EID) else {
                tracing::error!("failed to read ctl eid, path {}", path.display());
                return Err(ObmmError::no_such_device(format!(
                    "unreadable eid at {}",
                    path.display()
                )));
            };

            if sysfs_eid(raw) != *eid {
                continue;
            }

            tracing::debug!("EID {eid} owned by controller {index}");
            return Ok(Controller { index, path });
        }

        tracing::error!("failed to find ctl, eid: {eid}");
        Err(ObmmError::no_such_device(format!(
            "no controller owns eid {eid}"
        )))
    }

    /// UMMU mapping and NUMA node of the controller owning `eid`.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchDevice` if the EID does not resolve or either attribute
    /// is unreadable.
    pub fn controller_node(&self, eid: &Eid) -> Result<BusControllerNode> {
        let ctl = self.find_controller(eid)?;

        let ummu_mapping = read_attr(&ctl.path, attr::UMMU_MAP)
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| {
                tracing::error!("failed to read ctl ummu_map, path {}", ctl.path.display());
                ObmmError::no_such_device(format!("unreadable ummu_map at {}", ctl.path.display()))
            })?;

        let numa_id = read_attr(&ctl.path, attr::NUMA)
            .ok()
            .filter(|v| *v >= 0)
            .ok_or_else(|| {
                tracing::error!("failed to read ctl numa, path {}", ctl.path.display());
                ObmmError::no_such_device(format!("unreadable numa at {}", ctl.path.display()))
            })?;

        Ok(BusControllerNode {
            ummu_mapping,
            numa_id,
        })
    }

    /// Primary channel adapter of the controller owning `eid`.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchDevice` if the EID does not resolve or `primary_cna` is
    /// unreadable.
    pub fn primary_cna(&self, eid: &Eid) -> Result<u32> {
        let ctl = self.find_controller(eid)?;

        read_attr(&ctl.path, attr::PRIMARY_CNA)
            .ok()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| {
                tracing::error!("failed to read ctl primary_cna, path {}", ctl.path.display());
                ObmmError::no_such_device(format!(
                    "unreadable primary_cna at {}",
                    ctl.path.display()
                ))
            })
    }

    /// List every resolvable controller with whatever attributes it exposes.
    pub fn controllers(&self) -> Vec<ControllerInfo> {
        (0..MAX_CONTROLLERS)
            .filter_map(|index| {
                let path = self.controller_path(index).ok()?;
                let read = |name: &str| {
                    read_attr(&path, name)
                        .map_err(|e| tracing::warn!("Controller {index}: {e}"))
                        .ok()
                };
                Some(ControllerInfo {
                    index,
                    eid: read(attr::EID).map(sysfs_eid),
                    ummu_mapping: read(attr::UMMU_MAP),
                    numa_id: read(attr::NUMA),
                    primary_cna: read(attr::PRIMARY_CNA).and_then(|v| u32::try_from(v).ok()),
                    path,
                })
            })
            .collect()
    }
}

/// The comparison buffer for a raw `eid` attribute: host-endian 32-bit
/// value in the low bytes, upper bytes zero.
fn sysfs_eid(raw: i32) -> Eid {
    let mut bytes = [0u8; EID_SIZE];
    bytes[..4].copy_from_slice(&raw.to_ne_bytes());
    Eid::from_bytes(bytes)
}
