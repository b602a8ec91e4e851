//! UB bus-controller sysfs layout.
//!
//! Each controller `N` appears as `<root>/ub_bus_controllerN/<dev>/` where
//! `<dev>` is the one child holding a `ubc` entry. The attributes below live
//! next to that entry as short decimal or `0x`-prefixed text.

/// Default sysfs root for controller directories.
pub const SYSFS_DEVICES_ROOT: &str = "/sys/devices";

/// Directory name prefix, followed by the controller index.
pub const CONTROLLER_DIR_PREFIX: &str = "ub_bus_controller";

/// Entry marking the controller's attribute directory.
pub const CONTROLLER_MARKER: &str = "ubc";

/// Upper bound of the controller index space.
pub const MAX_CONTROLLERS: u32 = 8;

/// Longest attribute directory path the adaptor accepts (exclusive).
pub const MAX_PATH: usize = 256;

/// Attribute files are read up to this many bytes minus one.
pub const MAX_ATTR_CHARS: usize = 64;

/// Attribute names.
pub mod attr {
    /// Controller's own EID (low 32 bits, host endian).
    pub const EID: &str = "eid";
    /// UMMU mapping index.
    pub const UMMU_MAP: &str = "ummu_map";
    /// NUMA node the controller is attached to.
    pub const NUMA: &str = "numa";
    /// Primary channel adapter.
    pub const PRIMARY_CNA: &str = "primary_cna";
}

/// Directory name of controller `index`.
#[must_use]
pub fn controller_dir_name(index: u32) -> String {
    format!("{CONTROLLER_DIR_PREFIX}{index}")
}
