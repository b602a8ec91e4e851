//! Memory-state bits for `OBMM_SHMDEV_UPDATE_RANGE`.
//!
//! A state is one memory type OR'd with one access mode.

/// Normal cacheable memory.
pub const OBMM_SHM_MEM_NORMAL: u64 = 0x0;
/// Normal non-cacheable memory.
pub const OBMM_SHM_MEM_NORMAL_NC: u64 = 0x1;
/// Device memory.
pub const OBMM_SHM_MEM_DEVICE: u64 = 0x2;

/// Read-only access.
pub const OBMM_SHM_MEM_READONLY: u64 = 0x0;
/// Read-write access.
pub const OBMM_SHM_MEM_READWRITE: u64 = 0x4;
/// No access.
pub const OBMM_SHM_MEM_NO_ACCESS: u64 = 0x8;

/// Let the driver infer the cache maintenance from the state transition.
pub const OBMM_SHM_CACHE_INFER: u8 = 0;
/// Skip cache maintenance.
pub const OBMM_SHM_CACHE_NONE: u8 = 1;
