//! Kernel ABI model for the OBMM inter-node shared-memory manager.
//!
//! This crate has **no dependencies** and **no system access**. It is a pure
//! model of what the userspace layer exchanges with the kernel and with the
//! UB bus-controller sysfs tree: request numbers, command layouts and the
//! attribute names the vendor adaptor reads.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`ioctl`] | `_IOWR` encoding and the control request numbers |
//! | [`cmd`] | `#[repr(C)]` command structures submitted to `/dev/obmm` |
//! | [`mem_state`] | Memory-state and cache-op bits for shm range updates |
//! | [`ubc`] | UB bus-controller sysfs layout and attribute names |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cmd;
pub mod ioctl;
pub mod mem_state;
pub mod ubc;

/// Memory identifier assigned by the driver.
pub type MemId = u64;

/// The driver never hands out this id; it marks a failed export/import.
pub const OBMM_INVALID_MEMID: MemId = 0;

/// Number of per-NUMA size slots in an export command.
pub const OBMM_MAX_LOCAL_NUMA_NODES: usize = 16;

/// Capacity of the vendor-info area the driver accepts with an export.
pub const OBMM_MAX_VENDOR_LEN: usize = 128;

/// "No preference" NUMA node.
pub const NUMA_NO_NODE: i32 = -1;

/// Size of an endpoint identifier in bytes.
pub const EID_SIZE: usize = 16;

/// Default control device.
pub const OBMM_DEV_PATH: &str = "/dev/obmm";
