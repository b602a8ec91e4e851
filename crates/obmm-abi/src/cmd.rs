//! Command structures exchanged with the control device.
//!
//! Every structure is `#[repr(C)]` and passed by pointer with its request
//! number. User pointers travel as `u64` so the structures stay plain data.

use crate::{EID_SIZE, OBMM_MAX_LOCAL_NUMA_NODES};

/// Address query key: look up by physical address.
pub const OBMM_QUERY_BY_PA: u32 = 0;
/// Address query key: look up by (mem id, offset).
pub const OBMM_QUERY_BY_ID_OFFSET: u32 = 1;

/// `OBMM_CMD_ADDR_QUERY`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ObmmCmdAddrQuery {
    /// `OBMM_QUERY_BY_PA` or `OBMM_QUERY_BY_ID_OFFSET`
    pub key_type: u32,
    /// Memory id (in for id lookups, out for pa lookups)
    pub mem_id: u64,
    /// Offset within the region
    pub offset: u64,
    /// Physical address
    pub pa: u64,
}

/// `OBMM_CMD_EXPORT`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ObmmCmdExport {
    /// Bytes to export from each local NUMA node
    pub size: [u64; OBMM_MAX_LOCAL_NUMA_NODES],
    /// Number of valid entries in `size`
    pub length: u64,
    /// Export flags
    pub flags: u64,
    /// Out: bus address of the exported region
    pub uba: u64,
    /// Out: memory id
    pub mem_id: u64,
    /// Out: token id remote importers present
    pub tokenid: u32,
    /// Proximity NUMA node of the owning bus controller
    pub pxm_numa: i32,
    /// Length of the private payload at `priv_data`
    pub priv_len: u16,
    /// Length of the vendor blob at `vendor_info`
    pub vendor_len: u16,
    /// Destination endpoint
    pub deid: [u8; EID_SIZE],
    /// User pointer to the private payload
    pub priv_data: u64,
    /// User pointer to the vendor blob
    pub vendor_info: u64,
}

/// `OBMM_CMD_EXPORT_PID`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ObmmCmdExportPid {
    /// Start of the virtual range in the target process
    pub va: u64,
    /// Length of the range
    pub length: u64,
    /// Export flags
    pub flags: u64,
    /// Out: bus address of the exported region
    pub uba: u64,
    /// Out: memory id
    pub mem_id: u64,
    /// Out: token id
    pub tokenid: u32,
    /// Target process; 0 is the caller
    pub pid: i32,
    /// Proximity NUMA node of the owning bus controller
    pub pxm_numa: i32,
    /// Length of the private payload
    pub priv_len: u16,
    /// Length of the vendor blob
    pub vendor_len: u16,
    /// Destination endpoint
    pub deid: [u8; EID_SIZE],
    /// User pointer to the private payload
    pub priv_data: u64,
    /// User pointer to the vendor blob
    pub vendor_info: u64,
}

/// `OBMM_CMD_IMPORT`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ObmmCmdImport {
    /// Import flags
    pub flags: u64,
    /// Out: memory id
    pub mem_id: u64,
    /// Remote bus address
    pub addr: u64,
    /// Region length
    pub length: u64,
    /// Token id issued by the exporter
    pub tokenid: u32,
    /// Source channel adapter
    pub scna: u32,
    /// Destination channel adapter
    pub dcna: u32,
    /// In: NUMA hint, out: NUMA node chosen by the driver
    pub numa_id: i32,
    /// Length of the private payload
    pub priv_len: u16,
    /// Distance hint for a remote NUMA node
    pub base_dist: u8,
    /// Destination endpoint
    pub deid: [u8; EID_SIZE],
    /// Source endpoint
    pub seid: [u8; EID_SIZE],
    /// User pointer to the private payload
    pub priv_data: u64,
}

/// `OBMM_CMD_UNEXPORT`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ObmmCmdUnexport {
    /// Memory id
    pub mem_id: u64,
    /// Unexport flags
    pub flags: u64,
}

/// `OBMM_CMD_UNIMPORT`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ObmmCmdUnimport {
    /// Memory id
    pub mem_id: u64,
    /// Unimport flags
    pub flags: u64,
}

/// `OBMM_CMD_DECLARE_PREIMPORT` / `OBMM_CMD_UNDECLARE_PREIMPORT`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ObmmCmdPreimport {
    /// Physical base of the window
    pub pa: u64,
    /// Window length
    pub length: u64,
    /// Pre-import flags
    pub flags: u64,
    /// In: NUMA hint, out: NUMA node chosen by the driver
    pub numa_id: i32,
    /// Source channel adapter
    pub scna: u32,
    /// Destination channel adapter
    pub dcna: u32,
    /// Length of the private payload
    pub priv_len: u16,
    /// Distance hint
    pub base_dist: u8,
    /// Destination endpoint
    pub deid: [u8; EID_SIZE],
    /// Source endpoint
    pub seid: [u8; EID_SIZE],
    /// User pointer to the private payload
    pub priv_data: u64,
}

/// `OBMM_SHMDEV_UPDATE_RANGE`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ObmmCmdUpdateRange {
    /// Start virtual address
    pub start: u64,
    /// End virtual address
    pub end: u64,
    /// Combination of [`crate::mem_state`] bits
    pub mem_state: u64,
    /// Cache maintenance to perform
    pub cache_ops: u8,
}
