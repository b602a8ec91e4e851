//! Control request numbers.
//!
//! Encoded as the generic Linux `_IOWR(type, nr, size)`:
//! `(dir << 30) | (size << 16) | (type << 8) | nr`.

use crate::cmd::{
    ObmmCmdAddrQuery, ObmmCmdExport, ObmmCmdExportPid, ObmmCmdImport, ObmmCmdPreimport,
    ObmmCmdUnexport, ObmmCmdUnimport, ObmmCmdUpdateRange,
};

const IOC_WRITE: u64 = 1;
const IOC_READ: u64 = 2;

/// `_IOWR(ty, nr, size)`
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub const fn iowr(ty: u8, nr: u8, size: usize) -> u64 {
    ((IOC_READ | IOC_WRITE) << 30) | ((size as u64 & 0x3fff) << 16) | ((ty as u64) << 8) | nr as u64
}

/// Request type of the control device.
pub const OBMM_IOCTL_TYPE: u8 = b'x';

/// Request type of the per-region shm devices.
pub const OBMM_SHMDEV_IOCTL_TYPE: u8 = b'X';

/// Export pages from local NUMA nodes.
pub const OBMM_CMD_EXPORT: u64 =
    iowr(OBMM_IOCTL_TYPE, 0, std::mem::size_of::<ObmmCmdExport>());
/// Import a remote region.
pub const OBMM_CMD_IMPORT: u64 =
    iowr(OBMM_IOCTL_TYPE, 1, std::mem::size_of::<ObmmCmdImport>());
/// Tear down an export.
pub const OBMM_CMD_UNEXPORT: u64 =
    iowr(OBMM_IOCTL_TYPE, 2, std::mem::size_of::<ObmmCmdUnexport>());
/// Tear down an import.
pub const OBMM_CMD_UNIMPORT: u64 =
    iowr(OBMM_IOCTL_TYPE, 3, std::mem::size_of::<ObmmCmdUnimport>());
/// Translate between physical address and (mem id, offset).
pub const OBMM_CMD_ADDR_QUERY: u64 =
    iowr(OBMM_IOCTL_TYPE, 4, std::mem::size_of::<ObmmCmdAddrQuery>());
/// Export a virtual range of a process.
pub const OBMM_CMD_EXPORT_PID: u64 =
    iowr(OBMM_IOCTL_TYPE, 5, std::mem::size_of::<ObmmCmdExportPid>());
/// Declare a pre-import window.
pub const OBMM_CMD_DECLARE_PREIMPORT: u64 =
    iowr(OBMM_IOCTL_TYPE, 6, std::mem::size_of::<ObmmCmdPreimport>());
/// Withdraw a pre-import window.
pub const OBMM_CMD_UNDECLARE_PREIMPORT: u64 =
    iowr(OBMM_IOCTL_TYPE, 7, std::mem::size_of::<ObmmCmdPreimport>());

/// Update memory state of a range of an shm device mapping.
pub const OBMM_SHMDEV_UPDATE_RANGE: u64 =
    iowr(OBMM_SHMDEV_IOCTL_TYPE, 0, std::mem::size_of::<ObmmCmdUpdateRange>());
