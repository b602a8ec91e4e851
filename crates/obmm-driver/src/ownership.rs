//! Access ownership of an imported shared-memory range
//!
//! An importer flips a range of its shm device between no access, read-only
//! and read-write. The driver takes a memory state (type | access) and
//! performs whatever cache maintenance the transition needs.

use crate::error::{ObmmError, Result};
use obmm_abi::cmd::ObmmCmdUpdateRange;
use obmm_abi::ioctl::OBMM_SHMDEV_UPDATE_RANGE;
use obmm_abi::mem_state::{
    OBMM_SHM_CACHE_INFER, OBMM_SHM_MEM_NORMAL, OBMM_SHM_MEM_NORMAL_NC, OBMM_SHM_MEM_NO_ACCESS,
    OBMM_SHM_MEM_READONLY, OBMM_SHM_MEM_READWRITE,
};
use rustix::mm::ProtFlags;
use std::fmt;
use std::os::fd::{AsFd, AsRawFd};
use std::str::FromStr;

/// Access the local node holds on a range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// No access; the range is mapped non-cacheable
    None,
    /// Read-only
    Read,
    /// Read-write
    ReadWrite,
}

impl Ownership {
    /// Ownership for an `mmap`-style protection.
    ///
    /// Write implies read. Any other bit (exec) is rejected.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for protections other than none, read,
    /// write or read|write.
    pub fn from_prot(prot: ProtFlags) -> Result<Self> {
        if prot.is_empty() {
            Ok(Self::None)
        } else if prot == ProtFlags::READ {
            Ok(Self::Read)
        } else if prot == ProtFlags::WRITE || prot == ProtFlags::READ | ProtFlags::WRITE {
            Ok(Self::ReadWrite)
        } else {
            Err(ObmmError::invalid_argument(format!(
                "unsupported protection {prot:?}"
            )))
        }
    }

    /// Ownership for raw `PROT_*` bits.
    ///
    /// # Errors
    ///
    /// See [`Ownership::from_prot`]; unknown bits are rejected as well.
    pub fn from_prot_bits(prot: i32) -> Result<Self> {
        let flags = u32::try_from(prot)
            .ok()
            .and_then(ProtFlags::from_bits)
            .ok_or_else(|| ObmmError::invalid_argument(format!("unsupported prot {prot:#x}")))?;
        Self::from_prot(flags)
    }

    /// Memory state requested from the driver
    #[must_use]
    pub const fn mem_state(self) -> u64 {
        match self {
            Self::None => OBMM_SHM_MEM_NORMAL_NC | OBMM_SHM_MEM_NO_ACCESS,
            Self::Read => OBMM_SHM_MEM_NORMAL | OBMM_SHM_MEM_READONLY,
            Self::ReadWrite => OBMM_SHM_MEM_NORMAL | OBMM_SHM_MEM_READWRITE,
        }
    }
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Read => "read",
            Self::ReadWrite => "rw",
        })
    }
}

impl FromStr for Ownership {
    type Err = ObmmError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "read" | "ro" => Ok(Self::Read),
            "rw" | "write" | "readwrite" => Ok(Self::ReadWrite),
            other => Err(ObmmError::invalid_argument(format!(
                "unknown ownership '{other}'"
            ))),
        }
    }
}

/// Build the range update for `[start, end)`.
#[must_use]
pub fn update_range_cmd(start: u64, end: u64, ownership: Ownership) -> ObmmCmdUpdateRange {
    ObmmCmdUpdateRange {
        start,
        end,
        mem_state: ownership.mem_state(),
        cache_ops: OBMM_SHM_CACHE_INFER,
    }
}

/// Change the ownership of `[start, end)` on the shm device `fd`.
///
/// # Errors
///
/// Returns `ObmmError::Driver` with the driver's error if the update is
/// rejected.
#[allow(clippy::cast_possible_truncation)]
pub fn set_ownership(fd: impl AsFd, start: u64, end: u64, ownership: Ownership) -> Result<()> {
    let mut cmd = update_range_cmd(start, end, ownership);
    let fd = fd.as_fd();

    tracing::debug!(
        "Updating range {start:#x}..{end:#x} to {ownership} (mem_state {:#x})",
        cmd.mem_state
    );

    // SAFETY: fd is a borrowed, open descriptor; cmd is a #[repr(C)]
    // ObmmCmdUpdateRange matching the request and outlives the call.
    let ret = unsafe {
        libc::ioctl(
            fd.as_raw_fd(),
            OBMM_SHMDEV_UPDATE_RANGE as _,
            std::ptr::from_mut(&mut cmd),
        )
    };
    if ret < 0 {
        let source = std::io::Error::last_os_error();
        tracing::error!("failed to set ownership of {start:#x}..{end:#x}: {source}");
        return Err(ObmmError::Driver {
            request: "update_range",
            source,
        });
    }
    Ok(())
}
