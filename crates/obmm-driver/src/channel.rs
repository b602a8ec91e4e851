//! Control channel to the OBMM kernel driver
//!
//! [`DeviceChannel`] submits commands to `/dev/obmm` with `ioctl(2)`.
//! [`ChannelCache`] opens it lazily and hands the same handle to every
//! caller. The handle itself is not serialised: concurrent submissions rely
//! on the driver's own locking.

// ioctl request numbers are passed through as the libc request type
#![allow(clippy::cast_possible_truncation)]

use crate::error::{ObmmError, Result};
use obmm_abi::cmd::{
    ObmmCmdAddrQuery, ObmmCmdExport, ObmmCmdExportPid, ObmmCmdImport, ObmmCmdPreimport,
    ObmmCmdUnexport, ObmmCmdUnimport,
};
use obmm_abi::ioctl;
use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// One request to the control device, borrowing its command in place so the
/// driver's output fields land in the caller's structure.
#[derive(Debug)]
pub enum ControlRequest<'a> {
    /// Address translation
    AddrQuery(&'a mut ObmmCmdAddrQuery),
    /// Export by per-NUMA sizes
    Export(&'a mut ObmmCmdExport),
    /// Export of a process's virtual range
    ExportPid(&'a mut ObmmCmdExportPid),
    /// Import
    Import(&'a mut ObmmCmdImport),
    /// Unexport
    Unexport(&'a mut ObmmCmdUnexport),
    /// Unimport
    Unimport(&'a mut ObmmCmdUnimport),
    /// Declare pre-import window
    DeclarePreimport(&'a mut ObmmCmdPreimport),
    /// Withdraw pre-import window
    UndeclarePreimport(&'a mut ObmmCmdPreimport),
}

impl ControlRequest<'_> {
    /// Short name, for logs and errors
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AddrQuery(_) => "addr_query",
            Self::Export(_) => "export",
            Self::ExportPid(_) => "export_pid",
            Self::Import(_) => "import",
            Self::Unexport(_) => "unexport",
            Self::Unimport(_) => "unimport",
            Self::DeclarePreimport(_) => "declare_preimport",
            Self::UndeclarePreimport(_) => "undeclare_preimport",
        }
    }

    /// ioctl request number
    pub const fn number(&self) -> u64 {
        match self {
            Self::AddrQuery(_) => ioctl::OBMM_CMD_ADDR_QUERY,
            Self::Export(_) => ioctl::OBMM_CMD_EXPORT,
            Self::ExportPid(_) => ioctl::OBMM_CMD_EXPORT_PID,
            Self::Import(_) => ioctl::OBMM_CMD_IMPORT,
            Self::Unexport(_) => ioctl::OBMM_CMD_UNEXPORT,
            Self::Unimport(_) => ioctl::OBMM_CMD_UNIMPORT,
            Self::DeclarePreimport(_) => ioctl::OBMM_CMD_DECLARE_PREIMPORT,
            Self::UndeclarePreimport(_) => ioctl::OBMM_CMD_UNDECLARE_PREIMPORT,
        }
    }

    fn arg_ptr(&mut self) -> *mut libc::c_void {
        match self {
            Self::AddrQuery(cmd) => std::ptr::from_mut(*cmd).cast(),
            Self::Export(cmd) => std::ptr::from_mut(*cmd).cast(),
            Self::ExportPid(cmd) => std::ptr::from_mut(*cmd).cast(),
            Self::Import(cmd) => std::ptr::from_mut(*cmd).cast(),
            Self::Unexport(cmd) => std::ptr::from_mut(*cmd).cast(),
            Self::Unimport(cmd) => std::ptr::from_mut(*cmd).cast(),
            Self::DeclarePreimport(cmd) | Self::UndeclarePreimport(cmd) => {
                std::ptr::from_mut(*cmd).cast()
            }
        }
    }
}

/// Request/response channel to the driver
pub trait ControlChannel: Debug + Send + Sync {
    /// Submit one request; output fields are written into its command.
    ///
    /// # Errors
    ///
    /// Returns `ObmmError::Driver` if the driver rejects the request.
    fn submit(&self, request: ControlRequest<'_>) -> Result<()>;
}

/// The control device file
#[derive(Debug)]
pub struct DeviceChannel {
    path: PathBuf,
    file: File,
}

impl DeviceChannel {
    /// Open the control device read-write
    ///
    /// # Errors
    ///
    /// Returns `ObmmError::DeviceOpen` with the OS error (missing device,
    /// permission denied, ...).
    pub fn open(path: &Path) -> Result<Self> {
        tracing::debug!("Opening control device {}", path.display());

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| ObmmError::DeviceOpen {
                path: path.to_path_buf(),
                source,
            })?;

        tracing::info!("Opened control device {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Device path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsRawFd for DeviceChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl ControlChannel for DeviceChannel {
    fn submit(&self, mut request: ControlRequest<'_>) -> Result<()> {
        let name = request.name();
        let number = request.number();
        let arg = request.arg_ptr();

        tracing::debug!("Submitting {name} ({number:#x})");

        // SAFETY: the fd is owned by self.file and open; arg points at the
        // #[repr(C)] command matching `number`, exclusively borrowed by the
        // request for the duration of the call. User pointers inside the
        // command (private payload, vendor info) are kept alive by the caller
        // until submit returns.
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), number as _, arg) };
        if ret < 0 {
            let source = std::io::Error::last_os_error();
            tracing::error!("{name} rejected by driver: {source}");
            return Err(ObmmError::Driver {
                request: name,
                source,
            });
        }
        Ok(())
    }
}

type Opener = dyn Fn() -> Result<Arc<dyn ControlChannel>> + Send + Sync;

/// Lazily opened, shared control channel
///
/// The first [`get`](Self::get) opens the channel; later calls return the
/// cached handle. The lock covers only check-and-open. A failed open is not
/// remembered, so the next caller retries.
pub struct ChannelCache {
    opener: Box<Opener>,
    slot: Mutex<Option<Arc<dyn ControlChannel>>>,
}

impl ChannelCache {
    /// Cache opening the control device at `path`
    pub fn for_device(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::with_opener(move || {
            DeviceChannel::open(&path).map(|ch| Arc::new(ch) as Arc<dyn ControlChannel>)
        })
    }

    /// Cache with a custom opener
    pub fn with_opener<F>(opener: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn ControlChannel>> + Send + Sync + 'static,
    {
        Self {
            opener: Box::new(opener),
            slot: Mutex::new(None),
        }
    }

    /// Cache already holding `channel`
    pub fn preopened(channel: Arc<dyn ControlChannel>) -> Self {
        let cache = Self::with_opener(|| {
            Err(ObmmError::invalid_argument("preopened channel cache has no opener"))
        });
        *cache.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(channel);
        cache
    }

    /// The shared channel, opening it on first use
    ///
    /// # Errors
    ///
    /// Propagates the open error; the next call tries again.
    pub fn get(&self) -> Result<Arc<dyn ControlChannel>> {
        let mut slot = self
            .slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(channel) = slot.as_ref() {
            return Ok(Arc::clone(channel));
        }
        let channel = (self.opener)()?;
        *slot = Some(Arc::clone(&channel));
        Ok(channel)
    }

    /// Whether a channel is cached
    pub fn is_open(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some()
    }
}

impl Debug for ChannelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelCache")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}
