//! The OBMM context and its public operations
//!
//! Every operation follows the same discipline: validate arguments, obtain
//! the shared control channel, let the vendor adaptor enrich or veto the
//! command, submit it, then release whatever the adaptor set up regardless of
//! the submission outcome.

use crate::adaptor::{UbAdaptor, VendorAdaptor};
use crate::channel::{ChannelCache, ControlChannel, ControlRequest};
use crate::config::ObmmConfig;
use crate::desc::{self, MemDesc, PreimportInfo};
use crate::discovery::UbcTree;
use crate::error::{ObmmError, Result};
use crate::flags::{ExportFlags, ImportFlags, PreimportFlags, UnexportFlags, UnimportFlags};
use crate::ownership::{self, Ownership};
use obmm_abi::cmd::{
    ObmmCmdAddrQuery, ObmmCmdExport, ObmmCmdExportPid, ObmmCmdImport, ObmmCmdPreimport,
    ObmmCmdUnexport, ObmmCmdUnimport, OBMM_QUERY_BY_ID_OFFSET, OBMM_QUERY_BY_PA,
};
use obmm_abi::{MemId, NUMA_NO_NODE, OBMM_INVALID_MEMID, OBMM_MAX_LOCAL_NUMA_NODES};
use std::os::fd::AsFd;
use std::sync::Arc;

/// Outcome of an import
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Imported {
    /// Memory id of the imported region
    pub mem_id: MemId,
    /// NUMA node the driver placed the region on
    pub numa_id: i32,
}

/// Userspace handle on the OBMM driver
///
/// Owns the configuration, the vendor adaptor and the lazily opened control
/// channel. Cheap to share behind an `Arc`; every method takes `&self`.
#[derive(Debug)]
pub struct Obmm {
    config: ObmmConfig,
    adaptor: Box<dyn VendorAdaptor>,
    channels: ChannelCache,
}

impl Obmm {
    /// Context for `config` with the UB adaptor and the real control device
    pub fn new(config: ObmmConfig) -> Self {
        let adaptor = UbAdaptor::new(UbcTree::new(config.sysfs_root.clone()));
        let channels = ChannelCache::for_device(config.device_path.clone());
        Self::with_parts(config, Box::new(adaptor), channels)
    }

    /// Context configured from the environment
    pub fn from_env() -> Self {
        Self::new(ObmmConfig::from_env())
    }

    /// Context from explicit parts
    pub fn with_parts(
        config: ObmmConfig,
        adaptor: Box<dyn VendorAdaptor>,
        channels: ChannelCache,
    ) -> Self {
        Self {
            config,
            adaptor,
            channels,
        }
    }

    /// Configuration in use
    pub const fn config(&self) -> &ObmmConfig {
        &self.config
    }

    /// Vendor adaptor in use
    pub fn adaptor(&self) -> &dyn VendorAdaptor {
        self.adaptor.as_ref()
    }

    fn channel(&self) -> Result<Arc<dyn ControlChannel>> {
        self.channels.get().map_err(|e| {
            tracing::error!("failed to open control device: {e}");
            e
        })
    }

    /// Export local memory, `sizes[n]` bytes from local NUMA node `n`.
    ///
    /// On success fills `desc` with the bus address, token id and total
    /// length, and clears its channel adapters.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for more than `OBMM_MAX_LOCAL_NUMA_NODES`
    /// sizes or sizes whose total overflows `u64`, the adaptor's error if the
    /// destination cannot be resolved, or `Driver` if the driver rejects the
    /// export.
    pub fn export(&self, sizes: &[u64], flags: ExportFlags, desc: &mut MemDesc) -> Result<MemId> {
        if sizes.len() > OBMM_MAX_LOCAL_NUMA_NODES {
            return Err(ObmmError::invalid_argument(format!(
                "{} sizes for {OBMM_MAX_LOCAL_NUMA_NODES} local NUMA nodes",
                sizes.len()
            )));
        }
        let total = sizes
            .iter()
            .try_fold(0u64, |acc, size| acc.checked_add(*size))
            .ok_or_else(|| ObmmError::invalid_argument("export sizes overflow u64"))?;
        let priv_len = desc.priv_len()?;
        let channel = self.channel()?;

        let mut size = [0u64; OBMM_MAX_LOCAL_NUMA_NODES];
        size[..sizes.len()].copy_from_slice(sizes);

        let adaptation = self.adaptor.adapt_export(desc)?;
        let mut cmd = ObmmCmdExport {
            size,
            length: OBMM_MAX_LOCAL_NUMA_NODES as u64,
            flags: flags.bits(),
            pxm_numa: adaptation.numa,
            priv_len,
            vendor_len: adaptation.vendor_info.len(),
            deid: *desc.deid.as_bytes(),
            priv_data: user_ptr(&desc.priv_data),
            vendor_info: adaptation.vendor_info.user_ptr(),
            ..ObmmCmdExport::default()
        };

        let submitted = channel.submit(ControlRequest::Export(&mut cmd));
        adaptation.vendor_info.release();
        submitted?;

        desc.addr = cmd.uba;
        desc.tokenid = cmd.tokenid;
        desc.length = total;
        desc.scna = 0;
        desc.dcna = 0;

        tracing::info!(
            "Exported mem_id {} ({} bytes, uba {:#x}) to {}",
            cmd.mem_id,
            desc.length,
            desc.addr,
            desc.deid
        );
        Ok(cmd.mem_id)
    }

    /// Export `length` bytes at `va` in process `pid` (0 for the caller).
    ///
    /// # Errors
    ///
    /// As [`Obmm::export`].
    pub fn export_useraddr(
        &self,
        pid: i32,
        va: u64,
        length: u64,
        flags: ExportFlags,
        desc: &mut MemDesc,
    ) -> Result<MemId> {
        let priv_len = desc.priv_len()?;
        let channel = self.channel()?;

        let adaptation = self.adaptor.adapt_export(desc)?;
        let mut cmd = ObmmCmdExportPid {
            va,
            length,
            flags: flags.bits(),
            pid,
            pxm_numa: adaptation.numa,
            priv_len,
            vendor_len: adaptation.vendor_info.len(),
            deid: *desc.deid.as_bytes(),
            priv_data: user_ptr(&desc.priv_data),
            vendor_info: adaptation.vendor_info.user_ptr(),
            ..ObmmCmdExportPid::default()
        };

        let submitted = channel.submit(ControlRequest::ExportPid(&mut cmd));
        adaptation.vendor_info.release();
        submitted?;

        desc.addr = cmd.uba;
        desc.length = length;
        desc.tokenid = cmd.tokenid;
        desc.scna = 0;
        desc.dcna = 0;

        tracing::info!(
            "Exported mem_id {} (pid {pid}, va {va:#x}, {length} bytes) to {}",
            cmd.mem_id,
            desc.deid
        );
        Ok(cmd.mem_id)
    }

    /// Import the region described by `desc`.
    ///
    /// `base_dist` only matters, and is only range checked, for a remote
    /// NUMA import outside a pre-import window. `numa_hint` defaults to
    /// `NUMA_NO_NODE`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an out-of-range `base_dist`,
    /// `NoSuchDevice` if the adaptor rejects the source CNA, or `Driver`.
    pub fn import(
        &self,
        desc: &MemDesc,
        flags: ImportFlags,
        base_dist: i32,
        numa_hint: Option<i32>,
    ) -> Result<Imported> {
        let base_dist = if flags.checks_base_dist() {
            desc::base_dist(base_dist)?
        } else {
            unchecked_base_dist(base_dist)
        };

        let mut cmd = ObmmCmdImport {
            flags: flags.bits(),
            mem_id: OBMM_INVALID_MEMID,
            addr: desc.addr,
            length: desc.length,
            tokenid: desc.tokenid,
            scna: desc.scna,
            dcna: desc.dcna,
            numa_id: numa_hint.unwrap_or(NUMA_NO_NODE),
            priv_len: desc.priv_len()?,
            base_dist,
            deid: *desc.deid.as_bytes(),
            seid: *desc.seid.as_bytes(),
            priv_data: user_ptr(&desc.priv_data),
        };

        let channel = self.channel()?;
        self.adaptor.fixup_import(&mut cmd)?;
        let submitted = channel.submit(ControlRequest::Import(&mut cmd));
        self.adaptor.cleanup_import(&mut cmd);
        submitted?;

        tracing::info!(
            "Imported mem_id {} ({} bytes from {}) on numa {}",
            cmd.mem_id,
            desc.length,
            desc.seid,
            cmd.numa_id
        );
        Ok(Imported {
            mem_id: cmd.mem_id,
            numa_id: cmd.numa_id,
        })
    }

    /// Withdraw an export.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for `OBMM_INVALID_MEMID`, otherwise `Driver`.
    pub fn unexport(&self, mem_id: MemId, flags: UnexportFlags) -> Result<()> {
        check_mem_id(mem_id)?;
        let channel = self.channel()?;
        let mut cmd = ObmmCmdUnexport {
            mem_id,
            flags: flags.bits(),
        };
        channel.submit(ControlRequest::Unexport(&mut cmd))?;
        tracing::info!("Unexported mem_id {mem_id}");
        Ok(())
    }

    /// Release an import.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for `OBMM_INVALID_MEMID`, otherwise `Driver`.
    pub fn unimport(&self, mem_id: MemId, flags: UnimportFlags) -> Result<()> {
        check_mem_id(mem_id)?;
        let channel = self.channel()?;
        let mut cmd = ObmmCmdUnimport {
            mem_id,
            flags: flags.bits(),
        };
        channel.submit(ControlRequest::Unimport(&mut cmd))?;
        tracing::info!("Unimported mem_id {mem_id}");
        Ok(())
    }

    /// Declare a pre-import window; `info.numa_id` receives the driver's
    /// NUMA choice.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `base_dist` is outside `0..=255`,
    /// `NoSuchDevice` if the adaptor rejects the source CNA, or `Driver`.
    pub fn preimport(&self, info: &mut PreimportInfo, flags: PreimportFlags) -> Result<()> {
        let base_dist = desc::base_dist(info.base_dist)?;
        let channel = self.channel()?;

        let mut cmd = preimport_cmd(info, flags, base_dist)?;
        self.adaptor.fixup_preimport(&mut cmd)?;
        let submitted = channel.submit(ControlRequest::DeclarePreimport(&mut cmd));
        self.adaptor.cleanup_preimport(&mut cmd);
        submitted?;

        info.numa_id = cmd.numa_id;
        tracing::info!(
            "Declared pre-import window {:#x}+{:#x} on numa {}",
            info.pa,
            info.length,
            info.numa_id
        );
        Ok(())
    }

    /// Withdraw a pre-import window.
    ///
    /// # Errors
    ///
    /// Returns `Driver` if the driver rejects the request.
    pub fn unpreimport(&self, info: &PreimportInfo, flags: PreimportFlags) -> Result<()> {
        let channel = self.channel()?;
        let mut cmd = preimport_cmd(info, flags, unchecked_base_dist(info.base_dist))?;
        channel.submit(ControlRequest::UndeclarePreimport(&mut cmd))?;
        tracing::info!(
            "Withdrew pre-import window {:#x}+{:#x}",
            info.pa,
            info.length
        );
        Ok(())
    }

    /// Change the ownership of `[start, end)` on an shm device.
    ///
    /// # Errors
    ///
    /// See [`ownership::set_ownership`].
    pub fn set_ownership(
        &self,
        fd: impl AsFd,
        start: u64,
        end: u64,
        ownership: Ownership,
    ) -> Result<()> {
        ownership::set_ownership(fd, start, end, ownership)
    }

    /// Memory id and offset backing physical address `pa`.
    ///
    /// # Errors
    ///
    /// Returns `Driver` if no region covers `pa`.
    pub fn query_memid_by_pa(&self, pa: u64) -> Result<(MemId, u64)> {
        let channel = self.channel()?;
        let mut cmd = ObmmCmdAddrQuery {
            key_type: OBMM_QUERY_BY_PA,
            pa,
            ..ObmmCmdAddrQuery::default()
        };
        channel.submit(ControlRequest::AddrQuery(&mut cmd))?;
        Ok((cmd.mem_id, cmd.offset))
    }

    /// Physical address at `offset` within region `mem_id`.
    ///
    /// # Errors
    ///
    /// Returns `Driver` for an unknown id or an offset past the region.
    pub fn query_pa_by_memid(&self, mem_id: MemId, offset: u64) -> Result<u64> {
        let channel = self.channel()?;
        let mut cmd = ObmmCmdAddrQuery {
            key_type: OBMM_QUERY_BY_ID_OFFSET,
            mem_id,
            offset,
            ..ObmmCmdAddrQuery::default()
        };
        channel.submit(ControlRequest::AddrQuery(&mut cmd))?;
        Ok(cmd.pa)
    }
}

fn check_mem_id(mem_id: MemId) -> Result<()> {
    if mem_id == OBMM_INVALID_MEMID {
        return Err(ObmmError::invalid_argument("invalid mem_id 0"));
    }
    Ok(())
}

/// Distance hint the driver ignores; passed through truncated.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
const fn unchecked_base_dist(value: i32) -> u8 {
    value as u8
}

fn user_ptr(data: &[u8]) -> u64 {
    if data.is_empty() {
        0
    } else {
        data.as_ptr() as u64
    }
}

fn preimport_cmd(
    info: &PreimportInfo,
    flags: PreimportFlags,
    base_dist: u8,
) -> Result<ObmmCmdPreimport> {
    Ok(ObmmCmdPreimport {
        pa: info.pa,
        length: info.length,
        flags: flags.bits(),
        numa_id: info.numa_id,
        scna: info.scna,
        dcna: info.dcna,
        priv_len: info.priv_len()?,
        base_dist,
        deid: *info.deid.as_bytes(),
        seid: *info.seid.as_bytes(),
        priv_data: user_ptr(&info.priv_data),
    })
}
