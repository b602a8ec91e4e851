//! Vendor adaptor: enriches or rejects commands before submission
//!
//! Every export passes through [`VendorAdaptor::adapt_export`] to obtain the
//! vendor blob and NUMA node; every import and pre-import passes through the
//! matching fixup before submission and the matching cleanup after it,
//! whatever the submission outcome.

use crate::desc::MemDesc;
use crate::discovery::UbcTree;
use crate::eid::Eid;
use crate::error::{ObmmError, Result};
use crate::vendor::{build_vendor_info, VendorInfoBlob};
use obmm_abi::cmd::{ObmmCmdImport, ObmmCmdPreimport};
use std::fmt::Debug;

/// What an export needs from the vendor
#[derive(Debug)]
pub struct ExportAdaptation {
    /// Blob for `vendor_info` / `vendor_len`
    pub vendor_info: VendorInfoBlob,

    /// NUMA node of the controller owning the destination EID
    pub numa: i32,
}

/// Vendor hooks around command submission
pub trait VendorAdaptor: Debug + Send + Sync {
    /// Derive the vendor blob and NUMA node for an export of `desc`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero destination EID and
    /// `NoSuchDevice` if no local controller owns it.
    fn adapt_export(&self, desc: &MemDesc) -> Result<ExportAdaptation>;

    /// Validate an import command before submission.
    ///
    /// # Errors
    ///
    /// Returns an error if the command must not reach the driver.
    fn fixup_import(&self, cmd: &mut ObmmCmdImport) -> Result<()>;

    /// Undo whatever `fixup_import` set up; runs after every submission.
    fn cleanup_import(&self, cmd: &mut ObmmCmdImport);

    /// Validate a pre-import command before submission.
    ///
    /// # Errors
    ///
    /// Returns an error if the command must not reach the driver.
    fn fixup_preimport(&self, cmd: &mut ObmmCmdPreimport) -> Result<()>;

    /// Undo whatever `fixup_preimport` set up; runs after every submission.
    fn cleanup_preimport(&self, cmd: &mut ObmmCmdPreimport);
}

/// Adaptor for UB bus controllers behind a UMMU
#[derive(Debug, Clone)]
pub struct UbAdaptor {
    tree: UbcTree,
}

impl UbAdaptor {
    /// Adaptor discovering controllers in `tree`
    pub const fn new(tree: UbcTree) -> Self {
        Self { tree }
    }

    /// Controller tree
    pub const fn tree(&self) -> &UbcTree {
        &self.tree
    }

    /// The claimed source adapter must be the primary CNA of the controller
    /// owning the source EID.
    fn check_source_cna(&self, seid: Eid, scna: u32) -> Result<()> {
        let cna = self.tree.primary_cna(&seid)?;
        if cna != scna {
            tracing::error!(
                "ctl with eid {seid} has scna={cna:#x} which is different from scna={scna:#x}"
            );
            return Err(ObmmError::no_such_device(format!(
                "eid {seid} is reached through cna {cna:#x}, not {scna:#x}"
            )));
        }
        Ok(())
    }
}

impl VendorAdaptor for UbAdaptor {
    fn adapt_export(&self, desc: &MemDesc) -> Result<ExportAdaptation> {
        if desc.deid.is_zero() {
            tracing::error!("zero-type eid is not allowed");
            return Err(ObmmError::invalid_argument("zero destination eid"));
        }

        let node = self.tree.controller_node(&desc.deid)?;
        let vendor_info = build_vendor_info(node.ummu_mapping).map_err(|e| {
            tracing::error!("init_vendor_info failed: {e}");
            e
        })?;

        Ok(ExportAdaptation {
            vendor_info,
            numa: node.numa_id,
        })
    }

    fn fixup_import(&self, cmd: &mut ObmmCmdImport) -> Result<()> {
        self.check_source_cna(Eid::from_bytes(cmd.seid), cmd.scna)
    }

    fn cleanup_import(&self, _cmd: &mut ObmmCmdImport) {}

    fn fixup_preimport(&self, cmd: &mut ObmmCmdPreimport) -> Result<()> {
        self.check_source_cna(Eid::from_bytes(cmd.seid), cmd.scna)
    }

    fn cleanup_preimport(&self, _cmd: &mut ObmmCmdPreimport) {}
}
