//! Vendor info attached to export commands
//!
//! The UMMU needs to know which translation unit serves the exporting
//! controller. That travels with the export as a small versioned blob the
//! driver hands to the vendor's UMMU code verbatim.

use crate::error::{ObmmError, Result};
use bytemuck::{Pod, Zeroable};
use obmm_abi::OBMM_MAX_VENDOR_LEN;

/// Version tag of [`VendorInfo::V1`] on the wire.
pub const TDEV_INFO_V1: u32 = 0;

/// Vendor metadata, by layout version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorInfo {
    /// UMMU mask plus memory residency
    V1 {
        /// One bit per UMMU serving the region
        ummu_idx_mask: u64,
        /// Region lives in on-chip memory (SRAM) rather than DRAM
        on_chip: bool,
    },
}

/// Kernel-visible layout: a version word and the union of payloads.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct TdevInfoRaw {
    ver: u32,
    _pad0: u32,
    ummu_idx_mask: u64,
    on_chip: u8,
    _pad1: [u8; 7],
}

const _: () = assert!(std::mem::size_of::<TdevInfoRaw>() <= OBMM_MAX_VENDOR_LEN);

impl VendorInfo {
    /// Version 1 for an on-chip region served by UMMU `ummu_mapping`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the index does not fit the 64-bit mask.
    pub fn for_ummu(ummu_mapping: u32) -> Result<Self> {
        let ummu_idx_mask = 1u64.checked_shl(ummu_mapping).ok_or_else(|| {
            ObmmError::invalid_argument(format!("ummu_map {ummu_mapping} exceeds mask width"))
        })?;
        Ok(Self::V1 {
            ummu_idx_mask,
            on_chip: true,
        })
    }

    /// Wire version tag
    #[must_use]
    pub const fn version(&self) -> u32 {
        match self {
            Self::V1 { .. } => TDEV_INFO_V1,
        }
    }

    fn to_raw(self) -> TdevInfoRaw {
        match self {
            Self::V1 {
                ummu_idx_mask,
                on_chip,
            } => TdevInfoRaw {
                ver: TDEV_INFO_V1,
                ummu_idx_mask,
                on_chip: u8::from(on_chip),
                ..TdevInfoRaw::zeroed()
            },
        }
    }
}

/// Encoded vendor info, owned for the span of one submission.
///
/// Release with [`VendorInfoBlob::release`] once the command has been
/// submitted; dropping it on any other path releases it as well.
#[derive(Debug)]
pub struct VendorInfoBlob {
    info: VendorInfo,
    bytes: Vec<u8>,
}

impl VendorInfoBlob {
    /// Encode `info`.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the buffer cannot be allocated and
    /// `InvalidArgument` if the encoding exceeds `OBMM_MAX_VENDOR_LEN`.
    pub fn encode(info: VendorInfo) -> Result<Self> {
        let raw = info.to_raw();
        let encoded = bytemuck::bytes_of(&raw);

        let mut bytes = Vec::new();
        bytes.try_reserve_exact(encoded.len()).map_err(|e| {
            ObmmError::out_of_memory(format!("vendor info ({} bytes): {e}", encoded.len()))
        })?;

        if encoded.len() > OBMM_MAX_VENDOR_LEN {
            return Err(ObmmError::invalid_argument(format!(
                "vendor info of {} bytes exceeds {OBMM_MAX_VENDOR_LEN}",
                encoded.len()
            )));
        }

        bytes.extend_from_slice(encoded);
        Ok(Self { info, bytes })
    }

    /// Decoded form
    #[must_use]
    pub const fn info(&self) -> &VendorInfo {
        &self.info
    }

    /// Encoded bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// `vendor_len` of the command
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn len(&self) -> u16 {
        // bounded by OBMM_MAX_VENDOR_LEN in encode()
        self.bytes.len() as u16
    }

    /// Never true for an encoded blob
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// `vendor_info` user pointer of the command
    #[must_use]
    pub fn user_ptr(&self) -> u64 {
        self.bytes.as_ptr() as u64
    }

    /// Release after submission.
    pub fn release(self) {
        tracing::trace!("Releasing vendor info {:?}", self.info);
    }
}

/// Build the vendor info for a region served by UMMU `ummu_mapping`.
///
/// # Errors
///
/// See [`VendorInfo::for_ummu`] and [`VendorInfoBlob::encode`].
pub fn build_vendor_info(ummu_mapping: u32) -> Result<VendorInfoBlob> {
    VendorInfoBlob::encode(VendorInfo::for_ummu(ummu_mapping)?)
}

/// Decode a blob as the driver would receive it.
///
/// # Errors
///
/// Returns `InvalidArgument` for a short buffer or unknown version.
pub fn decode_vendor_info(bytes: &[u8]) -> Result<VendorInfo> {
    let size = std::mem::size_of::<TdevInfoRaw>();
    let raw: TdevInfoRaw = bytes
        .get(..size)
        .map(bytemuck::pod_read_unaligned)
        .ok_or_else(|| {
            ObmmError::invalid_argument(format!(
                "vendor info of {} bytes, need {size}",
                bytes.len()
            ))
        })?;
    match raw.ver {
        TDEV_INFO_V1 => Ok(VendorInfo::V1 {
            ummu_idx_mask: raw.ummu_idx_mask,
            on_chip: raw.on_chip != 0,
        }),
        other => Err(ObmmError::invalid_argument(format!(
            "unknown vendor info version {other}"
        ))),
    }
}
