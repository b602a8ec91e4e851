//! Memory and pre-import descriptors
//!
//! A [`MemDesc`] is produced by an export on one node, shipped out of band
//! (as JSON) and fed to an import on another node.

use crate::eid::Eid;
use crate::error::{ObmmError, Result};
use crate::flags::UbPrivData;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Memory region descriptor
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemDesc {
    /// Bus address of the region
    pub addr: u64,
    /// Length of the region
    pub length: u64,
    /// Source endpoint
    pub seid: Eid,
    /// Destination endpoint
    pub deid: Eid,
    /// Token id issued by the exporter
    pub tokenid: u32,
    /// Source channel adapter
    pub scna: u32,
    /// Destination channel adapter
    pub dcna: u32,
    /// Opaque private payload
    #[serde(default)]
    pub priv_data: Vec<u8>,
}

/// Pre-import window descriptor
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreimportInfo {
    /// Physical base of the window
    pub pa: u64,
    /// Window length
    pub length: u64,
    /// Distance hint, `0..=255`
    pub base_dist: i32,
    /// NUMA hint; replaced by the driver's choice on success
    pub numa_id: i32,
    /// Source endpoint
    pub seid: Eid,
    /// Destination endpoint
    pub deid: Eid,
    /// Source channel adapter
    pub scna: u32,
    /// Destination channel adapter
    pub dcna: u32,
    /// Opaque private payload
    #[serde(default)]
    pub priv_data: Vec<u8>,
}

/// Length of a private payload as the driver sees it.
pub(crate) fn priv_len(priv_data: &[u8]) -> Result<u16> {
    u16::try_from(priv_data.len()).map_err(|_| {
        ObmmError::invalid_argument(format!(
            "private payload of {} bytes exceeds {}",
            priv_data.len(),
            u16::MAX
        ))
    })
}

/// Check a distance hint and narrow it to the driver's byte.
pub(crate) fn base_dist(value: i32) -> Result<u8> {
    u8::try_from(value).map_err(|_| {
        ObmmError::invalid_argument(format!("base_dist {value} outside 0..=255"))
    })
}

impl MemDesc {
    /// Create a descriptor targeting `deid`
    #[must_use]
    pub fn new(deid: Eid) -> Self {
        Self {
            deid,
            ..Self::default()
        }
    }

    /// Length of the private payload
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the payload exceeds 16 bits of length.
    pub fn priv_len(&self) -> Result<u16> {
        priv_len(&self.priv_data)
    }

    /// Store UB private data as the payload (2 bytes, little endian)
    pub fn set_ub_priv(&mut self, data: UbPrivData) {
        self.priv_data = data.bits().to_le_bytes().to_vec();
    }

    /// Interpret the payload as UB private data
    #[must_use]
    pub fn ub_priv(&self) -> Option<UbPrivData> {
        let bytes: [u8; 2] = self.priv_data.as_slice().try_into().ok()?;
        UbPrivData::from_bits(u16::from_le_bytes(bytes))
    }

    /// Serialize to JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// File a descriptor for `mem_id` is stored in under `dir`
    #[must_use]
    pub fn file_path(dir: &Path, mem_id: u64) -> PathBuf {
        dir.join(format!("memdesc_{mem_id}.json"))
    }

    /// Write the descriptor to `<dir>/memdesc_<mem_id>.json`
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file written.
    pub fn save(&self, dir: &Path, mem_id: u64) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = Self::file_path(dir, mem_id);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        tracing::debug!("Saved descriptor for mem_id {mem_id} to {}", path.display());
        Ok(path)
    }

    /// Read the descriptor stored for `mem_id`
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or malformed.
    pub fn load(dir: &Path, mem_id: u64) -> Result<Self> {
        let path = Self::file_path(dir, mem_id);
        let json = std::fs::read_to_string(&path)?;
        Self::from_json(&json)
    }
}

impl PreimportInfo {
    /// Length of the private payload
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the payload exceeds 16 bits of length.
    pub fn priv_len(&self) -> Result<u16> {
        priv_len(&self.priv_data)
    }
}
