//! Request flag sets

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Export flags
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExportFlags: u64 {
        /// Exported region may be mmap'ed by the importer
        const ALLOW_MMAP = 1 << 0;
        /// Importer may online the region as a remote NUMA node
        const REMOTE_NUMA = 1 << 1;
    }
}

bitflags! {
    /// Unexport flags
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UnexportFlags: u64 {
        /// Tear down even while importers still hold the region
        const FORCE = 1 << 0;
    }
}

bitflags! {
    /// Import flags
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ImportFlags: u64 {
        /// Imported region may be mmap'ed
        const ALLOW_MMAP = 1 << 0;
        /// Import into a window declared by a pre-import
        const PREIMPORT = 1 << 1;
        /// Online the region as a remote NUMA node
        const NUMA_REMOTE = 1 << 2;
    }
}

bitflags! {
    /// Unimport flags
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UnimportFlags: u64 {
        /// Tear down even while mappings remain
        const FORCE = 1 << 0;
    }
}

bitflags! {
    /// Pre-import flags
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PreimportFlags: u64 {
        /// Regions imported into the window may be mmap'ed
        const ALLOW_MMAP = 1 << 0;
    }
}

bitflags! {
    /// Private payload for UB memory regions
    #[derive(Serialize, Deserialize, Default, Debug, Clone, Copy, PartialEq, Eq)]
    #[serde(transparent)]
    pub struct UbPrivData: u16 {
        /// Owner chip id present
        const OCHIP = 1 << 5;
        /// Region is cacheable
        const CACHEABLE = 1 << 6;
    }
}

impl ImportFlags {
    /// Whether `base_dist` reaches the driver and must be range checked.
    #[must_use]
    pub fn checks_base_dist(self) -> bool {
        self.contains(Self::NUMA_REMOTE) && !self.contains(Self::PREIMPORT)
    }
}
