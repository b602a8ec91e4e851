//! Userspace mediation layer for the OBMM inter-node shared-memory driver.
//!
//! Callers export local memory to a remote endpoint, import memory another
//! node exported, and manage pre-import windows and range ownership. Every
//! request travels to the kernel through `/dev/obmm`; before it does, a
//! vendor adaptor resolves the endpoint (EID) to the local UB bus controller
//! that owns it and fills in what the hardware needs.
//!
//! # Layers
//!
//! ```text
//! Obmm (api)             export / import / preimport / query / ownership
//!   VendorAdaptor        UbAdaptor: vendor info, NUMA node, CNA checks
//!     UbcTree            <root>/ub_bus_controller<N>/*/ubc discovery
//!       read_attr        strtol-style integer attributes
//!   ChannelCache         lazily opened, shared control channel
//!     DeviceChannel      ioctl(2) on /dev/obmm
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use obmm_driver::{Eid, ExportFlags, MemDesc, Obmm};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let obmm = Obmm::from_env();
//!
//! let mut desc = MemDesc::new(Eid::from_u128(5));
//! let mem_id = obmm.export(&[128 << 20], ExportFlags::ALLOW_MMAP, &mut desc)?;
//! desc.save(&obmm.config().desc_dir, mem_id)?;
//!
//! println!("exported {mem_id}: uba {:#x}, token {}", desc.addr, desc.tokenid);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod adaptor;
mod api;
pub mod attr;
pub mod channel;
pub mod config;
mod desc;
pub mod discovery;
mod eid;
mod error;
pub mod flags;
pub mod ownership;
pub mod vendor;

/// Kernel ABI (re-exported from obmm-abi).
pub mod abi {
    pub use obmm_abi::*;
}

pub use adaptor::{ExportAdaptation, UbAdaptor, VendorAdaptor};
pub use api::{Imported, Obmm};
pub use channel::{ChannelCache, ControlChannel, ControlRequest, DeviceChannel};
pub use config::ObmmConfig;
pub use desc::{MemDesc, PreimportInfo};
pub use discovery::{BusControllerNode, Controller, ControllerInfo, UbcTree};
pub use eid::Eid;
pub use error::{ObmmError, Result};
pub use flags::{
    ExportFlags, ImportFlags, PreimportFlags, UbPrivData, UnexportFlags, UnimportFlags,
};
pub use obmm_abi::{MemId, NUMA_NO_NODE, OBMM_INVALID_MEMID};
pub use ownership::Ownership;
pub use vendor::{VendorInfo, VendorInfoBlob};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        Eid, ExportFlags, ImportFlags, Imported, MemDesc, MemId, Obmm, ObmmConfig, ObmmError,
        Ownership, PreimportFlags, PreimportInfo, Result, UnexportFlags, UnimportFlags,
    };
}
