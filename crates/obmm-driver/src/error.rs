//! Error types for OBMM operations

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for OBMM operations
pub type Result<T> = std::result::Result<T, ObmmError>;

/// Errors that can occur during OBMM operations
#[derive(Debug, Error)]
pub enum ObmmError {
    /// No bus controller or channel adapter owns the endpoint
    #[error("No such device: {reason}")]
    NoSuchDevice {
        /// Reason for failure
        reason: String,
    },

    /// Caller passed a value the driver must never see
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Reason for failure
        reason: String,
    },

    /// Allocation for a command payload failed
    #[error("Out of memory: {reason}")]
    OutOfMemory {
        /// Reason for failure
        reason: String,
    },

    /// A sysfs attribute could not be read or parsed
    #[error("Bad attribute {}: {reason}", path.display())]
    Attribute {
        /// Attribute file
        path: PathBuf,
        /// Reason for failure
        reason: String,
    },

    /// Control device could not be opened
    #[error("Cannot open {}: {source}", path.display())]
    DeviceOpen {
        /// Device path
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The driver rejected a request
    #[error("{request} failed: {source}")]
    Driver {
        /// Request name
        request: &'static str,
        /// Error reported by the driver
        source: std::io::Error,
    },

    /// I/O error outside device submission
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Descriptor (de)serialization failed
    #[error("Descriptor JSON: {source}")]
    Json {
        /// Underlying serde error
        #[from]
        source: serde_json::Error,
    },
}

impl ObmmError {
    /// Create a no-such-device error
    pub fn no_such_device(reason: impl Into<String>) -> Self {
        Self::NoSuchDevice {
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create an out-of-memory error
    pub fn out_of_memory(reason: impl Into<String>) -> Self {
        Self::OutOfMemory {
            reason: reason.into(),
        }
    }

    /// Create an attribute error
    pub fn attribute(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Attribute {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// POSIX error number for callers that speak errno.
    pub fn errno(&self) -> i32 {
        match self {
            Self::NoSuchDevice { .. } => libc::ENODEV,
            Self::InvalidArgument { .. } | Self::Json { .. } => libc::EINVAL,
            Self::OutOfMemory { .. } => libc::ENOMEM,
            Self::Attribute { .. } => libc::EIO,
            Self::DeviceOpen { source, .. }
            | Self::Driver { source, .. }
            | Self::Io { source } => source.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}
