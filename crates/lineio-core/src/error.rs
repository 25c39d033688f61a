//! Error types for GPIO line operations

use crate::line::Direction;
use crate::uapi::RequestKind;
use thiserror::Error;

/// Errors reported by resolution, line handles and providers
#[derive(Debug, Error)]
pub enum Error {
    /// Pin number or line name does not resolve to any line
    #[error("GPIO line not found: {0}")]
    NotFound(String),

    /// Operation is not valid for the line's configured direction
    #[error("Cannot {operation} a line configured as {direction}")]
    WrongMode {
        /// What was attempted
        operation: &'static str,
        /// Direction the line was opened with
        direction: Direction,
    },

    /// Edge interrupts are not available on the controller
    #[error("Edge interrupts not available on {0}")]
    Unsupported(String),

    /// The device-control call itself failed
    #[error("Device request '{request}' failed: errno {code}")]
    DeviceOperationFailed {
        /// Failed request
        request: RequestKind,
        /// errno returned by the kernel
        code: i32,
    },

    /// Failed to open a controller device node
    #[error("Failed to open {path}: {source}")]
    OpenFailed {
        /// Device node path
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Readiness wait, event read or directory listing failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration or argument
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Operation attempted after `close()`
    #[error("GPIO line used after close")]
    UseAfterClose,
}

impl Error {
    /// Shorthand for a failed device-control call
    pub fn device(request: RequestKind, code: i32) -> Self {
        Self::DeviceOperationFailed { request, code }
    }

    /// True for a permission-denied failure while opening a device node
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            Self::OpenFailed { source, .. }
                if source.kind() == std::io::ErrorKind::PermissionDenied
        )
    }
}

/// Result type for GPIO line operations
pub type Result<T> = std::result::Result<T, Error>;
