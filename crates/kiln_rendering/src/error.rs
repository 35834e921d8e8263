//! # Rendering Error Types
//!
//! Backend failures are kept apart from substrate failures so callers can
//! tell a device problem from an exhausted pool.

use kiln_core::CoreError;
use thiserror::Error;

use crate::backend::BufferHandle;

/// Errors reported by a [`GpuBackend`](crate::backend::GpuBackend).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend has no device path for this operation.
    #[error("operation not implemented by this backend")]
    Unimplemented,

    /// The device refused the allocation.
    #[error("out of device memory")]
    OutOfDeviceMemory,

    /// The handle was never created by this backend or is already destroyed.
    #[error("unknown buffer handle {0:?}")]
    UnknownHandle(BufferHandle),

    /// Any other device failure.
    #[error("device error: {0}")]
    Device(String),
}

/// Errors that can occur in the rendering layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// Allocator or job-system failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Device backend failure.
    #[error("backend: {0}")]
    Backend(#[from] BackendError),

    /// The buffer was allocated by a different pool.
    #[error("buffer belongs to pool {owner}, not pool {pool}")]
    ForeignBuffer {
        /// Pool that allocated the buffer.
        owner: u64,
        /// Pool it was returned to.
        pool: u64,
    },
}

/// Result type for rendering operations.
pub type RenderResult<T> = Result<T, RenderError>;
