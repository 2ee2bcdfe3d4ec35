use thiserror::Error;

pub type DeviceResult<T> = Result<T, DeviceError>;

/// Failures reported by a [`crate::GpuDevice`] implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("failed to allocate {size} bytes of buffer storage")]
    AllocationFailed { size: usize },

    #[error("failed to map range at offset {offset} with length {len}")]
    MapFailed { offset: usize, len: usize },

    #[error("buffer handle does not belong to this device")]
    UnknownBuffer,

    #[error("client wait on fence failed")]
    WaitFailed,
}
