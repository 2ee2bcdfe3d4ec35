use std::time::Duration;

use device_abi::DeviceError;
use thiserror::Error;

pub type StreamResult<T> = Result<T, StreamError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("failed to allocate {size} bytes of host memory aligned to {alignment}")]
    HostAllocationFailed { size: usize, alignment: usize },

    #[error("fence guarding sync slot {slot} did not signal within {timeout:?}")]
    FenceTimeout { slot: usize, timeout: Duration },

    #[error("invalid stream buffer configuration: {0}")]
    InvalidConfig(&'static str),
}
