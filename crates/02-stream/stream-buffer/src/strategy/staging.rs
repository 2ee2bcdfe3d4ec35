//! Private host block copied into the device buffer on every commit.
//!
//! Every region starts at offset 0; the copy completes before `unmap`
//! returns, so the block can be rewritten immediately.

use device_abi::{BufferRole, GpuDevice};

use super::Mapping;
use crate::region::HostRegion;
use crate::StreamResult;

/// Alignment of the private host block.
pub(crate) const STAGING_ALIGNMENT: usize = 64;

pub(crate) struct StagingCopy<D: GpuDevice> {
    buffer: D::Buffer,
    host: HostRegion,
}

impl<D: GpuDevice> StagingCopy<D> {
    pub(crate) fn new(device: &D, role: BufferRole, capacity: usize) -> StreamResult<Self> {
        let host = HostRegion::new_aligned(capacity, STAGING_ALIGNMENT)?;
        Ok(Self {
            buffer: device.create_buffer(role, capacity)?,
            host,
        })
    }

    pub(crate) fn buffer(&self) -> &D::Buffer {
        &self.buffer
    }

    pub(crate) fn map(&mut self, size: usize) -> Mapping {
        Mapping {
            ptr: self.host.as_non_null(),
            offset: 0,
            len: size,
        }
    }

    pub(crate) fn unmap(&mut self, device: &D, used: usize) -> StreamResult<()> {
        // An empty commit leaves the previous contents in place.
        if used == 0 {
            return Ok(());
        }
        device.upload(&self.buffer, &self.host.as_slice()[..used])?;
        Ok(())
    }

    pub(crate) fn release(self, device: &D) {
        device.destroy_buffer(self.buffer);
    }
}
