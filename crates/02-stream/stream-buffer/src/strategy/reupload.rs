//! Private host block; the buffer storage is respecified on every commit.
//!
//! Used where the driver mishandles partial streaming updates. The buffer is
//! created empty and resized to exactly the committed length each time.

use device_abi::{BufferRole, GpuDevice};

use super::staging::STAGING_ALIGNMENT;
use super::Mapping;
use crate::region::HostRegion;
use crate::StreamResult;

pub(crate) struct FullReupload<D: GpuDevice> {
    buffer: D::Buffer,
    host: HostRegion,
}

impl<D: GpuDevice> FullReupload<D> {
    pub(crate) fn new(device: &D, role: BufferRole, capacity: usize) -> StreamResult<Self> {
        let host = HostRegion::new_aligned(capacity, STAGING_ALIGNMENT)?;
        Ok(Self {
            buffer: device.create_buffer(role, 0)?,
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
        device.respecify(&self.buffer, &self.host.as_slice()[..used])?;
        Ok(())
    }

    pub(crate) fn release(self, device: &D) {
        device.destroy_buffer(self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_soft::SoftDevice;

    #[test]
    fn storage_tracks_committed_length() {
        let device = SoftDevice::new();
        let mut strategy = FullReupload::new(&device, BufferRole::Index, 64).unwrap();
        let id = strategy.buffer().id();
        assert_eq!(device.buffer_len(id), Some(0));

        let mapping = strategy.map(32);
        unsafe { mapping.ptr.as_ptr().write_bytes(3, 32) };
        strategy.unmap(&device, 12).unwrap();
        assert_eq!(device.buffer_len(id), Some(12));
        assert_eq!(device.read_buffer(id, 0, 12).unwrap(), vec![3u8; 12]);

        strategy.map(4);
        strategy.unmap(&device, 4).unwrap();
        assert_eq!(device.buffer_len(id), Some(4));
    }

    #[test]
    fn empty_commit_keeps_previous_storage() {
        let device = SoftDevice::new();
        let mut strategy = FullReupload::new(&device, BufferRole::Vertex, 64).unwrap();
        let id = strategy.buffer().id();

        let mapping = strategy.map(8);
        unsafe { mapping.ptr.as_ptr().write_bytes(5, 8) };
        strategy.unmap(&device, 8).unwrap();

        strategy.map(16);
        strategy.unmap(&device, 0).unwrap();
        assert_eq!(device.buffer_len(id), Some(8));
        assert_eq!(device.read_buffer(id, 0, 8).unwrap(), vec![5u8; 8]);
    }
}
