//! Fenced ring over storage that stays mapped for the buffer's lifetime.
//!
//! No map or unmap calls reach the driver per request; the storage is
//! coherent, so committing only moves the cursor.

use std::ptr::NonNull;
use std::time::Duration;

use device_abi::{BufferRole, GpuDevice};

use super::Mapping;
use crate::fence::SyncRing;
use crate::StreamResult;

pub(crate) struct Persistent<D: GpuDevice> {
    buffer: D::Buffer,
    base: NonNull<u8>,
    ring: SyncRing<D::Fence>,
}

// SAFETY: `base` points into the buffer's own mapping, which lives exactly as
// long as `buffer`. Only the owning producer writes through it.
unsafe impl<D: GpuDevice> Send for Persistent<D>
where
    D::Buffer: Send,
    D::Fence: Send,
{
}

impl<D: GpuDevice> Persistent<D> {
    pub(crate) fn new(
        device: &D,
        role: BufferRole,
        capacity: usize,
        timeout: Option<Duration>,
    ) -> StreamResult<Self> {
        let (buffer, base) = device.create_persistent_buffer(role, capacity)?;
        Ok(Self {
            buffer,
            base,
            ring: SyncRing::new(capacity, timeout),
        })
    }

    pub(crate) fn buffer(&self) -> &D::Buffer {
        &self.buffer
    }

    pub(crate) fn ring(&self) -> &SyncRing<D::Fence> {
        &self.ring
    }

    pub(crate) fn map(&mut self, device: &D, size: usize, stride: usize) -> StreamResult<Mapping> {
        self.ring.align(stride);
        let offset = self.ring.allocate(device, size)?;
        // SAFETY: `allocate` keeps `offset + size` within the mapped capacity.
        let ptr = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) };
        Ok(Mapping {
            ptr,
            offset,
            len: size,
        })
    }

    pub(crate) fn unmap(&mut self, used: usize) {
        self.ring.advance(used);
    }

    pub(crate) fn release(mut self, device: &D) -> StreamResult<()> {
        let drained = self.ring.drain(device);
        if drained.is_err() {
            self.ring.abandon(device);
        }
        device.destroy_buffer(self.buffer);
        drained
    }
}
