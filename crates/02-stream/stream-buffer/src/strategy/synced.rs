//! Unsynchronized mapping into a fenced ring.
//!
//! Same appends as orphaning, but the storage is allocated once and reuse is
//! guarded by fences instead of reallocation.

use std::time::Duration;

use device_abi::{BufferRole, GpuDevice};

use super::Mapping;
use crate::fence::SyncRing;
use crate::StreamResult;

pub(crate) struct FenceSynced<D: GpuDevice> {
    buffer: D::Buffer,
    ring: SyncRing<D::Fence>,
}

impl<D: GpuDevice> FenceSynced<D> {
    pub(crate) fn new(
        device: &D,
        role: BufferRole,
        capacity: usize,
        timeout: Option<Duration>,
    ) -> StreamResult<Self> {
        Ok(Self {
            buffer: device.create_buffer(role, capacity)?,
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
        let ptr = device.map_range(&self.buffer, offset, size)?;
        Ok(Mapping {
            ptr,
            offset,
            len: size,
        })
    }

    pub(crate) fn unmap(&mut self, device: &D, used: usize) -> StreamResult<()> {
        device.flush_and_unmap(&self.buffer, used)?;
        self.ring.advance(used);
        Ok(())
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
