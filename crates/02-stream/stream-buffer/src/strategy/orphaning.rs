//! Unsynchronized appends with orphaning on overflow.
//!
//! Needs no fences: when a request would run into the end of the buffer the
//! storage is orphaned and the cursor restarts at zero. The driver keeps the
//! old storage alive for in-flight draws, at the cost of a reallocation per lap.

use device_abi::{BufferRole, GpuDevice};

use super::Mapping;
use crate::cursor::RingCursor;
use crate::StreamResult;

pub(crate) struct Orphaning<D: GpuDevice> {
    buffer: D::Buffer,
    cursor: RingCursor,
    capacity: usize,
}

impl<D: GpuDevice> Orphaning<D> {
    pub(crate) fn new(device: &D, role: BufferRole, capacity: usize) -> StreamResult<Self> {
        Ok(Self {
            buffer: device.create_buffer(role, capacity)?,
            cursor: RingCursor::default(),
            capacity,
        })
    }

    pub(crate) fn buffer(&self) -> &D::Buffer {
        &self.buffer
    }

    pub(crate) fn cursor(&self) -> RingCursor {
        self.cursor
    }

    pub(crate) fn map(&mut self, device: &D, size: usize, stride: usize) -> StreamResult<Mapping> {
        self.cursor.align(stride);
        if self.cursor.write + size >= self.capacity {
            device.orphan(&self.buffer)?;
            self.cursor.rewind();
            log::trace!("orphaned stream buffer (capacity {})", self.capacity);
        }
        let offset = self.cursor.write;
        let ptr = device.map_range(&self.buffer, offset, size)?;
        Ok(Mapping {
            ptr,
            offset,
            len: size,
        })
    }

    pub(crate) fn unmap(&mut self, device: &D, used: usize) -> StreamResult<()> {
        device.flush_and_unmap(&self.buffer, used)?;
        self.cursor.advance(used);
        Ok(())
    }

    pub(crate) fn release(self, device: &D) {
        device.destroy_buffer(self.buffer);
    }
}
