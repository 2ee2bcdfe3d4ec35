//! Fenced ring over page-aligned host memory registered with the driver.
//!
//! The host block must outlive every GPU read of it. Teardown waits, within
//! the configured fence timeout, for a last marker behind all submitted work,
//! then destroys the buffer and frees the block. If that wait fails the block
//! is leaked instead.

use std::mem;
use std::ptr::NonNull;
use std::time::Duration;

use device_abi::{BufferRole, GpuDevice};

use super::Mapping;
use crate::fence::SyncRing;
use crate::region::HostRegion;
use crate::StreamResult;

pub(crate) struct Pinned<D: GpuDevice> {
    buffer: D::Buffer,
    host: HostRegion,
    ring: SyncRing<D::Fence>,
}

impl<D: GpuDevice> Pinned<D> {
    pub(crate) fn new(
        device: &D,
        role: BufferRole,
        capacity: usize,
        timeout: Option<Duration>,
    ) -> StreamResult<Self> {
        let mut host = HostRegion::pages(capacity)?;
        // SAFETY: `host` is owned by the returned value and only freed after
        // the buffer is destroyed and the final fence has signalled, and is
        // leaked if that wait fails.
        let buffer = unsafe { device.import_host_memory(role, host.as_non_null(), host.len())? };
        Ok(Self {
            buffer,
            host,
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
        // SAFETY: the host block spans at least `capacity` bytes.
        let ptr = unsafe { NonNull::new_unchecked(self.host.as_non_null().as_ptr().add(offset)) };
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
        match drained {
            Ok(()) => Ok(()),
            Err(err) => {
                // The device may still read the block; leak it rather than free it under the GPU.
                log::error!(
                    "leaking {} bytes of pinned host memory after failed drain: {err}",
                    self.host.len()
                );
                mem::forget(self.host);
                Err(err)
            }
        }
    }
}
