//! The producer-facing stream buffer.

use std::ops::{Deref, DerefMut};

use device_abi::{BufferRole, DriverProfile, GpuDevice};

use crate::cursor::{RingCursor, SYNC_SLOTS};
use crate::strategy::{Mapping, Strategy};
use crate::{select_strategy, StrategyKind, StreamConfig, StreamError, StreamResult};

/// A fixed-capacity device buffer that accepts a stream of small writes.
///
/// One producer thread owns the buffer. Each [`StreamBuffer::map`] returns a
/// [`StreamRegion`] to fill; committing it publishes the bytes at
/// [`StreamRegion::offset`] for the draw calls that follow. Regions handed out
/// by a ring strategy never overlap data the GPU may still read. The buffer
/// may move to another thread whenever the device handles can.
pub struct StreamBuffer<D: GpuDevice> {
    device: D,
    role: BufferRole,
    capacity: usize,
    strategy: Option<Strategy<D>>,
}

impl<D: GpuDevice> StreamBuffer<D> {
    /// Builds a buffer of `size` bytes using the best strategy for `profile`,
    /// unless `config` overrides the choice.
    pub fn create(
        device: D,
        role: BufferRole,
        size: usize,
        profile: &DriverProfile,
        config: &StreamConfig,
    ) -> StreamResult<Self> {
        let kind = match config.strategy_override {
            Some(kind) => {
                log::debug!("stream buffer strategy overridden to {kind} for {role:?}");
                kind
            }
            None => {
                let kind = select_strategy(role, profile);
                log::debug!("selected {kind} stream buffer for {role:?}");
                kind
            }
        };
        Self::with_strategy(device, role, size, kind, config)
    }

    /// Builds a buffer of `size` bytes backed by `kind`.
    pub fn with_strategy(
        device: D,
        role: BufferRole,
        size: usize,
        kind: StrategyKind,
        config: &StreamConfig,
    ) -> StreamResult<Self> {
        config.validate()?;
        if size == 0 {
            return Err(StreamError::InvalidConfig(
                "stream buffer capacity must be non-zero",
            ));
        }
        let strategy = Strategy::create(&device, kind, role, size, config.fence_timeout())?;
        log::debug!("created {kind} stream buffer: {size} bytes for {role:?}");
        Ok(Self {
            device,
            role,
            capacity: size,
            strategy: Some(strategy),
        })
    }

    /// Reserves `size` writable bytes, aligned to `stride` when the strategy
    /// streams through a ring.
    ///
    /// Blocks while the GPU still reads the target range. Fails with
    /// [`StreamError::FenceTimeout`] when that wait exceeds the configured bound.
    ///
    /// # Panics
    ///
    /// Panics if `size` exceeds the buffer capacity.
    pub fn map(&mut self, size: usize, stride: usize) -> StreamResult<StreamRegion<'_, D>> {
        assert!(
            size <= self.capacity,
            "stream request of {size} bytes exceeds capacity {}",
            self.capacity
        );
        let mapping = {
            let (device, strategy) = self.parts();
            strategy.map(device, size, stride)?
        };
        Ok(StreamRegion {
            stream: self,
            mapping,
            committed: false,
        })
    }

    /// Copies `data` into a fresh region and commits all of it.
    ///
    /// Returns the offset the data was written to.
    pub fn push(&mut self, data: &[u8], stride: usize) -> StreamResult<usize> {
        let mut region = self.map(data.len(), stride)?;
        region.copy_from_slice(data);
        let offset = region.offset();
        region.commit(data.len())?;
        Ok(offset)
    }

    pub fn kind(&self) -> StrategyKind {
        self.strategy().kind()
    }

    pub fn role(&self) -> BufferRole {
        self.role
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Device buffer draw calls should bind.
    pub fn buffer(&self) -> &D::Buffer {
        self.strategy().buffer()
    }

    /// Producer offsets, for strategies that stream through a ring.
    pub fn cursor(&self) -> Option<RingCursor> {
        self.strategy().cursor()
    }

    /// Which sync slots currently hold a fence, for fenced strategies.
    pub fn pending_slots(&self) -> Option<[bool; SYNC_SLOTS]> {
        self.strategy().pending_slots()
    }

    /// Waits until the GPU is done with the buffer and releases all resources.
    ///
    /// Ring strategies fence everything submitted so far, so draws issued after
    /// the last commit finish before the storage goes away. Resources are
    /// released even when a wait fails; the failure is returned.
    pub fn destroy(mut self) -> StreamResult<()> {
        match self.strategy.take() {
            Some(strategy) => strategy.release(&self.device),
            None => Ok(()),
        }
    }

    fn strategy(&self) -> &Strategy<D> {
        self.strategy.as_ref().expect("strategy present until destroy")
    }

    fn parts(&mut self) -> (&D, &mut Strategy<D>) {
        let strategy = self.strategy.as_mut().expect("strategy present until destroy");
        (&self.device, strategy)
    }

    fn finish_region(&mut self, used: usize) -> StreamResult<()> {
        let (device, strategy) = self.parts();
        strategy.unmap(device, used)
    }
}

impl<D: GpuDevice> Drop for StreamBuffer<D> {
    fn drop(&mut self) {
        if let Some(strategy) = self.strategy.take() {
            let kind = strategy.kind();
            if let Err(err) = strategy.release(&self.device) {
                log::error!("failed to tear down {kind} stream buffer cleanly: {err}");
            }
        }
    }
}

/// Writable bytes reserved by [`StreamBuffer::map`].
///
/// Dereferences to exactly the requested number of bytes. Finalize it with
/// [`StreamRegion::commit`]; a region dropped without committing publishes
/// nothing.
pub struct StreamRegion<'a, D: GpuDevice> {
    stream: &'a mut StreamBuffer<D>,
    mapping: Mapping,
    committed: bool,
}

impl<D: GpuDevice> StreamRegion<'_, D> {
    /// Offset of the region within the device buffer.
    pub fn offset(&self) -> usize {
        self.mapping.offset
    }

    pub fn len(&self) -> usize {
        self.mapping.len
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.len == 0
    }

    /// Publishes the first `used` bytes and advances the stream.
    ///
    /// # Panics
    ///
    /// Panics if `used` exceeds the reserved length.
    pub fn commit(mut self, used: usize) -> StreamResult<()> {
        assert!(
            used <= self.mapping.len,
            "committed {used} bytes into a region of {}",
            self.mapping.len
        );
        self.committed = true;
        self.stream.finish_region(used)
    }
}

impl<D: GpuDevice> Deref for StreamRegion<'_, D> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the strategy guarantees `len` writable bytes at `ptr` until
        // the region is finalized, and the region borrows the stream mutably.
        unsafe { std::slice::from_raw_parts(self.mapping.ptr.as_ptr(), self.mapping.len) }
    }
}

impl<D: GpuDevice> DerefMut for StreamRegion<'_, D> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as for `deref`; `&mut self` makes this view unique.
        unsafe { std::slice::from_raw_parts_mut(self.mapping.ptr.as_ptr(), self.mapping.len) }
    }
}

impl<D: GpuDevice> Drop for StreamRegion<'_, D> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        log::warn!(
            "stream region at offset {} dropped without commit",
            self.mapping.offset
        );
        if let Err(err) = self.stream.finish_region(0) {
            log::error!("failed to release uncommitted stream region: {err}");
        }
    }
}
