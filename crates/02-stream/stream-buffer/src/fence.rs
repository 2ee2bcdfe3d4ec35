//! Coarse fence tracking over a ring.
//!
//! The ring is split into [`SYNC_SLOTS`] equal ranges. Each range owns at
//! most one completion marker. Markers are inserted lazily, once the producer
//! has moved past a range, so one marker usually guards many small writes.
//! Before the producer writes into a range again it waits on that range's
//! marker and deletes it. The price is false contention of up to one slot's
//! width: a wait may block on GPU work unrelated to the bytes being reused.

use std::time::Duration;

use device_abi::{GpuDevice, WaitStatus};

use crate::cursor::{slot_of, RingCursor, SYNC_SLOTS};
use crate::{StreamError, StreamResult};

/// Fixed table of optional markers, one per slot.
///
/// A slot is either empty or holds a live marker. Reclaiming takes the marker
/// out, waits, and deletes it, so a waited-on marker can never linger.
pub(crate) struct FenceSlots<F> {
    slots: [Option<F>; SYNC_SLOTS],
}

impl<F> FenceSlots<F> {
    pub(crate) fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    pub(crate) fn occupancy(&self) -> [bool; SYNC_SLOTS] {
        std::array::from_fn(|slot| self.slots[slot].is_some())
    }

    pub(crate) fn live(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Inserts a marker guarding everything submitted so far into `slot`.
    ///
    /// A slot still holding an older marker is reclaimed first. That only
    /// happens when a large alignment jump skipped a slot without reclaiming it.
    pub(crate) fn checkpoint<D>(
        &mut self,
        device: &D,
        slot: usize,
        timeout: Option<Duration>,
    ) -> StreamResult<()>
    where
        D: GpuDevice<Fence = F>,
    {
        if self.slots[slot].is_some() {
            self.reclaim(device, slot, timeout)?;
        }
        self.slots[slot] = Some(device.insert_fence());
        Ok(())
    }

    /// Waits for the marker in `slot` (if any) and deletes it.
    ///
    /// On timeout the marker is put back so the slot stays guarded.
    pub(crate) fn reclaim<D>(
        &mut self,
        device: &D,
        slot: usize,
        timeout: Option<Duration>,
    ) -> StreamResult<()>
    where
        D: GpuDevice<Fence = F>,
    {
        let Some(fence) = self.slots[slot].take() else {
            return Ok(());
        };
        match device.client_wait(&fence, timeout) {
            Ok(WaitStatus::Signaled) => {
                device.delete_fence(fence);
                log::trace!("reclaimed sync slot {slot}");
                Ok(())
            }
            Ok(WaitStatus::TimedOut) => {
                self.slots[slot] = Some(fence);
                log::warn!("sync slot {slot} still busy after {timeout:?}");
                // `timeout` is always bounded here: an unbounded wait never times out.
                Err(StreamError::FenceTimeout {
                    slot,
                    timeout: timeout.unwrap_or(Duration::MAX),
                })
            }
            Err(err) => {
                self.slots[slot] = Some(fence);
                Err(err.into())
            }
        }
    }

    /// Reclaims every live slot.
    pub(crate) fn drain<D>(&mut self, device: &D, timeout: Option<Duration>) -> StreamResult<()>
    where
        D: GpuDevice<Fence = F>,
    {
        for slot in 0..SYNC_SLOTS {
            self.reclaim(device, slot, timeout)?;
        }
        Ok(())
    }

    /// Deletes every remaining marker without waiting on it.
    pub(crate) fn abandon<D>(&mut self, device: &D)
    where
        D: GpuDevice<Fence = F>,
    {
        for fence in self.slots.iter_mut().filter_map(Option::take) {
            device.delete_fence(fence);
        }
    }
}

/// Ring cursor plus the fence table guarding it.
pub(crate) struct SyncRing<F> {
    cursor: RingCursor,
    fences: FenceSlots<F>,
    capacity: usize,
    timeout: Option<Duration>,
}

impl<F> SyncRing<F> {
    pub(crate) fn new(capacity: usize, timeout: Option<Duration>) -> Self {
        Self {
            cursor: RingCursor::default(),
            fences: FenceSlots::new(),
            capacity,
            timeout,
        }
    }

    pub(crate) fn cursor(&self) -> RingCursor {
        self.cursor
    }

    pub(crate) fn occupancy(&self) -> [bool; SYNC_SLOTS] {
        self.fences.occupancy()
    }

    pub(crate) fn align(&mut self, stride: usize) {
        self.cursor.align(stride);
    }

    pub(crate) fn advance(&mut self, bytes: usize) {
        self.cursor.advance(bytes);
    }

    /// Makes `[write, write + size)` safe to overwrite and returns its offset.
    ///
    /// Checkpoints everything committed since the last call, waits for the
    /// slots the new range reaches into, and wraps to offset 0 when the range
    /// would run into the end of the buffer. Offset 0 is aligned for every
    /// stride, so no realignment is needed after a wrap.
    pub(crate) fn allocate<D>(&mut self, device: &D, size: usize) -> StreamResult<usize>
    where
        D: GpuDevice<Fence = F>,
    {
        self.checkpoint_range(device, slot_of(self.cursor.used, self.capacity), self.write_slot())?;
        self.cursor.used = self.cursor.write;

        let end = self.cursor.write + size;
        // Alignment may have pushed `write` past `free`; the skipped bytes are never reused.
        let start = self.cursor.free.max(self.cursor.write);
        self.reclaim_range(device, slot_of(start, self.capacity), slot_of(end, self.capacity))?;
        self.cursor.free = end;

        if end >= self.capacity {
            self.checkpoint_range(device, slot_of(self.cursor.used, self.capacity), SYNC_SLOTS)?;
            self.cursor.rewind();
            self.cursor.free = 0;
            log::trace!("stream ring wrapped (capacity {}, request {size})", self.capacity);

            self.reclaim_range(device, 0, slot_of(size, self.capacity))?;
            self.cursor.free = size;
        }
        Ok(self.cursor.write)
    }

    /// Waits until the GPU is done with every committed byte, then deletes
    /// every marker. Leaves the table empty on success.
    ///
    /// Bytes committed since the last checkpoint, and draws that reuse
    /// already fenced bytes, are guarded by one last marker inserted behind
    /// all submitted work. A ring that never committed anything does not wait.
    pub(crate) fn drain<D>(&mut self, device: &D) -> StreamResult<()>
    where
        D: GpuDevice<Fence = F>,
    {
        if self.cursor.write > self.cursor.used || self.fences.live() > 0 {
            let slot = self.write_slot().min(SYNC_SLOTS - 1);
            self.fences.checkpoint(device, slot, self.timeout)?;
            self.cursor.used = self.cursor.write;
            self.fences.reclaim(device, slot, self.timeout)?;
        }
        self.fences.drain(device, self.timeout)
    }

    pub(crate) fn abandon<D>(&mut self, device: &D)
    where
        D: GpuDevice<Fence = F>,
    {
        let live = self.fences.live();
        if live > 0 {
            log::error!("abandoning {live} unsignalled stream fences");
        }
        self.fences.abandon(device);
    }

    fn write_slot(&self) -> usize {
        slot_of(self.cursor.write, self.capacity)
    }

    /// Checkpoints slots `[first, end)`, clamped to the table.
    fn checkpoint_range<D>(&mut self, device: &D, first: usize, end: usize) -> StreamResult<()>
    where
        D: GpuDevice<Fence = F>,
    {
        for slot in first..end.min(SYNC_SLOTS) {
            self.fences.checkpoint(device, slot, self.timeout)?;
        }
        Ok(())
    }

    /// Reclaims slots `[first, last]`, clamped to the table.
    ///
    /// `first` is the slot holding the first byte not yet confirmed free. It
    /// was reclaimed when the free offset entered it and is normally empty;
    /// starting there lets a call that failed on a timeout be retried without
    /// skipping it.
    fn reclaim_range<D>(&mut self, device: &D, first: usize, last: usize) -> StreamResult<()>
    where
        D: GpuDevice<Fence = F>,
    {
        for slot in first..=last.min(SYNC_SLOTS - 1) {
            self.fences.reclaim(device, slot, self.timeout)?;
        }
        Ok(())
    }
}
