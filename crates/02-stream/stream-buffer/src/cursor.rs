//! Ring cursor arithmetic.
//!
//! Three offsets into a buffer of `capacity` bytes:
//!
//! ```text
//! 0           used         write              free         capacity
//! |-----------|------------|------------------|------------|
//!  checkpointed  committed,    reserved for the   not yet
//!  by fences     no fence yet  current request    reclaimed
//! ```
//!
//! Between allocations `used <= write <= free <= capacity`. A wrap resets
//! `used` and `write` to zero together.

/// Number of fence slots the ring is divided into.
pub const SYNC_SLOTS: usize = 16;

/// Snapshot of a ring's producer-side offsets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RingCursor {
    pub(crate) write: usize,
    pub(crate) used: usize,
    pub(crate) free: usize,
}

impl RingCursor {
    /// Next unwritten offset.
    pub fn write(&self) -> usize {
        self.write
    }

    /// Offset up to which committed data is guarded by fences.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Offset up to which space has been confirmed free.
    pub fn free(&self) -> usize {
        self.free
    }

    /// Rounds `write` up to a multiple of `stride`.
    ///
    /// A cursor at zero is aligned for every stride and is left alone, as is
    /// any cursor when `stride` is zero.
    pub fn align(&mut self, stride: usize) {
        if self.write != 0 && stride != 0 {
            let last = self.write - 1;
            self.write = last - last % stride + stride;
        }
    }

    pub(crate) fn advance(&mut self, bytes: usize) {
        self.write += bytes;
    }

    pub(crate) fn rewind(&mut self) {
        self.write = 0;
        self.used = 0;
    }
}

/// Slot covering byte `offset` of a ring of `capacity` bytes.
///
/// `offset == capacity` maps to [`SYNC_SLOTS`], one past the last slot;
/// callers bound their loops accordingly.
#[inline]
pub(crate) fn slot_of(offset: usize, capacity: usize) -> usize {
    debug_assert!(capacity > 0);
    ((offset as u128 * SYNC_SLOTS as u128) / capacity as u128) as usize
}
