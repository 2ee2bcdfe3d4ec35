//! The six streaming strategies behind one closed enum.
//!
//! Every variant implements the same producer contract:
//! `map(size, stride)` hands out `size` writable bytes and the offset they
//! will occupy in the device buffer, and `unmap(used)` publishes the first
//! `used` of them. The ring-based variants share [`crate::fence::SyncRing`];
//! the upload variants always stream to offset 0.

mod orphaning;
mod persistent;
mod pinned;
mod reupload;
mod staging;
mod synced;

use std::ptr::NonNull;
use std::time::Duration;

use device_abi::{BufferRole, GpuDevice};

use crate::cursor::{RingCursor, SYNC_SLOTS};
use crate::{StrategyKind, StreamResult};

pub(crate) use orphaning::Orphaning;
pub(crate) use persistent::Persistent;
pub(crate) use pinned::Pinned;
pub(crate) use reupload::FullReupload;
pub(crate) use staging::StagingCopy;
pub(crate) use synced::FenceSynced;

/// Writable memory handed out by `map`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Mapping {
    pub(crate) ptr: NonNull<u8>,
    pub(crate) offset: usize,
    pub(crate) len: usize,
}

pub(crate) enum Strategy<D: GpuDevice> {
    Orphaning(Orphaning<D>),
    FenceSynced(FenceSynced<D>),
    Persistent(Persistent<D>),
    Pinned(Pinned<D>),
    StagingCopy(StagingCopy<D>),
    FullReupload(FullReupload<D>),
}

impl<D: GpuDevice> Strategy<D> {
    pub(crate) fn create(
        device: &D,
        kind: StrategyKind,
        role: BufferRole,
        capacity: usize,
        timeout: Option<Duration>,
    ) -> StreamResult<Self> {
        Ok(match kind {
            StrategyKind::Orphaning => Strategy::Orphaning(Orphaning::new(device, role, capacity)?),
            StrategyKind::FenceSynced => {
                Strategy::FenceSynced(FenceSynced::new(device, role, capacity, timeout)?)
            }
            StrategyKind::Persistent => {
                Strategy::Persistent(Persistent::new(device, role, capacity, timeout)?)
            }
            StrategyKind::Pinned => Strategy::Pinned(Pinned::new(device, role, capacity, timeout)?),
            StrategyKind::StagingCopy => {
                Strategy::StagingCopy(StagingCopy::new(device, role, capacity)?)
            }
            StrategyKind::FullReupload => {
                Strategy::FullReupload(FullReupload::new(device, role, capacity)?)
            }
        })
    }

    pub(crate) fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Orphaning(_) => StrategyKind::Orphaning,
            Strategy::FenceSynced(_) => StrategyKind::FenceSynced,
            Strategy::Persistent(_) => StrategyKind::Persistent,
            Strategy::Pinned(_) => StrategyKind::Pinned,
            Strategy::StagingCopy(_) => StrategyKind::StagingCopy,
            Strategy::FullReupload(_) => StrategyKind::FullReupload,
        }
    }

    pub(crate) fn buffer(&self) -> &D::Buffer {
        match self {
            Strategy::Orphaning(s) => s.buffer(),
            Strategy::FenceSynced(s) => s.buffer(),
            Strategy::Persistent(s) => s.buffer(),
            Strategy::Pinned(s) => s.buffer(),
            Strategy::StagingCopy(s) => s.buffer(),
            Strategy::FullReupload(s) => s.buffer(),
        }
    }

    pub(crate) fn map(&mut self, device: &D, size: usize, stride: usize) -> StreamResult<Mapping> {
        match self {
            Strategy::Orphaning(s) => s.map(device, size, stride),
            Strategy::FenceSynced(s) => s.map(device, size, stride),
            Strategy::Persistent(s) => s.map(device, size, stride),
            Strategy::Pinned(s) => s.map(device, size, stride),
            Strategy::StagingCopy(s) => Ok(s.map(size)),
            Strategy::FullReupload(s) => Ok(s.map(size)),
        }
    }

    pub(crate) fn unmap(&mut self, device: &D, used: usize) -> StreamResult<()> {
        match self {
            Strategy::Orphaning(s) => s.unmap(device, used),
            Strategy::FenceSynced(s) => s.unmap(device, used),
            Strategy::Persistent(s) => {
                s.unmap(used);
                Ok(())
            }
            Strategy::Pinned(s) => {
                s.unmap(used);
                Ok(())
            }
            Strategy::StagingCopy(s) => s.unmap(device, used),
            Strategy::FullReupload(s) => s.unmap(device, used),
        }
    }

    pub(crate) fn cursor(&self) -> Option<RingCursor> {
        match self {
            Strategy::Orphaning(s) => Some(s.cursor()),
            Strategy::FenceSynced(s) => Some(s.ring().cursor()),
            Strategy::Persistent(s) => Some(s.ring().cursor()),
            Strategy::Pinned(s) => Some(s.ring().cursor()),
            Strategy::StagingCopy(_) | Strategy::FullReupload(_) => None,
        }
    }

    pub(crate) fn pending_slots(&self) -> Option<[bool; SYNC_SLOTS]> {
        match self {
            Strategy::FenceSynced(s) => Some(s.ring().occupancy()),
            Strategy::Persistent(s) => Some(s.ring().occupancy()),
            Strategy::Pinned(s) => Some(s.ring().occupancy()),
            _ => None,
        }
    }

    /// Drains outstanding fences and frees every device and host resource.
    ///
    /// Resources are released even when draining fails; the drain error is
    /// returned afterwards.
    pub(crate) fn release(self, device: &D) -> StreamResult<()> {
        match self {
            Strategy::Orphaning(s) => {
                s.release(device);
                Ok(())
            }
            Strategy::FenceSynced(s) => s.release(device),
            Strategy::Persistent(s) => s.release(device),
            Strategy::Pinned(s) => s.release(device),
            Strategy::StagingCopy(s) => {
                s.release(device);
                Ok(())
            }
            Strategy::FullReupload(s) => {
                s.release(device);
                Ok(())
            }
        }
    }
}
