//! Software implementation of [`GpuDevice`].
//!
//! `SoftDevice` keeps buffer storage in host memory and models the parts of
//! a real driver the streaming allocator depends on:
//! * explicit-flush mappings: writes land in a shadow allocation and only the
//!   flushed prefix reaches the buffer,
//! * persistent and imported (pinned) storage that the consumer reads directly,
//! * fences backed by a [`Timeline`] that a consumer thread retires.
//!
//! Every call is appended to an event log so tests can assert on the exact
//! device traffic a strategy generates.

mod timeline;

pub use timeline::Timeline;

use device_abi::{BufferRole, DeviceError, DeviceResult, GpuDevice, WaitStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

/// How fences complete when nobody drives the timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetireMode {
    /// Waiting on a fence completes it, as if the GPU were always idle.
    Immediate,
    /// Fences only complete when a consumer retires the timeline.
    Manual,
}

/// One device call, as observed by the software device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceEvent {
    BufferCreated { id: u32, role: BufferRole, size: usize },
    PersistentCreated { id: u32, role: BufferRole, size: usize },
    HostImported { id: u32, role: BufferRole, len: usize },
    Orphaned { id: u32 },
    Mapped { id: u32, offset: usize, len: usize },
    FlushedUnmapped { id: u32, len: usize },
    Uploaded { id: u32, len: usize },
    Respecified { id: u32, len: usize },
    FenceInserted { seq: u64 },
    FenceWaited { seq: u64, status: WaitStatus },
    FenceDeleted { seq: u64 },
    BufferDestroyed { id: u32 },
}

/// Buffer handle issued by [`SoftDevice`].
#[derive(Debug, PartialEq, Eq)]
pub struct SoftBuffer {
    id: u32,
}

impl SoftBuffer {
    pub fn id(&self) -> u32 {
        self.id
    }
}

/// Fence handle issued by [`SoftDevice`].
#[derive(Debug, PartialEq, Eq)]
pub struct SoftFence {
    seq: u64,
}

impl SoftFence {
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

struct HostPtr(NonNull<u8>);

// SAFETY: the pointer is only dereferenced while the state mutex is held and
// the caller of `import_host_memory` guarantees it outlives the buffer.
unsafe impl Send for HostPtr {}

enum Storage {
    Owned(Box<[u8]>),
    Host { ptr: HostPtr, len: usize },
}

impl Storage {
    fn zeroed(len: usize) -> Self {
        Storage::Owned(vec![0u8; len].into_boxed_slice())
    }

    fn len(&self) -> usize {
        match self {
            Storage::Owned(bytes) => bytes.len(),
            Storage::Host { len, .. } => *len,
        }
    }

    fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Owned(bytes) => &bytes[..],
            // SAFETY: see `HostPtr`; `len` is the registered length.
            Storage::Host { ptr, len } => unsafe { std::slice::from_raw_parts(ptr.0.as_ptr(), *len) },
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Storage::Owned(bytes) => &mut bytes[..],
            // SAFETY: see `HostPtr`; `len` is the registered length.
            Storage::Host { ptr, len } => unsafe {
                std::slice::from_raw_parts_mut(ptr.0.as_ptr(), *len)
            },
        }
    }
}

struct Mapping {
    offset: usize,
    len: usize,
    shadow: Box<[u8]>,
}

struct BufferState {
    storage: Storage,
    persistent: bool,
    mapping: Option<Mapping>,
}

#[derive(Default)]
struct State {
    buffers: HashMap<u32, BufferState>,
    next_id: u32,
    allocated: usize,
    live_fences: usize,
    events: Vec<DeviceEvent>,
}

impl State {
    fn reserve(&mut self, limit: Option<usize>, size: usize) -> DeviceResult<()> {
        let total = self.allocated.saturating_add(size);
        if limit.is_some_and(|limit| total > limit) {
            return Err(DeviceError::AllocationFailed { size });
        }
        self.allocated = total;
        Ok(())
    }

    fn insert(&mut self, buffer: BufferState) -> u32 {
        self.next_id += 1;
        self.buffers.insert(self.next_id, buffer);
        self.next_id
    }

    fn buffer_mut(&mut self, id: u32) -> DeviceResult<&mut BufferState> {
        self.buffers.get_mut(&id).ok_or(DeviceError::UnknownBuffer)
    }

    fn release(&mut self, buffer: &BufferState) {
        if let Storage::Owned(bytes) = &buffer.storage {
            self.allocated = self.allocated.saturating_sub(bytes.len());
        }
    }
}

struct Inner {
    state: Mutex<State>,
    timeline: Timeline,
    mode: Mutex<RetireMode>,
    memory_limit: Option<usize>,
}

/// Host-memory device with a simulated asynchronous consumer.
#[derive(Clone)]
pub struct SoftDevice {
    inner: Arc<Inner>,
}

impl SoftDevice {
    /// Device whose fences complete as soon as they are waited on.
    pub fn new() -> Self {
        Self::with_mode(RetireMode::Immediate)
    }

    pub fn with_mode(mode: RetireMode) -> Self {
        Self::build(mode, None)
    }

    /// Device that refuses to hold more than `bytes` of owned storage.
    pub fn with_memory_limit(mode: RetireMode, bytes: usize) -> Self {
        Self::build(mode, Some(bytes))
    }

    fn build(mode: RetireMode, memory_limit: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                timeline: Timeline::new(),
                mode: Mutex::new(mode),
                memory_limit,
            }),
        }
    }

    pub fn mode(&self) -> RetireMode {
        *self.inner.mode.lock()
    }

    /// Switches how later waits complete, e.g. to let a stalled test GPU go idle.
    pub fn set_mode(&self, mode: RetireMode) {
        *self.inner.mode.lock() = mode;
    }

    /// Completion timeline driven by the simulated consumer.
    pub fn timeline(&self) -> &Timeline {
        &self.inner.timeline
    }

    /// Copies `len` bytes at `offset` out of the storage the consumer would read.
    ///
    /// Returns `None` for unknown buffers or out-of-range reads.
    pub fn read_buffer(&self, id: u32, offset: usize, len: usize) -> Option<Vec<u8>> {
        let state = self.inner.state.lock();
        let buffer = state.buffers.get(&id)?;
        let end = offset.checked_add(len)?;
        buffer.storage.as_slice().get(offset..end).map(<[u8]>::to_vec)
    }

    /// Current storage size of a buffer.
    pub fn buffer_len(&self, id: u32) -> Option<usize> {
        let state = self.inner.state.lock();
        state.buffers.get(&id).map(|buffer| buffer.storage.len())
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.inner.state.lock().events.clone()
    }

    pub fn take_events(&self) -> Vec<DeviceEvent> {
        std::mem::take(&mut self.inner.state.lock().events)
    }

    pub fn live_buffers(&self) -> usize {
        self.inner.state.lock().buffers.len()
    }

    pub fn live_fences(&self) -> usize {
        self.inner.state.lock().live_fences
    }

    /// Bytes of owned storage currently allocated.
    pub fn allocated_bytes(&self) -> usize {
        self.inner.state.lock().allocated
    }
}

impl Default for SoftDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuDevice for SoftDevice {
    type Buffer = SoftBuffer;
    type Fence = SoftFence;

    fn create_buffer(&self, role: BufferRole, size: usize) -> DeviceResult<SoftBuffer> {
        let mut state = self.inner.state.lock();
        state.reserve(self.inner.memory_limit, size)?;
        let id = state.insert(BufferState {
            storage: Storage::zeroed(size),
            persistent: false,
            mapping: None,
        });
        state.events.push(DeviceEvent::BufferCreated { id, role, size });
        Ok(SoftBuffer { id })
    }

    fn create_persistent_buffer(
        &self,
        role: BufferRole,
        size: usize,
    ) -> DeviceResult<(SoftBuffer, NonNull<u8>)> {
        let mut state = self.inner.state.lock();
        state.reserve(self.inner.memory_limit, size)?;
        let mut storage = Storage::zeroed(size);
        let ptr = NonNull::new(storage.as_mut_slice().as_mut_ptr())
            .ok_or(DeviceError::MapFailed { offset: 0, len: size })?;
        let id = state.insert(BufferState {
            storage,
            persistent: true,
            mapping: None,
        });
        state
            .events
            .push(DeviceEvent::PersistentCreated { id, role, size });
        Ok((SoftBuffer { id }, ptr))
    }

    unsafe fn import_host_memory(
        &self,
        role: BufferRole,
        ptr: NonNull<u8>,
        len: usize,
    ) -> DeviceResult<SoftBuffer> {
        let mut state = self.inner.state.lock();
        let id = state.insert(BufferState {
            storage: Storage::Host {
                ptr: HostPtr(ptr),
                len,
            },
            persistent: true,
            mapping: None,
        });
        state.events.push(DeviceEvent::HostImported { id, role, len });
        Ok(SoftBuffer { id })
    }

    fn orphan(&self, buffer: &SoftBuffer) -> DeviceResult<()> {
        let mut state = self.inner.state.lock();
        let entry = state.buffer_mut(buffer.id)?;
        debug_assert!(entry.mapping.is_none(), "orphaning a mapped buffer");
        let len = entry.storage.len();
        entry.storage = Storage::zeroed(len);
        state.events.push(DeviceEvent::Orphaned { id: buffer.id });
        Ok(())
    }

    fn map_range(&self, buffer: &SoftBuffer, offset: usize, len: usize) -> DeviceResult<NonNull<u8>> {
        let mut state = self.inner.state.lock();
        let entry = state.buffer_mut(buffer.id)?;
        let in_bounds = offset
            .checked_add(len)
            .is_some_and(|end| end <= entry.storage.len());
        if entry.persistent || entry.mapping.is_some() || !in_bounds {
            return Err(DeviceError::MapFailed { offset, len });
        }
        // Unflushed bytes must never reach storage, so hand out a shadow copy.
        let mut shadow = vec![0u8; len].into_boxed_slice();
        let ptr = NonNull::new(shadow.as_mut_ptr()).ok_or(DeviceError::MapFailed { offset, len })?;
        entry.mapping = Some(Mapping {
            offset,
            len,
            shadow,
        });
        state.events.push(DeviceEvent::Mapped {
            id: buffer.id,
            offset,
            len,
        });
        Ok(ptr)
    }

    fn flush_and_unmap(&self, buffer: &SoftBuffer, len: usize) -> DeviceResult<()> {
        let mut state = self.inner.state.lock();
        let entry = state.buffer_mut(buffer.id)?;
        let mapping = entry
            .mapping
            .take()
            .ok_or(DeviceError::MapFailed { offset: 0, len })?;
        if len > mapping.len {
            return Err(DeviceError::MapFailed {
                offset: mapping.offset,
                len,
            });
        }
        let dst = &mut entry.storage.as_mut_slice()[mapping.offset..mapping.offset + len];
        dst.copy_from_slice(&mapping.shadow[..len]);
        state.events.push(DeviceEvent::FlushedUnmapped { id: buffer.id, len });
        Ok(())
    }

    fn upload(&self, buffer: &SoftBuffer, data: &[u8]) -> DeviceResult<()> {
        let mut state = self.inner.state.lock();
        let entry = state.buffer_mut(buffer.id)?;
        let dst = entry
            .storage
            .as_mut_slice()
            .get_mut(..data.len())
            .ok_or(DeviceError::MapFailed {
                offset: 0,
                len: data.len(),
            })?;
        dst.copy_from_slice(data);
        state.events.push(DeviceEvent::Uploaded {
            id: buffer.id,
            len: data.len(),
        });
        Ok(())
    }

    fn respecify(&self, buffer: &SoftBuffer, data: &[u8]) -> DeviceResult<()> {
        let mut state = self.inner.state.lock();
        let previous = state.buffer_mut(buffer.id)?.storage.len();
        let remaining = state.allocated.saturating_sub(previous);
        if self
            .inner
            .memory_limit
            .is_some_and(|limit| remaining.saturating_add(data.len()) > limit)
        {
            return Err(DeviceError::AllocationFailed { size: data.len() });
        }
        state.allocated = remaining + data.len();
        let entry = state.buffer_mut(buffer.id)?;
        entry.storage = Storage::Owned(data.to_vec().into_boxed_slice());
        state.events.push(DeviceEvent::Respecified {
            id: buffer.id,
            len: data.len(),
        });
        Ok(())
    }

    fn insert_fence(&self) -> SoftFence {
        let seq = self.inner.timeline.submit();
        let mut state = self.inner.state.lock();
        state.live_fences += 1;
        state.events.push(DeviceEvent::FenceInserted { seq });
        SoftFence { seq }
    }

    fn client_wait(&self, fence: &SoftFence, timeout: Option<Duration>) -> DeviceResult<WaitStatus> {
        if self.mode() == RetireMode::Immediate {
            self.inner.timeline.retire_through(fence.seq);
        }
        let status = if self.inner.timeline.wait_for(fence.seq, timeout) {
            WaitStatus::Signaled
        } else {
            log::warn!("soft device: fence {} still pending after {:?}", fence.seq, timeout);
            WaitStatus::TimedOut
        };
        self.inner.state.lock().events.push(DeviceEvent::FenceWaited {
            seq: fence.seq,
            status,
        });
        Ok(status)
    }

    fn delete_fence(&self, fence: SoftFence) {
        let mut state = self.inner.state.lock();
        state.live_fences = state.live_fences.saturating_sub(1);
        state.events.push(DeviceEvent::FenceDeleted { seq: fence.seq });
    }

    fn destroy_buffer(&self, buffer: SoftBuffer) {
        let mut state = self.inner.state.lock();
        if let Some(entry) = state.buffers.remove(&buffer.id) {
            state.release(&entry);
        }
        state
            .events
            .push(DeviceEvent::BufferDestroyed { id: buffer.id });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(ptr: NonNull<u8>, bytes: &[u8]) {
        // SAFETY: tests only write within the mapped length.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len()) }
    }

    #[test]
    fn only_flushed_bytes_become_visible() {
        let device = SoftDevice::new();
        let buffer = device.create_buffer(BufferRole::Vertex, 64).unwrap();
        let ptr = device.map_range(&buffer, 16, 8).unwrap();
        write(ptr, &[7; 8]);
        device.flush_and_unmap(&buffer, 4).unwrap();

        let bytes = device.read_buffer(buffer.id(), 16, 8).unwrap();
        assert_eq!(bytes, vec![7, 7, 7, 7, 0, 0, 0, 0]);
    }

    #[test]
    fn double_map_is_rejected() {
        let device = SoftDevice::new();
        let buffer = device.create_buffer(BufferRole::Index, 32).unwrap();
        device.map_range(&buffer, 0, 8).unwrap();
        assert_eq!(
            device.map_range(&buffer, 8, 8),
            Err(DeviceError::MapFailed { offset: 8, len: 8 })
        );
    }

    #[test]
    fn persistent_storage_is_coherent() {
        let device = SoftDevice::new();
        let (buffer, ptr) = device
            .create_persistent_buffer(BufferRole::Vertex, 32)
            .unwrap();
        write(ptr, &[1, 2, 3]);
        assert_eq!(device.read_buffer(buffer.id(), 0, 3).unwrap(), vec![1, 2, 3]);
        assert!(device.map_range(&buffer, 0, 4).is_err());
    }

    #[test]
    fn memory_limit_fails_allocation() {
        let device = SoftDevice::with_memory_limit(RetireMode::Immediate, 100);
        assert!(device.create_buffer(BufferRole::Vertex, 64).is_ok());
        assert_eq!(
            device.create_buffer(BufferRole::Vertex, 64),
            Err(DeviceError::AllocationFailed { size: 64 })
        );
    }

    #[test]
    fn respecify_resizes_storage() {
        let device = SoftDevice::new();
        let buffer = device.create_buffer(BufferRole::Uniform, 0).unwrap();
        device.respecify(&buffer, &[9; 12]).unwrap();
        assert_eq!(device.buffer_len(buffer.id()), Some(12));
        assert_eq!(device.allocated_bytes(), 12);
        device.destroy_buffer(buffer);
        assert_eq!(device.allocated_bytes(), 0);
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn manual_fence_times_out_until_retired() {
        let device = SoftDevice::with_mode(RetireMode::Manual);
        let fence = device.insert_fence();
        let short = Some(Duration::from_millis(5));
        assert_eq!(device.client_wait(&fence, short), Ok(WaitStatus::TimedOut));
        device.timeline().retire_all();
        assert_eq!(device.client_wait(&fence, short), Ok(WaitStatus::Signaled));
        device.delete_fence(fence);
        assert_eq!(device.live_fences(), 0);
    }

    #[test]
    fn immediate_fence_signals_on_wait() {
        let device = SoftDevice::new();
        let fence = device.insert_fence();
        assert!(!device.timeline().is_complete(fence.seq()));
        assert_eq!(device.client_wait(&fence, None), Ok(WaitStatus::Signaled));
        assert!(device.timeline().is_complete(fence.seq()));
        device.delete_fence(fence);
    }

    #[test]
    fn switching_to_immediate_unblocks_pending_fences() {
        let device = SoftDevice::with_mode(RetireMode::Manual);
        let fence = device.insert_fence();
        let short = Some(Duration::from_millis(5));
        assert_eq!(device.client_wait(&fence, short), Ok(WaitStatus::TimedOut));
        device.set_mode(RetireMode::Immediate);
        assert_eq!(device.client_wait(&fence, short), Ok(WaitStatus::Signaled));
        device.delete_fence(fence);
    }
}
