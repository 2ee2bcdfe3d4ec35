//! Device boundary for the streaming-buffer allocator.
//!
//! The allocator never talks to a graphics API directly. Backends implement
//! [`GpuDevice`] and report what the active driver can do through a
//! [`DriverProfile`]:
//! * [`DeviceCaps`] – feature flags (base vertex, sync objects, buffer storage, pinned memory).
//! * [`DriverBugs`] – known driver defects, some keyed by [`BufferRole`].
//! * [`DeviceError`] – allocation/mapping failures surfaced by the backend.

mod caps;
mod error;

pub use caps::{BufferRole, DeviceCaps, DriverBugs, DriverProfile, RoleSet};
pub use error::{DeviceError, DeviceResult};

use std::ptr::NonNull;
use std::time::Duration;

/// Outcome of a client-side wait on a completion marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitStatus {
    /// The marker signalled before (or during) the wait.
    Signaled,
    /// The timeout elapsed and the marker is still pending.
    TimedOut,
}

/// Operations the streaming allocator needs from a graphics device.
///
/// Implementations are expected to be cheap handles (`Clone` over shared
/// state); every method takes `&self`. All calls come from the single
/// producer thread that owns the stream buffer.
pub trait GpuDevice {
    /// Device buffer object.
    type Buffer;
    /// Completion marker. Deliberately not `Clone`: [`GpuDevice::delete_fence`]
    /// consumes the only handle.
    type Fence;

    /// Allocates `size` bytes of device storage intended for streaming writes.
    fn create_buffer(&self, role: BufferRole, size: usize) -> DeviceResult<Self::Buffer>;

    /// Allocates immutable storage and maps it once, persistently and coherently.
    ///
    /// The returned pointer stays valid until the buffer is destroyed.
    fn create_persistent_buffer(
        &self,
        role: BufferRole,
        size: usize,
    ) -> DeviceResult<(Self::Buffer, NonNull<u8>)>;

    /// Registers `len` bytes of host memory at `ptr` as buffer storage.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes until the
    /// returned buffer has been destroyed and the device has been drained.
    unsafe fn import_host_memory(
        &self,
        role: BufferRole,
        ptr: NonNull<u8>,
        len: usize,
    ) -> DeviceResult<Self::Buffer>;

    /// Detaches the current storage and replaces it with fresh storage of the same size.
    fn orphan(&self, buffer: &Self::Buffer) -> DeviceResult<()>;

    /// Maps `[offset, offset + len)` for writing without synchronizing against the GPU.
    ///
    /// Writes only become visible to the device after [`GpuDevice::flush_and_unmap`].
    fn map_range(&self, buffer: &Self::Buffer, offset: usize, len: usize)
        -> DeviceResult<NonNull<u8>>;

    /// Flushes the first `len` bytes of the current mapping and unmaps it.
    fn flush_and_unmap(&self, buffer: &Self::Buffer, len: usize) -> DeviceResult<()>;

    /// Copies `data` into the buffer at offset 0 before returning.
    fn upload(&self, buffer: &Self::Buffer, data: &[u8]) -> DeviceResult<()>;

    /// Reallocates the buffer storage to `data.len()` bytes and fills it with `data`.
    fn respecify(&self, buffer: &Self::Buffer, data: &[u8]) -> DeviceResult<()>;

    /// Inserts a marker that signals once all previously submitted work completes.
    fn insert_fence(&self) -> Self::Fence;

    /// Blocks until `fence` signals or `timeout` elapses. `None` waits forever.
    fn client_wait(&self, fence: &Self::Fence, timeout: Option<Duration>)
        -> DeviceResult<WaitStatus>;

    /// Releases a marker.
    fn delete_fence(&self, fence: Self::Fence);

    /// Releases the buffer and its storage.
    fn destroy_buffer(&self, buffer: Self::Buffer);
}
