//! Streaming buffers for per-draw vertex, index and uniform data.
//!
//! A [`StreamBuffer`] is one fixed-capacity device buffer fed by a single
//! producer thread. The producer maps a region, writes into it and commits
//! the bytes it used; the returned offset is what the next draw call reads
//! from. How the bytes reach the device depends on the [`StrategyKind`],
//! chosen once at construction by [`select_strategy`] from the driver's
//! capabilities and known defects.
//!
//! Ring strategies append through a [`RingCursor`] and guard reuse with a
//! table of [`SYNC_SLOTS`] completion fences, so a region is never handed out
//! while the GPU may still read it. The remaining strategies always stream to
//! offset 0 and copy or respecify the whole buffer per commit.

mod config;
mod cursor;
mod error;
mod fence;
mod region;
mod selector;
mod strategy;
mod stream;

pub use config::{StreamConfig, DEFAULT_FENCE_TIMEOUT_MS};
pub use cursor::{RingCursor, SYNC_SLOTS};
pub use error::{StreamError, StreamResult};
pub use region::{HostRegion, PAGE_ALIGNMENT};
pub use selector::{select_strategy, StrategyKind};
pub use stream::{StreamBuffer, StreamRegion};

pub use device_abi::{BufferRole, DeviceCaps, DriverBugs, DriverProfile, GpuDevice};
