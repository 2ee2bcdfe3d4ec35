//! Strategy selection from driver capabilities and known defects.

use std::fmt;

use device_abi::{BufferRole, DriverProfile};
use serde::{Deserialize, Serialize};

/// The closed set of streaming strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Unsynchronized appends; the whole buffer is orphaned when it fills up.
    Orphaning,
    /// Unsynchronized appends into a fenced ring.
    FenceSynced,
    /// Fenced ring over persistently mapped storage.
    Persistent,
    /// Fenced ring over host memory registered with the driver.
    Pinned,
    /// Private host block copied into the buffer on every commit.
    StagingCopy,
    /// Private host block; the buffer storage is respecified on every commit.
    FullReupload,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 6] = [
        StrategyKind::Orphaning,
        StrategyKind::FenceSynced,
        StrategyKind::Persistent,
        StrategyKind::Pinned,
        StrategyKind::StagingCopy,
        StrategyKind::FullReupload,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            StrategyKind::Orphaning => "orphaning",
            StrategyKind::FenceSynced => "fence-synced",
            StrategyKind::Persistent => "persistent",
            StrategyKind::Pinned => "pinned",
            StrategyKind::StagingCopy => "staging-copy",
            StrategyKind::FullReupload => "full-reupload",
        }
    }

    /// Whether regions come from a moving ring cursor (as opposed to always offset 0).
    pub const fn uses_ring(self) -> bool {
        !matches!(self, StrategyKind::StagingCopy | StrategyKind::FullReupload)
    }

    /// Whether the strategy guards its ring with fences.
    pub const fn uses_fences(self) -> bool {
        matches!(
            self,
            StrategyKind::FenceSynced | StrategyKind::Persistent | StrategyKind::Pinned
        )
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Picks the cheapest strategy the driver can run correctly for `role`.
///
/// Without base-vertex support every draw reads from offset 0, so only the
/// upload-to-zero strategies work. Otherwise fenced strategies beat
/// orphaning, and among those the ones that never map per call come first.
pub fn select_strategy(role: BufferRole, profile: &DriverProfile) -> StrategyKind {
    let DriverProfile { caps, bugs } = profile;

    if !caps.supports_base_vertex {
        return if bugs.broken_buffer_stream {
            StrategyKind::FullReupload
        } else {
            StrategyKind::StagingCopy
        };
    }

    if !caps.supports_sync {
        return StrategyKind::Orphaning;
    }

    if caps.supports_persistent_storage && !bugs.broken_buffer_storage.contains(role) {
        StrategyKind::Persistent
    } else if caps.supports_pinned_memory && !bugs.broken_pinned_memory.contains(role) {
        StrategyKind::Pinned
    } else if bugs.broken_unsync_mapping {
        StrategyKind::StagingCopy
    } else {
        StrategyKind::FenceSynced
    }
}
