//! Capability and driver-defect descriptors.
//!
//! Both are plain data supplied once by the backend when a stream buffer is
//! created. Nothing here is global: the strategy selector receives a
//! [`DriverProfile`] by reference and stays a pure function of it.

use serde::{Deserialize, Serialize};

/// What a stream buffer is bound as at draw time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferRole {
    /// Vertex attribute data.
    Vertex,
    /// Index (element) data.
    Index,
    /// Uniform/constant data.
    Uniform,
}

impl BufferRole {
    const fn bit(self) -> u8 {
        match self {
            BufferRole::Vertex => 1 << 0,
            BufferRole::Index => 1 << 1,
            BufferRole::Uniform => 1 << 2,
        }
    }
}

/// Set of buffer roles a defect applies to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<BufferRole>", into = "Vec<BufferRole>")]
pub struct RoleSet(u8);

impl RoleSet {
    pub const EMPTY: RoleSet = RoleSet(0);

    pub const fn only(role: BufferRole) -> Self {
        RoleSet(role.bit())
    }

    pub const fn all() -> Self {
        RoleSet(BufferRole::Vertex.bit() | BufferRole::Index.bit() | BufferRole::Uniform.bit())
    }

    pub const fn with(self, role: BufferRole) -> Self {
        RoleSet(self.0 | role.bit())
    }

    pub const fn contains(self, role: BufferRole) -> bool {
        self.0 & role.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl From<Vec<BufferRole>> for RoleSet {
    fn from(roles: Vec<BufferRole>) -> Self {
        roles.into_iter().fold(RoleSet::EMPTY, RoleSet::with)
    }
}

impl From<RoleSet> for Vec<BufferRole> {
    fn from(set: RoleSet) -> Self {
        [BufferRole::Vertex, BufferRole::Index, BufferRole::Uniform]
            .into_iter()
            .filter(|role| set.contains(*role))
            .collect()
    }
}

/// Features the active driver exposes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceCaps {
    /// Draw calls accept a non-zero base vertex, so data may live at any offset.
    pub supports_base_vertex: bool,
    /// Fence sync objects are available.
    pub supports_sync: bool,
    /// Immutable storage with persistent, coherent mapping is available.
    pub supports_persistent_storage: bool,
    /// Host memory can be registered as buffer storage.
    pub supports_pinned_memory: bool,
}

impl DeviceCaps {
    /// Every feature the allocator can take advantage of.
    pub const fn full() -> Self {
        Self {
            supports_base_vertex: true,
            supports_sync: true,
            supports_persistent_storage: true,
            supports_pinned_memory: true,
        }
    }
}

/// Known driver defects that rule out otherwise-supported strategies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverBugs {
    /// Sub-data uploads stall or corrupt; whole-buffer respecification is required.
    pub broken_buffer_stream: bool,
    /// Persistent buffer storage misbehaves when bound in these roles.
    pub broken_buffer_storage: RoleSet,
    /// Pinned host memory misbehaves when bound in these roles.
    pub broken_pinned_memory: RoleSet,
    /// Unsynchronized mapping round-trips through the driver thread (vendor defect).
    pub broken_unsync_mapping: bool,
}

/// Capability and defect descriptors for one driver.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverProfile {
    pub caps: DeviceCaps,
    pub bugs: DriverBugs,
}

impl DriverProfile {
    pub const fn new(caps: DeviceCaps, bugs: DriverBugs) -> Self {
        Self { caps, bugs }
    }
}
