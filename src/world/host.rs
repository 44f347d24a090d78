//! Hosts: the entities owning link anchors.

use crate::link::AnchorId;
use serde::{Deserialize, Serialize};

/// World-unique host identity. `0` is reserved to mean "no host" in
/// persisted records.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct HostId(pub u32);

impl HostId {
    /// The reserved "no host" id.
    pub const NONE: HostId = HostId(0);

    /// Raw value, as stored in persisted records.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Identity of the rigid assembly a host belongs to. Coupling merges
/// assemblies; the core only compares vessel ids, it never constructs
/// the hierarchy itself.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct VesselId(pub u32);

/// An entity owning one or more link anchors.
pub struct Host {
    pub(crate) id: HostId,
    pub(crate) name: String,
    pub(crate) vessel: VesselId,
    pub(crate) anchors: Vec<AnchorId>,
}

impl Host {
    /// This host's id.
    pub fn id(&self) -> HostId {
        self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The assembly this host currently belongs to.
    pub fn vessel(&self) -> VesselId {
        self.vessel
    }

    /// The anchors notified when a co-hosted link is created or
    /// broken. An explicit registry, queried at notification time;
    /// every link-capable anchor on the host is a listener.
    pub fn link_listeners(&self) -> &[AnchorId] {
        &self.anchors
    }
}
