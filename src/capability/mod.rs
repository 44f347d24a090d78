//! Capability interfaces consumed by the protocol core.
//!
//! Physical joint simulation, rigid-body coupling, attach-point
//! representation, collision queries and persistence are external
//! collaborators. The core calls them through these narrow traits and
//! treats a missing required capability as
//! [`LinkError::CapabilityMissing`](crate::link::LinkError): logged,
//! the host non-functional for linking, the process alive.

mod record;

#[cfg(test)]
pub(crate) mod testing;

pub use record::LinkRecord;

use crate::link::Pose;
use crate::world::HostId;

/// Opaque handle to the physical representation of an attach point.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct AttachPointHandle(pub u64);

/// Creates and destroys the physical representation of attach points.
pub trait AttachPointManager {
    /// Create the attach point `name` on `host` at `pose`.
    fn create(&mut self, host: HostId, name: &str, pose: Pose) -> AttachPointHandle;

    /// Destroy the attach point `name` on `host`. Idempotent.
    fn drop_point(&mut self, host: HostId, name: &str);
}

/// Performs the physical merge or split of two rigid assemblies.
///
/// May reassign a focus notion the core does not interpret.
pub trait Coupler {
    /// Merge the assemblies of `host_a` and `host_b`.
    fn couple(&mut self, host_a: HostId, host_b: HostId);

    /// Split the assembly at the given anchor.
    fn decouple(&mut self, host: HostId, anchor_name: &str);
}

/// Validates joint geometry between two attach-point poses.
///
/// Each check returns `None` when the geometry is acceptable, or a
/// human-readable reason when the limit is violated.
pub trait JointLimitChecker {
    /// Check the joint length between the two poses.
    fn check_length(&self, source: &Pose, target: &Pose) -> Option<String>;

    /// Check the joint angle at the source attach point.
    fn check_source_angle(&self, source: &Pose, target: &Pose) -> Option<String>;

    /// Check the joint angle at the target attach point.
    fn check_target_angle(&self, source: &Pose, target: &Pose) -> Option<String>;
}

/// Hit-tests the straight path between two attach-point poses.
pub trait CollisionChecker {
    /// `None` when the path is clear, or a reason describing the
    /// obstruction.
    fn check_hits(&self, source: &Pose, target: &Pose) -> Option<String>;
}

/// Flat key-value persistence, one record per anchor.
///
/// Keyed by host id plus attach-point name. Written on every state or
/// peer change, read once at restoration.
pub trait PersistenceStore {
    /// Load the record for an anchor, if one was ever written.
    fn load(&self, host: HostId, anchor_name: &str) -> Option<LinkRecord>;

    /// Write the record for an anchor, replacing any previous one.
    fn save(&mut self, host: HostId, anchor_name: &str, record: LinkRecord);

    /// Remove the record for an anchor. Idempotent.
    fn clear(&mut self, host: HostId, anchor_name: &str);
}

/// The set of collaborators available to a world.
///
/// All slots are optional; operations that need a missing one log a
/// `CapabilityMissing` error and leave the initiating host
/// non-functional for linking.
#[derive(Default)]
pub struct Capabilities {
    pub attach: Option<Box<dyn AttachPointManager>>,
    pub coupler: Option<Box<dyn Coupler>>,
    pub joints: Option<Box<dyn JointLimitChecker>>,
    pub collision: Option<Box<dyn CollisionChecker>>,
    pub persistence: Option<Box<dyn PersistenceStore>>,
}

impl Capabilities {
    /// An empty capability set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install an attach-point manager.
    pub fn with_attach(mut self, attach: impl AttachPointManager + 'static) -> Self {
        self.attach = Some(Box::new(attach));
        self
    }

    /// Install a coupler.
    pub fn with_coupler(mut self, coupler: impl Coupler + 'static) -> Self {
        self.coupler = Some(Box::new(coupler));
        self
    }

    /// Install a joint limit checker.
    pub fn with_joints(mut self, joints: impl JointLimitChecker + 'static) -> Self {
        self.joints = Some(Box::new(joints));
        self
    }

    /// Install a collision checker.
    pub fn with_collision(mut self, collision: impl CollisionChecker + 'static) -> Self {
        self.collision = Some(Box::new(collision));
        self
    }

    /// Install a persistence store.
    pub fn with_persistence(mut self, persistence: impl PersistenceStore + 'static) -> Self {
        self.persistence = Some(Box::new(persistence));
        self
    }

    /// Names of the capabilities required for linking that are not
    /// installed.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.attach.is_none() {
            missing.push("attach-point manager");
        }
        if self.coupler.is_none() {
            missing.push("coupler");
        }
        if self.joints.is_none() {
            missing.push("joint limit checker");
        }
        if self.collision.is_none() {
            missing.push("collision checker");
        }
        if self.persistence.is_none() {
            missing.push("persistence store");
        }
        missing
    }
}
