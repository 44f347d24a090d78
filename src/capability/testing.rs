//! In-memory capability fakes shared by the test suites.
//!
//! The fakes hand out `Rc<RefCell<..>>` observation handles so tests
//! can inspect calls and reconfigure limits after the fake has been
//! boxed into the world.

use super::{
    AttachPointHandle, AttachPointManager, Capabilities, CollisionChecker, Coupler,
    JointLimitChecker, LinkRecord, PersistenceStore,
};
use crate::link::Pose;
use crate::world::HostId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// One recorded coupler invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum CouplerCall {
    Couple(HostId, HostId),
    Decouple(HostId, String),
}

#[derive(Default)]
pub(crate) struct RecordingCoupler {
    pub calls: Rc<RefCell<Vec<CouplerCall>>>,
}

impl RecordingCoupler {
    pub fn new() -> (Self, Rc<RefCell<Vec<CouplerCall>>>) {
        let coupler = Self::default();
        let calls = Rc::clone(&coupler.calls);
        (coupler, calls)
    }
}

impl Coupler for RecordingCoupler {
    fn couple(&mut self, host_a: HostId, host_b: HostId) {
        self.calls.borrow_mut().push(CouplerCall::Couple(host_a, host_b));
    }

    fn decouple(&mut self, host: HostId, anchor_name: &str) {
        self.calls
            .borrow_mut()
            .push(CouplerCall::Decouple(host, anchor_name.to_string()));
    }
}

#[derive(Default)]
pub(crate) struct FakeAttach {
    next: u64,
    pub live: Rc<RefCell<Vec<(HostId, String)>>>,
}

impl FakeAttach {
    pub fn new() -> (Self, Rc<RefCell<Vec<(HostId, String)>>>) {
        let attach = Self::default();
        let live = Rc::clone(&attach.live);
        (attach, live)
    }
}

impl AttachPointManager for FakeAttach {
    fn create(&mut self, host: HostId, name: &str, _pose: Pose) -> AttachPointHandle {
        self.next += 1;
        self.live.borrow_mut().push((host, name.to_string()));
        AttachPointHandle(self.next)
    }

    fn drop_point(&mut self, host: HostId, name: &str) {
        self.live
            .borrow_mut()
            .retain(|(h, n)| !(*h == host && n == name));
    }
}

/// Joint limit reasons, settable per check after installation.
#[derive(Default)]
pub(crate) struct JointLimits {
    pub length: Option<String>,
    pub source_angle: Option<String>,
    pub target_angle: Option<String>,
}

#[derive(Default)]
pub(crate) struct FakeJoints {
    pub limits: Rc<RefCell<JointLimits>>,
}

impl FakeJoints {
    pub fn new() -> (Self, Rc<RefCell<JointLimits>>) {
        let joints = Self::default();
        let limits = Rc::clone(&joints.limits);
        (joints, limits)
    }
}

impl JointLimitChecker for FakeJoints {
    fn check_length(&self, _source: &Pose, _target: &Pose) -> Option<String> {
        self.limits.borrow().length.clone()
    }

    fn check_source_angle(&self, _source: &Pose, _target: &Pose) -> Option<String> {
        self.limits.borrow().source_angle.clone()
    }

    fn check_target_angle(&self, _source: &Pose, _target: &Pose) -> Option<String> {
        self.limits.borrow().target_angle.clone()
    }
}

#[derive(Default)]
pub(crate) struct FakeCollision {
    pub obstruction: Rc<RefCell<Option<String>>>,
}

impl FakeCollision {
    pub fn new() -> (Self, Rc<RefCell<Option<String>>>) {
        let collision = Self::default();
        let obstruction = Rc::clone(&collision.obstruction);
        (collision, obstruction)
    }
}

impl CollisionChecker for FakeCollision {
    fn check_hits(&self, _source: &Pose, _target: &Pose) -> Option<String> {
        self.obstruction.borrow().clone()
    }
}

pub(crate) type RecordMap = HashMap<(HostId, String), LinkRecord>;

#[derive(Default)]
pub(crate) struct MemoryStore {
    pub records: Rc<RefCell<RecordMap>>,
}

impl MemoryStore {
    pub fn new() -> (Self, Rc<RefCell<RecordMap>>) {
        let store = Self::default();
        let records = Rc::clone(&store.records);
        (store, records)
    }
}

impl PersistenceStore for MemoryStore {
    fn load(&self, host: HostId, anchor_name: &str) -> Option<LinkRecord> {
        self.records
            .borrow()
            .get(&(host, anchor_name.to_string()))
            .copied()
    }

    fn save(&mut self, host: HostId, anchor_name: &str, record: LinkRecord) {
        self.records
            .borrow_mut()
            .insert((host, anchor_name.to_string()), record);
    }

    fn clear(&mut self, host: HostId, anchor_name: &str) {
        self.records
            .borrow_mut()
            .remove(&(host, anchor_name.to_string()));
    }
}

/// Everything the world tests need: a fully equipped capability set
/// plus the observation handles.
pub(crate) struct TestRig {
    pub caps: Capabilities,
    pub coupler_calls: Rc<RefCell<Vec<CouplerCall>>>,
    pub live_attach_points: Rc<RefCell<Vec<(HostId, String)>>>,
    pub joint_limits: Rc<RefCell<JointLimits>>,
    pub obstruction: Rc<RefCell<Option<String>>>,
    pub records: Rc<RefCell<RecordMap>>,
}

impl TestRig {
    pub fn new() -> Self {
        let (coupler, coupler_calls) = RecordingCoupler::new();
        let (attach, live_attach_points) = FakeAttach::new();
        let (joints, joint_limits) = FakeJoints::new();
        let (collision, obstruction) = FakeCollision::new();
        let (store, records) = MemoryStore::new();

        let caps = Capabilities::new()
            .with_attach(attach)
            .with_coupler(coupler)
            .with_joints(joints)
            .with_collision(collision)
            .with_persistence(store);

        Self {
            caps,
            coupler_calls,
            live_attach_points,
            joint_limits,
            obstruction,
            records,
        }
    }
}
