//! Link anchors: the attach points participating in the protocol.
//!
//! An anchor couples an attach-point identity with a strict state
//! machine and a role. All cross-anchor coordination goes through the
//! world and the event bus; anchors never hold references to each
//! other, only ids.

use crate::capability::AttachPointHandle;
use crate::core::StateMachine;
use crate::events::{Channel, EventBus};
use crate::link::mode::{LinkActor, LinkMode};
use crate::link::state::LinkState;
use crate::world::HostId;
use serde::{Deserialize, Serialize};

/// World-unique anchor identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct AnchorId(pub u32);

/// Position and orientation of an attach point, in world space.
///
/// The core never interprets poses; they are passed through to the
/// joint, collision and attach-point capabilities.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct Pose {
    /// Position, meters.
    pub position: [f64; 3],
    /// Orientation quaternion, `[x, y, z, w]`.
    pub rotation: [f64; 4],
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl Pose {
    /// A pose at `position` with identity orientation.
    pub fn at(position: [f64; 3]) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }
}

/// Named attach point owned by an anchor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttachPoint {
    /// Name, unique among the host's anchors. Doubles as the
    /// persistence key together with the host id.
    pub name: String,
    /// Pose of the attach point on the host.
    pub pose: Pose,
}

/// Role-specific data for a link source.
#[derive(Clone, Debug)]
pub struct SourceRole {
    /// The target this source is linked to, if any.
    pub target: Option<AnchorId>,
    /// Vessel policy for links from this source.
    pub mode: LinkMode,
    /// Acceptance mode of the negotiation round in progress.
    pub actor: Option<LinkActor>,
}

/// Role-specific data for a link target.
#[derive(Clone, Debug)]
pub struct TargetRole {
    /// The source currently linked to this target, if any.
    pub source: Option<AnchorId>,
    /// Mode adopted from the linked source; a target has none of its own.
    pub mode: Option<LinkMode>,
    /// The source proposing in the current negotiation round.
    pub candidate: Option<AnchorId>,
}

/// The peer role an anchor plays.
#[derive(Clone, Debug)]
pub enum Role {
    Source(SourceRole),
    Target(TargetRole),
}

/// A link-capable attach point on a host.
pub struct Anchor {
    pub(crate) id: AnchorId,
    pub(crate) host: HostId,
    pub(crate) attach_point: AttachPoint,
    pub(crate) link_type: String,
    pub(crate) machine: StateMachine<LinkState, EventBus>,
    pub(crate) attach_handle: Option<AttachPointHandle>,
    pub(crate) highlighted: bool,
    pub(crate) role: Role,
}

impl Anchor {
    pub(crate) fn new_source(
        id: AnchorId,
        host: HostId,
        attach_point: AttachPoint,
        link_type: String,
        mode: LinkMode,
    ) -> Self {
        Self {
            id,
            host,
            attach_point,
            link_type,
            machine: source_machine(id),
            attach_handle: None,
            highlighted: false,
            role: Role::Source(SourceRole {
                target: None,
                mode,
                actor: None,
            }),
        }
    }

    pub(crate) fn new_target(
        id: AnchorId,
        host: HostId,
        attach_point: AttachPoint,
        link_type: String,
    ) -> Self {
        Self {
            id,
            host,
            attach_point,
            link_type,
            machine: target_machine(id),
            attach_handle: None,
            highlighted: false,
            role: Role::Target(TargetRole {
                source: None,
                mode: None,
                candidate: None,
            }),
        }
    }

    /// This anchor's id.
    pub fn id(&self) -> AnchorId {
        self.id
    }

    /// The host owning this anchor.
    pub fn host(&self) -> HostId {
        self.host
    }

    /// The attach point identity.
    pub fn attach_point(&self) -> &AttachPoint {
        &self.attach_point
    }

    /// Compatibility tag; only equal-typed anchors may link.
    pub fn link_type(&self) -> &str {
        &self.link_type
    }

    /// Current protocol state.
    pub fn state(&self) -> LinkState {
        self.machine
            .current()
            .copied()
            .unwrap_or(LinkState::Available)
    }

    /// Derived lock flag: true iff the state is `Locked`.
    pub fn is_locked(&self) -> bool {
        self.state() == LinkState::Locked
    }

    /// Whether a committed link exists on this anchor.
    pub fn is_linked(&self) -> bool {
        self.state() == LinkState::Linked
    }

    /// The peer anchor of an established link, if any.
    pub fn peer(&self) -> Option<AnchorId> {
        match &self.role {
            Role::Source(role) => role.target,
            Role::Target(role) => role.source,
        }
    }

    /// Effective link mode: a source's own, a target's adopted one.
    pub fn link_mode(&self) -> Option<LinkMode> {
        match &self.role {
            Role::Source(role) => Some(role.mode),
            Role::Target(role) => role.mode,
        }
    }

    /// Visual-cue flag, set while the anchor is an accepting candidate.
    pub fn highlighted(&self) -> bool {
        self.highlighted
    }

    /// Whether this anchor plays the source role.
    pub fn is_source(&self) -> bool {
        matches!(self.role, Role::Source(_))
    }

    /// Whether this anchor plays the target role.
    pub fn is_target(&self) -> bool {
        matches!(self.role, Role::Target(_))
    }

    pub(crate) fn source_role(&self) -> Option<&SourceRole> {
        match &self.role {
            Role::Source(role) => Some(role),
            Role::Target(_) => None,
        }
    }

    pub(crate) fn source_role_mut(&mut self) -> Option<&mut SourceRole> {
        match &mut self.role {
            Role::Source(role) => Some(role),
            Role::Target(_) => None,
        }
    }

    pub(crate) fn target_role(&self) -> Option<&TargetRole> {
        match &self.role {
            Role::Target(role) => Some(role),
            Role::Source(_) => None,
        }
    }

    pub(crate) fn target_role_mut(&mut self) -> Option<&mut TargetRole> {
        match &mut self.role {
            Role::Target(role) => Some(role),
            Role::Source(_) => None,
        }
    }
}

/// Build the source-role machine: whitelists plus subscription hooks.
///
/// Hooks only touch bus subscriptions; everything externally visible
/// happens in world operations after the transition returns.
fn source_machine(id: AnchorId) -> StateMachine<LinkState, EventBus> {
    let mut machine = StateMachine::new();

    // `Available -> Locked` covers anchors registered on a host whose
    // sibling already holds a link.
    machine.set_transition_rule(
        LinkState::Available,
        [
            LinkState::Linking,
            LinkState::RejectingLinks,
            LinkState::Locked,
        ],
    );
    machine.set_transition_rule(LinkState::Linking, [LinkState::Available, LinkState::Linked]);
    machine.set_transition_rule(
        LinkState::RejectingLinks,
        [LinkState::Available, LinkState::Locked],
    );
    machine.set_transition_rule(LinkState::Linked, [LinkState::Available]);
    machine.set_transition_rule(LinkState::Locked, [LinkState::Available]);

    // Available sources listen for rival rounds and step aside.
    machine.on_enter(LinkState::Available, move |bus: &mut EventBus| {
        bus.subscribe(Channel::StartLinking, id)
    });
    machine.on_leave(LinkState::Available, move |bus: &mut EventBus| {
        bus.unsubscribe(Channel::StartLinking, id)
    });

    // A linking source waits for the winning target's acceptance.
    machine.on_enter(LinkState::Linking, move |bus: &mut EventBus| {
        bus.subscribe(Channel::LinkAccepted, id)
    });
    machine.on_leave(LinkState::Linking, move |bus: &mut EventBus| {
        bus.unsubscribe(Channel::LinkAccepted, id)
    });

    // A rejecting source waits for the round to end.
    machine.on_enter(LinkState::RejectingLinks, move |bus: &mut EventBus| {
        bus.subscribe(Channel::StopLinking, id)
    });
    machine.on_leave(LinkState::RejectingLinks, move |bus: &mut EventBus| {
        bus.unsubscribe(Channel::StopLinking, id)
    });

    machine
}

/// Build the target-role machine: whitelists plus subscription hooks.
fn target_machine(id: AnchorId) -> StateMachine<LinkState, EventBus> {
    let mut machine = StateMachine::new();

    machine.set_transition_rule(
        LinkState::Available,
        [
            LinkState::AcceptingLinks,
            LinkState::RejectingLinks,
            LinkState::Locked,
        ],
    );
    machine.set_transition_rule(
        LinkState::AcceptingLinks,
        [LinkState::Available, LinkState::Linked, LinkState::Locked],
    );
    machine.set_transition_rule(
        LinkState::RejectingLinks,
        [LinkState::Available, LinkState::Locked],
    );
    machine.set_transition_rule(LinkState::Linked, [LinkState::Available]);
    machine.set_transition_rule(LinkState::Locked, [LinkState::Available]);

    // Available targets evaluate every proposing source.
    machine.on_enter(LinkState::Available, move |bus: &mut EventBus| {
        bus.subscribe(Channel::StartLinking, id)
    });
    machine.on_leave(LinkState::Available, move |bus: &mut EventBus| {
        bus.unsubscribe(Channel::StartLinking, id)
    });

    // Candidates (accepted or rejected) wait for the round to end.
    for state in [LinkState::AcceptingLinks, LinkState::RejectingLinks] {
        machine.on_enter(state, move |bus: &mut EventBus| {
            bus.subscribe(Channel::StopLinking, id)
        });
        machine.on_leave(state, move |bus: &mut EventBus| {
            bus.unsubscribe(Channel::StopLinking, id)
        });
    }

    machine
}
