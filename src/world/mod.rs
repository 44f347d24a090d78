//! The world: host/anchor registry and the protocol operations.
//!
//! All cross-anchor coordination runs through the world. Anchors are
//! registry entries addressed by id; handlers receive ids, never shared
//! mutable references, which keeps the lock-derivation logic race-free
//! in the single-threaded tick model. Every state or peer change is
//! projected into the persistence store as it happens.

mod host;
mod scheduler;

pub use host::{Host, HostId, VesselId};

use crate::capability::{Capabilities, LinkRecord};
use crate::events::{BusEvent, EventBus, LinkEvent};
use crate::link::{
    candidate_is_compatible, Anchor, AnchorId, AttachPoint, CandidateSource, LinkActor, LinkError,
    LinkMode, LinkState, Pose, RejectReason, Role,
};
use log::{debug, error, warn};
use scheduler::{DeferredTask, TickScheduler};
use std::collections::HashMap;

/// Registry of hosts and anchors plus the event bus and collaborator
/// capabilities. One world per simulated scene.
pub struct World {
    hosts: HashMap<HostId, Host>,
    anchors: HashMap<AnchorId, Anchor>,
    bus: EventBus,
    caps: Capabilities,
    scheduler: TickScheduler,
    events: Vec<BusEvent>,
    next_host: u32,
    next_anchor: u32,
    next_vessel: u32,
    eva_active: bool,
}

impl World {
    /// Create a world with the given collaborators.
    ///
    /// Missing required capabilities are reported immediately; linking
    /// stays disabled until they are present, but the world itself
    /// remains usable.
    pub fn new(caps: Capabilities) -> Self {
        for name in caps.missing() {
            error!("{}", LinkError::CapabilityMissing(name));
        }
        Self {
            hosts: HashMap::new(),
            anchors: HashMap::new(),
            bus: EventBus::new(),
            caps,
            scheduler: TickScheduler::default(),
            events: Vec::new(),
            next_host: 0,
            next_anchor: 0,
            next_vessel: 0,
            eva_active: false,
        }
    }

    // ---- registry -------------------------------------------------------

    /// Register a host on a fresh vessel of its own.
    pub fn add_host(&mut self, name: &str) -> HostId {
        self.next_host += 1;
        self.next_vessel += 1;
        let id = HostId(self.next_host);
        self.hosts.insert(
            id,
            Host {
                id,
                name: name.to_string(),
                vessel: VesselId(self.next_vessel),
                anchors: Vec::new(),
            },
        );
        id
    }

    /// Reassign a host to another vessel. Called by the scene glue when
    /// assemblies merge or split; the core never derives this itself.
    pub fn set_host_vessel(&mut self, host: HostId, vessel: VesselId) -> Result<(), LinkError> {
        let host = self
            .hosts
            .get_mut(&host)
            .ok_or(LinkError::UnknownHost(host))?;
        host.vessel = vessel;
        Ok(())
    }

    /// Register a source anchor on `host` and start it `Available`.
    pub fn add_source(
        &mut self,
        host: HostId,
        name: &str,
        pose: Pose,
        link_type: &str,
        mode: LinkMode,
    ) -> Result<AnchorId, LinkError> {
        let id = self.allocate_anchor(host)?;
        let anchor = Anchor::new_source(
            id,
            host,
            AttachPoint {
                name: name.to_string(),
                pose,
            },
            link_type.to_string(),
            mode,
        );
        self.anchors.insert(id, anchor);
        self.start_machine(id, LinkState::Available)?;
        self.join_sibling_lock(id);
        Ok(id)
    }

    /// Register a target anchor on `host` and start it `Available`.
    pub fn add_target(
        &mut self,
        host: HostId,
        name: &str,
        pose: Pose,
        link_type: &str,
    ) -> Result<AnchorId, LinkError> {
        let id = self.allocate_anchor(host)?;
        let anchor = Anchor::new_target(
            id,
            host,
            AttachPoint {
                name: name.to_string(),
                pose,
            },
            link_type.to_string(),
        );
        self.anchors.insert(id, anchor);
        self.start_machine(id, LinkState::Available)?;
        self.join_sibling_lock(id);
        Ok(id)
    }

    /// Bring a newly registered anchor in line with its co-hosted
    /// siblings: locked while a sibling holds a link, sitting out the
    /// round while a sibling is linking. Registration order must not
    /// decide whether a host can carry two links at once.
    fn join_sibling_lock(&mut self, id: AnchorId) {
        let mut sibling_linked = false;
        let mut sibling_linking = false;
        {
            let Some(anchor) = self.anchors.get(&id) else {
                return;
            };
            let Some(host) = self.hosts.get(&anchor.host()) else {
                return;
            };
            for &sibling in host.link_listeners() {
                if sibling == id {
                    continue;
                }
                match self.anchors.get(&sibling).map(Anchor::state) {
                    Some(LinkState::Linked) => sibling_linked = true,
                    Some(LinkState::Linking) => sibling_linking = true,
                    _ => {}
                }
            }
        }
        if sibling_linked {
            self.set_locked(id, true);
        } else if sibling_linking {
            // Parked like the other round participants; the closing
            // `StopLinking` returns it to `Available`.
            if let Err(err) = self.set_state(id, LinkState::RejectingLinks) {
                error!("join_sibling_lock: {err}");
            }
        }
    }

    fn allocate_anchor(&mut self, host: HostId) -> Result<AnchorId, LinkError> {
        let host = self
            .hosts
            .get_mut(&host)
            .ok_or(LinkError::UnknownHost(host))?;
        self.next_anchor += 1;
        let id = AnchorId(self.next_anchor);
        host.anchors.push(id);
        Ok(id)
    }

    /// Look up a host.
    pub fn host(&self, id: HostId) -> Option<&Host> {
        self.hosts.get(&id)
    }

    /// Look up an anchor.
    pub fn anchor(&self, id: AnchorId) -> Option<&Anchor> {
        self.anchors.get(&id)
    }

    /// Current state of an anchor.
    pub fn state_of(&self, id: AnchorId) -> Option<LinkState> {
        self.anchors.get(&id).map(Anchor::state)
    }

    /// Peer of an anchor's established link.
    pub fn peer_of(&self, id: AnchorId) -> Option<AnchorId> {
        self.anchors.get(&id).and_then(Anchor::peer)
    }

    /// The event bus (read access, e.g. to inspect subscriptions).
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Whether an EVA crew member is currently active.
    pub fn eva_active(&self) -> bool {
        self.eva_active
    }

    /// Toggle the active-EVA flag; gates `LinkActor::Eva` rounds.
    pub fn set_eva_active(&mut self, active: bool) {
        self.eva_active = active;
    }

    /// Take every event published since the last call, in publish
    /// order.
    pub fn drain_events(&mut self) -> Vec<BusEvent> {
        std::mem::take(&mut self.events)
    }

    // ---- negotiation ----------------------------------------------------

    /// Open a negotiation round from `source`.
    ///
    /// Returns `false` without a state change when the source cannot
    /// enter `Linking`, when `Eva` is requested with no active EVA
    /// actor, or when a required capability is missing.
    pub fn start_linking(&mut self, source: AnchorId, actor: LinkActor) -> bool {
        let missing = self.caps.missing();
        if !missing.is_empty() {
            for name in missing {
                error!("{}", LinkError::CapabilityMissing(name));
            }
            return false;
        }
        let Some(anchor) = self.anchors.get(&source) else {
            warn!("start_linking: {source:?} is not a registered anchor");
            return false;
        };
        if anchor.source_role().is_none() {
            warn!("start_linking: {source:?} is not a source anchor");
            return false;
        }
        if !anchor.machine.can_transition_to(&LinkState::Linking) {
            warn!(
                "start_linking: {source:?} cannot start linking while {:?}",
                anchor.state()
            );
            return false;
        }
        if actor == LinkActor::Eva && !self.eva_active {
            warn!("start_linking: EVA round requested with no active EVA actor");
            return false;
        }

        if let Some(role) = self
            .anchors
            .get_mut(&source)
            .and_then(Anchor::source_role_mut)
        {
            role.actor = Some(actor);
        }
        if let Err(err) = self.set_state(source, LinkState::Linking) {
            error!("start_linking: {err}");
            return false;
        }
        let _ = self.publish(BusEvent::StartLinking(source));
        true
    }

    /// Abort the round opened by `start_linking`. Warns and does
    /// nothing when the source is not currently linking.
    pub fn cancel_linking(&mut self, source: AnchorId) {
        let Some(anchor) = self.anchors.get(&source) else {
            warn!("cancel_linking: {source:?} is not a registered anchor");
            return;
        };
        if anchor.state() != LinkState::Linking {
            warn!(
                "cancel_linking: {source:?} is not linking (currently {:?})",
                anchor.state()
            );
            return;
        }
        let _ = self.publish(BusEvent::StopLinking(source));
        if let Some(role) = self
            .anchors
            .get_mut(&source)
            .and_then(Anchor::source_role_mut)
        {
            role.actor = None;
        }
        if let Err(err) = self.set_state(source, LinkState::Available) {
            error!("cancel_linking: {err}");
        }
    }

    /// Select an accepting target as the winner of the round.
    ///
    /// Publishes `LinkAccepted`; the linking source reacts by running
    /// the full legality check and, if it passes, committing the link.
    /// Returns whether the target ended up linked.
    pub fn accept_link(&mut self, target: AnchorId) -> bool {
        let Some(anchor) = self.anchors.get(&target) else {
            warn!("accept_link: {target:?} is not a registered anchor");
            return false;
        };
        if anchor.target_role().is_none() || anchor.state() != LinkState::AcceptingLinks {
            warn!(
                "accept_link: {target:?} is not an accepting candidate (currently {:?})",
                anchor.state()
            );
            return false;
        }
        let _ = self.publish(BusEvent::LinkAccepted(target));
        self.anchors
            .get(&target)
            .map(Anchor::is_linked)
            .unwrap_or(false)
    }

    /// Commit a link from `source` to `target`.
    ///
    /// Runs the full legality check; on failure returns `false` with no
    /// side effect. On success the physical coupling happens first (an
    /// external failure there must not leave a logically linked but
    /// physically disconnected pair), then the logical commit, then the
    /// round is closed.
    pub fn link_to_target(&mut self, source: AnchorId, target: AnchorId) -> bool {
        if !self.check_can_link_to(source, target, true) {
            return false;
        }
        let Some((src_host, mode, actor)) = self.anchors.get(&source).and_then(|anchor| {
            let role = anchor.source_role()?;
            Some((anchor.host(), role.mode, role.actor.unwrap_or(LinkActor::Api)))
        }) else {
            return false;
        };
        let Some(tgt_host) = self.anchors.get(&target).map(Anchor::host) else {
            return false;
        };

        if mode.couples() {
            match self.caps.coupler.as_deref_mut() {
                Some(coupler) => coupler.couple(src_host, tgt_host),
                None => {
                    error!("{}", LinkError::CapabilityMissing("coupler"));
                    return false;
                }
            }
        }

        if let Err(err) = self.commit_link(source, target, actor) {
            error!("link_to_target: {err}");
            return false;
        }
        self.stop_linking_round(source);
        true
    }

    /// Tear down the committed link on `source`.
    ///
    /// The logical unlink happens strictly before the physical
    /// decoupling is requested - once the break is decided the logical
    /// state must never claim "linked", even though the physical
    /// separation may complete later.
    pub fn break_current_link(&mut self, source: AnchorId, actor: LinkActor) -> bool {
        let Some(anchor) = self.anchors.get(&source) else {
            warn!("break_current_link: {source:?} is not a registered anchor");
            return false;
        };
        let Some(role) = anchor.source_role() else {
            warn!("break_current_link: {source:?} is not a source anchor");
            return false;
        };
        if anchor.state() != LinkState::Linked {
            warn!(
                "break_current_link: {source:?} is not linked (currently {:?})",
                anchor.state()
            );
            return false;
        }
        let Some(target) = role.target else {
            error!("break_current_link: {source:?} is linked but has no peer reference");
            return false;
        };
        let mode = role.mode;
        let src_host = anchor.host();
        let src_name = anchor.attach_point().name.clone();

        self.unlink(source, target, actor);

        if mode.couples() {
            match self.caps.coupler.as_deref_mut() {
                Some(coupler) => coupler.decouple(src_host, &src_name),
                None => error!("{}", LinkError::CapabilityMissing("coupler")),
            }
        }
        true
    }

    /// Pure legality predicate for a `source` -> `target` link.
    ///
    /// The failing reason is logged only when `report` is set.
    pub fn check_can_link_to(&self, source: AnchorId, target: AnchorId, report: bool) -> bool {
        if !self.anchors.contains_key(&source) || !self.anchors.contains_key(&target) {
            if report {
                warn!("cannot link {source:?} to {target:?}: unknown anchor");
            }
            return false;
        }
        match self.refusal_reason(source, target) {
            None => true,
            Some(reason) => {
                if report {
                    warn!("cannot link {source:?} to {target:?}: {reason}");
                }
                false
            }
        }
    }

    /// Why a `source` -> `target` link would be refused, if it would.
    ///
    /// Checks run in a fixed order and the first failure wins, so the
    /// user-facing message is deterministic: type mismatch, same host,
    /// own state, target state, joint length, source angle, target
    /// angle, collision. `None` means the link is legal; callers check
    /// that both ids exist.
    pub fn refusal_reason(&self, source: AnchorId, target: AnchorId) -> Option<RejectReason> {
        let src = self.anchors.get(&source)?;
        let tgt = self.anchors.get(&target)?;

        if src.link_type() != tgt.link_type() {
            return Some(RejectReason::TypeMismatch {
                source: src.link_type().to_string(),
                target: tgt.link_type().to_string(),
            });
        }
        if src.host() == tgt.host() {
            return Some(RejectReason::SameHost);
        }
        if !src.machine.can_transition_to(&LinkState::Linked) {
            return Some(RejectReason::SourceBusy { state: src.state() });
        }
        if tgt.state() != LinkState::AcceptingLinks {
            return Some(RejectReason::TargetNotAccepting { state: tgt.state() });
        }

        let source_pose = &src.attach_point().pose;
        let target_pose = &tgt.attach_point().pose;
        if let Some(joints) = self.caps.joints.as_deref() {
            if let Some(reason) = joints.check_length(source_pose, target_pose) {
                return Some(RejectReason::JointTooLong(reason));
            }
            if let Some(reason) = joints.check_source_angle(source_pose, target_pose) {
                return Some(RejectReason::SourceAngleExceeded(reason));
            }
            if let Some(reason) = joints.check_target_angle(source_pose, target_pose) {
                return Some(RejectReason::TargetAngleExceeded(reason));
            }
        }
        if let Some(collision) = self.caps.collision.as_deref() {
            if let Some(reason) = collision.check_hits(source_pose, target_pose) {
                return Some(RejectReason::Obstructed(reason));
            }
        }
        None
    }

    /// Request the lock transition for an anchor when it differs from
    /// the current lock flag; redundant requests are ignored so hooks
    /// do not churn.
    pub fn set_locked(&mut self, id: AnchorId, locked: bool) {
        let Some(anchor) = self.anchors.get(&id) else {
            return;
        };
        if anchor.is_locked() == locked {
            return;
        }
        if locked && !anchor.machine.can_transition_to(&LinkState::Locked) {
            debug!("{id:?} cannot lock from {:?}", anchor.state());
            return;
        }
        let to = if locked {
            LinkState::Locked
        } else {
            LinkState::Available
        };
        if let Err(err) = self.set_state(id, to) {
            error!("set_locked: {err}");
        }
    }

    // ---- external teardown triggers -------------------------------------

    /// A host died. Linked targets delegate the break to their source
    /// (only the source owns the decoupling logic); linked sources
    /// break their own link; an open round is cancelled. A dead host
    /// never restores, so its persisted records are cleared - contrast
    /// [`remove_host`](Self::remove_host), which keeps them.
    pub fn notify_host_death(&mut self, host_id: HostId) {
        let Some(host) = self.hosts.get(&host_id) else {
            warn!("notify_host_death: unknown host");
            return;
        };
        enum Action {
            Cancel(AnchorId),
            Break(AnchorId),
        }
        let anchors = host.anchors.clone();
        for id in anchors.iter().copied() {
            let action = match self.anchors.get(&id) {
                Some(anchor) => match (anchor.state(), &anchor.role) {
                    (LinkState::Linking, Role::Source(_)) => Some(Action::Cancel(id)),
                    (LinkState::Linked, Role::Source(_)) => Some(Action::Break(id)),
                    (LinkState::Linked, Role::Target(role)) => role.source.map(Action::Break),
                    _ => None,
                },
                None => None,
            };
            match action {
                Some(Action::Cancel(source)) => self.cancel_linking(source),
                Some(Action::Break(source)) => {
                    self.break_current_link(source, LinkActor::Physics);
                }
                None => {}
            }
        }
        for id in anchors {
            let Some(name) = self
                .anchors
                .get(&id)
                .map(|anchor| anchor.attach_point().name.clone())
            else {
                continue;
            };
            if let Some(store) = self.caps.persistence.as_deref_mut() {
                store.clear(host_id, &name);
            }
        }
    }

    /// The anchor's attach point was decoupled by an external force.
    /// The bodies are already separated, so only the logical unlink
    /// runs; no second decoupling is requested.
    pub fn notify_decoupled(&mut self, id: AnchorId) {
        let Some(anchor) = self.anchors.get(&id) else {
            warn!("notify_decoupled: {id:?} is not a registered anchor");
            return;
        };
        if anchor.state() != LinkState::Linked {
            return;
        }
        let pair = match (&anchor.role, anchor.peer()) {
            (Role::Source(_), Some(target)) => Some((id, target)),
            (Role::Target(_), Some(source)) => Some((source, id)),
            _ => None,
        };
        if let Some((source, target)) = pair {
            self.unlink(source, target, LinkActor::Physics);
        }
    }

    /// Unload a host: stop its machines (dropping their subscriptions),
    /// cancel its deferred tasks and drop its attach points. Persisted
    /// records are left untouched so the host can be restored later.
    pub fn remove_host(&mut self, host_id: HostId) {
        let Some(host) = self.hosts.get(&host_id) else {
            warn!("remove_host: unknown host");
            return;
        };
        let anchors = host.anchors.clone();
        self.scheduler.cancel_anchors(&anchors);
        for id in anchors {
            let Some(mut anchor) = self.anchors.remove(&id) else {
                continue;
            };
            anchor.machine.stop(&mut self.bus);
            self.bus.drop_subscriber(id);
            if anchor.attach_handle.is_some() {
                if let Some(attach) = self.caps.attach.as_deref_mut() {
                    attach.drop_point(host_id, &anchor.attach_point.name);
                }
            }
        }
        self.hosts.remove(&host_id);
    }

    // ---- persistence & restore ------------------------------------------

    /// Restore an anchor from its persisted record, read exactly once.
    ///
    /// A `Linked` record with a coupling mode resolves its peer
    /// synchronously before the machine starts; other modes start the
    /// machine and defer resolution to the end of the current tick
    /// (the peer host may not be loaded yet). Unresolvable peers demote
    /// the anchor to `Available` - a dangling `Linked` is never left
    /// behind. Transient negotiation states never survive a reload.
    pub fn restore_anchor(&mut self, id: AnchorId) -> Result<(), LinkError> {
        let (host, name) = {
            let anchor = self
                .anchors
                .get(&id)
                .ok_or(LinkError::UnknownAnchor(id))?;
            (anchor.host(), anchor.attach_point().name.clone())
        };
        let record = self
            .caps
            .persistence
            .as_deref()
            .and_then(|store| store.load(host, &name));

        if let Some(anchor) = self.anchors.get_mut(&id) {
            anchor.machine.stop(&mut self.bus);
        }

        let Some(record) = record else {
            return self.start_machine(id, LinkState::Available);
        };

        if let Some(role) = self.anchors.get_mut(&id).and_then(Anchor::source_role_mut) {
            role.mode = record.link_mode;
        }

        if record.state == LinkState::Linked {
            return self.restore_linked(id, record);
        }
        if record.state.is_transient() {
            debug!(
                "restore: demoting transient persisted state {:?} on {id:?}",
                record.state
            );
            self.start_machine(id, LinkState::Available)?;
            self.persist(id);
            return Ok(());
        }
        self.start_machine(id, record.state)
    }

    fn restore_linked(&mut self, id: AnchorId, record: LinkRecord) -> Result<(), LinkError> {
        let Some(peer_host) = record.peer_host() else {
            error!("restore: {id:?} persisted as linked without a peer host");
            return self.demote_to_available(id);
        };
        if let Some(role) = self.anchors.get_mut(&id).and_then(Anchor::target_role_mut) {
            role.mode = Some(record.link_mode);
        }
        if record.link_mode.couples() {
            // Coupled pairs load as one assembly; the peer must already
            // be there.
            match self.resolve_peer(id, peer_host) {
                Some(peer) => self.establish_restored_link(id, peer),
                None => {
                    error!("{}", LinkError::PeerUnresolvable { anchor: id, host: peer_host });
                    self.demote_to_available(id)
                }
            }
        } else {
            self.start_machine(id, LinkState::Linked)?;
            self.scheduler
                .schedule(DeferredTask::ResolvePeer { anchor: id, peer_host });
            Ok(())
        }
    }

    /// Run the deferred tasks queued during this tick.
    pub fn tick(&mut self) {
        for task in self.scheduler.drain() {
            match task {
                DeferredTask::ResolvePeer { anchor, peer_host } => {
                    self.deferred_resolve(anchor, peer_host);
                }
            }
        }
    }

    fn deferred_resolve(&mut self, id: AnchorId, peer_host: HostId) {
        let Some(anchor) = self.anchors.get(&id) else {
            return;
        };
        if anchor.state() != LinkState::Linked {
            return;
        }
        if anchor.peer().is_some() {
            // The other side resolved the pair already.
            return;
        }
        match self.resolve_peer(id, peer_host) {
            Some(peer) => {
                if let Err(err) = self.establish_restored_link(id, peer) {
                    error!("restore: {err}");
                }
            }
            None => {
                error!("{}", LinkError::PeerUnresolvable { anchor: id, host: peer_host });
                if let Err(err) = self.demote_to_available(id) {
                    error!("restore: {err}");
                }
            }
        }
    }

    /// Find the counterpart anchor of `id` on `peer_host`.
    fn resolve_peer(&self, id: AnchorId, peer_host: HostId) -> Option<AnchorId> {
        let me = self.anchors.get(&id)?;
        let my_host = me.host();
        let want_source = me.is_target();
        let host = self.hosts.get(&peer_host)?;

        let candidates: Vec<&Anchor> = host
            .anchors
            .iter()
            .filter_map(|candidate| self.anchors.get(candidate))
            .filter(|candidate| {
                candidate.is_source() == want_source && candidate.link_type() == me.link_type()
            })
            .collect();

        // Prefer a counterpart already referencing us, then one whose
        // own record points back at our host, then any unlinked one.
        if let Some(back_ref) = candidates.iter().find(|c| c.peer() == Some(id)) {
            return Some(back_ref.id());
        }
        if let Some(store) = self.caps.persistence.as_deref() {
            if let Some(persisted) = candidates.iter().find(|c| {
                c.peer().is_none()
                    && store
                        .load(c.host(), &c.attach_point().name)
                        .map(|record| record.peer_host_id == my_host.raw())
                        .unwrap_or(false)
            }) {
                return Some(persisted.id());
            }
        }
        candidates
            .iter()
            .find(|c| c.peer().is_none())
            .map(|c| c.id())
    }

    /// Re-establish a restored link pair without republishing
    /// `LinkCreated`; sibling locks are restored from the siblings' own
    /// persisted records.
    fn establish_restored_link(&mut self, a: AnchorId, b: AnchorId) -> Result<(), LinkError> {
        let a_is_source = self
            .anchors
            .get(&a)
            .map(Anchor::is_source)
            .unwrap_or(false);
        let (source, target) = if a_is_source { (a, b) } else { (b, a) };

        let mode = self
            .anchors
            .get(&source)
            .and_then(Anchor::link_mode)
            .unwrap_or(LinkMode::TieVessels);
        if let Some(role) = self
            .anchors
            .get_mut(&source)
            .and_then(Anchor::source_role_mut)
        {
            role.target = Some(target);
        }
        if let Some(role) = self
            .anchors
            .get_mut(&target)
            .and_then(Anchor::target_role_mut)
        {
            role.source = Some(source);
            role.mode = Some(mode);
        }
        for id in [source, target] {
            let (started, linked) = match self.anchors.get(&id) {
                Some(anchor) => (anchor.machine.is_started(), anchor.is_linked()),
                None => continue,
            };
            if started && linked {
                self.persist(id);
                continue;
            }
            // A peer still sitting in its freshly-created state is
            // restored in place; its own restoration becomes a no-op.
            if started {
                if let Some(anchor) = self.anchors.get_mut(&id) {
                    anchor.machine.stop(&mut self.bus);
                }
            }
            self.start_machine(id, LinkState::Linked)?;
            self.persist(id);
        }
        Ok(())
    }

    fn demote_to_available(&mut self, id: AnchorId) -> Result<(), LinkError> {
        let started = {
            let anchor = self
                .anchors
                .get_mut(&id)
                .ok_or(LinkError::UnknownAnchor(id))?;
            match &mut anchor.role {
                Role::Source(role) => {
                    role.target = None;
                    role.actor = None;
                }
                Role::Target(role) => {
                    role.source = None;
                    role.mode = None;
                    role.candidate = None;
                }
            }
            anchor.machine.is_started()
        };
        if started {
            self.set_state(id, LinkState::Available)?;
        } else {
            self.start_machine(id, LinkState::Available)?;
            self.persist(id);
        }
        Ok(())
    }

    // ---- event delivery --------------------------------------------------

    fn publish(&mut self, event: BusEvent) -> Result<(), LinkError> {
        let channel = event.channel();
        if !self.bus.begin_dispatch(channel) {
            let err = LinkError::ReentrantPublish(channel);
            error!("{err}");
            return Err(err);
        }
        self.events.push(event);
        for listener in self.bus.subscribers(channel) {
            self.deliver(listener, event);
        }
        self.bus.end_dispatch(channel);
        Ok(())
    }

    fn deliver(&mut self, listener: AnchorId, event: BusEvent) {
        match event {
            BusEvent::StartLinking(source) => self.on_start_linking(listener, source),
            BusEvent::StopLinking(source) => self.on_stop_linking(listener, source),
            BusEvent::LinkAccepted(target) => self.on_link_accepted(listener, target),
            // Co-located listeners are reached through the host
            // registry, not these channels; they stay observational.
            BusEvent::LinkCreated(_) | BusEvent::LinkBroken(_) => {}
        }
    }

    fn on_start_linking(&mut self, listener: AnchorId, source: AnchorId) {
        let Some(candidate) = self.candidate_info(source) else {
            return;
        };
        if listener == candidate.id {
            return;
        }
        let Some(anchor) = self.anchors.get(&listener) else {
            return;
        };
        if anchor.state() != LinkState::Available {
            return;
        }
        let listener_is_source = anchor.is_source();
        let listener_host = anchor.host();
        let listener_type = anchor.link_type().to_string();

        if listener_is_source {
            // A rival source steps aside for the duration of the round.
            if let Err(err) = self.set_state(listener, LinkState::RejectingLinks) {
                error!("on_start_linking: {err}");
            }
            return;
        }

        let Some(vessel) = self.hosts.get(&listener_host).map(Host::vessel) else {
            return;
        };
        let compatible =
            candidate_is_compatible(&candidate, listener_host, vessel, &listener_type);
        if compatible {
            if let Some(role) = self
                .anchors
                .get_mut(&listener)
                .and_then(Anchor::target_role_mut)
            {
                role.candidate = Some(source);
            }
        }
        let next = if compatible {
            LinkState::AcceptingLinks
        } else {
            LinkState::RejectingLinks
        };
        if let Err(err) = self.set_state(listener, next) {
            error!("on_start_linking: {err}");
        }
    }

    fn on_stop_linking(&mut self, listener: AnchorId, _source: AnchorId) {
        let Some(anchor) = self.anchors.get_mut(&listener) else {
            return;
        };
        if !matches!(
            anchor.state(),
            LinkState::AcceptingLinks | LinkState::RejectingLinks
        ) {
            return;
        }
        if let Some(role) = anchor.target_role_mut() {
            role.candidate = None;
        }
        if let Err(err) = self.set_state(listener, LinkState::Available) {
            error!("on_stop_linking: {err}");
        }
    }

    fn on_link_accepted(&mut self, listener: AnchorId, target: AnchorId) {
        let Some(anchor) = self.anchors.get(&listener) else {
            return;
        };
        if !anchor.is_source() || anchor.state() != LinkState::Linking {
            return;
        }
        // A failed commit leaves the round open; the reason was logged.
        self.link_to_target(listener, target);
    }

    fn candidate_info(&self, source: AnchorId) -> Option<CandidateSource> {
        let anchor = self.anchors.get(&source)?;
        let role = anchor.source_role()?;
        let vessel = self.hosts.get(&anchor.host()).map(Host::vessel)?;
        Some(CandidateSource {
            id: source,
            host: anchor.host(),
            vessel,
            link_type: anchor.link_type().to_string(),
            mode: role.mode,
        })
    }

    // ---- link commit / teardown internals --------------------------------

    fn commit_link(
        &mut self,
        source: AnchorId,
        target: AnchorId,
        actor: LinkActor,
    ) -> Result<(), LinkError> {
        // No-op reassignment is silent.
        if self.anchors.get(&source).and_then(Anchor::peer) == Some(target) {
            return Ok(());
        }
        let mode = {
            let anchor = self
                .anchors
                .get(&source)
                .ok_or(LinkError::UnknownAnchor(source))?;
            anchor
                .source_role()
                .ok_or(LinkError::UnknownAnchor(source))?
                .mode
        };
        if let Some(role) = self
            .anchors
            .get_mut(&source)
            .and_then(Anchor::source_role_mut)
        {
            role.target = Some(target);
        }
        {
            let anchor = self
                .anchors
                .get_mut(&target)
                .ok_or(LinkError::UnknownAnchor(target))?;
            if let Some(role) = anchor.target_role_mut() {
                role.source = Some(source);
                role.mode = Some(mode);
                role.candidate = None;
            }
        }
        self.set_state(source, LinkState::Linked)?;
        self.set_state(target, LinkState::Linked)?;

        let event = LinkEvent {
            source,
            target,
            actor,
        };
        let _ = self.publish(BusEvent::LinkCreated(event));
        self.notify_link_listeners(event, true);
        Ok(())
    }

    fn stop_linking_round(&mut self, source: AnchorId) {
        let _ = self.publish(BusEvent::StopLinking(source));
        if let Some(role) = self
            .anchors
            .get_mut(&source)
            .and_then(Anchor::source_role_mut)
        {
            role.actor = None;
        }
    }

    fn unlink(&mut self, source: AnchorId, target: AnchorId, actor: LinkActor) {
        let changed = self.anchors.get(&source).and_then(Anchor::peer) == Some(target);
        if let Some(role) = self
            .anchors
            .get_mut(&source)
            .and_then(Anchor::source_role_mut)
        {
            role.target = None;
            role.actor = None;
        }
        if let Some(role) = self
            .anchors
            .get_mut(&target)
            .and_then(Anchor::target_role_mut)
        {
            role.source = None;
            role.mode = None;
        }
        if let Err(err) = self.set_state(source, LinkState::Available) {
            error!("unlink: {err}");
        }
        if let Err(err) = self.set_state(target, LinkState::Available) {
            error!("unlink: {err}");
        }
        if changed {
            let event = LinkEvent {
                source,
                target,
                actor,
            };
            let _ = self.publish(BusEvent::LinkBroken(event));
            self.notify_link_listeners(event, false);
        }
    }

    /// Notify every co-hosted anchor on the two involved hosts that a
    /// link appeared or disappeared. Each listener locks itself when
    /// the link does not involve it, and unlocks symmetrically.
    /// Propagation is single-level: lock reactions never re-notify.
    fn notify_link_listeners(&mut self, event: LinkEvent, created: bool) {
        let mut listeners = Vec::new();
        for id in [event.source, event.target] {
            let Some(host) = self
                .anchors
                .get(&id)
                .and_then(|anchor| self.hosts.get(&anchor.host()))
            else {
                continue;
            };
            listeners.extend_from_slice(host.link_listeners());
        }
        for listener in listeners {
            if event.involves(listener) {
                continue;
            }
            self.set_locked(listener, created);
        }
    }

    // ---- shared plumbing -------------------------------------------------

    fn start_machine(&mut self, id: AnchorId, state: LinkState) -> Result<(), LinkError> {
        {
            let anchor = self
                .anchors
                .get_mut(&id)
                .ok_or(LinkError::UnknownAnchor(id))?;
            anchor.machine.start(state, &mut self.bus)?;
        }
        self.sync_attach_point(id);
        Ok(())
    }

    fn set_state(&mut self, id: AnchorId, to: LinkState) -> Result<(), LinkError> {
        {
            let anchor = self
                .anchors
                .get_mut(&id)
                .ok_or(LinkError::UnknownAnchor(id))?;
            anchor.machine.transition_to(to, &mut self.bus)?;
            // Visual cue while the anchor is a pickable candidate.
            anchor.highlighted = to == LinkState::AcceptingLinks;
        }
        self.sync_attach_point(id);
        self.persist(id);
        Ok(())
    }

    /// Lazily create the attach point's physical representation when a
    /// state needs it and drop it when none does.
    fn sync_attach_point(&mut self, id: AnchorId) {
        let Some(anchor) = self.anchors.get(&id) else {
            return;
        };
        let needs = anchor.state().needs_attach_point();
        let has = anchor.attach_handle.is_some();
        if needs == has {
            return;
        }
        let host = anchor.host();
        let name = anchor.attach_point().name.clone();
        let pose = anchor.attach_point().pose;

        if needs {
            let Some(attach) = self.caps.attach.as_deref_mut() else {
                return;
            };
            let handle = attach.create(host, &name, pose);
            if let Some(anchor) = self.anchors.get_mut(&id) {
                anchor.attach_handle = Some(handle);
            }
        } else {
            if let Some(attach) = self.caps.attach.as_deref_mut() {
                attach.drop_point(host, &name);
            }
            if let Some(anchor) = self.anchors.get_mut(&id) {
                anchor.attach_handle = None;
            }
        }
    }

    /// Project the anchor's live state into its persisted record.
    fn persist(&mut self, id: AnchorId) {
        let Some(anchor) = self.anchors.get(&id) else {
            return;
        };
        let peer_host_id = anchor
            .peer()
            .and_then(|peer| self.anchors.get(&peer))
            .map(|peer| peer.host().raw())
            .unwrap_or(LinkRecord::NO_PEER);
        let record = LinkRecord {
            state: anchor.state(),
            peer_host_id,
            link_mode: anchor.link_mode().unwrap_or(LinkMode::TieVessels),
        };
        let host = anchor.host();
        let name = anchor.attach_point().name.clone();
        if let Some(store) = self.caps.persistence.as_deref_mut() {
            store.save(host, &name, record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::testing::{CouplerCall, RecordMap, TestRig};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn pair(
        world: &mut World,
        link_type: &str,
        mode: LinkMode,
    ) -> (HostId, HostId, AnchorId, AnchorId) {
        let tug = world.add_host("tug");
        let barge = world.add_host("barge");
        let source = world
            .add_source(tug, "bow-dock", Pose::at([0.0, 0.0, 0.0]), link_type, mode)
            .unwrap();
        let target = world
            .add_target(barge, "stern-dock", Pose::at([1.0, 0.0, 0.0]), link_type)
            .unwrap();
        (tug, barge, source, target)
    }

    fn record_for(records: &Rc<RefCell<RecordMap>>, host: HostId, name: &str) -> LinkRecord {
        records
            .borrow()
            .get(&(host, name.to_string()))
            .copied()
            .unwrap()
    }

    #[test]
    fn negotiation_links_and_couples() {
        let rig = TestRig::new();
        let mut world = World::new(rig.caps);
        let (tug, barge, source, target) = pair(&mut world, "dock", LinkMode::DockVessels);

        assert!(world.start_linking(source, LinkActor::Player));
        assert_eq!(world.state_of(source), Some(LinkState::Linking));
        assert_eq!(world.state_of(target), Some(LinkState::AcceptingLinks));
        assert!(world.anchor(target).unwrap().highlighted());

        assert!(world.accept_link(target));
        assert_eq!(world.state_of(source), Some(LinkState::Linked));
        assert_eq!(world.state_of(target), Some(LinkState::Linked));
        assert_eq!(world.peer_of(source), Some(target));
        assert_eq!(world.peer_of(target), Some(source));
        assert!(!world.anchor(target).unwrap().highlighted());
        assert_eq!(
            *rig.coupler_calls.borrow(),
            vec![CouplerCall::Couple(tug, barge)]
        );

        let events = world.drain_events();
        assert!(events.contains(&BusEvent::LinkCreated(LinkEvent {
            source,
            target,
            actor: LinkActor::Player,
        })));
        assert_eq!(events.last(), Some(&BusEvent::StopLinking(source)));
    }

    #[test]
    fn break_unlinks_before_decoupling() {
        let rig = TestRig::new();
        let mut world = World::new(rig.caps);
        let (tug, barge, source, target) = pair(&mut world, "dock", LinkMode::DockVessels);
        world.start_linking(source, LinkActor::Api);
        world.accept_link(target);
        world.drain_events();

        assert!(world.break_current_link(source, LinkActor::Api));
        assert_eq!(world.state_of(source), Some(LinkState::Available));
        assert_eq!(world.state_of(target), Some(LinkState::Available));
        assert_eq!(world.peer_of(source), None);
        assert_eq!(world.peer_of(target), None);
        assert_eq!(
            *rig.coupler_calls.borrow(),
            vec![
                CouplerCall::Couple(tug, barge),
                CouplerCall::Decouple(tug, "bow-dock".to_string()),
            ]
        );
        assert!(world.drain_events().contains(&BusEvent::LinkBroken(LinkEvent {
            source,
            target,
            actor: LinkActor::Api,
        })));
    }

    #[test]
    fn mismatched_target_rejects_candidacy() {
        let rig = TestRig::new();
        let mut world = World::new(rig.caps);
        let tug = world.add_host("tug");
        let barge = world.add_host("barge");
        let source = world
            .add_source(tug, "s0", Pose::default(), "fuel", LinkMode::TieVessels)
            .unwrap();
        let target = world
            .add_target(barge, "t0", Pose::default(), "power")
            .unwrap();

        world.start_linking(source, LinkActor::Api);
        assert_eq!(world.state_of(target), Some(LinkState::RejectingLinks));
        assert!(!world.accept_link(target));
        assert_eq!(world.state_of(source), Some(LinkState::Linking));
    }

    #[test]
    fn same_host_target_rejects_candidacy() {
        let rig = TestRig::new();
        let mut world = World::new(rig.caps);
        let tug = world.add_host("tug");
        let source = world
            .add_source(tug, "s0", Pose::default(), "fuel", LinkMode::TieAnyParts)
            .unwrap();
        let sibling = world.add_target(tug, "t0", Pose::default(), "fuel").unwrap();

        world.start_linking(source, LinkActor::Api);
        assert_eq!(world.state_of(sibling), Some(LinkState::RejectingLinks));
    }

    #[test]
    fn rival_source_steps_aside_for_the_round() {
        let rig = TestRig::new();
        let mut world = World::new(rig.caps);
        let (_, _, source, _) = pair(&mut world, "dock", LinkMode::DockVessels);
        let other = world.add_host("skiff");
        let rival = world
            .add_source(other, "s1", Pose::default(), "dock", LinkMode::DockVessels)
            .unwrap();

        world.start_linking(source, LinkActor::Api);
        assert_eq!(world.state_of(rival), Some(LinkState::RejectingLinks));

        world.cancel_linking(source);
        assert_eq!(world.state_of(rival), Some(LinkState::Available));
    }

    #[test]
    fn cancel_returns_the_round_to_available() {
        let rig = TestRig::new();
        let mut world = World::new(rig.caps);
        let (_, _, source, target) = pair(&mut world, "dock", LinkMode::DockVessels);

        world.start_linking(source, LinkActor::Player);
        world.cancel_linking(source);

        assert_eq!(world.state_of(source), Some(LinkState::Available));
        assert_eq!(world.state_of(target), Some(LinkState::Available));
        assert_eq!(world.peer_of(source), None);
    }

    #[test]
    fn sibling_anchors_lock_while_a_link_exists() {
        let rig = TestRig::new();
        let mut world = World::new(rig.caps);
        let (tug, _, source, target) = pair(&mut world, "dock", LinkMode::DockVessels);
        let sibling = world
            .add_target(tug, "aft-dock", Pose::default(), "dock")
            .unwrap();

        world.start_linking(source, LinkActor::Player);
        assert_eq!(world.state_of(sibling), Some(LinkState::RejectingLinks));

        world.accept_link(target);
        assert_eq!(world.state_of(sibling), Some(LinkState::Locked));
        assert!(world.anchor(sibling).unwrap().is_locked());

        world.break_current_link(source, LinkActor::Player);
        assert_eq!(world.state_of(sibling), Some(LinkState::Available));
    }

    #[test]
    fn anchors_registered_after_a_link_start_locked() {
        let rig = TestRig::new();
        let mut world = World::new(rig.caps);
        let (tug, _, source, target) = pair(&mut world, "dock", LinkMode::DockVessels);
        world.start_linking(source, LinkActor::Player);
        world.accept_link(target);

        let late = world
            .add_source(tug, "aft-dock", Pose::default(), "dock", LinkMode::DockVessels)
            .unwrap();
        assert_eq!(world.state_of(late), Some(LinkState::Locked));
        // A second concurrent link from the same host stays impossible.
        assert!(!world.start_linking(late, LinkActor::Player));
        assert_eq!(
            record_for(&rig.records, tug, "aft-dock").state,
            LinkState::Locked
        );

        world.break_current_link(source, LinkActor::Player);
        assert_eq!(world.state_of(late), Some(LinkState::Available));
    }

    #[test]
    fn anchors_registered_mid_round_sit_out_the_round() {
        let rig = TestRig::new();
        let mut world = World::new(rig.caps);
        let (tug, _, source, _) = pair(&mut world, "dock", LinkMode::DockVessels);
        world.start_linking(source, LinkActor::Player);

        let late = world
            .add_target(tug, "aft-dock", Pose::default(), "dock")
            .unwrap();
        assert_eq!(world.state_of(late), Some(LinkState::RejectingLinks));

        world.cancel_linking(source);
        assert_eq!(world.state_of(late), Some(LinkState::Available));
    }

    #[test]
    fn refusal_reasons_follow_the_fixed_order() {
        let rig = TestRig::new();
        let mut world = World::new(rig.caps);
        let (_, _, source, target) = pair(&mut world, "dock", LinkMode::DockVessels);

        world.start_linking(source, LinkActor::Api);
        assert_eq!(world.refusal_reason(source, target), None);

        // Both geometry checks fail at once; length is reported first.
        rig.joint_limits.borrow_mut().length = Some("3.2m > 2.0m".to_string());
        *rig.obstruction.borrow_mut() = Some("strut in the way".to_string());
        assert_eq!(
            world.refusal_reason(source, target),
            Some(RejectReason::JointTooLong("3.2m > 2.0m".to_string()))
        );

        rig.joint_limits.borrow_mut().length = None;
        assert_eq!(
            world.refusal_reason(source, target),
            Some(RejectReason::Obstructed("strut in the way".to_string()))
        );

        // Structural checks precede geometry entirely.
        let skiff = world.add_host("skiff");
        let mismatched = world
            .add_target(skiff, "t9", Pose::default(), "power")
            .unwrap();
        rig.joint_limits.borrow_mut().length = Some("3.2m > 2.0m".to_string());
        assert_eq!(
            world.refusal_reason(source, mismatched),
            Some(RejectReason::TypeMismatch {
                source: "dock".to_string(),
                target: "power".to_string(),
            })
        );

        // A failed commit leaves the round open.
        assert!(!world.accept_link(target));
        assert_eq!(world.state_of(source), Some(LinkState::Linking));
    }

    #[test]
    fn linked_source_reports_busy() {
        let rig = TestRig::new();
        let mut world = World::new(rig.caps);
        let (_, _, source, target) = pair(&mut world, "dock", LinkMode::DockVessels);
        world.start_linking(source, LinkActor::Api);
        world.accept_link(target);

        assert_eq!(
            world.refusal_reason(source, target),
            Some(RejectReason::SourceBusy {
                state: LinkState::Linked,
            })
        );
    }

    #[test]
    fn records_follow_every_state_and_peer_change() {
        let rig = TestRig::new();
        let mut world = World::new(rig.caps);
        let (tug, barge, source, target) = pair(&mut world, "dock", LinkMode::DockVessels);

        world.start_linking(source, LinkActor::Player);
        assert_eq!(
            record_for(&rig.records, tug, "bow-dock").state,
            LinkState::Linking
        );

        world.accept_link(target);
        let source_record = record_for(&rig.records, tug, "bow-dock");
        assert_eq!(source_record.state, LinkState::Linked);
        assert_eq!(source_record.peer_host(), Some(barge));
        assert_eq!(source_record.link_mode, LinkMode::DockVessels);

        let target_record = record_for(&rig.records, barge, "stern-dock");
        assert_eq!(target_record.state, LinkState::Linked);
        assert_eq!(target_record.peer_host(), Some(tug));
        assert_eq!(target_record.link_mode, LinkMode::DockVessels);

        world.break_current_link(source, LinkActor::Player);
        assert_eq!(
            record_for(&rig.records, tug, "bow-dock").state,
            LinkState::Available
        );
        assert_eq!(
            record_for(&rig.records, tug, "bow-dock").peer_host(),
            None
        );
    }

    #[test]
    fn coupled_pair_restores_synchronously() {
        let rig = TestRig::new();
        let mut world = World::new(rig.caps);
        let (_, _, source, target) = pair(&mut world, "dock", LinkMode::DockVessels);
        world.start_linking(source, LinkActor::Player);
        world.accept_link(target);

        let rig2 = TestRig::new();
        rig2.records
            .borrow_mut()
            .extend(rig.records.borrow().iter().map(|(k, v)| (k.clone(), *v)));
        let mut reloaded = World::new(rig2.caps);
        let (_, _, source, target) = pair(&mut reloaded, "dock", LinkMode::DockVessels);
        reloaded.drain_events();

        reloaded.restore_anchor(source).unwrap();
        reloaded.restore_anchor(target).unwrap();

        assert_eq!(reloaded.state_of(source), Some(LinkState::Linked));
        assert_eq!(reloaded.state_of(target), Some(LinkState::Linked));
        assert_eq!(reloaded.peer_of(source), Some(target));
        assert_eq!(reloaded.peer_of(target), Some(source));
        // Restoring re-establishes the pair without republishing.
        assert!(!reloaded
            .drain_events()
            .iter()
            .any(|event| matches!(event, BusEvent::LinkCreated(_))));
        // The bodies are already one assembly; no second coupling.
        assert!(rig2.coupler_calls.borrow().is_empty());
    }

    #[test]
    fn tied_pair_restores_at_end_of_tick() {
        let rig = TestRig::new();
        let mut world = World::new(rig.caps);
        let (_, _, source, target) = pair(&mut world, "tie", LinkMode::TieVessels);
        world.set_eva_active(true);
        world.start_linking(source, LinkActor::Eva);
        world.accept_link(target);
        // Ties never merge assemblies.
        assert!(rig.coupler_calls.borrow().is_empty());

        let rig2 = TestRig::new();
        rig2.records
            .borrow_mut()
            .extend(rig.records.borrow().iter().map(|(k, v)| (k.clone(), *v)));
        let mut reloaded = World::new(rig2.caps);
        let (_, _, source, target) = pair(&mut reloaded, "tie", LinkMode::TieVessels);

        reloaded.restore_anchor(source).unwrap();
        reloaded.restore_anchor(target).unwrap();
        assert_eq!(reloaded.state_of(source), Some(LinkState::Linked));
        assert_eq!(reloaded.peer_of(source), None);

        reloaded.tick();
        assert_eq!(reloaded.peer_of(source), Some(target));
        assert_eq!(reloaded.peer_of(target), Some(source));
    }

    #[test]
    fn unresolvable_peer_demotes_to_available() {
        let rig = TestRig::new();
        let mut world = World::new(rig.caps);
        let tug = world.add_host("tug");
        let source = world
            .add_source(tug, "bow-dock", Pose::default(), "dock", LinkMode::DockVessels)
            .unwrap();
        rig.records.borrow_mut().insert(
            (tug, "bow-dock".to_string()),
            LinkRecord {
                state: LinkState::Linked,
                peer_host_id: 99,
                link_mode: LinkMode::DockVessels,
            },
        );

        world.restore_anchor(source).unwrap();

        assert_eq!(world.state_of(source), Some(LinkState::Available));
        let record = record_for(&rig.records, tug, "bow-dock");
        assert_eq!(record.state, LinkState::Available);
        assert_eq!(record.peer_host(), None);
    }

    #[test]
    fn deferred_resolution_failure_demotes_at_tick() {
        let rig = TestRig::new();
        let mut world = World::new(rig.caps);
        let tug = world.add_host("tug");
        let source = world
            .add_source(tug, "tie-0", Pose::default(), "tie", LinkMode::TieVessels)
            .unwrap();
        rig.records.borrow_mut().insert(
            (tug, "tie-0".to_string()),
            LinkRecord {
                state: LinkState::Linked,
                peer_host_id: 99,
                link_mode: LinkMode::TieVessels,
            },
        );

        world.restore_anchor(source).unwrap();
        assert_eq!(world.state_of(source), Some(LinkState::Linked));

        world.tick();
        assert_eq!(world.state_of(source), Some(LinkState::Available));
        assert_eq!(record_for(&rig.records, tug, "tie-0").peer_host(), None);
    }

    #[test]
    fn transient_states_never_survive_a_restore() {
        let rig = TestRig::new();
        let mut world = World::new(rig.caps);
        let tug = world.add_host("tug");
        let source = world
            .add_source(tug, "bow-dock", Pose::default(), "dock", LinkMode::DockVessels)
            .unwrap();
        rig.records.borrow_mut().insert(
            (tug, "bow-dock".to_string()),
            LinkRecord {
                state: LinkState::Linking,
                peer_host_id: 0,
                link_mode: LinkMode::DockVessels,
            },
        );

        world.restore_anchor(source).unwrap();

        assert_eq!(world.state_of(source), Some(LinkState::Available));
        assert_eq!(
            record_for(&rig.records, tug, "bow-dock").state,
            LinkState::Available
        );
    }

    #[test]
    fn eva_rounds_require_an_active_crew_member() {
        let rig = TestRig::new();
        let mut world = World::new(rig.caps);
        let (_, _, source, _) = pair(&mut world, "tie", LinkMode::TieVessels);

        assert!(!world.start_linking(source, LinkActor::Eva));
        assert_eq!(world.state_of(source), Some(LinkState::Available));

        world.set_eva_active(true);
        assert!(world.start_linking(source, LinkActor::Eva));
    }

    #[test]
    fn missing_capabilities_disable_linking() {
        let mut world = World::new(Capabilities::new());
        let tug = world.add_host("tug");
        let source = world
            .add_source(tug, "s0", Pose::default(), "dock", LinkMode::DockVessels)
            .unwrap();

        assert!(!world.start_linking(source, LinkActor::Player));
        assert_eq!(world.state_of(source), Some(LinkState::Available));
    }

    #[test]
    fn attach_points_exist_only_while_needed() {
        let rig = TestRig::new();
        let mut world = World::new(rig.caps);
        let (tug, barge, source, target) = pair(&mut world, "dock", LinkMode::DockVessels);
        assert!(rig.live_attach_points.borrow().is_empty());

        world.start_linking(source, LinkActor::Player);
        assert_eq!(
            *rig.live_attach_points.borrow(),
            vec![
                (tug, "bow-dock".to_string()),
                (barge, "stern-dock".to_string()),
            ]
        );

        world.accept_link(target);
        assert_eq!(rig.live_attach_points.borrow().len(), 2);

        world.break_current_link(source, LinkActor::Player);
        assert!(rig.live_attach_points.borrow().is_empty());
    }

    #[test]
    fn external_decoupling_skips_the_coupler() {
        let rig = TestRig::new();
        let mut world = World::new(rig.caps);
        let (tug, barge, source, target) = pair(&mut world, "dock", LinkMode::DockVessels);
        world.start_linking(source, LinkActor::Player);
        world.accept_link(target);

        world.notify_decoupled(target);

        assert_eq!(world.state_of(source), Some(LinkState::Available));
        assert_eq!(world.state_of(target), Some(LinkState::Available));
        assert_eq!(
            *rig.coupler_calls.borrow(),
            vec![CouplerCall::Couple(tug, barge)]
        );
    }

    #[test]
    fn host_death_breaks_through_the_source() {
        let rig = TestRig::new();
        let mut world = World::new(rig.caps);
        let (tug, _, source, target) = pair(&mut world, "dock", LinkMode::DockVessels);
        world.start_linking(source, LinkActor::Player);
        world.accept_link(target);
        world.drain_events();

        let barge = world.anchor(target).unwrap().host();
        world.notify_host_death(barge);

        assert_eq!(world.state_of(source), Some(LinkState::Available));
        assert_eq!(world.state_of(target), Some(LinkState::Available));
        assert!(rig
            .coupler_calls
            .borrow()
            .contains(&CouplerCall::Decouple(tug, "bow-dock".to_string())));
        assert!(world.drain_events().contains(&BusEvent::LinkBroken(LinkEvent {
            source,
            target,
            actor: LinkActor::Physics,
        })));
    }

    #[test]
    fn a_dead_host_leaves_no_records_behind() {
        let rig = TestRig::new();
        let mut world = World::new(rig.caps);
        let (tug, barge, source, target) = pair(&mut world, "dock", LinkMode::DockVessels);
        world.start_linking(source, LinkActor::Player);
        world.accept_link(target);

        world.notify_host_death(tug);

        assert!(rig
            .records
            .borrow()
            .get(&(tug, "bow-dock".to_string()))
            .is_none());
        // The surviving peer keeps its (now unlinked) record.
        let peer_record = record_for(&rig.records, barge, "stern-dock");
        assert_eq!(peer_record.state, LinkState::Available);
        assert_eq!(peer_record.peer_host(), None);
    }

    #[test]
    fn unloading_a_host_keeps_its_records() {
        let rig = TestRig::new();
        let mut world = World::new(rig.caps);
        let (tug, barge, source, target) = pair(&mut world, "dock", LinkMode::DockVessels);
        world.start_linking(source, LinkActor::Player);
        world.accept_link(target);

        world.remove_host(tug);
        world.remove_host(barge);

        assert!(world.anchor(source).is_none());
        assert!(world.host(tug).is_none());
        assert_eq!(record_for(&rig.records, tug, "bow-dock").state, LinkState::Linked);
        assert_eq!(
            record_for(&rig.records, barge, "stern-dock").state,
            LinkState::Linked
        );
        assert!(rig.live_attach_points.borrow().is_empty());
    }
}
