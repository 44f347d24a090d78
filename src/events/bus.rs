//! Process-wide event channels for the link protocol.
//!
//! The bus is a subscription registry, not a dispatcher: it records
//! which anchors listen on which channel, in subscription order. The
//! world performs delivery synchronously on the calling tick - there is
//! no queuing and no cross-tick delay. Publishing a channel from a
//! handler of that same channel is a precondition violation (it would
//! recurse without bound); the bus tracks in-flight channels so the
//! world can fail loudly instead of relying on the accidental absence
//! of cycles.

use crate::link::{AnchorId, LinkActor};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// The five link-protocol channels.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Channel {
    StartLinking,
    StopLinking,
    LinkAccepted,
    LinkCreated,
    LinkBroken,
}

/// Payload of `LinkCreated`/`LinkBroken` notifications.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct LinkEvent {
    /// The source anchor of the link.
    pub source: AnchorId,
    /// The target anchor of the link.
    pub target: AnchorId,
    /// Who caused the change.
    pub actor: LinkActor,
}

impl LinkEvent {
    /// Whether `anchor` is one of the two link peers.
    pub fn involves(&self, anchor: AnchorId) -> bool {
        self.source == anchor || self.target == anchor
    }
}

/// A published event, tagged with its channel payload.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BusEvent {
    /// A source entered linking mode.
    StartLinking(AnchorId),
    /// A source left linking mode; the negotiation round is over.
    StopLinking(AnchorId),
    /// An accepting target was selected as the winner candidate.
    LinkAccepted(AnchorId),
    /// A logical link was committed.
    LinkCreated(LinkEvent),
    /// A logical link was torn down.
    LinkBroken(LinkEvent),
}

impl BusEvent {
    /// The channel this event is published on.
    pub fn channel(&self) -> Channel {
        match self {
            Self::StartLinking(_) => Channel::StartLinking,
            Self::StopLinking(_) => Channel::StopLinking,
            Self::LinkAccepted(_) => Channel::LinkAccepted,
            Self::LinkCreated(_) => Channel::LinkCreated,
            Self::LinkBroken(_) => Channel::LinkBroken,
        }
    }
}

/// Subscription registry for the link channels.
///
/// Constructed with the world at process start and dropped with it;
/// never an ambient singleton. Anchors subscribe and unsubscribe from
/// their state machine enter/leave hooks.
///
/// # Example
///
/// ```rust
/// use tether::events::{Channel, EventBus};
/// use tether::link::AnchorId;
///
/// let mut bus = EventBus::new();
/// let anchor = AnchorId(1);
///
/// bus.subscribe(Channel::StartLinking, anchor);
/// assert!(bus.is_subscribed(Channel::StartLinking, anchor));
///
/// // Duplicate subscription is refused - the handler would otherwise
/// // double-process every event.
/// bus.subscribe(Channel::StartLinking, anchor);
/// assert_eq!(bus.subscribers(Channel::StartLinking).len(), 1);
///
/// bus.unsubscribe(Channel::StartLinking, anchor);
/// bus.unsubscribe(Channel::StartLinking, anchor); // idempotent
/// assert!(!bus.is_subscribed(Channel::StartLinking, anchor));
/// ```
#[derive(Default)]
pub struct EventBus {
    subscribers: HashMap<Channel, Vec<AnchorId>>,
    in_flight: HashSet<Channel>,
}

impl EventBus {
    /// Create a bus with no subscriptions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `anchor` to the channel's subscriber list.
    ///
    /// Refuses duplicates: a listener subscribed twice would process
    /// every link event twice.
    pub fn subscribe(&mut self, channel: Channel, anchor: AnchorId) {
        let subscribers = self.subscribers.entry(channel).or_default();
        if subscribers.contains(&anchor) {
            debug!("{anchor:?} is already subscribed to {channel:?}");
            return;
        }
        subscribers.push(anchor);
    }

    /// Remove `anchor` from the channel's subscriber list. Idempotent.
    pub fn unsubscribe(&mut self, channel: Channel, anchor: AnchorId) {
        if let Some(subscribers) = self.subscribers.get_mut(&channel) {
            subscribers.retain(|id| *id != anchor);
        }
    }

    /// Remove `anchor` from every channel (host teardown).
    pub fn drop_subscriber(&mut self, anchor: AnchorId) {
        for subscribers in self.subscribers.values_mut() {
            subscribers.retain(|id| *id != anchor);
        }
    }

    /// Whether `anchor` currently listens on `channel`.
    pub fn is_subscribed(&self, channel: Channel, anchor: AnchorId) -> bool {
        self.subscribers
            .get(&channel)
            .map(|subscribers| subscribers.contains(&anchor))
            .unwrap_or(false)
    }

    /// Snapshot of the channel's subscribers in subscription order.
    ///
    /// Delivery iterates the snapshot, so handlers that subscribe
    /// mid-dispatch do not receive the event being dispatched.
    pub fn subscribers(&self, channel: Channel) -> Vec<AnchorId> {
        self.subscribers.get(&channel).cloned().unwrap_or_default()
    }

    /// Mark `channel` as being dispatched. Returns `false` when the
    /// channel is already in flight (re-entrant publish).
    pub(crate) fn begin_dispatch(&mut self, channel: Channel) -> bool {
        self.in_flight.insert(channel)
    }

    /// Clear the in-flight mark set by `begin_dispatch`.
    pub(crate) fn end_dispatch(&mut self, channel: Channel) {
        self.in_flight.remove(&channel);
    }
}
