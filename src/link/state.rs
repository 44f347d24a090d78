//! The shared link state enum for both peer roles.

use crate::state_enum;

state_enum! {
    /// State of a link anchor. Persisted across save/load.
    ///
    /// The same enum serves both roles; `Linking` is only ever entered
    /// by sources and `AcceptingLinks` only by targets. The machine
    /// whitelists per role enforce that.
    pub enum LinkState {
        /// Idle and listening for negotiation rounds.
        Available,
        /// Source only: driving a negotiation round.
        Linking,
        /// Target only: evaluated the proposer and is a candidate.
        AcceptingLinks,
        /// Opted out of the current negotiation round.
        RejectingLinks,
        /// Committed link with a peer.
        Linked,
        /// Disabled because a sibling anchor on the same host is linked.
        Locked,
    }
}

impl LinkState {
    /// States in which the attach point's physical representation must
    /// exist. It is created lazily on entry and dropped when the anchor
    /// returns to `Available`.
    pub fn needs_attach_point(self) -> bool {
        matches!(self, Self::Linking | Self::AcceptingLinks | Self::Linked)
    }

    /// States that only exist inside a live negotiation round. They are
    /// never meaningful across a save/load boundary.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Linking | Self::AcceptingLinks | Self::RejectingLinks)
    }
}
