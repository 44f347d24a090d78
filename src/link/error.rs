//! Protocol-level errors.
//!
//! Only defects live here. Expected negotiation outcomes (a rejected
//! candidate, a busy target) are `bool` returns carrying a
//! [`RejectReason`](crate::link::RejectReason), never an `Err`.

use crate::core::MachineError;
use crate::events::Channel;
use crate::link::anchor::AnchorId;
use crate::world::HostId;
use thiserror::Error;

/// Errors raised by world-level link operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// A state machine rejected a transition; programming error.
    #[error(transparent)]
    Machine(#[from] MachineError),

    /// The anchor id is not registered in the world.
    #[error("unknown anchor {0:?}")]
    UnknownAnchor(AnchorId),

    /// The host id is not registered in the world.
    #[error("unknown host {0:?}")]
    UnknownHost(HostId),

    /// A required collaborator is not installed. The affected host is
    /// left non-functional for linking; the process continues.
    #[error("required capability `{0}` is not installed")]
    CapabilityMissing(&'static str),

    /// Restore-on-load could not find the persisted peer. Recovered by
    /// demoting the anchor to `Available`.
    #[error("anchor {anchor:?} could not resolve its persisted peer on host {host:?}")]
    PeerUnresolvable { anchor: AnchorId, host: HostId },

    /// A handler published the channel it was itself handling.
    #[error("re-entrant publish on channel {0:?}")]
    ReentrantPublish(Channel),
}
