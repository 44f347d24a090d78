//! The flat persisted record per anchor.

use crate::link::{LinkMode, LinkState};
use crate::world::HostId;
use serde::{Deserialize, Serialize};

/// Persisted link state of one anchor.
///
/// This is a pure projection of the live machine, written on every
/// state or peer change and read exactly once at restoration; it is
/// never read back mid-session. Absence of a record means
/// `Available` with no peer.
///
/// Field contract: `state` is the six-value [`LinkState`],
/// `peer_host_id` is a 32-bit unsigned host id where `0` means no
/// peer, `link_mode` is the effective [`LinkMode`].
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct LinkRecord {
    /// Persisted protocol state.
    pub state: LinkState,
    /// Host id of the linked peer, `0` when unlinked.
    pub peer_host_id: u32,
    /// Effective link mode (a target persists its adopted mode).
    pub link_mode: LinkMode,
}

impl LinkRecord {
    /// `peer_host_id` value meaning "no peer".
    pub const NO_PEER: u32 = HostId::NONE.raw();

    /// An unlinked `Available` record.
    pub fn available(link_mode: LinkMode) -> Self {
        Self {
            state: LinkState::Available,
            peer_host_id: Self::NO_PEER,
            link_mode,
        }
    }

    /// The persisted peer host, if any.
    pub fn peer_host(&self) -> Option<HostId> {
        if self.peer_host_id == Self::NO_PEER {
            None
        } else {
            Some(HostId(self.peer_host_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_record_has_no_peer() {
        let record = LinkRecord::available(LinkMode::TieVessels);
        assert_eq!(record.state, LinkState::Available);
        assert_eq!(record.peer_host(), None);
    }

    #[test]
    fn nonzero_peer_host_resolves() {
        let record = LinkRecord {
            state: LinkState::Linked,
            peer_host_id: 42,
            link_mode: LinkMode::DockVessels,
        };
        assert_eq!(record.peer_host(), Some(HostId(42)));
    }

    #[test]
    fn record_round_trips_through_serde() {
        let record = LinkRecord {
            state: LinkState::Locked,
            peer_host_id: 7,
            link_mode: LinkMode::TieAnyParts,
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: LinkRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
