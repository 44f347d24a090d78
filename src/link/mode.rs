//! Link policy and actor tags.

use serde::{Deserialize, Serialize};

/// Policy governing which vessel combinations a source may link.
///
/// Persisted with the link; a target has no mode of its own and adopts
/// the linking source's.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum LinkMode {
    /// Link parts on different vessels and merge them into one rigid
    /// assembly via the coupler.
    DockVessels,
    /// Tie parts on different vessels together without coupling.
    TieVessels,
    /// Tie any two parts, including parts on the same vessel.
    TieAnyParts,
}

impl LinkMode {
    /// Whether both anchors may sit on the same vessel.
    pub fn allows_same_vessel(self) -> bool {
        matches!(self, Self::TieAnyParts)
    }

    /// Whether committing the link physically couples the two hosts.
    ///
    /// Coupling modes resolve their peer synchronously at restore time;
    /// tie modes defer resolution to the end of the loading tick.
    pub fn couples(self) -> bool {
        matches!(self, Self::DockVessels)
    }
}

/// Who drives a linking operation or caused a link event.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum LinkActor {
    /// Interactive player input.
    Player,
    /// Programmatic caller.
    Api,
    /// EVA crew member; only valid while an EVA actor is active.
    Eva,
    /// Structural causes: joint failure, decoupling, host death.
    Physics,
}
