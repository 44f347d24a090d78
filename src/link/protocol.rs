//! Candidate filtering and legality rules.
//!
//! A rejected link is an expected outcome, not an error: operations
//! return `bool` plus a [`RejectReason`] with a human-readable message.
//! The reason order of the full legality check is a contract - when
//! several conditions fail at once, the earliest one listed in
//! [`RejectReason`] is the one reported.

use crate::link::anchor::AnchorId;
use crate::link::mode::LinkMode;
use crate::link::state::LinkState;
use crate::world::{HostId, VesselId};
use std::fmt;

/// Why a link attempt or candidacy was refused.
///
/// Variant order mirrors the fixed evaluation order of the legality
/// check: type mismatch, same host, own state, target state, joint
/// length, source angle, target angle, collision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// The two anchors carry different link-type tags.
    TypeMismatch { source: String, target: String },
    /// Both anchors sit on the same host.
    SameHost,
    /// The source's state does not permit reaching `Linked`.
    SourceBusy { state: LinkState },
    /// The target is not currently an accepting candidate.
    TargetNotAccepting { state: LinkState },
    /// The joint length limit would be exceeded.
    JointTooLong(String),
    /// The source-side joint angle limit would be exceeded.
    SourceAngleExceeded(String),
    /// The target-side joint angle limit would be exceeded.
    TargetAngleExceeded(String),
    /// Something physically obstructs the connector.
    Obstructed(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeMismatch { source, target } => {
                write!(f, "link type mismatch: source is `{source}`, target is `{target}`")
            }
            Self::SameHost => write!(f, "source and target are on the same host"),
            Self::SourceBusy { state } => {
                write!(f, "source cannot link while {}", state_name(*state))
            }
            Self::TargetNotAccepting { state } => {
                write!(f, "target is not accepting links (currently {})", state_name(*state))
            }
            Self::JointTooLong(reason) => write!(f, "joint length limit exceeded: {reason}"),
            Self::SourceAngleExceeded(reason) => {
                write!(f, "source angle limit exceeded: {reason}")
            }
            Self::TargetAngleExceeded(reason) => {
                write!(f, "target angle limit exceeded: {reason}")
            }
            Self::Obstructed(reason) => write!(f, "link path obstructed: {reason}"),
        }
    }
}

fn state_name(state: LinkState) -> &'static str {
    match state {
        LinkState::Available => "available",
        LinkState::Linking => "linking",
        LinkState::AcceptingLinks => "accepting links",
        LinkState::RejectingLinks => "rejecting links",
        LinkState::Linked => "linked",
        LinkState::Locked => "locked",
    }
}

/// Snapshot of the proposing source, copied out of the registry before
/// candidate evaluation so no two anchors are borrowed at once. `id`
/// lets listeners recognize the proposer itself.
#[derive(Clone, Debug)]
pub(crate) struct CandidateSource {
    pub id: AnchorId,
    pub host: HostId,
    pub vessel: VesselId,
    pub link_type: String,
    pub mode: LinkMode,
}

/// Target-side compatibility predicate, run on `StartLinking` receipt.
///
/// Compatible candidates transition the target to `AcceptingLinks`,
/// incompatible ones to `RejectingLinks`. Same-vessel proposals need a
/// mode that permits same-vessel ties; cross-vessel proposals are
/// permitted by every mode.
pub(crate) fn candidate_is_compatible(
    source: &CandidateSource,
    target_host: HostId,
    target_vessel: VesselId,
    target_link_type: &str,
) -> bool {
    if source.link_type != target_link_type {
        return false;
    }
    if source.host == target_host {
        return false;
    }
    if source.vessel == target_vessel && !source.mode.allows_same_vessel() {
        return false;
    }
    true
}
