//! The link domain layer: anchors, states, modes and the negotiation
//! rules shared by both peer roles.

mod anchor;
mod error;
mod mode;
mod protocol;
mod state;

pub use anchor::{Anchor, AnchorId, AttachPoint, Pose, Role, SourceRole, TargetRole};
pub use error::LinkError;
pub use mode::{LinkActor, LinkMode};
pub use protocol::RejectReason;
pub use state::LinkState;

pub(crate) use protocol::{candidate_is_compatible, CandidateSource};
