//! Tether: a bidirectional linking protocol for simulated worlds.
//!
//! Tether models links between attach points ("anchors") on simulated
//! entities ("hosts"). One anchor plays the source role and drives a
//! negotiation round over synchronous event channels; target anchors
//! evaluate the proposal and volunteer or opt out. A committed link
//! couples two strict state machines whose whitelists make illegal
//! protocol states unrepresentable.
//!
//! # Core Concepts
//!
//! - **Strict machines**: every anchor owns a [`core::StateMachine`]
//!   with per-state transition whitelists; an out-of-whitelist move is
//!   a loud error, never a silent correction
//! - **Event channels**: negotiation runs over an [`events::EventBus`]
//!   whose subscriptions are managed by machine enter/leave hooks
//! - **Capabilities**: physics, coupling, collision and persistence are
//!   external collaborators behind the [`capability`] traits
//! - **Persistence**: every state or peer change is projected into a
//!   flat [`capability::LinkRecord`], restored once at load time
//!
//! # Example
//!
//! ```rust
//! use tether::core::StateMachine;
//! use tether::state_enum;
//!
//! state_enum! {
//!     pub enum Winch {
//!         Stowed,
//!         Deployed,
//!     }
//! }
//!
//! let mut machine: StateMachine<Winch> = StateMachine::new();
//! machine.set_transition_rule(Winch::Stowed, [Winch::Deployed]);
//! machine.set_transition_rule(Winch::Deployed, [Winch::Stowed]);
//!
//! machine.start(Winch::Stowed, &mut ()).unwrap();
//! machine.transition_to(Winch::Deployed, &mut ()).unwrap();
//! assert_eq!(machine.current(), Some(&Winch::Deployed));
//! ```
//!
//! The full protocol lives in [`world::World`]: register hosts and
//! anchors, install the capability set, then drive rounds with
//! `start_linking` / `accept_link` / `break_current_link`.

pub mod capability;
pub mod core;
pub mod events;
pub mod link;
pub mod world;

// Re-export commonly used types
pub use self::core::{State, StateHistory, StateMachine, StateTransition};
pub use link::{AnchorId, LinkActor, LinkError, LinkMode, LinkState, RejectReason};
pub use world::{HostId, VesselId, World};
