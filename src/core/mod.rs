//! Core state machine types and logic.
//!
//! This module contains the generic strict finite-state machine:
//! - State definitions via the `State` trait
//! - Per-state transition whitelists with enter/leave hooks
//! - Immutable history tracking
//!
//! Everything here is domain-agnostic; the link protocol layers its
//! own states and rules on top.

mod history;
mod machine;
mod macros;
mod state;

pub use history::{StateHistory, StateTransition};
pub use machine::{MachineError, StateMachine};
pub use state::State;
