//! Strict finite-state machine with per-state transition whitelists.
//!
//! The machine owns the authoritative current state. Transitions are
//! validated against a whitelist per source state; an attempt outside
//! the whitelist is a programming error surfaced as
//! [`MachineError::IllegalTransition`], never silently corrected.
//!
//! Enter/leave hooks fire symmetrically: leaving a state always invokes
//! that state's leave hooks before the new state's enter hooks run, and
//! `stop()` invokes the leave hooks of whatever state was current
//! without entering a new state. By convention hooks are reserved for
//! event channel subscription management - they must not perform
//! externally visible actions, since the ordering of hook side effects
//! relative to the caller's own post-transition logic is unspecified.

use crate::core::history::{StateHistory, StateTransition};
use crate::core::state::State;
use chrono::Utc;
use log::debug;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Errors raised by the state machine lifecycle.
///
/// These are defects in the calling protocol, not expected outcomes.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum MachineError {
    /// The requested transition is not in the current state's whitelist.
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    /// An operation that needs a running machine was called before `start`.
    #[error("state machine is not started")]
    NotStarted,

    /// `start` was called on a machine that is already running.
    #[error("state machine is already started in state {0}")]
    AlreadyStarted(String),
}

type Hook<Env> = Box<dyn FnMut(&mut Env) + Send>;

/// Strict finite-state machine generic over a state type and a hook
/// environment.
///
/// The environment is the single mutable context passed to enter/leave
/// hooks; the link layer uses the event bus so that hooks can manage
/// channel subscriptions.
///
/// # Example
///
/// ```rust
/// use tether::core::{State, StateMachine};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
/// enum Light {
///     Red,
///     Green,
/// }
///
/// impl State for Light {
///     fn name(&self) -> &str {
///         match self {
///             Self::Red => "Red",
///             Self::Green => "Green",
///         }
///     }
/// }
///
/// let mut machine: StateMachine<Light> = StateMachine::new();
/// machine.set_transition_rule(Light::Red, [Light::Green]);
/// machine.set_transition_rule(Light::Green, [Light::Red]);
///
/// machine.start(Light::Red, &mut ()).unwrap();
/// assert!(machine.can_transition_to(&Light::Green));
/// machine.transition_to(Light::Green, &mut ()).unwrap();
/// assert_eq!(machine.current(), Some(&Light::Green));
/// ```
pub struct StateMachine<S: State, Env = ()> {
    current: Option<S>,
    rules: HashMap<S, HashSet<S>>,
    enter_hooks: HashMap<S, Vec<Hook<Env>>>,
    leave_hooks: HashMap<S, Vec<Hook<Env>>>,
    strict: bool,
    history: StateHistory<S>,
}

impl<S: State, Env> Default for StateMachine<S, Env> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: State, Env> StateMachine<S, Env> {
    /// Create a stopped machine with no transition rules.
    ///
    /// Machines are strict by default.
    pub fn new() -> Self {
        Self {
            current: None,
            rules: HashMap::new(),
            enter_hooks: HashMap::new(),
            leave_hooks: HashMap::new(),
            strict: true,
            history: StateHistory::new(),
        }
    }

    /// Toggle strict mode.
    ///
    /// Non-strict machines permit any transition; the mode exists for
    /// degenerate single-state machines and is not used by the link
    /// protocol.
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// Replace the whitelist of states reachable from `from`.
    pub fn set_transition_rule(&mut self, from: S, allowed: impl IntoIterator<Item = S>) {
        self.rules.insert(from, allowed.into_iter().collect());
    }

    /// Register a hook invoked when `state` is entered.
    pub fn on_enter(&mut self, state: S, hook: impl FnMut(&mut Env) + Send + 'static) {
        self.enter_hooks.entry(state).or_default().push(Box::new(hook));
    }

    /// Register a hook invoked when `state` is left.
    pub fn on_leave(&mut self, state: S, hook: impl FnMut(&mut Env) + Send + 'static) {
        self.leave_hooks.entry(state).or_default().push(Box::new(hook));
    }

    /// The current state, or `None` when the machine is stopped.
    pub fn current(&self) -> Option<&S> {
        self.current.as_ref()
    }

    /// Whether `start` has been called without a matching `stop`.
    pub fn is_started(&self) -> bool {
        self.current.is_some()
    }

    /// Transition history (diagnostic only).
    pub fn history(&self) -> &StateHistory<S> {
        &self.history
    }

    /// Whether the machine could transition to `to` right now.
    ///
    /// Always `false` on a stopped machine. Always `true` on a running
    /// non-strict machine.
    pub fn can_transition_to(&self, to: &S) -> bool {
        let Some(from) = &self.current else {
            return false;
        };
        if !self.strict {
            return true;
        }
        self.rules
            .get(from)
            .map(|allowed| allowed.contains(to))
            .unwrap_or(false)
    }

    /// Enter the running lifecycle in `initial`, firing its enter hooks.
    pub fn start(&mut self, initial: S, env: &mut Env) -> Result<(), MachineError> {
        if let Some(current) = &self.current {
            return Err(MachineError::AlreadyStarted(current.name().to_string()));
        }
        debug!("machine starting in {}", initial.name());
        self.current = Some(initial.clone());
        self.fire_enter(&initial, env);
        Ok(())
    }

    /// Leave the running lifecycle, firing the current state's leave
    /// hooks without entering any new state. No-op on a stopped machine.
    pub fn stop(&mut self, env: &mut Env) {
        if let Some(current) = self.current.take() {
            debug!("machine stopping in {}", current.name());
            self.fire_leave(&current, env);
        }
    }

    /// Move to `to`, firing leave hooks of the old state and then enter
    /// hooks of the new state.
    ///
    /// In strict mode the move must be whitelisted; on
    /// [`MachineError::IllegalTransition`] the state is unchanged and no
    /// hook fires.
    pub fn transition_to(&mut self, to: S, env: &mut Env) -> Result<(), MachineError> {
        let from = self.current.clone().ok_or(MachineError::NotStarted)?;
        if self.strict && !self.can_transition_to(&to) {
            return Err(MachineError::IllegalTransition {
                from: from.name().to_string(),
                to: to.name().to_string(),
            });
        }

        debug!("transition {} -> {}", from.name(), to.name());
        self.fire_leave(&from, env);
        self.current = Some(to.clone());
        self.history = self.history.record(StateTransition {
            from,
            to: to.clone(),
            timestamp: Utc::now(),
        });
        self.fire_enter(&to, env);
        Ok(())
    }

    fn fire_enter(&mut self, state: &S, env: &mut Env) {
        if let Some(hooks) = self.enter_hooks.get_mut(state) {
            for hook in hooks.iter_mut() {
                hook(env);
            }
        }
    }

    fn fire_leave(&mut self, state: &S, env: &mut Env) {
        if let Some(hooks) = self.leave_hooks.get_mut(state) {
            for hook in hooks.iter_mut() {
                hook(env);
            }
        }
    }
}
