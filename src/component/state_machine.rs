//! Table-driven finite state machine.
//!
//! ```text
//! push(event) ──▶ EventQueue ──▶ process_next_event(ctx)
//!                                   │ first entry with from == current,
//!                                   │ event == event and a passing guard
//!                                   ▼
//!                               action(ctx, event, to);  current = to
//! ```
//!
//! The table is an ordered list; earlier entries win.  It is validated once
//! at construction: an entry shadowed by an earlier unguarded entry for
//! the same `(from, event)` is rejected.

use core::fmt::Debug;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::error::{Result, StateMachineError};

use super::event_queue::EventQueue;

pub type Guard<C> = fn(&C) -> bool;
pub type Action<C, E, S> = fn(&mut C, E, S);

pub struct Transition<S, E, C> {
    pub from: S,
    pub event: E,
    pub to: S,
    pub guard: Option<Guard<C>>,
    pub action: Option<Action<C, E, S>>,
}

impl<S, E, C> Transition<S, E, C> {
    pub fn new(from: S, event: E, to: S) -> Self {
        Self {
            from,
            event,
            to,
            guard: None,
            action: None,
        }
    }

    pub fn guard(mut self, guard: Guard<C>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn action(mut self, action: Action<C, E, S>) -> Self {
        self.action = Some(action);
        self
    }
}

impl<S: Debug, E: Debug, C> Debug for Transition<S, E, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?} --{:?}--> {:?}", self.from, self.event, self.to)?;
        if self.guard.is_some() {
            write!(f, " [guarded]")?;
        }
        Ok(())
    }
}

/// Current state, readable from other threads.
pub struct StateCell<S>(Arc<Mutex<S>>);

impl<S> Clone for StateCell<S> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<S: Copy> StateCell<S> {
    pub fn new(state: S) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    pub fn get(&self) -> S {
        *self.0.lock()
    }

    fn set(&self, state: S) {
        *self.0.lock() = state;
    }
}

pub struct StateMachine<S, E, C> {
    id: String,
    state: StateCell<S>,
    transitions: Vec<Transition<S, E, C>>,
    queue: Arc<EventQueue<E>>,
}

impl<S, E, C> StateMachine<S, E, C>
where
    S: Copy + PartialEq + Debug,
    E: Copy + PartialEq + Debug,
{
    pub fn new(
        id: impl Into<String>,
        initial: S,
        transitions: Vec<Transition<S, E, C>>,
        queue: Arc<EventQueue<E>>,
    ) -> Result<Self> {
        for (index, t) in transitions.iter().enumerate() {
            let shadowed = transitions[..index]
                .iter()
                .any(|p| p.from == t.from && p.event == t.event && p.guard.is_none());
            if shadowed {
                return Err(StateMachineError::UnreachableTransition {
                    index,
                    transition: format!("{t:?}"),
                }
                .into());
            }
        }
        Ok(Self {
            id: id.into(),
            state: StateCell::new(initial),
            transitions,
            queue,
        })
    }

    pub fn current_state(&self) -> S {
        self.state.get()
    }

    pub fn state_cell(&self) -> StateCell<S> {
        self.state.clone()
    }

    pub fn queue(&self) -> &Arc<EventQueue<E>> {
        &self.queue
    }

    pub fn push(&self, event: E) -> bool {
        self.queue.push(event)
    }

    /// Block for one event and run its transition.
    ///
    /// The state becomes `to` only after the action returned.  Returns
    /// `false` when nothing matched (state unchanged) or the queue was
    /// reset.
    pub fn process_next_event(&mut self, context: &mut C) -> bool {
        let Some(event) = self.queue.pull() else {
            return false;
        };
        let current = self.current_state();
        let Some((to, action)) = self.find(current, event, context) else {
            debug!(target: self.id.as_str(), "no transition for {event:?} in state {current:?}");
            return false;
        };

        debug!(target: self.id.as_str(), "{current:?} --{event:?}--> {to:?}");
        if let Some(action) = action {
            action(context, event, to);
        }
        self.state.set(to);
        true
    }

    fn find(&self, current: S, event: E, context: &C) -> Option<(S, Option<Action<C, E, S>>)> {
        self.transitions
            .iter()
            .find(|t| {
                t.from == current && t.event == event && t.guard.is_none_or(|guard| guard(context))
            })
            .map(|t| (t.to, t.action))
    }
}
