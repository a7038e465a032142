use rand::{Rng, seq::IndexedRandom};
use thiserror::Error;

use crate::state::registry::SessionId;

/// Who currently carries the tagged role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoleState {
    /// Nobody holds the role.
    #[default]
    Vacant,
    /// The given session holds the role.
    Held(SessionId),
}

impl RoleState {
    /// Holder identity, if any.
    pub fn holder(&self) -> Option<SessionId> {
        match self {
            Self::Vacant => None,
            Self::Held(id) => Some(*id),
        }
    }
}

/// Events that can be applied to the role state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleEvent {
    /// A session finished joining.
    Joined(SessionId),
    /// `by` tagged `target`; the caller guarantees `target` is a joined session.
    Tagged {
        /// Session that sent the tag event.
        by: SessionId,
        /// Session named as the new holder.
        target: SessionId,
    },
    /// A session left; `remaining` lists the sessions still joined.
    Departed {
        /// Session that left.
        id: SessionId,
        /// Sessions still joined after the departure.
        remaining: Vec<SessionId>,
    },
}

/// Error returned when an event is not allowed from the current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid role transition: {event:?} cannot be applied while {from:?}")]
pub struct InvalidTransition {
    /// State the machine was in when the event was received.
    pub from: RoleState,
    /// The rejected event.
    pub event: RoleEvent,
}

/// Holder change produced by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleChange {
    /// New holder, `None` when the role became vacant.
    pub holder: Option<SessionId>,
    /// Machine version after the change.
    pub version: usize,
}

/// State machine guarding the single tagged role.
#[derive(Debug, Clone, Default)]
pub struct RoleMachine {
    state: RoleState,
    version: usize,
}

impl RoleMachine {
    /// Create a machine in the vacant state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current holder, if any.
    pub fn holder(&self) -> Option<SessionId> {
        self.state.holder()
    }

    /// Apply `event`, returning the change when the holder moved.
    ///
    /// Events that are valid but leave the holder untouched (a join while held, a non-holder
    /// leaving) return `Ok(None)`.
    pub fn apply<R: Rng + ?Sized>(
        &mut self,
        event: RoleEvent,
        rng: &mut R,
    ) -> Result<Option<RoleChange>, InvalidTransition> {
        let next = self.compute_transition(event, rng)?;
        if next == self.state {
            return Ok(None);
        }

        self.state = next;
        self.version += 1;
        Ok(Some(RoleChange {
            holder: next.holder(),
            version: self.version,
        }))
    }

    fn compute_transition<R: Rng + ?Sized>(
        &self,
        event: RoleEvent,
        rng: &mut R,
    ) -> Result<RoleState, InvalidTransition> {
        let next = match (self.state, event) {
            (RoleState::Vacant, RoleEvent::Joined(id)) => RoleState::Held(id),
            (held @ RoleState::Held(_), RoleEvent::Joined(_)) => held,
            (RoleState::Held(holder), RoleEvent::Tagged { by, target })
                if by == holder && target != holder =>
            {
                RoleState::Held(target)
            }
            (RoleState::Held(holder), RoleEvent::Departed { id, remaining }) if id == holder => {
                pick_successor(id, &remaining, rng)
            }
            (held @ RoleState::Held(_), RoleEvent::Departed { .. }) => held,
            (RoleState::Vacant, RoleEvent::Departed { id, remaining }) => {
                pick_successor(id, &remaining, rng)
            }
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

fn pick_successor<R: Rng + ?Sized>(
    departed: SessionId,
    remaining: &[SessionId],
    rng: &mut R,
) -> RoleState {
    let candidates: Vec<SessionId> = remaining
        .iter()
        .copied()
        .filter(|id| *id != departed)
        .collect();
    candidates
        .choose(rng)
        .map(|id| RoleState::Held(*id))
        .unwrap_or(RoleState::Vacant)
}
