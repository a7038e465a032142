//! Owned container for every piece of mutable world state.
//!
//! Handlers reach the registry, role holder, event log and map only through [`World`] methods,
//! and the broadcaster only through [`World::snapshot`].

use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info};

use crate::{
    config::AppConfig,
    error::JoinError,
    state::{
        admission::sanitize_chat,
        event_log::{EventLog, LogEntry},
        map::MapLayout,
        registry::{Session, SessionId, SessionPatch, SessionRegistry, UpdateOutcome},
        role::{RoleChange, RoleEvent, RoleMachine},
    },
};

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// Stored display name.
    pub name: String,
    /// Stored color.
    pub color: String,
    /// True when an existing session was renamed.
    pub rejoined: bool,
    /// Holder change triggered by the join.
    pub role_change: Option<RoleChange>,
    /// Notice appended to the event log.
    pub notice: Option<LogEntry>,
}

/// Everything that must be announced after a session leaves.
#[derive(Debug, Clone)]
pub struct Departure {
    /// Record of the session that left.
    pub session: Session,
    /// Holder change triggered by the departure.
    pub role_change: Option<RoleChange>,
    /// Notice appended to the event log.
    pub notice: LogEntry,
}

/// Immutable copy of the sessions taken for one broadcast tick.
#[derive(Debug, Clone)]
pub struct WorldSnapshot {
    /// Current role holder.
    pub role_holder: Option<SessionId>,
    /// Sessions in join order.
    pub sessions: Vec<Session>,
}

/// State replayed to a connection right after it is accepted.
#[derive(Debug, Clone)]
pub struct InitView {
    /// Event log, oldest first.
    pub event_log: Vec<LogEntry>,
    /// Current map rows.
    pub map: Vec<String>,
    /// Current role holder.
    pub role_holder: Option<SessionId>,
}

/// Sessions, role holder, event log and map behind one mutation point.
#[derive(Debug)]
pub struct World {
    registry: SessionRegistry,
    role: RoleMachine,
    log: EventLog,
    map: MapLayout,
    role_policy_enabled: bool,
    max_chat_len: usize,
}

impl World {
    /// Build an empty world from the runtime configuration.
    pub fn new(config: &AppConfig) -> Self {
        Self {
            registry: SessionRegistry::new(config.admission, config.movement, config.spawn),
            role: RoleMachine::new(),
            log: EventLog::new(config.event_log_capacity),
            map: MapLayout::new(config.map.clone()),
            role_policy_enabled: config.role_policy_enabled,
            max_chat_len: config.admission.max_chat_len,
        }
    }

    /// Admit `id` under `name` and hand it the role when nobody holds it.
    pub fn join<R: Rng + ?Sized>(
        &mut self,
        id: SessionId,
        name: &str,
        color: String,
        now: Instant,
        rng: &mut R,
    ) -> Result<JoinOutcome, JoinError> {
        let joined = self.registry.join(id, name, color, now)?;

        let notice = (!joined.rejoined)
            .then(|| self.log.push_system(format!("{} joined", joined.name)));
        let role_change = if self.role_policy_enabled {
            self.apply_role_event(RoleEvent::Joined(id), rng)
        } else {
            None
        };

        Ok(JoinOutcome {
            name: joined.name,
            color: joined.color,
            rejoined: joined.rejoined,
            role_change,
            notice,
        })
    }

    /// Merge a movement update from `id`.
    pub fn apply_movement(
        &mut self,
        id: SessionId,
        patch: SessionPatch,
        now: Instant,
    ) -> UpdateOutcome {
        self.registry.update(id, patch, now)
    }

    /// Append a chat message from `id`. Unknown authors and empty messages are dropped.
    pub fn chat(&mut self, id: SessionId, text: &str) -> Option<LogEntry> {
        let session = self.registry.get(id)?;
        let text = sanitize_chat(text, self.max_chat_len)?;
        let (author, color) = (session.name.clone(), session.color.clone());
        Some(self.log.push(author, text, color))
    }

    /// Pass the role from `by` to `target`.
    ///
    /// Returns `None` when the event is denied: `by` does not hold the role, `target` has not
    /// joined, or the policy is disabled.
    pub fn tag<R: Rng + ?Sized>(
        &mut self,
        by: SessionId,
        target: SessionId,
        rng: &mut R,
    ) -> Option<RoleChange> {
        if !self.role_policy_enabled || !self.registry.contains(target) {
            debug!(by = %by, target = %target, "ignoring tag event");
            return None;
        }
        self.apply_role_event(RoleEvent::Tagged { by, target }, rng)
    }

    /// Remove `id` and reassign the role when it was the holder.
    ///
    /// Returns `None` when `id` never joined or was already removed, so repeated cleanup of the
    /// same connection is harmless.
    pub fn depart<R: Rng + ?Sized>(&mut self, id: SessionId, rng: &mut R) -> Option<Departure> {
        let session = self.registry.remove(id)?;
        let role_change = if self.role_policy_enabled {
            let remaining = self.registry.ids();
            self.apply_role_event(RoleEvent::Departed { id, remaining }, rng)
        } else {
            None
        };
        let notice = self.log.push_system(format!("{} left", session.name));
        info!(id = %id, name = %session.name, "session removed");

        Some(Departure {
            session,
            role_change,
            notice,
        })
    }

    /// Remove every session silent for longer than `timeout`, through [`World::depart`].
    pub fn prune_stale<R: Rng + ?Sized>(
        &mut self,
        now: Instant,
        timeout: Duration,
        rng: &mut R,
    ) -> Vec<Departure> {
        self.registry
            .stale_ids(now, timeout)
            .into_iter()
            .filter_map(|id| self.depart(id, rng))
            .collect()
    }

    /// Replace the map layout.
    pub fn replace_map(&mut self, rows: Vec<String>) -> Vec<String> {
        self.map.replace(rows);
        info!(version = self.map.version(), rows = self.map.rows().len(), "map replaced");
        self.map.rows().to_vec()
    }

    /// Copy the sessions for a broadcast tick.
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            role_holder: self.role.holder(),
            sessions: self.registry.iter().cloned().collect(),
        }
    }

    /// State sent to a freshly accepted connection.
    pub fn init_view(&self) -> InitView {
        InitView {
            event_log: self.log.entries().cloned().collect(),
            map: self.map.rows().to_vec(),
            role_holder: self.role.holder(),
        }
    }

    /// Current role holder.
    pub fn role_holder(&self) -> Option<SessionId> {
        self.role.holder()
    }

    /// Look up a joined session.
    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.registry.get(id)
    }

    /// Number of joined sessions.
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Whether no session has joined.
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    fn apply_role_event<R: Rng + ?Sized>(
        &mut self,
        event: RoleEvent,
        rng: &mut R,
    ) -> Option<RoleChange> {
        match self.role.apply(event, rng) {
            Ok(change) => {
                if let Some(change) = change {
                    info!(holder = ?change.holder, version = change.version, "role holder changed");
                }
                change
            }
            Err(err) => {
                debug!(error = %err, "role event denied");
                None
            }
        }
    }
}
