use std::time::{Duration, Instant};

use indexmap::IndexMap;
use tracing::debug;
use uuid::Uuid;

use crate::{
    config::{AdmissionRules, MovementRules},
    error::JoinError,
    state::admission::{check_movement, normalize_name, sanitize_name},
};

/// Opaque identity of a connection, allocated when the socket is accepted.
pub type SessionId = Uuid;

/// Server-side record for one joined client.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Connection identity owning this record.
    pub id: SessionId,
    /// Sanitized display name, unique among active sessions.
    pub name: String,
    /// Cosmetic color.
    pub color: String,
    /// Horizontal position.
    pub x: f64,
    /// Vertical position.
    pub y: f64,
    /// Horizontal velocity.
    pub vx: f64,
    /// Vertical velocity.
    pub vy: f64,
    /// Facing indicator (-1 left, 0 neutral, 1 right).
    pub facing: i8,
    /// Transient action tag such as `dash`.
    pub action: Option<String>,
    /// Level the player is currently on.
    pub level: u32,
    /// Instant of the last update received from the client.
    pub last_update: Instant,
}

/// Fields a movement update may carry; absent fields leave the session untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    /// New horizontal position.
    pub x: Option<f64>,
    /// New vertical position.
    pub y: Option<f64>,
    /// New horizontal velocity.
    pub vx: Option<f64>,
    /// New vertical velocity.
    pub vy: Option<f64>,
    /// New facing indicator.
    pub facing: Option<i8>,
    /// New action tag; an empty string clears it.
    pub action: Option<String>,
    /// New level.
    pub level: Option<u32>,
}

impl SessionPatch {
    fn has_position(&self) -> bool {
        self.x.is_some() || self.y.is_some()
    }
}

/// Result of merging a [`SessionPatch`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateOutcome {
    /// No session exists for the id (it raced a disconnect).
    Unknown,
    /// Every field present in the patch was applied.
    Applied,
    /// Positional fields were dropped by the plausibility check; the rest was applied.
    PositionRejected,
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq)]
pub struct Joined {
    /// Name stored after sanitization.
    pub name: String,
    /// Color stored for the session.
    pub color: String,
    /// True when the connection had already joined and was renamed.
    pub rejoined: bool,
}

/// In-memory set of joined sessions keyed by connection identity.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: IndexMap<SessionId, Session>,
    admission: AdmissionRules,
    movement: MovementRules,
    spawn: (f64, f64),
}

impl SessionRegistry {
    /// Create an empty registry enforcing the given rules.
    pub fn new(admission: AdmissionRules, movement: MovementRules, spawn: (f64, f64)) -> Self {
        Self {
            sessions: IndexMap::new(),
            admission,
            movement,
            spawn,
        }
    }

    /// Admit `id` under `requested_name`.
    ///
    /// A connection that already joined is renamed in place; uniqueness is only checked against
    /// the other sessions so re-sending the same name succeeds.
    pub fn join(
        &mut self,
        id: SessionId,
        requested_name: &str,
        color: String,
        now: Instant,
    ) -> Result<Joined, JoinError> {
        let name = sanitize_name(requested_name, self.admission.max_name_len)
            .ok_or(JoinError::InvalidName)?;
        if self.name_taken_by_other(id, &name) {
            return Err(JoinError::NameTaken(name));
        }

        if let Some(session) = self.sessions.get_mut(&id) {
            session.name = name.clone();
            session.color = color.clone();
            session.last_update = now;
            return Ok(Joined {
                name,
                color,
                rejoined: true,
            });
        }

        let (x, y) = self.spawn;
        self.sessions.insert(
            id,
            Session {
                id,
                name: name.clone(),
                color: color.clone(),
                x,
                y,
                vx: 0.0,
                vy: 0.0,
                facing: 1,
                action: None,
                level: 1,
                last_update: now,
            },
        );

        Ok(Joined {
            name,
            color,
            rejoined: false,
        })
    }

    /// Merge the fields present in `patch` into the session owned by `id`.
    pub fn update(&mut self, id: SessionId, patch: SessionPatch, now: Instant) -> UpdateOutcome {
        let rules = self.movement;
        let Some(session) = self.sessions.get_mut(&id) else {
            return UpdateOutcome::Unknown;
        };

        let mut outcome = UpdateOutcome::Applied;
        if patch.has_position() {
            let next = (patch.x.unwrap_or(session.x), patch.y.unwrap_or(session.y));
            let verdict = check_movement(
                (session.x, session.y),
                session.last_update,
                next,
                now,
                &rules,
            );
            if verdict.accepts_position() {
                session.x = next.0;
                session.y = next.1;
            } else {
                debug!(id = %id, verdict = ?verdict, "dropping implausible position");
                outcome = UpdateOutcome::PositionRejected;
            }
        }

        if let Some(vx) = patch.vx {
            session.vx = vx;
        }
        if let Some(vy) = patch.vy {
            session.vy = vy;
        }
        if let Some(facing) = patch.facing {
            session.facing = facing;
        }
        if let Some(action) = patch.action {
            session.action = (!action.is_empty()).then_some(action);
        }
        if let Some(level) = patch.level {
            session.level = level;
        }
        session.last_update = now;

        outcome
    }

    /// Delete the session owned by `id`, returning it when it existed.
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        self.sessions.shift_remove(&id)
    }

    /// Look up a session.
    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Whether `id` has joined.
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Number of joined sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session has joined.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Identities of all joined sessions in join order.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    /// Iterate sessions in join order.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Sessions whose last update is older than `timeout`.
    pub fn stale_ids(&self, now: Instant, timeout: Duration) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|session| now.saturating_duration_since(session.last_update) > timeout)
            .map(|session| session.id)
            .collect()
    }

    fn name_taken_by_other(&self, id: SessionId, name: &str) -> bool {
        let case_insensitive = self.admission.case_insensitive_names;
        let wanted = normalize_name(name, case_insensitive);
        self.sessions
            .values()
            .any(|other| other.id != id && normalize_name(&other.name, case_insensitive) == wanted)
    }
}
