use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    dto::{
        format_system_time,
        validation::{validate_color, validate_layout_rows},
    },
    error::ProtocolError,
    state::{
        event_log::LogEntry,
        registry::{Session, SessionId, SessionPatch},
        world::{InitView, WorldSnapshot},
    },
};

/// Coordinates and velocities beyond this magnitude are refused outright.
const COORDINATE_LIMIT: f64 = 1_000_000.0;
/// Longest accepted action tag.
const MAX_ACTION_LEN: usize = 16;

#[derive(Debug, Deserialize)]
/// Messages accepted from game WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Claim a display name.
    Join(JoinRequest),
    /// Partial movement/state update.
    Move(MovementUpdate),
    /// Chat message.
    Chat(ChatRequest),
    /// Pass the tagged role.
    Tag(TagRequest),
    /// Replace the map layout.
    AdminMap(AdminMapRequest),
    /// Application-level latency probe.
    Ping(PingRequest),
}

impl ClientMessage {
    /// Parse and validate a text frame.
    pub fn from_json_str(raw: &str) -> Result<Self, ProtocolError> {
        let message: Self = serde_json::from_str(raw)?;
        match &message {
            Self::Join(request) => request.validate()?,
            Self::Move(update) => update.validate()?,
            Self::Chat(request) => request.validate()?,
            Self::AdminMap(request) => request.validate()?,
            Self::Tag(_) | Self::Ping(_) => {}
        }
        Ok(message)
    }
}

/// Join request carrying the wanted display name.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    /// Wanted display name, sanitized by the server.
    pub username: String,
    /// Optional color; the server-assigned one is kept when omitted.
    #[serde(default)]
    pub color: Option<String>,
}

impl Validate for JoinRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.username.chars().count() > 64 {
            let mut err = ValidationError::new("username_length");
            err.message = Some("username must be at most 64 characters".into());
            errors.add("username", err);
        }

        if let Some(ref color) = self.color {
            if let Err(err) = validate_color(color) {
                errors.add("color", err);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Movement update; every field is optional and merged on its own.
#[derive(Debug, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MovementUpdate {
    /// Horizontal position.
    #[serde(default)]
    pub x: Option<f64>,
    /// Vertical position.
    #[serde(default)]
    pub y: Option<f64>,
    /// Horizontal velocity.
    #[serde(default)]
    pub vx: Option<f64>,
    /// Vertical velocity.
    #[serde(default)]
    pub vy: Option<f64>,
    /// Facing direction: -1, 0 or 1.
    #[serde(default)]
    pub facing: Option<i8>,
    /// Transient action tag such as `dash`; an empty string clears it.
    #[serde(default)]
    pub state: Option<String>,
    /// Level the player is currently on.
    #[serde(default)]
    pub level: Option<u32>,
}

impl Validate for MovementUpdate {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        for (field, value) in [
            ("x", self.x),
            ("y", self.y),
            ("vx", self.vx),
            ("vy", self.vy),
        ] {
            if value.is_some_and(|v| !v.is_finite() || v.abs() > COORDINATE_LIMIT) {
                let mut err = ValidationError::new("coordinate_range");
                err.message = Some(format!("{field} is out of range").into());
                errors.add(field, err);
            }
        }

        if self.facing.is_some_and(|f| !(-1..=1).contains(&f)) {
            let mut err = ValidationError::new("facing_range");
            err.message = Some("facing must be -1, 0 or 1".into());
            errors.add("facing", err);
        }

        if self
            .state
            .as_ref()
            .is_some_and(|state| state.chars().count() > MAX_ACTION_LEN)
        {
            let mut err = ValidationError::new("state_length");
            err.message = Some(format!("state must be at most {MAX_ACTION_LEN} characters").into());
            errors.add("state", err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl From<MovementUpdate> for SessionPatch {
    fn from(update: MovementUpdate) -> Self {
        Self {
            x: update.x,
            y: update.y,
            vx: update.vx,
            vy: update.vy,
            facing: update.facing,
            action: update.state,
            level: update.level,
        }
    }
}

/// Chat message; the server truncates it to the configured length.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ChatRequest {
    /// Message body.
    #[validate(length(max = 4096))]
    pub text: String,
}

/// Tag event naming the next holder.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TagRequest {
    /// Session that should receive the role.
    #[schema(value_type = uuid::Uuid)]
    pub target_id: SessionId,
}

/// Map replacement sent over the game socket.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct AdminMapRequest {
    /// Shared admin secret.
    #[validate(length(max = 256))]
    pub password: String,
    /// Tile rows, top to bottom.
    #[validate(length(min = 1, max = 1024), custom(function = "validate_layout_rows"))]
    pub layout: Vec<String>,
}

/// Latency probe echoed back as [`ServerMessage::Pong`].
#[derive(Debug, Deserialize, ToSchema)]
pub struct PingRequest {
    /// Client timestamp, echoed verbatim.
    pub t: f64,
}

#[derive(Debug, Serialize)]
/// Messages pushed to game WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once right after the connection is accepted.
    Init(InitMessage),
    /// Answer to a join request.
    JoinAck(JoinAck),
    /// Compacted world snapshot, sent once per tick.
    State(WorldState),
    /// The tagged role moved.
    RoleHolder(RoleHolderUpdate),
    /// New chat or system entry.
    Chat(ChatBroadcast),
    /// The map layout changed.
    Map(MapBroadcast),
    /// Answer to an admin map update.
    AdminAck(AdminAck),
    /// A session left.
    PlayerLeft(PlayerLeft),
    /// Number of open connections changed.
    ConnectionCount(ConnectionCount),
    /// Echo of a latency probe.
    Pong(Pong),
}

/// Initial state replayed to a new connection.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitMessage {
    /// Identity allocated to this connection.
    pub id: SessionId,
    /// Server-assigned color.
    pub color: String,
    /// Retained chat and system entries, oldest first.
    pub event_log: Vec<ChatEntry>,
    /// Current map layout.
    pub map: Vec<String>,
    /// Current role holder.
    pub role_holder: Option<SessionId>,
}

impl InitMessage {
    /// Build the init payload for connection `id`.
    pub fn new(id: SessionId, color: String, view: InitView) -> Self {
        Self {
            id,
            color,
            event_log: view.event_log.iter().map(ChatEntry::from).collect(),
            map: view.map,
            role_holder: view.role_holder,
        }
    }
}

/// Join acknowledgement.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinAck {
    /// Whether the join was accepted.
    pub success: bool,
    /// Session identity on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<SessionId>,
    /// Display name after sanitization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Reason code on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl JoinAck {
    /// Acknowledge an accepted join under `name`.
    pub fn accepted(id: SessionId, name: &str) -> Self {
        Self {
            success: true,
            id: Some(id),
            name: Some(name.to_string()),
            reason: None,
        }
    }

    /// Refuse a join with a stable reason code.
    pub fn refused(reason: &str) -> Self {
        Self {
            success: false,
            id: None,
            name: None,
            reason: Some(reason.to_string()),
        }
    }
}

/// Chat or system entry as sent on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct ChatEntry {
    /// Insertion order.
    pub seq: u64,
    /// Author display name, or `server` for system entries.
    pub author: String,
    /// Message body.
    pub text: String,
    /// Author color.
    pub color: String,
    /// RFC 3339 creation time.
    pub at: String,
}

impl From<&LogEntry> for ChatEntry {
    fn from(entry: &LogEntry) -> Self {
        Self {
            seq: entry.seq,
            author: entry.author.clone(),
            text: entry.text.clone(),
            color: entry.color.clone(),
            at: format_system_time(entry.created_at),
        }
    }
}

/// Broadcast of a new log entry.
#[derive(Debug, Serialize)]
pub struct ChatBroadcast {
    /// The appended entry.
    pub entry: ChatEntry,
}

/// Broadcast of the new role holder.
#[derive(Debug, Serialize)]
pub struct RoleHolderUpdate {
    /// New holder, `null` when the role is vacant.
    pub id: Option<SessionId>,
}

/// Broadcast of a new map layout.
#[derive(Debug, Serialize)]
pub struct MapBroadcast {
    /// Tile rows, top to bottom.
    pub layout: Vec<String>,
}

/// Admin acknowledgement, shared with the HTTP admin route.
#[derive(Debug, Serialize, ToSchema)]
pub struct AdminAck {
    /// Whether the update was applied.
    pub success: bool,
    /// Reason code on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Broadcast of a departure.
#[derive(Debug, Serialize)]
pub struct PlayerLeft {
    /// Session that left.
    pub id: SessionId,
}

/// Broadcast of the open connection count.
#[derive(Debug, Serialize)]
pub struct ConnectionCount {
    /// Open connections, joined or not.
    pub count: usize,
}

/// Echo of a latency probe.
#[derive(Debug, Serialize)]
pub struct Pong {
    /// Timestamp from the matching ping.
    pub t: f64,
}

/// Compacted snapshot of all joined sessions.
#[derive(Debug, Serialize)]
pub struct WorldState {
    /// Current role holder.
    pub it: Option<SessionId>,
    /// Every joined session.
    pub players: Vec<CompactSession>,
}

/// Session record with short field names and quantized numbers.
#[derive(Debug, Serialize, PartialEq)]
pub struct CompactSession {
    /// Session identity.
    pub id: SessionId,
    /// Display name.
    pub n: String,
    /// Color.
    pub c: String,
    /// Horizontal position, one decimal.
    pub x: f64,
    /// Vertical position, one decimal.
    pub y: f64,
    /// Horizontal velocity, two decimals.
    pub vx: f64,
    /// Vertical velocity, two decimals.
    pub vy: f64,
    /// Facing direction.
    pub f: i8,
    /// Transient action tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<String>,
    /// Level.
    pub l: u32,
}

impl From<&Session> for CompactSession {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            n: session.name.clone(),
            c: session.color.clone(),
            x: quantize(session.x, 1),
            y: quantize(session.y, 1),
            vx: quantize(session.vx, 2),
            vy: quantize(session.vy, 2),
            f: session.facing,
            s: session.action.clone(),
            l: session.level,
        }
    }
}

impl From<&WorldSnapshot> for WorldState {
    fn from(snapshot: &WorldSnapshot) -> Self {
        Self {
            it: snapshot.role_holder,
            players: snapshot.sessions.iter().map(CompactSession::from).collect(),
        }
    }
}

/// Round `value` to `decimals` decimal places.
fn quantize(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
