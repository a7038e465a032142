use axum::extract::ws::{Message, Utf8Bytes};
use tracing::warn;

use crate::{
    dto::ws::{
        ChatBroadcast, ChatEntry, ConnectionCount, MapBroadcast, PlayerLeft, RoleHolderUpdate,
        ServerMessage,
    },
    state::{
        ClientConnection, SharedState,
        event_log::LogEntry,
        registry::SessionId,
        role::RoleChange,
        world::{Departure, JoinOutcome},
    },
};

/// Serialize a message once into a text frame payload.
///
/// Serialization failures are bugs, not transient conditions; they are logged and dropped.
pub fn encode(message: &ServerMessage) -> Option<Utf8Bytes> {
    match serde_json::to_string(message) {
        Ok(payload) => Some(payload.into()),
        Err(err) => {
            warn!(error = %err, "failed to serialize message `{message:?}`");
            None
        }
    }
}

/// Queue `message` on a single connection. Returns `false` once its writer is gone.
pub fn send_to_connection(connection: &ClientConnection, message: &ServerMessage) -> bool {
    match encode(message) {
        Some(payload) => connection.send(Message::Text(payload)),
        None => true,
    }
}

/// Queue `message` on the connection `id`, if it is still open.
pub fn send_to(state: &SharedState, id: SessionId, message: &ServerMessage) {
    let Some(connection) = state.connections().get(&id).map(|entry| entry.value().clone()) else {
        return;
    };
    if !send_to_connection(&connection, message) {
        warn!(id = %id, "send failed (writer closed)");
    }
}

/// Queue `message` on every open connection.
pub fn broadcast(state: &SharedState, message: &ServerMessage) {
    let Some(payload) = encode(message) else {
        return;
    };
    let connections: Vec<ClientConnection> = state
        .connections()
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    for connection in connections {
        // A closed writer means that connection's own task is already tearing it down.
        let _ = connection.send(Message::Text(payload.clone()));
    }
}

/// Broadcast the new role holder.
pub fn broadcast_role_change(state: &SharedState, change: RoleChange) {
    broadcast(
        state,
        &ServerMessage::RoleHolder(RoleHolderUpdate { id: change.holder }),
    );
}

/// Broadcast a new chat or system entry.
pub fn broadcast_log_entry(state: &SharedState, entry: &LogEntry) {
    broadcast(
        state,
        &ServerMessage::Chat(ChatBroadcast {
            entry: ChatEntry::from(entry),
        }),
    );
}

/// Broadcast a new map layout.
pub fn broadcast_map(state: &SharedState, layout: Vec<String>) {
    broadcast(state, &ServerMessage::Map(MapBroadcast { layout }));
}

/// Broadcast the number of open connections.
pub fn broadcast_connection_count(state: &SharedState) {
    broadcast(
        state,
        &ServerMessage::ConnectionCount(ConnectionCount {
            count: state.connection_count(),
        }),
    );
}

/// Announce the side effects of a successful join.
pub fn announce_join(state: &SharedState, outcome: &JoinOutcome) {
    if let Some(entry) = &outcome.notice {
        broadcast_log_entry(state, entry);
    }
    if let Some(change) = outcome.role_change {
        broadcast_role_change(state, change);
    }
}

/// Announce a departure: leave notice, role reassignment and log entry.
///
/// Explicit closes, liveness failures and stale pruning all end here.
pub fn announce_departure(state: &SharedState, departure: &Departure) {
    broadcast(
        state,
        &ServerMessage::PlayerLeft(PlayerLeft {
            id: departure.session.id,
        }),
    );
    if let Some(change) = departure.role_change {
        broadcast_role_change(state, change);
    }
    broadcast_log_entry(state, &departure.notice);
}
