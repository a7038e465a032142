use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, Stream, StreamExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{AdminAck, ClientMessage, InitMessage, JoinAck, Pong, ServerMessage},
    services::{admin_service, events},
    state::{
        ClientConnection, ConnectionOutbox, SharedState,
        registry::{SessionId, SessionPatch},
    },
};

/// Per-connection data the dispatcher needs besides the shared state.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// Identity allocated when the socket was accepted.
    pub id: SessionId,
    /// Color assigned at connect time, used when a join does not name one.
    pub color: String,
}

/// Handle the full lifecycle of one game WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (sender, receiver) = socket.split();
    let context = ConnectionContext {
        id: Uuid::new_v4(),
        color: state.config().pick_color(&mut rand::rng()),
    };

    let (connection, outbox) = ClientConnection::new(context.id);
    let writer_task = spawn_writer(sender, outbox);

    serve_connection(&state, &context, &connection, receiver).await;

    finalize(writer_task, connection).await;
}

/// Register the connection, pump inbound frames until close or liveness failure, then clean up.
pub async fn serve_connection<S, E>(
    state: &SharedState,
    context: &ConnectionContext,
    connection: &ClientConnection,
    mut receiver: S,
) where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let id = context.id;
    if !open(state, context, connection).await {
        info!(id = %id, "connection closed before init, terminating");
        return;
    }

    let config = state.config();
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    // The first tick completes immediately.
    heartbeat.tick().await;
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            frame = receiver.next() => {
                let Some(frame) = frame else {
                    break;
                };
                last_seen = Instant::now();
                match frame {
                    Ok(Message::Text(text)) => {
                        debug!(id = %id, payload = %text, "received client message");
                        handle_client_message(state, context, text.as_str()).await;
                    }
                    Ok(Message::Ping(payload)) => {
                        let _ = connection.send(Message::Pong(payload));
                    }
                    Ok(Message::Close(frame)) => {
                        info!(id = %id, "client closed");
                        let _ = connection.send(Message::Close(frame));
                        break;
                    }
                    Ok(Message::Binary(_)) | Ok(Message::Pong(_)) => {}
                    Err(err) => {
                        warn!(id = %id, error = %err, "websocket error");
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if last_seen.elapsed() > config.heartbeat_timeout {
                    warn!(id = %id, "heartbeat timed out, closing connection");
                    let _ = connection.send(Message::Close(None));
                    break;
                }
                if !connection.send(Message::Ping(Default::default())) {
                    info!(id = %id, "writer closed, terminating");
                    break;
                }
            }
        }
    }

    disconnect(state, id).await;
}

/// Queue the init message and register the connection in one world critical section.
async fn open(
    state: &SharedState,
    context: &ConnectionContext,
    connection: &ClientConnection,
) -> bool {
    let id = context.id;
    state
        .with_world_mut(|world| {
            let init = ServerMessage::Init(InitMessage::new(
                id,
                context.color.clone(),
                world.init_view(),
            ));
            if !events::send_to_connection(connection, &init) {
                return false;
            }
            state.connections().insert(id, connection.clone());
            info!(id = %id, connections = state.connection_count(), "client connected");
            events::broadcast_connection_count(state);
            true
        })
        .await
}

/// Parse one text frame and apply it. Malformed frames are logged and dropped.
///
/// Broadcasts are queued before the world lock is released.
pub async fn handle_client_message(state: &SharedState, context: &ConnectionContext, raw: &str) {
    let id = context.id;
    let message = match ClientMessage::from_json_str(raw) {
        Ok(message) => message,
        Err(err) => {
            warn!(id = %id, error = %err, "failed to parse or validate client message");
            return;
        }
    };

    match message {
        ClientMessage::Join(request) => {
            let color = request.color.unwrap_or_else(|| context.color.clone());
            state
                .with_world_mut(|world| {
                    match world.join(id, &request.username, color, Instant::now(), &mut rand::rng()) {
                        Ok(outcome) => {
                            info!(
                                id = %id,
                                name = %outcome.name,
                                rejoined = outcome.rejoined,
                                sessions = world.session_count(),
                                "session joined"
                            );
                            let ack = JoinAck::accepted(id, &outcome.name);
                            events::send_to(state, id, &ServerMessage::JoinAck(ack));
                            events::announce_join(state, &outcome);
                        }
                        Err(err) => {
                            info!(id = %id, error = %err, "join refused");
                            let ack = JoinAck::refused(err.reason());
                            events::send_to(state, id, &ServerMessage::JoinAck(ack));
                        }
                    }
                })
                .await;
        }
        ClientMessage::Move(update) => {
            let patch = SessionPatch::from(update);
            let outcome = state
                .with_world_mut(|world| world.apply_movement(id, patch, Instant::now()))
                .await;
            debug!(id = %id, outcome = ?outcome, "movement processed");
        }
        ClientMessage::Chat(request) => {
            state
                .with_world_mut(|world| {
                    if let Some(entry) = world.chat(id, &request.text) {
                        events::broadcast_log_entry(state, &entry);
                    }
                })
                .await;
        }
        ClientMessage::Tag(request) => {
            state
                .with_world_mut(|world| {
                    if let Some(change) = world.tag(id, request.target_id, &mut rand::rng()) {
                        events::broadcast_role_change(state, change);
                    }
                })
                .await;
        }
        ClientMessage::AdminMap(request) => {
            let ack = match admin_service::update_map(state, &request.password, request.layout)
                .await
            {
                Ok(_) => AdminAck {
                    success: true,
                    reason: None,
                },
                Err(err) => AdminAck {
                    success: false,
                    reason: Some(err.reason().to_string()),
                },
            };
            events::send_to(state, id, &ServerMessage::AdminAck(ack));
        }
        ClientMessage::Ping(request) => {
            events::send_to(state, id, &ServerMessage::Pong(Pong { t: request.t }));
        }
    }
}

/// Tear down connection `id`: forget the socket, remove the session and announce it.
///
/// Safe to call after the scheduler already pruned the session.
pub async fn disconnect(state: &SharedState, id: SessionId) {
    state
        .with_world_mut(|world| {
            let removed = state.connections().remove(&id).is_some();
            if let Some(departure) = world.depart(id, &mut rand::rng()) {
                events::announce_departure(state, &departure);
            }
            if removed {
                info!(id = %id, connections = state.connection_count(), "client disconnected");
                events::broadcast_connection_count(state);
            }
        })
        .await;
}

/// Writer task: reliable messages in order, plus the latest pending snapshot.
fn spawn_writer<S>(mut sender: S, mut outbox: ConnectionOutbox) -> JoinHandle<()>
where
    S: futures::Sink<Message> + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                biased;
                message = outbox.messages.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
                changed = outbox.snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let Some(payload) = outbox.snapshots.borrow_and_update().clone() else {
                        continue;
                    };
                    Message::Text(payload)
                }
            };
            let closing = matches!(message, Message::Close(_));
            if sender.send(message).await.is_err() || closing {
                break;
            }
        }
    })
}

/// Ensure the writer task winds down before the socket handler returns.
async fn finalize(writer_task: JoinHandle<()>, connection: ClientConnection) {
    drop(connection);
    let _ = writer_task.await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::channel::mpsc as frames;
    use serde_json::{Value, json};

    use super::*;
    use crate::{config::AppConfig, state::AppState};

    type Inbound = frames::UnboundedReceiver<Result<Message, axum::Error>>;

    fn text_frame(raw: &str) -> Result<Message, axum::Error> {
        Ok(Message::Text(raw.to_string().into()))
    }

    fn drain(outbox: &mut ConnectionOutbox) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Ok(message) = outbox.messages.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn json_frames(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .filter_map(|message| match message {
                Message::Text(payload) => Some(serde_json::from_str(payload.as_str()).unwrap()),
                _ => None,
            })
            .collect()
    }

    fn spawn_served(
        state: &SharedState,
        context: &ConnectionContext,
        inbound: Inbound,
    ) -> (ConnectionOutbox, JoinHandle<()>) {
        let (connection, outbox) = ClientConnection::new(context.id);
        let state = state.clone();
        let context = context.clone();
        let task = tokio::spawn(async move {
            serve_connection(&state, &context, &connection, inbound).await;
        });
        (outbox, task)
    }

    async fn wait_until_joined(state: &SharedState, id: SessionId) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while state.with_world(|world| world.session(id).is_none()).await {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn silent_peer_is_closed_and_its_role_reassigned() {
        let state = AppState::new(AppConfig {
            heartbeat_interval: Duration::from_millis(20),
            heartbeat_timeout: Duration::from_millis(200),
            ..AppConfig::default()
        });
        let silent = ConnectionContext {
            id: Uuid::new_v4(),
            color: "#abcdef".into(),
        };
        let (sender, inbound) = frames::unbounded();
        sender
            .unbounded_send(text_frame(r#"{"type":"join","username":"Quiet"}"#))
            .unwrap();
        let (mut silent_outbox, task) = spawn_served(&state, &silent, inbound);
        wait_until_joined(&state, silent.id).await;

        let (watcher, mut watcher_outbox) = connect(&state);
        handle_client_message(&state, &watcher, r#"{"type":"join","username":"Watcher"}"#).await;
        assert_eq!(
            state.with_world(|world| world.role_holder()).await,
            Some(silent.id)
        );
        drain(&mut watcher_outbox);

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        let sent = drain(&mut silent_outbox);
        let first = json_frames(&sent[..1]);
        assert_eq!(first[0]["type"], "init");
        assert_eq!(first[0]["id"], silent.id.to_string());
        assert!(sent.iter().any(|message| matches!(message, Message::Ping(_))));
        assert!(matches!(sent.last(), Some(Message::Close(None))));

        assert!(state.connections().get(&silent.id).is_none());
        assert_eq!(
            state.with_world(|world| world.role_holder()).await,
            Some(watcher.id)
        );
        let seen = json_frames(&drain(&mut watcher_outbox));
        let types: Vec<&str> = seen.iter().filter_map(|v| v["type"].as_str()).collect();
        assert_eq!(
            types,
            vec!["player_left", "role_holder", "chat", "connection_count"]
        );
        assert_eq!(seen[0]["id"], silent.id.to_string());
        assert_eq!(seen[1]["id"], watcher.id.to_string());
        drop(sender);
    }

    #[tokio::test]
    async fn init_reflects_state_and_precedes_live_updates() {
        let state = AppState::new(AppConfig::default());
        let (holder, _holder_outbox) = connect(&state);
        handle_client_message(&state, &holder, r#"{"type":"join","username":"Holder"}"#).await;

        let newcomer = ConnectionContext {
            id: Uuid::new_v4(),
            color: "#000".into(),
        };
        let (sender, inbound) = frames::unbounded();
        let (mut outbox, task) = spawn_served(&state, &newcomer, inbound);
        wait_until_connected(&state, newcomer.id).await;
        handle_client_message(&state, &holder, r#"{"type":"chat","text":"hi"}"#).await;
        drop(sender);
        task.await.unwrap();

        let seen = json_frames(&drain(&mut outbox));
        assert_eq!(seen[0]["type"], "init");
        assert_eq!(seen[0]["roleHolder"], holder.id.to_string());
        assert_eq!(seen[0]["eventLog"][0]["text"], "Holder joined");
        assert!(
            seen.iter()
                .any(|v| v["type"] == "chat" && v["entry"]["text"] == "hi")
        );
        assert!(state.connections().get(&newcomer.id).is_none());
    }

    async fn wait_until_connected(state: &SharedState, id: SessionId) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !state.connections().contains_key(&id) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    fn connect(state: &SharedState) -> (ConnectionContext, ConnectionOutbox) {
        let id = Uuid::new_v4();
        let (connection, outbox) = ClientConnection::new(id);
        state.connections().insert(id, connection);
        let context = ConnectionContext {
            id,
            color: "#123456".into(),
        };
        (context, outbox)
    }

    async fn next_json(outbox: &mut ConnectionOutbox) -> Value {
        match outbox.messages.recv().await {
            Some(Message::Text(payload)) => serde_json::from_str(payload.as_str()).unwrap(),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn join_acknowledges_and_takes_the_role() {
        let state = AppState::new(AppConfig::default());
        let (alice, mut outbox) = connect(&state);

        handle_client_message(&state, &alice, r#"{"type":"join","username":"Alice"}"#).await;

        let ack = next_json(&mut outbox).await;
        assert_eq!(ack, json!({ "type": "join_ack", "success": true, "id": alice.id, "name": "Alice" }));
        let notice = next_json(&mut outbox).await;
        assert_eq!(notice["entry"]["text"], "Alice joined");
        let role = next_json(&mut outbox).await;
        assert_eq!(role["type"], "role_holder");
        assert_eq!(role["id"], alice.id.to_string());

        let color = state
            .with_world(|world| world.session(alice.id).map(|s| s.color.clone()))
            .await;
        assert_eq!(color.as_deref(), Some("#123456"));
    }

    #[tokio::test]
    async fn duplicate_name_is_refused() {
        let state = AppState::new(AppConfig::default());
        let (first, _first_outbox) = connect(&state);
        let (second, mut outbox) = connect(&state);

        handle_client_message(&state, &first, r#"{"type":"join","username":"Bob"}"#).await;
        while outbox.messages.try_recv().is_ok() {}
        handle_client_message(&state, &second, r#"{"type":"join","username":"bob"}"#).await;

        let ack = next_json(&mut outbox).await;
        assert_eq!(ack, json!({ "type": "join_ack", "success": false, "reason": "name_taken" }));
        assert_eq!(state.with_world(|world| world.session_count()).await, 1);
    }

    #[tokio::test]
    async fn malformed_frames_are_ignored() {
        let state = AppState::new(AppConfig::default());
        let (context, mut outbox) = connect(&state);

        handle_client_message(&state, &context, "{not json").await;
        handle_client_message(&state, &context, r#"{"type":"fly"}"#).await;

        assert!(outbox.messages.try_recv().is_err());
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let state = AppState::new(AppConfig::default());
        let (context, mut outbox) = connect(&state);

        handle_client_message(&state, &context, r#"{"type":"ping","t":42.5}"#).await;

        assert_eq!(next_json(&mut outbox).await, json!({ "type": "pong", "t": 42.5 }));
    }

    #[tokio::test]
    async fn chat_before_join_is_dropped() {
        let state = AppState::new(AppConfig::default());
        let (context, mut outbox) = connect(&state);

        handle_client_message(&state, &context, r#"{"type":"chat","text":"hello"}"#).await;

        assert!(outbox.messages.try_recv().is_err());
    }

    #[tokio::test]
    async fn admin_map_with_wrong_password_is_refused() {
        let state = AppState::new(AppConfig {
            admin_password: Some("secret".into()),
            ..AppConfig::default()
        });
        let (context, mut outbox) = connect(&state);

        handle_client_message(
            &state,
            &context,
            r##"{"type":"admin_map","password":"guess","layout":["#"]}"##,
        )
        .await;

        assert_eq!(
            next_json(&mut outbox).await,
            json!({ "type": "admin_ack", "success": false, "reason": "invalid_credential" })
        );
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let state = AppState::new(AppConfig::default());
        let (leaving, _leaving_outbox) = connect(&state);
        let (staying, mut outbox) = connect(&state);
        handle_client_message(&state, &leaving, r#"{"type":"join","username":"A"}"#).await;
        handle_client_message(&state, &staying, r#"{"type":"join","username":"B"}"#).await;
        while outbox.messages.try_recv().is_ok() {}

        disconnect(&state, leaving.id).await;
        disconnect(&state, leaving.id).await;

        assert_eq!(next_json(&mut outbox).await["type"], "player_left");
        assert_eq!(next_json(&mut outbox).await["type"], "role_holder");
        assert_eq!(next_json(&mut outbox).await["type"], "chat");
        let count = next_json(&mut outbox).await;
        assert_eq!(count, json!({ "type": "connection_count", "count": 1 }));
        assert!(outbox.messages.try_recv().is_err());
        assert_eq!(
            state.with_world(|world| world.role_holder()).await,
            Some(staying.id)
        );
    }
}
