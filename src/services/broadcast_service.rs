use std::time::Instant;

use axum::extract::ws::Message;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info};

use crate::{
    dto::ws::{ServerMessage, WorldState},
    services::events::{self, announce_departure},
    state::{SharedState, world::Departure},
};

/// What one broadcast tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Sessions pruned for staleness.
    pub pruned: usize,
    /// Sessions included in the snapshot.
    pub players: usize,
    /// Connections offered the snapshot.
    pub recipients: usize,
}

/// Spawn the fixed-rate broadcaster. It runs independently of inbound traffic.
pub fn spawn_scheduler(state: SharedState) -> JoinHandle<()> {
    let period = state.config().tick_interval();
    info!(period_ms = period.as_millis() as u64, "starting broadcast scheduler");

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            run_tick(&state, Instant::now()).await;
        }
    })
}

/// Prune stale sessions, then publish a compacted snapshot to every open connection.
///
/// Empty snapshots are not sent.
pub async fn run_tick(state: &SharedState, now: Instant) -> TickReport {
    let stale_timeout = state.config().stale_timeout;
    let (pruned, snapshot) = state
        .with_world_mut(|world| {
            let departures = world.prune_stale(now, stale_timeout, &mut rand::rng());
            // Departures are announced before the lock is released to keep commit order.
            for departure in &departures {
                evict(state, departure);
            }
            let snapshot = (!world.is_empty()).then(|| world.snapshot());
            (departures.len(), snapshot)
        })
        .await;

    let mut report = TickReport {
        pruned,
        ..TickReport::default()
    };
    let Some(snapshot) = snapshot else {
        return report;
    };
    report.players = snapshot.sessions.len();

    let Some(payload) = events::encode(&ServerMessage::State(WorldState::from(&snapshot))) else {
        return report;
    };
    for entry in state.connections().iter() {
        let connection = entry.value();
        if connection.is_open() {
            connection.offer_snapshot(payload.clone());
            report.recipients += 1;
        }
    }

    report
}

/// Close the socket of a pruned session and announce its departure.
fn evict(state: &SharedState, departure: &Departure) {
    let id = departure.session.id;
    debug!(id = %id, "pruning stale session");
    if let Some((_, connection)) = state.connections().remove(&id) {
        let _ = connection.send(Message::Close(None));
    }
    announce_departure(state, departure);
    events::broadcast_connection_count(state);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;
    use crate::{
        config::AppConfig,
        state::{AppState, ClientConnection, registry::SessionPatch},
    };

    #[tokio::test]
    async fn empty_world_skips_the_broadcast() {
        let state = AppState::new(AppConfig::default());
        let id = Uuid::new_v4();
        let (connection, outbox) = ClientConnection::new(id);
        state.connections().insert(id, connection);

        let report = run_tick(&state, Instant::now()).await;

        assert_eq!(report.recipients, 0);
        assert!(outbox.snapshots.borrow().is_none());
    }

    #[tokio::test]
    async fn latest_snapshot_replaces_unsent_one() {
        let state = AppState::new(AppConfig::default());
        let id = Uuid::new_v4();
        let (connection, mut outbox) = ClientConnection::new(id);
        state.connections().insert(id, connection);

        let t0 = Instant::now();
        state
            .with_world_mut(|world| {
                world.join(id, "Alice", "#fff".into(), t0, &mut rand::rng()).unwrap();
            })
            .await;
        run_tick(&state, t0).await;

        state
            .with_world_mut(|world| {
                world.apply_movement(
                    id,
                    SessionPatch {
                        vx: Some(3.0),
                        ..Default::default()
                    },
                    t0,
                );
            })
            .await;
        let report = run_tick(&state, t0).await;
        assert_eq!(report.players, 1);
        assert_eq!(report.recipients, 1);

        assert!(outbox.snapshots.has_changed().unwrap());
        let payload = outbox.snapshots.borrow_and_update().clone().unwrap();
        let value: serde_json::Value = serde_json::from_str(payload.as_str()).unwrap();
        assert_eq!(value["type"], "state");
        assert_eq!(value["players"][0]["vx"], 3.0);
        assert!(!outbox.snapshots.has_changed().unwrap());
    }

    #[tokio::test]
    async fn stale_session_is_pruned_through_departure_path() {
        let state = AppState::new(AppConfig::default());
        let quiet = Uuid::new_v4();
        let watcher = Uuid::new_v4();
        let (quiet_connection, mut quiet_outbox) = ClientConnection::new(quiet);
        let (watcher_connection, mut watcher_outbox) = ClientConnection::new(watcher);
        state.connections().insert(quiet, quiet_connection);
        state.connections().insert(watcher, watcher_connection);

        let t0 = Instant::now();
        state
            .with_world_mut(|world| {
                world.join(quiet, "quiet", "#fff".into(), t0, &mut rand::rng()).unwrap();
                world
                    .join(
                        watcher,
                        "watcher",
                        "#fff".into(),
                        t0 + Duration::from_secs(9),
                        &mut rand::rng(),
                    )
                    .unwrap();
            })
            .await;

        let report = run_tick(&state, t0 + Duration::from_secs(11)).await;

        assert_eq!(report.pruned, 1);
        assert_eq!(report.players, 1);
        assert!(state.connections().get(&quiet).is_none());
        assert!(matches!(
            quiet_outbox.messages.recv().await,
            Some(Message::Close(None))
        ));
        assert_eq!(
            state.with_world(|world| world.role_holder()).await,
            Some(watcher)
        );

        let Some(Message::Text(payload)) = watcher_outbox.messages.recv().await else {
            panic!("expected a text frame");
        };
        let left: serde_json::Value = serde_json::from_str(payload.as_str()).unwrap();
        assert_eq!(left["type"], "player_left");
        assert_eq!(left["id"], quiet.to_string());
    }
}
