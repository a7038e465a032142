use tracing::{info, warn};

use crate::{error::AdminError, services::events, state::SharedState};

/// Replace the shared map after checking the admin secret, then broadcast the new layout.
///
/// Shared by the WebSocket `admin_map` message and the HTTP admin route.
pub async fn update_map(
    state: &SharedState,
    password: &str,
    layout: Vec<String>,
) -> Result<Vec<String>, AdminError> {
    let config = state.config();
    let Some(expected) = config.admin_password.as_deref() else {
        warn!("admin map update refused: no admin password configured");
        return Err(AdminError::Disabled);
    };
    if password != expected {
        warn!("admin map update refused: invalid credential");
        return Err(AdminError::InvalidCredential);
    }
    check_bounds(&layout, config.max_map_rows, config.max_map_cols)?;

    // Broadcast under the lock to keep commit order.
    let layout = state
        .with_world_mut(|world| {
            let layout = world.replace_map(layout);
            events::broadcast_map(state, layout.clone());
            layout
        })
        .await;
    info!(rows = layout.len(), "admin replaced the map");

    Ok(layout)
}

fn check_bounds(layout: &[String], max_rows: usize, max_cols: usize) -> Result<(), AdminError> {
    if layout.is_empty() {
        return Err(AdminError::InvalidLayout("layout has no rows".into()));
    }
    if layout.len() > max_rows {
        return Err(AdminError::InvalidLayout(format!(
            "layout has {} rows (max {max_rows})",
            layout.len()
        )));
    }
    if let Some(index) = layout.iter().position(|row| row.chars().count() > max_cols) {
        return Err(AdminError::InvalidLayout(format!(
            "row {index} exceeds {max_cols} columns"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::extract::ws::Message;
    use uuid::Uuid;

    use super::*;
    use crate::{
        config::AppConfig,
        state::{AppState, ClientConnection},
    };

    fn state_with_password() -> SharedState {
        AppState::new(AppConfig {
            admin_password: Some("hunter2".into()),
            max_map_rows: 2,
            max_map_cols: 4,
            ..AppConfig::default()
        })
    }

    #[tokio::test]
    async fn wrong_password_leaves_map_untouched() {
        let state = state_with_password();
        let before = state.with_world(|world| world.init_view().map).await;

        let err = update_map(&state, "hunter3", vec!["#..#".into()])
            .await
            .unwrap_err();

        assert_eq!(err, AdminError::InvalidCredential);
        assert_eq!(state.with_world(|world| world.init_view().map).await, before);
    }

    #[tokio::test]
    async fn disabled_admin_rejects_everything() {
        let state = AppState::new(AppConfig::default());
        let err = update_map(&state, "", vec!["#".into()]).await.unwrap_err();
        assert_eq!(err, AdminError::Disabled);
    }

    #[tokio::test]
    async fn oversized_layout_is_rejected() {
        let state = state_with_password();
        assert!(matches!(
            update_map(&state, "hunter2", vec!["#####".into()]).await,
            Err(AdminError::InvalidLayout(_))
        ));
        assert!(matches!(
            update_map(&state, "hunter2", vec!["#".into(), "#".into(), "#".into()]).await,
            Err(AdminError::InvalidLayout(_))
        ));
    }

    #[tokio::test]
    async fn accepted_layout_is_stored_and_broadcast() {
        let state = state_with_password();
        let id = Uuid::new_v4();
        let (connection, mut outbox) = ClientConnection::new(id);
        state.connections().insert(id, connection);

        let layout = vec!["#..#".to_string(), "####".to_string()];
        update_map(&state, "hunter2", layout.clone()).await.unwrap();

        assert_eq!(state.with_world(|world| world.init_view().map).await, layout);
        let Some(Message::Text(payload)) = outbox.messages.recv().await else {
            panic!("expected a text frame");
        };
        let value: serde_json::Value = serde_json::from_str(payload.as_str()).unwrap();
        assert_eq!(value["type"], "map");
        assert_eq!(value["layout"][1], "####");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_reach_clients_in_commit_order() {
        let state = AppState::new(AppConfig {
            admin_password: Some("hunter2".into()),
            ..AppConfig::default()
        });
        let id = Uuid::new_v4();
        let (connection, mut outbox) = ClientConnection::new(id);
        state.connections().insert(id, connection);

        for round in 0..50 {
            let tasks: Vec<_> = (0..8)
                .map(|writer| {
                    let state = state.clone();
                    tokio::spawn(async move {
                        let row = format!("#{round}-{writer}#");
                        update_map(&state, "hunter2", vec![row]).await.unwrap();
                    })
                })
                .collect();
            for task in tasks {
                task.await.unwrap();
            }

            let mut last = None;
            while let Ok(Message::Text(payload)) = outbox.messages.try_recv() {
                let value: serde_json::Value = serde_json::from_str(payload.as_str()).unwrap();
                last = Some(value["layout"][0].as_str().unwrap().to_string());
            }
            let stored = state.with_world(|world| world.init_view().map).await;
            assert_eq!(last.as_deref(), Some(stored[0].as_str()), "round {round}");
        }
    }
}
