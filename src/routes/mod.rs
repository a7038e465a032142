use axum::Router;

use crate::state::SharedState;

/// Admin map endpoint.
pub mod admin;
/// Swagger UI.
pub mod docs;
/// Health check.
pub mod health;
/// Game WebSocket upgrade.
pub mod websocket;

/// Compose all route trees and attach the shared state.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(websocket::router())
        .merge(admin::router())
        .merge(docs::router())
        .with_state(state)
}
