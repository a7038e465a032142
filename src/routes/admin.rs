use axum::{
    Json, Router,
    extract::State,
    http::HeaderMap,
    routing::put,
};
use axum_valid::Valid;

use crate::{
    dto::{admin::MapUpdateRequest, ws::AdminAck},
    error::AppError,
    services::admin_service,
    state::SharedState,
};

const ADMIN_PASSWORD_HEADER: &str = "x-admin-password";

/// Admin-only endpoints.
pub fn router() -> Router<SharedState> {
    Router::new().route("/admin/map", put(update_map))
}

/// Replace the shared map and broadcast it to every connected client.
#[utoipa::path(
    put,
    path = "/admin/map",
    tag = "admin",
    params(("X-Admin-Password" = String, Header, description = "Configured admin password")),
    request_body = MapUpdateRequest,
    responses(
        (status = 200, description = "Map replaced", body = AdminAck),
        (status = 400, description = "Invalid layout"),
        (status = 401, description = "Missing or invalid password"),
        (status = 403, description = "Admin operations disabled")
    )
)]
pub async fn update_map(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Valid(Json(payload)): Valid<Json<MapUpdateRequest>>,
) -> Result<Json<AdminAck>, AppError> {
    let password = headers
        .get(ADMIN_PASSWORD_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            AppError::Unauthorized("missing admin password header `X-Admin-Password`".into())
        })?;

    admin_service::update_map(&state, password, payload.layout).await?;
    Ok(Json(AdminAck {
        success: true,
        reason: None,
    }))
}
