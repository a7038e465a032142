use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the arena server.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::websocket::ws_handler,
        crate::routes::admin::update_map,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::admin::MapUpdateRequest,
            crate::dto::ws::AdminAck,
            crate::dto::ws::JoinRequest,
            crate::dto::ws::MovementUpdate,
            crate::dto::ws::ChatRequest,
            crate::dto::ws::TagRequest,
            crate::dto::ws::PingRequest,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "game", description = "Game WebSocket"),
        (name = "admin", description = "Map administration"),
    )
)]
pub struct ApiDoc;
