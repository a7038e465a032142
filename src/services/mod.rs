/// Map administration shared by the socket and HTTP surfaces.
pub mod admin_service;
/// Fixed-rate snapshot broadcaster and stale session pruning.
pub mod broadcast_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Outbound message fan-out helpers.
pub mod events;
/// WebSocket connection and message handling service.
pub mod websocket_service;
