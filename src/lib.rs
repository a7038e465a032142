//! Library crate for arena-sync, exposing modules for the binary and integration tests.

/// Runtime configuration.
pub mod config;
mod dto;
mod error;
/// HTTP and WebSocket routers.
pub mod routes;
/// Connection handling, broadcasting and administration.
pub mod services;
/// Shared world state and its components.
pub mod state;
