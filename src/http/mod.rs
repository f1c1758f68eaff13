//! HTTP API surface
//!
//! Axum-based REST API: job submission and observation, SSE and
//! WebSocket event streams, health and engine status.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod types;

pub use handlers::AppState;
pub use routes::create_router;
pub use server::HttpServer;
