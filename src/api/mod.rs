//! HTTP and WebSocket surface.

mod analytics;
mod interceptor;
pub mod response;
mod routes;
mod todos;
mod ws;

pub use routes::{build_router, serve, AppState};
