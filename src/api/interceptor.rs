//! Request interceptor - runs an expiry pass before a request is handled.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use super::routes::AppState;

/// Paths that never trigger a pass.
fn is_exempt(path: &str) -> bool {
    path == "/api/health" || path.starts_with("/ws/")
}

/// Reconcile ahead of the handler so it observes expiry as of this request.
///
/// A failed pass is logged by the reconciler and never fails the request.
pub async fn reconcile_before_request(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !is_exempt(req.uri().path()) {
        let now = Utc::now();
        if state.request_throttle.try_acquire(now) {
            state.reconciler.reconcile(now).await;
        } else {
            tracing::trace!("Request reconcile throttled");
        }
    }

    next.run(req).await
}
