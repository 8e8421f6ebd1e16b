//! Router assembly and server lifecycle.

use std::sync::Arc;

use axum::middleware;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::notify::Notifier;
use crate::reconcile::{spawn_reconcile_loop, ExpiryReconciler, Throttle};
use crate::store::{self, SharedTaskStore};

use super::analytics as analytics_api;
use super::interceptor;
use super::todos;
use super::ws;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// Canonical todo records
    pub store: SharedTaskStore,
    /// Real-time fan-out
    pub notifier: Notifier,
    pub reconciler: Arc<ExpiryReconciler>,
    /// Gate for passes triggered by the request interceptor
    pub request_throttle: Throttle,
}

impl AppState {
    /// Wire the notifier and reconciler around `store`. Must be called inside a
    /// Tokio runtime; the notifier's dispatcher task is spawned here.
    pub fn new(config: Config, store: SharedTaskStore) -> Self {
        let (notifier, _dispatcher) = Notifier::spawn_with_send_timeout(
            Arc::clone(&store),
            config.listener_buffer,
            config.listener_send_timeout,
        );
        let reconciler = Arc::new(ExpiryReconciler::new(Arc::clone(&store), notifier.clone()));
        let request_throttle = Throttle::new(config.request_reconcile_throttle);
        Self {
            config,
            store,
            notifier,
            reconciler,
            request_throttle,
        }
    }
}

/// Build the full router. The interceptor wraps every route; it skips the
/// health check and the WebSocket channel itself.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/ws/todos", get(ws::todos_ws))
        .nest("/api/todos", todos::routes())
        .nest("/api/analytics", analytics_api::routes())
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            interceptor::reconcile_before_request,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let store = store::open(&config.storage)?;
    let state = Arc::new(AppState::new(config.clone(), store));

    // Catch up on anything that expired while the process was down.
    let startup = state.reconciler.reconcile(chrono::Utc::now()).await;
    if !startup.is_success() {
        tracing::warn!("Startup expiry pass failed; the periodic loop will retry");
    }

    let cancel = CancellationToken::new();
    let reconcile_loop = spawn_reconcile_loop(
        Arc::clone(&state.reconciler),
        config.reconcile_interval,
        cancel.clone(),
    );

    let app = build_router(Arc::clone(&state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let an in-flight pass finish before exiting.
    cancel.cancel();
    if let Err(e) = reconcile_loop.await {
        tracing::error!("Reconcile loop panicked: {}", e);
    }

    tracing::info!("Server stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping server...");
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub listeners: usize,
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        listeners: state.notifier.listener_count().await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageMode;
    use crate::store::InMemoryTaskStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_reports_ok() {
        let config = Config {
            storage: StorageMode::Memory,
            ..Config::default()
        };
        let state = Arc::new(AppState::new(config, Arc::new(InMemoryTaskStore::new())));

        let response = build_router(state)
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["listeners"], 0);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let config = Config {
            storage: StorageMode::Memory,
            ..Config::default()
        };
        let state = Arc::new(AppState::new(config, Arc::new(InMemoryTaskStore::new())));

        let response = build_router(state)
            .oneshot(Request::builder().uri("/api/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
