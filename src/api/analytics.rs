//! Analytics API endpoints.

use axum::{extract::State, routing::get, Router};
use chrono::Utc;
use std::sync::Arc;

use crate::analytics::{self, CompletionStats, DurationAnalysis, ProductivityPatterns};
use crate::store::TodoQuery;
use crate::todo::Todo;

use super::response::{ApiError, ApiResponse, ApiResult};
use super::routes::AppState;

/// Create analytics routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/completion-stats", get(completion_stats))
        .route("/productivity-patterns", get(productivity_patterns))
        .route("/duration-analysis", get(duration_analysis))
}

async fn all_todos(state: &AppState) -> Result<Vec<Todo>, ApiError> {
    Ok(state.store.list(&TodoQuery::default()).await?)
}

/// GET /api/analytics/completion-stats
async fn completion_stats(State(state): State<Arc<AppState>>) -> ApiResult<CompletionStats> {
    let todos = all_todos(&state).await?;
    Ok(ApiResponse::ok(
        "Completion statistics retrieved",
        analytics::completion_stats(&todos, Utc::now()),
    ))
}

/// GET /api/analytics/productivity-patterns
async fn productivity_patterns(
    State(state): State<Arc<AppState>>,
) -> ApiResult<ProductivityPatterns> {
    let todos = all_todos(&state).await?;
    Ok(ApiResponse::ok(
        "Productivity patterns retrieved",
        analytics::productivity_patterns(&todos),
    ))
}

/// GET /api/analytics/duration-analysis
async fn duration_analysis(State(state): State<Arc<AppState>>) -> ApiResult<DurationAnalysis> {
    let todos = all_todos(&state).await?;
    Ok(ApiResponse::ok(
        "Duration analysis retrieved",
        analytics::duration_analysis(&todos),
    ))
}
