//! Todo API endpoints.
//!
//! Provides endpoints for managing todos:
//! - List, create, fetch, update, delete
//! - Mark complete
//! - Status lists (each runs its own expiry pass first)
//! - On-demand reconciliation

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::notify::TodoEvent;
use crate::reconcile::ReconcileResult;
use crate::store::{StoreError, TodoQuery};
use crate::todo::{NewTodo, Todo, TodoId, TodoPatch, TodoStatus};

use super::response::{ApiError, ApiResponse, ApiResult};
use super::routes::AppState;

/// Page size used when a list request names no limit.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Create todo routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_todos).post(create_todo))
        .route("/ongoing", get(list_ongoing))
        .route("/success", get(list_success))
        .route("/failure", get(list_failure))
        .route("/reconcile", post(reconcile_now))
        .route(
            "/:id",
            get(get_todo)
                .put(update_todo)
                .patch(update_todo)
                .delete(delete_todo),
        )
        .route("/:id/mark_complete", patch(mark_complete))
}

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl ListParams {
    fn into_query(self) -> Result<TodoQuery, ApiError> {
        let status = match self.status.as_deref() {
            None | Some("") => None,
            Some(raw) => Some(
                TodoStatus::parse(raw)
                    .ok_or_else(|| ApiError::bad_request(format!("Unknown status: {}", raw)))?,
            ),
        };
        Ok(TodoQuery {
            status,
            limit: Some(self.limit.unwrap_or(DEFAULT_PAGE_SIZE)),
            offset: self.offset.unwrap_or(0),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct DeletedTodo {
    pub id: TodoId,
}

fn parse_id(raw: &str) -> Result<TodoId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid todo id: {}", raw)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /api/todos - List todos, newest first.
async fn list_todos(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Vec<Todo>> {
    let query = params.into_query()?;
    let todos = state.store.list(&query).await?;
    Ok(ApiResponse::ok("Todos retrieved", todos))
}

/// POST /api/todos - Create a todo. Any client-sent status is ignored.
async fn create_todo(
    State(state): State<Arc<AppState>>,
    body: Result<Json<NewTodo>, JsonRejection>,
) -> ApiResult<Todo> {
    let Json(input) = body?;
    let todo = Todo::new(input, Utc::now())?;
    state.store.insert(&todo).await?;

    tracing::info!("Created todo: {} ({})", todo.title, todo.id);
    state.notifier.publish(TodoEvent::TaskCreated(todo.clone()));
    Ok(ApiResponse::created("Todo created", todo))
}

/// GET /api/todos/:id - Fetch one todo.
async fn get_todo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Todo> {
    let id = parse_id(&id)?;
    let todo = state
        .store
        .get(id)
        .await?
        .ok_or(StoreError::NotFound(id))?;
    Ok(ApiResponse::ok("Todo retrieved", todo))
}

/// PUT/PATCH /api/todos/:id - Apply a partial edit.
async fn update_todo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<TodoPatch>, JsonRejection>,
) -> ApiResult<Todo> {
    let id = parse_id(&id)?;
    let Json(patch) = body?;
    let todo = state.store.update(id, &patch, Utc::now()).await?;

    tracing::info!("Updated todo: {} ({})", todo.title, todo.id);
    state.notifier.publish(TodoEvent::TaskUpdated(todo.clone()));
    Ok(ApiResponse::ok("Todo updated", todo))
}

/// DELETE /api/todos/:id - Delete a todo.
async fn delete_todo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<DeletedTodo> {
    let id = parse_id(&id)?;
    if !state.store.delete(id).await? {
        return Err(StoreError::NotFound(id).into());
    }

    tracing::info!("Deleted todo: {}", id);
    state.notifier.publish(TodoEvent::TaskDeleted(id));
    Ok(ApiResponse::ok("Todo deleted", DeletedTodo { id }))
}

/// PATCH /api/todos/:id/mark_complete - Move an ongoing todo to success.
async fn mark_complete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Todo> {
    let id = parse_id(&id)?;
    let todo = state
        .store
        .update(id, &TodoPatch::mark_complete(), Utc::now())
        .await?;

    tracing::info!("Completed todo: {} ({})", todo.title, todo.id);
    state.notifier.publish(TodoEvent::TaskUpdated(todo.clone()));
    Ok(ApiResponse::ok("Todo marked as complete", todo))
}

/// GET /api/todos/ongoing
async fn list_ongoing(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Todo>> {
    list_by_status(&state, TodoStatus::Ongoing).await
}

/// GET /api/todos/success
async fn list_success(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Todo>> {
    list_by_status(&state, TodoStatus::Success).await
}

/// GET /api/todos/failure
async fn list_failure(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Todo>> {
    list_by_status(&state, TodoStatus::Failure).await
}

/// Reconcile at a fresh instant, then filter. A failed pass is already
/// logged by the reconciler and does not fail the listing.
async fn list_by_status(state: &AppState, status: TodoStatus) -> ApiResult<Vec<Todo>> {
    state.reconciler.reconcile(Utc::now()).await;
    let todos = state.store.list(&TodoQuery::with_status(status)).await?;
    Ok(ApiResponse::ok(
        format!("{} todos retrieved", status.as_str()),
        todos,
    ))
}

/// POST /api/todos/reconcile - Run one expiry pass now.
async fn reconcile_now(State(state): State<Arc<AppState>>) -> ApiResult<ReconcileResult> {
    let result = state.reconciler.reconcile(Utc::now()).await;
    let message = if result.is_success() {
        format!("Marked {} overdue todos as failed", result.transitioned_count)
    } else {
        "Expiry pass failed".to_string()
    };
    Ok(ApiResponse::ok(message, result))
}
