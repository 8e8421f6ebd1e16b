//! Task store - the single source of truth for todo records.
//!
//! Two implementations are provided:
//! - [`SqliteTaskStore`]: durable storage backed by SQLite
//! - [`InMemoryTaskStore`]: process-local storage, used for ephemeral runs and tests
//!
//! Deadline expiry always goes through [`TaskStore::expire_ongoing`], a single
//! conditional bulk update. Client edits go through [`TaskStore::update`], which
//! applies the patch to one row atomically.

mod memory;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::StorageMode;
use crate::todo::{Todo, TodoError, TodoId, TodoPatch, TodoStatus};

pub use memory::InMemoryTaskStore;
pub use sqlite::SqliteTaskStore;

/// Upper bound on a single list page.
pub const MAX_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task store unavailable: {0}")]
    Unavailable(String),

    #[error("todo not found: {0}")]
    NotFound(TodoId),

    #[error("invalid persisted todo data: {0}")]
    InvalidData(String),

    #[error(transparent)]
    Rejected(#[from] TodoError),
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Unavailable(value.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Query options for listing todos.
#[derive(Debug, Clone, Default)]
pub struct TodoQuery {
    pub status: Option<TodoStatus>,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl TodoQuery {
    pub fn with_status(status: TodoStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub(crate) fn effective_limit(&self) -> Option<u32> {
        self.limit.map(|limit| limit.min(MAX_PAGE_SIZE))
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, todo: &Todo) -> StoreResult<()>;

    async fn get(&self, id: TodoId) -> StoreResult<Option<Todo>>;

    /// List todos, newest first.
    async fn list(&self, query: &TodoQuery) -> StoreResult<Vec<Todo>>;

    /// Apply a client edit to one todo and return the stored result.
    async fn update(&self, id: TodoId, patch: &TodoPatch, now: DateTime<Utc>) -> StoreResult<Todo>;

    /// Returns whether a row was removed.
    async fn delete(&self, id: TodoId) -> StoreResult<bool>;

    /// Move every `ongoing` todo with `deadline < now` to `failure` in one
    /// conditional update, returning exactly the rows this call changed.
    async fn expire_ongoing(&self, now: DateTime<Utc>) -> StoreResult<Vec<Todo>>;

    /// Whether `expire_ongoing` is a single atomic conditional update.
    /// Stores returning `false` get their expiry passes serialized by the caller.
    fn has_atomic_expiry(&self) -> bool {
        true
    }
}

pub type SharedTaskStore = Arc<dyn TaskStore>;

/// Open the store selected by configuration.
pub fn open(mode: &StorageMode) -> StoreResult<SharedTaskStore> {
    match mode {
        StorageMode::Memory => {
            tracing::info!("Using in-memory task store");
            Ok(Arc::new(InMemoryTaskStore::new()))
        }
        StorageMode::Sqlite(path) => {
            let store = SqliteTaskStore::open(path)?;
            tracing::info!("Opened SQLite task store at {}", path.display());
            Ok(Arc::new(store))
        }
    }
}
