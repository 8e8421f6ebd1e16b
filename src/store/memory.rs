//! Process-local task store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{StoreError, StoreResult, TaskStore, TodoQuery};
use crate::todo::{ceil_to_millis, Todo, TodoId, TodoPatch, TodoStatus};

/// In-memory store. Expiry runs under a single write lock, so it is as atomic
/// as the SQLite conditional update.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    todos: RwLock<HashMap<TodoId, Todo>>,
    unavailable: AtomicBool,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with `StoreError::Unavailable`
    /// until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store is marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, todo: &Todo) -> StoreResult<()> {
        self.check_available()?;
        todo.validate()?;
        self.todos.write().await.insert(todo.id, todo.clone());
        Ok(())
    }

    async fn get(&self, id: TodoId) -> StoreResult<Option<Todo>> {
        self.check_available()?;
        Ok(self.todos.read().await.get(&id).cloned())
    }

    async fn list(&self, query: &TodoQuery) -> StoreResult<Vec<Todo>> {
        self.check_available()?;
        let todos = self.todos.read().await;

        let mut matching: Vec<Todo> = todos
            .values()
            .filter(|todo| query.status.map_or(true, |status| todo.status == status))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        let skipped = matching.into_iter().skip(query.offset as usize);
        Ok(match query.effective_limit() {
            Some(limit) => skipped.take(limit as usize).collect(),
            None => skipped.collect(),
        })
    }

    async fn update(&self, id: TodoId, patch: &TodoPatch, now: DateTime<Utc>) -> StoreResult<Todo> {
        self.check_available()?;
        let mut todos = self.todos.write().await;
        let todo = todos.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        todo.apply_patch(patch, now)?;
        Ok(todo.clone())
    }

    async fn delete(&self, id: TodoId) -> StoreResult<bool> {
        self.check_available()?;
        Ok(self.todos.write().await.remove(&id).is_some())
    }

    async fn expire_ongoing(&self, now: DateTime<Utc>) -> StoreResult<Vec<Todo>> {
        self.check_available()?;
        // Round the stamp up so `updated_at >= now` survives millisecond storage.
        let stamp = ceil_to_millis(now);
        let mut todos = self.todos.write().await;

        let mut expired = Vec::new();
        for todo in todos.values_mut() {
            if todo.is_expired_at(now) {
                todo.status = TodoStatus::Failure;
                todo.updated_at = stamp.max(todo.created_at);
                expired.push(todo.clone());
            }
        }
        expired.sort_by(|a, b| a.deadline.cmp(&b.deadline).then(a.id.cmp(&b.id)));
        Ok(expired)
    }
}
