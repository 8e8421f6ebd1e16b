//! Expiry reconciler - moves overdue `ongoing` todos to `failure`.
//!
//! A pass is triggered from three places:
//! - the request interceptor (optionally throttled, see [`Throttle`])
//! - status list endpoints, before they filter
//! - the periodic background loop (see [`spawn_reconcile_loop`])
//!
//! Every trigger samples a fresh `now` and hands it in. The reconciler never
//! reads the clock itself. Passes are idempotent: a todo that has already
//! failed is no longer `ongoing`, so a redundant pass changes and announces
//! nothing.

mod scheduler;
mod throttle;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::notify::{Notifier, TodoEvent};
use crate::store::SharedTaskStore;
use crate::todo::TodoId;

pub use scheduler::spawn_reconcile_loop;
pub use throttle::Throttle;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStatus {
    Success,
    Error,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
    pub status: ReconcileStatus,
    pub transitioned_count: usize,
    pub transitioned_task_ids: Vec<TodoId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReconcileResult {
    fn success(ids: Vec<TodoId>) -> Self {
        Self {
            status: ReconcileStatus::Success,
            transitioned_count: ids.len(),
            transitioned_task_ids: ids,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            status: ReconcileStatus::Error,
            transitioned_count: 0,
            transitioned_task_ids: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReconcileStatus::Success
    }
}

pub struct ExpiryReconciler {
    store: SharedTaskStore,
    notifier: Notifier,
    /// Present only for stores whose expiry is not a single atomic update.
    pass_lock: Option<Mutex<()>>,
}

impl ExpiryReconciler {
    pub fn new(store: SharedTaskStore, notifier: Notifier) -> Self {
        let pass_lock = (!store.has_atomic_expiry()).then(|| Mutex::new(()));
        Self {
            store,
            notifier,
            pass_lock,
        }
    }

    /// Run one pass at `now`.
    ///
    /// Never fails: a store error yields an `Error` result with a zero count.
    /// Each transitioned todo is published as `task_updated` after the store
    /// write returns; publishing does not wait for delivery.
    pub async fn reconcile(&self, now: DateTime<Utc>) -> ReconcileResult {
        let _guard = match &self.pass_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let expired = match self.store.expire_ongoing(now).await {
            Ok(expired) => expired,
            Err(e) => {
                tracing::warn!(error = %e, "Expiry reconciliation failed");
                return ReconcileResult::failed(e.to_string());
            }
        };

        if expired.is_empty() {
            tracing::debug!("Expiry reconciliation found no overdue todos");
            return ReconcileResult::success(Vec::new());
        }

        let ids: Vec<TodoId> = expired.iter().map(|todo| todo.id).collect();
        tracing::info!(count = ids.len(), "Marked overdue todos as failed");
        for todo in expired {
            self.notifier.publish(TodoEvent::TaskUpdated(todo));
        }
        ReconcileResult::success(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{ListenerHandle, ServerMessage};
    use crate::store::{
        InMemoryTaskStore, SqliteTaskStore, StoreError, StoreResult, TaskStore, TodoQuery,
    };
    use crate::todo::{NewTodo, Priority, Todo, TodoPatch, TodoStatus};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;
    use tokio::time::timeout;

    /// Expires in two steps with a yield in between, so overlapping passes
    /// would both see the same ongoing todos if nothing serialized them.
    #[derive(Default)]
    struct TwoStepStore {
        todos: Mutex<HashMap<TodoId, Todo>>,
    }

    #[async_trait]
    impl TaskStore for TwoStepStore {
        async fn insert(&self, todo: &Todo) -> StoreResult<()> {
            self.todos.lock().await.insert(todo.id, todo.clone());
            Ok(())
        }

        async fn get(&self, id: TodoId) -> StoreResult<Option<Todo>> {
            Ok(self.todos.lock().await.get(&id).cloned())
        }

        async fn list(&self, query: &TodoQuery) -> StoreResult<Vec<Todo>> {
            Ok(self
                .todos
                .lock()
                .await
                .values()
                .filter(|todo| query.status.map_or(true, |status| todo.status == status))
                .cloned()
                .collect())
        }

        async fn update(
            &self,
            id: TodoId,
            patch: &TodoPatch,
            now: DateTime<Utc>,
        ) -> StoreResult<Todo> {
            let mut todos = self.todos.lock().await;
            let todo = todos.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            todo.apply_patch(patch, now)?;
            Ok(todo.clone())
        }

        async fn delete(&self, id: TodoId) -> StoreResult<bool> {
            Ok(self.todos.lock().await.remove(&id).is_some())
        }

        async fn expire_ongoing(&self, now: DateTime<Utc>) -> StoreResult<Vec<Todo>> {
            let overdue: Vec<TodoId> = self
                .todos
                .lock()
                .await
                .values()
                .filter(|todo| todo.is_expired_at(now))
                .map(|todo| todo.id)
                .collect();

            tokio::task::yield_now().await;

            let mut todos = self.todos.lock().await;
            let mut expired = Vec::new();
            for id in overdue {
                if let Some(todo) = todos.get_mut(&id) {
                    todo.status = TodoStatus::Failure;
                    todo.updated_at = now.max(todo.created_at);
                    expired.push(todo.clone());
                }
            }
            Ok(expired)
        }

        fn has_atomic_expiry(&self) -> bool {
            false
        }
    }

    fn todo_due(title: &str, deadline: DateTime<Utc>) -> Todo {
        Todo::new(
            NewTodo {
                title: title.to_string(),
                description: String::new(),
                deadline,
                priority: Priority::Medium,
                tags: Vec::new(),
            },
            deadline - Duration::days(1),
        )
        .unwrap()
    }

    fn setup(store: SharedTaskStore) -> (ExpiryReconciler, Notifier) {
        let (notifier, _handle) = Notifier::spawn(Arc::clone(&store), 64);
        (ExpiryReconciler::new(store, notifier.clone()), notifier)
    }

    async fn drain(listener: &mut ListenerHandle) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(Some(message)) =
            timeout(StdDuration::from_millis(200), listener.recv()).await
        {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn test_overdue_task_fails() {
        let store: SharedTaskStore = Arc::new(InMemoryTaskStore::new());
        let (reconciler, _notifier) = setup(Arc::clone(&store));
        let now = Utc::now();
        let todo = todo_due("overdue", now - Duration::hours(1));
        store.insert(&todo).await.unwrap();

        let result = reconciler.reconcile(now).await;
        assert!(result.is_success());
        assert_eq!(result.transitioned_count, 1);
        assert_eq!(result.transitioned_task_ids, vec![todo.id]);

        let stored = store.get(todo.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TodoStatus::Failure);
        assert!(stored.updated_at >= now);
    }

    #[tokio::test]
    async fn test_sub_millisecond_overrun_fails_in_both_stores() {
        let stores: [SharedTaskStore; 2] = [
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(SqliteTaskStore::open_in_memory().unwrap()),
        ];
        let deadline = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        for store in stores {
            let (reconciler, _notifier) = setup(Arc::clone(&store));
            let todo = todo_due("just missed", deadline);
            store.insert(&todo).await.unwrap();

            assert_eq!(reconciler.reconcile(deadline).await.transitioned_count, 0);

            let now = deadline + Duration::microseconds(500);
            let result = reconciler.reconcile(now).await;
            assert_eq!(result.transitioned_task_ids, vec![todo.id]);

            let stored = store.get(todo.id).await.unwrap().unwrap();
            assert_eq!(stored.status, TodoStatus::Failure);
            assert!(stored.updated_at >= now);
        }
    }

    #[tokio::test]
    async fn test_future_deadline_is_left_alone() {
        let store: SharedTaskStore = Arc::new(InMemoryTaskStore::new());
        let (reconciler, _notifier) = setup(Arc::clone(&store));
        let now = Utc::now();
        let todo = todo_due("upcoming", now + Duration::hours(1));
        store.insert(&todo).await.unwrap();

        let result = reconciler.reconcile(now).await;
        assert_eq!(result.transitioned_count, 0);
        assert_eq!(store.get(todo.id).await.unwrap().unwrap(), todo);
    }

    #[tokio::test]
    async fn test_second_pass_is_a_no_op() {
        let store: SharedTaskStore = Arc::new(SqliteTaskStore::open_in_memory().unwrap());
        let (reconciler, _notifier) = setup(Arc::clone(&store));
        let now = Utc::now();
        for i in 1..=3 {
            store
                .insert(&todo_due(&format!("late {}", i), now - Duration::minutes(i)))
                .await
                .unwrap();
        }

        assert_eq!(reconciler.reconcile(now).await.transitioned_count, 3);
        let again = reconciler.reconcile(now + Duration::seconds(30)).await;
        assert!(again.is_success());
        assert_eq!(again.transitioned_count, 0);
    }

    #[tokio::test]
    async fn test_success_is_never_failed() {
        let store: SharedTaskStore = Arc::new(SqliteTaskStore::open_in_memory().unwrap());
        let (reconciler, _notifier) = setup(Arc::clone(&store));
        let now = Utc::now();
        let todo = todo_due("finished late", now - Duration::hours(3));
        store.insert(&todo).await.unwrap();
        store
            .update(todo.id, &TodoPatch::mark_complete(), now - Duration::hours(2))
            .await
            .unwrap();

        assert_eq!(reconciler.reconcile(now).await.transitioned_count, 0);
        assert_eq!(
            store.get(todo.id).await.unwrap().unwrap().status,
            TodoStatus::Success
        );
    }

    #[tokio::test]
    async fn test_overlapping_passes_do_not_double_count() {
        let store: SharedTaskStore = Arc::new(SqliteTaskStore::open_in_memory().unwrap());
        let (reconciler, notifier) = setup(Arc::clone(&store));
        let reconciler = Arc::new(reconciler);
        let now = Utc::now();
        for i in 1..=8 {
            store
                .insert(&todo_due(&format!("late {}", i), now - Duration::minutes(i)))
                .await
                .unwrap();
        }
        let mut listener = notifier.subscribe();

        let passes: Vec<_> = (0..4)
            .map(|_| {
                let reconciler = Arc::clone(&reconciler);
                tokio::spawn(async move { reconciler.reconcile(now).await })
            })
            .collect();
        let mut total = 0;
        for pass in passes {
            total += pass.await.unwrap().transitioned_count;
        }
        assert_eq!(total, 8);

        let failed = store
            .list(&TodoQuery::with_status(TodoStatus::Failure))
            .await
            .unwrap();
        assert_eq!(failed.len(), 8);

        let updates = drain(&mut listener)
            .await
            .into_iter()
            .filter(|m| matches!(m, ServerMessage::TaskUpdate { .. }))
            .count();
        assert_eq!(updates, 8);
    }

    #[tokio::test]
    async fn test_two_step_store_passes_are_serialized() {
        let store: SharedTaskStore = Arc::new(TwoStepStore::default());
        let (reconciler, notifier) = setup(Arc::clone(&store));
        assert!(reconciler.pass_lock.is_some());
        let reconciler = Arc::new(reconciler);
        let now = Utc::now();
        for i in 1..=8 {
            store
                .insert(&todo_due(&format!("late {}", i), now - Duration::minutes(i)))
                .await
                .unwrap();
        }
        let mut listener = notifier.subscribe();

        let passes: Vec<_> = (0..4)
            .map(|_| {
                let reconciler = Arc::clone(&reconciler);
                tokio::spawn(async move { reconciler.reconcile(now).await })
            })
            .collect();
        let mut ids = Vec::new();
        for pass in passes {
            ids.extend(pass.await.unwrap().transitioned_task_ids);
        }
        assert_eq!(ids.len(), 8);
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8);

        let updates = drain(&mut listener)
            .await
            .into_iter()
            .filter(|m| matches!(m, ServerMessage::TaskUpdate { .. }))
            .count();
        assert_eq!(updates, 8);
    }

    #[tokio::test]
    async fn test_store_failure_reports_error_and_notifies_nothing() {
        let memory = Arc::new(InMemoryTaskStore::new());
        let store: SharedTaskStore = memory.clone();
        let (reconciler, notifier) = setup(Arc::clone(&store));
        let now = Utc::now();
        store
            .insert(&todo_due("overdue", now - Duration::hours(1)))
            .await
            .unwrap();
        let mut listener = notifier.subscribe();
        assert!(matches!(
            drain(&mut listener).await.as_slice(),
            [ServerMessage::TaskList { .. }]
        ));

        memory.set_unavailable(true);
        let result = reconciler.reconcile(now).await;
        assert_eq!(result.status, ReconcileStatus::Error);
        assert_eq!(result.transitioned_count, 0);
        assert!(result.transitioned_task_ids.is_empty());
        assert!(result.error.is_some());
        assert!(drain(&mut listener).await.is_empty());

        memory.set_unavailable(false);
        assert_eq!(reconciler.reconcile(now).await.transitioned_count, 1);
    }

    #[tokio::test]
    async fn test_zero_count_pass_publishes_nothing() {
        let store: SharedTaskStore = Arc::new(InMemoryTaskStore::new());
        let (reconciler, notifier) = setup(Arc::clone(&store));
        let mut listener = notifier.subscribe();

        reconciler.reconcile(Utc::now()).await;
        let messages = drain(&mut listener).await;
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], ServerMessage::TaskList { .. }));
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let value = serde_json::to_value(ReconcileResult::success(Vec::new())).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["transitionedCount"], 0);
        assert!(value.get("error").is_none());
    }
}
