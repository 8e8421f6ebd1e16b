//! Change notifier - fans todo changes out to real-time listeners.
//!
//! A single dispatcher task owns the listener registry and processes commands
//! in the order they were sent. That gives every listener the same event order
//! as the `publish` calls, and puts a listener's `task_list` snapshot ahead of
//! any live event it sees.
//!
//! A listener whose queue is full is waited on for up to the send timeout, so a
//! reader that keeps draining still gets every event. Only a closed queue or a
//! listener that stays full for the whole timeout is dropped.
//!
//! The dispatcher also remembers the latest revision it announced per todo and
//! skips updates older than it, so an edit that loses a race with expiry never
//! reaches listeners after the `failure` it was overtaken by.
//!
//! ```text
//!   publish / subscribe / unsubscribe
//!                 │ (unbounded, never blocks)
//!                 ▼
//!        ┌─────────────────┐   snapshot reads   ┌────────────┐
//!        │   dispatcher    │ ─────────────────▶ │ TaskStore  │
//!        └────────┬────────┘                    └────────────┘
//!                 │ try_send per listener (bounded)
//!        ┌────────┼────────┐
//!        ▼        ▼        ▼
//!     listener listener listener
//! ```

mod message;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::store::{SharedTaskStore, TodoQuery};
use crate::todo::{Todo, TodoId, TodoStatus};

pub use message::{ClientMessage, MessageError, ServerMessage, TodoEvent};

pub type ListenerId = u64;

/// How long the dispatcher waits on a full listener queue before giving up on it.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

enum Command {
    Subscribe {
        id: ListenerId,
        tx: mpsc::Sender<ServerMessage>,
    },
    Unsubscribe(ListenerId),
    Publish(TodoEvent),
    Snapshot(ListenerId),
    Count(oneshot::Sender<usize>),
}

/// Handle to the notifier. Cheap to clone; all clones feed one dispatcher.
#[derive(Clone)]
pub struct Notifier {
    cmd_tx: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
    buffer: usize,
}

/// A subscribed listener's end of the channel.
pub struct ListenerHandle {
    id: ListenerId,
    rx: mpsc::Receiver<ServerMessage>,
}

impl ListenerHandle {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Next message for this listener. `None` once the listener has been
    /// removed or the notifier has shut down.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.rx.recv().await
    }
}

impl Notifier {
    /// Start the dispatcher task with [`DEFAULT_SEND_TIMEOUT`]. `buffer` is the
    /// per-listener queue capacity.
    pub fn spawn(store: SharedTaskStore, buffer: usize) -> (Self, JoinHandle<()>) {
        Self::spawn_with_send_timeout(store, buffer, DEFAULT_SEND_TIMEOUT)
    }

    /// Start the dispatcher task. A listener whose queue stays full for
    /// `send_timeout` is treated as unreachable and dropped.
    pub fn spawn_with_send_timeout(
        store: SharedTaskStore,
        buffer: usize,
        send_timeout: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_dispatcher(store, cmd_rx, send_timeout));
        let notifier = Self {
            cmd_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            buffer: buffer.max(1),
        };
        (notifier, handle)
    }

    /// Broadcast an event to every current listener. Never blocks and never fails.
    pub fn publish(&self, event: TodoEvent) {
        if self.cmd_tx.send(Command::Publish(event)).is_err() {
            tracing::debug!("Notifier dispatcher stopped; dropping event");
        }
    }

    /// Register a listener. Its first message is always a `task_list` snapshot
    /// (or an `error` if the snapshot could not be read).
    pub fn subscribe(&self) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        if self.cmd_tx.send(Command::Subscribe { id, tx }).is_err() {
            tracing::debug!(listener = id, "Notifier dispatcher stopped; listener will see no events");
        }
        ListenerHandle { id, rx }
    }

    /// Remove a listener. Safe to call repeatedly or for unknown ids.
    pub fn unsubscribe(&self, id: ListenerId) {
        let _ = self.cmd_tx.send(Command::Unsubscribe(id));
    }

    /// Queue a fresh `task_list` snapshot for one listener, in order with its
    /// other events.
    pub fn request_snapshot(&self, id: ListenerId) {
        let _ = self.cmd_tx.send(Command::Snapshot(id));
    }

    /// Number of registered listeners, as seen by the dispatcher once every
    /// previously sent command has been processed.
    pub async fn listener_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Count(tx)).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

async fn run_dispatcher(
    store: SharedTaskStore,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    send_timeout: Duration,
) {
    let mut listeners: BTreeMap<ListenerId, mpsc::Sender<ServerMessage>> = BTreeMap::new();
    let mut revisions = Revisions::default();

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            Command::Subscribe { id, tx } => {
                let snapshot = snapshot_message(&store).await;
                if deliver(id, &tx, snapshot, send_timeout).await {
                    listeners.insert(id, tx);
                    tracing::debug!(listener = id, total = listeners.len(), "Listener subscribed");
                }
            }
            Command::Unsubscribe(id) => {
                if listeners.remove(&id).is_some() {
                    tracing::debug!(listener = id, total = listeners.len(), "Listener unsubscribed");
                }
            }
            Command::Publish(event) => {
                if !revisions.accept(&event) {
                    tracing::debug!("Skipping superseded todo update");
                    continue;
                }
                let message = ServerMessage::from(event);
                let mut unreachable = Vec::new();
                for (id, tx) in &listeners {
                    if !deliver(*id, tx, message.clone(), send_timeout).await {
                        unreachable.push(*id);
                    }
                }
                for id in unreachable {
                    listeners.remove(&id);
                }
            }
            Command::Snapshot(id) => {
                if let Some(tx) = listeners.get(&id) {
                    let snapshot = snapshot_message(&store).await;
                    if !deliver(id, tx, snapshot, send_timeout).await {
                        listeners.remove(&id);
                    }
                }
            }
            Command::Count(reply) => {
                let _ = reply.send(listeners.len());
            }
        }
    }

    tracing::debug!("Notifier dispatcher stopped");
}

/// Latest announced `(updated_at, status)` per todo.
#[derive(Default)]
struct Revisions {
    latest: HashMap<TodoId, (DateTime<Utc>, TodoStatus)>,
}

impl Revisions {
    /// Record `event` and return whether it should be broadcast. An update is
    /// superseded when it is older than the last one announced, or when it
    /// would show a non-terminal status after a terminal one.
    fn accept(&mut self, event: &TodoEvent) -> bool {
        match event {
            TodoEvent::TaskCreated(todo) | TodoEvent::TaskUpdated(todo) => {
                if self.is_superseded(todo) {
                    return false;
                }
                self.latest.insert(todo.id, (todo.updated_at, todo.status));
                true
            }
            TodoEvent::TaskDeleted(id) => {
                self.latest.remove(id);
                true
            }
            TodoEvent::TaskList(_) => true,
        }
    }

    fn is_superseded(&self, todo: &Todo) -> bool {
        match self.latest.get(&todo.id) {
            Some((updated_at, status)) => {
                todo.updated_at < *updated_at
                    || (status.is_terminal() && !todo.status.is_terminal())
            }
            None => false,
        }
    }
}

async fn snapshot_message(store: &SharedTaskStore) -> ServerMessage {
    match store.list(&TodoQuery::default()).await {
        Ok(todos) => ServerMessage::TaskList { todos },
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read todo snapshot");
            ServerMessage::error("Failed to load todos")
        }
    }
}

/// Returns false when the listener is unreachable and should be dropped.
async fn deliver(
    id: ListenerId,
    tx: &mpsc::Sender<ServerMessage>,
    message: ServerMessage,
    send_timeout: Duration,
) -> bool {
    match tx.try_send(message) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(message)) => {
            match tokio::time::timeout(send_timeout, tx.send(message)).await {
                Ok(Ok(())) => true,
                Ok(Err(_)) => {
                    tracing::debug!(listener = id, "Listener disconnected; dropping listener");
                    false
                }
                Err(_) => {
                    tracing::warn!(
                        listener = id,
                        timeout_ms = send_timeout.as_millis() as u64,
                        "Listener stalled with a full queue; dropping listener"
                    );
                    false
                }
            }
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            tracing::debug!(listener = id, "Listener disconnected; dropping listener");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryTaskStore, TaskStore};
    use crate::todo::{NewTodo, Priority};
    use chrono::Duration;
    use std::time::Duration as StdDuration;
    use tokio::time::timeout;

    fn sample(title: &str) -> Todo {
        let now = Utc::now();
        Todo::new(
            NewTodo {
                title: title.to_string(),
                description: String::new(),
                deadline: now + Duration::hours(1),
                priority: Priority::Medium,
                tags: Vec::new(),
            },
            now,
        )
        .unwrap()
    }

    async fn next(listener: &mut ListenerHandle) -> ServerMessage {
        timeout(StdDuration::from_secs(2), listener.recv())
            .await
            .expect("timed out waiting for message")
            .expect("listener channel closed")
    }

    #[tokio::test]
    async fn test_snapshot_arrives_before_live_events() {
        let store = Arc::new(InMemoryTaskStore::new());
        let existing = sample("existing");
        store.insert(&existing).await.unwrap();
        let (notifier, _handle) = Notifier::spawn(store.clone(), 16);

        let mut listener = notifier.subscribe();
        let created = sample("created");
        notifier.publish(TodoEvent::TaskCreated(created.clone()));

        match next(&mut listener).await {
            ServerMessage::TaskList { todos } => {
                assert_eq!(todos.len(), 1);
                assert_eq!(todos[0].id, existing.id);
            }
            other => panic!("expected task_list first, got {:?}", other),
        }
        assert_eq!(
            next(&mut listener).await,
            ServerMessage::TaskCreate { todo: created }
        );
    }

    #[tokio::test]
    async fn test_events_arrive_in_publish_order() {
        let store = Arc::new(InMemoryTaskStore::new());
        let (notifier, _handle) = Notifier::spawn(store, 64);
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();

        let todos: Vec<Todo> = (0..10).map(|i| sample(&format!("t{}", i))).collect();
        for todo in &todos {
            notifier.publish(TodoEvent::TaskUpdated(todo.clone()));
        }
        notifier.publish(TodoEvent::TaskDeleted(todos[0].id));

        for listener in [&mut first, &mut second] {
            assert!(matches!(next(listener).await, ServerMessage::TaskList { .. }));
            for todo in &todos {
                assert_eq!(
                    next(listener).await,
                    ServerMessage::TaskUpdate { todo: todo.clone() }
                );
            }
            assert_eq!(
                next(listener).await,
                ServerMessage::TaskDelete {
                    todo_id: todos[0].id
                }
            );
        }
    }

    #[tokio::test]
    async fn test_unsubscribed_listener_receives_nothing() {
        let store = Arc::new(InMemoryTaskStore::new());
        let (notifier, _handle) = Notifier::spawn(store, 16);
        let mut listener = notifier.subscribe();
        assert!(matches!(next(&mut listener).await, ServerMessage::TaskList { .. }));

        notifier.unsubscribe(listener.id());
        notifier.unsubscribe(listener.id());
        notifier.publish(TodoEvent::TaskCreated(sample("after")));

        assert_eq!(notifier.listener_count().await, 0);
        // The dispatcher dropped its sender, so the channel is closed and empty.
        assert_eq!(listener.recv().await, None);
    }

    #[tokio::test]
    async fn test_dropped_listener_is_pruned_without_affecting_others() {
        let store = Arc::new(InMemoryTaskStore::new());
        let (notifier, _handle) = Notifier::spawn(store, 16);
        let gone = notifier.subscribe();
        let mut alive = notifier.subscribe();
        assert_eq!(notifier.listener_count().await, 2);

        drop(gone);
        let todo = sample("still delivered");
        notifier.publish(TodoEvent::TaskCreated(todo.clone()));

        assert!(matches!(next(&mut alive).await, ServerMessage::TaskList { .. }));
        assert_eq!(next(&mut alive).await, ServerMessage::TaskCreate { todo });
        assert_eq!(notifier.listener_count().await, 1);
    }

    #[tokio::test]
    async fn test_stalled_listener_is_dropped_after_send_timeout() {
        let store = Arc::new(InMemoryTaskStore::new());
        let (notifier, _handle) =
            Notifier::spawn_with_send_timeout(store, 2, StdDuration::from_millis(50));
        let mut stalled = notifier.subscribe();
        let mut fast = notifier.subscribe();

        // Drain the fast listener as events arrive; never read the stalled one.
        assert!(matches!(next(&mut fast).await, ServerMessage::TaskList { .. }));
        for i in 0..3 {
            notifier.publish(TodoEvent::TaskCreated(sample(&format!("e{}", i))));
            assert!(matches!(next(&mut fast).await, ServerMessage::TaskCreate { .. }));
        }

        assert_eq!(notifier.listener_count().await, 1);
        // The stalled listener keeps what was queued, then sees the channel close.
        assert!(matches!(stalled.recv().await, Some(ServerMessage::TaskList { .. })));
        assert!(matches!(stalled.recv().await, Some(ServerMessage::TaskCreate { .. })));
        assert_eq!(stalled.recv().await, None);
    }

    #[tokio::test]
    async fn test_slow_reader_receives_every_event_of_a_burst() {
        let store = Arc::new(InMemoryTaskStore::new());
        let (notifier, _handle) = Notifier::spawn(store, 16);
        let mut listener = notifier.subscribe();

        let reader = tokio::spawn(async move {
            let mut received = Vec::new();
            while received.len() < 101 {
                match timeout(StdDuration::from_secs(5), listener.recv()).await {
                    Ok(Some(message)) => received.push(message),
                    _ => break,
                }
                tokio::time::sleep(StdDuration::from_millis(1)).await;
            }
            received
        });

        let todos: Vec<Todo> = (0..100).map(|i| sample(&format!("burst {}", i))).collect();
        for todo in &todos {
            notifier.publish(TodoEvent::TaskUpdated(todo.clone()));
        }

        let received = reader.await.unwrap();
        assert_eq!(received.len(), 101);
        assert!(matches!(received[0], ServerMessage::TaskList { .. }));
        for (message, todo) in received[1..].iter().zip(&todos) {
            assert_eq!(message, &ServerMessage::TaskUpdate { todo: todo.clone() });
        }
        assert_eq!(notifier.listener_count().await, 1);
    }

    #[tokio::test]
    async fn test_superseded_update_is_not_broadcast() {
        let store = Arc::new(InMemoryTaskStore::new());
        let (notifier, _handle) = Notifier::spawn(store, 16);
        let mut listener = notifier.subscribe();

        let edited = sample("edited before expiry");
        let mut failed = edited.clone();
        failed.status = TodoStatus::Failure;
        failed.updated_at = edited.updated_at + Duration::milliseconds(5);
        let mut same_instant = edited.clone();
        same_instant.updated_at = failed.updated_at;

        notifier.publish(TodoEvent::TaskUpdated(failed.clone()));
        // Both arrive after the failure they lost to.
        notifier.publish(TodoEvent::TaskUpdated(edited.clone()));
        notifier.publish(TodoEvent::TaskUpdated(same_instant));
        notifier.publish(TodoEvent::TaskDeleted(edited.id));

        assert!(matches!(next(&mut listener).await, ServerMessage::TaskList { .. }));
        assert_eq!(next(&mut listener).await, ServerMessage::TaskUpdate { todo: failed });
        assert_eq!(
            next(&mut listener).await,
            ServerMessage::TaskDelete { todo_id: edited.id }
        );
    }

    #[tokio::test]
    async fn test_snapshot_failure_sends_error_first() {
        let store = Arc::new(InMemoryTaskStore::new());
        store.set_unavailable(true);
        let (notifier, _handle) = Notifier::spawn(store.clone(), 16);

        let mut listener = notifier.subscribe();
        assert!(matches!(next(&mut listener).await, ServerMessage::Error { .. }));

        store.set_unavailable(false);
        notifier.request_snapshot(listener.id());
        assert!(matches!(next(&mut listener).await, ServerMessage::TaskList { .. }));
    }
}
