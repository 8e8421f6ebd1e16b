//! SQLite-backed task store.
//!
//! # Invariants
//! - Timestamps are stored as Unix milliseconds (UTC).
//! - Schema version is mirrored to `PRAGMA user_version`.
//! - Expiry is one `UPDATE ... RETURNING` statement; there is no read-then-write window.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};

use super::{StoreError, StoreResult, TaskStore, TodoQuery};
use crate::todo::{ceil_to_millis, Priority, Todo, TodoId, TodoPatch, TodoStatus};

const TODO_COLUMNS: &str =
    "id, title, description, deadline, status, priority, tags, created_at, updated_at";

struct Migration {
    version: u32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: "CREATE TABLE IF NOT EXISTS todos (
            id          TEXT PRIMARY KEY NOT NULL,
            title       TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            deadline    INTEGER NOT NULL,
            status      TEXT NOT NULL DEFAULT 'ongoing'
                        CHECK (status IN ('ongoing', 'success', 'failure')),
            priority    TEXT NOT NULL DEFAULT 'medium'
                        CHECK (priority IN ('low', 'medium', 'high')),
            tags        TEXT NOT NULL DEFAULT '[]',
            created_at  INTEGER NOT NULL,
            updated_at  INTEGER NOT NULL
          );
          CREATE INDEX IF NOT EXISTS idx_todos_status_deadline ON todos (status, deadline);
          CREATE INDEX IF NOT EXISTS idx_todos_created_at ON todos (created_at);",
}];

/// SQLite task store. The connection is shared behind a mutex and every
/// statement runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskStore {
    /// Open (or create) a database file and apply pending migrations.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("{}: {}", parent.display(), e)))?;
        }
        let started_at = Instant::now();
        let conn = Connection::open(path)?;
        let store = Self::bootstrap(conn)?;
        tracing::debug!(
            path = %path.display(),
            duration_ms = started_at.elapsed().as_millis() as u64,
            "SQLite task store ready"
        );
        Ok(store)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(mut conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        apply_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))?;
            f(&mut *guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {}", e)))?
    }
}

fn apply_migrations(conn: &mut Connection) -> StoreResult<()> {
    let current: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let latest = MIGRATIONS.last().map_or(0, |m| m.version);

    if current > latest {
        return Err(StoreError::InvalidData(format!(
            "database schema version {} is newer than supported {}",
            current, latest
        )));
    }
    if current == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        tx.execute_batch(migration.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
    }
    tx.commit()?;
    tracing::info!(from = current, to = latest, "Applied task store migrations");
    Ok(())
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn insert(&self, todo: &Todo) -> StoreResult<()> {
        todo.validate()?;
        let todo = todo.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO todos (
                    id, title, description, deadline, status, priority, tags, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
                params![
                    todo.id.to_string(),
                    todo.title,
                    todo.description,
                    todo.deadline.timestamp_millis(),
                    todo.status.as_str(),
                    todo.priority.as_str(),
                    tags_to_db(&todo.tags)?,
                    todo.created_at.timestamp_millis(),
                    todo.updated_at.timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get(&self, id: TodoId) -> StoreResult<Option<Todo>> {
        self.with_conn(move |conn| select_by_id(conn, id)).await
    }

    async fn list(&self, query: &TodoQuery) -> StoreResult<Vec<Todo>> {
        let query = query.clone();
        self.with_conn(move |conn| {
            let mut sql = format!("SELECT {} FROM todos WHERE 1 = 1", TODO_COLUMNS);
            let mut bind_values: Vec<Value> = Vec::new();

            if let Some(status) = query.status {
                sql.push_str(" AND status = ?");
                bind_values.push(Value::Text(status.as_str().to_string()));
            }

            sql.push_str(" ORDER BY created_at DESC, id ASC");

            match query.effective_limit() {
                Some(limit) => {
                    sql.push_str(" LIMIT ? OFFSET ?");
                    bind_values.push(Value::Integer(i64::from(limit)));
                    bind_values.push(Value::Integer(i64::from(query.offset)));
                }
                None if query.offset > 0 => {
                    sql.push_str(" LIMIT -1 OFFSET ?");
                    bind_values.push(Value::Integer(i64::from(query.offset)));
                }
                None => {}
            }

            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(bind_values))?;
            let mut todos = Vec::new();
            while let Some(row) = rows.next()? {
                todos.push(parse_todo_row(row)?);
            }
            Ok(todos)
        })
        .await
    }

    async fn update(&self, id: TodoId, patch: &TodoPatch, now: DateTime<Utc>) -> StoreResult<Todo> {
        let patch = patch.clone();
        self.with_conn(move |conn| {
            // IMMEDIATE takes the write lock up front, so an expiry statement
            // from another connection cannot slip between the read and the write.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut todo = select_by_id(&tx, id)?.ok_or(StoreError::NotFound(id))?;
            todo.apply_patch(&patch, now)?;

            tx.execute(
                "UPDATE todos
                 SET title = ?1,
                     description = ?2,
                     deadline = ?3,
                     status = ?4,
                     priority = ?5,
                     tags = ?6,
                     updated_at = ?7
                 WHERE id = ?8;",
                params![
                    todo.title,
                    todo.description,
                    todo.deadline.timestamp_millis(),
                    todo.status.as_str(),
                    todo.priority.as_str(),
                    tags_to_db(&todo.tags)?,
                    todo.updated_at.timestamp_millis(),
                    todo.id.to_string(),
                ],
            )?;
            tx.commit()?;
            Ok(todo)
        })
        .await
    }

    async fn delete(&self, id: TodoId) -> StoreResult<bool> {
        self.with_conn(move |conn| {
            let changed = conn.execute("DELETE FROM todos WHERE id = ?1;", [id.to_string()])?;
            Ok(changed > 0)
        })
        .await
    }

    async fn expire_ongoing(&self, now: DateTime<Utc>) -> StoreResult<Vec<Todo>> {
        // Deadlines are whole milliseconds, so comparing against the rounded-up
        // instant is exact, and stamping it keeps `updated_at >= now`.
        let now_ms = ceil_to_millis(now).timestamp_millis();
        self.with_conn(move |conn| {
            let sql = format!(
                "UPDATE todos
                 SET status = 'failure',
                     updated_at = MAX(created_at, ?1)
                 WHERE status = 'ongoing' AND deadline < ?1
                 RETURNING {};",
                TODO_COLUMNS
            );
            // SQLite applies the whole update on the first step. Dropping the
            // transaction on a row parse error rolls it back, so the caller's
            // result always matches what was persisted.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut expired = {
                let mut stmt = tx.prepare(&sql)?;
                let mut rows = stmt.query(params![now_ms])?;
                let mut expired = Vec::new();
                while let Some(row) = rows.next()? {
                    expired.push(parse_todo_row(row)?);
                }
                expired
            };
            tx.commit()?;
            expired.sort_by(|a, b| a.deadline.cmp(&b.deadline).then(a.id.cmp(&b.id)));
            Ok(expired)
        })
        .await
    }
}

fn select_by_id(conn: &Connection, id: TodoId) -> StoreResult<Option<Todo>> {
    let sql = format!("SELECT {} FROM todos WHERE id = ?1;", TODO_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt
        .query_row([id.to_string()], |row| Ok(parse_todo_row(row)))
        .optional()?;
    row.transpose()
}

fn parse_todo_row(row: &Row<'_>) -> StoreResult<Todo> {
    let id_text: String = row.get("id")?;
    let id = TodoId::parse_str(&id_text)
        .map_err(|_| StoreError::InvalidData(format!("invalid id `{}` in todos.id", id_text)))?;

    let status_text: String = row.get("status")?;
    let status = TodoStatus::parse(&status_text).ok_or_else(|| {
        StoreError::InvalidData(format!("invalid status `{}` in todos.status", status_text))
    })?;

    let priority_text: String = row.get("priority")?;
    let priority = Priority::parse(&priority_text).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "invalid priority `{}` in todos.priority",
            priority_text
        ))
    })?;

    let tags_text: String = row.get("tags")?;
    let tags: Vec<String> = serde_json::from_str(&tags_text)
        .map_err(|e| StoreError::InvalidData(format!("invalid tags in todos.tags: {}", e)))?;

    Ok(Todo {
        id,
        title: row.get("title")?,
        description: row.get("description")?,
        deadline: millis_to_datetime(row.get("deadline")?, "deadline")?,
        status,
        priority,
        tags,
        created_at: millis_to_datetime(row.get("created_at")?, "created_at")?,
        updated_at: millis_to_datetime(row.get("updated_at")?, "updated_at")?,
    })
}

fn millis_to_datetime(millis: i64, column: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        StoreError::InvalidData(format!("timestamp {} out of range in todos.{}", millis, column))
    })
}

fn tags_to_db(tags: &[String]) -> StoreResult<String> {
    serde_json::to_string(tags).map_err(|e| StoreError::InvalidData(e.to_string()))
}
