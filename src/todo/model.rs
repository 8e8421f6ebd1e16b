//! The `Todo` record and its status/priority enums.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{TodoError, TodoPatch};

/// Maximum length of a todo title, in characters.
pub const MAX_TITLE_LEN: usize = 200;

/// Maximum length of a single tag, in characters.
pub const MAX_TAG_LEN: usize = 50;

pub type TodoId = Uuid;

/// Lifecycle status of a todo.
///
/// `Success` and `Failure` are terminal: nothing moves a todo out of them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Ongoing,
    Success,
    Failure,
}

impl Default for TodoStatus {
    fn default() -> Self {
        Self::Ongoing
    }
}

impl TodoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ongoing => "ongoing",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ongoing" => Some(Self::Ongoing),
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Ongoing)
    }
}

/// Presentational priority. Never consulted by expiry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Fields a client supplies when creating a todo.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTodo {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub deadline: DateTime<Utc>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A tracked task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    pub id: TodoId,
    pub title: String,
    pub description: String,
    pub deadline: DateTime<Utc>,
    pub status: TodoStatus,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Todo {
    /// Build a new ongoing todo stamped with `now`.
    ///
    /// Timestamps are truncated to millisecond precision, which is what the
    /// stores persist.
    pub fn new(input: NewTodo, now: DateTime<Utc>) -> Result<Self, TodoError> {
        let now = truncate_to_millis(now);
        let todo = Self {
            id: Uuid::new_v4(),
            title: input.title.trim().to_string(),
            description: input.description,
            deadline: truncate_to_millis(input.deadline),
            status: TodoStatus::Ongoing,
            priority: input.priority,
            tags: input.tags,
            created_at: now,
            updated_at: now,
        };
        todo.validate()?;
        Ok(todo)
    }

    pub fn validate(&self) -> Result<(), TodoError> {
        validate_title(&self.title)?;
        validate_tags(&self.tags)?;
        if self.updated_at < self.created_at {
            return Err(TodoError::Validation(
                "updatedAt must not precede createdAt".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether expiry at `now` would move this todo to `Failure`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == TodoStatus::Ongoing && self.deadline < now
    }

    /// Apply a client edit.
    ///
    /// Status changes follow the client rules: `failure` is never accepted,
    /// and terminal statuses are never left.
    pub fn apply_patch(&mut self, patch: &TodoPatch, now: DateTime<Utc>) -> Result<(), TodoError> {
        let mut next = self.clone();

        if let Some(title) = &patch.title {
            next.title = title.trim().to_string();
        }
        if let Some(description) = &patch.description {
            next.description = description.clone();
        }
        if let Some(deadline) = patch.deadline {
            next.deadline = truncate_to_millis(deadline);
        }
        if let Some(priority) = patch.priority {
            next.priority = priority;
        }
        if let Some(tags) = &patch.tags {
            next.tags = tags.clone();
        }
        if let Some(status) = patch.status {
            next.status = client_transition(self.status, status)?;
        }

        next.updated_at = truncate_to_millis(now).max(self.created_at);
        next.validate()?;
        *self = next;
        Ok(())
    }
}

/// Resolve a client-requested status change.
pub fn client_transition(from: TodoStatus, to: TodoStatus) -> Result<TodoStatus, TodoError> {
    match (from, to) {
        (_, TodoStatus::Failure) if from != TodoStatus::Failure => {
            Err(TodoError::Validation(
                "status `failure` is assigned by deadline expiry only".to_string(),
            ))
        }
        (a, b) if a == b => Ok(a),
        (from, to) if from.is_terminal() => Err(TodoError::InvalidTransition { from, to }),
        (TodoStatus::Ongoing, TodoStatus::Success) => Ok(TodoStatus::Success),
        (from, to) => Err(TodoError::InvalidTransition { from, to }),
    }
}

fn validate_title(title: &str) -> Result<(), TodoError> {
    if title.is_empty() {
        return Err(TodoError::Validation("title cannot be empty".to_string()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(TodoError::Validation(format!(
            "title exceeds {} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(())
}

fn validate_tags(tags: &[String]) -> Result<(), TodoError> {
    for tag in tags {
        if tag.trim().is_empty() {
            return Err(TodoError::Validation("tags cannot be empty".to_string()));
        }
        if tag.chars().count() > MAX_TAG_LEN {
            return Err(TodoError::Validation(format!(
                "tag `{}` exceeds {} characters",
                tag, MAX_TAG_LEN
            )));
        }
    }
    Ok(())
}

pub(crate) fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

/// Smallest millisecond-precision instant that is not before `at`.
///
/// Stored deadlines have millisecond precision, so `deadline < at` holds
/// exactly when `deadline < ceil_to_millis(at)`.
pub(crate) fn ceil_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    let floor = truncate_to_millis(at);
    if floor == at {
        at
    } else {
        floor + Duration::milliseconds(1)
    }
}
