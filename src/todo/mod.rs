//! Todo module - the task record, its status lifecycle, and client edits.
//!
//! Status lifecycle:
//! - Every todo starts `ongoing`, whatever the client sent.
//! - `ongoing -> success` is a client action (edit or mark complete).
//! - `ongoing -> failure` happens only through deadline expiry.
//! - `success` and `failure` are terminal.

mod model;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

pub use model::{
    client_transition, NewTodo, Priority, Todo, TodoId, TodoStatus, MAX_TAG_LEN, MAX_TITLE_LEN,
};
pub(crate) use model::ceil_to_millis;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TodoError {
    #[error("{0}")]
    Validation(String),

    #[error("cannot change status from {} to {}", from.as_str(), to.as_str())]
    InvalidTransition { from: TodoStatus, to: TodoStatus },
}

/// A partial client edit. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TodoPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub status: Option<TodoStatus>,
    pub priority: Option<Priority>,
    pub tags: Option<Vec<String>>,
}

impl TodoPatch {
    /// The edit applied by "mark complete".
    pub fn mark_complete() -> Self {
        Self {
            status: Some(TodoStatus::Success),
            ..Self::default()
        }
    }
}
