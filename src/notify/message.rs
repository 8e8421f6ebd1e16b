//! Wire messages of the real-time channel.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::todo::{Todo, TodoId};

/// A change the notifier fans out.
#[derive(Debug, Clone, PartialEq)]
pub enum TodoEvent {
    TaskList(Vec<Todo>),
    TaskCreated(Todo),
    TaskUpdated(Todo),
    TaskDeleted(TodoId),
}

/// Server -> client message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    TaskList { todos: Vec<Todo> },
    TaskCreate { todo: Todo },
    TaskUpdate { todo: Todo },
    TaskDelete { todo_id: TodoId },
    Error { message: String },
}

impl From<TodoEvent> for ServerMessage {
    fn from(event: TodoEvent) -> Self {
        match event {
            TodoEvent::TaskList(todos) => Self::TaskList { todos },
            TodoEvent::TaskCreated(todo) => Self::TaskCreate { todo },
            TodoEvent::TaskUpdated(todo) => Self::TaskUpdate { todo },
            TodoEvent::TaskDeleted(todo_id) => Self::TaskDelete { todo_id },
        }
    }
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"type":"error","message":"failed to encode message: {}"}}"#,
                e
            )
        })
    }
}

/// Client -> server message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    RequestTodos,
}

#[derive(Debug, Error)]
#[error("malformed message: {0}")]
pub struct MessageError(#[from] serde_json::Error);

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        Ok(serde_json::from_str(text)?)
    }
}
