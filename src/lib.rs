//! # Todo Tracker
//!
//! A task-tracking service whose todos fail automatically once their deadline
//! passes, with changes pushed to connected clients in real time.
//!
//! This library provides:
//! - An HTTP API for creating, editing and completing todos
//! - An expiry reconciler that moves overdue `ongoing` todos to `failure`
//! - A change notifier that fans updates out over WebSocket
//!
//! ## Architecture
//!
//! ```text
//!   request interceptor   status lists   periodic loop
//!            │                 │               │
//!            └────────┬────────┴───────────────┘
//!                     ▼ reconcile(now)
//!            ┌──────────────────┐   expire_ongoing   ┌────────────┐
//!            │ ExpiryReconciler │ ─────────────────▶ │ TaskStore  │
//!            └────────┬─────────┘                    └─────▲──────┘
//!                     │ task_updated                       │ CRUD
//!                     ▼                                    │
//!            ┌──────────────────┐                    ┌─────┴──────┐
//!            │     Notifier     │ ◀── publish ────── │  HTTP API  │
//!            └────────┬─────────┘                    └────────────┘
//!                     ▼
//!             WebSocket listeners
//! ```
//!
//! ## Modules
//! - `todo`: the record, its status lifecycle and client edits
//! - `store`: SQLite and in-memory task stores
//! - `reconcile`: expiry passes and their triggers
//! - `notify`: real-time fan-out and its wire messages
//! - `analytics`: read-only reports
//! - `api`: HTTP routes, interceptor and WebSocket channel

pub mod analytics;
pub mod api;
pub mod config;
pub mod notify;
pub mod reconcile;
pub mod store;
pub mod todo;

pub use config::Config;
pub use reconcile::{ExpiryReconciler, ReconcileResult};
