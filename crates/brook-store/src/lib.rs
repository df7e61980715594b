//! # brook-store
//!
//! Persistence layer for the Brook messaging server, backed by SQLite.
//!
//! The crate exposes a synchronous [`Store`] handle that wraps a
//! `rusqlite::Connection` and provides typed operations for every domain
//! model: users, topics, subscriptions, messages with their deletion log,
//! credentials, devices and file uploads.  Soft deletion, opaque identifiers
//! and per-user message visibility follow the semantics of the service layer
//! above it.

pub mod config;
pub mod credentials;
pub mod devices;
pub mod files;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod store;
pub mod subscriptions;
pub mod topics;
pub mod users;

mod error;
mod tags;

#[cfg(test)]
mod testutil;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use models::*;
pub use store::Store;
pub use subscriptions::SubUpdate;
pub use topics::TopicUpdate;
pub use users::UserUpdate;
