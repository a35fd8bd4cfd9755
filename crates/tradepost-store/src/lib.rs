//! # tradepost-store
//!
//! Durable storage for the marketplace messaging core, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for the user directory,
//! direct and channel messages, channels and contact lists. Callers that
//! live on an async runtime are expected to move calls onto a blocking
//! thread.

pub mod channels;
pub mod contacts;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;

#[cfg(test)]
mod testing;
