//! SQLite backend for the KES tracking store.
//!
//! Statements run on the [`tokio_rusqlite`] connection thread. Every
//! read-then-write runs in an IMMEDIATE transaction.

mod documents;
mod encode;
mod schema;
mod sequence;
mod store;
mod tracking;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
