//! Core types and trait definitions for the KES business-document backend.
//!
//! Holds the status-tracking capability, the append-only change log types,
//! the reference generator and the post-commit cascade rules. No database
//! code lives here; storage backends implement [`store::TrackingStore`].

// Backends implement the store trait with plain `async fn`.
#![allow(async_fn_in_trait)]

pub mod cascade;
pub mod change;
pub mod document;
pub mod error;
pub mod followup;
pub mod party;
pub mod reference;
pub mod status;
pub mod store;
pub mod subject;
pub mod tracking;
pub mod workflow;

pub use error::{Error, Result};
