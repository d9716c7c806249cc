//! Error types for `kes-core`.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::subject::SubjectType;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid status {status:?} for {subject_type}; allowed: {}", allowed.join(", "))]
  InvalidStatus {
    subject_type: SubjectType,
    status:       String,
    allowed:      &'static [&'static str],
  },

  #[error("effective date {at} is in the future")]
  EffectiveDateInFuture { at: DateTime<Utc> },

  #[error("effective date {at} precedes creation at {created_at}")]
  EffectiveDateBeforeCreation {
    at:         DateTime<Utc>,
    created_at: DateTime<Utc>,
  },

  #[error("unknown subject type: {0:?}")]
  UnknownSubjectType(String),

  #[error("malformed subject reference {0:?}; expected `<type>:<id>`")]
  InvalidSubjectRef(String),

  #[error("opportunity in status {status} cannot be converted to an offer")]
  ConversionNotAllowed { status: String },

  #[error("invoice {0} is cancelled and cannot take payments")]
  InvoiceCancelled(i64),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Whether the error is the caller's fault (a client error at the API
  /// layer) rather than a storage failure.
  pub fn is_validation(&self) -> bool { !matches!(self, Self::Serialization(_)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
