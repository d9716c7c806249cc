//! Error type for `kes-store-sqlite`.

use kes_core::subject::SubjectRef;
use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] kes_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// The subject has no tracking row.
  #[error("subject not found: {0}")]
  SubjectNotFound(SubjectRef),

  #[error("{what} not found: {id}")]
  NotFound { what: &'static str, id: i64 },

  #[error("{what} {id} still has dependent documents")]
  HasDependents { what: &'static str, id: i64 },

  /// Another document already holds the reference just minted. The insert
  /// was rolled back and may be retried.
  #[error("reference {reference:?} is already taken")]
  DuplicateReference { reference: String },

  #[error("{0} already has a creation record")]
  DuplicateCreationRecord(SubjectRef),

  /// Writing a validated transition failed; neither the status nor the log
  /// was changed.
  #[error("failed to persist status change of {subject}: {source}")]
  TransitionPersistence {
    subject: SubjectRef,
    #[source]
    source:  Box<Error>,
  },
}

impl From<rusqlite::Error> for Error {
  fn from(e: rusqlite::Error) -> Self { Self::Database(e.into()) }
}

impl Error {
  /// Whether repeating the same call may succeed.
  pub fn is_retryable(&self) -> bool {
    match self {
      Self::DuplicateReference { .. } => true,
      Self::TransitionPersistence { source, .. } => source.is_retryable(),
      Self::Database(tokio_rusqlite::Error::Rusqlite(
        rusqlite::Error::SqliteFailure(f, _),
      )) => matches!(f.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked),
      _ => false,
    }
  }

  /// Whether the error comes from bad input rather than from storage.
  pub fn is_validation(&self) -> bool {
    match self {
      Self::Core(e) => e.is_validation(),
      Self::SubjectNotFound(_)
      | Self::NotFound { .. }
      | Self::HasDependents { .. }
      | Self::DuplicateCreationRecord(_) => true,
      _ => false,
    }
  }
}

/// Whether `e` is a UNIQUE violation on a column named `column`.
pub(crate) fn is_unique_violation(e: &rusqlite::Error, column: &str) -> bool {
  match e {
    rusqlite::Error::SqliteFailure(f, msg) => {
      f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        && msg
          .as_deref()
          .is_some_and(|m| m.ends_with(&format!(".{column}")))
    }
    _ => false,
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
