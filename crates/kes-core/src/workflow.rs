//! Status changes with their cascades.

use serde::Serialize;
use tracing::debug;

use crate::{
  cascade::{self, CascadeReport},
  change::{StatusChangeRecord, StatusChangeRequest},
  store::TrackingStore,
  subject::SubjectRef,
};

#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
  /// The appended change record, `None` for a no-op.
  pub record:  Option<StatusChangeRecord>,
  pub cascade: CascadeReport,
}

impl TransitionOutcome {
  pub fn changed(&self) -> bool { self.record.is_some() }
}

/// Move `subject` to a new status, then run the cascades the transition
/// triggers.
///
/// The transition is committed before any cascade runs; cascade failures are
/// reported in the outcome and never turn a committed transition into an
/// error.
pub async fn change_status<S: TrackingStore>(
  store: &S,
  subject: SubjectRef,
  request: StatusChangeRequest,
) -> Result<TransitionOutcome, S::Error> {
  let Some(record) = store.set_status(subject, request).await? else {
    debug!(%subject, "status unchanged; nothing recorded");
    return Ok(TransitionOutcome {
      record:  None,
      cascade: CascadeReport::default(),
    });
  };

  let cascade = cascade::dispatch(store, &record).await;
  Ok(TransitionOutcome { record: Some(record), cascade })
}

/// Re-run the cascades of an already committed record, e.g. after a cascade
/// failure has been fixed.
pub async fn replay_cascades<S: TrackingStore>(
  store: &S,
  record: &StatusChangeRecord,
) -> CascadeReport {
  cascade::dispatch(store, record).await
}
