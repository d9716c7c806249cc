//! Status change records, the append-only audit trail.
//!
//! One record is written for every transition a tracked subject goes through,
//! including the creation record whose `previous_status` is empty. Records are
//! never updated or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
  Result,
  status::TrackedStatus,
  subject::{SubjectRef, SubjectType, UserId},
};

/// Free-form, JSON-safe context attached to a record.
pub type Metadata = serde_json::Map<String, Value>;

/// Metadata key holding the backdated effective timestamp (RFC 3339).
pub const EFFECTIVE_AT_KEY: &str = "effective_at";

/// Comment written on the creation record.
pub const CREATION_COMMENT: &str = "created";

// ─── Persisted record ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChangeRecord {
  pub change_id:       i64,
  pub subject:         SubjectRef,
  /// Empty for the creation record.
  pub previous_status: String,
  pub new_status:      String,
  /// Server-assigned wall-clock time of the write.
  pub changed_at:      DateTime<Utc>,
  /// `None` for system changes, or once the acting user has been deleted.
  pub actor:           Option<UserId>,
  pub comment:         String,
  pub metadata:        Metadata,
}

impl StatusChangeRecord {
  pub fn is_creation(&self) -> bool { self.previous_status.is_empty() }

  pub fn metadata_value(&self, key: &str) -> Option<&Value> {
    self.metadata.get(key)
  }

  /// The logical time of the transition when it was backdated; `None` if it
  /// was not, or if the stored value does not parse.
  pub fn effective_at(&self) -> Option<DateTime<Utc>> {
    self
      .metadata_value(EFFECTIVE_AT_KEY)
      .and_then(Value::as_str)
      .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
      .map(|dt| dt.with_timezone(&Utc))
  }
}

// ─── Write-side input ────────────────────────────────────────────────────────

/// Input to [`crate::store::TrackingStore::record_change`].
/// `change_id` and `changed_at` are always assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStatusChange {
  pub subject:         SubjectRef,
  pub previous_status: String,
  pub new_status:      String,
  pub actor:           Option<UserId>,
  pub comment:         String,
  pub metadata:        Metadata,
}

impl NewStatusChange {
  /// The record written alongside a freshly created subject.
  pub fn creation(subject: SubjectRef, actor: Option<UserId>) -> Self {
    Self {
      subject,
      previous_status: String::new(),
      new_status: subject.subject_type.initial_status().to_owned(),
      actor,
      comment: CREATION_COMMENT.to_owned(),
      metadata: Metadata::new(),
    }
  }
}

// ─── Transition request ──────────────────────────────────────────────────────

/// Arguments of a `set_status` call.
#[derive(Debug, Clone, Default)]
pub struct StatusChangeRequest {
  pub new_status:   String,
  pub actor:        Option<UserId>,
  /// Logical time to attribute to the transition, if not "now".
  pub effective_at: Option<DateTime<Utc>>,
  pub comment:      String,
  pub metadata:     Metadata,
}

impl StatusChangeRequest {
  /// Convenience constructor with all optional fields set to their defaults.
  pub fn new(new_status: impl Into<String>) -> Self {
    Self { new_status: new_status.into(), ..Default::default() }
  }

  /// Request a move to a typed status.
  pub fn to<S: TrackedStatus>(status: S) -> Self { Self::new(status.as_str()) }

  pub fn by(mut self, actor: UserId) -> Self {
    self.actor = Some(actor);
    self
  }

  pub fn effective(mut self, at: DateTime<Utc>) -> Self {
    self.effective_at = Some(at);
    self
  }

  pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
    self.comment = comment.into();
    self
  }

  pub fn with_metadata(
    mut self,
    key: impl Into<String>,
    value: impl Serialize,
  ) -> Result<Self> {
    self.metadata.insert(key.into(), serde_json::to_value(value)?);
    Ok(self)
  }

  /// Check the target status against the subject type's choice set.
  pub fn validate(&self, subject_type: SubjectType) -> Result<()> {
    subject_type.validate_status(&self.new_status)
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;
  use crate::status::OfferStatus;

  fn record(metadata: Metadata) -> StatusChangeRecord {
    StatusChangeRecord {
      change_id: 1,
      subject: SubjectRef::offer(1),
      previous_status: "DRAFT".into(),
      new_status: "SENT".into(),
      changed_at: Utc::now(),
      actor: None,
      comment: String::new(),
      metadata,
    }
  }

  #[test]
  fn effective_at_reads_metadata() {
    let at = Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap();
    let mut metadata = Metadata::new();
    metadata.insert(EFFECTIVE_AT_KEY.into(), Value::String(at.to_rfc3339()));
    assert_eq!(record(metadata).effective_at(), Some(at));
  }

  #[test]
  fn effective_at_ignores_garbage() {
    let mut metadata = Metadata::new();
    metadata.insert(EFFECTIVE_AT_KEY.into(), Value::String("yesterday".into()));
    assert_eq!(record(metadata).effective_at(), None);
    assert_eq!(record(Metadata::new()).effective_at(), None);
  }

  #[test]
  fn creation_change_targets_initial_status() {
    let change = NewStatusChange::creation(SubjectRef::offer(3), Some(7));
    assert_eq!(change.previous_status, "");
    assert_eq!(change.new_status, "DRAFT");
    assert_eq!(change.comment, CREATION_COMMENT);
  }

  #[test]
  fn request_builder_collects_metadata() {
    let request = StatusChangeRequest::to(OfferStatus::Lost)
      .by(4)
      .with_comment("budget cut")
      .with_metadata("reason", "budget")
      .unwrap();
    assert_eq!(request.new_status, "LOST");
    assert_eq!(request.actor, Some(4));
    assert_eq!(request.metadata["reason"], "budget");
    assert!(request.validate(SubjectType::Offer).is_ok());
    assert!(request.validate(SubjectType::Affair).is_err());
  }
}
