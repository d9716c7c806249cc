//! The status-tracking capability shared by every tracked document.
//!
//! A [`Tracking`] value is the per-subject row holding the current status,
//! the per-status timestamps and the audit columns. Transitions are planned
//! here as pure computations; the store persists the plan and its change
//! record in a single transaction.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
  Error, Result,
  change::{EFFECTIVE_AT_KEY, NewStatusChange, StatusChangeRequest},
  status::TrackedStatus,
  subject::{SubjectRef, UserId},
};

/// Status name → time the subject (last) entered that status.
pub type StatusDates = BTreeMap<String, DateTime<Utc>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tracking {
  pub subject:      SubjectRef,
  pub status:       String,
  pub status_dates: StatusDates,
  pub created_at:   DateTime<Utc>,
  pub updated_at:   DateTime<Utc>,
  pub created_by:   Option<UserId>,
  pub updated_by:   Option<UserId>,
}

/// The outcome of [`Tracking::plan`]: the row to write and the change record
/// to append with it.
#[derive(Debug, Clone)]
pub struct PlannedTransition {
  pub tracking: Tracking,
  pub change:   NewStatusChange,
}

impl Tracking {
  /// Tracking state of a subject created at `now`: initial status, with the
  /// creation time seeded into `status_dates`.
  pub fn new(
    subject: SubjectRef,
    created_by: Option<UserId>,
    now: DateTime<Utc>,
  ) -> Self {
    let status = subject.subject_type.initial_status().to_owned();
    let status_dates = StatusDates::from([(status.clone(), now)]);
    Self {
      subject,
      status,
      status_dates,
      created_at: now,
      updated_at: now,
      created_by,
      updated_by: created_by,
    }
  }

  /// When the subject last entered `status`.
  pub fn date_for(&self, status: &str) -> Option<DateTime<Utc>> {
    self.status_dates.get(status).copied()
  }

  /// When the subject entered its current status.
  pub fn current_since(&self) -> Option<DateTime<Utc>> {
    self.date_for(&self.status)
  }

  /// The current status as the subject type's enum.
  pub fn status_as<S: TrackedStatus>(&self) -> Result<S> {
    S::parse_status(&self.status).ok_or_else(|| Error::InvalidStatus {
      subject_type: self.subject.subject_type,
      status:       self.status.clone(),
      allowed:      S::VARIANTS,
    })
  }

  /// Reject effective dates in the future or before the subject existed.
  pub fn validate_effective_at(
    &self,
    at: DateTime<Utc>,
    now: DateTime<Utc>,
  ) -> Result<()> {
    if at > now {
      return Err(Error::EffectiveDateInFuture { at });
    }
    if at < self.created_at {
      return Err(Error::EffectiveDateBeforeCreation {
        at,
        created_at: self.created_at,
      });
    }
    Ok(())
  }

  /// Plan a transition.
  ///
  /// Returns `Ok(None)` when `request.new_status` equals the current status:
  /// nothing is to be written. Validation failures leave `self` untouched.
  pub fn plan(
    &self,
    request: &StatusChangeRequest,
    now: DateTime<Utc>,
  ) -> Result<Option<PlannedTransition>> {
    request.validate(self.subject.subject_type)?;
    if let Some(at) = request.effective_at {
      self.validate_effective_at(at, now)?;
    }

    if request.new_status == self.status {
      return Ok(None);
    }

    let mut next = self.clone();
    next.status = request.new_status.clone();
    next.updated_at = now;
    if request.actor.is_some() {
      next.updated_by = request.actor;
    }
    next
      .status_dates
      .insert(request.new_status.clone(), request.effective_at.unwrap_or(now));

    let mut metadata = request.metadata.clone();
    if let Some(at) = request.effective_at {
      metadata.insert(EFFECTIVE_AT_KEY.to_owned(), Value::String(at.to_rfc3339()));
    }

    let change = NewStatusChange {
      subject: self.subject,
      previous_status: self.status.clone(),
      new_status: request.new_status.clone(),
      actor: request.actor,
      comment: request.comment.clone(),
      metadata,
    };

    Ok(Some(PlannedTransition { tracking: next, change }))
  }
}

#[cfg(test)]
mod tests {
  use chrono::Duration;

  use super::*;
  use crate::status::{AffairStatus, OfferStatus};

  fn offer_tracking() -> (Tracking, DateTime<Utc>) {
    let created = Utc::now() - Duration::days(3);
    (Tracking::new(SubjectRef::offer(1), Some(1), created), created)
  }

  #[test]
  fn new_seeds_initial_status_date() {
    let (tracking, created) = offer_tracking();
    assert_eq!(tracking.status, "DRAFT");
    assert_eq!(tracking.date_for("DRAFT"), Some(created));
    assert_eq!(tracking.status_dates.len(), 1);
    assert_eq!(tracking.status_as::<OfferStatus>().unwrap(), OfferStatus::Draft);
  }

  #[test]
  fn plan_same_status_is_noop() {
    let (tracking, _) = offer_tracking();
    let plan = tracking
      .plan(&StatusChangeRequest::to(OfferStatus::Draft), Utc::now())
      .unwrap();
    assert!(plan.is_none());
  }

  #[test]
  fn plan_rejects_unknown_status() {
    let (tracking, _) = offer_tracking();
    let err = tracking
      .plan(&StatusChangeRequest::new("NOT_A_REAL_STATUS"), Utc::now())
      .unwrap_err();
    assert!(matches!(err, Error::InvalidStatus { .. }));
  }

  #[test]
  fn plan_rejects_status_of_other_subject_type() {
    let (tracking, _) = offer_tracking();
    let err = tracking
      .plan(&StatusChangeRequest::to(AffairStatus::Validated), Utc::now())
      .unwrap_err();
    assert!(matches!(err, Error::InvalidStatus { .. }));
  }

  #[test]
  fn plan_updates_status_dates_and_actor() {
    let (tracking, created) = offer_tracking();
    let now = Utc::now();
    let plan = tracking
      .plan(&StatusChangeRequest::to(OfferStatus::Sent).by(9), now)
      .unwrap()
      .unwrap();

    assert_eq!(plan.tracking.status, "SENT");
    assert_eq!(plan.tracking.date_for("SENT"), Some(now));
    assert_eq!(plan.tracking.date_for("DRAFT"), Some(created));
    assert_eq!(plan.tracking.updated_by, Some(9));
    assert_eq!(plan.change.previous_status, "DRAFT");
    assert_eq!(plan.change.new_status, "SENT");
    assert!(plan.change.metadata.get(EFFECTIVE_AT_KEY).is_none());
  }

  #[test]
  fn plan_without_actor_keeps_previous_updater() {
    let (tracking, _) = offer_tracking();
    let plan = tracking
      .plan(&StatusChangeRequest::to(OfferStatus::Sent), Utc::now())
      .unwrap()
      .unwrap();
    assert_eq!(plan.tracking.updated_by, Some(1));
    assert_eq!(plan.change.actor, None);
  }

  #[test]
  fn backdated_plan_records_effective_at() {
    let (tracking, created) = offer_tracking();
    let at = created + Duration::hours(5);
    let plan = tracking
      .plan(&StatusChangeRequest::to(OfferStatus::Sent).effective(at), Utc::now())
      .unwrap()
      .unwrap();
    assert_eq!(plan.tracking.date_for("SENT"), Some(at));
    assert_eq!(
      plan.change.metadata[EFFECTIVE_AT_KEY],
      Value::String(at.to_rfc3339())
    );
  }

  #[test]
  fn effective_at_bounds_are_enforced() {
    let (tracking, created) = offer_tracking();
    let now = Utc::now();

    let future = StatusChangeRequest::to(OfferStatus::Sent)
      .effective(now + Duration::days(1));
    assert!(matches!(
      tracking.plan(&future, now),
      Err(Error::EffectiveDateInFuture { .. })
    ));

    let too_early = StatusChangeRequest::to(OfferStatus::Sent)
      .effective(created - Duration::days(1));
    assert!(matches!(
      tracking.plan(&too_early, now),
      Err(Error::EffectiveDateBeforeCreation { .. })
    ));
  }

  #[test]
  fn reentering_a_status_overwrites_only_its_key() {
    let (tracking, created) = offer_tracking();
    let first = Utc::now() - Duration::days(2);
    let sent = tracking
      .plan(&StatusChangeRequest::to(OfferStatus::Sent).effective(first), Utc::now())
      .unwrap()
      .unwrap()
      .tracking;
    let back = sent
      .plan(&StatusChangeRequest::to(OfferStatus::Negotiating), Utc::now())
      .unwrap()
      .unwrap()
      .tracking;
    let later = Utc::now();
    let again = back
      .plan(&StatusChangeRequest::to(OfferStatus::Sent), later)
      .unwrap()
      .unwrap()
      .tracking;

    assert_eq!(again.date_for("SENT"), Some(later));
    assert_eq!(again.date_for("DRAFT"), Some(created));
    assert!(again.date_for("NEGOTIATING").is_some());
    assert_eq!(again.status_dates.len(), 3);
  }
}
