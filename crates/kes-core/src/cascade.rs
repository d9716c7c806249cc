//! Post-commit cascades: documents that come into existence because another
//! document reached a given status.
//!
//! An offer that is won gets a proforma and an affair. An affair that is
//! validated gets one report per product (plus a training for training
//! products) and its initial invoice. Every step is a get-or-create, so
//! [`dispatch`] can be run any number of times for the same record.

use serde::Serialize;
use tracing::{info, warn};

use crate::{
  change::StatusChangeRecord,
  document::Ensured,
  status::{AffairStatus, OfferStatus, TrackedStatus},
  store::TrackingStore,
  subject::{SubjectType, UserId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum CascadeStep {
  EnsureProforma { offer_id: i64 },
  EnsureAffair { offer_id: i64 },
  EnsureReports { affair_id: i64 },
  EnsureInitialInvoice { affair_id: i64 },
}

/// The cascade steps a committed transition triggers.
pub fn steps_for(record: &StatusChangeRecord) -> Vec<CascadeStep> {
  if record.is_creation() {
    return Vec::new();
  }
  let id = record.subject.subject_id;
  match record.subject.subject_type {
    SubjectType::Offer if record.new_status == OfferStatus::Won.as_str() => {
      vec![
        CascadeStep::EnsureProforma { offer_id: id },
        CascadeStep::EnsureAffair { offer_id: id },
      ]
    }
    SubjectType::Affair
      if record.new_status == AffairStatus::Validated.as_str() =>
    {
      vec![
        CascadeStep::EnsureReports { affair_id: id },
        CascadeStep::EnsureInitialInvoice { affair_id: id },
      ]
    }
    _ => Vec::new(),
  }
}

// ─── Report ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Dependent {
  Proforma(i64),
  Affair(i64),
  Report(i64),
  Training(i64),
  Invoice(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CascadeEntry {
  pub step:      CascadeStep,
  pub dependent: Dependent,
  /// `false` when the dependent already existed.
  pub created:   bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CascadeFailure {
  pub step:       CascadeStep,
  /// The product being processed, for per-product report failures.
  pub product_id: Option<i64>,
  pub error:      String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CascadeReport {
  pub entries:  Vec<CascadeEntry>,
  pub failures: Vec<CascadeFailure>,
}

impl CascadeReport {
  pub fn is_clean(&self) -> bool { self.failures.is_empty() }

  /// Dependents this run actually inserted.
  pub fn created(&self) -> impl Iterator<Item = &CascadeEntry> {
    self.entries.iter().filter(|e| e.created)
  }

  fn push<T>(
    &mut self,
    step: CascadeStep,
    ensured: &Ensured<T>,
    dependent: Dependent,
  ) {
    if ensured.created {
      info!(?step, ?dependent, "cascade created dependent");
    }
    self.entries.push(CascadeEntry { step, dependent, created: ensured.created });
  }

  fn fail(
    &mut self,
    step: CascadeStep,
    product_id: Option<i64>,
    error: &dyn std::error::Error,
  ) {
    warn!(?step, ?product_id, %error, "cascade step failed");
    self.failures.push(CascadeFailure {
      step,
      product_id,
      error: error.to_string(),
    });
  }
}

// ─── Dispatch ────────────────────────────────────────────────────────────────

/// Run the cascades triggered by a committed change record.
///
/// Steps are isolated from each other, and reports from each other: a
/// failure is logged and collected, and the remaining work still runs.
/// Nothing here can undo the transition that produced `record`. Tracked
/// documents created here are attributed to the record's actor.
pub async fn dispatch<S: TrackingStore>(
  store: &S,
  record: &StatusChangeRecord,
) -> CascadeReport {
  let mut report = CascadeReport::default();
  let actor = record.actor;

  for step in steps_for(record) {
    match step {
      CascadeStep::EnsureProforma { offer_id } => {
        match store.ensure_proforma(offer_id, actor).await {
          Ok(p) => {
            report.push(step, &p, Dependent::Proforma(p.value.proforma_id))
          }
          Err(e) => report.fail(step, None, &e),
        }
      }
      CascadeStep::EnsureAffair { offer_id } => {
        match store.ensure_affair(offer_id, actor).await {
          Ok(a) => report.push(step, &a, Dependent::Affair(a.value.affair_id)),
          Err(e) => report.fail(step, None, &e),
        }
      }
      CascadeStep::EnsureReports { affair_id } => {
        ensure_reports(store, affair_id, actor, &mut report).await;
      }
      CascadeStep::EnsureInitialInvoice { affair_id } => {
        match store.ensure_initial_invoice(affair_id, actor).await {
          Ok(i) => {
            report.push(step, &i, Dependent::Invoice(i.value.invoice_id))
          }
          Err(e) => report.fail(step, None, &e),
        }
      }
    }
  }

  report
}

async fn ensure_reports<S: TrackingStore>(
  store: &S,
  affair_id: i64,
  actor: Option<UserId>,
  report: &mut CascadeReport,
) {
  let step = CascadeStep::EnsureReports { affair_id };

  let affair = match store.get_affair(affair_id).await {
    Ok(Some(affair)) => affair,
    Ok(None) => {
      warn!(affair_id, "affair vanished before its reports were created");
      report.failures.push(CascadeFailure {
        step,
        product_id: None,
        error: format!("affair {affair_id} not found"),
      });
      return;
    }
    Err(e) => return report.fail(step, None, &e),
  };

  let products = match store.offer_products(affair.offer_id).await {
    Ok(products) => products,
    Err(e) => return report.fail(step, None, &e),
  };

  for product in products {
    let ensured =
      match store.ensure_report(affair_id, product.product_id, actor).await {
        Ok(r) => r,
        Err(e) => {
          report.fail(step, Some(product.product_id), &e);
          continue;
        }
      };
    report.push(step, &ensured, Dependent::Report(ensured.value.report_id));

    if product.is_training() {
      match store.ensure_training(ensured.value.report_id).await {
        Ok(t) => {
          report.push(step, &t, Dependent::Training(t.value.training_id))
        }
        Err(e) => report.fail(step, Some(product.product_id), &e),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::Utc;

  use super::*;
  use crate::{change::Metadata, subject::SubjectRef};

  fn record(subject: SubjectRef, previous: &str, new: &str) -> StatusChangeRecord {
    StatusChangeRecord {
      change_id: 1,
      subject,
      previous_status: previous.into(),
      new_status: new.into(),
      changed_at: Utc::now(),
      actor: None,
      comment: String::new(),
      metadata: Metadata::new(),
    }
  }

  #[test]
  fn won_offer_triggers_proforma_and_affair() {
    let steps = steps_for(&record(SubjectRef::offer(4), "SENT", "WON"));
    assert_eq!(steps, vec![
      CascadeStep::EnsureProforma { offer_id: 4 },
      CascadeStep::EnsureAffair { offer_id: 4 },
    ]);
  }

  #[test]
  fn validated_affair_triggers_reports_and_invoice() {
    let steps = steps_for(&record(SubjectRef::affair(2), "DRAFT", "VALIDATED"));
    assert_eq!(steps, vec![
      CascadeStep::EnsureReports { affair_id: 2 },
      CascadeStep::EnsureInitialInvoice { affair_id: 2 },
    ]);
  }

  #[test]
  fn other_transitions_trigger_nothing() {
    assert!(steps_for(&record(SubjectRef::offer(1), "DRAFT", "SENT")).is_empty());
    assert!(steps_for(&record(SubjectRef::affair(1), "VALIDATED", "DONE")).is_empty());
    // `VALIDATED` on a proforma is not an affair validation.
    assert!(
      steps_for(&record(SubjectRef::proforma(1), "DRAFT", "VALIDATED")).is_empty()
    );
    // Opportunities have a WON status too.
    assert!(steps_for(&record(SubjectRef::opportunity(1), "NEGOTIATION", "WON")).is_empty());
  }

  #[test]
  fn creation_records_trigger_nothing() {
    assert!(steps_for(&record(SubjectRef::offer(1), "", "DRAFT")).is_empty());
  }
}
