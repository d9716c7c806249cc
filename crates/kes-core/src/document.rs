//! Business documents: offers, proformas, affairs, reports, trainings,
//! invoices, opportunities and correspondence.
//!
//! Every document except [`Training`] is a tracked subject: it carries an
//! immutable [`reference`](crate::reference) and a [`Tracking`] row. Amounts
//! are integer cents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Result,
  followup,
  status::{
    AffairStatus, InvoiceStatus, OfferStatus, OpportunityStatus, ReportStatus,
    TrackedStatus,
  },
  subject::{SubjectRef, UserId},
  tracking::Tracking,
};

pub type Cents = i64;

/// 19.25 %, in basis points.
pub const DEFAULT_VAT_RATE_BP: i64 = 1925;

/// Result of a get-or-create: the row, and whether this call inserted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ensured<T> {
  pub value:   T,
  pub created: bool,
}

impl<T> Ensured<T> {
  pub fn created(value: T) -> Self { Self { value, created: true } }

  pub fn existing(value: T) -> Self { Self { value, created: false } }
}

// ─── Amounts ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceAmounts {
  pub ht:  Cents,
  pub vat: Cents,
  pub ttc: Cents,
}

impl InvoiceAmounts {
  /// VAT rounded half-up to the cent.
  pub fn compute(ht: Cents, vat_rate_bp: i64) -> Self {
    let vat = (ht * vat_rate_bp + 5_000).div_euclid(10_000);
    Self { ht, vat, ttc: ht + vat }
  }
}

// ─── Offer ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferLine {
  pub product_id: i64,
  pub quantity:   u32,
  pub unit_price: Cents,
}

impl OfferLine {
  pub fn subtotal(&self) -> Cents { i64::from(self.quantity) * self.unit_price }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
  pub offer_id:        i64,
  pub reference:       String,
  pub sequence_number: u32,
  pub organization_id: i64,
  pub client_id:       i64,
  pub main_product_id: i64,
  /// Set when the offer was drawn up from an opportunity.
  pub opportunity_id:  Option<i64>,
  pub amount:          Cents,
  pub notes:           String,
  pub lines:           Vec<OfferLine>,
  pub tracking:        Tracking,
}

impl Offer {
  pub fn subject(&self) -> SubjectRef { SubjectRef::offer(self.offer_id) }

  pub fn status(&self) -> Result<OfferStatus> { self.tracking.status_as() }

  pub fn lines_total(&self) -> Cents {
    self.lines.iter().map(OfferLine::subtotal).sum()
  }

  pub fn next_follow_up(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    followup::next_follow_up(&self.tracking, now)
  }
}

/// Input to [`crate::store::TrackingStore::create_offer`].
#[derive(Debug, Clone)]
pub struct NewOffer {
  pub organization_id: i64,
  pub client_id:       i64,
  pub main_product_id: i64,
  pub amount:          Cents,
  pub notes:           String,
  pub lines:           Vec<OfferLine>,
  pub created_by:      Option<UserId>,
}

impl NewOffer {
  pub fn new(organization_id: i64, client_id: i64, main_product_id: i64) -> Self {
    Self {
      organization_id,
      client_id,
      main_product_id,
      amount: 0,
      notes: String::new(),
      lines: Vec::new(),
      created_by: None,
    }
  }
}

/// Editable offer fields. The reference is never part of an update.
#[derive(Debug, Clone, Default)]
pub struct OfferUpdate {
  pub amount: Option<Cents>,
  pub notes:  Option<String>,
  pub actor:  Option<UserId>,
}

// ─── Cascade-created documents ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proforma {
  pub proforma_id:     i64,
  pub reference:       String,
  pub sequence_number: u32,
  pub offer_id:        i64,
  pub organization_id: i64,
  pub client_id:       i64,
  pub amount_ht:       Cents,
  pub vat_rate_bp:     i64,
  pub tracking:        Tracking,
}

impl Proforma {
  pub fn subject(&self) -> SubjectRef { SubjectRef::proforma(self.proforma_id) }

  pub fn amounts(&self) -> InvoiceAmounts {
    InvoiceAmounts::compute(self.amount_ht, self.vat_rate_bp)
  }
}

/// A contracted project born from a won offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Affair {
  pub affair_id:       i64,
  pub reference:       String,
  pub sequence_number: u32,
  pub offer_id:        i64,
  pub organization_id: i64,
  pub client_id:       i64,
  pub total_amount:    Cents,
  pub manager_id:      Option<UserId>,
  pub tracking:        Tracking,
}

impl Affair {
  pub fn subject(&self) -> SubjectRef { SubjectRef::affair(self.affair_id) }

  pub fn status(&self) -> Result<AffairStatus> { self.tracking.status_as() }

  pub fn validated_at(&self) -> Option<DateTime<Utc>> {
    self.tracking.date_for(AffairStatus::Validated.as_str())
  }

  pub fn started_at(&self) -> Option<DateTime<Utc>> {
    self.tracking.date_for(AffairStatus::InProgress.as_str())
  }

  pub fn finished_at(&self) -> Option<DateTime<Utc>> {
    self.tracking.date_for(AffairStatus::Done.as_str())
  }

  pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
    self.tracking.date_for(AffairStatus::Cancelled.as_str())
  }

  /// Share of this affair's reports that are validated, in whole percent
  /// rounded down. An affair without reports is at 0.
  pub fn progression(&self, reports: &[Report]) -> u8 {
    let own = reports.iter().filter(|r| r.affair_id == self.affair_id);
    let (total, validated) = own.fold((0usize, 0usize), |(total, done), r| {
      let is_done = r.tracking.status == ReportStatus::Validated.as_str();
      (total + 1, done + usize::from(is_done))
    });
    if total == 0 {
      return 0;
    }
    u8::try_from(validated * 100 / total).unwrap_or(100)
  }

  /// Pre-tax amount already invoiced, cancelled invoices excluded.
  pub fn invoiced_amount(&self, invoices: &[Invoice]) -> Cents {
    self
      .live_invoices(invoices)
      .map(|i| i.amount_ht)
      .sum()
  }

  /// Pre-tax amount of the affair not yet covered by an invoice.
  pub fn remaining_to_invoice(&self, invoices: &[Invoice]) -> Cents {
    self.total_amount - self.invoiced_amount(invoices)
  }

  /// Outstanding balance, VAT included, over the affair's live invoices.
  pub fn remaining_to_pay(&self, invoices: &[Invoice]) -> Cents {
    self.live_invoices(invoices).map(Invoice::balance).sum()
  }

  fn live_invoices<'a>(
    &self,
    invoices: &'a [Invoice],
  ) -> impl Iterator<Item = &'a Invoice> + 'a {
    let affair_id = self.affair_id;
    invoices.iter().filter(move |i| {
      i.affair_id == affair_id
        && i.tracking.status != InvoiceStatus::Cancelled.as_str()
    })
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
  pub report_id:       i64,
  pub reference:       String,
  pub sequence_number: u32,
  pub affair_id:       i64,
  pub product_id:      i64,
  pub organization_id: i64,
  pub client_id:       i64,
  pub tracking:        Tracking,
}

impl Report {
  pub fn subject(&self) -> SubjectRef { SubjectRef::report(self.report_id) }
}

/// A training session attached to the report of a training product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Training {
  pub training_id:           i64,
  pub report_id:             i64,
  pub affair_id:             i64,
  pub client_id:             i64,
  pub title:                 String,
  /// Reference printed on the attendance certificate.
  pub certificate_reference: String,
  pub created_at:            DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
  pub invoice_id:      i64,
  pub reference:       String,
  pub sequence_number: u32,
  pub affair_id:       i64,
  pub organization_id: i64,
  pub client_id:       i64,
  pub amount_ht:       Cents,
  pub vat_rate_bp:     i64,
  pub amount_paid:     Cents,
  pub tracking:        Tracking,
}

impl Invoice {
  pub fn subject(&self) -> SubjectRef { SubjectRef::invoice(self.invoice_id) }

  pub fn status(&self) -> Result<InvoiceStatus> { self.tracking.status_as() }

  pub fn amounts(&self) -> InvoiceAmounts {
    InvoiceAmounts::compute(self.amount_ht, self.vat_rate_bp)
  }

  pub fn balance(&self) -> Cents { self.amounts().ttc - self.amount_paid }
}

impl InvoiceStatus {
  /// The status an invoice moves to once `paid` has been received against a
  /// total (VAT included) of `ttc`.
  pub fn for_payment(paid: Cents, ttc: Cents) -> Self {
    if paid >= ttc {
      Self::Paid
    } else if paid > 0 {
      Self::PartiallyPaid
    } else {
      Self::Unpaid
    }
  }
}

// ─── Opportunity ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
  pub opportunity_id:   i64,
  pub reference:        String,
  pub sequence_number:  u32,
  pub organization_id:  i64,
  pub client_id:        i64,
  pub main_product_id:  i64,
  pub estimated_amount: Cents,
  pub tracking:         Tracking,
}

impl Opportunity {
  pub fn subject(&self) -> SubjectRef {
    SubjectRef::opportunity(self.opportunity_id)
  }

  pub fn status(&self) -> Result<OpportunityStatus> { self.tracking.status_as() }

  /// Conversion probability in percent, derived from the pipeline stage.
  pub fn probability(&self) -> Result<u8> {
    Ok(followup::win_probability(self.status()?))
  }

  /// Estimated amount weighted by [`Self::probability`].
  pub fn weighted_value(&self) -> Result<Cents> {
    Ok(self.estimated_amount * i64::from(self.probability()?) / 100)
  }

  pub fn next_follow_up(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    followup::next_follow_up(&self.tracking, now)
  }
}

#[derive(Debug, Clone)]
pub struct NewOpportunity {
  pub organization_id:  i64,
  pub client_id:        i64,
  pub main_product_id:  i64,
  pub estimated_amount: Cents,
  pub created_by:       Option<UserId>,
}

// ─── Correspondence ──────────────────────────────────────────────────────────

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::IntoStaticStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Direction {
  In,
  Out,
}

impl Direction {
  pub fn as_str(self) -> &'static str { self.into() }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
  pub correspondence_id: i64,
  pub reference:         String,
  pub sequence_number:   u32,
  pub organization_id:   i64,
  pub client_id:         i64,
  pub direction:         Direction,
  /// Three-letter kind code, e.g. `LET` for a letter.
  pub kind_code:         String,
  pub subject_line:      String,
  pub tracking:          Tracking,
}

impl Correspondence {
  pub fn subject(&self) -> SubjectRef {
    SubjectRef::correspondence(self.correspondence_id)
  }
}

#[derive(Debug, Clone)]
pub struct NewCorrespondence {
  pub organization_id: i64,
  pub client_id:       i64,
  pub direction:       Direction,
  pub kind_code:       String,
  pub subject_line:    String,
  pub created_by:      Option<UserId>,
}

// ─── Drafts ──────────────────────────────────────────────────────────────────

/// A document not yet persisted, for reference previews.
#[derive(Debug, Clone)]
pub enum DocumentDraft {
  Offer(NewOffer),
  Opportunity(NewOpportunity),
  Correspondence(NewCorrespondence),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn vat_rounds_half_up() {
    let amounts = InvoiceAmounts::compute(100_000, DEFAULT_VAT_RATE_BP);
    assert_eq!(amounts.vat, 19_250);
    assert_eq!(amounts.ttc, 119_250);

    // 1.99 * 19.25 % = 0.383075 -> 0.38
    assert_eq!(InvoiceAmounts::compute(199, DEFAULT_VAT_RATE_BP).vat, 38);
    // 2.00 * 19.25 % = 0.385 -> 0.39
    assert_eq!(InvoiceAmounts::compute(200, DEFAULT_VAT_RATE_BP).vat, 39);
  }

  #[test]
  fn payment_status_thresholds() {
    assert_eq!(InvoiceStatus::for_payment(0, 1_000), InvoiceStatus::Unpaid);
    assert_eq!(
      InvoiceStatus::for_payment(1, 1_000),
      InvoiceStatus::PartiallyPaid
    );
    assert_eq!(InvoiceStatus::for_payment(1_000, 1_000), InvoiceStatus::Paid);
    assert_eq!(InvoiceStatus::for_payment(1_500, 1_000), InvoiceStatus::Paid);
  }

  fn affair(total_amount: Cents) -> Affair {
    Affair {
      affair_id: 7,
      reference: "KIP/AFF/ACME/250601/AUD/1/0001".into(),
      sequence_number: 1,
      offer_id: 3,
      organization_id: 1,
      client_id: 2,
      total_amount,
      manager_id: None,
      tracking: Tracking::new(SubjectRef::affair(7), None, Utc::now()),
    }
  }

  fn report(report_id: i64, affair_id: i64, status: ReportStatus) -> Report {
    let mut tracking =
      Tracking::new(SubjectRef::report(report_id), None, Utc::now());
    tracking.status = status.as_str().to_owned();
    Report {
      report_id,
      reference: format!("R{report_id}"),
      sequence_number: 1,
      affair_id,
      product_id: report_id,
      organization_id: 1,
      client_id: 2,
      tracking,
    }
  }

  fn invoice(
    invoice_id: i64,
    amount_ht: Cents,
    amount_paid: Cents,
    status: InvoiceStatus,
  ) -> Invoice {
    let mut tracking =
      Tracking::new(SubjectRef::invoice(invoice_id), None, Utc::now());
    tracking.status = status.as_str().to_owned();
    Invoice {
      invoice_id,
      reference: format!("I{invoice_id}"),
      sequence_number: 1,
      affair_id: 7,
      organization_id: 1,
      client_id: 2,
      amount_ht,
      vat_rate_bp: DEFAULT_VAT_RATE_BP,
      amount_paid,
      tracking,
    }
  }

  #[test]
  fn progression_counts_validated_reports() {
    let affair = affair(100_000);
    assert_eq!(affair.progression(&[]), 0);

    let reports = [
      report(1, 7, ReportStatus::Validated),
      report(2, 7, ReportStatus::Sent),
      report(3, 7, ReportStatus::Draft),
      // Another affair's report does not count.
      report(4, 8, ReportStatus::Validated),
    ];
    assert_eq!(affair.progression(&reports), 33);
    assert_eq!(affair.progression(&reports[..1]), 100);
  }

  #[test]
  fn remaining_amounts_skip_cancelled_invoices() {
    let affair = affair(100_000);
    let invoices = [
      invoice(1, 60_000, 0, InvoiceStatus::Issued),
      invoice(2, 40_000, 0, InvoiceStatus::Cancelled),
    ];
    assert_eq!(affair.invoiced_amount(&invoices), 60_000);
    assert_eq!(affair.remaining_to_invoice(&invoices), 40_000);
    // 60 000 + 19.25 % VAT = 71 550
    assert_eq!(affair.remaining_to_pay(&invoices), 71_550);

    let partly_paid = [invoice(1, 60_000, 50_000, InvoiceStatus::PartiallyPaid)];
    assert_eq!(affair.remaining_to_pay(&partly_paid), 21_550);
    assert_eq!(affair.remaining_to_invoice(&[]), 100_000);
  }

  #[test]
  fn offer_line_subtotals() {
    let line = OfferLine { product_id: 1, quantity: 3, unit_price: 2_500 };
    assert_eq!(line.subtotal(), 7_500);
  }
}
