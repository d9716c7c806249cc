//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as fixed-width RFC 3339 strings (microseconds,
//! `Z` suffix) so that they sort lexically. Structured fields (status dates,
//! metadata) are stored as compact JSON.

use chrono::{DateTime, SecondsFormat, SubsecRound as _, Utc};
use kes_core::{
  change::{Metadata, StatusChangeRecord},
  document::{
    Affair, Correspondence, Direction, Invoice, Offer, OfferLine, Opportunity,
    Proforma, Report, Training,
  },
  party::{Client, Organization, Product, User},
  subject::{SubjectRef, SubjectType},
  tracking::{StatusDates, Tracking},
};
use rusqlite::{Row, types::Type};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

/// The current time at the precision the store keeps.
pub fn now() -> DateTime<Utc> { Utc::now().trunc_subsecs(6) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── JSON columns ────────────────────────────────────────────────────────────

pub fn encode_status_dates(dates: &StatusDates) -> Result<String> {
  Ok(serde_json::to_string(dates)?)
}

pub fn decode_status_dates(s: &str) -> Result<StatusDates> {
  Ok(serde_json::from_str(s)?)
}

pub fn encode_metadata(metadata: &Metadata) -> Result<String> {
  Ok(serde_json::to_string(metadata)?)
}

pub fn decode_metadata(s: &str) -> Result<Metadata> {
  Ok(serde_json::from_str(s)?)
}

// ─── Subjects ────────────────────────────────────────────────────────────────

/// The document table and primary-key column holding subjects of a type.
pub fn subject_table(t: SubjectType) -> (&'static str, &'static str) {
  match t {
    SubjectType::Offer => ("offers", "offer_id"),
    SubjectType::Affair => ("affairs", "affair_id"),
    SubjectType::Opportunity => ("opportunities", "opportunity_id"),
    SubjectType::Proforma => ("proformas", "proforma_id"),
    SubjectType::Invoice => ("invoices", "invoice_id"),
    SubjectType::Report => ("reports", "report_id"),
    SubjectType::Correspondence => ("correspondences", "correspondence_id"),
  }
}

fn decode_subject(subject_type: &str, subject_id: i64) -> Result<SubjectRef> {
  Ok(SubjectRef::new(SubjectType::parse(subject_type)?, subject_id))
}

// ─── Tracking ────────────────────────────────────────────────────────────────

pub const TRACKING_COLUMNS: &str = "subject_type, subject_id, status, \
                                    status_dates, created_at, updated_at, \
                                    created_by, updated_by";

/// Raw `tracking` row as returned by SQLite.
pub struct RawTracking {
  pub subject_type: String,
  pub subject_id:   i64,
  pub status:       String,
  pub status_dates: String,
  pub created_at:   String,
  pub updated_at:   String,
  pub created_by:   Option<i64>,
  pub updated_by:   Option<i64>,
}

impl RawTracking {
  /// Read the tracking columns starting at column `base`.
  pub fn from_row_at(row: &Row<'_>, base: usize) -> rusqlite::Result<Self> {
    Ok(Self {
      subject_type: row.get(base)?,
      subject_id:   row.get(base + 1)?,
      status:       row.get(base + 2)?,
      status_dates: row.get(base + 3)?,
      created_at:   row.get(base + 4)?,
      updated_at:   row.get(base + 5)?,
      created_by:   row.get(base + 6)?,
      updated_by:   row.get(base + 7)?,
    })
  }

  pub fn into_tracking(self) -> Result<Tracking> {
    Ok(Tracking {
      subject:      decode_subject(&self.subject_type, self.subject_id)?,
      status:       self.status,
      status_dates: decode_status_dates(&self.status_dates)?,
      created_at:   decode_dt(&self.created_at)?,
      updated_at:   decode_dt(&self.updated_at)?,
      created_by:   self.created_by,
      updated_by:   self.updated_by,
    })
  }
}

/// Decode the tracking columns of a joined document row. Decoding failures
/// surface as column conversion errors.
pub fn tracking_at(row: &Row<'_>, base: usize) -> rusqlite::Result<Tracking> {
  RawTracking::from_row_at(row, base)?
    .into_tracking()
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(base, Type::Text, Box::new(e)))
}

/// `SELECT` over a document table joined with its tracking rows. `columns`
/// come first, so the tracking columns start at their count.
pub fn tracked_select(
  columns: &str,
  subject_type: SubjectType,
) -> String {
  let (table, id_col) = subject_table(subject_type);
  format!(
    "SELECT {columns}, t.subject_type, t.subject_id, t.status, t.status_dates, \
            t.created_at, t.updated_at, t.created_by, t.updated_by \
     FROM {table} d \
     JOIN tracking t ON t.subject_type = '{}' AND t.subject_id = d.{id_col}",
    subject_type.as_str()
  )
}

// ─── Status changes ──────────────────────────────────────────────────────────

pub const CHANGE_COLUMNS: &str = "change_id, subject_type, subject_id, \
                                  previous_status, new_status, changed_at, \
                                  actor, comment, metadata";

/// Raw `status_changes` row as returned by SQLite.
pub struct RawChange {
  pub change_id:       i64,
  pub subject_type:    String,
  pub subject_id:      i64,
  pub previous_status: String,
  pub new_status:      String,
  pub changed_at:      String,
  pub actor:           Option<i64>,
  pub comment:         String,
  pub metadata:        String,
}

impl RawChange {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      change_id:       row.get(0)?,
      subject_type:    row.get(1)?,
      subject_id:      row.get(2)?,
      previous_status: row.get(3)?,
      new_status:      row.get(4)?,
      changed_at:      row.get(5)?,
      actor:           row.get(6)?,
      comment:         row.get(7)?,
      metadata:        row.get(8)?,
    })
  }

  pub fn into_record(self) -> Result<StatusChangeRecord> {
    Ok(StatusChangeRecord {
      change_id:       self.change_id,
      subject:         decode_subject(&self.subject_type, self.subject_id)?,
      previous_status: self.previous_status,
      new_status:      self.new_status,
      changed_at:      decode_dt(&self.changed_at)?,
      actor:           self.actor,
      comment:         self.comment,
      metadata:        decode_metadata(&self.metadata)?,
    })
  }
}

// ─── Reference data ──────────────────────────────────────────────────────────

pub fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
  Ok(User { user_id: row.get(0)?, username: row.get(1)? })
}

pub fn organization_from_row(row: &Row<'_>) -> rusqlite::Result<Organization> {
  Ok(Organization {
    organization_id: row.get(0)?,
    code:            row.get(1)?,
    name:            row.get(2)?,
  })
}

pub const PRODUCT_COLUMNS: &str = "product_id, code, name, category_code";

pub fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
  Ok(Product {
    product_id:    row.get(0)?,
    code:          row.get(1)?,
    name:          row.get(2)?,
    category_code: row.get(3)?,
  })
}

pub struct RawClient {
  pub client_id:     i64,
  pub name:          String,
  pub client_number: String,
  pub created_at:    String,
}

impl RawClient {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      client_id:     row.get(0)?,
      name:          row.get(1)?,
      client_number: row.get(2)?,
      created_at:    row.get(3)?,
    })
  }

  pub fn into_client(self) -> Result<Client> {
    Ok(Client {
      client_id:     self.client_id,
      name:          self.name,
      client_number: self.client_number,
      created_at:    decode_dt(&self.created_at)?,
    })
  }
}

// ─── Documents ───────────────────────────────────────────────────────────────
//
// Each `*_from_row` reads a row produced by `tracked_select`.

pub const OFFER_COLUMNS: &str = "offer_id, reference, sequence_number, \
                                 organization_id, client_id, main_product_id, \
                                 opportunity_id, amount, notes";

pub fn offer_from_row(row: &Row<'_>) -> rusqlite::Result<Offer> {
  Ok(Offer {
    offer_id:        row.get(0)?,
    reference:       row.get(1)?,
    sequence_number: row.get(2)?,
    organization_id: row.get(3)?,
    client_id:       row.get(4)?,
    main_product_id: row.get(5)?,
    opportunity_id:  row.get(6)?,
    amount:          row.get(7)?,
    notes:           row.get(8)?,
    lines:           Vec::new(),
    tracking:        tracking_at(row, 9)?,
  })
}

pub fn offer_line_from_row(row: &Row<'_>) -> rusqlite::Result<OfferLine> {
  Ok(OfferLine {
    product_id: row.get(0)?,
    quantity:   row.get(1)?,
    unit_price: row.get(2)?,
  })
}

pub const PROFORMA_COLUMNS: &str = "proforma_id, reference, sequence_number, \
                                    offer_id, organization_id, client_id, \
                                    amount_ht, vat_rate_bp";

pub fn proforma_from_row(row: &Row<'_>) -> rusqlite::Result<Proforma> {
  Ok(Proforma {
    proforma_id:     row.get(0)?,
    reference:       row.get(1)?,
    sequence_number: row.get(2)?,
    offer_id:        row.get(3)?,
    organization_id: row.get(4)?,
    client_id:       row.get(5)?,
    amount_ht:       row.get(6)?,
    vat_rate_bp:     row.get(7)?,
    tracking:        tracking_at(row, 8)?,
  })
}

pub const AFFAIR_COLUMNS: &str = "affair_id, reference, sequence_number, \
                                  offer_id, organization_id, client_id, \
                                  total_amount, manager_id";

pub fn affair_from_row(row: &Row<'_>) -> rusqlite::Result<Affair> {
  Ok(Affair {
    affair_id:       row.get(0)?,
    reference:       row.get(1)?,
    sequence_number: row.get(2)?,
    offer_id:        row.get(3)?,
    organization_id: row.get(4)?,
    client_id:       row.get(5)?,
    total_amount:    row.get(6)?,
    manager_id:      row.get(7)?,
    tracking:        tracking_at(row, 8)?,
  })
}

pub const REPORT_COLUMNS: &str = "report_id, reference, sequence_number, \
                                  affair_id, product_id, organization_id, \
                                  client_id";

pub fn report_from_row(row: &Row<'_>) -> rusqlite::Result<Report> {
  Ok(Report {
    report_id:       row.get(0)?,
    reference:       row.get(1)?,
    sequence_number: row.get(2)?,
    affair_id:       row.get(3)?,
    product_id:      row.get(4)?,
    organization_id: row.get(5)?,
    client_id:       row.get(6)?,
    tracking:        tracking_at(row, 7)?,
  })
}

pub const INVOICE_COLUMNS: &str = "invoice_id, reference, sequence_number, \
                                   affair_id, organization_id, client_id, \
                                   amount_ht, vat_rate_bp, amount_paid";

pub fn invoice_from_row(row: &Row<'_>) -> rusqlite::Result<Invoice> {
  Ok(Invoice {
    invoice_id:      row.get(0)?,
    reference:       row.get(1)?,
    sequence_number: row.get(2)?,
    affair_id:       row.get(3)?,
    organization_id: row.get(4)?,
    client_id:       row.get(5)?,
    amount_ht:       row.get(6)?,
    vat_rate_bp:     row.get(7)?,
    amount_paid:     row.get(8)?,
    tracking:        tracking_at(row, 9)?,
  })
}

pub const OPPORTUNITY_COLUMNS: &str = "opportunity_id, reference, \
                                       sequence_number, organization_id, \
                                       client_id, main_product_id, \
                                       estimated_amount";

pub fn opportunity_from_row(row: &Row<'_>) -> rusqlite::Result<Opportunity> {
  Ok(Opportunity {
    opportunity_id:   row.get(0)?,
    reference:        row.get(1)?,
    sequence_number:  row.get(2)?,
    organization_id:  row.get(3)?,
    client_id:        row.get(4)?,
    main_product_id:  row.get(5)?,
    estimated_amount: row.get(6)?,
    tracking:         tracking_at(row, 7)?,
  })
}

pub const CORRESPONDENCE_COLUMNS: &str = "correspondence_id, reference, \
                                          sequence_number, organization_id, \
                                          client_id, direction, kind_code, \
                                          subject_line";

pub fn correspondence_from_row(row: &Row<'_>) -> rusqlite::Result<Correspondence> {
  let direction: String = row.get(5)?;
  let direction = direction.parse::<Direction>().map_err(|e| {
    rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e))
  })?;
  Ok(Correspondence {
    correspondence_id: row.get(0)?,
    reference: row.get(1)?,
    sequence_number: row.get(2)?,
    organization_id: row.get(3)?,
    client_id: row.get(4)?,
    direction,
    kind_code: row.get(6)?,
    subject_line: row.get(7)?,
    tracking: tracking_at(row, 8)?,
  })
}

pub const TRAINING_COLUMNS: &str = "training_id, report_id, affair_id, \
                                    client_id, title, certificate_reference, \
                                    created_at";

pub struct RawTraining {
  pub training_id:           i64,
  pub report_id:             i64,
  pub affair_id:             i64,
  pub client_id:             i64,
  pub title:                 String,
  pub certificate_reference: String,
  pub created_at:            String,
}

impl RawTraining {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      training_id:           row.get(0)?,
      report_id:             row.get(1)?,
      affair_id:             row.get(2)?,
      client_id:             row.get(3)?,
      title:                 row.get(4)?,
      certificate_reference: row.get(5)?,
      created_at:            row.get(6)?,
    })
  }

  pub fn into_training(self) -> Result<Training> {
    Ok(Training {
      training_id:           self.training_id,
      report_id:             self.report_id,
      affair_id:             self.affair_id,
      client_id:             self.client_id,
      title:                 self.title,
      certificate_reference: self.certificate_reference,
      created_at:            decode_dt(&self.created_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn timestamps_are_fixed_width_and_round_trip() {
    let at = now();
    let encoded = encode_dt(at);
    assert!(encoded.ends_with('Z'));
    assert_eq!(encoded.len(), "2025-06-01T00:00:00.000000Z".len());
    assert_eq!(decode_dt(&encoded).unwrap(), at);
  }

  #[test]
  fn bad_timestamp_is_a_parse_error() {
    assert!(matches!(decode_dt("yesterday"), Err(Error::DateParse(_))));
  }
}
