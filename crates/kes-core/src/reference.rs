//! Reference generation: the human-readable identifiers printed on every
//! business document.
//!
//! A reference embeds the issuing organization, the document type, the client
//! number, date parts, document-specific segments (a parent reference, a
//! product code…), a per-client running count and a zero-padded sequence
//! number. The sequence number is allocated by the store inside the insert
//! transaction; everything here is pure string assembly.
//!
//! ```text
//! KIP/OFF/c250601001/250615/AUD/1/0001      offer
//! KIP/FAC/c250601001/KIP/AFF/.../AUD/1/0001 invoice (embeds the affair ref)
//! KIP-OUT-LET-250615-c250601001-001         correspondence
//! ```

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::subject::SubjectType;

// ─── Document types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePrecision {
  /// `yymmdd`
  Day,
  /// `yymm`
  Month,
  /// No date segment.
  Omitted,
}

impl DatePrecision {
  pub fn render(self, date: NaiveDate) -> Option<String> {
    let yy = date.year().rem_euclid(100);
    match self {
      Self::Day => Some(format!("{yy:02}{:02}{:02}", date.month(), date.day())),
      Self::Month => Some(format!("{yy:02}{:02}", date.month())),
      Self::Omitted => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
  Offer,
  Proforma,
  Affair,
  Invoice,
  Report,
  TrainingCertificate,
  Opportunity,
  Correspondence,
}

impl DocumentType {
  /// The three-letter code embedded in references.
  pub fn code(self) -> &'static str {
    match self {
      Self::Offer => "OFF",
      Self::Proforma => "PRO",
      Self::Affair => "AFF",
      Self::Invoice => "FAC",
      Self::Report => "RAP",
      Self::TrainingCertificate => "ATT",
      Self::Opportunity => "OPP",
      Self::Correspondence => "COU",
    }
  }

  pub fn date_precision(self) -> DatePrecision {
    match self {
      Self::Offer
      | Self::Opportunity
      | Self::TrainingCertificate
      | Self::Correspondence => DatePrecision::Day,
      Self::Proforma | Self::Affair => DatePrecision::Month,
      Self::Invoice | Self::Report => DatePrecision::Omitted,
    }
  }

  /// Zero-padding width of the sequence number.
  pub fn sequence_width(self) -> usize {
    match self {
      Self::Proforma => 2,
      Self::Affair | Self::Correspondence => 3,
      _ => 4,
    }
  }

  /// Whether the per-client document count appears in the reference.
  pub fn counts_per_client(self) -> bool {
    !matches!(self, Self::Affair | Self::Correspondence)
  }

  /// Whether the sequence counter is kept separately for each client.
  pub fn sequence_per_client(self) -> bool {
    matches!(self, Self::Offer | Self::Opportunity)
  }

  /// The tracked subject type carrying this document's status, if any.
  pub fn subject_type(self) -> Option<SubjectType> {
    match self {
      Self::Offer => Some(SubjectType::Offer),
      Self::Proforma => Some(SubjectType::Proforma),
      Self::Affair => Some(SubjectType::Affair),
      Self::Invoice => Some(SubjectType::Invoice),
      Self::Report => Some(SubjectType::Report),
      Self::Opportunity => Some(SubjectType::Opportunity),
      Self::Correspondence => Some(SubjectType::Correspondence),
      Self::TrainingCertificate => None,
    }
  }
}

// ─── Sequencing scope ────────────────────────────────────────────────────────

/// The dimensions within which one sequence counter runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceScope {
  pub org_code:      String,
  /// Document code, widened with direction and kind for correspondence.
  pub scope_code:    String,
  /// `YYYY-MM` of the document date.
  pub period:        String,
  /// Set only for document types sequenced per client.
  pub client_number: Option<String>,
}

pub fn period_of(date: NaiveDate) -> String {
  format!("{:04}-{:02}", date.year(), date.month())
}

// ─── Request ─────────────────────────────────────────────────────────────────

/// Everything needed to mint a reference except the two counters the store
/// computes under its write lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceRequest {
  pub org_code:      String,
  pub doc_type:      DocumentType,
  pub client_number: String,
  pub date:          NaiveDate,
  /// Document-specific natural-key segments, in output order. For
  /// correspondence: direction then kind code.
  pub segments:      Vec<String>,
}

impl ReferenceRequest {
  pub fn scope(&self) -> SequenceScope {
    let scope_code = match self.doc_type {
      DocumentType::Correspondence => {
        let mut code = vec![self.doc_type.code()];
        code.extend(self.segments.iter().map(String::as_str));
        code.join("-")
      }
      other => other.code().to_owned(),
    };
    SequenceScope {
      org_code: self.org_code.clone(),
      scope_code,
      period: period_of(self.date),
      client_number: self
        .doc_type
        .sequence_per_client()
        .then(|| self.client_number.clone()),
    }
  }

  /// Render the reference for the given per-client count and sequence.
  pub fn assemble(&self, client_count: u32, sequence: u32) -> String {
    let width = self.doc_type.sequence_width();
    let seq = format!("{sequence:0width$}");
    let date = self.doc_type.date_precision().render(self.date);

    if self.doc_type == DocumentType::Correspondence {
      let mut parts = vec![self.org_code.clone()];
      parts.extend(self.segments.iter().cloned());
      parts.extend(date);
      parts.push(self.client_number.clone());
      parts.push(seq);
      return parts.join("-");
    }

    let mut parts = vec![
      self.org_code.clone(),
      self.doc_type.code().to_owned(),
      self.client_number.clone(),
    ];
    parts.extend(date);
    parts.extend(self.segments.iter().cloned());
    if self.doc_type.counts_per_client() {
      parts.push(client_count.to_string());
    }
    parts.push(seq);
    parts.join("/")
  }
}

// ─── Client numbers ──────────────────────────────────────────────────────────

/// Client number `c{yy}{mm}{dd}{n:03}`, where `ordinal` is the 1-based count
/// of clients registered in the same calendar year.
pub fn client_number(date: NaiveDate, ordinal: u32) -> String {
  let day = DatePrecision::Day.render(date).unwrap_or_default();
  format!("c{day}{ordinal:03}")
}

#[cfg(test)]
mod tests {
  use super::*;

  fn date() -> NaiveDate { NaiveDate::from_ymd_opt(2025, 6, 15).unwrap() }

  fn request(doc_type: DocumentType, segments: &[&str]) -> ReferenceRequest {
    ReferenceRequest {
      org_code: "KIP".into(),
      doc_type,
      client_number: "c250601001".into(),
      date: date(),
      segments: segments.iter().map(|s| s.to_string()).collect(),
    }
  }

  #[test]
  fn offer_layout() {
    let r = request(DocumentType::Offer, &["AUD"]);
    assert_eq!(r.assemble(3, 12), "KIP/OFF/c250601001/250615/AUD/3/0012");
  }

  #[test]
  fn proforma_layout_uses_month_and_two_digit_sequence() {
    let r = request(DocumentType::Proforma, &["17"]);
    assert_eq!(r.assemble(1, 4), "KIP/PRO/c250601001/2506/17/1/04");
  }

  #[test]
  fn affair_layout_has_no_client_count() {
    let r = request(DocumentType::Affair, &["17"]);
    assert_eq!(r.assemble(9, 7), "KIP/AFF/c250601001/2506/17/007");
  }

  #[test]
  fn invoice_layout_has_no_date() {
    let r = request(DocumentType::Invoice, &["KIP/AFF/c250601001/2506/17/007", "AUD"]);
    assert_eq!(
      r.assemble(2, 1),
      "KIP/FAC/c250601001/KIP/AFF/c250601001/2506/17/007/AUD/2/0001"
    );
  }

  #[test]
  fn certificate_layout() {
    let r = request(DocumentType::TrainingCertificate, &["AFFREF", "5"]);
    assert_eq!(r.assemble(1, 2), "KIP/ATT/c250601001/250615/AFFREF/5/1/0002");
  }

  #[test]
  fn correspondence_layout_is_dash_delimited() {
    let r = request(DocumentType::Correspondence, &["OUT", "LET"]);
    assert_eq!(r.assemble(0, 5), "KIP-OUT-LET-250615-c250601001-005");
    assert_eq!(r.scope().scope_code, "COU-OUT-LET");
  }

  #[test]
  fn sequence_longer_than_width_is_not_truncated() {
    let r = request(DocumentType::Proforma, &["1"]);
    assert!(r.assemble(1, 123).ends_with("/123"));
  }

  #[test]
  fn scope_is_monthly_and_per_client_only_where_declared() {
    let offer = request(DocumentType::Offer, &["AUD"]).scope();
    assert_eq!(offer.period, "2025-06");
    assert_eq!(offer.client_number.as_deref(), Some("c250601001"));

    let invoice = request(DocumentType::Invoice, &[]).scope();
    assert_eq!(invoice.scope_code, "FAC");
    assert_eq!(invoice.client_number, None);
  }

  #[test]
  fn client_number_format() {
    assert_eq!(client_number(date(), 1), "c250615001");
    let new_year = NaiveDate::from_ymd_opt(2030, 1, 2).unwrap();
    assert_eq!(client_number(new_year, 42), "c300102042");
  }
}
