//! Subject references: the polymorphic pointer carried by every tracking row
//! and change record.
//!
//! A subject is identified by a type tag plus the numeric id of the row in
//! that type's table. The tag also selects the status choice set.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use strum::VariantNames as _;

use crate::{
  Error, Result,
  status::{
    AffairStatus, CorrespondenceStatus, InvoiceStatus, OfferStatus,
    OpportunityStatus, ProformaStatus, ReportStatus, TrackedStatus,
  },
};

/// Identifier of a user row.
pub type UserId = i64;

/// The kind of tracked entity a subject points at.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::IntoStaticStr,
  strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubjectType {
  Offer,
  Affair,
  Opportunity,
  Proforma,
  Invoice,
  Report,
  Correspondence,
}

impl SubjectType {
  /// The tag stored in `subject_type` columns.
  pub fn as_str(self) -> &'static str { self.into() }

  /// Parse a stored tag.
  pub fn parse(tag: &str) -> Result<Self> {
    tag
      .parse()
      .map_err(|_| Error::UnknownSubjectType(tag.to_owned()))
  }

  /// The declared status choice set for this subject type.
  pub fn choices(self) -> &'static [&'static str] {
    match self {
      Self::Offer => OfferStatus::VARIANTS,
      Self::Affair => AffairStatus::VARIANTS,
      Self::Opportunity => OpportunityStatus::VARIANTS,
      Self::Proforma => ProformaStatus::VARIANTS,
      Self::Invoice => InvoiceStatus::VARIANTS,
      Self::Report => ReportStatus::VARIANTS,
      Self::Correspondence => CorrespondenceStatus::VARIANTS,
    }
  }

  /// The status a freshly created subject of this type starts in.
  pub fn initial_status(self) -> &'static str {
    match self {
      Self::Offer => OfferStatus::INITIAL.as_str(),
      Self::Affair => AffairStatus::INITIAL.as_str(),
      Self::Opportunity => OpportunityStatus::INITIAL.as_str(),
      Self::Proforma => ProformaStatus::INITIAL.as_str(),
      Self::Invoice => InvoiceStatus::INITIAL.as_str(),
      Self::Report => ReportStatus::INITIAL.as_str(),
      Self::Correspondence => CorrespondenceStatus::INITIAL.as_str(),
    }
  }

  pub fn is_valid_status(self, status: &str) -> bool {
    self.choices().contains(&status)
  }

  /// Fail with [`Error::InvalidStatus`] unless `status` is a declared choice.
  pub fn validate_status(self, status: &str) -> Result<()> {
    if self.is_valid_status(status) {
      Ok(())
    } else {
      Err(Error::InvalidStatus {
        subject_type: self,
        status:       status.to_owned(),
        allowed:      self.choices(),
      })
    }
  }
}

/// A `(type, id)` pair pointing at one tracked row.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SubjectRef {
  pub subject_type: SubjectType,
  pub subject_id:   i64,
}

impl SubjectRef {
  pub fn new(subject_type: SubjectType, subject_id: i64) -> Self {
    Self { subject_type, subject_id }
  }

  pub fn offer(id: i64) -> Self { Self::new(SubjectType::Offer, id) }

  pub fn affair(id: i64) -> Self { Self::new(SubjectType::Affair, id) }

  pub fn opportunity(id: i64) -> Self {
    Self::new(SubjectType::Opportunity, id)
  }

  pub fn proforma(id: i64) -> Self { Self::new(SubjectType::Proforma, id) }

  pub fn invoice(id: i64) -> Self { Self::new(SubjectType::Invoice, id) }

  pub fn report(id: i64) -> Self { Self::new(SubjectType::Report, id) }

  pub fn correspondence(id: i64) -> Self {
    Self::new(SubjectType::Correspondence, id)
  }
}

impl fmt::Display for SubjectRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.subject_type, self.subject_id)
  }
}

/// Parses the `offer:12` form used on the command line.
impl FromStr for SubjectRef {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let (tag, id) = s
      .split_once(':')
      .ok_or_else(|| Error::InvalidSubjectRef(s.to_owned()))?;
    let subject_type = SubjectType::parse(tag)?;
    let subject_id = id
      .parse()
      .map_err(|_| Error::InvalidSubjectRef(s.to_owned()))?;
    Ok(Self { subject_type, subject_id })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn subject_ref_parses_and_displays() {
    let subject: SubjectRef = "affair:42".parse().unwrap();
    assert_eq!(subject, SubjectRef::affair(42));
    assert_eq!(subject.to_string(), "affair:42");
  }

  #[test]
  fn subject_ref_rejects_garbage() {
    assert!(matches!(
      "affair".parse::<SubjectRef>(),
      Err(Error::InvalidSubjectRef(_))
    ));
    assert!(matches!(
      "widget:1".parse::<SubjectRef>(),
      Err(Error::UnknownSubjectType(_))
    ));
    assert!(matches!(
      "offer:x".parse::<SubjectRef>(),
      Err(Error::InvalidSubjectRef(_))
    ));
  }

  #[test]
  fn choice_sets_use_stored_spelling() {
    assert_eq!(
      SubjectType::Affair.choices(),
      &["DRAFT", "VALIDATED", "IN_PROGRESS", "PAUSED", "DONE", "CANCELLED"]
    );
    assert_eq!(SubjectType::Opportunity.initial_status(), "PROSPECT");
    assert!(SubjectType::Invoice.is_valid_status("PARTIALLY_PAID"));
    assert!(!SubjectType::Offer.is_valid_status("won"));
  }

  #[test]
  fn validate_status_lists_allowed_values() {
    let err = SubjectType::Offer
      .validate_status("NOT_A_REAL_STATUS")
      .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("NOT_A_REAL_STATUS"));
    assert!(message.contains("DRAFT, SENT, NEGOTIATING, WON, LOST"));
  }
}
