//! Typed status choice sets, one enum per tracked subject type.
//!
//! The tracking layer stores statuses as plain strings; these enums are the
//! single definition of which strings are legal and how they are spelled.

use serde::{Deserialize, Serialize};

use crate::subject::SubjectType;

/// A status enum bound to one subject type.
pub trait TrackedStatus:
  Copy + Into<&'static str> + std::str::FromStr + strum::VariantNames
{
  const SUBJECT_TYPE: SubjectType;
  /// The status new subjects of this type are created in.
  const INITIAL: Self;

  fn as_str(self) -> &'static str { self.into() }

  /// Parse a stored status string, `None` if it is not one of ours.
  fn parse_status(s: &str) -> Option<Self> { s.parse().ok() }
}

macro_rules! tracked_status {
  (
    $(#[$meta:meta])*
    $name:ident for $subject:ident, initial $initial:ident {
      $($variant:ident),+ $(,)?
    }
  ) => {
    $(#[$meta])*
    #[derive(
      Debug,
      Clone,
      Copy,
      PartialEq,
      Eq,
      Hash,
      Serialize,
      Deserialize,
      strum::Display,
      strum::EnumString,
      strum::IntoStaticStr,
      strum::VariantNames,
      strum::EnumIter,
    )]
    #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
    #[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
    pub enum $name {
      $($variant),+
    }

    impl TrackedStatus for $name {
      const SUBJECT_TYPE: SubjectType = SubjectType::$subject;
      const INITIAL: Self = Self::$initial;
    }
  };
}

tracked_status! {
  /// Commercial offer lifecycle.
  OfferStatus for Offer, initial Draft {
    Draft, Sent, Negotiating, Won, Lost,
  }
}

tracked_status! {
  /// Affair (contracted project) lifecycle.
  AffairStatus for Affair, initial Draft {
    Draft, Validated, InProgress, Paused, Done, Cancelled,
  }
}

tracked_status! {
  /// Sales-pipeline stages of an opportunity.
  OpportunityStatus for Opportunity, initial Prospect {
    Prospect, Qualification, Proposal, Negotiation, Won, Lost,
  }
}

tracked_status! {
  ProformaStatus for Proforma, initial Draft {
    Draft, InProgress, Validated, Refused, Expired, Cancelled,
  }
}

tracked_status! {
  InvoiceStatus for Invoice, initial Draft {
    Draft, Issued, Paid, Cancelled, Unpaid, PartiallyPaid,
  }
}

tracked_status! {
  ReportStatus for Report, initial Draft {
    Draft, Sent, Validated, Refused,
  }
}

tracked_status! {
  CorrespondenceStatus for Correspondence, initial Draft {
    Draft, Sent, Received, Archived, Pending, Processed,
  }
}

impl OfferStatus {
  /// Won and lost offers are closed; nothing follows up on them.
  pub fn is_closed(self) -> bool { matches!(self, Self::Won | Self::Lost) }
}

impl OpportunityStatus {
  pub fn is_closed(self) -> bool { matches!(self, Self::Won | Self::Lost) }

  /// Stages from which an offer may be drawn up.
  pub fn can_convert(self) -> bool {
    matches!(
      self,
      Self::Qualification | Self::Proposal | Self::Negotiation | Self::Won
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn statuses_round_trip_through_strings() {
    assert_eq!(InvoiceStatus::PartiallyPaid.as_str(), "PARTIALLY_PAID");
    assert_eq!(
      AffairStatus::parse_status("IN_PROGRESS"),
      Some(AffairStatus::InProgress)
    );
    assert_eq!(OfferStatus::parse_status("Won"), None);
    assert_eq!(OfferStatus::Won.to_string(), "WON");
  }

  #[test]
  fn serde_matches_strum_spelling() {
    let json = serde_json::to_string(&ProformaStatus::InProgress).unwrap();
    assert_eq!(json, "\"IN_PROGRESS\"");
  }
}
