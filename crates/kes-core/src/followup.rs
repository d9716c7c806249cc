//! Follow-up reminders and pipeline probabilities.

use chrono::{DateTime, Duration, Utc};

use crate::{
  status::{OfferStatus, OpportunityStatus, TrackedStatus},
  subject::SubjectType,
  tracking::Tracking,
};

/// How long after entering `status` a subject of `subject_type` should be
/// followed up, if at all.
pub fn follow_up_delay(subject_type: SubjectType, status: &str) -> Option<Duration> {
  let days = match subject_type {
    SubjectType::Offer => match OfferStatus::parse_status(status)? {
      OfferStatus::Sent => 1,
      OfferStatus::Negotiating => 5,
      _ => return None,
    },
    SubjectType::Opportunity => match OpportunityStatus::parse_status(status)? {
      OpportunityStatus::Prospect => 14,
      OpportunityStatus::Qualification => 10,
      OpportunityStatus::Proposal => 7,
      OpportunityStatus::Negotiation => 5,
      _ => return None,
    },
    _ => return None,
  };
  Some(Duration::days(days))
}

/// The next reminder for a subject: one delay after it entered its current
/// status, pushed forward in whole delays until it is no longer in the past.
pub fn next_follow_up(
  tracking: &Tracking,
  now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
  let delay = follow_up_delay(tracking.subject.subject_type, &tracking.status)?;
  let since = tracking.current_since().unwrap_or(tracking.updated_at);

  let first = since + delay;
  if first >= now {
    return Some(first);
  }
  let overdue = (now - first).num_seconds();
  let step = delay.num_seconds();
  let periods = (overdue + step - 1) / step;
  let shift = Duration::try_seconds(step.checked_mul(periods)?)?;
  first.checked_add_signed(shift)
}

/// Conversion probability, in percent, of an opportunity at `status`.
pub fn win_probability(status: OpportunityStatus) -> u8 {
  match status {
    OpportunityStatus::Prospect => 10,
    OpportunityStatus::Qualification => 30,
    OpportunityStatus::Proposal => 50,
    OpportunityStatus::Negotiation => 75,
    OpportunityStatus::Won => 100,
    OpportunityStatus::Lost => 0,
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;
  use crate::{
    change::StatusChangeRequest, status::AffairStatus, subject::SubjectRef,
  };

  fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, day, hour, 0, 0).unwrap()
  }

  fn sent_offer(sent_at: DateTime<Utc>) -> Tracking {
    let tracking = Tracking::new(SubjectRef::offer(1), None, at(1, 8));
    tracking
      .plan(&StatusChangeRequest::to(OfferStatus::Sent), sent_at)
      .unwrap()
      .unwrap()
      .tracking
  }

  #[test]
  fn draft_offers_are_not_followed_up() {
    let tracking = Tracking::new(SubjectRef::offer(1), None, at(1, 8));
    assert_eq!(next_follow_up(&tracking, at(2, 8)), None);
  }

  #[test]
  fn sent_offer_is_followed_up_next_day() {
    let tracking = sent_offer(at(2, 9));
    assert_eq!(next_follow_up(&tracking, at(2, 10)), Some(at(3, 9)));
  }

  #[test]
  fn overdue_follow_up_rolls_forward() {
    let tracking = sent_offer(at(2, 9));
    // Three and a half days later: 3rd, 4th, 5th have passed.
    assert_eq!(next_follow_up(&tracking, at(5, 21)), Some(at(6, 9)));
    // Exactly on a reminder boundary it stays put.
    assert_eq!(next_follow_up(&tracking, at(4, 9)), Some(at(4, 9)));
  }

  #[test]
  fn decades_overdue_still_rolls_forward() {
    let tracking = sent_offer(at(2, 9));
    let now = Utc.with_ymd_and_hms(2085, 6, 2, 21, 0, 0).unwrap();
    assert_eq!(
      next_follow_up(&tracking, now),
      Some(Utc.with_ymd_and_hms(2085, 6, 3, 9, 0, 0).unwrap())
    );
  }

  #[test]
  fn reminder_past_the_calendar_end_is_none() {
    let tracking = sent_offer(at(2, 9));
    assert_eq!(next_follow_up(&tracking, DateTime::<Utc>::MAX_UTC), None);
  }

  #[test]
  fn opportunity_delays_follow_the_stage() {
    let tracking = Tracking::new(SubjectRef::opportunity(1), None, at(1, 0));
    assert_eq!(next_follow_up(&tracking, at(1, 0)), Some(at(15, 0)));
    assert_eq!(
      follow_up_delay(SubjectType::Opportunity, "NEGOTIATION"),
      Some(Duration::days(5))
    );
    assert_eq!(follow_up_delay(SubjectType::Opportunity, "WON"), None);
  }

  #[test]
  fn other_subjects_have_no_reminders() {
    assert_eq!(
      follow_up_delay(SubjectType::Affair, AffairStatus::Validated.as_str()),
      None
    );
  }

  #[test]
  fn probabilities_by_stage() {
    assert_eq!(win_probability(OpportunityStatus::Prospect), 10);
    assert_eq!(win_probability(OpportunityStatus::Negotiation), 75);
    assert_eq!(win_probability(OpportunityStatus::Lost), 0);
  }
}
