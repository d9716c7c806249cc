//! Tracking rows and the change log, on a borrowed connection.
//!
//! Callers open the transaction; these helpers only issue statements, so a
//! document insert, its tracking row and its creation record commit or roll
//! back together.

use chrono::{DateTime, Utc};
use kes_core::{
  change::{NewStatusChange, StatusChangeRecord, StatusChangeRequest},
  subject::{SubjectRef, UserId},
  tracking::Tracking,
};
use rusqlite::{Connection, OptionalExtension as _, params};

use crate::{
  Error, Result,
  encode::{
    CHANGE_COLUMNS, RawChange, RawTracking, TRACKING_COLUMNS, encode_dt,
    encode_metadata, encode_status_dates,
  },
  error::is_unique_violation,
};

pub fn load_tracking(
  conn: &Connection,
  subject: SubjectRef,
) -> Result<Option<Tracking>> {
  let raw = conn
    .query_row(
      &format!(
        "SELECT {TRACKING_COLUMNS} FROM tracking
         WHERE subject_type = ?1 AND subject_id = ?2"
      ),
      params![subject.subject_type.as_str(), subject.subject_id],
      |row| RawTracking::from_row_at(row, 0),
    )
    .optional()?;
  raw.map(RawTracking::into_tracking).transpose()
}

pub fn require_tracking(conn: &Connection, subject: SubjectRef) -> Result<Tracking> {
  load_tracking(conn, subject)?.ok_or(Error::SubjectNotFound(subject))
}

fn insert_tracking(conn: &Connection, tracking: &Tracking) -> Result<()> {
  conn.execute(
    &format!("INSERT INTO tracking ({TRACKING_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
    params![
      tracking.subject.subject_type.as_str(),
      tracking.subject.subject_id,
      tracking.status,
      encode_status_dates(&tracking.status_dates)?,
      encode_dt(tracking.created_at),
      encode_dt(tracking.updated_at),
      tracking.created_by,
      tracking.updated_by,
    ],
  )?;
  Ok(())
}

/// Overwrite the mutable columns of an existing tracking row.
pub fn save_tracking(conn: &Connection, tracking: &Tracking) -> Result<()> {
  let updated = conn.execute(
    "UPDATE tracking
     SET status = ?3, status_dates = ?4, updated_at = ?5, updated_by = ?6
     WHERE subject_type = ?1 AND subject_id = ?2",
    params![
      tracking.subject.subject_type.as_str(),
      tracking.subject.subject_id,
      tracking.status,
      encode_status_dates(&tracking.status_dates)?,
      encode_dt(tracking.updated_at),
      tracking.updated_by,
    ],
  )?;
  if updated == 0 {
    return Err(Error::SubjectNotFound(tracking.subject));
  }
  Ok(())
}

/// Append one record to `status_changes`.
pub fn append_change(
  conn: &Connection,
  change: &NewStatusChange,
  changed_at: DateTime<Utc>,
) -> Result<StatusChangeRecord> {
  let change_id: i64 = conn
    .query_row(
      "INSERT INTO status_changes
         (subject_type, subject_id, previous_status, new_status,
          changed_at, actor, comment, metadata)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
       RETURNING change_id",
      params![
        change.subject.subject_type.as_str(),
        change.subject.subject_id,
        change.previous_status,
        change.new_status,
        encode_dt(changed_at),
        change.actor,
        change.comment,
        encode_metadata(&change.metadata)?,
      ],
      |r| r.get(0),
    )
    .map_err(|e| {
      if is_unique_violation(&e, "subject_id") {
        Error::DuplicateCreationRecord(change.subject)
      } else {
        e.into()
      }
    })?;

  Ok(StatusChangeRecord {
    change_id,
    subject: change.subject,
    previous_status: change.previous_status.clone(),
    new_status: change.new_status.clone(),
    changed_at,
    actor: change.actor,
    comment: change.comment.clone(),
    metadata: change.metadata.clone(),
  })
}

/// Start tracking a newly inserted subject: initial status, seeded status
/// date and the creation record.
pub fn start_tracking(
  conn: &Connection,
  subject: SubjectRef,
  actor: Option<UserId>,
  now: DateTime<Utc>,
) -> Result<Tracking> {
  let tracking = Tracking::new(subject, actor, now);
  insert_tracking(conn, &tracking)?;
  append_change(conn, &NewStatusChange::creation(subject, actor), now)?;
  Ok(tracking)
}

/// Plan and write a transition on an already loaded tracking row.
pub fn apply_transition(
  conn: &Connection,
  tracking: &Tracking,
  request: &StatusChangeRequest,
  now: DateTime<Utc>,
) -> Result<Option<StatusChangeRecord>> {
  let Some(plan) = tracking.plan(request, now)? else {
    return Ok(None);
  };
  save_tracking(conn, &plan.tracking)?;
  let record = append_change(conn, &plan.change, now)?;
  Ok(Some(record))
}

/// Bump the audit columns of a subject edited without a status change.
pub fn touch(
  conn: &Connection,
  subject: SubjectRef,
  actor: Option<UserId>,
  now: DateTime<Utc>,
) -> Result<()> {
  conn.execute(
    "UPDATE tracking
     SET updated_at = ?3, updated_by = COALESCE(?4, updated_by)
     WHERE subject_type = ?1 AND subject_id = ?2",
    params![
      subject.subject_type.as_str(),
      subject.subject_id,
      encode_dt(now),
      actor,
    ],
  )?;
  Ok(())
}

pub fn has_creation_record(conn: &Connection, subject: SubjectRef) -> Result<bool> {
  Ok(
    conn
      .query_row(
        "SELECT 1 FROM status_changes
         WHERE subject_type = ?1 AND subject_id = ?2 AND previous_status = ''",
        params![subject.subject_type.as_str(), subject.subject_id],
        |_| Ok(true),
      )
      .optional()?
      .unwrap_or(false),
  )
}

/// Change records of a subject, newest first.
pub fn history(
  conn: &Connection,
  subject: SubjectRef,
) -> Result<Vec<StatusChangeRecord>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {CHANGE_COLUMNS} FROM status_changes
     WHERE subject_type = ?1 AND subject_id = ?2
     ORDER BY changed_at DESC, change_id DESC"
  ))?;
  let raws = stmt
    .query_map(
      params![subject.subject_type.as_str(), subject.subject_id],
      RawChange::from_row,
    )?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawChange::into_record).collect()
}
