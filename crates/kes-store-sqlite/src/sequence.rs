//! Sequence allocation and reference minting.
//!
//! Everything here runs on a connection already inside an IMMEDIATE
//! transaction: the write lock taken at `BEGIN` serialises concurrent
//! writers, so the counter read-increment and the document insert cannot
//! interleave with another minting call.

use chrono::NaiveDate;
use kes_core::reference::{DocumentType, ReferenceRequest, SequenceScope};
use rusqlite::{Connection, OptionalExtension as _, params};

use crate::{Error, Result, error::is_unique_violation};

/// The table holding documents of a type, for per-client counts.
pub fn document_table(doc_type: DocumentType) -> &'static str {
  match doc_type {
    DocumentType::Offer => "offers",
    DocumentType::Proforma => "proformas",
    DocumentType::Affair => "affairs",
    DocumentType::Invoice => "invoices",
    DocumentType::Report => "reports",
    DocumentType::TrainingCertificate => "trainings",
    DocumentType::Opportunity => "opportunities",
    DocumentType::Correspondence => "correspondences",
  }
}

/// A freshly minted reference and the sequence number it embeds.
#[derive(Debug, Clone)]
pub struct Minted {
  pub reference: String,
  pub sequence:  u32,
}

/// Build a reference request, looking up the organization code and the
/// client number.
pub fn request_for(
  conn: &Connection,
  doc_type: DocumentType,
  organization_id: i64,
  client_id: i64,
  date: NaiveDate,
  segments: Vec<String>,
) -> Result<ReferenceRequest> {
  let org_code: String = conn
    .query_row(
      "SELECT code FROM organizations WHERE organization_id = ?1",
      params![organization_id],
      |r| r.get(0),
    )
    .optional()?
    .ok_or(Error::NotFound { what: "organization", id: organization_id })?;
  let client_number: String = conn
    .query_row(
      "SELECT client_number FROM clients WHERE client_id = ?1",
      params![client_id],
      |r| r.get(0),
    )
    .optional()?
    .ok_or(Error::NotFound { what: "client", id: client_id })?;

  Ok(ReferenceRequest { org_code, doc_type, client_number, date, segments })
}

/// Number the next document of this type for this client would carry.
fn client_count(
  conn: &Connection,
  doc_type: DocumentType,
  client_id: i64,
) -> Result<u32> {
  let table = document_table(doc_type);
  let existing: u32 = conn.query_row(
    &format!("SELECT COUNT(*) FROM {table} WHERE client_id = ?1"),
    params![client_id],
    |r| r.get(0),
  )?;
  Ok(existing + 1)
}

fn next_sequence(conn: &Connection, scope: &SequenceScope) -> Result<u32> {
  Ok(conn.query_row(
    "INSERT INTO sequence_counters
       (org_code, scope_code, period, client_number, last_value)
     VALUES (?1, ?2, ?3, ?4, 1)
     ON CONFLICT (org_code, scope_code, period, client_number)
       DO UPDATE SET last_value = last_value + 1
     RETURNING last_value",
    params![
      scope.org_code,
      scope.scope_code,
      scope.period,
      scope.client_number.as_deref().unwrap_or(""),
    ],
    |r| r.get(0),
  )?)
}

fn peek_sequence(conn: &Connection, scope: &SequenceScope) -> Result<u32> {
  let last: Option<u32> = conn
    .query_row(
      "SELECT last_value FROM sequence_counters
       WHERE org_code = ?1 AND scope_code = ?2 AND period = ?3
         AND client_number = ?4",
      params![
        scope.org_code,
        scope.scope_code,
        scope.period,
        scope.client_number.as_deref().unwrap_or(""),
      ],
      |r| r.get(0),
    )
    .optional()?;
  Ok(last.unwrap_or(0) + 1)
}

/// Consume the next sequence number of the request's scope and render the
/// reference.
pub fn mint(
  conn: &Connection,
  request: &ReferenceRequest,
  client_id: i64,
) -> Result<Minted> {
  let count = client_count(conn, request.doc_type, client_id)?;
  let sequence = next_sequence(conn, &request.scope())?;
  Ok(Minted { reference: request.assemble(count, sequence), sequence })
}

/// The reference [`mint`] would produce right now, without consuming
/// anything.
pub fn preview(
  conn: &Connection,
  request: &ReferenceRequest,
  client_id: i64,
) -> Result<String> {
  let count = client_count(conn, request.doc_type, client_id)?;
  let sequence = peek_sequence(conn, &request.scope())?;
  Ok(request.assemble(count, sequence))
}

/// Map an insert failure, turning a clash on the `reference` column into
/// [`Error::DuplicateReference`].
pub fn reference_conflict(e: rusqlite::Error, reference: &str) -> Error {
  if is_unique_violation(&e, "reference")
    || is_unique_violation(&e, "certificate_reference")
  {
    Error::DuplicateReference { reference: reference.to_owned() }
  } else {
    e.into()
  }
}
