//! Document rows: lookups, inserts and the get-or-create cascades.
//!
//! Like [`crate::tracking`], every function takes a connection the caller
//! has already put inside a transaction.

use chrono::{DateTime, Utc};
use kes_core::{
  change::{Metadata, NewStatusChange, StatusChangeRecord, StatusChangeRequest},
  document::{
    Affair, Cents, Correspondence, DEFAULT_VAT_RATE_BP, Ensured, Invoice,
    NewCorrespondence, NewOffer, NewOpportunity, Offer, OfferLine, Opportunity,
    Proforma, Report, Training,
  },
  party::Product,
  reference::DocumentType,
  status::InvoiceStatus,
  subject::{SubjectRef, SubjectType, UserId},
};
use rusqlite::{Connection, OptionalExtension as _, Params, Row, params};
use serde_json::json;

use crate::{
  Error, Result,
  encode::{
    AFFAIR_COLUMNS, CORRESPONDENCE_COLUMNS, INVOICE_COLUMNS, OFFER_COLUMNS,
    OPPORTUNITY_COLUMNS, PRODUCT_COLUMNS, PROFORMA_COLUMNS, REPORT_COLUMNS,
    RawTraining, TRAINING_COLUMNS, affair_from_row, correspondence_from_row,
    encode_dt, invoice_from_row, offer_from_row, offer_line_from_row,
    opportunity_from_row, product_from_row, proforma_from_row, report_from_row,
    tracked_select,
  },
  sequence::{mint, reference_conflict, request_for},
  tracking::{append_change, apply_transition, start_tracking, touch},
};

// ─── Generic lookups ─────────────────────────────────────────────────────────

fn query_one<T, P: Params>(
  conn: &Connection,
  columns: &str,
  subject_type: SubjectType,
  filter: &str,
  params: P,
  map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Option<T>> {
  let sql = format!("{} WHERE {filter}", tracked_select(columns, subject_type));
  Ok(conn.query_row(&sql, params, map).optional()?)
}

fn query_all<T, P: Params>(
  conn: &Connection,
  columns: &str,
  subject_type: SubjectType,
  filter: &str,
  params: P,
  map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
  let sql = format!(
    "{} WHERE {filter} ORDER BY t.subject_id",
    tracked_select(columns, subject_type)
  );
  let mut stmt = conn.prepare(&sql)?;
  let rows = stmt
    .query_map(params, map)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

pub fn product(conn: &Connection, product_id: i64) -> Result<Product> {
  conn
    .query_row(
      &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE product_id = ?1"),
      params![product_id],
      product_from_row,
    )
    .optional()?
    .ok_or(Error::NotFound { what: "product", id: product_id })
}

fn username(conn: &Connection, user_id: UserId) -> Result<Option<String>> {
  Ok(
    conn
      .query_row(
        "SELECT username FROM users WHERE user_id = ?1",
        params![user_id],
        |r| r.get(0),
      )
      .optional()?,
  )
}

// ─── Offers ──────────────────────────────────────────────────────────────────

fn offer_lines(conn: &Connection, offer_id: i64) -> Result<Vec<OfferLine>> {
  let mut stmt = conn.prepare(
    "SELECT product_id, quantity, unit_price FROM offer_lines
     WHERE offer_id = ?1 ORDER BY rowid",
  )?;
  let lines = stmt
    .query_map(params![offer_id], offer_line_from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(lines)
}

fn with_lines(conn: &Connection, offer: Option<Offer>) -> Result<Option<Offer>> {
  offer
    .map(|mut offer| {
      offer.lines = offer_lines(conn, offer.offer_id)?;
      Ok(offer)
    })
    .transpose()
}

pub fn load_offer(conn: &Connection, offer_id: i64) -> Result<Option<Offer>> {
  let offer = query_one(
    conn,
    OFFER_COLUMNS,
    SubjectType::Offer,
    "d.offer_id = ?1",
    params![offer_id],
    offer_from_row,
  )?;
  with_lines(conn, offer)
}

pub fn require_offer(conn: &Connection, offer_id: i64) -> Result<Offer> {
  load_offer(conn, offer_id)?.ok_or(Error::NotFound { what: "offer", id: offer_id })
}

fn offer_for_opportunity(
  conn: &Connection,
  opportunity_id: i64,
) -> Result<Option<Offer>> {
  let offer = query_one(
    conn,
    OFFER_COLUMNS,
    SubjectType::Offer,
    "d.opportunity_id = ?1",
    params![opportunity_id],
    offer_from_row,
  )?;
  with_lines(conn, offer)
}

/// Insert an offer, its lines, its tracking row and its creation record.
pub fn insert_offer(
  conn: &Connection,
  input: &NewOffer,
  opportunity_id: Option<i64>,
  now: DateTime<Utc>,
) -> Result<Offer> {
  let main = product(conn, input.main_product_id)?;
  let request = request_for(
    conn,
    DocumentType::Offer,
    input.organization_id,
    input.client_id,
    now.date_naive(),
    vec![main.code],
  )?;
  let minted = mint(conn, &request, input.client_id)?;

  conn
    .execute(
      "INSERT INTO offers
         (reference, sequence_number, organization_id, client_id,
          main_product_id, opportunity_id, amount, notes)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
      params![
        minted.reference,
        minted.sequence,
        input.organization_id,
        input.client_id,
        input.main_product_id,
        opportunity_id,
        input.amount,
        input.notes,
      ],
    )
    .map_err(|e| reference_conflict(e, &minted.reference))?;
  let offer_id = conn.last_insert_rowid();

  for line in &input.lines {
    conn.execute(
      "INSERT INTO offer_lines (offer_id, product_id, quantity, unit_price)
       VALUES (?1, ?2, ?3, ?4)",
      params![offer_id, line.product_id, line.quantity, line.unit_price],
    )?;
  }

  let tracking =
    start_tracking(conn, SubjectRef::offer(offer_id), input.created_by, now)?;

  Ok(Offer {
    offer_id,
    reference: minted.reference,
    sequence_number: minted.sequence,
    organization_id: input.organization_id,
    client_id: input.client_id,
    main_product_id: input.main_product_id,
    opportunity_id,
    amount: input.amount,
    notes: input.notes.clone(),
    lines: input.lines.clone(),
    tracking,
  })
}

/// Delete an offer with no proforma or affair yet, along with its lines and
/// tracking row. Its change records stay in the log.
pub fn delete_offer(conn: &Connection, offer_id: i64) -> Result<()> {
  let dependents: i64 = conn.query_row(
    "SELECT (SELECT COUNT(*) FROM proformas WHERE offer_id = ?1)
          + (SELECT COUNT(*) FROM affairs   WHERE offer_id = ?1)",
    params![offer_id],
    |r| r.get(0),
  )?;
  if dependents > 0 {
    return Err(Error::HasDependents { what: "offer", id: offer_id });
  }

  let deleted =
    conn.execute("DELETE FROM offers WHERE offer_id = ?1", params![offer_id])?;
  if deleted == 0 {
    return Err(Error::NotFound { what: "offer", id: offer_id });
  }
  conn.execute(
    "DELETE FROM tracking WHERE subject_type = ?1 AND subject_id = ?2",
    params![SubjectType::Offer.as_str(), offer_id],
  )?;
  Ok(())
}

pub fn offer_products(conn: &Connection, offer_id: i64) -> Result<Vec<Product>> {
  let offer = require_offer(conn, offer_id)?;
  let mut stmt = conn.prepare(
    "SELECT p.product_id, p.code, p.name, p.category_code
     FROM offer_lines l JOIN products p ON p.product_id = l.product_id
     WHERE l.offer_id = ?1
     ORDER BY l.rowid",
  )?;
  let products = stmt
    .query_map(params![offer_id], product_from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  if products.is_empty() {
    return Ok(vec![product(conn, offer.main_product_id)?]);
  }
  Ok(products)
}

// ─── Opportunities ───────────────────────────────────────────────────────────

pub fn load_opportunity(
  conn: &Connection,
  opportunity_id: i64,
) -> Result<Option<Opportunity>> {
  query_one(
    conn,
    OPPORTUNITY_COLUMNS,
    SubjectType::Opportunity,
    "d.opportunity_id = ?1",
    params![opportunity_id],
    opportunity_from_row,
  )
}

pub fn insert_opportunity(
  conn: &Connection,
  input: &NewOpportunity,
  now: DateTime<Utc>,
) -> Result<Opportunity> {
  let main = product(conn, input.main_product_id)?;
  let request = request_for(
    conn,
    DocumentType::Opportunity,
    input.organization_id,
    input.client_id,
    now.date_naive(),
    vec![main.code],
  )?;
  let minted = mint(conn, &request, input.client_id)?;

  conn
    .execute(
      "INSERT INTO opportunities
         (reference, sequence_number, organization_id, client_id,
          main_product_id, estimated_amount)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      params![
        minted.reference,
        minted.sequence,
        input.organization_id,
        input.client_id,
        input.main_product_id,
        input.estimated_amount,
      ],
    )
    .map_err(|e| reference_conflict(e, &minted.reference))?;
  let opportunity_id = conn.last_insert_rowid();
  let tracking = start_tracking(
    conn,
    SubjectRef::opportunity(opportunity_id),
    input.created_by,
    now,
  )?;

  Ok(Opportunity {
    opportunity_id,
    reference: minted.reference,
    sequence_number: minted.sequence,
    organization_id: input.organization_id,
    client_id: input.client_id,
    main_product_id: input.main_product_id,
    estimated_amount: input.estimated_amount,
    tracking,
  })
}

/// Get or create the offer drawn up from an opportunity.
pub fn convert_opportunity(
  conn: &Connection,
  opportunity_id: i64,
  actor: Option<UserId>,
  now: DateTime<Utc>,
) -> Result<Ensured<Offer>> {
  if let Some(offer) = offer_for_opportunity(conn, opportunity_id)? {
    return Ok(Ensured::existing(offer));
  }

  let opportunity = load_opportunity(conn, opportunity_id)?
    .ok_or(Error::NotFound { what: "opportunity", id: opportunity_id })?;
  if !opportunity.status()?.can_convert() {
    return Err(
      kes_core::Error::ConversionNotAllowed {
        status: opportunity.tracking.status.clone(),
      }
      .into(),
    );
  }

  let input = NewOffer {
    amount: opportunity.estimated_amount,
    created_by: actor,
    ..NewOffer::new(
      opportunity.organization_id,
      opportunity.client_id,
      opportunity.main_product_id,
    )
  };
  Ok(Ensured::created(insert_offer(conn, &input, Some(opportunity_id), now)?))
}

// ─── Correspondence ──────────────────────────────────────────────────────────

pub fn load_correspondence(
  conn: &Connection,
  correspondence_id: i64,
) -> Result<Option<Correspondence>> {
  query_one(
    conn,
    CORRESPONDENCE_COLUMNS,
    SubjectType::Correspondence,
    "d.correspondence_id = ?1",
    params![correspondence_id],
    correspondence_from_row,
  )
}

pub fn insert_correspondence(
  conn: &Connection,
  input: &NewCorrespondence,
  now: DateTime<Utc>,
) -> Result<Correspondence> {
  let request = request_for(
    conn,
    DocumentType::Correspondence,
    input.organization_id,
    input.client_id,
    now.date_naive(),
    vec![input.direction.as_str().to_owned(), input.kind_code.clone()],
  )?;
  let minted = mint(conn, &request, input.client_id)?;

  conn
    .execute(
      "INSERT INTO correspondences
         (reference, sequence_number, organization_id, client_id,
          direction, kind_code, subject_line)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
      params![
        minted.reference,
        minted.sequence,
        input.organization_id,
        input.client_id,
        input.direction.as_str(),
        input.kind_code,
        input.subject_line,
      ],
    )
    .map_err(|e| reference_conflict(e, &minted.reference))?;
  let correspondence_id = conn.last_insert_rowid();
  let tracking = start_tracking(
    conn,
    SubjectRef::correspondence(correspondence_id),
    input.created_by,
    now,
  )?;

  Ok(Correspondence {
    correspondence_id,
    reference: minted.reference,
    sequence_number: minted.sequence,
    organization_id: input.organization_id,
    client_id: input.client_id,
    direction: input.direction,
    kind_code: input.kind_code.clone(),
    subject_line: input.subject_line.clone(),
    tracking,
  })
}

// ─── Proformas ───────────────────────────────────────────────────────────────

pub fn proforma_for_offer(
  conn: &Connection,
  offer_id: i64,
) -> Result<Option<Proforma>> {
  query_one(
    conn,
    PROFORMA_COLUMNS,
    SubjectType::Proforma,
    "d.offer_id = ?1",
    params![offer_id],
    proforma_from_row,
  )
}

pub fn ensure_proforma(
  conn: &Connection,
  offer_id: i64,
  actor: Option<UserId>,
  now: DateTime<Utc>,
) -> Result<Ensured<Proforma>> {
  if let Some(proforma) = proforma_for_offer(conn, offer_id)? {
    return Ok(Ensured::existing(proforma));
  }

  let offer = require_offer(conn, offer_id)?;
  let request = request_for(
    conn,
    DocumentType::Proforma,
    offer.organization_id,
    offer.client_id,
    now.date_naive(),
    vec![offer_id.to_string()],
  )?;
  let minted = mint(conn, &request, offer.client_id)?;

  conn
    .execute(
      "INSERT INTO proformas
         (reference, sequence_number, offer_id, organization_id, client_id,
          amount_ht, vat_rate_bp)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
      params![
        minted.reference,
        minted.sequence,
        offer_id,
        offer.organization_id,
        offer.client_id,
        offer.amount,
        DEFAULT_VAT_RATE_BP,
      ],
    )
    .map_err(|e| reference_conflict(e, &minted.reference))?;
  let proforma_id = conn.last_insert_rowid();
  let tracking = start_tracking(conn, SubjectRef::proforma(proforma_id), actor, now)?;

  Ok(Ensured::created(Proforma {
    proforma_id,
    reference: minted.reference,
    sequence_number: minted.sequence,
    offer_id,
    organization_id: offer.organization_id,
    client_id: offer.client_id,
    amount_ht: offer.amount,
    vat_rate_bp: DEFAULT_VAT_RATE_BP,
    tracking,
  }))
}

// ─── Affairs ─────────────────────────────────────────────────────────────────

pub fn load_affair(conn: &Connection, affair_id: i64) -> Result<Option<Affair>> {
  query_one(
    conn,
    AFFAIR_COLUMNS,
    SubjectType::Affair,
    "d.affair_id = ?1",
    params![affair_id],
    affair_from_row,
  )
}

pub fn require_affair(conn: &Connection, affair_id: i64) -> Result<Affair> {
  load_affair(conn, affair_id)?.ok_or(Error::NotFound { what: "affair", id: affair_id })
}

pub fn affair_for_offer(conn: &Connection, offer_id: i64) -> Result<Option<Affair>> {
  query_one(
    conn,
    AFFAIR_COLUMNS,
    SubjectType::Affair,
    "d.offer_id = ?1",
    params![offer_id],
    affair_from_row,
  )
}

pub fn ensure_affair(
  conn: &Connection,
  offer_id: i64,
  actor: Option<UserId>,
  now: DateTime<Utc>,
) -> Result<Ensured<Affair>> {
  if let Some(affair) = affair_for_offer(conn, offer_id)? {
    return Ok(Ensured::existing(affair));
  }

  let offer = require_offer(conn, offer_id)?;
  let request = request_for(
    conn,
    DocumentType::Affair,
    offer.organization_id,
    offer.client_id,
    now.date_naive(),
    vec![offer_id.to_string()],
  )?;
  let minted = mint(conn, &request, offer.client_id)?;

  conn
    .execute(
      "INSERT INTO affairs
         (reference, sequence_number, offer_id, organization_id, client_id,
          total_amount)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      params![
        minted.reference,
        minted.sequence,
        offer_id,
        offer.organization_id,
        offer.client_id,
        offer.amount,
      ],
    )
    .map_err(|e| reference_conflict(e, &minted.reference))?;
  let affair_id = conn.last_insert_rowid();
  let tracking = start_tracking(conn, SubjectRef::affair(affair_id), actor, now)?;

  Ok(Ensured::created(Affair {
    affair_id,
    reference: minted.reference,
    sequence_number: minted.sequence,
    offer_id,
    organization_id: offer.organization_id,
    client_id: offer.client_id,
    total_amount: offer.amount,
    manager_id: None,
    tracking,
  }))
}

fn manager_marker(username: Option<&str>) -> String {
  format!("MANAGER:{}", username.unwrap_or("none"))
}

/// Hand an affair to another manager and log the handover. `None` when
/// `manager` already manages it.
pub fn assign_manager(
  conn: &Connection,
  affair_id: i64,
  manager: UserId,
  actor: Option<UserId>,
  comment: String,
  now: DateTime<Utc>,
) -> Result<Option<StatusChangeRecord>> {
  let affair = require_affair(conn, affair_id)?;
  if affair.manager_id == Some(manager) {
    return Ok(None);
  }

  let old_name = match affair.manager_id {
    Some(id) => username(conn, id)?,
    None => None,
  };
  let new_name =
    username(conn, manager)?.ok_or(Error::NotFound { what: "user", id: manager })?;

  conn.execute(
    "UPDATE affairs SET manager_id = ?2 WHERE affair_id = ?1",
    params![affair_id, manager],
  )?;
  touch(conn, affair.subject(), actor, now)?;

  let mut metadata = Metadata::new();
  metadata.insert("old_manager_id".into(), json!(affair.manager_id));
  metadata.insert("old_manager".into(), json!(old_name));
  metadata.insert("new_manager_id".into(), json!(manager));
  metadata.insert("new_manager".into(), json!(new_name));

  let change = NewStatusChange {
    subject: affair.subject(),
    previous_status: manager_marker(old_name.as_deref()),
    new_status: manager_marker(Some(&new_name)),
    actor,
    comment,
    metadata,
  };
  Ok(Some(append_change(conn, &change, now)?))
}

// ─── Reports and trainings ───────────────────────────────────────────────────

pub fn reports_for_affair(conn: &Connection, affair_id: i64) -> Result<Vec<Report>> {
  query_all(
    conn,
    REPORT_COLUMNS,
    SubjectType::Report,
    "d.affair_id = ?1",
    params![affair_id],
    report_from_row,
  )
}

fn load_report(conn: &Connection, report_id: i64) -> Result<Option<Report>> {
  query_one(
    conn,
    REPORT_COLUMNS,
    SubjectType::Report,
    "d.report_id = ?1",
    params![report_id],
    report_from_row,
  )
}

pub fn ensure_report(
  conn: &Connection,
  affair_id: i64,
  product_id: i64,
  actor: Option<UserId>,
  now: DateTime<Utc>,
) -> Result<Ensured<Report>> {
  let existing = query_one(
    conn,
    REPORT_COLUMNS,
    SubjectType::Report,
    "d.affair_id = ?1 AND d.product_id = ?2",
    params![affair_id, product_id],
    report_from_row,
  )?;
  if let Some(report) = existing {
    return Ok(Ensured::existing(report));
  }

  let affair = require_affair(conn, affair_id)?;
  let product = product(conn, product_id)?;
  let request = request_for(
    conn,
    DocumentType::Report,
    affair.organization_id,
    affair.client_id,
    now.date_naive(),
    vec![affair.reference.clone(), product.code],
  )?;
  let minted = mint(conn, &request, affair.client_id)?;

  conn
    .execute(
      "INSERT INTO reports
         (reference, sequence_number, affair_id, product_id, organization_id,
          client_id)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      params![
        minted.reference,
        minted.sequence,
        affair_id,
        product_id,
        affair.organization_id,
        affair.client_id,
      ],
    )
    .map_err(|e| reference_conflict(e, &minted.reference))?;
  let report_id = conn.last_insert_rowid();
  let tracking = start_tracking(conn, SubjectRef::report(report_id), actor, now)?;

  Ok(Ensured::created(Report {
    report_id,
    reference: minted.reference,
    sequence_number: minted.sequence,
    affair_id,
    product_id,
    organization_id: affair.organization_id,
    client_id: affair.client_id,
    tracking,
  }))
}

fn query_trainings<P: Params>(
  conn: &Connection,
  filter: &str,
  params: P,
) -> Result<Vec<Training>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {TRAINING_COLUMNS} FROM trainings WHERE {filter} ORDER BY training_id"
  ))?;
  let raws = stmt
    .query_map(params, RawTraining::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawTraining::into_training).collect()
}

pub fn trainings_for_affair(
  conn: &Connection,
  affair_id: i64,
) -> Result<Vec<Training>> {
  query_trainings(conn, "affair_id = ?1", params![affair_id])
}

pub fn ensure_training(
  conn: &Connection,
  report_id: i64,
  now: DateTime<Utc>,
) -> Result<Ensured<Training>> {
  if let Some(training) =
    query_trainings(conn, "report_id = ?1", params![report_id])?.pop()
  {
    return Ok(Ensured::existing(training));
  }

  let report = load_report(conn, report_id)?
    .ok_or(Error::NotFound { what: "report", id: report_id })?;
  let affair = require_affair(conn, report.affair_id)?;
  let product = product(conn, report.product_id)?;
  let request = request_for(
    conn,
    DocumentType::TrainingCertificate,
    affair.organization_id,
    affair.client_id,
    now.date_naive(),
    vec![affair.reference.clone(), report_id.to_string()],
  )?;
  let minted = mint(conn, &request, affair.client_id)?;

  conn
    .execute(
      "INSERT INTO trainings
         (report_id, affair_id, client_id, title, certificate_reference,
          created_at)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      params![
        report_id,
        affair.affair_id,
        affair.client_id,
        product.name,
        minted.reference,
        encode_dt(now),
      ],
    )
    .map_err(|e| reference_conflict(e, &minted.reference))?;

  Ok(Ensured::created(Training {
    training_id: conn.last_insert_rowid(),
    report_id,
    affair_id: affair.affair_id,
    client_id: affair.client_id,
    title: product.name,
    certificate_reference: minted.reference,
    created_at: now,
  }))
}

// ─── Invoices ────────────────────────────────────────────────────────────────

pub fn load_invoice(conn: &Connection, invoice_id: i64) -> Result<Option<Invoice>> {
  query_one(
    conn,
    INVOICE_COLUMNS,
    SubjectType::Invoice,
    "d.invoice_id = ?1",
    params![invoice_id],
    invoice_from_row,
  )
}

pub fn invoice_for_affair(
  conn: &Connection,
  affair_id: i64,
) -> Result<Option<Invoice>> {
  query_one(
    conn,
    INVOICE_COLUMNS,
    SubjectType::Invoice,
    "d.affair_id = ?1",
    params![affair_id],
    invoice_from_row,
  )
}

pub fn ensure_initial_invoice(
  conn: &Connection,
  affair_id: i64,
  actor: Option<UserId>,
  now: DateTime<Utc>,
) -> Result<Ensured<Invoice>> {
  if let Some(invoice) = invoice_for_affair(conn, affair_id)? {
    return Ok(Ensured::existing(invoice));
  }

  let affair = require_affair(conn, affair_id)?;
  let offer = require_offer(conn, affair.offer_id)?;
  let main = product(conn, offer.main_product_id)?;
  let request = request_for(
    conn,
    DocumentType::Invoice,
    affair.organization_id,
    affair.client_id,
    now.date_naive(),
    vec![affair.reference.clone(), main.code],
  )?;
  let minted = mint(conn, &request, affair.client_id)?;

  conn
    .execute(
      "INSERT INTO invoices
         (reference, sequence_number, affair_id, organization_id, client_id,
          amount_ht, vat_rate_bp, amount_paid)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
      params![
        minted.reference,
        minted.sequence,
        affair_id,
        affair.organization_id,
        affair.client_id,
        affair.total_amount,
        DEFAULT_VAT_RATE_BP,
      ],
    )
    .map_err(|e| reference_conflict(e, &minted.reference))?;
  let invoice_id = conn.last_insert_rowid();
  let tracking = start_tracking(conn, SubjectRef::invoice(invoice_id), actor, now)?;

  Ok(Ensured::created(Invoice {
    invoice_id,
    reference: minted.reference,
    sequence_number: minted.sequence,
    affair_id,
    organization_id: affair.organization_id,
    client_id: affair.client_id,
    amount_ht: affair.total_amount,
    vat_rate_bp: DEFAULT_VAT_RATE_BP,
    amount_paid: 0,
    tracking,
  }))
}

/// Set the paid total of an invoice and move it to the matching payment
/// status.
pub fn record_payment(
  conn: &Connection,
  invoice_id: i64,
  amount_paid: Cents,
  actor: Option<UserId>,
  now: DateTime<Utc>,
) -> Result<Invoice> {
  let invoice = load_invoice(conn, invoice_id)?
    .ok_or(Error::NotFound { what: "invoice", id: invoice_id })?;
  if invoice.status()? == InvoiceStatus::Cancelled {
    return Err(kes_core::Error::InvoiceCancelled(invoice_id).into());
  }

  conn.execute(
    "UPDATE invoices SET amount_paid = ?2 WHERE invoice_id = ?1",
    params![invoice_id, amount_paid],
  )?;

  let target = InvoiceStatus::for_payment(amount_paid, invoice.amounts().ttc);
  let mut request =
    StatusChangeRequest::to(target).with_metadata("amount_paid", amount_paid)?;
  request.actor = actor;
  if apply_transition(conn, &invoice.tracking, &request, now)?.is_none() {
    touch(conn, invoice.subject(), actor, now)?;
  }

  load_invoice(conn, invoice_id)?
    .ok_or(Error::NotFound { what: "invoice", id: invoice_id })
}

// ─── References ──────────────────────────────────────────────────────────────

pub fn stored_reference(conn: &Connection, subject: SubjectRef) -> Result<Option<String>> {
  let (table, id_col) = crate::encode::subject_table(subject.subject_type);
  Ok(
    conn
      .query_row(
        &format!("SELECT reference FROM {table} WHERE {id_col} = ?1"),
        params![subject.subject_id],
        |r| r.get(0),
      )
      .optional()?,
  )
}
