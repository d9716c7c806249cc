//! The SQLite implementation of [`TrackingStore`]: [`SqliteStore`].

use std::path::Path;

use chrono::{DateTime, Datelike as _, Utc};
use kes_core::{
  change::{NewStatusChange, StatusChangeRecord, StatusChangeRequest},
  document::{
    Affair, Cents, Correspondence, DocumentDraft, Ensured, Invoice,
    NewCorrespondence, NewOffer, NewOpportunity, Offer, OfferUpdate, Opportunity,
    Proforma, Report, Training,
  },
  party::{Client, NewProduct, Organization, Product, User},
  reference::{self, DocumentType},
  store::TrackingStore,
  subject::{SubjectRef, UserId},
  tracking::Tracking,
};
use rusqlite::{Connection, TransactionBehavior, params};
use tracing::debug;

use crate::{
  Error, Result, documents,
  encode::{encode_dt, now},
  schema::SCHEMA,
  sequence,
  tracking::{
    append_change, apply_transition, has_creation_record, history, load_tracking,
    require_tracking, touch,
  },
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A KES store backed by a single SQLite file.
///
/// Clones share the inner connection.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open the database at `path`, creating the file and schema if needed.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, mostly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Run `f` inside an IMMEDIATE transaction, committing only if it
  /// succeeds. `f` receives the time at which the write lock was taken.
  async fn write<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&Connection, DateTime<Utc>) -> Result<T> + Send + 'static,
  {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = match f(&tx, now()) {
          Ok(out) => out,
          // Dropping the transaction rolls it back.
          Err(e) => return Ok(Err(e)),
        };
        tx.commit()?;
        Ok(Ok(out))
      })
      .await?
  }

  async fn read<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
  {
    self.conn.call(move |conn| Ok(f(conn))).await?
  }
}

#[cfg(test)]
impl SqliteStore {
  /// Run raw SQL outside any store operation, e.g. to install a trigger
  /// that makes a later write fail.
  pub(crate) async fn execute_batch(&self, sql: impl Into<String>) -> Result<()> {
    let sql = sql.into();
    self
      .conn
      .call(move |conn| {
        conn.execute_batch(&sql)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── TrackingStore impl ──────────────────────────────────────────────────────

impl TrackingStore for SqliteStore {
  type Error = Error;

  // ── Reference data ────────────────────────────────────────────────────────

  async fn add_user(&self, username: String) -> Result<User> {
    self
      .write(move |conn, _| {
        conn.execute("INSERT INTO users (username) VALUES (?1)", params![username])?;
        Ok(User { user_id: conn.last_insert_rowid(), username })
      })
      .await
  }

  async fn delete_user(&self, user_id: UserId) -> Result<()> {
    self
      .write(move |conn, _| {
        let deleted =
          conn.execute("DELETE FROM users WHERE user_id = ?1", params![user_id])?;
        if deleted == 0 {
          return Err(Error::NotFound { what: "user", id: user_id });
        }
        Ok(())
      })
      .await
  }

  async fn add_organization(&self, code: String, name: String) -> Result<Organization> {
    self
      .write(move |conn, _| {
        conn.execute(
          "INSERT INTO organizations (code, name) VALUES (?1, ?2)",
          params![code, name],
        )?;
        Ok(Organization { organization_id: conn.last_insert_rowid(), code, name })
      })
      .await
  }

  async fn add_client(&self, name: String) -> Result<Client> {
    self
      .write(move |conn, now| {
        let year = format!("{:04}", now.year());
        let same_year: u32 = conn.query_row(
          "SELECT COUNT(*) FROM clients WHERE substr(created_at, 1, 4) = ?1",
          params![year],
          |r| r.get(0),
        )?;
        let client_number = reference::client_number(now.date_naive(), same_year + 1);

        conn.execute(
          "INSERT INTO clients (name, client_number, created_at) VALUES (?1, ?2, ?3)",
          params![name, client_number, encode_dt(now)],
        )?;
        Ok(Client {
          client_id: conn.last_insert_rowid(),
          name,
          client_number,
          created_at: now,
        })
      })
      .await
  }

  async fn add_product(&self, product: NewProduct) -> Result<Product> {
    self
      .write(move |conn, _| {
        conn.execute(
          "INSERT INTO products (code, name, category_code) VALUES (?1, ?2, ?3)",
          params![product.code, product.name, product.category_code],
        )?;
        Ok(Product {
          product_id:    conn.last_insert_rowid(),
          code:          product.code,
          name:          product.name,
          category_code: product.category_code,
        })
      })
      .await
  }

  // ── Offers ────────────────────────────────────────────────────────────────

  async fn create_offer(&self, offer: NewOffer) -> Result<Offer> {
    let offer = self
      .write(move |conn, now| documents::insert_offer(conn, &offer, None, now))
      .await?;
    debug!(offer_id = offer.offer_id, reference = %offer.reference, "offer created");
    Ok(offer)
  }

  async fn get_offer(&self, offer_id: i64) -> Result<Option<Offer>> {
    self.read(move |conn| documents::load_offer(conn, offer_id)).await
  }

  async fn update_offer(&self, offer_id: i64, update: OfferUpdate) -> Result<Offer> {
    self
      .write(move |conn, now| {
        let updated = conn.execute(
          "UPDATE offers
           SET amount = COALESCE(?2, amount), notes = COALESCE(?3, notes)
           WHERE offer_id = ?1",
          params![offer_id, update.amount, update.notes],
        )?;
        if updated == 0 {
          return Err(Error::NotFound { what: "offer", id: offer_id });
        }
        touch(conn, SubjectRef::offer(offer_id), update.actor, now)?;
        documents::require_offer(conn, offer_id)
      })
      .await
  }

  async fn delete_offer(&self, offer_id: i64) -> Result<()> {
    self
      .write(move |conn, _| documents::delete_offer(conn, offer_id))
      .await
  }

  async fn offer_products(&self, offer_id: i64) -> Result<Vec<Product>> {
    self
      .read(move |conn| documents::offer_products(conn, offer_id))
      .await
  }

  // ── Opportunities and correspondence ──────────────────────────────────────

  async fn create_opportunity(&self, opportunity: NewOpportunity) -> Result<Opportunity> {
    self
      .write(move |conn, now| documents::insert_opportunity(conn, &opportunity, now))
      .await
  }

  async fn get_opportunity(&self, opportunity_id: i64) -> Result<Option<Opportunity>> {
    self
      .read(move |conn| documents::load_opportunity(conn, opportunity_id))
      .await
  }

  async fn convert_opportunity(
    &self,
    opportunity_id: i64,
    actor: Option<UserId>,
  ) -> Result<Ensured<Offer>> {
    self
      .write(move |conn, now| {
        documents::convert_opportunity(conn, opportunity_id, actor, now)
      })
      .await
  }

  async fn create_correspondence(
    &self,
    correspondence: NewCorrespondence,
  ) -> Result<Correspondence> {
    self
      .write(move |conn, now| {
        documents::insert_correspondence(conn, &correspondence, now)
      })
      .await
  }

  async fn get_correspondence(
    &self,
    correspondence_id: i64,
  ) -> Result<Option<Correspondence>> {
    self
      .read(move |conn| documents::load_correspondence(conn, correspondence_id))
      .await
  }

  // ── Dependent documents ───────────────────────────────────────────────────

  async fn proforma_for_offer(&self, offer_id: i64) -> Result<Option<Proforma>> {
    self
      .read(move |conn| documents::proforma_for_offer(conn, offer_id))
      .await
  }

  async fn get_affair(&self, affair_id: i64) -> Result<Option<Affair>> {
    self.read(move |conn| documents::load_affair(conn, affair_id)).await
  }

  async fn affair_for_offer(&self, offer_id: i64) -> Result<Option<Affair>> {
    self
      .read(move |conn| documents::affair_for_offer(conn, offer_id))
      .await
  }

  async fn reports_for_affair(&self, affair_id: i64) -> Result<Vec<Report>> {
    self
      .read(move |conn| documents::reports_for_affair(conn, affair_id))
      .await
  }

  async fn trainings_for_affair(&self, affair_id: i64) -> Result<Vec<Training>> {
    self
      .read(move |conn| documents::trainings_for_affair(conn, affair_id))
      .await
  }

  async fn get_invoice(&self, invoice_id: i64) -> Result<Option<Invoice>> {
    self
      .read(move |conn| documents::load_invoice(conn, invoice_id))
      .await
  }

  async fn invoice_for_affair(&self, affair_id: i64) -> Result<Option<Invoice>> {
    self
      .read(move |conn| documents::invoice_for_affair(conn, affair_id))
      .await
  }

  // ── Get-or-create ─────────────────────────────────────────────────────────

  async fn ensure_proforma(
    &self,
    offer_id: i64,
    actor: Option<UserId>,
  ) -> Result<Ensured<Proforma>> {
    self
      .write(move |conn, now| {
        documents::ensure_proforma(conn, offer_id, actor, now)
      })
      .await
  }

  async fn ensure_affair(
    &self,
    offer_id: i64,
    actor: Option<UserId>,
  ) -> Result<Ensured<Affair>> {
    self
      .write(move |conn, now| documents::ensure_affair(conn, offer_id, actor, now))
      .await
  }

  async fn ensure_report(
    &self,
    affair_id: i64,
    product_id: i64,
    actor: Option<UserId>,
  ) -> Result<Ensured<Report>> {
    self
      .write(move |conn, now| {
        documents::ensure_report(conn, affair_id, product_id, actor, now)
      })
      .await
  }

  async fn ensure_training(&self, report_id: i64) -> Result<Ensured<Training>> {
    self
      .write(move |conn, now| documents::ensure_training(conn, report_id, now))
      .await
  }

  async fn ensure_initial_invoice(
    &self,
    affair_id: i64,
    actor: Option<UserId>,
  ) -> Result<Ensured<Invoice>> {
    self
      .write(move |conn, now| {
        documents::ensure_initial_invoice(conn, affair_id, actor, now)
      })
      .await
  }

  // ── Status tracking ───────────────────────────────────────────────────────

  async fn tracking(&self, subject: SubjectRef) -> Result<Option<Tracking>> {
    self.read(move |conn| load_tracking(conn, subject)).await
  }

  async fn set_status(
    &self,
    subject: SubjectRef,
    request: StatusChangeRequest,
  ) -> Result<Option<StatusChangeRecord>> {
    // Reject unknown statuses before touching the database.
    request.validate(subject.subject_type)?;

    let record = self
      .write(move |conn, now| {
        let tracking = require_tracking(conn, subject)?;
        apply_transition(conn, &tracking, &request, now)
      })
      .await
      .map_err(|e| match e {
        Error::Database(_) | Error::Json(_) => {
          Error::TransitionPersistence { subject, source: Box::new(e) }
        }
        other => other,
      })?;

    if let Some(record) = &record {
      debug!(
        %subject,
        from = %record.previous_status,
        to = %record.new_status,
        "status changed"
      );
    }
    Ok(record)
  }

  async fn record_change(&self, change: NewStatusChange) -> Result<StatusChangeRecord> {
    self
      .write(move |conn, now| {
        require_tracking(conn, change.subject)?;
        if change.previous_status.is_empty()
          && has_creation_record(conn, change.subject)?
        {
          return Err(Error::DuplicateCreationRecord(change.subject));
        }
        append_change(conn, &change, now)
      })
      .await
  }

  async fn history_for(&self, subject: SubjectRef) -> Result<Vec<StatusChangeRecord>> {
    self.read(move |conn| history(conn, subject)).await
  }

  async fn assign_affair_manager(
    &self,
    affair_id: i64,
    manager: UserId,
    actor: Option<UserId>,
    comment: String,
  ) -> Result<Option<StatusChangeRecord>> {
    self
      .write(move |conn, now| {
        documents::assign_manager(conn, affair_id, manager, actor, comment, now)
      })
      .await
  }

  async fn record_invoice_payment(
    &self,
    invoice_id: i64,
    amount_paid: Cents,
    actor: Option<UserId>,
  ) -> Result<Invoice> {
    self
      .write(move |conn, now| {
        documents::record_payment(conn, invoice_id, amount_paid, actor, now)
      })
      .await
  }

  // ── References ────────────────────────────────────────────────────────────

  async fn reference_for(&self, subject: SubjectRef) -> Result<Option<String>> {
    self
      .read(move |conn| documents::stored_reference(conn, subject))
      .await
  }

  async fn preview_reference(&self, draft: DocumentDraft) -> Result<String> {
    self
      .read(move |conn| {
        let today = now().date_naive();
        let (request, client_id) = match draft {
          DocumentDraft::Offer(o) => {
            let main = documents::product(conn, o.main_product_id)?;
            let request = sequence::request_for(
              conn,
              DocumentType::Offer,
              o.organization_id,
              o.client_id,
              today,
              vec![main.code],
            )?;
            (request, o.client_id)
          }
          DocumentDraft::Opportunity(o) => {
            let main = documents::product(conn, o.main_product_id)?;
            let request = sequence::request_for(
              conn,
              DocumentType::Opportunity,
              o.organization_id,
              o.client_id,
              today,
              vec![main.code],
            )?;
            (request, o.client_id)
          }
          DocumentDraft::Correspondence(c) => {
            let request = sequence::request_for(
              conn,
              DocumentType::Correspondence,
              c.organization_id,
              c.client_id,
              today,
              vec![c.direction.as_str().to_owned(), c.kind_code],
            )?;
            (request, c.client_id)
          }
        };
        sequence::preview(conn, &request, client_id)
      })
      .await
  }
}
