//! The `TrackingStore` trait.
//!
//! The trait is implemented by storage backends (e.g. `kes-store-sqlite`).
//! The cascade dispatcher, the workflow functions and the `kes` binary depend
//! on this abstraction, not on any concrete backend.

use std::future::Future;

use crate::{
  change::{NewStatusChange, StatusChangeRecord, StatusChangeRequest},
  document::{
    Affair, Cents, Correspondence, DocumentDraft, Ensured, Invoice, NewCorrespondence,
    NewOffer, NewOpportunity, Offer, OfferUpdate, Opportunity, Proforma, Report,
    Training,
  },
  party::{Client, NewProduct, Organization, Product, User},
  subject::{SubjectRef, UserId},
  tracking::Tracking,
};

/// Abstraction over a KES storage backend.
///
/// Every document insert writes the document row, its tracking row and its
/// creation record in one transaction. Status change records are never
/// updated or deleted.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait TrackingStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Reference data ────────────────────────────────────────────────────

  fn add_user(
    &self,
    username: String,
  ) -> impl Future<Output = Result<User, Self::Error>> + Send + '_;

  /// Delete a user. Change records that name the user as actor survive with
  /// a null actor.
  fn delete_user(
    &self,
    user_id: UserId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn add_organization(
    &self,
    code: String,
    name: String,
  ) -> impl Future<Output = Result<Organization, Self::Error>> + Send + '_;

  /// Register a client, assigning its client number.
  fn add_client(
    &self,
    name: String,
  ) -> impl Future<Output = Result<Client, Self::Error>> + Send + '_;

  fn add_product(
    &self,
    product: NewProduct,
  ) -> impl Future<Output = Result<Product, Self::Error>> + Send + '_;

  // ── Offers ────────────────────────────────────────────────────────────

  /// Insert an offer with a freshly minted reference, in its initial status.
  fn create_offer(
    &self,
    offer: NewOffer,
  ) -> impl Future<Output = Result<Offer, Self::Error>> + Send + '_;

  fn get_offer(
    &self,
    offer_id: i64,
  ) -> impl Future<Output = Result<Option<Offer>, Self::Error>> + Send + '_;

  /// Save edits to an offer. The reference and the status are never touched.
  fn update_offer(
    &self,
    offer_id: i64,
    update: OfferUpdate,
  ) -> impl Future<Output = Result<Offer, Self::Error>> + Send + '_;

  /// Delete an offer that has no dependent documents yet. Its sequence number
  /// is not reused.
  fn delete_offer(
    &self,
    offer_id: i64,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// The products an offer covers: its line products, or its main product
  /// when it has no lines.
  fn offer_products(
    &self,
    offer_id: i64,
  ) -> impl Future<Output = Result<Vec<Product>, Self::Error>> + Send + '_;

  // ── Opportunities and correspondence ──────────────────────────────────

  fn create_opportunity(
    &self,
    opportunity: NewOpportunity,
  ) -> impl Future<Output = Result<Opportunity, Self::Error>> + Send + '_;

  fn get_opportunity(
    &self,
    opportunity_id: i64,
  ) -> impl Future<Output = Result<Option<Opportunity>, Self::Error>> + Send + '_;

  /// Get or create the offer drawn up from an opportunity.
  ///
  /// Fails with a conversion error unless the opportunity is qualified or
  /// further along its pipeline.
  fn convert_opportunity(
    &self,
    opportunity_id: i64,
    actor: Option<UserId>,
  ) -> impl Future<Output = Result<Ensured<Offer>, Self::Error>> + Send + '_;

  fn create_correspondence(
    &self,
    correspondence: NewCorrespondence,
  ) -> impl Future<Output = Result<Correspondence, Self::Error>> + Send + '_;

  fn get_correspondence(
    &self,
    correspondence_id: i64,
  ) -> impl Future<Output = Result<Option<Correspondence>, Self::Error>> + Send + '_;

  // ── Dependent documents ───────────────────────────────────────────────

  fn proforma_for_offer(
    &self,
    offer_id: i64,
  ) -> impl Future<Output = Result<Option<Proforma>, Self::Error>> + Send + '_;

  fn get_affair(
    &self,
    affair_id: i64,
  ) -> impl Future<Output = Result<Option<Affair>, Self::Error>> + Send + '_;

  fn affair_for_offer(
    &self,
    offer_id: i64,
  ) -> impl Future<Output = Result<Option<Affair>, Self::Error>> + Send + '_;

  fn reports_for_affair(
    &self,
    affair_id: i64,
  ) -> impl Future<Output = Result<Vec<Report>, Self::Error>> + Send + '_;

  fn trainings_for_affair(
    &self,
    affair_id: i64,
  ) -> impl Future<Output = Result<Vec<Training>, Self::Error>> + Send + '_;

  fn get_invoice(
    &self,
    invoice_id: i64,
  ) -> impl Future<Output = Result<Option<Invoice>, Self::Error>> + Send + '_;

  fn invoice_for_affair(
    &self,
    affair_id: i64,
  ) -> impl Future<Output = Result<Option<Invoice>, Self::Error>> + Send + '_;

  // ── Get-or-create ─────────────────────────────────────────────────────
  //
  // Each of these is keyed by a natural foreign key backed by a UNIQUE
  // constraint: calling one twice returns the first row. `actor` is recorded
  // as the creator of a tracked document this call inserts.

  fn ensure_proforma(
    &self,
    offer_id: i64,
    actor: Option<UserId>,
  ) -> impl Future<Output = Result<Ensured<Proforma>, Self::Error>> + Send + '_;

  fn ensure_affair(
    &self,
    offer_id: i64,
    actor: Option<UserId>,
  ) -> impl Future<Output = Result<Ensured<Affair>, Self::Error>> + Send + '_;

  fn ensure_report(
    &self,
    affair_id: i64,
    product_id: i64,
    actor: Option<UserId>,
  ) -> impl Future<Output = Result<Ensured<Report>, Self::Error>> + Send + '_;

  fn ensure_training(
    &self,
    report_id: i64,
  ) -> impl Future<Output = Result<Ensured<Training>, Self::Error>> + Send + '_;

  /// The affair's initial invoice, for the full affair amount.
  fn ensure_initial_invoice(
    &self,
    affair_id: i64,
    actor: Option<UserId>,
  ) -> impl Future<Output = Result<Ensured<Invoice>, Self::Error>> + Send + '_;

  // ── Status tracking ───────────────────────────────────────────────────

  fn tracking(
    &self,
    subject: SubjectRef,
  ) -> impl Future<Output = Result<Option<Tracking>, Self::Error>> + Send + '_;

  /// Move a subject to a new status.
  ///
  /// Returns `None` without writing anything when the subject already has
  /// the requested status. Otherwise the tracking row and the change record
  /// are written in one transaction and the record is returned.
  fn set_status(
    &self,
    subject: SubjectRef,
    request: StatusChangeRequest,
  ) -> impl Future<Output = Result<Option<StatusChangeRecord>, Self::Error>>
  + Send
  + '_;

  /// Append one record to the change log.
  fn record_change(
    &self,
    change: NewStatusChange,
  ) -> impl Future<Output = Result<StatusChangeRecord, Self::Error>> + Send + '_;

  /// All records for a subject, newest first.
  fn history_for(
    &self,
    subject: SubjectRef,
  ) -> impl Future<Output = Result<Vec<StatusChangeRecord>, Self::Error>> + Send + '_;

  /// Change an affair's manager, logging the change without touching the
  /// affair's status. `None` when the manager is unchanged.
  fn assign_affair_manager(
    &self,
    affair_id: i64,
    manager: UserId,
    actor: Option<UserId>,
    comment: String,
  ) -> impl Future<Output = Result<Option<StatusChangeRecord>, Self::Error>>
  + Send
  + '_;

  /// Record the total amount paid on an invoice and move it to the matching
  /// payment status.
  fn record_invoice_payment(
    &self,
    invoice_id: i64,
    amount_paid: Cents,
    actor: Option<UserId>,
  ) -> impl Future<Output = Result<Invoice, Self::Error>> + Send + '_;

  // ── References ────────────────────────────────────────────────────────

  /// The stored reference of a subject.
  fn reference_for(
    &self,
    subject: SubjectRef,
  ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + '_;

  /// The reference a draft would receive if it were inserted now. Consumes
  /// no sequence number.
  fn preview_reference(
    &self,
    draft: DocumentDraft,
  ) -> impl Future<Output = Result<String, Self::Error>> + Send + '_;
}
