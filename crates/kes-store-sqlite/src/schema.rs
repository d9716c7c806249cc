//! SQL schema for the KES SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- ── Reference data ─────────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS users (
    user_id  INTEGER PRIMARY KEY,
    username TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS organizations (
    organization_id INTEGER PRIMARY KEY,
    code            TEXT NOT NULL UNIQUE,
    name            TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS clients (
    client_id     INTEGER PRIMARY KEY,
    name          TEXT NOT NULL,
    client_number TEXT NOT NULL UNIQUE,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS products (
    product_id    INTEGER PRIMARY KEY,
    code          TEXT NOT NULL UNIQUE,
    name          TEXT NOT NULL,
    category_code TEXT NOT NULL
);

-- ── Status tracking ────────────────────────────────────────────────────────

-- One row per tracked subject, whatever its type.
CREATE TABLE IF NOT EXISTS tracking (
    subject_type TEXT    NOT NULL,
    subject_id   INTEGER NOT NULL,
    status       TEXT    NOT NULL,
    status_dates TEXT    NOT NULL DEFAULT '{}',  -- JSON: status -> RFC 3339
    created_at   TEXT    NOT NULL,
    updated_at   TEXT    NOT NULL,
    created_by   INTEGER REFERENCES users(user_id) ON DELETE SET NULL,
    updated_by   INTEGER REFERENCES users(user_id) ON DELETE SET NULL,
    PRIMARY KEY (subject_type, subject_id)
);

-- Change records are strictly append-only.
-- No UPDATE or DELETE is ever issued against this table; only the actor
-- foreign key is nulled when its user is deleted.
CREATE TABLE IF NOT EXISTS status_changes (
    change_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    subject_type    TEXT    NOT NULL,
    subject_id      INTEGER NOT NULL,
    previous_status TEXT    NOT NULL,  -- '' for the creation record
    new_status      TEXT    NOT NULL,
    changed_at      TEXT    NOT NULL,  -- RFC 3339 UTC; server-assigned
    actor           INTEGER REFERENCES users(user_id) ON DELETE SET NULL,
    comment         TEXT    NOT NULL DEFAULT '',
    metadata        TEXT    NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS status_changes_subject_idx
    ON status_changes(subject_type, subject_id, changed_at);
CREATE UNIQUE INDEX IF NOT EXISTS status_changes_creation_idx
    ON status_changes(subject_type, subject_id) WHERE previous_status = '';

-- Last sequence number handed out per scope. Never decremented.
CREATE TABLE IF NOT EXISTS sequence_counters (
    org_code      TEXT    NOT NULL,
    scope_code    TEXT    NOT NULL,
    period        TEXT    NOT NULL,            -- YYYY-MM
    client_number TEXT    NOT NULL DEFAULT '', -- '' when not scoped by client
    last_value    INTEGER NOT NULL,
    PRIMARY KEY (org_code, scope_code, period, client_number)
);

-- ── Documents ──────────────────────────────────────────────────────────────

-- Tracked document keys are AUTOINCREMENT: the id of a deleted subject,
-- and with it its change log, is never handed to a new document.

CREATE TABLE IF NOT EXISTS opportunities (
    opportunity_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    reference        TEXT    NOT NULL UNIQUE,
    sequence_number  INTEGER NOT NULL,
    organization_id  INTEGER NOT NULL REFERENCES organizations(organization_id),
    client_id        INTEGER NOT NULL REFERENCES clients(client_id),
    main_product_id  INTEGER NOT NULL REFERENCES products(product_id),
    estimated_amount INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS offers (
    offer_id        INTEGER PRIMARY KEY AUTOINCREMENT,
    reference       TEXT    NOT NULL UNIQUE,
    sequence_number INTEGER NOT NULL,
    organization_id INTEGER NOT NULL REFERENCES organizations(organization_id),
    client_id       INTEGER NOT NULL REFERENCES clients(client_id),
    main_product_id INTEGER NOT NULL REFERENCES products(product_id),
    opportunity_id  INTEGER UNIQUE REFERENCES opportunities(opportunity_id),
    amount          INTEGER NOT NULL DEFAULT 0,
    notes           TEXT    NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS offer_lines (
    offer_id   INTEGER NOT NULL REFERENCES offers(offer_id) ON DELETE CASCADE,
    product_id INTEGER NOT NULL REFERENCES products(product_id),
    quantity   INTEGER NOT NULL,
    unit_price INTEGER NOT NULL,
    PRIMARY KEY (offer_id, product_id)
);

CREATE TABLE IF NOT EXISTS proformas (
    proforma_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    reference       TEXT    NOT NULL UNIQUE,
    sequence_number INTEGER NOT NULL,
    offer_id        INTEGER NOT NULL UNIQUE REFERENCES offers(offer_id),
    organization_id INTEGER NOT NULL REFERENCES organizations(organization_id),
    client_id       INTEGER NOT NULL REFERENCES clients(client_id),
    amount_ht       INTEGER NOT NULL,
    vat_rate_bp     INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS affairs (
    affair_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    reference       TEXT    NOT NULL UNIQUE,
    sequence_number INTEGER NOT NULL,
    offer_id        INTEGER NOT NULL UNIQUE REFERENCES offers(offer_id),
    organization_id INTEGER NOT NULL REFERENCES organizations(organization_id),
    client_id       INTEGER NOT NULL REFERENCES clients(client_id),
    total_amount    INTEGER NOT NULL,
    manager_id      INTEGER REFERENCES users(user_id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS reports (
    report_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    reference       TEXT    NOT NULL UNIQUE,
    sequence_number INTEGER NOT NULL,
    affair_id       INTEGER NOT NULL REFERENCES affairs(affair_id),
    product_id      INTEGER NOT NULL REFERENCES products(product_id),
    organization_id INTEGER NOT NULL REFERENCES organizations(organization_id),
    client_id       INTEGER NOT NULL REFERENCES clients(client_id),
    UNIQUE (affair_id, product_id)
);

CREATE TABLE IF NOT EXISTS trainings (
    training_id           INTEGER PRIMARY KEY,
    report_id             INTEGER NOT NULL UNIQUE REFERENCES reports(report_id),
    affair_id             INTEGER NOT NULL REFERENCES affairs(affair_id),
    client_id             INTEGER NOT NULL REFERENCES clients(client_id),
    title                 TEXT    NOT NULL,
    certificate_reference TEXT    NOT NULL UNIQUE,
    created_at            TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS invoices (
    invoice_id      INTEGER PRIMARY KEY AUTOINCREMENT,
    reference       TEXT    NOT NULL UNIQUE,
    sequence_number INTEGER NOT NULL,
    affair_id       INTEGER NOT NULL UNIQUE REFERENCES affairs(affair_id),
    organization_id INTEGER NOT NULL REFERENCES organizations(organization_id),
    client_id       INTEGER NOT NULL REFERENCES clients(client_id),
    amount_ht       INTEGER NOT NULL,
    vat_rate_bp     INTEGER NOT NULL,
    amount_paid     INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS correspondences (
    correspondence_id INTEGER PRIMARY KEY AUTOINCREMENT,
    reference         TEXT    NOT NULL UNIQUE,
    sequence_number   INTEGER NOT NULL,
    organization_id   INTEGER NOT NULL REFERENCES organizations(organization_id),
    client_id         INTEGER NOT NULL REFERENCES clients(client_id),
    direction         TEXT    NOT NULL,  -- 'IN' | 'OUT'
    kind_code         TEXT    NOT NULL,
    subject_line      TEXT    NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS reports_affair_idx   ON reports(affair_id);
CREATE INDEX IF NOT EXISTS trainings_affair_idx ON trainings(affair_id);

PRAGMA user_version = 1;
";
