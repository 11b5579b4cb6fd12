//! SQL schema for the docdir SQLite store.
//!
//! Executed once at connection startup. The `PRAGMA user_version` records the
//! schema revision for future migrations.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- External key → internal id. One binding per key, one key per id.
CREATE TABLE IF NOT EXISTS identities (
    kind         TEXT NOT NULL,   -- 'establishment' | 'doctor'
    external_key TEXT NOT NULL,
    internal_id  TEXT NOT NULL UNIQUE,
    bound_at     TEXT NOT NULL,
    PRIMARY KEY (kind, external_key)
);

CREATE TABLE IF NOT EXISTS establishments (
    establishment_id TEXT PRIMARY KEY,
    external_key     TEXT NOT NULL UNIQUE,
    name             TEXT,
    slug             TEXT,
    practice_type    TEXT,
    profile_url      TEXT,
    image_url        TEXT,
    street_address   TEXT,
    postal_code      TEXT,
    locality         TEXT,
    city             TEXT,
    state            TEXT,
    latitude         REAL,
    longitude        REAL,
    min_price        REAL,
    max_price        REAL,
    phone            TEXT,
    phone_extension  TEXT,
    rating           REAL,
    reviews_count    INTEGER,
    doctor_count     INTEGER,
    bed_count        INTEGER,
    ambulance_count  INTEGER,
    practice_timings TEXT,
    active           INTEGER NOT NULL DEFAULT 1,
    created_at       TEXT NOT NULL,   -- RFC 3339 UTC, nanosecond precision
    updated_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS doctors (
    doctor_id              TEXT PRIMARY KEY,
    external_key           TEXT NOT NULL UNIQUE,
    first_name             TEXT,
    last_name              TEXT,
    slug                   TEXT,
    listing_rank           INTEGER,
    profile_photo          TEXT,
    profile_url            TEXT,
    qualifications         TEXT NOT NULL DEFAULT '[]',   -- JSON array
    specialization         TEXT,
    specialties            TEXT NOT NULL DEFAULT '[]',   -- JSON array
    experience_years       INTEGER,
    summary                TEXT,
    services               TEXT NOT NULL DEFAULT '[]',   -- JSON array
    services_count         INTEGER,
    recommendation_percent REAL,
    patients_count         INTEGER,
    reviews_count          INTEGER,
    establishment_count    INTEGER,
    active                 INTEGER NOT NULL DEFAULT 1,
    created_at             TEXT NOT NULL,
    updated_at             TEXT NOT NULL
);

-- Relationship rows are never deleted; history is kept as inactive rows.
CREATE TABLE IF NOT EXISTS affiliations (
    affiliation_id   TEXT PRIMARY KEY,
    doctor_id        TEXT NOT NULL REFERENCES doctors(doctor_id),
    establishment_id TEXT NOT NULL REFERENCES establishments(establishment_id),
    begin_time       TEXT,                          -- HH:MM:SS
    end_time         TEXT,
    available_days   TEXT NOT NULL DEFAULT '[]',    -- JSON array
    fees             TEXT NOT NULL DEFAULT '[]',    -- JSON array
    active           INTEGER NOT NULL DEFAULT 1,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS affiliations_active_pair_idx
    ON affiliations(doctor_id, establishment_id) WHERE active = 1;
CREATE INDEX IF NOT EXISTS affiliations_establishment_idx ON affiliations(establishment_id);
CREATE INDEX IF NOT EXISTS affiliations_doctor_idx        ON affiliations(doctor_id);
CREATE INDEX IF NOT EXISTS establishments_slug_idx        ON establishments(slug);
CREATE INDEX IF NOT EXISTS doctors_slug_idx               ON doctors(slug);

-- No hard deletes, anywhere.
CREATE TRIGGER IF NOT EXISTS identities_no_delete BEFORE DELETE ON identities
BEGIN SELECT RAISE(ABORT, 'identities are never deleted'); END;
CREATE TRIGGER IF NOT EXISTS establishments_no_delete BEFORE DELETE ON establishments
BEGIN SELECT RAISE(ABORT, 'establishments are never deleted'); END;
CREATE TRIGGER IF NOT EXISTS doctors_no_delete BEFORE DELETE ON doctors
BEGIN SELECT RAISE(ABORT, 'doctors are never deleted'); END;
CREATE TRIGGER IF NOT EXISTS affiliations_no_delete BEFORE DELETE ON affiliations
BEGIN SELECT RAISE(ABORT, 'affiliations are never deleted'); END;

-- Identity columns and creation stamps are write-once.
CREATE TRIGGER IF NOT EXISTS identities_immutable BEFORE UPDATE ON identities
BEGIN SELECT RAISE(ABORT, 'identity bindings are immutable'); END;
CREATE TRIGGER IF NOT EXISTS establishments_write_once
BEFORE UPDATE OF external_key, created_at ON establishments
WHEN NEW.external_key IS NOT OLD.external_key OR NEW.created_at IS NOT OLD.created_at
BEGIN SELECT RAISE(ABORT, 'establishment key and created_at are write-once'); END;
CREATE TRIGGER IF NOT EXISTS doctors_write_once
BEFORE UPDATE OF external_key, created_at ON doctors
WHEN NEW.external_key IS NOT OLD.external_key OR NEW.created_at IS NOT OLD.created_at
BEGIN SELECT RAISE(ABORT, 'doctor key and created_at are write-once'); END;
CREATE TRIGGER IF NOT EXISTS affiliations_write_once
BEFORE UPDATE OF doctor_id, establishment_id, created_at ON affiliations
WHEN NEW.doctor_id IS NOT OLD.doctor_id
  OR NEW.establishment_id IS NOT OLD.establishment_id
  OR NEW.created_at IS NOT OLD.created_at
BEGIN SELECT RAISE(ABORT, 'affiliation pair and created_at are write-once'); END;

PRAGMA user_version = 1;
";
