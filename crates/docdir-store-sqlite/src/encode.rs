//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (nanoseconds, `Z`)
//! so that they sort lexically. Times of day are stored as `HH:MM:SS`. List
//! fields are stored as compact JSON arrays. UUIDs are stored as hyphenated
//! lowercase strings.

use chrono::{DateTime, NaiveTime, SecondsFormat, Utc};
use docdir_core::{
  affiliation::{Affiliation, AffiliationTerms},
  entity::{Doctor, DoctorAttrs, Establishment, EstablishmentAttrs, PersonName},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── NaiveTime ────────────────────────────────────────────────────────────────

pub fn encode_time(t: NaiveTime) -> String { t.format("%H:%M:%S").to_string() }

pub fn decode_time(s: &str) -> Result<NaiveTime> {
  NaiveTime::parse_from_str(s, "%H:%M:%S")
    .map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

// ─── Lists ────────────────────────────────────────────────────────────────────

pub fn encode_list(items: &[String]) -> Result<String> {
  Ok(serde_json::to_string(items)?)
}

pub fn decode_list(s: &str) -> Result<Vec<String>> { Ok(serde_json::from_str(s)?) }

// ─── Establishments ───────────────────────────────────────────────────────────

pub const ESTABLISHMENT_COLUMNS: &str = "
  establishment_id, external_key, name, slug, practice_type, profile_url,
  image_url, street_address, postal_code, locality, city, state, latitude,
  longitude, min_price, max_price, phone, phone_extension, rating,
  reviews_count, doctor_count, bed_count, ambulance_count, practice_timings,
  active, created_at, updated_at";

/// Raw values read directly from an `establishments` row.
pub struct RawEstablishment {
  pub establishment_id: String,
  pub external_key:     String,
  pub attrs:            EstablishmentAttrs,
  pub active:           bool,
  pub created_at:       String,
  pub updated_at:       String,
}

impl RawEstablishment {
  /// Map a row selected with [`ESTABLISHMENT_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      establishment_id: row.get(0)?,
      external_key:     row.get(1)?,
      attrs:            EstablishmentAttrs {
        name:             row.get(2)?,
        slug:             row.get(3)?,
        practice_type:    row.get(4)?,
        profile_url:      row.get(5)?,
        image_url:        row.get(6)?,
        street_address:   row.get(7)?,
        postal_code:      row.get(8)?,
        locality:         row.get(9)?,
        city:             row.get(10)?,
        state:            row.get(11)?,
        latitude:         row.get(12)?,
        longitude:        row.get(13)?,
        min_price:        row.get(14)?,
        max_price:        row.get(15)?,
        phone:            row.get(16)?,
        phone_extension:  row.get(17)?,
        rating:           row.get(18)?,
        reviews_count:    row.get(19)?,
        doctor_count:     row.get(20)?,
        bed_count:        row.get(21)?,
        ambulance_count:  row.get(22)?,
        practice_timings: row.get(23)?,
      },
      active:           row.get(24)?,
      created_at:       row.get(25)?,
      updated_at:       row.get(26)?,
    })
  }

  pub fn into_establishment(self) -> Result<Establishment> {
    Ok(Establishment {
      establishment_id: decode_uuid(&self.establishment_id)?,
      external_key:     self.external_key,
      attrs:            self.attrs,
      active:           self.active,
      created_at:       decode_dt(&self.created_at)?,
      updated_at:       decode_dt(&self.updated_at)?,
    })
  }
}

// ─── Doctors ──────────────────────────────────────────────────────────────────

pub const DOCTOR_COLUMNS: &str = "
  doctor_id, external_key, first_name, last_name, slug, listing_rank,
  profile_photo, profile_url, qualifications, specialization, specialties,
  experience_years, summary, services, services_count, recommendation_percent,
  patients_count, reviews_count, establishment_count, active, created_at,
  updated_at";

/// Raw values read directly from a `doctors` row.
pub struct RawDoctor {
  pub doctor_id:              String,
  pub external_key:           String,
  pub first_name:             Option<String>,
  pub last_name:              Option<String>,
  pub slug:                   Option<String>,
  pub rank:                   Option<u32>,
  pub profile_photo:          Option<String>,
  pub profile_url:            Option<String>,
  pub qualifications:         String,
  pub specialization:         Option<String>,
  pub specialties:            String,
  pub experience_years:       Option<u32>,
  pub summary:                Option<String>,
  pub services:               String,
  pub services_count:         Option<u32>,
  pub recommendation_percent: Option<f64>,
  pub patients_count:         Option<u32>,
  pub reviews_count:          Option<u32>,
  pub establishment_count:    Option<u32>,
  pub active:                 bool,
  pub created_at:             String,
  pub updated_at:             String,
}

impl RawDoctor {
  /// Map a row selected with [`DOCTOR_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      doctor_id:              row.get(0)?,
      external_key:           row.get(1)?,
      first_name:             row.get(2)?,
      last_name:              row.get(3)?,
      slug:                   row.get(4)?,
      rank:                   row.get(5)?,
      profile_photo:          row.get(6)?,
      profile_url:            row.get(7)?,
      qualifications:         row.get(8)?,
      specialization:         row.get(9)?,
      specialties:            row.get(10)?,
      experience_years:       row.get(11)?,
      summary:                row.get(12)?,
      services:               row.get(13)?,
      services_count:         row.get(14)?,
      recommendation_percent: row.get(15)?,
      patients_count:         row.get(16)?,
      reviews_count:          row.get(17)?,
      establishment_count:    row.get(18)?,
      active:                 row.get(19)?,
      created_at:             row.get(20)?,
      updated_at:             row.get(21)?,
    })
  }

  pub fn into_doctor(self) -> Result<Doctor> {
    let name = self.first_name.map(|first| PersonName {
      first,
      last: self.last_name.unwrap_or_default(),
    });

    Ok(Doctor {
      doctor_id:    decode_uuid(&self.doctor_id)?,
      external_key: self.external_key,
      attrs:        DoctorAttrs {
        name,
        slug: self.slug,
        rank: self.rank,
        profile_photo: self.profile_photo,
        profile_url: self.profile_url,
        qualifications: decode_list(&self.qualifications)?,
        specialization: self.specialization,
        specialties: decode_list(&self.specialties)?,
        experience_years: self.experience_years,
        summary: self.summary,
        services: decode_list(&self.services)?,
        services_count: self.services_count,
        recommendation_percent: self.recommendation_percent,
        patients_count: self.patients_count,
        reviews_count: self.reviews_count,
        establishment_count: self.establishment_count,
      },
      active:       self.active,
      created_at:   decode_dt(&self.created_at)?,
      updated_at:   decode_dt(&self.updated_at)?,
    })
  }
}

/// The JSON-encoded list columns of a doctor, computed before entering the
/// connection closure.
pub struct EncodedDoctorLists {
  pub qualifications: String,
  pub specialties:    String,
  pub services:       String,
}

impl EncodedDoctorLists {
  pub fn new(attrs: &DoctorAttrs) -> Result<Self> {
    Ok(Self {
      qualifications: encode_list(&attrs.qualifications)?,
      specialties:    encode_list(&attrs.specialties)?,
      services:       encode_list(&attrs.services)?,
    })
  }
}

// ─── Affiliations ─────────────────────────────────────────────────────────────

pub const AFFILIATION_COLUMNS: &str = "
  affiliation_id, doctor_id, establishment_id, begin_time, end_time,
  available_days, fees, active, created_at, updated_at";

/// Raw strings read directly from an `affiliations` row; also used as the
/// fully encoded form of a row about to be written.
pub struct RawAffiliation {
  pub affiliation_id:   String,
  pub doctor_id:        String,
  pub establishment_id: String,
  pub begin_time:       Option<String>,
  pub end_time:         Option<String>,
  pub available_days:   String,
  pub fees:             String,
  pub active:           bool,
  pub created_at:       String,
  pub updated_at:       String,
}

impl RawAffiliation {
  /// Map a row selected with [`AFFILIATION_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      affiliation_id:   row.get(0)?,
      doctor_id:        row.get(1)?,
      establishment_id: row.get(2)?,
      begin_time:       row.get(3)?,
      end_time:         row.get(4)?,
      available_days:   row.get(5)?,
      fees:             row.get(6)?,
      active:           row.get(7)?,
      created_at:       row.get(8)?,
      updated_at:       row.get(9)?,
    })
  }

  pub fn encode(a: &Affiliation) -> Result<Self> {
    Ok(Self {
      affiliation_id:   encode_uuid(a.affiliation_id),
      doctor_id:        encode_uuid(a.doctor_id),
      establishment_id: encode_uuid(a.establishment_id),
      begin_time:       a.terms.begin_time.map(encode_time),
      end_time:         a.terms.end_time.map(encode_time),
      available_days:   encode_list(&a.terms.available_days)?,
      fees:             encode_list(&a.terms.fees)?,
      active:           a.active,
      created_at:       encode_dt(a.created_at),
      updated_at:       encode_dt(a.updated_at),
    })
  }

  pub fn into_affiliation(self) -> Result<Affiliation> {
    Ok(Affiliation {
      affiliation_id:   decode_uuid(&self.affiliation_id)?,
      doctor_id:        decode_uuid(&self.doctor_id)?,
      establishment_id: decode_uuid(&self.establishment_id)?,
      terms:            AffiliationTerms {
        begin_time:     self.begin_time.as_deref().map(decode_time).transpose()?,
        end_time:       self.end_time.as_deref().map(decode_time).transpose()?,
        available_days: decode_list(&self.available_days)?,
        fees:           decode_list(&self.fees)?,
      },
      active:           self.active,
      created_at:       decode_dt(&self.created_at)?,
      updated_at:       decode_dt(&self.updated_at)?,
    })
  }
}
