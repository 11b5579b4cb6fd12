//! Establishments and doctors, the two entity kinds of the directory.
//!
//! An entity is identified internally by a UUID assigned on first sight of its
//! external key. Descriptive attributes live in a separate `*Attrs` struct so
//! that an incoming canonical record and the persisted state share one shape
//! and can be merged field by field.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, audit::Audited};

// ─── Kind ────────────────────────────────────────────────────────────────────

/// The kind tag carried by every source payload.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
  Establishment,
  Doctor,
  Affiliation,
}

impl EntityKind {
  /// The discriminant stored in the `identities.kind` column.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Establishment => "establishment",
      Self::Doctor => "doctor",
      Self::Affiliation => "affiliation",
    }
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for EntityKind {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "establishment" => Ok(Self::Establishment),
      "doctor" => Ok(Self::Doctor),
      "affiliation" => Ok(Self::Affiliation),
      other => Err(Error::UnknownKind(other.to_owned())),
    }
  }
}

// ─── Merge policy ────────────────────────────────────────────────────────────

/// Partial-update merge: every field present in `incoming` overwrites the
/// corresponding field of `self`; absent fields leave `self` untouched.
///
/// "Present" means `Some(_)` for scalars and non-empty for lists. The
/// normalizer guarantees that empty strings never reach this point.
pub trait Merge {
  fn merge_from(&mut self, incoming: &Self);
}

pub(crate) fn overwrite<T: Clone>(slot: &mut Option<T>, incoming: &Option<T>) {
  if let Some(value) = incoming {
    *slot = Some(value.clone());
  }
}

pub(crate) fn overwrite_list(slot: &mut Vec<String>, incoming: &[String]) {
  if !incoming.is_empty() {
    *slot = incoming.to_vec();
  }
}

// ─── Names ───────────────────────────────────────────────────────────────────

/// A doctor's name split into first and last components.
///
/// Stored and merged as one unit so that a rename never leaves a stale last
/// name behind. `last` is empty for single-token names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonName {
  pub first: String,
  pub last:  String,
}

// ─── Establishment ───────────────────────────────────────────────────────────

/// Descriptive attributes of a clinic or hospital.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EstablishmentAttrs {
  pub name:             Option<String>,
  pub slug:             Option<String>,
  /// e.g. "clinic" or "hospital".
  pub practice_type:    Option<String>,
  pub profile_url:      Option<String>,
  pub image_url:        Option<String>,
  pub street_address:   Option<String>,
  pub postal_code:      Option<String>,
  pub locality:         Option<String>,
  pub city:             Option<String>,
  pub state:            Option<String>,
  pub latitude:         Option<f64>,
  pub longitude:        Option<f64>,
  pub min_price:        Option<f64>,
  pub max_price:        Option<f64>,
  pub phone:            Option<String>,
  pub phone_extension:  Option<String>,
  /// 0.0 to 5.0 inclusive.
  pub rating:           Option<f64>,
  pub reviews_count:    Option<u32>,
  pub doctor_count:     Option<u32>,
  pub bed_count:        Option<u32>,
  pub ambulance_count:  Option<u32>,
  pub practice_timings: Option<String>,
}

impl Merge for EstablishmentAttrs {
  fn merge_from(&mut self, incoming: &Self) {
    overwrite(&mut self.name, &incoming.name);
    overwrite(&mut self.slug, &incoming.slug);
    overwrite(&mut self.practice_type, &incoming.practice_type);
    overwrite(&mut self.profile_url, &incoming.profile_url);
    overwrite(&mut self.image_url, &incoming.image_url);
    overwrite(&mut self.street_address, &incoming.street_address);
    overwrite(&mut self.postal_code, &incoming.postal_code);
    overwrite(&mut self.locality, &incoming.locality);
    overwrite(&mut self.city, &incoming.city);
    overwrite(&mut self.state, &incoming.state);
    overwrite(&mut self.latitude, &incoming.latitude);
    overwrite(&mut self.longitude, &incoming.longitude);
    overwrite(&mut self.min_price, &incoming.min_price);
    overwrite(&mut self.max_price, &incoming.max_price);
    overwrite(&mut self.phone, &incoming.phone);
    overwrite(&mut self.phone_extension, &incoming.phone_extension);
    overwrite(&mut self.rating, &incoming.rating);
    overwrite(&mut self.reviews_count, &incoming.reviews_count);
    overwrite(&mut self.doctor_count, &incoming.doctor_count);
    overwrite(&mut self.bed_count, &incoming.bed_count);
    overwrite(&mut self.ambulance_count, &incoming.ambulance_count);
    overwrite(&mut self.practice_timings, &incoming.practice_timings);
  }
}

/// A persisted establishment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Establishment {
  /// Assigned once by the identity resolver; never changes.
  pub establishment_id: Uuid,
  /// The upstream source's identifier; unique and never reassigned.
  pub external_key:     String,
  pub attrs:            EstablishmentAttrs,
  pub active:           bool,
  pub created_at:       DateTime<Utc>,
  pub updated_at:       DateTime<Utc>,
}

impl Establishment {
  pub fn new(
    establishment_id: Uuid,
    external_key: String,
    attrs: EstablishmentAttrs,
    at: DateTime<Utc>,
  ) -> Self {
    Self {
      establishment_id,
      external_key,
      attrs,
      active: true,
      created_at: at,
      updated_at: at,
    }
  }
}

impl Audited for Establishment {
  fn created_at(&self) -> DateTime<Utc> { self.created_at }

  fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

  fn set_audit_times(&mut self, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) {
    self.created_at = created_at;
    self.updated_at = updated_at;
  }
}

// ─── Doctor ──────────────────────────────────────────────────────────────────

/// Profile attributes of a doctor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DoctorAttrs {
  pub name:                   Option<PersonName>,
  pub slug:                   Option<String>,
  /// The source's listing rank.
  pub rank:                   Option<u32>,
  pub profile_photo:          Option<String>,
  pub profile_url:            Option<String>,
  pub qualifications:         Vec<String>,
  pub specialization:         Option<String>,
  pub specialties:            Vec<String>,
  pub experience_years:       Option<u32>,
  pub summary:                Option<String>,
  pub services:               Vec<String>,
  pub services_count:         Option<u32>,
  /// 0.0 to 100.0 inclusive.
  pub recommendation_percent: Option<f64>,
  pub patients_count:         Option<u32>,
  pub reviews_count:          Option<u32>,
  pub establishment_count:    Option<u32>,
}

impl Merge for DoctorAttrs {
  fn merge_from(&mut self, incoming: &Self) {
    overwrite(&mut self.name, &incoming.name);
    overwrite(&mut self.slug, &incoming.slug);
    overwrite(&mut self.rank, &incoming.rank);
    overwrite(&mut self.profile_photo, &incoming.profile_photo);
    overwrite(&mut self.profile_url, &incoming.profile_url);
    overwrite_list(&mut self.qualifications, &incoming.qualifications);
    overwrite(&mut self.specialization, &incoming.specialization);
    overwrite_list(&mut self.specialties, &incoming.specialties);
    overwrite(&mut self.experience_years, &incoming.experience_years);
    overwrite(&mut self.summary, &incoming.summary);
    overwrite_list(&mut self.services, &incoming.services);
    overwrite(&mut self.services_count, &incoming.services_count);
    overwrite(&mut self.recommendation_percent, &incoming.recommendation_percent);
    overwrite(&mut self.patients_count, &incoming.patients_count);
    overwrite(&mut self.reviews_count, &incoming.reviews_count);
    overwrite(&mut self.establishment_count, &incoming.establishment_count);
  }
}

/// A persisted doctor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doctor {
  pub doctor_id:    Uuid,
  pub external_key: String,
  pub attrs:        DoctorAttrs,
  pub active:       bool,
  pub created_at:   DateTime<Utc>,
  pub updated_at:   DateTime<Utc>,
}

impl Doctor {
  pub fn new(
    doctor_id: Uuid,
    external_key: String,
    attrs: DoctorAttrs,
    at: DateTime<Utc>,
  ) -> Self {
    Self {
      doctor_id,
      external_key,
      attrs,
      active: true,
      created_at: at,
      updated_at: at,
    }
  }
}

impl Audited for Doctor {
  fn created_at(&self) -> DateTime<Utc> { self.created_at }

  fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

  fn set_audit_times(&mut self, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) {
    self.created_at = created_at;
    self.updated_at = updated_at;
  }
}
