//! Affiliations: the doctor to establishment relationship.
//!
//! Affiliation rows are never deleted. A pair that disappears from a scrape is
//! soft-deactivated; a pair that comes back flips its most recent historical
//! row back to active instead of inserting a new one. At most one row per
//! (doctor, establishment) pair is active at any time.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  audit::Audited,
  entity::{Merge, overwrite, overwrite_list},
};

/// Schedule and fee attributes observed for a pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffiliationTerms {
  pub begin_time:     Option<NaiveTime>,
  pub end_time:       Option<NaiveTime>,
  /// Day labels in source order, e.g. `["Mon", "Tue"]`.
  pub available_days: Vec<String>,
  /// Fee entries in source order, e.g. `["500 consultation"]`.
  pub fees:           Vec<String>,
}

impl Merge for AffiliationTerms {
  fn merge_from(&mut self, incoming: &Self) {
    overwrite(&mut self.begin_time, &incoming.begin_time);
    overwrite(&mut self.end_time, &incoming.end_time);
    overwrite_list(&mut self.available_days, &incoming.available_days);
    overwrite_list(&mut self.fees, &incoming.fees);
  }
}

/// A persisted affiliation row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Affiliation {
  pub affiliation_id:   Uuid,
  pub doctor_id:        Uuid,
  pub establishment_id: Uuid,
  pub terms:            AffiliationTerms,
  pub active:           bool,
  pub created_at:       DateTime<Utc>,
  pub updated_at:       DateTime<Utc>,
}

impl Affiliation {
  /// A fresh, active row for a pair seen together for the first time.
  pub fn new(
    doctor_id: Uuid,
    establishment_id: Uuid,
    terms: AffiliationTerms,
    at: DateTime<Utc>,
  ) -> Self {
    Self {
      affiliation_id: Uuid::new_v4(),
      doctor_id,
      establishment_id,
      terms,
      active: true,
      created_at: at,
      updated_at: at,
    }
  }
}

impl Audited for Affiliation {
  fn created_at(&self) -> DateTime<Utc> { self.created_at }

  fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

  fn set_audit_times(&mut self, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) {
    self.created_at = created_at;
    self.updated_at = updated_at;
  }
}
