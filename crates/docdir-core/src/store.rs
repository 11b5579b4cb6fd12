//! The `DirectoryStore` trait and the per-kind entity plumbing built on it.
//!
//! The trait is implemented by storage backends (e.g. `docdir-store-sqlite`).
//! The reconciliation engine depends on this abstraction, not on any concrete
//! backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  affiliation::Affiliation,
  audit::{Audited, Stamped},
  entity::{Doctor, DoctorAttrs, EntityKind, Establishment, EstablishmentAttrs, Merge},
};

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a provider-directory storage backend.
///
/// Rows are never deleted. Writes accept only [`Stamped`] values, so every
/// mutation has passed through an [`Auditor`](crate::audit::Auditor).
/// Backends must enforce: unique external key per entity kind, at most one
/// active affiliation per (doctor, establishment) pair, and a `created_at`
/// that is written on insert only.
///
/// All methods return `Send` futures so the trait can be used from
/// multi-threaded async runtimes.
pub trait DirectoryStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Identity map ──────────────────────────────────────────────────────

  /// The internal id bound to `external_key`, if any.
  fn lookup_identity(
    &self,
    kind: EntityKind,
    external_key: String,
  ) -> impl Future<Output = Result<Option<Uuid>, Self::Error>> + Send + '_;

  /// Bind `external_key` to `candidate` unless a binding already exists, and
  /// return whichever id is bound afterwards. Atomic with respect to other
  /// callers of the same backend.
  fn bind_identity(
    &self,
    kind: EntityKind,
    external_key: String,
    candidate: Uuid,
  ) -> impl Future<Output = Result<Uuid, Self::Error>> + Send + '_;

  /// The id of the persisted entity row carrying `external_key`, if any.
  /// Used to cross-check the identity map against the entity tables.
  fn entity_id_for_key(
    &self,
    kind: EntityKind,
    external_key: String,
  ) -> impl Future<Output = Result<Option<Uuid>, Self::Error>> + Send + '_;

  // ── Establishments ────────────────────────────────────────────────────

  fn get_establishment(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Establishment>, Self::Error>> + Send + '_;

  /// Insert or update one establishment row in a single atomic statement.
  fn put_establishment(
    &self,
    row: Stamped<Establishment>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn list_establishments(
    &self,
    include_inactive: bool,
  ) -> impl Future<Output = Result<Vec<Establishment>, Self::Error>> + Send + '_;

  // ── Doctors ───────────────────────────────────────────────────────────

  fn get_doctor(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Doctor>, Self::Error>> + Send + '_;

  fn put_doctor(
    &self,
    row: Stamped<Doctor>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn list_doctors(
    &self,
    include_inactive: bool,
  ) -> impl Future<Output = Result<Vec<Doctor>, Self::Error>> + Send + '_;

  // ── Affiliations ──────────────────────────────────────────────────────

  /// All affiliation rows of an establishment, oldest first.
  fn affiliations_for_establishment(
    &self,
    establishment_id: Uuid,
    include_inactive: bool,
  ) -> impl Future<Output = Result<Vec<Affiliation>, Self::Error>> + Send + '_;

  /// Insert or update a set of affiliation rows in one transaction, in the
  /// given order. Either every row is written or none is.
  fn put_affiliations(
    &self,
    rows: Vec<Stamped<Affiliation>>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

// ─── Entity plumbing ─────────────────────────────────────────────────────────

/// An entity kind with an external key, mergeable attributes and a
/// load/save pair on [`DirectoryStore`]. Lets the upsert path be written once
/// for establishments and doctors.
pub trait StoredEntity: Audited + Clone + PartialEq + Send + Sync + 'static {
  type Attrs: Merge + Clone + PartialEq + Send + Sync;

  const KIND: EntityKind;

  fn create(id: Uuid, external_key: String, attrs: Self::Attrs, at: DateTime<Utc>) -> Self;

  fn id(&self) -> Uuid;
  fn external_key(&self) -> &str;
  fn attrs(&self) -> &Self::Attrs;
  fn attrs_mut(&mut self) -> &mut Self::Attrs;
  fn is_active(&self) -> bool;
  fn set_active(&mut self, active: bool);

  fn load<S: DirectoryStore>(
    store: &S,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Self>, S::Error>> + Send + '_;

  fn save<S: DirectoryStore>(
    store: &S,
    row: Stamped<Self>,
  ) -> impl Future<Output = Result<(), S::Error>> + Send + '_;
}

impl StoredEntity for Establishment {
  type Attrs = EstablishmentAttrs;

  const KIND: EntityKind = EntityKind::Establishment;

  fn create(id: Uuid, external_key: String, attrs: Self::Attrs, at: DateTime<Utc>) -> Self {
    Self::new(id, external_key, attrs, at)
  }

  fn id(&self) -> Uuid { self.establishment_id }

  fn external_key(&self) -> &str { &self.external_key }

  fn attrs(&self) -> &Self::Attrs { &self.attrs }

  fn attrs_mut(&mut self) -> &mut Self::Attrs { &mut self.attrs }

  fn is_active(&self) -> bool { self.active }

  fn set_active(&mut self, active: bool) { self.active = active; }

  fn load<S: DirectoryStore>(
    store: &S,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Self>, S::Error>> + Send + '_ {
    store.get_establishment(id)
  }

  fn save<S: DirectoryStore>(
    store: &S,
    row: Stamped<Self>,
  ) -> impl Future<Output = Result<(), S::Error>> + Send + '_ {
    store.put_establishment(row)
  }
}

impl StoredEntity for Doctor {
  type Attrs = DoctorAttrs;

  const KIND: EntityKind = EntityKind::Doctor;

  fn create(id: Uuid, external_key: String, attrs: Self::Attrs, at: DateTime<Utc>) -> Self {
    Self::new(id, external_key, attrs, at)
  }

  fn id(&self) -> Uuid { self.doctor_id }

  fn external_key(&self) -> &str { &self.external_key }

  fn attrs(&self) -> &Self::Attrs { &self.attrs }

  fn attrs_mut(&mut self) -> &mut Self::Attrs { &mut self.attrs }

  fn is_active(&self) -> bool { self.active }

  fn set_active(&mut self, active: bool) { self.active = active; }

  fn load<S: DirectoryStore>(
    store: &S,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Self>, S::Error>> + Send + '_ {
    store.get_doctor(id)
  }

  fn save<S: DirectoryStore>(
    store: &S,
    row: Stamped<Self>,
  ) -> impl Future<Output = Result<(), S::Error>> + Send + '_ {
    store.put_doctor(row)
  }
}
