//! Integration tests for `SqliteStore` against an in-memory database.

use std::sync::Arc;

use chrono::{Duration, NaiveTime, TimeZone, Utc};
use docdir_core::{
  affiliation::{Affiliation, AffiliationTerms},
  audit::{Auditor, ManualClock},
  entity::{Doctor, DoctorAttrs, EntityKind, Establishment, EstablishmentAttrs, PersonName},
  store::DirectoryStore,
};
use uuid::Uuid;

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn clock() -> Arc<ManualClock> {
  Arc::new(ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()))
}

fn clinic(key: &str) -> Establishment {
  Establishment::new(
    Uuid::new_v4(),
    key.into(),
    EstablishmentAttrs {
      name: Some("City Clinic".into()),
      city: Some("Pune".into()),
      rating: Some(4.5),
      bed_count: Some(12),
      ..Default::default()
    },
    Utc::now(),
  )
}

fn doctor(key: &str) -> Doctor {
  Doctor::new(
    Uuid::new_v4(),
    key.into(),
    DoctorAttrs {
      name: Some(PersonName { first: "Dr. Asha".into(), last: "Rao".into() }),
      qualifications: vec!["MBBS".into(), "MD".into()],
      experience_years: Some(14),
      recommendation_percent: Some(97.0),
      ..Default::default()
    },
    Utc::now(),
  )
}

fn terms() -> AffiliationTerms {
  AffiliationTerms {
    begin_time:     NaiveTime::from_hms_opt(9, 0, 0),
    end_time:       NaiveTime::from_hms_opt(13, 0, 0),
    available_days: vec!["Mon".into(), "Thu".into()],
    fees:           vec!["500".into()],
  }
}

/// A store holding one establishment and one doctor.
async fn seeded(auditor: &Auditor) -> (SqliteStore, Establishment, Doctor) {
  let s = store().await;
  let est = clinic("est-1");
  let doc = doctor("doc-1");
  s.put_establishment(auditor.insert(est.clone())).await.unwrap();
  s.put_doctor(auditor.insert(doc.clone())).await.unwrap();
  (s, est, doc)
}

// ─── Identity map ────────────────────────────────────────────────────────────

#[tokio::test]
async fn first_binding_wins() {
  let s = store().await;
  let first = Uuid::new_v4();
  let second = Uuid::new_v4();

  assert!(s.lookup_identity(EntityKind::Doctor, "doc-1".into()).await.unwrap().is_none());

  let bound = s.bind_identity(EntityKind::Doctor, "doc-1".into(), first).await.unwrap();
  assert_eq!(bound, first);

  let bound = s.bind_identity(EntityKind::Doctor, "doc-1".into(), second).await.unwrap();
  assert_eq!(bound, first);

  let found = s.lookup_identity(EntityKind::Doctor, "doc-1".into()).await.unwrap();
  assert_eq!(found, Some(first));
}

#[tokio::test]
async fn identity_keys_are_scoped_by_kind() {
  let s = store().await;
  let est = s
    .bind_identity(EntityKind::Establishment, "42".into(), Uuid::new_v4())
    .await
    .unwrap();
  let doc = s.bind_identity(EntityKind::Doctor, "42".into(), Uuid::new_v4()).await.unwrap();
  assert_ne!(est, doc);
}

#[tokio::test]
async fn one_internal_id_cannot_serve_two_keys() {
  let s = store().await;
  let id = Uuid::new_v4();
  s.bind_identity(EntityKind::Doctor, "doc-1".into(), id).await.unwrap();
  assert!(s.bind_identity(EntityKind::Doctor, "doc-2".into(), id).await.is_err());
}

#[tokio::test]
async fn entity_id_for_key_reads_entity_tables() {
  let auditor = Auditor::default();
  let (s, est, doc) = seeded(&auditor).await;

  let found = s.entity_id_for_key(EntityKind::Establishment, "est-1".into()).await.unwrap();
  assert_eq!(found, Some(est.establishment_id));
  let found = s.entity_id_for_key(EntityKind::Doctor, "doc-1".into()).await.unwrap();
  assert_eq!(found, Some(doc.doctor_id));
  let found = s.entity_id_for_key(EntityKind::Doctor, "doc-9".into()).await.unwrap();
  assert!(found.is_none());
}

// ─── Entities ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn establishment_roundtrip() {
  let auditor = Auditor::new(clock());
  let s = store().await;
  let est = auditor.insert(clinic("est-1"));
  let expected = est.get().clone();

  s.put_establishment(est).await.unwrap();
  let fetched = s.get_establishment(expected.establishment_id).await.unwrap().unwrap();
  assert_eq!(fetched, expected);
}

#[tokio::test]
async fn doctor_roundtrip_keeps_lists_and_name() {
  let auditor = Auditor::new(clock());
  let s = store().await;
  let doc = auditor.insert(doctor("doc-1"));
  let expected = doc.get().clone();

  s.put_doctor(doc).await.unwrap();
  let fetched = s.get_doctor(expected.doctor_id).await.unwrap().unwrap();
  assert_eq!(fetched, expected);
  assert_eq!(fetched.attrs.qualifications, ["MBBS", "MD"]);
  assert_eq!(fetched.attrs.name.unwrap().last, "Rao");
}

#[tokio::test]
async fn get_missing_entity_returns_none() {
  let s = store().await;
  assert!(s.get_establishment(Uuid::new_v4()).await.unwrap().is_none());
  assert!(s.get_doctor(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn upsert_never_rewrites_created_at() {
  let clock = clock();
  let auditor = Auditor::new(clock.clone());
  let s = store().await;

  let est = clinic("est-1");
  s.put_establishment(auditor.insert(est.clone())).await.unwrap();
  let original = s.get_establishment(est.establishment_id).await.unwrap().unwrap();

  // A second insert-stamped write of the same row only moves updated_at.
  clock.advance(Duration::minutes(10));
  let mut renamed = original.clone();
  renamed.attrs.name = Some("City Clinic & Diagnostics".into());
  s.put_establishment(auditor.insert(renamed)).await.unwrap();

  let fetched = s.get_establishment(est.establishment_id).await.unwrap().unwrap();
  assert_eq!(fetched.created_at, original.created_at);
  assert_eq!(fetched.updated_at, original.updated_at + Duration::minutes(10));
  assert_eq!(fetched.attrs.name.as_deref(), Some("City Clinic & Diagnostics"));
}

#[tokio::test]
async fn external_key_is_unique_per_table() {
  let auditor = Auditor::default();
  let s = store().await;
  s.put_establishment(auditor.insert(clinic("est-1"))).await.unwrap();

  let err = s.put_establishment(auditor.insert(clinic("est-1"))).await;
  assert!(err.is_err());
}

#[tokio::test]
async fn list_filters_inactive_rows() {
  let auditor = Auditor::default();
  let (s, _, doc) = seeded(&auditor).await;
  s.put_doctor(auditor.insert(doctor("doc-2"))).await.unwrap();

  let mut retired = doc.clone();
  retired.active = false;
  s.put_doctor(auditor.update(retired)).await.unwrap();

  assert_eq!(s.list_doctors(false).await.unwrap().len(), 1);
  assert_eq!(s.list_doctors(true).await.unwrap().len(), 2);
  assert_eq!(s.list_establishments(false).await.unwrap().len(), 1);
}

// ─── Affiliations ────────────────────────────────────────────────────────────

#[tokio::test]
async fn affiliation_roundtrip() {
  let auditor = Auditor::new(clock());
  let (s, est, doc) = seeded(&auditor).await;

  let row = auditor.insert(Affiliation::new(doc.doctor_id, est.establishment_id, terms(), Utc::now()));
  let expected = row.get().clone();
  s.put_affiliations(vec![row]).await.unwrap();

  let rows = s.affiliations_for_establishment(est.establishment_id, false).await.unwrap();
  assert_eq!(rows, vec![expected]);
}

#[tokio::test]
async fn second_active_row_for_a_pair_is_rejected() {
  let auditor = Auditor::default();
  let (s, est, doc) = seeded(&auditor).await;

  let first = Affiliation::new(doc.doctor_id, est.establishment_id, terms(), Utc::now());
  s.put_affiliations(vec![auditor.insert(first.clone())]).await.unwrap();

  let duplicate = Affiliation::new(doc.doctor_id, est.establishment_id, terms(), Utc::now());
  assert!(s.put_affiliations(vec![auditor.insert(duplicate.clone())]).await.is_err());

  // Once the first row is inactive, a new active row is allowed.
  let mut retired = first;
  retired.active = false;
  s.put_affiliations(vec![auditor.update(retired), auditor.insert(duplicate)])
    .await
    .unwrap();

  let all = s.affiliations_for_establishment(est.establishment_id, true).await.unwrap();
  assert_eq!(all.len(), 2);
  assert_eq!(all.iter().filter(|a| a.active).count(), 1);
}

#[tokio::test]
async fn affiliation_batch_is_all_or_nothing() {
  let auditor = Auditor::default();
  let (s, est, doc) = seeded(&auditor).await;

  let ok = Affiliation::new(doc.doctor_id, est.establishment_id, terms(), Utc::now());
  // References a doctor that does not exist.
  let dangling = Affiliation::new(Uuid::new_v4(), est.establishment_id, terms(), Utc::now());

  let result = s
    .put_affiliations(vec![auditor.insert(ok), auditor.insert(dangling)])
    .await;
  assert!(result.is_err());

  let rows = s.affiliations_for_establishment(est.establishment_id, true).await.unwrap();
  assert!(rows.is_empty());
}

// ─── Storage-level guarantees ────────────────────────────────────────────────

#[tokio::test]
async fn deletes_are_refused() {
  let auditor = Auditor::default();
  let (s, est, doc) = seeded(&auditor).await;
  let row = Affiliation::new(doc.doctor_id, est.establishment_id, terms(), Utc::now());
  s.put_affiliations(vec![auditor.insert(row)]).await.unwrap();

  assert!(s.execute_raw("DELETE FROM affiliations").await.is_err());
  assert!(s.execute_raw("DELETE FROM doctors").await.is_err());
  assert!(s.execute_raw("DELETE FROM establishments").await.is_err());

  assert!(s.get_establishment(est.establishment_id).await.unwrap().is_some());
  assert!(s.get_doctor(doc.doctor_id).await.unwrap().is_some());
}

#[tokio::test]
async fn external_keys_cannot_be_rewritten() {
  let auditor = Auditor::default();
  let (s, _, doc) = seeded(&auditor).await;
  s.bind_identity(EntityKind::Doctor, "doc-1".into(), doc.doctor_id).await.unwrap();

  assert!(s.execute_raw("UPDATE doctors SET external_key = 'doc-9'").await.is_err());
  assert!(s.execute_raw("UPDATE identities SET external_key = 'x'").await.is_err());

  let found = s.entity_id_for_key(EntityKind::Doctor, "doc-1".into()).await.unwrap();
  assert!(found.is_some());
}
