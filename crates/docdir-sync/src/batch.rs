//! Batch orchestrator: runs one scrape batch through normalization, identity
//! resolution, entity upserts and affiliation reconciliation.
//!
//! Nothing is checkpointed. Every stage is idempotent, so an interrupted
//! batch is recovered by running it again from the start.
//!
//! Reconciliation scope per establishment:
//! - its establishment record is in the batch: authoritative, doctors missing
//!   from the batch lose their affiliation;
//! - it is only referenced by affiliation records: additive;
//! - any of its affiliation records failed: additive, and listed in
//!   [`BatchReport::deactivation_skipped`], since the failed row may have been
//!   the only mention of a doctor that is still there.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use docdir_core::{
  audit::Auditor,
  entity::{Doctor, EntityKind, Establishment, Merge},
  normalize::{self, AffiliationRecord, CanonicalRecord, Stub},
  store::{DirectoryStore, StoredEntity},
  ValidationError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{Instrument as _, debug, info, info_span, warn};
use uuid::Uuid;

use crate::{
  Error, ErrorKind, Result, SyncConfig,
  reconcile::{Mode, Observed, ReconcileOutcome, Reconciler},
  resolve::IdentityResolver,
  retry::BackoffPolicy,
  upsert::{Applied, UpsertOutcome, Upserter},
};

// ─── Report ──────────────────────────────────────────────────────────────────

/// One raw record as delivered by the scraper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePayload {
  pub kind:   EntityKind,
  pub record: Value,
}

/// A record (or reconciliation) that did not make it into the store.
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
  pub kind:         EntityKind,
  /// For affiliations, `doctor_key@establishment_key`; for a failed
  /// reconciliation, the establishment key.
  pub external_key: Option<String>,
  pub error_kind:   ErrorKind,
  pub message:      String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
  pub batch_id:             Uuid,
  pub started_at:           DateTime<Utc>,
  pub finished_at:          DateTime<Utc>,
  /// Entities and affiliation rows inserted.
  pub created:              usize,
  /// Entities changed by a merge, plus affiliations refreshed or revived.
  pub updated:              usize,
  pub unchanged:            usize,
  pub deactivated:          usize,
  pub failed:               Vec<BatchFailure>,
  /// Establishment keys reconciled additively because some of their
  /// affiliation records failed.
  pub deactivation_skipped: Vec<String>,
}

impl BatchReport {
  fn new(batch_id: Uuid, started_at: DateTime<Utc>) -> Self {
    Self {
      batch_id,
      started_at,
      finished_at: started_at,
      created: 0,
      updated: 0,
      unchanged: 0,
      deactivated: 0,
      failed: Vec::new(),
      deactivation_skipped: Vec::new(),
    }
  }

  fn count(&mut self, outcome: UpsertOutcome) {
    match outcome {
      UpsertOutcome::Created => self.created += 1,
      UpsertOutcome::Updated => self.updated += 1,
      UpsertOutcome::Unchanged => self.unchanged += 1,
    }
  }

  fn count_reconcile(&mut self, outcome: &ReconcileOutcome) {
    let revived = outcome.reactivated.len();
    let refreshed = outcome.refreshed.len();
    self.created += outcome.activated.len() - revived;
    self.updated += revived + refreshed;
    self.unchanged += outcome.unchanged.len() - refreshed;
    self.deactivated += outcome.deactivated.len();
  }

  fn fail(&mut self, kind: EntityKind, external_key: Option<String>, err: &Error) {
    warn!(%kind, external_key = external_key.as_deref(), error = %err, "record failed");
    self.failed.push(BatchFailure {
      kind,
      external_key,
      error_kind: err.kind(),
      message: err.to_string(),
    });
  }
}

// ─── Orchestrator ────────────────────────────────────────────────────────────

/// The reconciliation engine. Shareable across concurrently running batches;
/// all coordination happens on per-key locks inside its components.
pub struct Orchestrator<S> {
  resolver:   IdentityResolver<S>,
  upserter:   Upserter<S>,
  reconciler: Reconciler<S>,
  auditor:    Auditor,
  retry:      BackoffPolicy,
}

/// Affiliation observations of one establishment within a batch.
#[derive(Default)]
struct EstablishmentObservations {
  id:       Option<Uuid>,
  observed: Observed,
  /// The establishment's own record was applied in this batch.
  listed:   bool,
  /// Some record concerning this establishment failed.
  tainted:  bool,
}

impl<S: DirectoryStore> Orchestrator<S> {
  pub fn new(store: Arc<S>, auditor: Auditor, config: &SyncConfig) -> Self {
    let retry = config.backoff();
    Self {
      resolver: IdentityResolver::new(store.clone()),
      upserter: Upserter::new(store.clone(), auditor.clone()),
      reconciler: Reconciler::new(store, auditor.clone(), config.reconcile_wait(), retry),
      auditor,
      retry,
    }
  }

  pub fn resolver(&self) -> &IdentityResolver<S> { &self.resolver }

  pub fn upserter(&self) -> &Upserter<S> { &self.upserter }

  pub fn reconciler(&self) -> &Reconciler<S> { &self.reconciler }

  /// Run one batch to completion. Per-record failures are collected in the
  /// report; they never abort the batch.
  pub async fn run_batch(&self, payloads: Vec<SourcePayload>) -> BatchReport {
    let batch_id = Uuid::new_v4();
    let span = info_span!("batch", %batch_id);
    async move {
      let mut report = BatchReport::new(batch_id, self.auditor.now());
      let mut scope: BTreeMap<String, EstablishmentObservations> = BTreeMap::new();
      info!(records = payloads.len(), "batch started");

      // 1. Normalize.
      let mut entities = Vec::new();
      let mut affiliations = Vec::new();
      for payload in &payloads {
        match normalize::normalize(payload.kind, &payload.record) {
          Ok(CanonicalRecord::Affiliation(record)) => affiliations.push(record),
          Ok(record) => entities.push(record),
          Err(err) => {
            if payload.kind == EntityKind::Affiliation
              && let Some(est_key) = raw_text(&payload.record, "establishment_key")
            {
              scope.entry(est_key).or_default().tainted = true;
            }
            report.fail(payload.kind, payload_key(payload), &Error::from(err));
          }
        }
      }

      // 2. Entities, so that affiliation references within the batch resolve.
      for record in &entities {
        match record {
          CanonicalRecord::Establishment(est) => {
            let key = &est.external_key;
            let result = self
              .retry
              .run("establishment upsert", move || self.upsert::<Establishment>(key, &est.attrs))
              .await;
            let slot = scope.entry(key.clone()).or_default();
            match result {
              Ok(applied) => {
                report.count(applied.outcome);
                slot.id = Some(applied.entity.establishment_id);
                slot.listed = true;
              }
              Err(err) => {
                slot.tainted = true;
                report.fail(EntityKind::Establishment, Some(key.clone()), &err);
              }
            }
          }
          CanonicalRecord::Doctor(doc) => {
            let key = &doc.external_key;
            let result = self
              .retry
              .run("doctor upsert", move || self.upsert::<Doctor>(key, &doc.attrs))
              .await;
            match result {
              Ok(applied) => report.count(applied.outcome),
              Err(err) => report.fail(EntityKind::Doctor, Some(key.clone()), &err),
            }
          }
          CanonicalRecord::Affiliation(_) => {}
        }
      }

      // 3. Affiliation references, folded per establishment.
      for record in &affiliations {
        let result = self.references(record, &mut report).await;
        let slot = scope.entry(record.establishment_key.clone()).or_default();
        match result {
          Ok((establishment_id, doctor_id)) => {
            slot.id = Some(establishment_id);
            slot
              .observed
              .entry(doctor_id)
              .and_modify(|terms| terms.merge_from(&record.terms))
              .or_insert_with(|| record.terms.clone());
          }
          Err(err) => {
            slot.tainted = true;
            let key = format!("{}@{}", record.doctor_key, record.establishment_key);
            report.fail(EntityKind::Affiliation, Some(key), &err);
          }
        }
      }

      // 4. Reconcile.
      for (est_key, slot) in &scope {
        let Some(establishment_id) = slot.id else { continue };
        let mode = if slot.listed && !slot.tainted { Mode::Authoritative } else { Mode::Additive };
        if slot.listed && slot.tainted {
          warn!(establishment = %est_key, "affiliation records failed, not deactivating");
          report.deactivation_skipped.push(est_key.clone());
        }
        if mode == Mode::Additive && slot.observed.is_empty() {
          continue;
        }

        match self.reconciler.run(establishment_id, &slot.observed, mode).await {
          Ok(outcome) => report.count_reconcile(&outcome),
          Err(err) => report.fail(EntityKind::Affiliation, Some(est_key.clone()), &err),
        }
      }

      report.finished_at = self.auditor.now();
      info!(
        created = report.created,
        updated = report.updated,
        unchanged = report.unchanged,
        deactivated = report.deactivated,
        failed = report.failed.len(),
        "batch finished"
      );
      report
    }
    .instrument(span)
    .await
  }

  /// Soft-deactivate the establishment or doctor known by `external_key`.
  pub async fn retire(&self, kind: EntityKind, external_key: &str) -> Result<UpsertOutcome> {
    match kind {
      EntityKind::Establishment => Ok(self.retire_entity::<Establishment>(external_key).await?.outcome),
      EntityKind::Doctor => Ok(self.retire_entity::<Doctor>(external_key).await?.outcome),
      EntityKind::Affiliation => Err(
        ValidationError::new("kind", "affiliations are deactivated by reconciliation").into(),
      ),
    }
  }

  async fn retire_entity<E: StoredEntity>(&self, external_key: &str) -> Result<Applied<E>> {
    let id = self
      .resolver
      .existing(E::KIND, external_key)
      .await?
      .ok_or_else(|| Error::NotFound { kind: E::KIND, external_key: external_key.to_owned() })?;
    let applied = self.retry.run("retire", move || self.upserter.retire::<E>(id)).await?;
    info!(kind = %E::KIND, external_key, outcome = ?applied.outcome, "retired");
    Ok(applied)
  }

  async fn upsert<E: StoredEntity>(&self, external_key: &str, attrs: &E::Attrs) -> Result<Applied<E>> {
    let id = self.resolver.resolve(E::KIND, external_key).await?;
    self.upserter.apply::<E>(id, external_key, attrs).await
  }

  /// The establishment and doctor ids of an affiliation record. Both sides
  /// are checked before any stub is written, and every stub written is
  /// counted in `report` as soon as it lands.
  async fn references(
    &self,
    record: &AffiliationRecord,
    report: &mut BatchReport,
  ) -> Result<(Uuid, Uuid)> {
    let establishment = self
      .reference::<Establishment>(
        "establishment_key",
        &record.establishment_key,
        record.establishment_stub.as_ref(),
      )
      .await?;
    let doctor = self
      .reference::<Doctor>("doctor_key", &record.doctor_key, record.doctor_stub.as_ref())
      .await?;

    let establishment_id = self.settle::<Establishment>(establishment, report).await?;
    let doctor_id = self.settle::<Doctor>(doctor, report).await?;

    debug!(
      establishment = %record.establishment_key,
      doctor = %record.doctor_key,
      "affiliation observed"
    );
    Ok((establishment_id, doctor_id))
  }

  /// Look up a referenced entity. An unknown entity needs a valid embedded
  /// stub; otherwise the reference is invalid.
  async fn reference<'r, E: StoredEntity>(
    &self,
    field: &str,
    external_key: &'r str,
    stub: Option<&'r Stub<E::Attrs>>,
  ) -> Result<Reference<'r, E::Attrs>> {
    let known = self
      .retry
      .run("reference lookup", move || self.resolver.existing(E::KIND, external_key))
      .await?;

    match (known, stub) {
      (Some(id), Some(Err(err))) => {
        warn!(kind = %E::KIND, external_key, error = %err, "ignoring invalid stub");
        Ok(Reference::Known(id))
      }
      (Some(id), _) => Ok(Reference::Known(id)),
      (None, Some(Ok(stub))) => Ok(Reference::Missing { external_key, stub }),
      (None, Some(Err(err))) => Err(err.clone().into()),
      (None, None) => Err(
        ValidationError::new(field, format!("no {} with key `{external_key}`", E::KIND)).into(),
      ),
    }
  }

  /// The id behind a checked reference, creating the entity from its stub
  /// if it is missing.
  async fn settle<E: StoredEntity>(
    &self,
    reference: Reference<'_, E::Attrs>,
    report: &mut BatchReport,
  ) -> Result<Uuid> {
    let (external_key, stub) = match reference {
      Reference::Known(id) => return Ok(id),
      Reference::Missing { external_key, stub } => (external_key, stub),
    };

    let applied = self
      .retry
      .run("stub create", move || async move {
        let id = self.resolver.resolve(E::KIND, external_key).await?;
        self.upserter.ensure::<E>(id, external_key, stub).await
      })
      .await?;
    report.count(applied.outcome);
    Ok(applied.entity.id())
  }
}

enum Reference<'r, A> {
  Known(Uuid),
  Missing { external_key: &'r str, stub: &'r A },
}

// ─── Raw payload helpers ─────────────────────────────────────────────────────

/// Best-effort key of a payload that failed to normalize.
fn payload_key(payload: &SourcePayload) -> Option<String> {
  match payload.kind {
    EntityKind::Affiliation => {
      let doctor = raw_text(&payload.record, "doctor_key");
      let establishment = raw_text(&payload.record, "establishment_key");
      match (doctor, establishment) {
        (Some(doc), Some(est)) => Some(format!("{doc}@{est}")),
        (doc, est) => doc.or(est),
      }
    }
    _ => raw_text(&payload.record, "external_key"),
  }
}

fn raw_text(record: &Value, field: &str) -> Option<String> {
  match record.get(field)? {
    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_owned()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn payloads_deserialize_from_wire_format() {
    let raw = json!([
      { "kind": "doctor", "record": { "external_key": "doc-1", "full_name": "Asha Rao" } },
      { "kind": "affiliation", "record": { "doctor_key": "doc-1", "establishment_key": "est-1" } }
    ]);
    let payloads: Vec<SourcePayload> = serde_json::from_value(raw).unwrap();
    assert_eq!(payloads[0].kind, EntityKind::Doctor);
    assert_eq!(payloads[1].kind, EntityKind::Affiliation);
  }

  #[test]
  fn failed_payloads_are_keyed_best_effort() {
    let pair = SourcePayload {
      kind:   EntityKind::Affiliation,
      record: json!({ "doctor_key": "doc-1", "establishment_key": 42 }),
    };
    assert_eq!(payload_key(&pair).as_deref(), Some("doc-1@42"));

    let nameless = SourcePayload {
      kind:   EntityKind::Doctor,
      record: json!({ "external_key": "  doc-9 " }),
    };
    assert_eq!(payload_key(&nameless).as_deref(), Some("doc-9"));

    let keyless = SourcePayload { kind: EntityKind::Establishment, record: json!({ "name": "x" }) };
    assert_eq!(payload_key(&keyless), None);
  }
}
