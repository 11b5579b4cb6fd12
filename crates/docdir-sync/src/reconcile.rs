//! Affiliation reconciler: diffs an establishment's affiliations against the
//! doctors observed for it and applies the transitions.
//!
//! Rows are never deleted. A pair that disappears is flipped inactive; a pair
//! that comes back flips its most recent historical row active again instead
//! of growing a new one. Every write of one reconciliation commits in a
//! single transaction.

use std::{
  collections::{BTreeMap, BTreeSet, HashMap},
  sync::Arc,
  time::Duration,
};

use chrono::{DateTime, Utc};
use docdir_core::{
  affiliation::{Affiliation, AffiliationTerms},
  audit::Auditor,
  entity::Merge,
  store::DirectoryStore,
};
use serde::Serialize;
use tracing::{Instrument as _, debug, info_span};
use uuid::Uuid;

use crate::{Error, Result, locks::KeyedLocks, retry::BackoffPolicy};

/// Doctors observed at one establishment, with the latest terms for each.
pub type Observed = BTreeMap<Uuid, AffiliationTerms>;

/// Whether doctors missing from the observation are deactivated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  /// The observation is the establishment's complete doctor list.
  Authoritative,
  /// The observation is a subset; nothing is deactivated.
  Additive,
}

/// Doctor ids grouped by the transition their affiliation went through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
  pub activated:   BTreeSet<Uuid>,
  pub deactivated: BTreeSet<Uuid>,
  pub unchanged:   BTreeSet<Uuid>,
  /// Subset of `activated` served by reviving a historical row.
  pub reactivated: BTreeSet<Uuid>,
  /// Subset of `unchanged` whose terms were updated.
  pub refreshed:   BTreeSet<Uuid>,
}

impl ReconcileOutcome {
  /// True when no pair changed state. Term refreshes do not count.
  pub fn is_settled(&self) -> bool { self.activated.is_empty() && self.deactivated.is_empty() }
}

// ─── Planning ────────────────────────────────────────────────────────────────

enum Write {
  Insert(Affiliation),
  Update(Affiliation),
}

struct Plan {
  writes:  Vec<Write>,
  outcome: ReconcileOutcome,
}

/// Compute the writes that move `rows` (every affiliation row of one
/// establishment, active or not) to match `observed`.
fn plan(
  establishment_id: Uuid,
  rows: &[Affiliation],
  observed: &Observed,
  mode: Mode,
  at: DateTime<Utc>,
) -> Plan {
  let mut active: HashMap<Uuid, &Affiliation> = HashMap::new();
  let mut history: HashMap<Uuid, &Affiliation> = HashMap::new();
  for row in rows {
    if row.active {
      active.entry(row.doctor_id).or_insert(row);
    } else {
      history
        .entry(row.doctor_id)
        .and_modify(|latest| {
          if row.updated_at >= latest.updated_at {
            *latest = row;
          }
        })
        .or_insert(row);
    }
  }

  let mut outcome = ReconcileOutcome::default();
  let mut deactivations = Vec::new();
  let mut writes = Vec::new();

  if mode == Mode::Authoritative {
    for (doctor_id, row) in &active {
      if !observed.contains_key(doctor_id) {
        let mut row = (*row).clone();
        row.active = false;
        deactivations.push(Write::Update(row));
        outcome.deactivated.insert(*doctor_id);
      }
    }
  }

  for (doctor_id, terms) in observed {
    if let Some(row) = active.get(doctor_id) {
      outcome.unchanged.insert(*doctor_id);
      let mut merged = row.terms.clone();
      merged.merge_from(terms);
      if merged != row.terms {
        let mut row = (*row).clone();
        row.terms = merged;
        writes.push(Write::Update(row));
        outcome.refreshed.insert(*doctor_id);
      }
    } else if let Some(row) = history.get(doctor_id) {
      let mut row = (*row).clone();
      row.terms.merge_from(terms);
      row.active = true;
      writes.push(Write::Update(row));
      outcome.activated.insert(*doctor_id);
      outcome.reactivated.insert(*doctor_id);
    } else {
      writes.push(Write::Insert(Affiliation::new(*doctor_id, establishment_id, terms.clone(), at)));
      outcome.activated.insert(*doctor_id);
    }
  }

  // Deactivations first.
  deactivations.extend(writes);
  Plan { writes: deactivations, outcome }
}

// ─── Reconciler ──────────────────────────────────────────────────────────────

pub struct Reconciler<S> {
  store:   Arc<S>,
  auditor: Auditor,
  locks:   KeyedLocks<Uuid>,
  wait:    Duration,
  retry:   BackoffPolicy,
}

impl<S: DirectoryStore> Reconciler<S> {
  pub fn new(store: Arc<S>, auditor: Auditor, wait: Duration, retry: BackoffPolicy) -> Self {
    Self { store, auditor, locks: KeyedLocks::new(), wait, retry }
  }

  /// Make the active doctors of `establishment_id` exactly the observed set.
  pub async fn reconcile(
    &self,
    establishment_id: Uuid,
    observed: &Observed,
  ) -> Result<ReconcileOutcome> {
    self.run(establishment_id, observed, Mode::Authoritative).await
  }

  /// Activate and refresh the observed doctors without deactivating others.
  pub async fn attach(&self, establishment_id: Uuid, observed: &Observed) -> Result<ReconcileOutcome> {
    self.run(establishment_id, observed, Mode::Additive).await
  }

  pub async fn run(
    &self,
    establishment_id: Uuid,
    observed: &Observed,
    mode: Mode,
  ) -> Result<ReconcileOutcome> {
    let span = info_span!("reconcile", %establishment_id, ?mode);
    async move {
      let _guard = self
        .locks
        .lock_timeout(establishment_id, self.wait)
        .await
        .ok_or(Error::ReconciliationConflict(establishment_id))?;

      // Each attempt re-reads the rows, so a retry never writes a stale plan.
      let outcome = self
        .retry
        .run("reconcile", move || self.reconcile_once(establishment_id, observed, mode))
        .await?;

      debug!(
        activated = outcome.activated.len(),
        deactivated = outcome.deactivated.len(),
        unchanged = outcome.unchanged.len(),
        "reconciled"
      );
      Ok(outcome)
    }
    .instrument(span)
    .await
  }

  /// Hold the reconciliation lock of `establishment_id` until the guard drops.
  #[cfg(test)]
  pub(crate) async fn hold(&self, establishment_id: Uuid) -> crate::locks::KeyGuard<Uuid> {
    self.locks.lock(establishment_id).await
  }

  async fn reconcile_once(
    &self,
    establishment_id: Uuid,
    observed: &Observed,
    mode: Mode,
  ) -> Result<ReconcileOutcome> {
    let rows = self
      .store
      .affiliations_for_establishment(establishment_id, true)
      .await
      .map_err(Error::persistence)?;

    let Plan { writes, outcome } = plan(establishment_id, &rows, observed, mode, self.auditor.now());

    let stamped = writes
      .into_iter()
      .map(|write| match write {
        Write::Insert(row) => self.auditor.insert(row),
        Write::Update(row) => self.auditor.update(row),
      })
      .collect();
    self.store.put_affiliations(stamped).await.map_err(Error::persistence)?;

    Ok(outcome)
  }
}
