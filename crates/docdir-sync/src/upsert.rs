//! Upsert coordinator: merges canonical attributes into persisted entities.
//!
//! Writers to one internal id are serialized; writers to different ids run
//! freely. Each write is a single store statement, so a record is either
//! applied in full or not at all.

use std::sync::Arc;

use docdir_core::{audit::Auditor, entity::Merge, store::{DirectoryStore, StoredEntity}};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::{Error, Result, locks::KeyedLocks};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
  Created,
  Updated,
  /// The merge produced exactly the stored state; nothing was written.
  Unchanged,
}

/// The entity state after an upsert, and what the upsert did.
#[derive(Debug, Clone)]
pub struct Applied<E> {
  pub entity:  E,
  pub outcome: UpsertOutcome,
}

pub struct Upserter<S> {
  store:   Arc<S>,
  auditor: Auditor,
  locks:   KeyedLocks<Uuid>,
}

impl<S: DirectoryStore> Upserter<S> {
  pub fn new(store: Arc<S>, auditor: Auditor) -> Self {
    Self { store, auditor, locks: KeyedLocks::new() }
  }

  /// Merge `attrs` into the entity `id`, creating it if absent.
  ///
  /// Present fields overwrite, absent fields are kept. An observed entity is
  /// always active afterwards.
  pub async fn apply<E: StoredEntity>(
    &self,
    id: Uuid,
    external_key: &str,
    attrs: &E::Attrs,
  ) -> Result<Applied<E>> {
    let _guard = self.locks.lock(id).await;

    let Some(current) = E::load(&*self.store, id).await.map_err(Error::persistence)? else {
      return self.create::<E>(id, external_key, attrs.clone()).await;
    };

    let mut next = current.clone();
    next.attrs_mut().merge_from(attrs);
    next.set_active(true);
    self.write_update(current, next).await
  }

  /// Create the entity from `attrs` only if it does not exist yet. An
  /// existing entity is returned untouched.
  pub async fn ensure<E: StoredEntity>(
    &self,
    id: Uuid,
    external_key: &str,
    attrs: &E::Attrs,
  ) -> Result<Applied<E>> {
    let _guard = self.locks.lock(id).await;

    match E::load(&*self.store, id).await.map_err(Error::persistence)? {
      Some(entity) => Ok(Applied { entity, outcome: UpsertOutcome::Unchanged }),
      None => self.create::<E>(id, external_key, attrs.clone()).await,
    }
  }

  /// Soft-deactivate the entity `id`.
  pub async fn retire<E: StoredEntity>(&self, id: Uuid) -> Result<Applied<E>> {
    let _guard = self.locks.lock(id).await;

    let Some(current) = E::load(&*self.store, id).await.map_err(Error::persistence)? else {
      return Err(Error::NotFound { kind: E::KIND, external_key: id.to_string() });
    };

    let mut next = current.clone();
    next.set_active(false);
    self.write_update(current, next).await
  }

  async fn create<E: StoredEntity>(
    &self,
    id: Uuid,
    external_key: &str,
    attrs: E::Attrs,
  ) -> Result<Applied<E>> {
    let entity = E::create(id, external_key.to_owned(), attrs, self.auditor.now());
    let stamped = self.auditor.insert(entity);
    let entity = stamped.get().clone();
    E::save(&*self.store, stamped).await.map_err(Error::persistence)?;

    debug!(kind = %E::KIND, external_key, %id, "created");
    Ok(Applied { entity, outcome: UpsertOutcome::Created })
  }

  async fn write_update<E: StoredEntity>(&self, current: E, next: E) -> Result<Applied<E>> {
    if next == current {
      return Ok(Applied { entity: current, outcome: UpsertOutcome::Unchanged });
    }

    let stamped = self.auditor.update(next);
    let entity = stamped.get().clone();
    E::save(&*self.store, stamped).await.map_err(Error::persistence)?;

    debug!(kind = %E::KIND, external_key = entity.external_key(), id = %entity.id(), "updated");
    Ok(Applied { entity, outcome: UpsertOutcome::Updated })
  }
}
