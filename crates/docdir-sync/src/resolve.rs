//! Identity resolver: external key → stable internal id.
//!
//! The store's identity map is the source of truth. Concurrent resolutions of
//! one key inside this process queue on a keyed lock, and the store binds
//! atomically, so exactly one id is ever allocated per key. Every resolved
//! binding is cross-checked against the entity tables and against earlier
//! answers given by this resolver; a disagreement is an identity collision.
//! Earlier answers are kept for at most [`SEEN_LIMIT`] keys; past that the
//! memory starts over, and the store checks still apply.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, PoisonError},
};

use docdir_core::{entity::EntityKind, store::DirectoryStore};
use tracing::{debug, error};
use uuid::Uuid;

use crate::{Error, Result, locks::KeyedLocks};

type IdentityKey = (EntityKind, String);

pub const SEEN_LIMIT: usize = 100_000;

pub struct IdentityResolver<S> {
  store:      Arc<S>,
  locks:      KeyedLocks<IdentityKey>,
  seen:       Mutex<HashMap<IdentityKey, Uuid>>,
  seen_limit: usize,
}

impl<S: DirectoryStore> IdentityResolver<S> {
  pub fn new(store: Arc<S>) -> Self { Self::with_seen_limit(store, SEEN_LIMIT) }

  pub fn with_seen_limit(store: Arc<S>, seen_limit: usize) -> Self {
    Self {
      store,
      locks: KeyedLocks::new(),
      seen: Mutex::new(HashMap::new()),
      seen_limit: seen_limit.max(1),
    }
  }

  /// Number of keys whose earlier answer is remembered.
  pub fn remembered(&self) -> usize {
    self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  /// The internal id for `external_key`, allocating and persisting one on
  /// first sight.
  pub async fn resolve(&self, kind: EntityKind, external_key: &str) -> Result<Uuid> {
    let key: IdentityKey = (kind, external_key.to_owned());
    let _guard = self.locks.lock(key.clone()).await;

    let bound = match self
      .store
      .lookup_identity(kind, key.1.clone())
      .await
      .map_err(Error::persistence)?
    {
      Some(id) => id,
      None => {
        let id = self
          .store
          .bind_identity(kind, key.1.clone(), Uuid::new_v4())
          .await
          .map_err(Error::persistence)?;
        debug!(%kind, external_key, %id, "allocated identity");
        id
      }
    };

    self.check(&key, bound).await?;
    self.remember(key, bound);
    Ok(bound)
  }

  /// The id of an already persisted entity with this key, without
  /// allocating anything.
  pub async fn existing(&self, kind: EntityKind, external_key: &str) -> Result<Option<Uuid>> {
    let row = self
      .store
      .entity_id_for_key(kind, external_key.to_owned())
      .await
      .map_err(Error::persistence)?;
    match row {
      // Resolved rather than returned directly, so that the row and the
      // identity map are checked against each other.
      Some(_) => self.resolve(kind, external_key).await.map(Some),
      None => Ok(None),
    }
  }

  async fn check(&self, key: &IdentityKey, bound: Uuid) -> Result<()> {
    let (kind, external_key) = key;

    let remembered = self.seen.lock().unwrap_or_else(PoisonError::into_inner).get(key).copied();
    if let Some(earlier) = remembered
      && earlier != bound
    {
      return Err(collision(*kind, external_key, earlier, bound));
    }

    let row = self
      .store
      .entity_id_for_key(*kind, external_key.clone())
      .await
      .map_err(Error::persistence)?;
    if let Some(row_id) = row
      && row_id != bound
    {
      return Err(collision(*kind, external_key, bound, row_id));
    }

    Ok(())
  }

  fn remember(&self, key: IdentityKey, id: Uuid) {
    let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
    if seen.len() >= self.seen_limit && !seen.contains_key(&key) {
      debug!(forgotten = seen.len(), "identity memory full, starting over");
      seen.clear();
    }
    seen.insert(key, id);
  }
}

fn collision(kind: EntityKind, external_key: &str, existing: Uuid, conflicting: Uuid) -> Error {
  error!(%kind, external_key, %existing, %conflicting, "identity collision");
  Error::IdentityCollision {
    kind,
    external_key: external_key.to_owned(),
    existing,
    conflicting,
  }
}

#[cfg(test)]
mod tests {
  use docdir_store_sqlite::SqliteStore;

  use super::*;

  #[tokio::test]
  async fn remembered_answers_are_bounded() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let resolver = IdentityResolver::with_seen_limit(store, 3);

    let mut ids = Vec::new();
    for n in 0..10 {
      ids.push(resolver.resolve(EntityKind::Doctor, &format!("doc-{n}")).await.unwrap());
      assert!(resolver.remembered() <= 3);
    }

    // Forgotten keys still resolve to the id the store bound.
    assert_eq!(resolver.resolve(EntityKind::Doctor, "doc-0").await.unwrap(), ids[0]);
    assert_eq!(resolver.resolve(EntityKind::Doctor, "doc-9").await.unwrap(), ids[9]);
  }
}
