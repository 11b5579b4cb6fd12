//! Keyed mutual exclusion.
//!
//! One async mutex per key, created on first use and dropped again once the
//! last holder or waiter lets go, so the map only ever holds keys that are
//! currently contended. Unrelated keys never wait on each other.

use std::{
  collections::HashMap,
  hash::Hash,
  sync::{Arc, Mutex, PoisonError},
  time::Duration,
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots<K> = Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>;

pub struct KeyedLocks<K> {
  slots: Slots<K>,
}

impl<K> Default for KeyedLocks<K> {
  fn default() -> Self { Self { slots: Arc::new(Mutex::new(HashMap::new())) } }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
  pub fn new() -> Self { Self::default() }

  /// Wait until `key` is free and hold it until the guard is dropped.
  pub async fn lock(&self, key: K) -> KeyGuard<K> {
    let slot = {
      let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
      slots.entry(key.clone()).or_default().clone()
    };
    let guard = slot.lock_owned().await;
    KeyGuard { key, guard: Some(guard), slots: self.slots.clone() }
  }

  /// Like [`lock`](Self::lock), but give up after `wait`.
  pub async fn lock_timeout(&self, key: K, wait: Duration) -> Option<KeyGuard<K>> {
    tokio::time::timeout(wait, self.lock(key)).await.ok()
  }

  /// Number of keys currently held or waited on.
  pub fn contended(&self) -> usize {
    self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
  }
}

/// Holds one key of a [`KeyedLocks`]. Releasing it wakes the next waiter.
pub struct KeyGuard<K: Eq + Hash> {
  key:   K,
  guard: Option<OwnedMutexGuard<()>>,
  slots: Slots<K>,
}

impl<K: Eq + Hash> Drop for KeyGuard<K> {
  fn drop(&mut self) {
    let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
    drop(self.guard.take());
    // Only the map's own handle is left: nobody is waiting.
    if slots.get(&self.key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
      slots.remove(&self.key);
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;

  #[tokio::test]
  async fn released_keys_are_forgotten() {
    let locks = KeyedLocks::new();
    let guard = locks.lock("a").await;
    assert_eq!(locks.contended(), 1);
    drop(guard);
    assert_eq!(locks.contended(), 0);
  }

  #[tokio::test]
  async fn distinct_keys_do_not_block() {
    let locks = KeyedLocks::new();
    let _a = locks.lock("a").await;
    let b = locks.lock_timeout("b", Duration::from_millis(50)).await;
    assert!(b.is_some());
  }

  #[tokio::test]
  async fn same_key_times_out_while_held() {
    let locks = KeyedLocks::new();
    let held = locks.lock(7u32).await;
    assert!(locks.lock_timeout(7, Duration::from_millis(20)).await.is_none());
    drop(held);
    assert!(locks.lock_timeout(7, Duration::from_millis(20)).await.is_some());
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn holders_of_one_key_never_overlap() {
    let locks = Arc::new(KeyedLocks::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..16 {
      let (locks, inside, max_seen) = (locks.clone(), inside.clone(), max_seen.clone());
      tasks.spawn(async move {
        let _guard = locks.lock("shared").await;
        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
        max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2)).await;
        inside.fetch_sub(1, Ordering::SeqCst);
      });
    }
    while tasks.join_next().await.is_some() {}

    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert_eq!(locks.contended(), 0);
  }
}
