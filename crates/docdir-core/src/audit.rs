//! Audit timestamps for every persisted mutation.
//!
//! Storage backends accept writes only as [`Stamped<T>`] values, and the only
//! way to obtain one is through an [`Auditor`]. Every write path therefore
//! stamps `updated_at` with the operation time; `created_at` is set once when
//! a row is first inserted and carried forward unchanged afterwards.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

// ─── Clock ───────────────────────────────────────────────────────────────────

/// Source of operation timestamps.
pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> { Utc::now() }
}

/// A clock that only moves when told to. Used in tests.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
  pub fn new(start: DateTime<Utc>) -> Self { Self { now: Mutex::new(start) } }

  pub fn advance(&self, by: Duration) {
    let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
    *now += by;
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

// ─── Stamping ────────────────────────────────────────────────────────────────

/// A row type carrying creation and modification timestamps.
pub trait Audited {
  fn created_at(&self) -> DateTime<Utc>;
  fn updated_at(&self) -> DateTime<Utc>;
  fn set_audit_times(&mut self, created_at: DateTime<Utc>, updated_at: DateTime<Utc>);
}

/// A value whose audit timestamps were set by an [`Auditor`].
///
/// The field is private to this module; backends read the value through
/// [`Stamped::get`] but cannot construct one.
#[derive(Debug, Clone)]
pub struct Stamped<T>(T);

impl<T> Stamped<T> {
  pub fn get(&self) -> &T { &self.0 }

  pub fn into_inner(self) -> T { self.0 }
}

/// The single entry point that turns a pending mutation into a writable
/// [`Stamped`] value.
#[derive(Clone)]
pub struct Auditor {
  clock: Arc<dyn Clock>,
}

impl Default for Auditor {
  fn default() -> Self { Self::new(Arc::new(SystemClock)) }
}

impl Auditor {
  pub fn new(clock: Arc<dyn Clock>) -> Self { Self { clock } }

  pub fn now(&self) -> DateTime<Utc> { self.clock.now() }

  /// Stamp a row that is about to be inserted for the first time.
  pub fn insert<T: Audited>(&self, mut value: T) -> Stamped<T> {
    let now = self.clock.now();
    value.set_audit_times(now, now);
    Stamped(value)
  }

  /// Stamp a mutation of an existing row. `created_at` is preserved and
  /// `updated_at` never moves backwards, even if the clock does.
  pub fn update<T: Audited>(&self, mut value: T) -> Stamped<T> {
    let now = self.clock.now().max(value.updated_at());
    let created_at = value.created_at();
    value.set_audit_times(created_at, now);
    Stamped(value)
  }
}
