//! SQLite backend for the docdir provider directory.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. The schema carries the cross-cutting
//! invariants (unique external keys, one active affiliation per pair, no
//! deletes) so they hold regardless of which process writes.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
