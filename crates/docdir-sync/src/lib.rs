//! Reconciliation engine for the provider directory.
//!
//! A scrape batch flows through [`normalize`](docdir_core::normalize), the
//! [`IdentityResolver`](resolve::IdentityResolver), the
//! [`Upserter`](upsert::Upserter) and finally the
//! [`Reconciler`](reconcile::Reconciler), driven by the
//! [`Orchestrator`](batch::Orchestrator). Any [`DirectoryStore`] can back it.
//!
//! [`DirectoryStore`]: docdir_core::store::DirectoryStore

pub mod batch;
pub mod config;
pub mod error;
pub mod locks;
pub mod reconcile;
pub mod resolve;
pub mod retry;
pub mod upsert;

pub use batch::{BatchFailure, BatchReport, Orchestrator, SourcePayload};
pub use config::SyncConfig;
pub use error::{Error, ErrorKind, Result};
