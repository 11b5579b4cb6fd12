//! Error types for the reconciliation engine.

use docdir_core::{ValidationError, entity::EntityKind};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  /// A source record was malformed. The record is skipped.
  #[error(transparent)]
  Validation(#[from] ValidationError),

  /// One external key was observed bound to two internal ids. Never resolved
  /// automatically.
  #[error(
    "identity collision for {kind} `{external_key}`: bound to {existing}, also seen as {conflicting}"
  )]
  IdentityCollision {
    kind:         EntityKind,
    external_key: String,
    existing:     Uuid,
    conflicting:  Uuid,
  },

  #[error("persistence error: {0}")]
  Persistence(#[source] Box<dyn std::error::Error + Send + Sync>),

  /// Another reconciliation of the same establishment held the lock for
  /// longer than the configured wait.
  #[error("reconciliation of establishment {0} is already in progress")]
  ReconciliationConflict(Uuid),

  #[error("no {kind} with external key `{external_key}`")]
  NotFound { kind: EntityKind, external_key: String },
}

impl Error {
  pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Persistence(Box::new(err))
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Validation(_) => ErrorKind::Validation,
      Self::IdentityCollision { .. } => ErrorKind::IdentityCollision,
      Self::Persistence(_) => ErrorKind::Persistence,
      Self::ReconciliationConflict(_) => ErrorKind::ReconciliationConflict,
      Self::NotFound { .. } => ErrorKind::NotFound,
    }
  }

  /// Only storage failures are worth another attempt; everything else fails
  /// the same way twice.
  pub fn is_retryable(&self) -> bool { matches!(self, Self::Persistence(_)) }
}

/// Flat discriminant of [`Error`], as it appears in a batch report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  Validation,
  IdentityCollision,
  Persistence,
  ReconciliationConflict,
  NotFound,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
