//! Error types for `docdir-core`.

use thiserror::Error;

/// A source record was malformed or missing a required field.
///
/// `field` is the dotted path of the offending field inside the payload, e.g.
/// `rating` or `doctor.full_name`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid field `{field}`: {reason}")]
pub struct ValidationError {
  pub field:  String,
  pub reason: String,
}

impl ValidationError {
  pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
    Self { field: field.into(), reason: reason.into() }
  }

  pub fn missing(field: impl Into<String>) -> Self {
    Self::new(field, "required field is missing or empty")
  }
}

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error("unknown entity kind: {0:?}")]
  UnknownKind(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
