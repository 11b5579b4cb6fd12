//! Core types and trait definitions for the docdir provider directory.
//!
//! This crate holds the domain model (establishments, doctors and their
//! affiliations), the canonical record normalizer, the audit stamping path and
//! the [`store::DirectoryStore`] abstraction. It has no database or runtime
//! dependencies; the storage backend and the reconciliation engine live in
//! their own crates.

pub mod affiliation;
pub mod audit;
pub mod entity;
pub mod error;
pub mod normalize;
pub mod store;

pub use error::{Error, Result, ValidationError};
