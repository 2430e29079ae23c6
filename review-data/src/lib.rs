//! Backend-agnostic data access abstractions for the rule repository.
//!
//! This crate defines the error type shared by rule-repository backends,
//! with zero database driver dependencies. The concrete, rule-specific
//! repository (database load + two-channel sync) lives in
//! `review-data-sqlx`.

pub mod error;

pub use error::DataError;
