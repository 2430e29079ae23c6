//! Postgres-backed rule repository.
//!
//! Depends on `review-data` for the error type and `review-core` for the
//! `Rule` domain type. Owns the bulk load query, the two-channel sync
//! protocol (pub/sub notifications + polling), and the scope index.

pub mod error;
pub mod repository;

pub use error::{SqlxErrorExt, SqlxResult};
pub use repository::{ping_redis, RuleRepository};
