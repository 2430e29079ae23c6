//! Redis Streams worker fleet: per-scope consumers with bounded
//! concurrency, pending-entry recovery, and scope reconciliation.

pub mod dispatcher;
pub mod error;
pub mod manager;
pub mod worker;

pub use dispatcher::Dispatcher;
pub use error::StreamError;
pub use manager::{WorkerManager, WorkerTemplate};
pub use worker::{StreamWorker, StreamWorkerConfig, WorkerState};
