//! Structured logging and distributed tracing for the review service.
//!
//! Wraps a `tracing-subscriber` stack (env-filter + fmt layer) with an
//! optional OpenTelemetry OTLP exporter behind the `otlp` feature.
//!
//! # Usage
//!
//! ```rust,ignore
//! use review_observability::{init_tracing, ObservabilityConfig};
//!
//! let _guard = init_tracing(&ObservabilityConfig::new("reviewd"));
//! ```

pub mod config;
pub mod tracing_setup;

pub use config::{LogFormat, ObservabilityConfig, OtlpProtocol, PropagationFormat};
pub use tracing_setup::{init_tracing, OtelGuard};
