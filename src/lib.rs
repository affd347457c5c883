// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod dedup;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod persist;
pub mod pipeline;
pub mod scorer;
pub mod source_weights;
pub mod store;
pub mod summarize;

pub use crate::api::create_router;
pub use crate::config::PipelineConfig;
pub use crate::error::{ConfigError, NormalizeError, ProviderError, StoreError};
pub use crate::pipeline::{FailureReason, Pipeline, RunReport, Stage};
