//! ghcrawl core - concurrent rate-limited fetch-and-persist pipeline
//!
//! Backlog items fan out to one fetch worker per API credential; outcomes fan
//! back in to a single writer that owns the relational store handle and the
//! rotating gzip archive.

pub mod api;
pub mod backlog;
pub mod error;
pub mod import;
pub mod logging;
pub mod persist;
pub mod pipeline;
pub mod progress;
pub mod ratelimit;
pub mod retry;
pub mod runtime;
pub mod shutdown;
pub mod sink;
pub mod stream;
pub mod types;
pub mod worker;
pub mod writer;

// Re-exports for convenience
pub use api::RemoteApi;
pub use backlog::{BacklogInput, BacklogStats};
pub use error::FetchError;
pub use import::{ImportSummary, import_archive};
pub use logging::{IndicatifLogger, init_logging};
pub use persist::Persistence;
pub use pipeline::{PipelineConfig, Summary, run_pipeline};
pub use progress::{ProgressContext, SharedProgress, fmt_num};
pub use ratelimit::RateLimitPolicy;
pub use retry::RetryPolicy;
pub use runtime::SHARED_RUNTIME;
pub use shutdown::{bridge_to_token, install_signal_handlers, is_shutdown_requested};
pub use sink::RotatingSink;
pub use types::{Credential, FetchOutcome, Page, QuotaInfo, UNKNOWN_ID, WorkItem, Workflow};
pub use worker::{WorkerConfig, WorkerStats};
pub use writer::WriterStats;
