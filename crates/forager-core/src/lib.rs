pub mod classify;
pub mod config;
pub mod error;
pub mod job;
pub mod models;
pub mod orchestrator;
pub mod package;
pub mod rate_limiter;
pub mod repository;
pub mod retry;
pub mod state;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use classify::{ErrorCategory, ErrorClassifier, ErrorRecord, ErrorSeverity};
pub use config::EngineConfig;
pub use error::AppError;
pub use job::{
    CreateScrapeJobRequest, ExecutionOptions, JobExecutionState, JobProgress, JobStatus,
    JobStatusReport, ScrapeJob,
};
pub use models::{ConfigPackage, ToolConfig, ToolResult, compute_hash};
pub use orchestrator::{ExecutionEvent, ExecutionReporter, ScrapeExecutor, TracingExecutionReporter};
pub use rate_limiter::RateLimiter;
pub use repository::{JobRepository, NullJobRepository};
pub use state::JobStateStore;
pub use traits::{BlockDetector, Extractor, ProxyProvider, ToolFactory};
