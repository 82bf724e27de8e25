use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classify::ErrorRecord;
use crate::models::{ConfigPackage, ToolResult};

/// Lifecycle status of a scrape job.
///
/// ```text
/// initializing --> running <--> paused
///                     |            |
///                     v            v (cancel only)
///   completed | completed_with_errors | failed | cancelled | timeout
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Initializing,
    Running,
    Paused,
    Completed,
    /// Partial success: some, but not all, URLs succeeded after retries.
    CompletedWithErrors,
    Failed,
    Cancelled,
    Timeout,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Initializing => "initializing",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithErrors => "completed_with_errors",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::CompletedWithErrors
                | JobStatus::Failed
                | JobStatus::Cancelled
                | JobStatus::Timeout
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Initializing, Running | Failed | Cancelled) => true,
            (Running, Paused) => true,
            (Running, next) => next.is_terminal(),
            (Paused, Running | Cancelled) => true,
            _ => false,
        }
    }

    pub const ALL: [JobStatus; 8] = [
        JobStatus::Initializing,
        JobStatus::Running,
        JobStatus::Paused,
        JobStatus::Completed,
        JobStatus::CompletedWithErrors,
        JobStatus::Failed,
        JobStatus::Cancelled,
        JobStatus::Timeout,
    ];
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("Unknown job status: {}", s))
    }
}

/// Progress counters of a running job.
///
/// All counters only grow, except `failed_urls` which shrinks when a retry
/// later succeeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub total_urls: usize,
    pub processed_urls: usize,
    pub successful_urls: usize,
    pub failed_urls: usize,
    pub retried_urls: usize,
    pub current_batch: usize,
    pub total_batches: usize,
}

impl JobProgress {
    pub fn new(total_urls: usize, batch_size: usize) -> Self {
        Self {
            total_urls,
            total_batches: total_batches(total_urls, batch_size),
            ..Default::default()
        }
    }

    /// Share of processed URLs in percent, rounded to one decimal.
    pub fn percentage(&self) -> f64 {
        if self.total_urls == 0 {
            return 0.0;
        }
        let pct = self.processed_urls as f64 * 100.0 / self.total_urls as f64;
        (pct * 10.0).round() / 10.0
    }
}

/// `ceil(total_urls / batch_size)`; a zero batch size is treated as 1.
pub fn total_batches(total_urls: usize, batch_size: usize) -> usize {
    total_urls.div_ceil(batch_size.max(1))
}

/// Partial progress update: only `Some` fields are applied.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressUpdate {
    pub processed_urls: Option<usize>,
    pub successful_urls: Option<usize>,
    pub failed_urls: Option<usize>,
    pub retried_urls: Option<usize>,
    pub current_batch: Option<usize>,
}

impl ProgressUpdate {
    pub fn apply(&self, progress: &mut JobProgress) {
        if let Some(v) = self.processed_urls {
            progress.processed_urls = v;
        }
        if let Some(v) = self.successful_urls {
            progress.successful_urls = v;
        }
        if let Some(v) = self.failed_urls {
            progress.failed_urls = v;
        }
        if let Some(v) = self.retried_urls {
            progress.retried_urls = v;
        }
        if let Some(v) = self.current_batch {
            progress.current_batch = v;
        }
    }
}

/// In-memory execution state of one job, owned by the
/// [`JobStateStore`](crate::state::JobStateStore).
#[derive(Debug, Clone, Serialize)]
pub struct JobExecutionState {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub start_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    /// Set exactly when `status` becomes terminal.
    pub end_time: Option<DateTime<Utc>>,
    pub cancel_requested: bool,
    pub pause_requested: bool,
    pub error: Option<String>,
    pub results: Option<Vec<ToolResult>>,
}

impl JobExecutionState {
    pub fn new(job_id: Uuid, total_urls: usize, batch_size: usize) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            status: JobStatus::Initializing,
            progress: JobProgress::new(total_urls, batch_size),
            start_time: now,
            last_update_time: now,
            end_time: None,
            cancel_requested: false,
            pause_requested: false,
            error: None,
            results: None,
        }
    }
}

/// Per-job execution knobs.
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub timeout: Duration,
    pub batch_size: usize,
    pub rate_limit_rps: f64,
    pub max_retry_attempts: u32,
    pub base_retry_delay: Duration,
    pub progress_log_interval: Duration,
    pub pause_poll_interval: Duration,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2 * 60 * 60),
            batch_size: 20,
            rate_limit_rps: 5.0,
            max_retry_attempts: 3,
            base_retry_delay: Duration::from_millis(5000),
            progress_log_interval: Duration::from_secs(30),
            pause_poll_interval: Duration::from_secs(1),
        }
    }
}

impl ExecutionOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_rate_limit(mut self, rps: f64) -> Self {
        self.rate_limit_rps = rps;
        self
    }

    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    pub fn with_base_retry_delay(mut self, delay: Duration) -> Self {
        self.base_retry_delay = delay;
        self
    }

    pub fn with_progress_log_interval(mut self, interval: Duration) -> Self {
        self.progress_log_interval = interval;
        self
    }

    pub fn with_pause_poll_interval(mut self, interval: Duration) -> Self {
        self.pause_poll_interval = interval;
        self
    }
}

/// A persisted scrape job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub id: Uuid,
    pub objective: String,
    pub urls: Vec<String>,
    pub config_package: Option<ConfigPackage>,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub error_details: Option<ErrorRecord>,
    pub results: Option<Vec<ToolResult>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Request to create a new job record.
#[derive(Debug, Clone)]
pub struct CreateScrapeJobRequest {
    pub objective: String,
    pub urls: Vec<String>,
    pub config_package: Option<ConfigPackage>,
}

impl CreateScrapeJobRequest {
    pub fn new(objective: impl Into<String>, urls: Vec<String>) -> Self {
        Self {
            objective: objective.into(),
            urls,
            config_package: None,
        }
    }

    pub fn with_config_package(mut self, package: ConfigPackage) -> Self {
        self.config_package = Some(package);
        self
    }
}

/// Operator-facing status snapshot of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusReport {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub percentage: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub elapsed_ms: i64,
    pub error: Option<String>,
}

impl JobStatusReport {
    pub fn from_state(state: &JobExecutionState, now: DateTime<Utc>) -> Self {
        let until = state.end_time.unwrap_or(now);
        Self {
            job_id: state.job_id,
            status: state.status,
            progress: state.progress,
            percentage: state.progress.percentage(),
            start_time: state.start_time,
            end_time: state.end_time,
            elapsed_ms: (until - state.start_time).num_milliseconds().max(0),
            error: state.error.clone(),
        }
    }
}
