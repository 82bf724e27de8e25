//! Execution orchestrator: drives a scrape job from `running` to a terminal
//! status.
//!
//! Each started job gets three tasks: the processing task (batches, retry
//! pass, terminal decision), a timeout watchdog and a periodic progress log.
//! The two timers share a per-job [`CancellationToken`] that every terminal
//! path cancels through [`ScrapeExecutor::cleanup`].

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::classify::ErrorClassifier;
use crate::error::AppError;
use crate::job::{
    ExecutionOptions, JobExecutionState, JobStatus, JobStatusReport, ProgressUpdate,
    total_batches,
};
use crate::models::{ConfigPackage, ToolResult};
use crate::rate_limiter::RateLimiter;
use crate::repository::JobRepository;
use crate::retry::{RetryPolicy, RetryTracker};
use crate::state::JobStateStore;
use crate::traits::{Extractor, ToolFactory};

/// Error message stored on jobs cancelled through [`ScrapeExecutor::cancel`].
pub const CANCEL_REASON: &str = "Job cancelled by operator";

/// Shortest pause poll interval; a zero interval would spin.
const MIN_PAUSE_POLL: Duration = Duration::from_millis(10);

/// Events emitted by the orchestrator for monitoring/logging.
#[derive(Debug, Clone)]
pub enum ExecutionEvent<'a> {
    JobStarted {
        job_id: Uuid,
        total_urls: usize,
        total_batches: usize,
    },
    InitializationFailed {
        job_id: Uuid,
        error: &'a str,
    },
    BatchStarted {
        job_id: Uuid,
        batch: usize,
        total_batches: usize,
        size: usize,
    },
    UrlFailed {
        job_id: Uuid,
        url: &'a str,
        error: &'a str,
        attempts: u32,
        will_retry: bool,
    },
    BatchFailed {
        job_id: Uuid,
        batch: usize,
        error: &'a str,
    },
    RetryPassStarted {
        job_id: Uuid,
        urls: usize,
    },
    Progress {
        state: &'a JobExecutionState,
    },
    Paused {
        job_id: Uuid,
    },
    Resumed {
        job_id: Uuid,
    },
    Cancelled {
        job_id: Uuid,
    },
    TimedOut {
        job_id: Uuid,
        timeout: Duration,
    },
    Finished {
        state: &'a JobExecutionState,
    },
    PersistenceFailed {
        job_id: Uuid,
        operation: &'static str,
        error: &'a str,
    },
    CleanedUp {
        job_id: Uuid,
    },
}

impl ExecutionEvent<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionEvent::JobStarted { .. } => "job_started",
            ExecutionEvent::InitializationFailed { .. } => "initialization_failed",
            ExecutionEvent::BatchStarted { .. } => "batch_started",
            ExecutionEvent::UrlFailed { .. } => "url_failed",
            ExecutionEvent::BatchFailed { .. } => "batch_failed",
            ExecutionEvent::RetryPassStarted { .. } => "retry_pass_started",
            ExecutionEvent::Progress { .. } => "progress",
            ExecutionEvent::Paused { .. } => "paused",
            ExecutionEvent::Resumed { .. } => "resumed",
            ExecutionEvent::Cancelled { .. } => "cancelled",
            ExecutionEvent::TimedOut { .. } => "timed_out",
            ExecutionEvent::Finished { .. } => "finished",
            ExecutionEvent::PersistenceFailed { .. } => "persistence_failed",
            ExecutionEvent::CleanedUp { .. } => "cleaned_up",
        }
    }
}

/// Trait for receiving execution events (decoupled logging).
pub trait ExecutionReporter: Send + Sync {
    fn report(&self, event: ExecutionEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingExecutionReporter;

impl ExecutionReporter for TracingExecutionReporter {
    fn report(&self, event: ExecutionEvent<'_>) {
        match event {
            ExecutionEvent::JobStarted {
                job_id,
                total_urls,
                total_batches,
            } => {
                tracing::info!(%job_id, total_urls, total_batches, "Job started");
            }
            ExecutionEvent::InitializationFailed { job_id, error } => {
                tracing::error!(%job_id, %error, "Tool initialization failed");
            }
            ExecutionEvent::BatchStarted {
                job_id,
                batch,
                total_batches,
                size,
            } => {
                tracing::info!(%job_id, batch, total_batches, size, "Processing batch");
            }
            ExecutionEvent::UrlFailed {
                job_id,
                url,
                error,
                attempts,
                will_retry,
            } => {
                tracing::warn!(%job_id, %url, %error, attempts, will_retry, "URL failed");
            }
            ExecutionEvent::BatchFailed {
                job_id,
                batch,
                error,
            } => {
                tracing::error!(%job_id, batch, %error, "Batch failed");
            }
            ExecutionEvent::RetryPassStarted { job_id, urls } => {
                tracing::info!(%job_id, urls, "Retrying failed URLs");
            }
            ExecutionEvent::Progress { state } => {
                let p = &state.progress;
                tracing::info!(
                    job_id = %state.job_id,
                    status = %state.status,
                    processed = p.processed_urls,
                    total = p.total_urls,
                    successful = p.successful_urls,
                    failed = p.failed_urls,
                    retried = p.retried_urls,
                    batch = p.current_batch,
                    total_batches = p.total_batches,
                    percentage = p.percentage(),
                    "Job progress"
                );
            }
            ExecutionEvent::Paused { job_id } => {
                tracing::info!(%job_id, "Job paused");
            }
            ExecutionEvent::Resumed { job_id } => {
                tracing::info!(%job_id, "Job resumed");
            }
            ExecutionEvent::Cancelled { job_id } => {
                tracing::info!(%job_id, "Job cancelled");
            }
            ExecutionEvent::TimedOut { job_id, timeout } => {
                tracing::warn!(%job_id, timeout_ms = %timeout.as_millis(), "Job timed out");
            }
            ExecutionEvent::Finished { state } => {
                tracing::info!(
                    job_id = %state.job_id,
                    status = %state.status,
                    successful = state.progress.successful_urls,
                    failed = state.progress.failed_urls,
                    error = ?state.error,
                    "Job finished"
                );
            }
            ExecutionEvent::PersistenceFailed {
                job_id,
                operation,
                error,
            } => {
                tracing::warn!(%job_id, operation, %error, "Failed to persist job update");
            }
            ExecutionEvent::CleanedUp { job_id } => {
                tracing::debug!(%job_id, "Job timers released");
            }
        }
    }
}

/// Timer handles and completion signal of one started job.
struct JobControl {
    timers: CancellationToken,
    cleaned_up: bool,
    done: watch::Receiver<bool>,
}

/// Results and counters gathered by one processing task.
#[derive(Debug, Default)]
struct JobRun {
    results: Vec<ToolResult>,
    processed: usize,
    successful: usize,
    failed: usize,
    retried: usize,
}

impl JobRun {
    fn record(&mut self, result: ToolResult) {
        self.processed += 1;
        if result.success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        self.results.push(result);
    }

    /// Replace the failed results of `url` with a successful retry.
    fn record_retry_success(&mut self, url: &str, result: ToolResult) {
        let mut replaced = 0;
        for slot in self
            .results
            .iter_mut()
            .filter(|r| !r.success && r.url == url)
        {
            *slot = result.clone();
            replaced += 1;
        }
        if replaced == 0 {
            self.results.push(result);
            return;
        }
        self.failed = self.failed.saturating_sub(replaced);
        self.successful += replaced;
    }

    fn progress(&self) -> ProgressUpdate {
        ProgressUpdate {
            processed_urls: Some(self.processed),
            successful_urls: Some(self.successful),
            failed_urls: Some(self.failed),
            retried_urls: Some(self.retried),
            current_batch: None,
        }
    }
}

struct Inner<R, F, RP> {
    repository: R,
    factory: F,
    reporter: RP,
    rate_limiter: RateLimiter,
    states: JobStateStore,
    classifier: ErrorClassifier,
    controls: Mutex<HashMap<Uuid, JobControl>>,
}

/// Runs scrape jobs in the background of the current tokio runtime.
///
/// Cloning yields another handle onto the same executor; the rate limiter,
/// tool factory and repository are injected and shared by every job.
pub struct ScrapeExecutor<R, F, RP = TracingExecutionReporter> {
    inner: Arc<Inner<R, F, RP>>,
}

impl<R, F, RP> Clone for ScrapeExecutor<R, F, RP> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R, F> ScrapeExecutor<R, F, TracingExecutionReporter>
where
    R: JobRepository + 'static,
    F: ToolFactory + 'static,
{
    pub fn new(repository: R, factory: F, rate_limiter: RateLimiter) -> Self {
        Self::with_reporter(repository, factory, rate_limiter, TracingExecutionReporter)
    }
}

impl<R, F, RP> ScrapeExecutor<R, F, RP>
where
    R: JobRepository + 'static,
    F: ToolFactory + 'static,
    RP: ExecutionReporter + 'static,
{
    pub fn with_reporter(repository: R, factory: F, rate_limiter: RateLimiter, reporter: RP) -> Self {
        Self {
            inner: Arc::new(Inner {
                repository,
                factory,
                reporter,
                rate_limiter,
                states: JobStateStore::new(),
                classifier: ErrorClassifier::new(),
                controls: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn state_store(&self) -> &JobStateStore {
        &self.inner.states
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.rate_limiter
    }

    /// Start processing `urls` in the background and return immediately.
    ///
    /// Starting a job id that is already tracked changes nothing and returns
    /// its current state. Must be called from within a tokio runtime.
    pub fn start(
        &self,
        job_id: Uuid,
        package: ConfigPackage,
        urls: Vec<String>,
        options: ExecutionOptions,
    ) -> JobExecutionState {
        let urls = dedup_urls(job_id, urls);
        let batch_size = options.batch_size.max(1);
        let registration = self
            .inner
            .states
            .create_execution_state(job_id, urls.len(), batch_size);
        if !registration.is_new() {
            tracing::warn!(%job_id, "Job is already tracked, ignoring start");
            return registration.into_state();
        }
        let initial = registration.into_state();
        let state = self
            .inner
            .states
            .update_status(job_id, JobStatus::Running, None)
            .unwrap_or(initial);

        let timers = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);
        self.lock_controls().insert(
            job_id,
            JobControl {
                timers: timers.clone(),
                cleaned_up: false,
                done: done_rx,
            },
        );

        self.report(ExecutionEvent::JobStarted {
            job_id,
            total_urls: state.progress.total_urls,
            total_batches: state.progress.total_batches,
        });

        self.spawn_watchdog(job_id, options.timeout, timers.clone());
        self.spawn_progress_log(job_id, options.progress_log_interval, timers);

        let executor = self.clone();
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(executor.run_job(job_id, package, urls, options))
                .catch_unwind()
                .await;
            if let Err(panic) = outcome {
                let message = panic_message(panic.as_ref());
                executor.fail_after_panic(job_id, message).await;
            }
            done_tx.send_replace(true);
        });

        state
    }

    /// Start a job for a stored record, using its URL list and package.
    pub async fn start_from_record(
        &self,
        job_id: Uuid,
        options: ExecutionOptions,
    ) -> Result<JobExecutionState, AppError> {
        let job = self
            .inner
            .repository
            .find_job(job_id)
            .await?
            .ok_or(AppError::JobNotFound(job_id))?;
        let package = job.config_package.ok_or_else(|| {
            AppError::InvalidConfigPackage(format!("Job {job_id} has no configuration package"))
        })?;
        package.validate()?;
        if job.urls.is_empty() {
            return Err(AppError::Generic(format!("Job {job_id} has no URLs to scrape")));
        }
        Ok(self.start(job_id, package, job.urls, options))
    }

    pub fn get_state(&self, job_id: Uuid) -> Option<JobExecutionState> {
        self.inner.states.get(job_id)
    }

    pub fn status_report(&self, job_id: Uuid) -> Option<JobStatusReport> {
        self.inner
            .states
            .get(job_id)
            .map(|state| JobStatusReport::from_state(&state, chrono::Utc::now()))
    }

    /// Cancel a tracked, non-terminal job. The processing task stops at its
    /// next URL or batch boundary.
    pub async fn cancel(&self, job_id: Uuid) -> bool {
        if self.inner.states.mark_cancelled(job_id, CANCEL_REASON).is_none() {
            tracing::debug!(%job_id, "Cancel ignored: job untracked or already finished");
            return false;
        }
        self.report(ExecutionEvent::Cancelled { job_id });

        let record = self.inner.classifier.cancelled(job_id, CANCEL_REASON);
        self.persist(
            job_id,
            "update_status",
            self.inner
                .repository
                .update_status(job_id, JobStatus::Cancelled, Some(CANCEL_REASON)),
        )
        .await;
        self.persist(
            job_id,
            "update_error",
            self.inner.repository.update_error(job_id, &record),
        )
        .await;

        self.cleanup(job_id);
        true
    }

    /// Pause a running job before its next batch.
    pub async fn pause(&self, job_id: Uuid) -> bool {
        if self.inner.states.mark_paused(job_id).is_none() {
            return false;
        }
        self.report(ExecutionEvent::Paused { job_id });
        self.persist(
            job_id,
            "update_status",
            self.inner
                .repository
                .update_status(job_id, JobStatus::Paused, None),
        )
        .await;
        true
    }

    pub async fn resume(&self, job_id: Uuid) -> bool {
        if self.inner.states.mark_resumed(job_id).is_none() {
            return false;
        }
        self.report(ExecutionEvent::Resumed { job_id });
        self.persist(
            job_id,
            "update_status",
            self.inner
                .repository
                .update_status(job_id, JobStatus::Running, None),
        )
        .await;
        true
    }

    /// Release the job's timers. Returns `false` when there was nothing to
    /// release (untracked job or cleanup already done).
    pub fn cleanup(&self, job_id: Uuid) -> bool {
        {
            let mut controls = self.lock_controls();
            let Some(control) = controls.get_mut(&job_id) else {
                return false;
            };
            if control.cleaned_up {
                return false;
            }
            control.cleaned_up = true;
            control.timers.cancel();
        }
        self.report(ExecutionEvent::CleanedUp { job_id });
        true
    }

    pub fn has_active_timers(&self, job_id: Uuid) -> bool {
        self.lock_controls()
            .get(&job_id)
            .is_some_and(|control| !control.cleaned_up)
    }

    /// Wait for the job's processing task to end and return the final state.
    pub async fn wait(&self, job_id: Uuid) -> Option<JobExecutionState> {
        let done = self
            .lock_controls()
            .get(&job_id)
            .map(|control| control.done.clone());
        if let Some(mut done) = done {
            // A closed channel also means the task is gone.
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.inner.states.get(job_id)
    }

    fn lock_controls(&self) -> MutexGuard<'_, HashMap<Uuid, JobControl>> {
        self.inner.controls.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned job control lock");
            poisoned.into_inner()
        })
    }

    fn report(&self, event: ExecutionEvent<'_>) {
        self.inner.reporter.report(event);
    }

    /// Await a repository write; failures are reported, never propagated.
    async fn persist<Fut>(&self, job_id: Uuid, operation: &'static str, write: Fut)
    where
        Fut: Future<Output = Result<(), AppError>>,
    {
        if let Err(e) = write.await {
            let error = e.to_string();
            self.report(ExecutionEvent::PersistenceFailed {
                job_id,
                operation,
                error: &error,
            });
        }
    }

    fn spawn_watchdog(&self, job_id: Uuid, timeout: Duration, timers: CancellationToken) {
        let executor = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(timeout) => executor.on_timeout(job_id, timeout).await,
                () = timers.cancelled() => {}
            }
        });
    }

    fn spawn_progress_log(&self, job_id: Uuid, every: Duration, timers: CancellationToken) {
        if every.is_zero() {
            return;
        }
        let executor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Some(state) = executor.inner.states.get(job_id) {
                            executor.report(ExecutionEvent::Progress { state: &state });
                        }
                    }
                    () = timers.cancelled() => break,
                }
            }
        });
    }

    async fn on_timeout(&self, job_id: Uuid, timeout: Duration) {
        let Some(state) = self.inner.states.get(job_id) else {
            return;
        };
        if state.status != JobStatus::Running {
            tracing::debug!(%job_id, status = %state.status, "Watchdog fired on a job that is not running");
            return;
        }
        let record = self
            .inner
            .classifier
            .timeout(job_id, timeout, &state.progress);
        if self
            .inner
            .states
            .update_status(job_id, JobStatus::Timeout, Some(record.message.clone()))
            .is_none()
        {
            return;
        }
        self.report(ExecutionEvent::TimedOut { job_id, timeout });

        self.persist(
            job_id,
            "update_status",
            self.inner.repository.update_status(
                job_id,
                JobStatus::Timeout,
                Some(&record.message),
            ),
        )
        .await;
        self.persist(
            job_id,
            "update_error",
            self.inner.repository.update_error(job_id, &record),
        )
        .await;
        self.cleanup(job_id);
    }

    /// Body of the processing task.
    async fn run_job(
        &self,
        job_id: Uuid,
        package: ConfigPackage,
        urls: Vec<String>,
        options: ExecutionOptions,
    ) {
        self.persist(
            job_id,
            "update_status",
            self.inner
                .repository
                .update_status(job_id, JobStatus::Running, None),
        )
        .await;

        let tool = match self.prepare_tool(&package).await {
            Ok(tool) => tool,
            Err(e) => {
                self.fail_initialization(job_id, e).await;
                return;
            }
        };

        // The tool outlives the unwinding boundary so it is cleaned up on every path.
        let stage = async {
            self.inner
                .rate_limiter
                .set_rate_limit(options.rate_limit_rps)
                .await;
            let mut tracker = RetryTracker::new(RetryPolicy {
                max_attempts: options.max_retry_attempts,
                base_delay: options.base_retry_delay,
            });
            let mut run = JobRun::default();

            self.process_batches(job_id, &tool, &package, &urls, &options, &mut run, &mut tracker)
                .await;
            self.retry_pass(job_id, &tool, &package, &options, &mut run, &mut tracker)
                .await;
            self.finish(job_id, &options, run, &tracker).await;
        };
        if let Err(panic) = AssertUnwindSafe(stage).catch_unwind().await {
            self.fail_after_panic(job_id, panic_message(panic.as_ref())).await;
        }

        if let Err(e) = tool.cleanup().await {
            tracing::warn!(%job_id, error = %e, "Tool cleanup failed");
        }
        self.cleanup(job_id);
    }

    async fn prepare_tool(&self, package: &ConfigPackage) -> Result<F::Tool, AppError> {
        let mut tool = self.inner.factory.create(package)?;
        if let Err(e) = tool.initialize(&package.scraper).await {
            if let Err(cleanup_err) = tool.cleanup().await {
                tracing::warn!(error = %cleanup_err, "Tool cleanup after failed initialization failed");
            }
            return Err(e);
        }
        Ok(tool)
    }

    async fn fail_initialization(&self, job_id: Uuid, error: AppError) {
        let message = error.to_string();
        self.report(ExecutionEvent::InitializationFailed {
            job_id,
            error: &message,
        });

        match self
            .inner
            .states
            .mark_failed(job_id, message.clone(), Vec::new())
        {
            Some(state) => {
                let record = self.inner.classifier.classify(
                    job_id,
                    &error,
                    Some(serde_json::json!({ "phase": "initialization" })),
                );
                self.persist(
                    job_id,
                    "update_status",
                    self.inner
                        .repository
                        .update_status(job_id, JobStatus::Failed, Some(&message)),
                )
                .await;
                self.persist(
                    job_id,
                    "update_error",
                    self.inner.repository.update_error(job_id, &record),
                )
                .await;
                self.report(ExecutionEvent::Finished { state: &state });
            }
            None => {
                tracing::debug!(%job_id, "Job left running state during initialization");
            }
        }
        self.cleanup(job_id);
    }

    /// Whether the processing task should stop issuing work.
    fn should_stop(&self, job_id: Uuid) -> bool {
        self.inner
            .states
            .get(job_id)
            .is_none_or(|state| state.cancel_requested || state.status.is_terminal())
    }

    /// Block while the job is paused. Returns `false` when the job was
    /// cancelled or otherwise ended and processing must stop.
    async fn wait_while_paused(&self, job_id: Uuid, poll: Duration) -> bool {
        let poll = poll.max(MIN_PAUSE_POLL);
        loop {
            let Some(state) = self.inner.states.get(job_id) else {
                return false;
            };
            if state.cancel_requested || state.status.is_terminal() {
                return false;
            }
            if state.status != JobStatus::Paused {
                return true;
            }
            tokio::time::sleep(poll).await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_batches(
        &self,
        job_id: Uuid,
        tool: &F::Tool,
        package: &ConfigPackage,
        urls: &[String],
        options: &ExecutionOptions,
        run: &mut JobRun,
        tracker: &mut RetryTracker,
    ) {
        let batch_size = options.batch_size.max(1);
        let total = total_batches(urls.len(), batch_size);

        for (index, batch) in urls.chunks(batch_size).enumerate() {
            if !self
                .wait_while_paused(job_id, options.pause_poll_interval)
                .await
            {
                tracing::info!(%job_id, batch = index + 1, "Stopping before batch");
                return;
            }
            self.report(ExecutionEvent::BatchStarted {
                job_id,
                batch: index + 1,
                total_batches: total,
                size: batch.len(),
            });

            let attempted_before = run.results.len();
            let outcome = AssertUnwindSafe(self.process_batch(job_id, tool, package, batch, run, tracker))
                .catch_unwind()
                .await;
            let completed = match outcome {
                Ok(completed) => completed,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    let attempted = run.results.len() - attempted_before;
                    self.fail_batch(job_id, index, batch, attempted, &message, run, tracker)
                        .await;
                    true
                }
            };

            if !completed {
                self.inner.states.update_progress(job_id, run.progress());
                return;
            }
            self.inner.states.update_progress(
                job_id,
                ProgressUpdate {
                    current_batch: Some(index + 1),
                    ..run.progress()
                },
            );
        }
    }

    /// Process one batch URL by URL. Returns `false` if stopped early.
    async fn process_batch(
        &self,
        job_id: Uuid,
        tool: &F::Tool,
        package: &ConfigPackage,
        batch: &[String],
        run: &mut JobRun,
        tracker: &mut RetryTracker,
    ) -> bool {
        for url in batch {
            if self.should_stop(job_id) {
                return false;
            }
            let result = self.invoke(tool, url, package).await;
            if !result.success {
                self.track_failure(job_id, url, &result, tracker);
            }
            run.record(result);
            self.inner.states.update_progress(job_id, run.progress());
        }
        true
    }

    /// Record every URL of a broken batch that got no result as failed.
    #[allow(clippy::too_many_arguments)]
    async fn fail_batch(
        &self,
        job_id: Uuid,
        index: usize,
        batch: &[String],
        attempted: usize,
        message: &str,
        run: &mut JobRun,
        tracker: &mut RetryTracker,
    ) {
        self.report(ExecutionEvent::BatchFailed {
            job_id,
            batch: index + 1,
            error: message,
        });
        for url in batch.iter().skip(attempted) {
            let result = ToolResult::failure(url.as_str(), message);
            self.track_failure(job_id, url, &result, tracker);
            run.record(result);
        }

        let record = self
            .inner
            .classifier
            .batch_failure(job_id, index, batch, message);
        self.persist(
            job_id,
            "update_error",
            self.inner.repository.update_error(job_id, &record),
        )
        .await;
    }

    /// Re-invoke the URLs whose backoff has elapsed, once each.
    async fn retry_pass(
        &self,
        job_id: Uuid,
        tool: &F::Tool,
        package: &ConfigPackage,
        options: &ExecutionOptions,
        run: &mut JobRun,
        tracker: &mut RetryTracker,
    ) {
        if !self
            .wait_while_paused(job_id, options.pause_poll_interval)
            .await
        {
            return;
        }
        let due = tracker.urls_due_for_retry();
        if due.is_empty() {
            return;
        }
        self.report(ExecutionEvent::RetryPassStarted {
            job_id,
            urls: due.len(),
        });

        for url in due {
            if self.should_stop(job_id) {
                break;
            }
            run.retried += 1;
            let result = AssertUnwindSafe(self.invoke(tool, &url, package))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| ToolResult::failure(url.as_str(), panic_message(panic.as_ref())));

            if result.success {
                tracker.track_successful_retry(&url);
                run.record_retry_success(&url, result);
            } else {
                self.track_failure(job_id, &url, &result, tracker);
            }
            self.inner.states.update_progress(job_id, run.progress());
        }
    }

    /// Run the tool for one URL behind the shared rate limiter. Tool errors
    /// become failed results.
    async fn invoke(&self, tool: &F::Tool, url: &str, package: &ConfigPackage) -> ToolResult {
        match self
            .inner
            .rate_limiter
            .execute(|| tool.execute(url, package))
            .await
        {
            Ok(result) => result,
            Err(e) => ToolResult::failure(url, e.to_string()),
        }
    }

    fn track_failure(
        &self,
        job_id: Uuid,
        url: &str,
        result: &ToolResult,
        tracker: &mut RetryTracker,
    ) {
        let error = result
            .error
            .as_deref()
            .unwrap_or("Tool reported an unsuccessful result");
        let decision = tracker.track_failed_url(url, error);
        self.report(ExecutionEvent::UrlFailed {
            job_id,
            url,
            error,
            attempts: decision.attempts_made,
            will_retry: decision.can_retry,
        });
    }

    /// Decide and persist the terminal outcome.
    async fn finish(
        &self,
        job_id: Uuid,
        options: &ExecutionOptions,
        run: JobRun,
        tracker: &RetryTracker,
    ) {
        // A job paused after its last batch completes once resumed.
        self.wait_while_paused(job_id, options.pause_poll_interval)
            .await;
        self.inner.states.update_progress(job_id, run.progress());

        let JobRun {
            results,
            successful,
            failed,
            ..
        } = run;

        let decided = if self.should_stop(job_id) {
            None
        } else {
            self.complete(job_id, results.clone(), successful, failed, tracker)
                .await
        };
        // Cancelled or timed out from outside: keep that status, store
        // whatever was gathered.
        let state = decided.or_else(|| self.inner.states.attach_results(job_id, results.clone()));

        self.persist(
            job_id,
            "update_results",
            self.inner.repository.update_results(job_id, &results),
        )
        .await;
        if let Some(state) = state {
            self.report(ExecutionEvent::Finished { state: &state });
        }
    }

    async fn complete(
        &self,
        job_id: Uuid,
        results: Vec<ToolResult>,
        successful: usize,
        failed: usize,
        tracker: &RetryTracker,
    ) -> Option<JobExecutionState> {
        let states = &self.inner.states;
        if failed == 0 {
            let state = states.mark_completed(job_id, results)?;
            self.persist(
                job_id,
                "update_status",
                self.inner
                    .repository
                    .update_status(job_id, JobStatus::Completed, None),
            )
            .await;
            return Some(state);
        }

        let stats = tracker.stats();
        let total = successful + failed;
        let message = format!(
            "{failed} of {total} URLs failed ({} exceeded the retry budget)",
            stats.max_retries_exceeded
        );
        let state = if successful == 0 {
            states.mark_failed(job_id, message.clone(), results)?
        } else {
            states.mark_completed_with_errors(job_id, results, message.clone())?
        };

        let record = self.inner.classifier.classify_message(
            job_id,
            &message,
            Some(serde_json::json!({
                "successfulUrls": successful,
                "failedUrls": failed,
                "pendingRetries": stats.pending_retries,
                "maxRetriesExceeded": stats.max_retries_exceeded,
            })),
        );
        self.persist(
            job_id,
            "update_status",
            self.inner
                .repository
                .update_status(job_id, state.status, Some(&message)),
        )
        .await;
        self.persist(
            job_id,
            "update_error",
            self.inner.repository.update_error(job_id, &record),
        )
        .await;
        Some(state)
    }

    async fn fail_after_panic(&self, job_id: Uuid, message: String) {
        tracing::error!(%job_id, error = %message, "Job processing panicked");
        let error = format!("Job processing aborted: {message}");
        if let Some(state) = self.inner.states.mark_failed(job_id, error.clone(), Vec::new()) {
            let mut record = self.inner.classifier.classify_message(
                job_id,
                &error,
                Some(serde_json::json!({ "phase": "execution" })),
            );
            record.error_type = Some("Panic".to_string());
            self.persist(
                job_id,
                "update_status",
                self.inner
                    .repository
                    .update_status(job_id, JobStatus::Failed, Some(&error)),
            )
            .await;
            self.persist(
                job_id,
                "update_error",
                self.inner.repository.update_error(job_id, &record),
            )
            .await;
            self.report(ExecutionEvent::Finished { state: &state });
        }
        self.cleanup(job_id);
    }
}

/// Drop repeated URLs, keeping first occurrences in order. Retry budgets
/// are tracked per URL, so each URL is scraped as a single unit.
fn dedup_urls(job_id: Uuid, urls: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(urls.len());
    let total = urls.len();
    let unique: Vec<String> = urls
        .into_iter()
        .filter(|url| seen.insert(url.clone()))
        .collect();
    if unique.len() < total {
        tracing::warn!(
            %job_id,
            dropped = total - unique.len(),
            "Ignoring duplicate URLs in job input"
        );
    }
    unique
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
