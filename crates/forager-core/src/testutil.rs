//! Test utilities: mock implementations of the engine's collaborators.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::classify::ErrorRecord;
use crate::error::AppError;
use crate::job::{JobStatus, ScrapeJob};
use crate::models::{ConfigPackage, ToolConfig, ToolResult};
use crate::orchestrator::{ExecutionEvent, ExecutionReporter};
use crate::repository::JobRepository;
use crate::traits::{Extractor, ToolFactory};

/// Tool id the mock factory answers to; anything else is unknown.
pub const MOCK_TOOL_ID: &str = "mock";

pub fn mock_package() -> ConfigPackage {
    ConfigPackage::new(ToolConfig::new(MOCK_TOOL_ID, serde_json::json!({})))
}

pub fn urls(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("https://site.test/page/{i}")).collect()
}

// ---------------------------------------------------------------------------
// MockTool / MockToolFactory
// ---------------------------------------------------------------------------

/// What the mock tool does for one call.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Success,
    /// `execute` returns `Err`.
    Error(String),
    /// `execute` returns `Ok` with `success: false`.
    Unsuccessful(String),
    Panic(String),
}

#[derive(Default)]
struct MockToolShared {
    /// Per-URL queue of scripted outcomes, consumed call by call.
    scripts: Mutex<HashMap<String, VecDeque<MockOutcome>>>,
    /// URLs that fail on every call once their script is exhausted.
    permanent_failures: Mutex<HashMap<String, String>>,
    delay: Mutex<Duration>,
    init_error: Mutex<Option<String>>,
    calls: Mutex<Vec<String>>,
    created: Mutex<usize>,
    cleanups: Mutex<usize>,
}

impl MockToolShared {
    fn next_outcome(&self, url: &str) -> MockOutcome {
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front);
        if let Some(outcome) = scripted {
            return outcome;
        }
        match self.permanent_failures.lock().unwrap().get(url) {
            Some(message) => MockOutcome::Error(message.clone()),
            None => MockOutcome::Success,
        }
    }
}

/// Mock tool; all instances created by one factory share their script and
/// call log.
pub struct MockTool {
    shared: Arc<MockToolShared>,
}

impl Extractor for MockTool {
    async fn initialize(&mut self, _config: &ToolConfig) -> Result<(), AppError> {
        let error = self.shared.init_error.lock().unwrap().clone();
        match error {
            Some(message) => Err(AppError::tool(MOCK_TOOL_ID, message)),
            None => Ok(()),
        }
    }

    async fn execute(&self, url: &str, _package: &ConfigPackage) -> Result<ToolResult, AppError> {
        self.shared.calls.lock().unwrap().push(url.to_string());
        let outcome = self.shared.next_outcome(url);
        let delay = *self.shared.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match outcome {
            MockOutcome::Success => Ok(ToolResult::success(
                url,
                serde_json::json!({ "title": format!("Title of {url}") }),
            )),
            MockOutcome::Error(message) => Err(AppError::NetworkError(message)),
            MockOutcome::Unsuccessful(message) => Ok(ToolResult::failure(url, message)),
            MockOutcome::Panic(message) => panic!("{message}"),
        }
    }

    async fn cleanup(&self) -> Result<(), AppError> {
        *self.shared.cleanups.lock().unwrap() += 1;
        Ok(())
    }
}

/// Mock factory resolving [`MOCK_TOOL_ID`] to a scriptable [`MockTool`].
#[derive(Clone, Default)]
pub struct MockToolFactory {
    shared: Arc<MockToolShared>,
}

impl MockToolFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script `url` to fail `times` times before succeeding.
    pub fn fail_times(self, url: &str, times: usize, message: &str) -> Self {
        let outcomes = vec![MockOutcome::Error(message.to_string()); times];
        self.with_outcomes(url, outcomes)
    }

    pub fn fail_always(self, url: &str, message: &str) -> Self {
        self.shared
            .permanent_failures
            .lock()
            .unwrap()
            .insert(url.to_string(), message.to_string());
        self
    }

    pub fn with_outcomes(self, url: &str, outcomes: Vec<MockOutcome>) -> Self {
        self.shared
            .scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(outcomes);
        self
    }

    /// Virtual time every `execute` call takes.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.shared.delay.lock().unwrap() = delay;
        self
    }

    pub fn with_init_error(self, message: &str) -> Self {
        *self.shared.init_error.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.shared.calls.lock().unwrap().clone()
    }

    pub fn created(&self) -> usize {
        *self.shared.created.lock().unwrap()
    }

    pub fn cleanups(&self) -> usize {
        *self.shared.cleanups.lock().unwrap()
    }
}

impl ToolFactory for MockToolFactory {
    type Tool = MockTool;

    fn create(&self, package: &ConfigPackage) -> Result<MockTool, AppError> {
        if package.scraper.tool_id != MOCK_TOOL_ID {
            return Err(AppError::ToolNotFound(package.scraper.tool_id.clone()));
        }
        *self.shared.created.lock().unwrap() += 1;
        Ok(MockTool {
            shared: Arc::clone(&self.shared),
        })
    }
}

// ---------------------------------------------------------------------------
// MockJobRepository
// ---------------------------------------------------------------------------

/// Mock repository recording every write.
#[derive(Clone, Default)]
pub struct MockJobRepository {
    jobs: Arc<Mutex<HashMap<Uuid, ScrapeJob>>>,
    pub statuses: Arc<Mutex<Vec<(Uuid, JobStatus, Option<String>)>>>,
    pub errors: Arc<Mutex<Vec<(Uuid, ErrorRecord)>>>,
    pub results: Arc<Mutex<Vec<(Uuid, Vec<ToolResult>)>>>,
    fail_writes: Arc<Mutex<bool>>,
}

impl MockJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job(self, job: ScrapeJob) -> Self {
        self.jobs.lock().unwrap().insert(job.id, job);
        self
    }

    /// Every write fails with a database error.
    pub fn failing() -> Self {
        let repo = Self::default();
        *repo.fail_writes.lock().unwrap() = true;
        repo
    }

    pub fn status_history(&self, job_id: Uuid) -> Vec<JobStatus> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| *id == job_id)
            .map(|(_, status, _)| *status)
            .collect()
    }

    pub fn errors_for(&self, job_id: Uuid) -> Vec<ErrorRecord> {
        self.errors
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == job_id)
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Last result set written for the job.
    pub fn results_for(&self, job_id: Uuid) -> Option<Vec<ToolResult>> {
        self.results
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _)| *id == job_id)
            .map(|(_, results)| results.clone())
    }

    fn check_writable(&self) -> Result<(), AppError> {
        if *self.fail_writes.lock().unwrap() {
            Err(AppError::DatabaseError("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

impl JobRepository for MockJobRepository {
    async fn find_job(&self, id: Uuid) -> Result<Option<ScrapeJob>, AppError> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), AppError> {
        self.check_writable()?;
        self.statuses
            .lock()
            .unwrap()
            .push((id, status, error.map(str::to_string)));
        Ok(())
    }

    async fn update_error(&self, id: Uuid, error: &ErrorRecord) -> Result<(), AppError> {
        self.check_writable()?;
        self.errors.lock().unwrap().push((id, error.clone()));
        Ok(())
    }

    async fn update_results(&self, id: Uuid, results: &[ToolResult]) -> Result<(), AppError> {
        self.check_writable()?;
        self.results.lock().unwrap().push((id, results.to_vec()));
        Ok(())
    }
}

/// A stored job record in `initializing` status.
pub fn scrape_job(id: Uuid, urls: Vec<String>, package: Option<ConfigPackage>) -> ScrapeJob {
    let now = Utc::now();
    ScrapeJob {
        id,
        objective: "collect page titles".into(),
        urls,
        config_package: package,
        status: JobStatus::Initializing,
        error_message: None,
        error_details: None,
        results: None,
        created_at: now,
        updated_at: now,
        started_at: None,
        completed_at: None,
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Reporter recording the name of every event.
#[derive(Clone, Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
    panic_on: Option<&'static str>,
}

impl MockReporter {
    /// Reporter that panics after recording the named event.
    pub fn panicking_on(name: &'static str) -> Self {
        Self {
            panic_on: Some(name),
            ..Self::default()
        }
    }

    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.as_str() == name)
            .count()
    }
}

impl ExecutionReporter for MockReporter {
    fn report(&self, event: ExecutionEvent<'_>) {
        let name = event.name();
        self.events.lock().unwrap().push(name.to_string());
        if self.panic_on == Some(name) {
            panic!("reporter refused {name}");
        }
    }
}
