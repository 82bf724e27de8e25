//! Authoritative in-memory state of every job the process has started.
//!
//! All mutators are synchronous, stamp `last_update_time`, and return the
//! updated state, or `None` when the job is untracked or the requested
//! change would break the status state machine. Entries are never removed:
//! finished jobs stay queryable for the lifetime of the process.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use uuid::Uuid;

use crate::job::{JobExecutionState, JobStatus, ProgressUpdate};
use crate::models::ToolResult;

/// Outcome of registering a job with the store.
#[derive(Debug, Clone)]
pub enum Registration {
    Created(JobExecutionState),
    /// The job was already tracked; nothing changed.
    Existing(JobExecutionState),
}

impl Registration {
    pub fn is_new(&self) -> bool {
        matches!(self, Registration::Created(_))
    }

    pub fn into_state(self) -> JobExecutionState {
        match self {
            Registration::Created(state) | Registration::Existing(state) => state,
        }
    }
}

/// Thread-safe map of job id to [`JobExecutionState`].
///
/// Cloning yields another handle onto the same map.
#[derive(Debug, Clone, Default)]
pub struct JobStateStore {
    states: Arc<RwLock<HashMap<Uuid, JobExecutionState>>>,
}

impl JobStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, JobExecutionState>> {
        self.states.read().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned job state lock");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, JobExecutionState>> {
        self.states.write().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned job state lock");
            poisoned.into_inner()
        })
    }

    /// Apply `change` to the job's state; a `false` return rejects the change
    /// (the closure must then leave the state untouched).
    fn modify<F>(&self, job_id: Uuid, change: F) -> Option<JobExecutionState>
    where
        F: FnOnce(&mut JobExecutionState) -> bool,
    {
        let mut states = self.write();
        let state = states.get_mut(&job_id)?;
        if !change(state) {
            return None;
        }
        state.last_update_time = Utc::now();
        Some(state.clone())
    }

    /// Register a job in `initializing` status, or return the existing entry.
    pub fn create_execution_state(
        &self,
        job_id: Uuid,
        total_urls: usize,
        batch_size: usize,
    ) -> Registration {
        let mut states = self.write();
        if let Some(existing) = states.get(&job_id) {
            return Registration::Existing(existing.clone());
        }
        let state = JobExecutionState::new(job_id, total_urls, batch_size);
        states.insert(job_id, state.clone());
        Registration::Created(state)
    }

    pub fn get(&self, job_id: Uuid) -> Option<JobExecutionState> {
        self.read().get(&job_id).cloned()
    }

    pub fn job_ids(&self) -> Vec<Uuid> {
        self.read().keys().copied().collect()
    }

    /// Move the job to `status`, replacing the error message when given.
    pub fn update_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<String>,
    ) -> Option<JobExecutionState> {
        self.modify(job_id, |state| {
            if !transition(state, status) {
                return false;
            }
            if error.is_some() {
                state.error = error;
            }
            true
        })
    }

    /// Merge the supplied counters; ignored once the job is terminal.
    pub fn update_progress(
        &self,
        job_id: Uuid,
        update: ProgressUpdate,
    ) -> Option<JobExecutionState> {
        self.modify(job_id, |state| {
            if state.status.is_terminal() {
                return false;
            }
            update.apply(&mut state.progress);
            true
        })
    }

    /// Flag the job for cancellation and move it to `cancelled`.
    pub fn mark_cancelled(&self, job_id: Uuid, reason: &str) -> Option<JobExecutionState> {
        self.modify(job_id, |state| {
            if !transition(state, JobStatus::Cancelled) {
                return false;
            }
            state.cancel_requested = true;
            state.pause_requested = false;
            state.error = Some(reason.to_string());
            true
        })
    }

    /// `running` → `paused`.
    pub fn mark_paused(&self, job_id: Uuid) -> Option<JobExecutionState> {
        self.modify(job_id, |state| {
            if state.status != JobStatus::Running {
                return false;
            }
            transition(state, JobStatus::Paused);
            state.pause_requested = true;
            true
        })
    }

    /// `paused` → `running`.
    pub fn mark_resumed(&self, job_id: Uuid) -> Option<JobExecutionState> {
        self.modify(job_id, |state| {
            if state.status != JobStatus::Paused {
                return false;
            }
            transition(state, JobStatus::Running);
            state.pause_requested = false;
            true
        })
    }

    /// Every URL succeeded.
    pub fn mark_completed(
        &self,
        job_id: Uuid,
        results: Vec<ToolResult>,
    ) -> Option<JobExecutionState> {
        self.modify(job_id, |state| {
            if !transition(state, JobStatus::Completed) {
                return false;
            }
            state.error = None;
            state.results = Some(results);
            true
        })
    }

    /// Some URLs succeeded, some did not.
    pub fn mark_completed_with_errors(
        &self,
        job_id: Uuid,
        results: Vec<ToolResult>,
        error: String,
    ) -> Option<JobExecutionState> {
        self.modify(job_id, |state| {
            if !transition(state, JobStatus::CompletedWithErrors) {
                return false;
            }
            state.error = Some(error);
            state.results = Some(results);
            true
        })
    }

    pub fn mark_failed(
        &self,
        job_id: Uuid,
        error: String,
        results: Vec<ToolResult>,
    ) -> Option<JobExecutionState> {
        self.modify(job_id, |state| {
            if !transition(state, JobStatus::Failed) {
                return false;
            }
            state.error = Some(error);
            state.results = Some(results);
            true
        })
    }

    /// Store the final result set of a job that was already moved to a
    /// terminal status from outside its processing task (cancel, timeout).
    pub fn attach_results(
        &self,
        job_id: Uuid,
        results: Vec<ToolResult>,
    ) -> Option<JobExecutionState> {
        self.modify(job_id, |state| {
            if !state.status.is_terminal() {
                return false;
            }
            state.results = Some(results);
            true
        })
    }
}

/// Apply a status change if the state machine allows it, stamping `end_time`
/// on entry into a terminal status.
fn transition(state: &mut JobExecutionState, next: JobStatus) -> bool {
    if !state.status.can_transition_to(next) {
        tracing::debug!(
            job_id = %state.job_id,
            from = %state.status,
            to = %next,
            "Rejected job status transition"
        );
        return false;
    }
    state.status = next;
    if next.is_terminal() {
        state.end_time = Some(Utc::now());
    }
    true
}
