use std::future::Future;

use uuid::Uuid;

use crate::classify::ErrorRecord;
use crate::error::AppError;
use crate::job::{JobStatus, ScrapeJob};
use crate::models::ToolResult;

/// Persistence of job records, as seen by the execution engine.
///
/// The engine treats every failure here as non-fatal: errors are logged and
/// the in-memory state stays authoritative.
pub trait JobRepository: Send + Sync + Clone {
    fn find_job(&self, id: Uuid)
    -> impl Future<Output = Result<Option<ScrapeJob>, AppError>> + Send;

    /// Set the job's status; `error` replaces the stored error message
    /// (`None` clears it).
    fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<&str>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn update_error(
        &self,
        id: Uuid,
        error: &ErrorRecord,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn update_results(
        &self,
        id: Uuid,
        results: &[ToolResult],
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// A no-op repository for ad-hoc runs that keep nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullJobRepository;

impl JobRepository for NullJobRepository {
    async fn find_job(&self, _id: Uuid) -> Result<Option<ScrapeJob>, AppError> {
        Ok(None)
    }

    async fn update_status(
        &self,
        _id: Uuid,
        _status: JobStatus,
        _error: Option<&str>,
    ) -> Result<(), AppError> {
        Ok(())
    }

    async fn update_error(&self, _id: Uuid, _error: &ErrorRecord) -> Result<(), AppError> {
        Ok(())
    }

    async fn update_results(&self, _id: Uuid, _results: &[ToolResult]) -> Result<(), AppError> {
        Ok(())
    }
}
