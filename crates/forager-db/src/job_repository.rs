use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use forager_core::classify::ErrorRecord;
use forager_core::error::AppError;
use forager_core::job::{CreateScrapeJobRequest, JobStatus, ScrapeJob};
use forager_core::models::ToolResult;
use forager_core::repository::JobRepository;

/// Job records in the `scrape_jobs` table.
#[derive(Clone)]
pub struct PgJobRepository {
    pool: Pool<Postgres>,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new record in `initializing` state.
    pub async fn create_job(&self, request: CreateScrapeJobRequest) -> Result<ScrapeJob, AppError> {
        let row = sqlx::query_as::<_, ScrapeJobRow>(
            r#"
            INSERT INTO scrape_jobs (objective, urls, config_package)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(&request.objective)
        .bind(Json(&request.urls))
        .bind(request.config_package.as_ref().map(Json))
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        row.try_into()
    }

    /// Most recent records first.
    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<ScrapeJob>, AppError> {
        let rows = sqlx::query_as::<_, ScrapeJobRow>(
            r#"
            SELECT * FROM scrape_jobs
            WHERE $1::text IS NULL OR status = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

fn db_error(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(e.to_string())
}

fn not_found_if_untouched(id: Uuid, rows_affected: u64) -> Result<(), AppError> {
    if rows_affected == 0 {
        return Err(AppError::JobNotFound(id));
    }
    Ok(())
}

#[derive(sqlx::FromRow)]
struct ScrapeJobRow {
    id: Uuid,
    objective: String,
    urls: serde_json::Value,
    config_package: Option<serde_json::Value>,
    status: String,
    error_message: Option<String>,
    error_details: Option<serde_json::Value>,
    results: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

fn column<T: DeserializeOwned>(
    id: Uuid,
    name: &str,
    value: Option<serde_json::Value>,
) -> Result<Option<T>, AppError> {
    value
        .filter(|v| !v.is_null())
        .map(|v| {
            serde_json::from_value(v).map_err(|e| {
                AppError::DatabaseError(format!("Job {id} has a malformed {name} column: {e}"))
            })
        })
        .transpose()
}

impl TryFrom<ScrapeJobRow> for ScrapeJob {
    type Error = AppError;

    fn try_from(row: ScrapeJobRow) -> Result<Self, AppError> {
        let id = row.id;
        let status = row
            .status
            .parse()
            .map_err(|e: String| AppError::DatabaseError(format!("Job {id}: {e}")))?;

        Ok(ScrapeJob {
            id,
            objective: row.objective,
            urls: column(id, "urls", Some(row.urls))?.unwrap_or_default(),
            config_package: column(id, "config_package", row.config_package)?,
            status,
            error_message: row.error_message,
            error_details: column(id, "error_details", row.error_details)?,
            results: column(id, "results", row.results)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

impl JobRepository for PgJobRepository {
    async fn find_job(&self, id: Uuid) -> Result<Option<ScrapeJob>, AppError> {
        let row = sqlx::query_as::<_, ScrapeJobRow>(r#"SELECT * FROM scrape_jobs WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<(), AppError> {
        // started_at keeps the first time the job ran; completed_at is the
        // latest terminal transition.
        let result = sqlx::query(
            r#"
            UPDATE scrape_jobs
            SET status = $2,
                error_message = $3,
                updated_at = NOW(),
                started_at = CASE WHEN $2 = 'running' THEN COALESCE(started_at, NOW()) ELSE started_at END,
                completed_at = CASE WHEN $4 THEN NOW() ELSE completed_at END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error)
        .bind(status.is_terminal())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        not_found_if_untouched(id, result.rows_affected())
    }

    async fn update_error(&self, id: Uuid, error: &ErrorRecord) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE scrape_jobs
            SET error_details = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(Json(error))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        not_found_if_untouched(id, result.rows_affected())
    }

    async fn update_results(&self, id: Uuid, results: &[ToolResult]) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE scrape_jobs
            SET results = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(Json(results))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        not_found_if_untouched(id, result.rows_affected())
    }
}
