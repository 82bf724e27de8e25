use forager_core::classify::{ErrorCategory, ErrorClassifier};
use forager_core::error::AppError;
use forager_core::job::{CreateScrapeJobRequest, JobStatus};
use forager_core::models::{ConfigPackage, ToolConfig, ToolResult};
use forager_core::repository::JobRepository;
use forager_db::PgJobRepository;
use serde_json::json;
use uuid::Uuid;

use crate::integration::common::setup_test_db;

fn test_request() -> CreateScrapeJobRequest {
    let package = ConfigPackage::new(ToolConfig::new(
        "http_selector",
        json!({"selectors": {"title": "h1"}}),
    ))
    .with_description("Product titles");
    CreateScrapeJobRequest::new(
        "Collect product titles",
        vec![
            "https://shop.test/a".to_string(),
            "https://shop.test/b".to_string(),
        ],
    )
    .with_config_package(package)
}

#[tokio::test]
async fn create_job_and_read_back() {
    let (db, _container) = setup_test_db().await;
    let repo = db.job_repo();

    let job = repo.create_job(test_request()).await.unwrap();
    assert_eq!(job.status, JobStatus::Initializing);
    assert_eq!(job.objective, "Collect product titles");
    assert_eq!(job.urls.len(), 2);
    assert!(job.started_at.is_none());
    assert!(job.completed_at.is_none());
    assert!(job.results.is_none());

    let found = repo.find_job(job.id).await.unwrap().expect("job exists");
    assert_eq!(found.urls, job.urls);
    let package = found.config_package.expect("package stored");
    assert_eq!(package.scraper.tool_id, "http_selector");
    assert_eq!(package.description, "Product titles");
}

#[tokio::test]
async fn job_without_package_round_trips_as_none() {
    let (db, _container) = setup_test_db().await;
    let repo = db.job_repo();

    let job = repo
        .create_job(CreateScrapeJobRequest::new("bare", vec![]))
        .await
        .unwrap();
    let found = repo.find_job(job.id).await.unwrap().unwrap();
    assert!(found.config_package.is_none());
    assert!(found.urls.is_empty());
}

#[tokio::test]
async fn find_missing_job_is_none() {
    let (db, _container) = setup_test_db().await;
    assert!(db.job_repo().find_job(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn status_updates_stamp_lifecycle_times() {
    let (db, _container) = setup_test_db().await;
    let repo = db.job_repo();
    let job = repo.create_job(test_request()).await.unwrap();

    repo.update_status(job.id, JobStatus::Running, None).await.unwrap();
    let running = repo.find_job(job.id).await.unwrap().unwrap();
    assert_eq!(running.status, JobStatus::Running);
    let started_at = running.started_at.expect("started_at set");
    assert!(running.completed_at.is_none());

    repo.update_status(job.id, JobStatus::Paused, None).await.unwrap();
    repo.update_status(job.id, JobStatus::Running, None).await.unwrap();
    let resumed = repo.find_job(job.id).await.unwrap().unwrap();
    assert_eq!(resumed.started_at, Some(started_at));

    repo.update_status(
        job.id,
        JobStatus::CompletedWithErrors,
        Some("1 of 2 URLs failed (0 exceeded the retry budget)"),
    )
    .await
    .unwrap();
    let done = repo.find_job(job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::CompletedWithErrors);
    assert!(done.completed_at.is_some());
    assert_eq!(
        done.error_message.as_deref(),
        Some("1 of 2 URLs failed (0 exceeded the retry budget)")
    );
    assert!(done.updated_at >= done.created_at);
}

#[tokio::test]
async fn every_status_is_storable() {
    let (db, _container) = setup_test_db().await;
    let repo = db.job_repo();
    let job = repo.create_job(test_request()).await.unwrap();

    for status in JobStatus::ALL {
        repo.update_status(job.id, status, None).await.unwrap();
        let stored = repo.find_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, status);
    }
}

#[tokio::test]
async fn error_record_is_stored_as_json() {
    let (db, _container) = setup_test_db().await;
    let repo = db.job_repo();
    let job = repo.create_job(test_request()).await.unwrap();

    let record = ErrorClassifier::new().classify(
        job.id,
        &AppError::NetworkError("connection reset by peer".into()),
        Some(json!({"url": "https://shop.test/a"})),
    );
    repo.update_error(job.id, &record).await.unwrap();

    let stored = repo
        .find_job(job.id)
        .await
        .unwrap()
        .unwrap()
        .error_details
        .expect("error details stored");
    assert_eq!(stored.category, ErrorCategory::Network);
    assert_eq!(stored.message, record.message);
    assert_eq!(stored.error_type.as_deref(), Some("NetworkError"));
}

#[tokio::test]
async fn results_are_replaced_wholesale() {
    let (db, _container) = setup_test_db().await;
    let repo = db.job_repo();
    let job = repo.create_job(test_request()).await.unwrap();

    let first = vec![ToolResult::success("https://shop.test/a", json!({"title": "A"}))];
    repo.update_results(job.id, &first).await.unwrap();

    let second = vec![
        ToolResult::success("https://shop.test/a", json!({"title": "A"})),
        ToolResult::failure("https://shop.test/b", "HTTP 503 for https://shop.test/b"),
    ];
    repo.update_results(job.id, &second).await.unwrap();

    let stored = repo.find_job(job.id).await.unwrap().unwrap().results.unwrap();
    assert_eq!(stored, second);
}

#[tokio::test]
async fn updates_on_missing_job_are_not_found() {
    let (db, _container) = setup_test_db().await;
    let repo = db.job_repo();
    let missing = Uuid::new_v4();

    let err = repo
        .update_status(missing, JobStatus::Running, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::JobNotFound(id) if id == missing));
    assert!(repo.update_results(missing, &[]).await.is_err());
}

#[tokio::test]
async fn list_jobs_newest_first_with_filter() {
    let (db, _container) = setup_test_db().await;
    let repo = PgJobRepository::new(db.pool().clone());

    let first = repo.create_job(test_request()).await.unwrap();
    let second = repo.create_job(test_request()).await.unwrap();
    repo.update_status(second.id, JobStatus::Running, None)
        .await
        .unwrap();

    let all = repo.list_jobs(None, 10).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, second.id);
    assert_eq!(all[1].id, first.id);

    let running = repo.list_jobs(Some(JobStatus::Running), 10).await.unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].id, second.id);

    assert_eq!(repo.list_jobs(None, 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn status_check_constraint_rejects_unknown_values() {
    let (db, _container) = setup_test_db().await;
    let job = db.job_repo().create_job(test_request()).await.unwrap();

    let result = sqlx::query("UPDATE scrape_jobs SET status = 'pending' WHERE id = $1")
        .bind(job.id)
        .execute(db.pool())
        .await;
    assert!(result.is_err());
}
