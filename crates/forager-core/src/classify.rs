//! Turns raw failures into structured [`ErrorRecord`]s for persistence and
//! operator display.
//!
//! Classification never fails: anything unrecognised ends up in the
//! [`ErrorCategory::Unknown`] bucket.

use std::error::Error as _;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::job::JobProgress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    RateLimit,
    Http,
    Tool,
    Configuration,
    Parsing,
    Persistence,
    Cancelled,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Http => "http",
            ErrorCategory::Tool => "tool",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Parsing => "parsing",
            ErrorCategory::Persistence => "persistence",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Structured, categorized description of a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

/// Stateless classifier; every method is side-effect free.
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a typed engine error.
    pub fn classify(
        &self,
        job_id: Uuid,
        error: &AppError,
        context: Option<serde_json::Value>,
    ) -> ErrorRecord {
        let message = error.to_string();
        let (category, severity) = match error {
            AppError::HttpError(msg) => classify_text(msg).unwrap_or(match http_status(msg) {
                Some(status) if status >= 500 => (ErrorCategory::Http, ErrorSeverity::Medium),
                _ => (ErrorCategory::Http, ErrorSeverity::Low),
            }),
            AppError::NetworkError(_) => (ErrorCategory::Network, ErrorSeverity::Medium),
            AppError::Timeout(_) => (ErrorCategory::Timeout, ErrorSeverity::Medium),
            AppError::RateLimitExceeded => (ErrorCategory::RateLimit, ErrorSeverity::Low),
            AppError::ToolError { .. } => (ErrorCategory::Tool, ErrorSeverity::Medium),
            AppError::ToolNotFound(_)
            | AppError::InvalidConfigPackage(_)
            | AppError::ConfigError(_) => (ErrorCategory::Configuration, ErrorSeverity::Critical),
            AppError::SerializationError(_) => (ErrorCategory::Parsing, ErrorSeverity::Medium),
            AppError::DatabaseError(_) | AppError::JobNotFound(_) => {
                (ErrorCategory::Persistence, ErrorSeverity::High)
            }
            AppError::Generic(msg) => {
                classify_text(msg).unwrap_or((ErrorCategory::Unknown, ErrorSeverity::Medium))
            }
        };

        let code = match error {
            AppError::RateLimitExceeded => Some("429".to_string()),
            AppError::HttpError(msg) | AppError::Generic(msg) => {
                http_status(msg).map(|s| s.to_string())
            }
            _ => None,
        };

        ErrorRecord {
            message,
            category,
            severity,
            timestamp: Utc::now(),
            error_type: Some(error.kind().to_string()),
            code,
            stack: source_chain(error),
            context: Some(with_job_id(job_id, context)),
        }
    }

    /// Classify a bare error message (e.g. the `error` of a failed tool result).
    pub fn classify_message(
        &self,
        job_id: Uuid,
        message: &str,
        context: Option<serde_json::Value>,
    ) -> ErrorRecord {
        let trimmed = message.trim();
        let (category, severity) =
            classify_text(trimmed).unwrap_or((ErrorCategory::Unknown, ErrorSeverity::Medium));
        ErrorRecord {
            message: if trimmed.is_empty() {
                "Unknown error".to_string()
            } else {
                trimmed.to_string()
            },
            category,
            severity,
            timestamp: Utc::now(),
            error_type: None,
            code: http_status(trimmed).map(|s| s.to_string()),
            stack: None,
            context: Some(with_job_id(job_id, context)),
        }
    }

    /// Record for a job stopped by its wall-clock watchdog.
    pub fn timeout(&self, job_id: Uuid, timeout: Duration, progress: &JobProgress) -> ErrorRecord {
        ErrorRecord {
            message: format!(
                "Job timed out after {}ms ({} of {} URLs processed)",
                timeout.as_millis(),
                progress.processed_urls,
                progress.total_urls
            ),
            category: ErrorCategory::Timeout,
            severity: ErrorSeverity::High,
            timestamp: Utc::now(),
            error_type: Some("JobTimeout".to_string()),
            code: None,
            stack: None,
            context: Some(with_job_id(
                job_id,
                Some(serde_json::json!({
                    "timeoutMs": timeout.as_millis() as u64,
                    "progress": progress,
                })),
            )),
        }
    }

    /// Record for a batch whose processing broke down as a whole.
    pub fn batch_failure(
        &self,
        job_id: Uuid,
        batch_index: usize,
        urls: &[String],
        message: &str,
    ) -> ErrorRecord {
        let mut record = self.classify_message(
            job_id,
            message,
            Some(serde_json::json!({
                "batchIndex": batch_index,
                "batchSize": urls.len(),
                "urls": urls,
            })),
        );
        record.message = format!("Batch {} failed: {}", batch_index + 1, record.message);
        record.error_type = Some("BatchFailure".to_string());
        record.severity = record.severity.max(ErrorSeverity::High);
        record
    }

    /// Record for an operator cancellation.
    pub fn cancelled(&self, job_id: Uuid, reason: &str) -> ErrorRecord {
        ErrorRecord {
            message: reason.to_string(),
            category: ErrorCategory::Cancelled,
            severity: ErrorSeverity::Low,
            timestamp: Utc::now(),
            error_type: Some("JobCancelled".to_string()),
            code: None,
            stack: None,
            context: Some(with_job_id(job_id, None)),
        }
    }
}

/// Keyword heuristics over free-form error text.
fn classify_text(text: &str) -> Option<(ErrorCategory, ErrorSeverity)> {
    let lower = text.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if lower.is_empty() {
        None
    } else if has(&["timed out", "timeout", "deadline"]) {
        Some((ErrorCategory::Timeout, ErrorSeverity::Medium))
    } else if has(&["429", "rate limit", "too many requests"]) {
        Some((ErrorCategory::RateLimit, ErrorSeverity::Low))
    } else if has(&["cancel"]) {
        Some((ErrorCategory::Cancelled, ErrorSeverity::Low))
    } else if has(&[
        "connection",
        "connect",
        "dns",
        "network",
        "econnrefused",
        "reset by peer",
    ]) {
        Some((ErrorCategory::Network, ErrorSeverity::Medium))
    } else if let Some(status) = http_status(text) {
        let severity = if status >= 500 {
            ErrorSeverity::Medium
        } else {
            ErrorSeverity::Low
        };
        Some((ErrorCategory::Http, severity))
    } else if has(&["parse", "json", "selector", "invalid utf"]) {
        Some((ErrorCategory::Parsing, ErrorSeverity::Medium))
    } else if has(&["database", "sql"]) {
        Some((ErrorCategory::Persistence, ErrorSeverity::High))
    } else {
        None
    }
}

/// Extract a status code from text like `"HTTP 503 for https://..."`.
fn http_status(text: &str) -> Option<u16> {
    let idx = text.find("HTTP ")?;
    let digits: String = text[idx + 5..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits
        .parse()
        .ok()
        .filter(|code| (100..600).contains(code))
}

fn source_chain(error: &AppError) -> Option<String> {
    let mut lines = Vec::new();
    let mut source = error.source();
    while let Some(err) = source {
        lines.push(format!("caused by: {err}"));
        source = err.source();
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn with_job_id(job_id: Uuid, context: Option<serde_json::Value>) -> serde_json::Value {
    let job_id = serde_json::Value::String(job_id.to_string());
    match context {
        Some(serde_json::Value::Object(mut map)) => {
            map.insert("jobId".to_string(), job_id);
            serde_json::Value::Object(map)
        }
        Some(serde_json::Value::Null) | None => serde_json::json!({ "jobId": job_id }),
        Some(other) => serde_json::json!({ "jobId": job_id, "details": other }),
    }
}
