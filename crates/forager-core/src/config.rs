use std::time::Duration;

use crate::error::AppError;
use crate::job::ExecutionOptions;
use crate::rate_limiter::MIN_RATE_LIMIT_RPS;

/// Engine-wide defaults for job execution, read from the environment.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub options: ExecutionOptions,
}

impl EngineConfig {
    /// Read configuration from environment variables.
    ///
    /// All optional; unset variables keep the [`ExecutionOptions`] defaults.
    /// - `FORAGER_BATCH_SIZE` (positive integer)
    /// - `FORAGER_RATE_LIMIT_RPS` (number, at least one request per day)
    /// - `FORAGER_TIMEOUT_SECS` (positive integer)
    /// - `FORAGER_MAX_RETRIES` (positive integer)
    /// - `FORAGER_RETRY_BASE_DELAY_MS` (integer, 0 allowed)
    /// - `FORAGER_PROGRESS_LOG_SECS` (integer, 0 disables the progress log)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, AppError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut options = ExecutionOptions::default();

        if let Some(size) = parse_int(&lookup, "FORAGER_BATCH_SIZE", 1)? {
            options = options.with_batch_size(size as usize);
        }
        if let Some(raw) = lookup("FORAGER_RATE_LIMIT_RPS") {
            let rps: f64 = raw.trim().parse().map_err(|_| {
                AppError::ConfigError(format!(
                    "Invalid FORAGER_RATE_LIMIT_RPS '{raw}': must be a positive number"
                ))
            })?;
            if !rps.is_finite() || rps < MIN_RATE_LIMIT_RPS {
                return Err(AppError::ConfigError(format!(
                    "FORAGER_RATE_LIMIT_RPS must be at least {MIN_RATE_LIMIT_RPS:e}"
                )));
            }
            options = options.with_rate_limit(rps);
        }
        if let Some(secs) = parse_int(&lookup, "FORAGER_TIMEOUT_SECS", 1)? {
            options = options.with_timeout(Duration::from_secs(secs));
        }
        if let Some(retries) = parse_int(&lookup, "FORAGER_MAX_RETRIES", 1)? {
            let retries = u32::try_from(retries).map_err(|_| {
                AppError::ConfigError(format!("FORAGER_MAX_RETRIES '{retries}' is too large"))
            })?;
            options = options.with_max_retry_attempts(retries);
        }
        if let Some(ms) = parse_int(&lookup, "FORAGER_RETRY_BASE_DELAY_MS", 0)? {
            options = options.with_base_retry_delay(Duration::from_millis(ms));
        }
        if let Some(secs) = parse_int(&lookup, "FORAGER_PROGRESS_LOG_SECS", 0)? {
            options = options.with_progress_log_interval(Duration::from_secs(secs));
        }

        Ok(Self { options })
    }
}

fn parse_int<L>(lookup: &L, key: &str, min: u64) -> Result<Option<u64>, AppError>
where
    L: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let value: u64 = raw.trim().parse().map_err(|_| {
        AppError::ConfigError(format!("Invalid {key} '{raw}': must be a non-negative integer"))
    })?;
    if value < min {
        return Err(AppError::ConfigError(format!("{key} must be at least {min}")));
    }
    Ok(Some(value))
}
