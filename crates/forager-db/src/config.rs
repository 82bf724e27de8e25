use std::time::Duration;

use forager_core::AppError;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// Connection settings for the job record store.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        }
    }

    /// `DATABASE_URL` is required; `DATABASE_MAX_CONNECTIONS` and
    /// `DATABASE_ACQUIRE_TIMEOUT_SECS` are optional positive integers.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<L>(lookup: L) -> Result<Self, AppError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                AppError::ConfigError("DATABASE_URL not set; job records cannot be stored".into())
            })?;

        let mut config = Self::new(url);
        if let Some(max) = positive(&lookup, "DATABASE_MAX_CONNECTIONS")? {
            config.max_connections = u32::try_from(max).map_err(|_| {
                AppError::ConfigError(format!("DATABASE_MAX_CONNECTIONS '{max}' is too large"))
            })?;
        }
        if let Some(secs) = positive(&lookup, "DATABASE_ACQUIRE_TIMEOUT_SECS")? {
            config.acquire_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

fn positive<L>(lookup: &L, key: &str) -> Result<Option<u64>, AppError>
where
    L: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(AppError::ConfigError(format!("{key} must be at least 1"))),
        Ok(value) => Ok(Some(value)),
        Err(_) => Err(AppError::ConfigError(format!(
            "Invalid {key} '{raw}': must be a positive integer"
        ))),
    }
}
