use thiserror::Error;
use uuid::Uuid;

/// Application-wide error types for Forager.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (non-2xx status or protocol error).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded on the target side.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// An extraction tool failed while processing a URL.
    #[error("Tool '{tool_id}' failed: {message}")]
    ToolError { tool_id: String, message: String },

    /// No extraction tool is registered under the requested id.
    #[error("Unknown tool: {0}")]
    ToolNotFound(String),

    /// Configuration package is malformed or unsupported.
    #[error("Invalid configuration package: {0}")]
    InvalidConfigPackage(String),

    /// Engine or environment configuration is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// No job record exists for the given id.
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::RateLimitExceeded => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout")
                    || msg.contains("connect")
                    || msg.contains("reset")
                    || msg.contains("HTTP 5")
                    || msg.contains("HTTP 429")
            }
            AppError::ToolError { .. } => true,
            _ => false,
        }
    }

    /// Short, stable name of the variant, used as the `type` of error records.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::HttpError(_) => "HttpError",
            AppError::NetworkError(_) => "NetworkError",
            AppError::Timeout(_) => "Timeout",
            AppError::RateLimitExceeded => "RateLimitExceeded",
            AppError::ToolError { .. } => "ToolError",
            AppError::ToolNotFound(_) => "ToolNotFound",
            AppError::InvalidConfigPackage(_) => "InvalidConfigPackage",
            AppError::ConfigError(_) => "ConfigError",
            AppError::SerializationError(_) => "SerializationError",
            AppError::DatabaseError(_) => "DatabaseError",
            AppError::JobNotFound(_) => "JobNotFound",
            AppError::Generic(_) => "Generic",
        }
    }

    pub fn tool(tool_id: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::ToolError {
            tool_id: tool_id.into(),
            message: message.into(),
        }
    }
}
