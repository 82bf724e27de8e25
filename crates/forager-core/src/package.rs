//! Loading and validation of configuration packages.

use std::path::Path;

use crate::error::AppError;
use crate::models::ConfigPackage;

/// Major version of the package format this engine understands.
pub const SUPPORTED_SCHEMA_MAJOR: &str = "1";

impl ConfigPackage {
    /// Parse and validate a package from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        let package: ConfigPackage = serde_json::from_str(raw)
            .map_err(|e| AppError::InvalidConfigPackage(format!("Invalid JSON: {e}")))?;
        package.validate()?;
        Ok(package)
    }

    /// Read, parse and validate a package file.
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::InvalidConfigPackage(format!(
                "Failed to read package file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&raw)
    }

    /// Check the parts of the package the engine relies on.
    pub fn validate(&self) -> Result<(), AppError> {
        let major = self.schema_version.split('.').next().unwrap_or_default();
        if major != SUPPORTED_SCHEMA_MAJOR {
            return Err(AppError::InvalidConfigPackage(format!(
                "Unsupported schemaVersion '{}' (expected {SUPPORTED_SCHEMA_MAJOR}.x)",
                self.schema_version
            )));
        }
        if self.scraper.tool_id.trim().is_empty() {
            return Err(AppError::InvalidConfigPackage(
                "scraper.toolId must not be empty".into(),
            ));
        }
        if let Some(aux) = self
            .auxiliary_tools
            .iter()
            .find(|t| t.tool_id.trim().is_empty())
        {
            return Err(AppError::InvalidConfigPackage(format!(
                "auxiliary tool with empty toolId (parameters: {})",
                aux.parameters
            )));
        }
        Ok(())
    }
}

/// Validate tool parameters against the JSON Schema a tool declares.
///
/// All violations are reported in a single error, joined by `; `.
pub fn validate_parameters(
    tool_id: &str,
    schema: &serde_json::Value,
    parameters: &serde_json::Value,
) -> Result<(), AppError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| {
        AppError::ConfigError(format!("Tool '{tool_id}' declares an invalid schema: {e}"))
    })?;

    let errors: Vec<String> = validator
        .iter_errors(parameters)
        .map(|e| e.to_string())
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::InvalidConfigPackage(format!(
            "Invalid parameters for tool '{tool_id}': {}",
            errors.join("; ")
        )))
    }
}
