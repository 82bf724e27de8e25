use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Which tool to run and with what parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    pub tool_id: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl ToolConfig {
    pub fn new(tool_id: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            tool_id: tool_id.into(),
            parameters,
        }
    }
}

/// Declarative description of a scrape: the primary extraction tool plus
/// optional auxiliary tools (proxies, anti-block helpers).
///
/// Field names are camelCase on the wire so packages produced upstream load
/// unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPackage {
    pub schema_version: String,
    #[serde(default)]
    pub description: String,
    pub scraper: ToolConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auxiliary_tools: Vec<ToolConfig>,
}

impl ConfigPackage {
    pub fn new(scraper: ToolConfig) -> Self {
        Self {
            schema_version: "1.0".to_string(),
            description: String::new(),
            scraper,
            auxiliary_tools: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_auxiliary_tool(mut self, tool: ToolConfig) -> Self {
        self.auxiliary_tools.push(tool);
        self
    }

    /// Find an auxiliary tool by id.
    pub fn auxiliary(&self, tool_id: &str) -> Option<&ToolConfig> {
        self.auxiliary_tools.iter().find(|t| t.tool_id == tool_id)
    }
}

/// Outcome of running a tool against one URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub url: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ToolResult {
    pub fn success(url: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            url: url.into(),
            success: true,
            data: Some(data),
            error: None,
            metadata: None,
        }
    }

    pub fn failure(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            success: false,
            data: None,
            error: Some(error.into()),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
