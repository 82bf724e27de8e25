//! The closed set of tools this build can run.

use forager_core::error::AppError;
use forager_core::models::{ConfigPackage, ToolConfig, ToolResult};
use forager_core::traits::{Extractor, ToolFactory};

use crate::markdown::{MARKDOWN_TOOL_ID, MarkdownTool};
use crate::proxy::Auxiliaries;
use crate::selector::{HTTP_SELECTOR_TOOL_ID, HttpSelectorTool};

/// Primary tool ids accepted in `scraper.toolId`.
pub const BUILTIN_TOOL_IDS: &[&str] = &[HTTP_SELECTOR_TOOL_ID, MARKDOWN_TOOL_ID];

/// A resolved built-in tool.
pub enum BuiltinTool {
    HttpSelector(HttpSelectorTool),
    Markdown(MarkdownTool),
}

impl Extractor for BuiltinTool {
    async fn initialize(&mut self, config: &ToolConfig) -> Result<(), AppError> {
        match self {
            BuiltinTool::HttpSelector(tool) => tool.initialize(config).await,
            BuiltinTool::Markdown(tool) => tool.initialize(config).await,
        }
    }

    async fn execute(&self, url: &str, package: &ConfigPackage) -> Result<ToolResult, AppError> {
        match self {
            BuiltinTool::HttpSelector(tool) => tool.execute(url, package).await,
            BuiltinTool::Markdown(tool) => tool.execute(url, package).await,
        }
    }

    async fn cleanup(&self) -> Result<(), AppError> {
        match self {
            BuiltinTool::HttpSelector(tool) => tool.cleanup().await,
            BuiltinTool::Markdown(tool) => tool.cleanup().await,
        }
    }
}

/// Resolves packages to [`BuiltinTool`]s; unknown ids are `ToolNotFound`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinToolFactory;

impl ToolFactory for BuiltinToolFactory {
    type Tool = BuiltinTool;

    fn create(&self, package: &ConfigPackage) -> Result<BuiltinTool, AppError> {
        let auxiliaries = Auxiliaries::from_package(package)?;
        match package.scraper.tool_id.as_str() {
            HTTP_SELECTOR_TOOL_ID => Ok(BuiltinTool::HttpSelector(HttpSelectorTool::new(auxiliaries))),
            MARKDOWN_TOOL_ID => Ok(BuiltinTool::Markdown(MarkdownTool::new(auxiliaries))),
            other => Err(AppError::ToolNotFound(other.to_string())),
        }
    }
}
