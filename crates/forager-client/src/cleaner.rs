use std::sync::Arc;

use forager_core::error::AppError;
use htmd::HtmlToMarkdown;

/// HTML-to-Markdown converter using htmd.
///
/// Non-content elements (script, style, nav, etc.) are dropped.
#[derive(Clone)]
pub struct HtmdCleaner {
    converter: Arc<HtmlToMarkdown>,
}

impl HtmdCleaner {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec![
                "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg",
            ])
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }

    /// Convert an HTML document or fragment; `tool_id` names the caller in errors.
    pub fn to_markdown(&self, tool_id: &str, html: &str) -> Result<String, AppError> {
        self.converter
            .convert(html)
            .map(|md| md.trim().to_string())
            .map_err(|e| AppError::tool(tool_id, format!("HTML to Markdown conversion failed: {e}")))
    }
}

impl Default for HtmdCleaner {
    fn default() -> Self {
        Self::new()
    }
}
