//! `markdown`: fetch a page and return it as Markdown.

use forager_core::error::AppError;
use forager_core::models::{ConfigPackage, ToolConfig, ToolResult};
use forager_core::package::validate_parameters;
use forager_core::traits::Extractor;
use scraper::{Html, Selector};
use serde::Deserialize;

use crate::cleaner::HtmdCleaner;
use crate::fetcher::{FetchParams, HttpFetcher};
use crate::proxy::Auxiliaries;
use crate::selector::page_metadata;

pub const MARKDOWN_TOOL_ID: &str = "markdown";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkdownParams {
    /// Truncate the Markdown to this many characters.
    #[serde(default)]
    max_chars: Option<usize>,
    #[serde(flatten)]
    fetch: FetchParams,
}

pub fn parameters_schema() -> serde_json::Value {
    let mut properties = FetchParams::schema_properties();
    properties.insert(
        "maxChars".into(),
        serde_json::json!({ "type": "integer", "minimum": 1 }),
    );
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "additionalProperties": false
    })
}

pub struct MarkdownTool {
    auxiliaries: Auxiliaries,
    cleaner: HtmdCleaner,
    prepared: Option<(MarkdownParams, HttpFetcher)>,
}

impl MarkdownTool {
    pub fn new(auxiliaries: Auxiliaries) -> Self {
        Self {
            auxiliaries,
            cleaner: HtmdCleaner::new(),
            prepared: None,
        }
    }
}

fn page_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

impl Extractor for MarkdownTool {
    async fn initialize(&mut self, config: &ToolConfig) -> Result<(), AppError> {
        // `parameters` may be omitted entirely.
        let parameters = if config.parameters.is_null() {
            serde_json::json!({})
        } else {
            config.parameters.clone()
        };
        validate_parameters(MARKDOWN_TOOL_ID, &parameters_schema(), &parameters)?;
        let params: MarkdownParams = serde_json::from_value(parameters).map_err(|e| {
            AppError::InvalidConfigPackage(format!("Invalid {MARKDOWN_TOOL_ID} parameters: {e}"))
        })?;
        let fetcher = self
            .auxiliaries
            .apply(HttpFetcher::new(params.fetch.settings())?);
        self.prepared = Some((params, fetcher));
        Ok(())
    }

    async fn execute(&self, url: &str, _package: &ConfigPackage) -> Result<ToolResult, AppError> {
        let (params, fetcher) = self
            .prepared
            .as_ref()
            .ok_or_else(|| AppError::tool(MARKDOWN_TOOL_ID, "used before initialize"))?;

        let page = fetcher.fetch(url).await?;
        let mut markdown = self.cleaner.to_markdown(MARKDOWN_TOOL_ID, &page.body)?;
        let mut truncated = false;
        if let Some(max) = params.max_chars
            && let Some((cut, _)) = markdown.char_indices().nth(max)
        {
            markdown.truncate(cut);
            truncated = true;
        }

        let data = serde_json::json!({
            "title": page_title(&page.body),
            "markdown": markdown,
            "truncated": truncated,
        });
        Ok(ToolResult::success(url, data).with_metadata(page_metadata(&page)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testserver::serve;
    use serde_json::json;

    const PAGE: &str = "<html><head><title>News</title></head><body>\
        <nav>Menu</nav><h2>Headline</h2><p>First paragraph of the story.</p></body></html>";

    async fn ready_tool(parameters: serde_json::Value) -> MarkdownTool {
        let mut tool = MarkdownTool::new(Auxiliaries::default());
        tool.initialize(&ToolConfig::new(MARKDOWN_TOOL_ID, parameters))
            .await
            .unwrap();
        tool
    }

    fn package() -> ConfigPackage {
        ConfigPackage::new(ToolConfig::new(MARKDOWN_TOOL_ID, serde_json::Value::Null))
    }

    #[tokio::test]
    async fn test_converts_page() {
        let base = serve(200, PAGE).await;
        let tool = ready_tool(serde_json::Value::Null).await;

        let result = tool.execute(&base, &package()).await.unwrap();
        assert!(result.success);
        let data = result.data.unwrap();
        assert_eq!(data["title"], "News");
        let markdown = data["markdown"].as_str().unwrap();
        assert!(markdown.contains("Headline"));
        assert!(markdown.contains("First paragraph"));
        assert!(!markdown.contains("Menu"));
        assert_eq!(data["truncated"], false);
    }

    #[tokio::test]
    async fn test_truncates_to_max_chars() {
        let base = serve(200, PAGE).await;
        let tool = ready_tool(json!({"maxChars": 5})).await;

        let data = tool.execute(&base, &package()).await.unwrap().data.unwrap();
        assert_eq!(data["markdown"].as_str().unwrap().chars().count(), 5);
        assert_eq!(data["truncated"], true);
    }

    #[tokio::test]
    async fn test_rejects_unknown_parameters() {
        let mut tool = MarkdownTool::new(Auxiliaries::default());
        let err = tool
            .initialize(&ToolConfig::new(MARKDOWN_TOOL_ID, json!({"selectors": {}})))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidConfigPackage(_)));
    }
}
