//! `http_selector`: fetch a page and pull named CSS selectors out of it.
//!
//! Parameters:
//!
//! ```json
//! {
//!   "selectors": { "title": "h1", "price": ".price" },
//!   "multiple": false,
//!   "format": "text",
//!   "timeoutSecs": 30
//! }
//! ```
//!
//! `data` maps each selector name to the first match (or `null`), or to an
//! array of all matches when `multiple` is set.

use std::collections::BTreeMap;

use forager_core::error::AppError;
use forager_core::models::{ConfigPackage, ToolConfig, ToolResult};
use forager_core::package::validate_parameters;
use forager_core::traits::Extractor;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;

use crate::cleaner::HtmdCleaner;
use crate::fetcher::{FetchParams, FetchedPage, HttpFetcher};
use crate::proxy::Auxiliaries;

pub const HTTP_SELECTOR_TOOL_ID: &str = "http_selector";

/// How matched elements are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Text content with whitespace collapsed.
    #[default]
    Text,
    /// Inner HTML.
    Html,
    Markdown,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectorParams {
    selectors: BTreeMap<String, String>,
    #[serde(default)]
    multiple: bool,
    #[serde(default)]
    format: OutputFormat,
    #[serde(flatten)]
    fetch: FetchParams,
}

pub fn parameters_schema() -> serde_json::Value {
    let mut properties = FetchParams::schema_properties();
    properties.insert(
        "selectors".into(),
        serde_json::json!({
            "type": "object",
            "minProperties": 1,
            "additionalProperties": { "type": "string", "minLength": 1 }
        }),
    );
    properties.insert("multiple".into(), serde_json::json!({ "type": "boolean" }));
    properties.insert(
        "format".into(),
        serde_json::json!({ "enum": ["text", "html", "markdown"] }),
    );
    serde_json::json!({
        "type": "object",
        "required": ["selectors"],
        "properties": properties,
        "additionalProperties": false
    })
}

struct Prepared {
    params: SelectorParams,
    fetcher: HttpFetcher,
}

/// CSS-selector extraction over plain HTTP.
pub struct HttpSelectorTool {
    auxiliaries: Auxiliaries,
    cleaner: HtmdCleaner,
    prepared: Option<Prepared>,
}

impl HttpSelectorTool {
    pub fn new(auxiliaries: Auxiliaries) -> Self {
        Self {
            auxiliaries,
            cleaner: HtmdCleaner::new(),
            prepared: None,
        }
    }

    fn extract(&self, body: &str, params: &SelectorParams) -> Result<Extracted, AppError> {
        let document = Html::parse_document(body);
        let mut data = serde_json::Map::new();
        let mut matched = 0;

        for (name, css) in &params.selectors {
            let selector = parse_selector(css)?;
            let mut rendered = Vec::new();
            for element in document.select(&selector) {
                rendered.push(self.render(element, params.format)?);
                if !params.multiple {
                    break;
                }
            }
            if !rendered.is_empty() {
                matched += 1;
            }
            let value = if params.multiple {
                serde_json::Value::from(rendered)
            } else {
                rendered
                    .into_iter()
                    .next()
                    .map_or(serde_json::Value::Null, serde_json::Value::from)
            };
            data.insert(name.clone(), value);
        }

        Ok(Extracted {
            data: serde_json::Value::Object(data),
            matched,
        })
    }

    fn render(&self, element: ElementRef<'_>, format: OutputFormat) -> Result<String, AppError> {
        match format {
            OutputFormat::Text => Ok(element
                .text()
                .flat_map(str::split_whitespace)
                .collect::<Vec<_>>()
                .join(" ")),
            OutputFormat::Html => Ok(element.inner_html().trim().to_string()),
            OutputFormat::Markdown => self
                .cleaner
                .to_markdown(HTTP_SELECTOR_TOOL_ID, &element.html()),
        }
    }
}

struct Extracted {
    data: serde_json::Value,
    matched: usize,
}

fn parse_selector(css: &str) -> Result<Selector, AppError> {
    Selector::parse(css).map_err(|e| {
        AppError::InvalidConfigPackage(format!("Invalid CSS selector '{css}': {e}"))
    })
}

/// Status, size and content hash of a fetched page.
pub(crate) fn page_metadata(page: &FetchedPage) -> serde_json::Value {
    serde_json::json!({
        "status": page.status,
        "finalUrl": page.final_url,
        "bytes": page.body.len(),
        "contentHash": forager_core::compute_hash(&page.body),
        "proxy": page.proxy,
    })
}

impl Extractor for HttpSelectorTool {
    async fn initialize(&mut self, config: &ToolConfig) -> Result<(), AppError> {
        validate_parameters(HTTP_SELECTOR_TOOL_ID, &parameters_schema(), &config.parameters)?;
        let params: SelectorParams = serde_json::from_value(config.parameters.clone())
            .map_err(|e| AppError::InvalidConfigPackage(format!("Invalid {HTTP_SELECTOR_TOOL_ID} parameters: {e}")))?;
        for css in params.selectors.values() {
            parse_selector(css)?;
        }

        let fetcher = self
            .auxiliaries
            .apply(HttpFetcher::new(params.fetch.settings())?);
        tracing::debug!(
            selectors = params.selectors.len(),
            multiple = params.multiple,
            format = ?params.format,
            "http_selector ready"
        );
        self.prepared = Some(Prepared { params, fetcher });
        Ok(())
    }

    async fn execute(&self, url: &str, _package: &ConfigPackage) -> Result<ToolResult, AppError> {
        let prepared = self
            .prepared
            .as_ref()
            .ok_or_else(|| AppError::tool(HTTP_SELECTOR_TOOL_ID, "used before initialize"))?;

        let page = prepared.fetcher.fetch(url).await?;
        let extracted = self.extract(&page.body, &prepared.params)?;
        let metadata = page_metadata(&page);

        if extracted.matched == 0 {
            return Ok(ToolResult::failure(
                url,
                format!(
                    "None of the {} selectors matched",
                    prepared.params.selectors.len()
                ),
            )
            .with_metadata(metadata));
        }
        Ok(ToolResult::success(url, extracted.data).with_metadata(metadata))
    }
}
