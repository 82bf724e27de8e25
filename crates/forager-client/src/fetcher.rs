use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use forager_core::error::AppError;
use forager_core::traits::{BlockDetector, ProxyProvider};
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "Forager/0.1 (scrape engine)";

/// Client settings shared by the HTTP tools.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub timeout: Duration,
    pub user_agent: String,
    pub headers: BTreeMap<String, String>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers: BTreeMap::new(),
        }
    }
}

/// Request parameters every HTTP tool accepts (camelCase in packages).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchParams {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl FetchParams {
    /// JSON Schema fragments for the fields above.
    pub fn schema_properties() -> serde_json::Map<String, serde_json::Value> {
        let mut properties = serde_json::Map::new();
        properties.insert(
            "timeoutSecs".into(),
            serde_json::json!({ "type": "integer", "minimum": 1 }),
        );
        properties.insert(
            "userAgent".into(),
            serde_json::json!({ "type": "string", "minLength": 1 }),
        );
        properties.insert(
            "headers".into(),
            serde_json::json!({ "type": "object", "additionalProperties": { "type": "string" } }),
        );
        properties
    }

    pub fn settings(&self) -> FetchSettings {
        let defaults = FetchSettings::default();
        FetchSettings {
            timeout: self
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
            headers: self.headers.clone(),
        }
    }
}

/// A successfully fetched page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects.
    pub final_url: String,
    pub status: u16,
    pub body: String,
    pub proxy: Option<String>,
}

/// HTTP fetcher using reqwest.
///
/// With a proxy provider attached, every request goes through the provider's
/// next proxy; one client per proxy is built on first use and kept.
#[derive(Clone)]
pub struct HttpFetcher {
    settings: FetchSettings,
    direct: Client,
    proxied: Arc<Mutex<HashMap<String, Client>>>,
    proxies: Option<Arc<dyn ProxyProvider>>,
    block_detector: Option<Arc<dyn BlockDetector>>,
}

impl HttpFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, AppError> {
        let direct = build_client(&settings, None)?;
        Ok(Self {
            settings,
            direct,
            proxied: Arc::new(Mutex::new(HashMap::new())),
            proxies: None,
            block_detector: None,
        })
    }

    pub fn with_proxies(mut self, provider: Arc<dyn ProxyProvider>) -> Self {
        self.proxies = Some(provider);
        self
    }

    pub fn with_block_detector(mut self, detector: Arc<dyn BlockDetector>) -> Self {
        self.block_detector = Some(detector);
        self
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client, AppError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };
        let mut clients = self
            .proxied
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(client) = clients.get(proxy) {
            return Ok(client.clone());
        }
        let client = build_client(&self.settings, Some(proxy))?;
        clients.insert(proxy.to_string(), client.clone());
        Ok(client)
    }

    /// GET `url`; non-2xx responses and blocked pages are errors.
    pub async fn fetch(&self, url: &str) -> Result<FetchedPage, AppError> {
        let parsed = Url::parse(url).map_err(|e| AppError::HttpError(format!("Invalid URL '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::HttpError(format!(
                "URL scheme '{}' is not allowed (only http/https)",
                parsed.scheme()
            )));
        }

        let proxy = self.proxies.as_ref().and_then(|p| p.next_proxy());
        let client = self.client_for(proxy.as_deref())?;
        let timeout_secs = self.settings.timeout.as_secs();

        let response = client.get(parsed).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(timeout_secs)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        let final_url = response.url().to_string();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) if status.is_success() => {
                return Err(AppError::HttpError(format!("Failed to read response body: {e}")));
            }
            Err(_) => String::new(),
        };

        // Detection sees error statuses too, so throttling reads as a block.
        if let Some(reason) = self
            .block_detector
            .as_ref()
            .and_then(|d| d.detect(status.as_u16(), &body))
        {
            tracing::warn!(%url, proxy = ?proxy, %reason, "Page looks blocked");
            return Err(AppError::HttpError(format!("Blocked response for {url}: {reason}")));
        }
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        Ok(FetchedPage {
            final_url,
            status: status.as_u16(),
            body,
            proxy,
        })
    }
}

fn build_client(settings: &FetchSettings, proxy: Option<&str>) -> Result<Client, AppError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &settings.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AppError::InvalidConfigPackage(format!("Invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AppError::InvalidConfigPackage(format!("Invalid value for header '{name}': {e}")))?;
        headers.insert(name, value);
    }

    let mut builder = Client::builder()
        .user_agent(settings.user_agent.as_str())
        .timeout(settings.timeout)
        .default_headers(headers);
    if let Some(proxy) = proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| AppError::InvalidConfigPackage(format!("Invalid proxy '{proxy}': {e}")))?;
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| AppError::HttpError(e.to_string()))
}
