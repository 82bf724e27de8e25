//! Auxiliary tools: proxy rotation and block detection.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use forager_core::error::AppError;
use forager_core::models::{ConfigPackage, ToolConfig};
use forager_core::traits::{BlockDetector, ProxyProvider};
use serde::Deserialize;
use url::Url;

use crate::fetcher::HttpFetcher;

pub const PROXY_ROTATION_TOOL_ID: &str = "proxy_rotation";
pub const BLOCK_DETECTION_TOOL_ID: &str = "block_detection";

#[derive(Debug, Deserialize)]
struct ProxyRotationParams {
    #[serde(default)]
    proxies: Vec<String>,
}

/// Round-robin pool of proxy URLs (`http://`, `https://`, `socks5://`).
#[derive(Debug)]
pub struct RotatingProxyPool {
    proxies: Vec<String>,
    cursor: AtomicUsize,
}

impl RotatingProxyPool {
    pub fn new(proxies: Vec<String>) -> Result<Self, AppError> {
        for proxy in &proxies {
            let parsed = Url::parse(proxy).map_err(|e| {
                AppError::InvalidConfigPackage(format!("Invalid proxy URL '{proxy}': {e}"))
            })?;
            if !matches!(parsed.scheme(), "http" | "https" | "socks5" | "socks5h") {
                return Err(AppError::InvalidConfigPackage(format!(
                    "Unsupported proxy scheme '{}' in '{proxy}'",
                    parsed.scheme()
                )));
            }
        }
        Ok(Self {
            proxies,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Build the pool from a `proxy_rotation` tool config:
    /// `{"proxies": ["http://10.0.0.1:8080", ...]}`.
    pub fn from_config(config: &ToolConfig) -> Result<Self, AppError> {
        let params: ProxyRotationParams = serde_json::from_value(config.parameters.clone())
            .map_err(|e| {
                AppError::InvalidConfigPackage(format!("Invalid {PROXY_ROTATION_TOOL_ID} parameters: {e}"))
            })?;
        Self::new(params.proxies)
    }
}

impl ProxyProvider for RotatingProxyPool {
    fn next_proxy(&self) -> Option<String> {
        if self.proxies.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.proxies.len();
        Some(self.proxies[index].clone())
    }

    fn proxy_count(&self) -> usize {
        self.proxies.len()
    }
}

const DEFAULT_BLOCK_MARKERS: &[&str] = &[
    "captcha",
    "are you a robot",
    "access denied",
    "unusual traffic",
    "cf-challenge",
    "verify you are human",
];

#[derive(Debug, Deserialize)]
struct BlockDetectionParams {
    #[serde(default)]
    keywords: Vec<String>,
}

/// Flags pages whose body contains a known bot-wall marker.
#[derive(Debug, Clone)]
pub struct KeywordBlockDetector {
    markers: Vec<String>,
}

impl Default for KeywordBlockDetector {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_MARKERS.iter().map(|m| m.to_string()))
    }
}

impl KeywordBlockDetector {
    pub fn new(markers: impl IntoIterator<Item = String>) -> Self {
        Self {
            markers: markers.into_iter().map(|m| m.to_lowercase()).collect(),
        }
    }

    /// Default markers plus the `keywords` of a `block_detection` tool config.
    pub fn from_config(config: &ToolConfig) -> Result<Self, AppError> {
        let params: BlockDetectionParams = serde_json::from_value(config.parameters.clone())
            .map_err(|e| {
                AppError::InvalidConfigPackage(format!("Invalid {BLOCK_DETECTION_TOOL_ID} parameters: {e}"))
            })?;
        let markers = DEFAULT_BLOCK_MARKERS
            .iter()
            .map(|m| m.to_string())
            .chain(params.keywords);
        Ok(Self::new(markers))
    }
}

impl BlockDetector for KeywordBlockDetector {
    fn detect(&self, status: u16, body: &str) -> Option<String> {
        if status == 429 {
            return Some("HTTP 429 Too Many Requests".into());
        }
        let lower = body.to_lowercase();
        self.markers
            .iter()
            .find(|marker| lower.contains(marker.as_str()))
            .map(|marker| format!("page contains '{marker}'"))
    }
}

/// Auxiliary capabilities a package attaches to its HTTP tool.
#[derive(Clone, Default)]
pub struct Auxiliaries {
    pub proxies: Option<Arc<RotatingProxyPool>>,
    pub block_detector: Option<Arc<KeywordBlockDetector>>,
}

impl Auxiliaries {
    /// Resolve the package's auxiliary tools. Unknown ids are rejected.
    pub fn from_package(package: &ConfigPackage) -> Result<Self, AppError> {
        let mut aux = Self::default();
        for tool in &package.auxiliary_tools {
            match tool.tool_id.as_str() {
                PROXY_ROTATION_TOOL_ID => {
                    aux.proxies = Some(Arc::new(RotatingProxyPool::from_config(tool)?));
                }
                BLOCK_DETECTION_TOOL_ID => {
                    aux.block_detector = Some(Arc::new(KeywordBlockDetector::from_config(tool)?));
                }
                other => return Err(AppError::ToolNotFound(other.to_string())),
            }
        }
        Ok(aux)
    }

    pub fn apply(&self, mut fetcher: HttpFetcher) -> HttpFetcher {
        if let Some(proxies) = &self.proxies {
            tracing::debug!(count = proxies.proxy_count(), "Routing requests through proxies");
            fetcher = fetcher.with_proxies(proxies.clone());
        }
        if let Some(detector) = &self.block_detector {
            fetcher = fetcher.with_block_detector(detector.clone());
        }
        fetcher
    }
}
