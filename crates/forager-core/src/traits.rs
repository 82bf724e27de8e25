use std::future::Future;

use crate::error::AppError;
use crate::models::{ConfigPackage, ToolConfig, ToolResult};

/// An extraction tool: performs the actual work for one URL.
///
/// Lifecycle per job: created by a [`ToolFactory`], `initialize`d once with
/// the package's scraper config, `execute`d for every URL (and retry), and
/// finally `cleanup`ed regardless of the job's outcome.
pub trait Extractor: Send + Sync {
    /// Prepare the tool (build clients, validate parameters, launch browsers...).
    fn initialize(
        &mut self,
        config: &ToolConfig,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Extract data from one URL.
    ///
    /// Returning `Ok` with `success: false` counts as a failure just like `Err`.
    fn execute(
        &self,
        url: &str,
        package: &ConfigPackage,
    ) -> impl Future<Output = Result<ToolResult, AppError>> + Send;

    /// Release resources. Errors are logged by the caller, never propagated.
    fn cleanup(&self) -> impl Future<Output = Result<(), AppError>> + Send {
        async { Ok(()) }
    }
}

/// Resolves a configuration package to a concrete tool instance.
///
/// This is the closed registry of tools a host supports: unknown tool ids
/// are rejected here, before any URL is attempted.
pub trait ToolFactory: Send + Sync + Clone {
    type Tool: Extractor + 'static;

    fn create(&self, package: &ConfigPackage) -> Result<Self::Tool, AppError>;
}

/// Auxiliary capability: supplies proxy URLs for outgoing requests.
pub trait ProxyProvider: Send + Sync {
    /// Next proxy to use, or `None` to connect directly.
    fn next_proxy(&self) -> Option<String>;

    fn proxy_count(&self) -> usize;
}

/// Auxiliary capability: recognises responses where the target site blocked
/// the scraper (captcha walls, bot challenges) despite a 2xx status.
pub trait BlockDetector: Send + Sync {
    /// Returns a short reason when the response looks blocked.
    fn detect(&self, status: u16, body: &str) -> Option<String>;
}
