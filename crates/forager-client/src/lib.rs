pub mod cleaner;
pub mod fetcher;
pub mod markdown;
pub mod proxy;
pub mod registry;
pub mod selector;

#[cfg(test)]
mod testserver;

pub use cleaner::HtmdCleaner;
pub use fetcher::{FetchSettings, FetchedPage, HttpFetcher};
pub use markdown::MarkdownTool;
pub use proxy::{Auxiliaries, KeywordBlockDetector, RotatingProxyPool};
pub use registry::{BUILTIN_TOOL_IDS, BuiltinTool, BuiltinToolFactory};
pub use selector::{HttpSelectorTool, OutputFormat};
