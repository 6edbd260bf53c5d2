pub mod auxiliary;
pub mod backend;
#[cfg(feature = "browser")]
pub mod browser;
pub mod fetcher;
pub mod llm;
pub mod registry;
pub mod selectors;
pub mod static_html;

pub use auxiliary::{CaptchaDetectorTool, ProxyTool, UserAgentRotationTool};
pub use backend::HttpToolBackend;
#[cfg(feature = "browser")]
pub use browser::BrowserTool;
pub use fetcher::{FetchOptions, PageFetcher};
pub use llm::OpenAiAnalyzer;
pub use registry::default_registry;
pub use static_html::StaticHtmlTool;
