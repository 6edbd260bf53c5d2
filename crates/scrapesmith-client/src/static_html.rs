use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use scrapesmith_core::error::AppError;
use scrapesmith_core::package::{ToolConfig, ToolConfigurationPackage, ToolKind};
use scrapesmith_core::traits::{ExtractionTool, ToolOutput};
use tokio::sync::OnceCell;

use crate::auxiliary::{AuxiliarySettings, Rotation};
use crate::fetcher::{FetchOptions, PageFetcher};
use crate::selectors::{FieldSelectors, find_marker};

pub const STATIC_HTML_TOOL_ID: &str = "static_html";

/// Scraper for server-rendered pages: plain GET, then CSS selectors.
///
/// Recognised params: `timeoutSecs` (u64) and `allowPrivate` (bool, lifts
/// SSRF protection). The HTTP client is built on the first target so it can
/// pick up the package's proxy.
#[derive(Debug, Default)]
pub struct StaticHtmlTool {
    options: FetchOptions,
    selectors: FieldSelectors,
    fetcher: OnceCell<PageFetcher>,
    rotation: Rotation,
}

impl StaticHtmlTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow private targets regardless of the package (CLI use on a
    /// machine the user controls).
    pub fn allow_private_urls(mut self) -> Self {
        self.options.allow_private = true;
        self
    }

    async fn scrape(
        &self,
        target: &str,
        package: &ToolConfigurationPackage,
    ) -> Result<ToolOutput, AppError> {
        let settings = AuxiliarySettings::from_package(package)?;

        let fetcher = self
            .fetcher
            .get_or_try_init(|| async {
                let mut options = self.options.clone();
                options.proxy = settings.proxy.clone();
                PageFetcher::new(options)
            })
            .await?;

        let user_agent = self.rotation.pick(&settings.user_agents);
        let html = fetcher.fetch(target, user_agent).await?;

        if let Some(markers) = &settings.captcha_markers
            && let Some(marker) = find_marker(&html, markers)
        {
            return Err(AppError::ToolError(format!(
                "Captcha challenge detected on {target} ({marker})"
            )));
        }

        let data = self.selectors.extract(&html);
        Ok(ToolOutput::new(data).with_metadata(serde_json::json!({
            "contentLength": html.len(),
            "proxied": fetcher.is_proxied(),
            "userAgent": user_agent,
        })))
    }
}

/// Parse the options shared by the scraper tools out of a tool config.
pub(crate) fn fetch_options(config: &ToolConfig, base: &FetchOptions) -> FetchOptions {
    let mut options = base.clone();
    if let Some(secs) = config.param_u64("timeoutSecs") {
        options.timeout = Duration::from_secs(secs);
    }
    if let Some(allow) = config.params.get("allowPrivate").and_then(|v| v.as_bool()) {
        options.allow_private = options.allow_private || allow;
    }
    options
}

impl ExtractionTool for StaticHtmlTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Scraper
    }

    fn initialize<'a>(&'a mut self, config: &'a ToolConfig) -> BoxFuture<'a, Result<(), AppError>> {
        let result = FieldSelectors::compile(&config.selectors).map(|selectors| {
            self.selectors = selectors;
            self.options = fetch_options(config, &self.options);
            self.fetcher = OnceCell::new();
            tracing::debug!(
                tool = %config.tool_id,
                fields = config.selectors.len(),
                timeout_secs = self.options.timeout.as_secs(),
                "Static HTML scraper initialized"
            );
        });
        futures::future::ready(result).boxed()
    }

    fn execute<'a>(
        &'a self,
        target: &'a str,
        package: &'a ToolConfigurationPackage,
    ) -> BoxFuture<'a, Result<ToolOutput, AppError>> {
        self.scrape(target, package).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auxiliary::PROXY_TOOL_ID;

    fn config() -> ToolConfig {
        ToolConfig::scraper(STATIC_HTML_TOOL_ID).with_selector("title", "h1")
    }

    #[tokio::test]
    async fn initialize_rejects_invalid_selector() {
        let mut tool = StaticHtmlTool::new();
        let config = ToolConfig::scraper(STATIC_HTML_TOOL_ID).with_selector("title", "h1[");
        let err = tool.initialize(&config).await.unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[tokio::test]
    async fn initialize_reads_params() {
        let mut tool = StaticHtmlTool::new();
        let config = config()
            .with_param("timeoutSecs", serde_json::json!(5))
            .with_param("allowPrivate", serde_json::json!(true));
        tool.initialize(&config).await.unwrap();
        assert_eq!(tool.options.timeout, Duration::from_secs(5));
        assert!(tool.options.allow_private);
        assert!(!tool.selectors.is_empty());
    }

    #[tokio::test]
    async fn private_targets_are_blocked_by_default() {
        let mut tool = StaticHtmlTool::new();
        let config = config();
        tool.initialize(&config).await.unwrap();
        let package = ToolConfigurationPackage::new(config);

        let err = tool
            .execute("http://169.254.169.254/latest/meta-data", &package)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SSRF blocked"));
    }

    /// Serve `body` once per connection and record the raw requests.
    async fn serve(body: &'static str) -> (String, std::sync::Arc<std::sync::Mutex<Vec<String>>>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = requests.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = vec![0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                seen.lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&buf[..n]).to_string());
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });

        (format!("http://{addr}/"), requests)
    }

    #[tokio::test]
    async fn scrapes_local_page_with_rotating_user_agent() {
        let (url, requests) =
            serve("<html><body><h1> Hello </h1><a class='n' href='/2'>n</a></body></html>").await;
        let mut tool = StaticHtmlTool::new().allow_private_urls();
        let config = config().with_selector("next", "a.n@href");
        tool.initialize(&config).await.unwrap();
        let package = ToolConfigurationPackage::new(config).with_auxiliary(
            ToolConfig::new("user_agent_rotation", ToolKind::AntiBlocking)
                .with_param("userAgents", serde_json::json!(["agent-one", "agent-two"])),
        );

        let first = tool.execute(&url, &package).await.unwrap();
        let second = tool.execute(&url, &package).await.unwrap();

        assert_eq!(first.data, serde_json::json!({"title": "Hello", "next": "/2"}));
        assert_eq!(first.metadata["userAgent"], "agent-one");
        assert_eq!(second.metadata["userAgent"], "agent-two");
        assert_eq!(first.metadata["proxied"], false);
        let requests = requests.lock().unwrap();
        assert!(requests[0].to_lowercase().contains("user-agent: agent-one"));
    }

    #[tokio::test]
    async fn captcha_page_is_a_tool_error() {
        let (url, _) = serve("<html><body><div class='g-recaptcha'></div></body></html>").await;
        let mut tool = StaticHtmlTool::new().allow_private_urls();
        let config = config();
        tool.initialize(&config).await.unwrap();
        let package = ToolConfigurationPackage::new(config)
            .with_auxiliary(ToolConfig::new("captcha_detector", ToolKind::Captcha));

        let err = tool.execute(&url, &package).await.unwrap_err();
        assert!(matches!(err, AppError::ToolError(msg) if msg.contains("Captcha")));
    }

    #[tokio::test]
    async fn invalid_proxy_fails_target() {
        let mut tool = StaticHtmlTool::new();
        let config = config();
        tool.initialize(&config).await.unwrap();
        let package = ToolConfigurationPackage::new(config).with_auxiliary(
            ToolConfig::new(PROXY_TOOL_ID, ToolKind::Proxy)
                .with_param("url", serde_json::json!("ftp://proxy.test")),
        );

        let err = tool.execute("https://example.com", &package).await.unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }
}
