use std::path::PathBuf;
use std::sync::Mutex;

use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use futures::future::{BoxFuture, FutureExt};
use scrapesmith_core::error::AppError;
use scrapesmith_core::package::{ToolConfig, ToolConfigurationPackage, ToolKind};
use scrapesmith_core::traits::{ExtractionTool, ToolOutput};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

use crate::auxiliary::AuxiliarySettings;
use crate::fetcher::{FetchOptions, ensure_public_target};
use crate::selectors::{FieldSelectors, find_marker};
use crate::static_html::fetch_options;

pub const BROWSER_TOOL_ID: &str = "browser";

/// Scraper for JavaScript-rendered pages, driving headless Chromium over
/// the DevTools protocol.
///
/// Chromium is launched on the first target (so the package's proxy and
/// first user agent become launch flags) and shut down in `cleanup`. Each
/// target gets its own tab.
#[derive(Default)]
pub struct BrowserTool {
    options: FetchOptions,
    selectors: FieldSelectors,
    browser: OnceCell<Browser>,
    handler: Mutex<Option<JoinHandle<()>>>,
}

impl BrowserTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_private_urls(mut self) -> Self {
        self.options.allow_private = true;
        self
    }

    async fn launch(&self, settings: &AuxiliarySettings) -> Result<Browser, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();

        if let Some(bin) = find_chrome_binary() {
            tracing::info!(binary = %bin.display(), "Using Chrome binary");
            builder = builder.chrome_executable(bin);
        }
        if let Some(proxy) = &settings.proxy {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }
        if let Some(agent) = settings.user_agents.first() {
            builder = builder.arg(format!("--user-agent={agent}"));
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::ConfigError(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::ToolError(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled for the connection to make progress.
        let task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!(error = %e, "Browser CDP handler error");
                    break;
                }
            }
        });
        if let Ok(mut slot) = self.handler.lock() {
            *slot = Some(task);
        }

        Ok(browser)
    }

    async fn render(
        &self,
        target: &str,
        package: &ToolConfigurationPackage,
    ) -> Result<ToolOutput, AppError> {
        if !self.options.allow_private {
            ensure_public_target(target).await?;
        }

        let settings = AuxiliarySettings::from_package(package)?;
        let browser = self
            .browser
            .get_or_try_init(|| self.launch(&settings))
            .await?;

        let timeout = self.options.timeout;
        let html = tokio::time::timeout(timeout, async {
            let page = browser
                .new_page(target)
                .await
                .map_err(|e| AppError::HttpError(format!("Failed to navigate to {target}: {e}")))?;
            page.find_element("body")
                .await
                .map_err(|e| AppError::HttpError(format!("Page did not render body: {e}")))?;
            let html = page
                .content()
                .await
                .map_err(|e| AppError::HttpError(format!("Failed to read page content: {e}")))?;
            if let Err(e) = page.close().await {
                tracing::debug!(error = %e, "Failed to close tab");
            }
            Ok::<_, AppError>(html)
        })
        .await
        .map_err(|_| AppError::Timeout(timeout.as_secs()))??;

        if let Some(markers) = &settings.captcha_markers
            && let Some(marker) = find_marker(&html, markers)
        {
            return Err(AppError::ToolError(format!(
                "Captcha challenge detected on {target} ({marker})"
            )));
        }

        Ok(ToolOutput::new(self.selectors.extract(&html)).with_metadata(serde_json::json!({
            "contentLength": html.len(),
            "rendered": true,
        })))
    }
}

/// Locate a real Chrome/Chromium binary. `CHROME_BIN` wins; the snap
/// wrapper is skipped because it strips headless flags.
fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    [
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ]
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

impl ExtractionTool for BrowserTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Scraper
    }

    fn initialize<'a>(&'a mut self, config: &'a ToolConfig) -> BoxFuture<'a, Result<(), AppError>> {
        let result = FieldSelectors::compile(&config.selectors).map(|selectors| {
            self.selectors = selectors;
            self.options = fetch_options(config, &self.options);
        });
        futures::future::ready(result).boxed()
    }

    fn execute<'a>(
        &'a self,
        target: &'a str,
        package: &'a ToolConfigurationPackage,
    ) -> BoxFuture<'a, Result<ToolOutput, AppError>> {
        self.render(target, package).boxed()
    }

    fn cleanup(&mut self) -> BoxFuture<'_, ()> {
        async move {
            if let Some(mut browser) = self.browser.take() {
                if let Err(e) = browser.close().await {
                    tracing::warn!(error = %e, "Failed to close browser");
                }
            }
            if let Some(task) = self.handler.get_mut().ok().and_then(Option::take) {
                task.abort();
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cleanup_without_launch_is_a_no_op() {
        let mut tool = BrowserTool::new();
        tool.initialize(&ToolConfig::scraper(BROWSER_TOOL_ID))
            .await
            .unwrap();
        tool.cleanup().await;
        assert!(tool.browser.get().is_none());
    }

    #[tokio::test]
    async fn private_targets_fail_before_launch() {
        let mut tool = BrowserTool::new();
        let config = ToolConfig::scraper(BROWSER_TOOL_ID);
        tool.initialize(&config).await.unwrap();

        let err = tool
            .execute("http://127.0.0.1/", &ToolConfigurationPackage::new(config))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SSRF blocked"));
        assert!(tool.browser.get().is_none());
    }
}
