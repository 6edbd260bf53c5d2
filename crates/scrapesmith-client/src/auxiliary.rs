//! Auxiliary tools: proxy, user-agent rotation and captcha detection.
//!
//! The engine only executes the primary tool. Auxiliary tools validate their
//! own configuration on `initialize`; the scrapers then read the same
//! configuration from the package through [`AuxiliarySettings`].

use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::{BoxFuture, FutureExt};
use scrapesmith_core::error::AppError;
use scrapesmith_core::package::{ToolConfig, ToolConfigurationPackage, ToolKind};
use scrapesmith_core::traits::{ExtractionTool, ToolOutput};
use url::Url;

use crate::selectors::DEFAULT_CAPTCHA_MARKERS;

pub const PROXY_TOOL_ID: &str = "proxy";
pub const USER_AGENT_TOOL_ID: &str = "user_agent_rotation";
pub const CAPTCHA_TOOL_ID: &str = "captcha_detector";

pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

/// Auxiliary configuration as seen by a primary scraper.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuxiliarySettings {
    pub proxy: Option<String>,
    /// Empty when no anti-blocking tool is configured.
    pub user_agents: Vec<String>,
    /// `None` when no captcha tool is configured.
    pub captcha_markers: Option<Vec<String>>,
}

impl AuxiliarySettings {
    pub fn from_package(package: &ToolConfigurationPackage) -> Result<Self, AppError> {
        let proxy = package
            .auxiliary(ToolKind::Proxy)
            .map(proxy_url)
            .transpose()?;
        let user_agents = package
            .auxiliary(ToolKind::AntiBlocking)
            .map(user_agents)
            .unwrap_or_default();
        let captcha_markers = package.auxiliary(ToolKind::Captcha).map(captcha_markers);

        Ok(Self {
            proxy,
            user_agents,
            captcha_markers,
        })
    }
}

fn string_list(config: &ToolConfig, key: &str) -> Option<Vec<String>> {
    let list: Vec<String> = config
        .params
        .get(key)?
        .as_array()?
        .iter()
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    (!list.is_empty()).then_some(list)
}

fn proxy_url(config: &ToolConfig) -> Result<String, AppError> {
    let raw = config
        .param_str("url")
        .ok_or_else(|| AppError::ConfigError(format!("{} requires a 'url' param", config.tool_id)))?;
    let parsed = Url::parse(raw)
        .map_err(|e| AppError::ConfigError(format!("Invalid proxy url '{raw}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" | "socks5" | "socks5h" => Ok(raw.to_string()),
        other => Err(AppError::ConfigError(format!(
            "Unsupported proxy scheme '{other}'"
        ))),
    }
}

fn user_agents(config: &ToolConfig) -> Vec<String> {
    string_list(config, "userAgents")
        .unwrap_or_else(|| DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect())
}

fn captcha_markers(config: &ToolConfig) -> Vec<String> {
    string_list(config, "markers")
        .unwrap_or_else(|| DEFAULT_CAPTCHA_MARKERS.iter().map(|s| s.to_string()).collect())
}

/// Round-robin over a list of user agents, shared by all targets of a run.
#[derive(Debug, Default)]
pub struct Rotation {
    next: AtomicUsize,
}

impl Rotation {
    pub fn pick<'a>(&self, items: &'a [String]) -> Option<&'a str> {
        if items.is_empty() {
            return None;
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % items.len();
        Some(items[idx].as_str())
    }
}

/// Routes scraper traffic through a proxy (`params.url`).
#[derive(Debug, Default)]
pub struct ProxyTool {
    url: Option<String>,
}

impl ProxyTool {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExtractionTool for ProxyTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Proxy
    }

    fn initialize<'a>(&'a mut self, config: &'a ToolConfig) -> BoxFuture<'a, Result<(), AppError>> {
        let result = proxy_url(config).map(|url| {
            tracing::debug!(proxy = %url, "Proxy configured");
            self.url = Some(url);
        });
        futures::future::ready(result).boxed()
    }

    fn execute<'a>(
        &'a self,
        _target: &'a str,
        _package: &'a ToolConfigurationPackage,
    ) -> BoxFuture<'a, Result<ToolOutput, AppError>> {
        let result = self
            .url
            .as_ref()
            .map(|url| ToolOutput::new(serde_json::json!({ "proxy": url })))
            .ok_or_else(|| AppError::ToolError("proxy tool used before initialize".into()));
        futures::future::ready(result).boxed()
    }
}

/// Rotates the `User-Agent` header across requests (`params.userAgents`).
#[derive(Debug, Default)]
pub struct UserAgentRotationTool {
    agents: Vec<String>,
    rotation: Rotation,
}

impl UserAgentRotationTool {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExtractionTool for UserAgentRotationTool {
    fn kind(&self) -> ToolKind {
        ToolKind::AntiBlocking
    }

    fn initialize<'a>(&'a mut self, config: &'a ToolConfig) -> BoxFuture<'a, Result<(), AppError>> {
        self.agents = user_agents(config);
        tracing::debug!(agents = self.agents.len(), "User agent rotation configured");
        futures::future::ready(Ok(())).boxed()
    }

    fn execute<'a>(
        &'a self,
        _target: &'a str,
        _package: &'a ToolConfigurationPackage,
    ) -> BoxFuture<'a, Result<ToolOutput, AppError>> {
        let result = self
            .rotation
            .pick(&self.agents)
            .map(|agent| ToolOutput::new(serde_json::json!({ "userAgent": agent })))
            .ok_or_else(|| AppError::ToolError("no user agents configured".into()));
        futures::future::ready(result).boxed()
    }
}

/// Flags captcha / bot-challenge pages (`params.markers`).
///
/// Scrapers turn a detected challenge into a retryable tool error instead
/// of returning the challenge page as data.
#[derive(Debug, Default)]
pub struct CaptchaDetectorTool {
    markers: Vec<String>,
}

impl CaptchaDetectorTool {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExtractionTool for CaptchaDetectorTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Captcha
    }

    fn initialize<'a>(&'a mut self, config: &'a ToolConfig) -> BoxFuture<'a, Result<(), AppError>> {
        self.markers = captcha_markers(config);
        futures::future::ready(Ok(())).boxed()
    }

    fn execute<'a>(
        &'a self,
        _target: &'a str,
        _package: &'a ToolConfigurationPackage,
    ) -> BoxFuture<'a, Result<ToolOutput, AppError>> {
        let output = ToolOutput::new(serde_json::json!({ "markers": self.markers }));
        futures::future::ready(Ok(output)).boxed()
    }
}
