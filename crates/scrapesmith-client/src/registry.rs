use scrapesmith_core::package::ToolKind;
use scrapesmith_core::registry::ToolRegistry;

use crate::auxiliary::{
    CAPTCHA_TOOL_ID, CaptchaDetectorTool, PROXY_TOOL_ID, ProxyTool, USER_AGENT_TOOL_ID,
    UserAgentRotationTool,
};
use crate::static_html::{STATIC_HTML_TOOL_ID, StaticHtmlTool};

/// Registry with every built-in tool.
///
/// With `allow_private` the scrapers skip SSRF checks; only use it where the
/// user controls the machine (CLI).
pub fn default_registry(allow_private: bool) -> ToolRegistry {
    let registry = ToolRegistry::new()
        .with(STATIC_HTML_TOOL_ID, ToolKind::Scraper, move || {
            let tool = StaticHtmlTool::new();
            if allow_private {
                tool.allow_private_urls()
            } else {
                tool
            }
        })
        .with(PROXY_TOOL_ID, ToolKind::Proxy, ProxyTool::new)
        .with(USER_AGENT_TOOL_ID, ToolKind::AntiBlocking, UserAgentRotationTool::new)
        .with(CAPTCHA_TOOL_ID, ToolKind::Captcha, CaptchaDetectorTool::new);

    #[cfg(feature = "browser")]
    let registry = registry.with(crate::browser::BROWSER_TOOL_ID, ToolKind::Scraper, move || {
        let tool = crate::browser::BrowserTool::new();
        if allow_private {
            tool.allow_private_urls()
        } else {
            tool
        }
    });

    registry
}
