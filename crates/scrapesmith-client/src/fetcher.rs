use std::net::IpAddr;
use std::time::Duration;

use reqwest::Client;
use reqwest::header::USER_AGENT;
use scrapesmith_core::error::AppError;
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "Scrapesmith/0.1 (+https://github.com/AndreaBozzo/scrapesmith)";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How a [`PageFetcher`] talks to the network.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    /// Route every request through this proxy (`http`, `https` or `socks5`).
    pub proxy: Option<String>,
    /// Permit targets that resolve to private or reserved addresses.
    pub allow_private: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            proxy: None,
            allow_private: false,
        }
    }
}

impl FetchOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn allow_private(mut self, allow: bool) -> Self {
        self.allow_private = allow;
        self
    }
}

/// Downloads raw HTML for the scraping tools.
///
/// SSRF protection is on unless [`FetchOptions::allow_private`] is set:
/// targets resolving to loopback, private, link-local or CGN ranges are
/// refused before any request is sent.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: Client,
    options: FetchOptions,
}

impl PageFetcher {
    pub fn new(options: FetchOptions) -> Result<Self, AppError> {
        let mut builder = Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(options.timeout);

        if let Some(proxy) = &options.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| AppError::ConfigError(format!("Invalid proxy '{proxy}': {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self { client, options })
    }

    pub fn is_proxied(&self) -> bool {
        self.options.proxy.is_some()
    }

    /// GET `url` and return the body. `user_agent` overrides the default.
    pub async fn fetch(&self, url: &str, user_agent: Option<&str>) -> Result<String, AppError> {
        if !self.options.allow_private {
            ensure_public_target(url).await?;
        }

        let mut request = self.client.get(url);
        if let Some(agent) = user_agent {
            request = request.header(USER_AGENT, agent);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))
    }

    fn classify(&self, error: reqwest::Error) -> AppError {
        if error.is_timeout() {
            AppError::Timeout(self.options.timeout.as_secs())
        } else if error.is_connect() {
            AppError::NetworkError(format!("Connection failed: {error}"))
        } else {
            AppError::HttpError(error.to_string())
        }
    }
}

/// Refuse targets that are not plain http(s) or that land on a
/// private/reserved address, either literally or after DNS resolution.
pub async fn ensure_public_target(url: &str) -> Result<(), AppError> {
    let parsed =
        Url::parse(url).map_err(|e| AppError::ValidationError(format!("Invalid URL '{url}': {e}")))?;

    let port = match parsed.scheme() {
        "http" => parsed.port().unwrap_or(80),
        "https" => parsed.port().unwrap_or(443),
        other => {
            return Err(AppError::ValidationError(format!(
                "URL scheme '{other}' is not allowed (only http/https)"
            )));
        }
    };

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::ValidationError(format!("URL '{url}' has no host")))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');

    let addresses: Vec<IpAddr> = match host.parse::<IpAddr>() {
        Ok(ip) => vec![ip],
        Err(_) => tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| AppError::NetworkError(format!("DNS resolution failed for {host}: {e}")))?
            .map(|addr| addr.ip())
            .collect(),
    };

    if addresses.is_empty() {
        return Err(AppError::NetworkError(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }

    match addresses.into_iter().find(|ip| is_reserved(*ip)) {
        Some(ip) => Err(AppError::ValidationError(format!(
            "SSRF blocked: {host} resolves to reserved address {ip}"
        ))),
        None => Ok(()),
    }
}

fn is_reserved(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                // 100.64.0.0/10
                || (a == 100 && (b & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_reserved(IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                // fe80::/10
                || (first & 0xFFC0) == 0xFE80
                // fc00::/7
                || (first & 0xFE00) == 0xFC00
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_v4_ranges() {
        for ip in [
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.1",
            "192.168.0.10",
            "169.254.169.254",
            "0.0.0.0",
            "100.64.0.1",
        ] {
            assert!(is_reserved(ip.parse().unwrap()), "{ip} should be reserved");
        }
        assert!(!is_reserved("8.8.8.8".parse().unwrap()));
        assert!(!is_reserved("93.184.216.34".parse().unwrap()));
    }

    #[test]
    fn reserved_v6_ranges() {
        assert!(is_reserved("::1".parse().unwrap()));
        assert!(is_reserved("fe80::1".parse().unwrap()));
        assert!(is_reserved("fd12::1".parse().unwrap()));
        assert!(is_reserved("::ffff:10.0.0.1".parse().unwrap()));
        assert!(!is_reserved("2001:4860:4860::8888".parse().unwrap()));
    }

    #[tokio::test]
    async fn literal_private_targets_are_blocked() {
        let err = ensure_public_target("http://127.0.0.1:8080/admin")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SSRF blocked"));

        let err = ensure_public_target("http://[::1]/").await.unwrap_err();
        assert!(err.to_string().contains("SSRF blocked"));
    }

    #[tokio::test]
    async fn non_http_schemes_are_rejected() {
        let err = ensure_public_target("file:///etc/passwd").await.unwrap_err();
        assert!(err.to_string().contains("not allowed"));
    }

    #[tokio::test]
    async fn fetch_refuses_private_target_before_sending() {
        let fetcher = PageFetcher::new(FetchOptions::default()).unwrap();
        let err = fetcher.fetch("http://192.168.1.1/", None).await.unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[test]
    fn invalid_proxy_is_a_config_error() {
        let result = PageFetcher::new(FetchOptions::default().with_proxy("http://[::1"));
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }
}
