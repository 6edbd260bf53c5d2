use std::time::Duration;

use reqwest::Client;
use scrapesmith_core::error::AppError;
use scrapesmith_core::traits::ToolBackend;
use serde::Serialize;

const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Serialize)]
struct InvokeRequest<'a> {
    payload: &'a serde_json::Value,
    context: &'a serde_json::Value,
}

/// Remote tool-invocation path: `POST {base_url}/tools/{name}/invoke`.
///
/// The response body is returned as-is, unless it wraps the result in an
/// `output` field or reports an `error`.
#[derive(Clone)]
pub struct HttpToolBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl HttpToolBackend {
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        Self::with_timeout(base_url, DEFAULT_BACKEND_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            timeout_secs: timeout.as_secs(),
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn invoke_url(&self, tool_name: &str) -> String {
        format!("{}/tools/{}/invoke", self.base_url, tool_name)
    }
}

fn unwrap_response(body: serde_json::Value) -> Result<serde_json::Value, AppError> {
    if let Some(error) = body.get("error").and_then(|e| e.as_str()) {
        return Err(AppError::BackendError(error.to_string()));
    }
    match body {
        serde_json::Value::Object(mut object) if object.contains_key("output") => {
            Ok(object.remove("output").unwrap_or(serde_json::Value::Null))
        }
        other => Ok(other),
    }
}

impl ToolBackend for HttpToolBackend {
    async fn invoke(
        &self,
        tool_name: &str,
        payload: &serde_json::Value,
        context: &serde_json::Value,
    ) -> Result<serde_json::Value, AppError> {
        let url = self.invoke_url(tool_name);
        tracing::debug!(tool = %tool_name, %url, "Invoking remote tool");

        let mut request = self
            .client
            .post(&url)
            .json(&InvokeRequest { payload, context });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::BackendError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::BackendError(format!(
                "HTTP {} from {}: {}",
                status.as_u16(),
                url,
                body.trim()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::BackendError(format!("Invalid JSON from {url}: {e}")))?;
        unwrap_response(body)
    }
}
