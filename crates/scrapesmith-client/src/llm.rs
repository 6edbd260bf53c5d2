use std::time::Duration;

use reqwest::Client;
use scrapesmith_core::build::UserFeedback;
use scrapesmith_core::error::AppError;
use scrapesmith_core::models::ExecutionResult;
use scrapesmith_core::package::{CURRENT_SCHEMA_VERSION, ToolConfigurationPackage, ToolKind};
use scrapesmith_core::registry::ToolRegistry;
use scrapesmith_core::traits::{AnalysisOutcome, Analyzer};
use serde::{Deserialize, Serialize};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(120);
/// Sample results shown to the model during refinement.
const MAX_SAMPLES_IN_PROMPT: usize = 3;
/// Characters of sample data per result shown to the model.
const MAX_SAMPLE_CHARS: usize = 2_000;

const SYSTEM_PROMPT: &str = r#"You configure web extraction tools. Answer ONLY with one JSON object of this shape, no prose:
{
  "schemaVersion": "1.0",
  "primaryTool": {"toolId": "<scraper id>", "kind": "scraper", "selectors": {"<field>": "<css selector>"}, "params": {}},
  "auxiliaryTools": [{"toolId": "<id>", "kind": "proxy|anti_blocking|captcha", "params": {}}],
  "expectedOutputSchema": {<JSON Schema of one extracted record>}
}
Selector values are CSS selectors. Append "@attr" to read an attribute and prefix "all:" to collect every match as an array."#;

/// A tool the model may choose, as advertised in the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub id: String,
    pub kind: ToolKind,
}

/// OpenAI-compatible analysis collaborator.
///
/// Produces and refines tool configuration packages from an objective.
/// Works with any OpenAI-compatible chat-completions API.
#[derive(Clone)]
pub struct OpenAiAnalyzer {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
    tools: Vec<ToolDescriptor>,
}

impl OpenAiAnalyzer {
    pub fn new(api_key: &str, model: &str) -> Result<Self, AppError> {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, model: &str, base_url: &str) -> Result<Self, AppError> {
        Self::build(api_key, model, base_url, DEFAULT_LLM_TIMEOUT, Vec::new())
    }

    pub fn with_timeout(self, timeout: Duration) -> Result<Self, AppError> {
        Self::build(&self.api_key, &self.model, &self.base_url, timeout, self.tools)
    }

    /// Restrict the model to the tools registered in `registry`.
    pub fn with_tools(mut self, registry: &ToolRegistry) -> Self {
        self.tools = registry
            .tool_ids()
            .into_iter()
            .filter_map(|id| {
                registry.kind_of(id).map(|kind| ToolDescriptor {
                    id: id.to_string(),
                    kind,
                })
            })
            .collect();
        self
    }

    fn build(
        api_key: &str,
        model: &str,
        base_url: &str,
        timeout: Duration,
        tools: Vec<ToolDescriptor>,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout_secs: timeout.as_secs(),
            tools,
        })
    }

    fn tool_catalog(&self) -> String {
        if self.tools.is_empty() {
            return "Any tool id may be used.".to_string();
        }
        let lines: Vec<String> = self
            .tools
            .iter()
            .map(|t| format!("- {} ({})", t.id, t.kind))
            .collect();
        format!("Available tools:\n{}", lines.join("\n"))
    }

    fn analysis_prompt(&self, objective: &str, targets: &[String]) -> String {
        format!(
            "{}\n\nObjective: {}\n\nTarget URLs:\n{}\n\nProduce the tool configuration package.",
            self.tool_catalog(),
            objective,
            targets.join("\n")
        )
    }

    fn refinement_prompt(
        &self,
        objective: &str,
        prior: &ToolConfigurationPackage,
        samples: Option<&ExecutionResult>,
        feedback: &UserFeedback,
    ) -> Result<String, AppError> {
        let samples = match samples {
            Some(result) => summarize_samples(result),
            None => "No samples were generated.".to_string(),
        };
        Ok(format!(
            "{}\n\nObjective: {}\n\nCurrent package:\n```json\n{}\n```\n\nSample results:\n{}\n\nUser feedback ({}): {}\n\nProduce a revised tool configuration package.",
            self.tool_catalog(),
            objective,
            serde_json::to_string_pretty(prior)?,
            samples,
            feedback.kind.as_str(),
            feedback.text
        ))
    }

    async fn complete(&self, prompt: String) -> Result<String, AppError> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt,
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_object".to_string(),
            },
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    AppError::NetworkError(format!("Connection failed: {e}"))
                } else {
                    AppError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            if status_code == 429 {
                return Err(AppError::RateLimitExceeded);
            }
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| format!("HTTP {status_code}: {body}"));
            return Err(AppError::LlmError {
                message,
                status_code,
                retryable: status_code >= 500,
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to parse LLM response: {e}")))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AppError::LlmError {
                message: "Empty response from LLM".into(),
                status_code: 200,
                retryable: false,
            })
    }
}

// ---- OpenAI API types ----

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

fn summarize_samples(result: &ExecutionResult) -> String {
    let mut lines = vec![format!(
        "overall: {} ({} ok, {} failed)",
        result.overall_status,
        result.success_count(),
        result.failure_count()
    )];
    for sample in result.results.iter().take(MAX_SAMPLES_IN_PROMPT) {
        let detail = match (&sample.data, &sample.error) {
            (Some(data), _) => truncate(&data.to_string(), MAX_SAMPLE_CHARS),
            (None, Some(error)) => format!("error: {error}"),
            (None, None) => "no data".to_string(),
        };
        lines.push(format!("- {}: {}", sample.url, detail));
    }
    lines.join("\n")
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

/// Parse a model answer into a package and check it against the tools the
/// model was allowed to use.
pub fn parse_package(
    content: &str,
    tools: &[ToolDescriptor],
) -> Result<ToolConfigurationPackage, AppError> {
    let json = strip_code_fence(content);
    let mut value: serde_json::Value = serde_json::from_str(json)?;

    if let Some(object) = value.as_object_mut() {
        object
            .entry("schemaVersion")
            .or_insert_with(|| serde_json::Value::String(CURRENT_SCHEMA_VERSION.to_string()));
    }
    let package: ToolConfigurationPackage = serde_json::from_value(value)?;

    if package.primary_tool.kind != ToolKind::Scraper {
        return Err(AppError::ValidationError(format!(
            "primary tool '{}' is a {} tool, expected a scraper",
            package.primary_tool.tool_id, package.primary_tool.kind
        )));
    }
    if !tools.is_empty() && !tools.iter().any(|t| t.id == package.primary_tool.tool_id) {
        return Err(AppError::UnknownTool(package.primary_tool.tool_id));
    }
    for aux in &package.auxiliary_tools {
        if aux.kind == ToolKind::Scraper {
            return Err(AppError::ValidationError(format!(
                "auxiliary tool '{}' cannot be a scraper",
                aux.tool_id
            )));
        }
    }

    Ok(package)
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

impl Analyzer for OpenAiAnalyzer {
    async fn analyze(&self, objective: &str, targets: &[String]) -> AnalysisOutcome {
        let prompt = self.analysis_prompt(objective, targets);
        match self
            .complete(prompt)
            .await
            .and_then(|content| parse_package(&content, &self.tools))
        {
            Ok(package) => AnalysisOutcome::Package(package),
            Err(e) => {
                tracing::warn!(error = %e, model = %self.model, "Analysis call failed");
                e.into()
            }
        }
    }

    async fn refine(
        &self,
        objective: &str,
        prior: &ToolConfigurationPackage,
        samples: Option<&ExecutionResult>,
        feedback: &UserFeedback,
    ) -> AnalysisOutcome {
        let prompt = match self.refinement_prompt(objective, prior, samples, feedback) {
            Ok(prompt) => prompt,
            Err(e) => return e.into(),
        };
        match self
            .complete(prompt)
            .await
            .and_then(|content| parse_package(&content, &self.tools))
        {
            Ok(package) => AnalysisOutcome::Package(package),
            Err(e) => {
                tracing::warn!(error = %e, model = %self.model, "Refinement call failed");
                e.into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrapesmith_core::build::FeedbackKind;
    use scrapesmith_core::models::{TargetMetadata, TargetResult};
    use scrapesmith_core::traits::FailureReason;

    fn tools() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor {
                id: "static_html".into(),
                kind: ToolKind::Scraper,
            },
            ToolDescriptor {
                id: "proxy".into(),
                kind: ToolKind::Proxy,
            },
        ]
    }

    #[test]
    fn parses_fenced_package_and_fills_version() {
        let content = r#"```json
{
  "primaryTool": {"toolId": "static_html", "kind": "scraper", "selectors": {"title": "h1"}},
  "auxiliaryTools": [{"toolId": "proxy", "kind": "proxy", "params": {"url": "http://p.test:3128"}}],
  "expectedOutputSchema": {"type": "object"}
}
```"#;

        let package = parse_package(content, &tools()).unwrap();

        assert_eq!(package.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(package.primary_tool.selectors["title"], "h1");
        assert_eq!(package.auxiliary_tools.len(), 1);
        assert_eq!(package.expected_output_schema["type"], "object");
    }

    #[test]
    fn rejects_unknown_primary_tool() {
        let content = r#"{"primaryTool": {"toolId": "magic", "kind": "scraper"}}"#;
        let err = parse_package(content, &tools()).unwrap_err();
        assert!(matches!(err, AppError::UnknownTool(id) if id == "magic"));
    }

    #[test]
    fn rejects_non_scraper_primary() {
        let content = r#"{"primaryTool": {"toolId": "proxy", "kind": "proxy"}}"#;
        assert!(matches!(
            parse_package(content, &tools()),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn invalid_json_maps_to_invalid_response() {
        let err = parse_package("Sure! Here is your package.", &tools()).unwrap_err();
        let outcome: AnalysisOutcome = err.into();
        assert!(matches!(
            outcome,
            AnalysisOutcome::Failed {
                reason: FailureReason::InvalidResponse,
                ..
            }
        ));
    }

    #[test]
    fn empty_catalog_accepts_any_tool() {
        let content = r#"{"primaryTool": {"toolId": "custom", "kind": "scraper"}}"#;
        assert!(parse_package(content, &[]).is_ok());
    }

    #[test]
    fn refinement_prompt_carries_feedback_and_samples() {
        let analyzer = OpenAiAnalyzer::new("key", "gpt-4o-mini").unwrap();
        let prior = ToolConfigurationPackage::new(
            scrapesmith_core::package::ToolConfig::scraper("static_html").with_selector("title", "h1"),
        );
        let samples = ExecutionResult::from_results(vec![
            TargetResult::succeeded(
                "https://a.test",
                serde_json::json!({"title": "Hello"}),
                TargetMetadata::default(),
            ),
            TargetResult::failed("https://b.test", "HTTP 404", TargetMetadata::default()),
        ]);
        let feedback = UserFeedback::new(FeedbackKind::Samples, "also grab the price");

        let prompt = analyzer
            .refinement_prompt("extract titles", &prior, Some(&samples), &feedback)
            .unwrap();

        assert!(prompt.contains("also grab the price"));
        assert!(prompt.contains("(samples)"));
        assert!(prompt.contains("https://b.test: error: HTTP 404"));
        assert!(prompt.contains("\"title\": \"h1\""));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé…");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[tokio::test]
    async fn unreachable_api_is_unavailable() {
        let analyzer =
            OpenAiAnalyzer::with_base_url("key", "gpt-4o-mini", "http://127.0.0.1:9/v1").unwrap();
        let outcome = analyzer.analyze("extract titles", &["https://a.test".into()]).await;
        assert!(matches!(
            outcome,
            AnalysisOutcome::Failed {
                reason: FailureReason::Unavailable,
                ..
            }
        ));
    }
}
