use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;

use crate::build::UserFeedback;
use crate::error::AppError;
use crate::models::ExecutionResult;
use crate::package::{ToolConfig, ToolConfigurationPackage, ToolKind};

/// Successful output of one tool call against one target.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub data: serde_json::Value,
    pub metadata: serde_json::Value,
}

impl ToolOutput {
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            data,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A pluggable extraction capability (scraper, proxy, anti-blocking, captcha).
///
/// Tools are created fresh per engine run through the
/// [`ToolRegistry`](crate::registry::ToolRegistry), so this trait is object
/// safe and returns boxed futures.
pub trait ExtractionTool: Send + Sync {
    fn kind(&self) -> ToolKind;

    /// Prepare the tool for a run. Called once before any `execute`.
    fn initialize<'a>(&'a mut self, config: &'a ToolConfig) -> BoxFuture<'a, Result<(), AppError>>;

    /// Extract from a single target using the full package.
    fn execute<'a>(
        &'a self,
        target: &'a str,
        package: &'a ToolConfigurationPackage,
    ) -> BoxFuture<'a, Result<ToolOutput, AppError>>;

    /// Release resources. Called exactly once per run by the engine.
    fn cleanup(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// Why the analysis collaborator could not produce a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The model or its API could not be reached.
    Unavailable,
    /// The model answered with something that is not a valid package.
    InvalidResponse,
    /// The objective cannot be served by any registered tool.
    Unsupported,
    Other,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Unavailable => "unavailable",
            FailureReason::InvalidResponse => "invalid_response",
            FailureReason::Unsupported => "unsupported",
            FailureReason::Other => "other",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of asking the analysis collaborator for a package.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisOutcome {
    Package(ToolConfigurationPackage),
    Failed { error: String, reason: FailureReason },
}

impl AnalysisOutcome {
    pub fn failed(error: impl Into<String>, reason: FailureReason) -> Self {
        AnalysisOutcome::Failed {
            error: error.into(),
            reason,
        }
    }
}

impl From<AppError> for AnalysisOutcome {
    fn from(error: AppError) -> Self {
        let reason = match &error {
            AppError::SerializationError(_) | AppError::ValidationError(_) => {
                FailureReason::InvalidResponse
            }
            AppError::UnknownTool(_) => FailureReason::Unsupported,
            e if e.is_retryable() => FailureReason::Unavailable,
            AppError::LlmError { .. } | AppError::HttpError(_) => FailureReason::Unavailable,
            _ => FailureReason::Other,
        };
        AnalysisOutcome::failed(error.to_string(), reason)
    }
}

/// Turns an objective into a tool configuration package (usually an LLM).
pub trait Analyzer: Send + Sync + Clone {
    fn analyze(
        &self,
        objective: &str,
        targets: &[String],
    ) -> impl Future<Output = AnalysisOutcome> + Send;

    /// Re-derive a package from the previous one, its samples and the
    /// user's feedback.
    fn refine(
        &self,
        objective: &str,
        prior: &ToolConfigurationPackage,
        samples: Option<&ExecutionResult>,
        feedback: &UserFeedback,
    ) -> impl Future<Output = AnalysisOutcome> + Send;
}

/// One path for invoking a named tool with a JSON payload.
pub trait ToolBackend: Send + Sync {
    fn invoke(
        &self,
        tool_name: &str,
        payload: &serde_json::Value,
        context: &serde_json::Value,
    ) -> impl Future<Output = Result<serde_json::Value, AppError>> + Send;
}
