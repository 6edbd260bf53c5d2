//! Dual-backend tool invocation.
//!
//! A call goes through the local (primary) path, the remote (secondary)
//! backend, or both at once. In `Both` mode the two calls are joined, not
//! raced: the slower branch always runs to completion even when the other
//! one already decided the result, so any side effect of the losing branch
//! still happens, unobserved. Neither backend takes a cancellation token.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::traits::ToolBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestrationMode {
    Primary,
    Secondary,
    Both,
}

impl OrchestrationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestrationMode::Primary => "primary",
            OrchestrationMode::Secondary => "secondary",
            OrchestrationMode::Both => "both",
        }
    }
}

impl fmt::Display for OrchestrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrchestrationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "primary" => Ok(OrchestrationMode::Primary),
            "secondary" => Ok(OrchestrationMode::Secondary),
            "both" => Ok(OrchestrationMode::Both),
            _ => Err(format!("Unknown orchestration mode: {}", s)),
        }
    }
}

/// Input to a single orchestrated tool call.
#[derive(Debug, Clone)]
pub struct ToolCallInput {
    pub tool_name: String,
    pub payload: serde_json::Value,
    pub context: serde_json::Value,
}

impl ToolCallInput {
    pub fn new(tool_name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            payload,
            context: serde_json::Value::Null,
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ToolCallResult {
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub mode: OrchestrationMode,
    pub duration: Duration,
}

impl ToolCallResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Separator between branch errors when both paths fail.
pub const BOTH_FAILED_SEPARATOR: &str = " | ";

/// Dispatches tool calls to a primary and a secondary [`ToolBackend`].
pub struct UnifiedOrchestrator<P, S>
where
    P: ToolBackend,
    S: ToolBackend,
{
    primary: P,
    secondary: S,
}

impl<P, S> UnifiedOrchestrator<P, S>
where
    P: ToolBackend,
    S: ToolBackend,
{
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }

    pub async fn call_tool(&self, input: &ToolCallInput, mode: OrchestrationMode) -> ToolCallResult {
        let started = Instant::now();

        let (output, error) = match mode {
            OrchestrationMode::Primary => split(self.call_primary(input).await),
            OrchestrationMode::Secondary => split(self.call_secondary(input).await),
            OrchestrationMode::Both => {
                let (primary, secondary) =
                    tokio::join!(self.call_primary(input), self.call_secondary(input));
                reconcile(primary, secondary)
            }
        };

        let result = ToolCallResult {
            output,
            error,
            mode,
            duration: started.elapsed(),
        };

        match &result.error {
            None => tracing::info!(
                tool = %input.tool_name,
                %mode,
                duration_ms = %result.duration.as_millis(),
                "Tool call succeeded"
            ),
            Some(error) => tracing::warn!(
                tool = %input.tool_name,
                %mode,
                %error,
                duration_ms = %result.duration.as_millis(),
                "Tool call failed"
            ),
        }

        result
    }

    async fn call_primary(&self, input: &ToolCallInput) -> Result<serde_json::Value, AppError> {
        self.primary
            .invoke(&input.tool_name, &input.payload, &input.context)
            .await
    }

    async fn call_secondary(&self, input: &ToolCallInput) -> Result<serde_json::Value, AppError> {
        self.secondary
            .invoke(&input.tool_name, &input.payload, &input.context)
            .await
    }
}

fn split(result: Result<serde_json::Value, AppError>) -> (Option<serde_json::Value>, Option<String>) {
    match result {
        Ok(output) => (Some(output), None),
        Err(e) => (None, Some(e.to_string())),
    }
}

/// Secondary wins when both succeed; primary is the fallback.
fn reconcile(
    primary: Result<serde_json::Value, AppError>,
    secondary: Result<serde_json::Value, AppError>,
) -> (Option<serde_json::Value>, Option<String>) {
    match (primary, secondary) {
        (_, Ok(output)) => (Some(output), None),
        (Ok(output), Err(e)) => {
            tracing::debug!(error = %e, "Secondary backend failed, using primary output");
            (Some(output), None)
        }
        (Err(p), Err(s)) => (
            None,
            Some(format!("{p}{BOTH_FAILED_SEPARATOR}{s}")),
        ),
    }
}
