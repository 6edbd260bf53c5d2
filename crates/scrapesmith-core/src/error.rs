use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Application-wide error types for Scrapesmith.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (fetching a page or calling a backend).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// LLM API call failed.
    #[error("LLM error (HTTP {status_code}): {message}")]
    LlmError {
        message: String,
        status_code: u16,
        retryable: bool,
    },

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A tool failed while extracting from a target.
    #[error("Tool error: {0}")]
    ToolError(String),

    /// A tool could not be created or initialized.
    #[error("Tool initialization failed for '{tool}': {message}")]
    ToolInitError { tool: String, message: String },

    /// No tool is registered under the requested identifier.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Input rejected before any work was attempted.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A build with the given id does not exist.
    #[error("Build not found: {0}")]
    BuildNotFound(Uuid),

    /// A status change that the lifecycle graph does not allow.
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// The secondary tool backend failed.
    #[error("Backend error: {0}")]
    BackendError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::RateLimitExceeded => true,
            AppError::LlmError { retryable, .. } => *retryable,
            AppError::HttpError(msg) | AppError::ToolError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// Maps the error onto the persisted error taxonomy.
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::HttpError(_)
            | AppError::NetworkError(_)
            | AppError::Timeout(_)
            | AppError::RateLimitExceeded
            | AppError::BackendError(_) => ErrorCategory::Network,
            AppError::LlmError { .. } => ErrorCategory::Analysis,
            AppError::DatabaseError(_) => ErrorCategory::Database,
            AppError::SerializationError(_) | AppError::ValidationError(_) => {
                ErrorCategory::Validation
            }
            AppError::ConfigError(_) | AppError::UnknownTool(_) => ErrorCategory::Configuration,
            AppError::ToolError(_) => ErrorCategory::Scraping,
            AppError::ToolInitError { .. } => ErrorCategory::Execution,
            AppError::BuildNotFound(_) | AppError::InvalidTransition { .. } => {
                ErrorCategory::BuildProcessor
            }
            AppError::Generic(_) => ErrorCategory::Unknown,
        }
    }
}

/// Error categories persisted with a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Database,
    Network,
    Scraping,
    Analysis,
    Execution,
    Configuration,
    Refinement,
    SampleGeneration,
    BuildProcessor,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Where an error happened.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub build_id: Option<Uuid>,
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

/// Structured error record stored on a build when a stage fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildError {
    pub message: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub timestamp: DateTime<Utc>,
    pub context: ErrorContext,
}

impl BuildError {
    pub fn new(message: impl Into<String>, category: ErrorCategory, severity: ErrorSeverity) -> Self {
        Self {
            message: message.into(),
            category,
            severity,
            timestamp: Utc::now(),
            context: ErrorContext::default(),
        }
    }

    /// Build a record from an [`AppError`], keeping its natural category.
    pub fn from_app_error(error: &AppError, severity: ErrorSeverity) -> Self {
        Self::new(error.to_string(), error.category(), severity)
    }

    pub fn with_context(mut self, build_id: Uuid, operation: impl Into<String>) -> Self {
        self.context.build_id = Some(build_id);
        self.context.operation = Some(operation.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.context.details = details;
        self
    }
}
