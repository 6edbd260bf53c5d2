use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Overall outcome of one execution-engine batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    PartialSuccess,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::PartialSuccess => "partial_success",
            ExecutionStatus::Failed => "failed",
        }
    }

    /// Aggregate per-target outcomes into a batch status.
    pub fn aggregate(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (0, _) => ExecutionStatus::Failed,
            (_, 0) => ExecutionStatus::Completed,
            _ => ExecutionStatus::PartialSuccess,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bookkeeping attached to every per-target result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetMetadata {
    pub tool_id: String,
    pub attempts: u32,
    pub duration_ms: u64,
    /// SHA-256 of the extracted data (for change detection).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_hash: Option<String>,
    /// Whether the data matched the package's expected output schema.
    /// `None` when the package carries no schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_valid: Option<bool>,
    /// Tool-specific metadata, passed through untouched.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub tool: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetResult {
    pub url: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: TargetMetadata,
}

impl TargetResult {
    pub fn succeeded(url: impl Into<String>, data: serde_json::Value, metadata: TargetMetadata) -> Self {
        Self {
            url: url.into(),
            success: true,
            data: Some(data),
            error: None,
            metadata,
        }
    }

    pub fn failed(url: impl Into<String>, error: impl Into<String>, metadata: TargetMetadata) -> Self {
        Self {
            url: url.into(),
            success: false,
            data: None,
            error: Some(error.into()),
            metadata,
        }
    }
}

/// Result of one execution-engine invocation, stored verbatim on the build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub overall_status: ExecutionStatus,
    pub results: Vec<TargetResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Aggregate target results.
    pub fn from_results(results: Vec<TargetResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded;
        Self {
            overall_status: ExecutionStatus::aggregate(succeeded, failed),
            results,
            error: None,
        }
    }

    /// The tool layer itself could not run.
    pub fn aborted(error: impl Into<String>) -> Self {
        Self {
            overall_status: ExecutionStatus::Failed,
            results: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failure_count(&self) -> usize {
        self.results.len() - self.success_count()
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
