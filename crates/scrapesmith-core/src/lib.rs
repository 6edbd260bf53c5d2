pub mod build;
pub mod config;
pub mod engine;
pub mod error;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod package;
pub mod pipeline;
pub mod processors;
pub mod rate_limiter;
pub mod registry;
pub mod repository;
pub mod retry;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use build::{Build, BuildStatus, CreateBuildRequest, FeedbackKind, UserFeedback};
pub use config::{EngineConfig, RateLimitConfig, RetryConfig};
pub use engine::ExecutionEngine;
pub use error::{AppError, BuildError, ErrorCategory, ErrorSeverity};
pub use memory::InMemoryBuildRepository;
pub use models::{ExecutionResult, ExecutionStatus, TargetResult, compute_hash};
pub use orchestrator::{OrchestrationMode, ToolCallInput, ToolCallResult, UnifiedOrchestrator};
pub use package::{ToolConfig, ToolConfigurationPackage, ToolKind};
pub use pipeline::{
    BuildPipeline, PipelineEvent, PipelineReporter, TracingPipelineReporter, cancel_build,
};
pub use registry::{RegistryBackend, ToolRegistry};
pub use repository::BuildRepository;
pub use traits::{AnalysisOutcome, Analyzer, ExtractionTool, FailureReason, ToolBackend, ToolOutput};
