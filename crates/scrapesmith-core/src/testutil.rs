//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, so clones share
//! state and tests can assert on recorded calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};

use crate::build::UserFeedback;
use crate::config::{EngineConfig, RateLimitConfig, RetryConfig};
use crate::engine::ExecutionEngine;
use crate::error::AppError;
use crate::models::ExecutionResult;
use crate::package::{ToolConfig, ToolConfigurationPackage, ToolKind};
use crate::pipeline::{PipelineEvent, PipelineReporter};
use crate::registry::ToolRegistry;
use crate::traits::{AnalysisOutcome, Analyzer, ExtractionTool, FailureReason, ToolBackend, ToolOutput};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

/// Package whose primary tool is a scraper called `tool_id`.
pub fn test_package(tool_id: &str) -> ToolConfigurationPackage {
    ToolConfigurationPackage::new(ToolConfig::scraper(tool_id).with_selector("title", "h1"))
}

/// Engine with `tool` registered as `mock`, no rate limit and millisecond backoff.
pub fn test_engine(tool: MockTool) -> ExecutionEngine {
    ExecutionEngine::new(
        ToolRegistry::new().with("mock", ToolKind::Scraper, move || tool.clone()),
        EngineConfig::default()
            .with_rate_limit(RateLimitConfig::disabled())
            .with_retry(RetryConfig::new(3, Duration::from_millis(5))),
    )
}

// ---------------------------------------------------------------------------
// MockTool
// ---------------------------------------------------------------------------

struct UrlFailure {
    /// `None` fails forever.
    remaining: Option<u32>,
    message: String,
}

struct MockToolState {
    kind: ToolKind,
    data: serde_json::Value,
    error: Option<String>,
    url_failures: HashMap<String, UrlFailure>,
    init_error: Option<String>,
    init_count: usize,
    cleanup_count: usize,
    attempts: HashMap<String, u32>,
    executed: Vec<String>,
    last_package: Option<ToolConfigurationPackage>,
}

/// Mock extraction tool. Every instance the registry creates from a clone
/// shares the same recorded state.
#[derive(Clone)]
pub struct MockTool {
    state: Arc<Mutex<MockToolState>>,
}

impl MockTool {
    pub fn succeeding(data: serde_json::Value) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockToolState {
                kind: ToolKind::Scraper,
                data,
                error: None,
                url_failures: HashMap::new(),
                init_error: None,
                init_count: 0,
                cleanup_count: 0,
                attempts: HashMap::new(),
                executed: Vec::new(),
                last_package: None,
            })),
        }
    }

    /// Fails every target.
    pub fn failing(error: AppError) -> Self {
        let tool = Self::succeeding(serde_json::Value::Null);
        lock(&tool.state).error = Some(error.to_string());
        tool
    }

    /// Always fails for `url`.
    pub fn failing_for(self, url: &str, error: AppError) -> Self {
        lock(&self.state).url_failures.insert(
            url.to_string(),
            UrlFailure {
                remaining: None,
                message: error.to_string(),
            },
        );
        self
    }

    /// Fails the first `times` attempts for `url`, then succeeds.
    pub fn failing_times(self, url: &str, times: u32, error: AppError) -> Self {
        lock(&self.state).url_failures.insert(
            url.to_string(),
            UrlFailure {
                remaining: Some(times),
                message: error.to_string(),
            },
        );
        self
    }

    pub fn with_init_error(self, error: AppError) -> Self {
        lock(&self.state).init_error = Some(error.to_string());
        self
    }

    pub fn with_kind(self, kind: ToolKind) -> Self {
        lock(&self.state).kind = kind;
        self
    }

    pub fn init_count(&self) -> usize {
        lock(&self.state).init_count
    }

    pub fn cleanup_count(&self) -> usize {
        lock(&self.state).cleanup_count
    }

    pub fn attempts_for(&self, url: &str) -> u32 {
        lock(&self.state).attempts.get(url).copied().unwrap_or(0)
    }

    /// Every `execute` call in order, retries included.
    pub fn executed_targets(&self) -> Vec<String> {
        lock(&self.state).executed.clone()
    }

    pub fn last_package(&self) -> Option<ToolConfigurationPackage> {
        lock(&self.state).last_package.clone()
    }

    fn run(&self, target: &str, package: &ToolConfigurationPackage) -> Result<ToolOutput, AppError> {
        let mut state = lock(&self.state);
        state.executed.push(target.to_string());
        *state.attempts.entry(target.to_string()).or_insert(0) += 1;
        state.last_package = Some(package.clone());

        if let Some(failure) = state.url_failures.get_mut(target) {
            match failure.remaining {
                None => return Err(AppError::Generic(failure.message.clone())),
                Some(n) if n > 0 => {
                    failure.remaining = Some(n - 1);
                    return Err(AppError::Generic(failure.message.clone()));
                }
                Some(_) => {}
            }
        }

        match &state.error {
            Some(message) => Err(AppError::Generic(message.clone())),
            None => Ok(ToolOutput::new(state.data.clone())
                .with_metadata(serde_json::json!({ "mock": true }))),
        }
    }
}

impl ExtractionTool for MockTool {
    fn kind(&self) -> ToolKind {
        lock(&self.state).kind
    }

    fn initialize<'a>(&'a mut self, _config: &'a ToolConfig) -> BoxFuture<'a, Result<(), AppError>> {
        let result = {
            let mut state = lock(&self.state);
            state.init_count += 1;
            match &state.init_error {
                Some(message) => Err(AppError::Generic(message.clone())),
                None => Ok(()),
            }
        };
        futures::future::ready(result).boxed()
    }

    fn execute<'a>(
        &'a self,
        target: &'a str,
        package: &'a ToolConfigurationPackage,
    ) -> BoxFuture<'a, Result<ToolOutput, AppError>> {
        futures::future::ready(self.run(target, package)).boxed()
    }

    fn cleanup(&mut self) -> BoxFuture<'_, ()> {
        lock(&self.state).cleanup_count += 1;
        futures::future::ready(()).boxed()
    }
}

// ---------------------------------------------------------------------------
// MockAnalyzer
// ---------------------------------------------------------------------------

/// Mock analyzer returning fixed outcomes for `analyze` and `refine`.
#[derive(Clone)]
pub struct MockAnalyzer {
    analysis: Arc<Mutex<AnalysisOutcome>>,
    refinement: Arc<Mutex<AnalysisOutcome>>,
    analyze_calls: Arc<Mutex<usize>>,
    refine_calls: Arc<Mutex<Vec<UserFeedback>>>,
}

impl MockAnalyzer {
    /// Both `analyze` and `refine` return `package`.
    pub fn with_package(package: ToolConfigurationPackage) -> Self {
        Self::with_outcome(AnalysisOutcome::Package(package))
    }

    pub fn failing(error: &str, reason: FailureReason) -> Self {
        Self::with_outcome(AnalysisOutcome::failed(error, reason))
    }

    fn with_outcome(outcome: AnalysisOutcome) -> Self {
        Self {
            analysis: Arc::new(Mutex::new(outcome.clone())),
            refinement: Arc::new(Mutex::new(outcome)),
            analyze_calls: Arc::new(Mutex::new(0)),
            refine_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_refinement(self, package: ToolConfigurationPackage) -> Self {
        *lock(&self.refinement) = AnalysisOutcome::Package(package);
        self
    }

    pub fn analyze_calls(&self) -> usize {
        *lock(&self.analyze_calls)
    }

    pub fn refine_calls(&self) -> usize {
        lock(&self.refine_calls).len()
    }
}

impl Analyzer for MockAnalyzer {
    async fn analyze(&self, _objective: &str, _targets: &[String]) -> AnalysisOutcome {
        *lock(&self.analyze_calls) += 1;
        lock(&self.analysis).clone()
    }

    async fn refine(
        &self,
        _objective: &str,
        _prior: &ToolConfigurationPackage,
        _samples: Option<&ExecutionResult>,
        feedback: &UserFeedback,
    ) -> AnalysisOutcome {
        lock(&self.refine_calls).push(feedback.clone());
        lock(&self.refinement).clone()
    }
}

// ---------------------------------------------------------------------------
// MockBackend
// ---------------------------------------------------------------------------

/// Mock tool backend with an optional delay before answering.
#[derive(Clone)]
pub struct MockBackend {
    response: Result<serde_json::Value, String>,
    delay: Duration,
    calls: Arc<Mutex<usize>>,
    completed: Arc<Mutex<usize>>,
}

impl MockBackend {
    pub fn ok(output: serde_json::Value) -> Self {
        Self::new(Ok(output))
    }

    pub fn err(error: AppError) -> Self {
        Self::new(Err(error.to_string()))
    }

    fn new(response: Result<serde_json::Value, String>) -> Self {
        Self {
            response,
            delay: Duration::ZERO,
            calls: Arc::new(Mutex::new(0)),
            completed: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        *lock(&self.calls)
    }

    /// Calls that ran to the end, delay included.
    pub fn completed_count(&self) -> usize {
        *lock(&self.completed)
    }
}

impl ToolBackend for MockBackend {
    async fn invoke(
        &self,
        _tool_name: &str,
        _payload: &serde_json::Value,
        _context: &serde_json::Value,
    ) -> Result<serde_json::Value, AppError> {
        *lock(&self.calls) += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        *lock(&self.completed) += 1;
        self.response.clone().map_err(AppError::Generic)
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Records pipeline events as short strings, e.g. `stage_started:analysis`.
#[derive(Clone, Default)]
pub struct MockReporter {
    events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        lock(&self.events).clone()
    }
}

impl PipelineReporter for MockReporter {
    fn report(&self, event: PipelineEvent<'_>) {
        let entry = match event {
            PipelineEvent::BuildCreated { .. } => "build_created".to_string(),
            PipelineEvent::StageStarted { stage, .. } => format!("stage_started:{stage}"),
            PipelineEvent::StageFinished { stage, success, .. } => {
                format!("stage_finished:{stage}:{success}")
            }
            PipelineEvent::AwaitingInput { status, .. } => format!("awaiting_input:{status}"),
            PipelineEvent::BuildFinished { status, .. } => format!("build_finished:{status}"),
            PipelineEvent::Rejected { action, .. } => format!("rejected:{action}"),
        };
        lock(&self.events).push(entry);
    }
}
