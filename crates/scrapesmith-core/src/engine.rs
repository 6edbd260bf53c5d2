use std::collections::VecDeque;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};

use crate::config::EngineConfig;
use crate::error::AppError;
use crate::models::{ExecutionResult, TargetMetadata, TargetResult, compute_hash};
use crate::package::ToolConfigurationPackage;
use crate::rate_limiter::RateLimiter;
use crate::registry::ToolRegistry;
use crate::retry::RetryTracker;
use crate::traits::{ExtractionTool, ToolOutput};

/// Tools instantiated for one run. Every member gets exactly one `cleanup`.
struct ToolSet {
    primary: Box<dyn ExtractionTool>,
    auxiliary: Vec<(String, Box<dyn ExtractionTool>)>,
}

impl ToolSet {
    async fn initialize(&mut self, package: &ToolConfigurationPackage) -> Result<(), AppError> {
        self.primary
            .initialize(&package.primary_tool)
            .await
            .map_err(|e| init_error(&package.primary_tool.tool_id, e))?;

        for (tool_id, tool) in self.auxiliary.iter_mut() {
            let config = package
                .auxiliary_tools
                .iter()
                .find(|c| c.tool_id == *tool_id)
                .ok_or_else(|| AppError::UnknownTool(tool_id.clone()))?;
            tool.initialize(config)
                .await
                .map_err(|e| init_error(tool_id, e))?;
        }
        Ok(())
    }

    async fn cleanup(mut self) {
        self.primary.cleanup().await;
        for (_, tool) in &mut self.auxiliary {
            tool.cleanup().await;
        }
    }
}

fn init_error(tool_id: &str, error: AppError) -> AppError {
    match error {
        e @ AppError::ToolInitError { .. } => e,
        e => AppError::ToolInitError {
            tool: tool_id.to_string(),
            message: e.to_string(),
        },
    }
}

/// Fans a tool configuration package out across target URLs.
///
/// Each run gets its own [`RateLimiter`] and [`RetryTracker`], so concurrent
/// builds never share throttling or backoff state.
#[derive(Clone)]
pub struct ExecutionEngine {
    registry: ToolRegistry,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(registry: ToolRegistry, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the package's primary tool against every target.
    ///
    /// Never returns an error: a tool layer that cannot run yields a
    /// `failed` result with a top-level error instead.
    pub async fn execute_package(
        &self,
        package: &ToolConfigurationPackage,
        targets: &[String],
    ) -> ExecutionResult {
        if targets.is_empty() {
            return ExecutionResult::aborted("No targets to execute");
        }

        let mut tools = match self.instantiate(package) {
            Ok(tools) => tools,
            Err(e) => {
                tracing::error!(tool = %package.primary_tool.tool_id, error = %e, "Cannot create primary tool");
                return ExecutionResult::aborted(e.to_string());
            }
        };

        let result = match tools.initialize(package).await {
            Ok(()) => self.run_targets(tools.primary.as_ref(), package, targets).await,
            Err(e) => {
                tracing::error!(error = %e, "Tool initialization failed");
                ExecutionResult::aborted(e.to_string())
            }
        };

        tools.cleanup().await;

        tracing::info!(
            status = %result.overall_status,
            succeeded = result.success_count(),
            failed = result.failure_count(),
            "Execution finished"
        );
        result
    }

    fn instantiate(&self, package: &ToolConfigurationPackage) -> Result<ToolSet, AppError> {
        let primary = self.registry.create(&package.primary_tool.tool_id)?;

        let mut auxiliary = Vec::with_capacity(package.auxiliary_tools.len());
        for config in &package.auxiliary_tools {
            match self.registry.create(&config.tool_id) {
                Ok(tool) => auxiliary.push((config.tool_id.clone(), tool)),
                Err(_) => tracing::warn!(
                    tool = %config.tool_id,
                    kind = %config.kind,
                    "Auxiliary tool not registered, skipping"
                ),
            }
        }

        Ok(ToolSet { primary, auxiliary })
    }

    /// Schedule attempts across targets.
    ///
    /// At most `concurrency` attempts are in flight. A failed target leaves
    /// its slot while it backs off and is re-queued once the delay elapses,
    /// so healthy targets keep running in the meantime.
    async fn run_targets(
        &self,
        tool: &dyn ExtractionTool,
        package: &ToolConfigurationPackage,
        targets: &[String],
    ) -> ExecutionResult {
        let limiter = RateLimiter::new(self.config.rate_limit.clone());
        let tracker = RetryTracker::new(self.config.retry.clone());
        let validator = output_validator(package);
        let concurrency = self.config.concurrency.max(1);

        let mut slots: Vec<TargetSlot> = targets.iter().map(|_| TargetSlot::default()).collect();
        let mut ready: VecDeque<usize> = (0..targets.len()).collect();
        let mut in_flight = FuturesUnordered::new();
        let mut backing_off = FuturesUnordered::new();

        loop {
            while in_flight.len() < concurrency {
                let Some(idx) = ready.pop_front() else {
                    break;
                };
                let slot = &mut slots[idx];
                slot.attempts += 1;
                slot.started.get_or_insert_with(Instant::now);
                in_flight.push(attempt(tool, package, idx, &targets[idx], &limiter));
            }

            if in_flight.is_empty() && backing_off.is_empty() {
                break;
            }

            let event = tokio::select! {
                Some((idx, outcome)) = in_flight.next(), if !in_flight.is_empty() => {
                    Scheduled::Finished(idx, outcome)
                }
                Some(idx) = backing_off.next(), if !backing_off.is_empty() => Scheduled::Due(idx),
            };

            let (idx, outcome) = match event {
                Scheduled::Due(idx) => {
                    ready.push_back(idx);
                    continue;
                }
                Scheduled::Finished(idx, outcome) => (idx, outcome),
            };

            let url = targets[idx].as_str();
            let key = retry_key(idx, url);
            let slot = &mut slots[idx];

            match outcome {
                Ok(output) => {
                    tracker.track_successful_url(&key);
                    tracing::debug!(%url, attempts = slot.attempts, "Target succeeded");
                    slot.result = Some(succeeded(package, url, slot, output, validator.as_ref()));
                }
                Err(e) => {
                    let error = e.to_string();
                    let decision = tracker.track_failed_url(&key, &error);
                    if decision.can_retry {
                        tracing::warn!(
                            %url,
                            %error,
                            attempt = decision.attempts_made,
                            wait_ms = %decision.wait_time.as_millis(),
                            "Target failed, re-queued after backoff"
                        );
                        backing_off.push(backoff(idx, decision.wait_time));
                    } else {
                        tracing::warn!(%url, %error, attempts = decision.attempts_made, "Target exhausted retries");
                        let metadata = TargetMetadata {
                            tool_id: package.primary_tool.tool_id.clone(),
                            attempts: slot.attempts,
                            duration_ms: slot.elapsed_ms(),
                            ..TargetMetadata::default()
                        };
                        slot.result = Some(TargetResult::failed(url, error, metadata));
                    }
                }
            }
        }

        let stats = tracker.stats();
        if stats.exhausted > 0 {
            tracing::warn!(exhausted = stats.exhausted, "Targets exhausted their retries");
        }

        let results = slots
            .into_iter()
            .zip(targets)
            .map(|(slot, url)| {
                slot.result.unwrap_or_else(|| {
                    TargetResult::failed(url, "Target was never executed", TargetMetadata::default())
                })
            })
            .collect();
        ExecutionResult::from_results(results)
    }
}

/// Per-position state; the same URL listed twice gets two slots.
#[derive(Default)]
struct TargetSlot {
    attempts: u32,
    started: Option<Instant>,
    result: Option<TargetResult>,
}

impl TargetSlot {
    fn elapsed_ms(&self) -> u64 {
        self.started
            .map(|s| s.elapsed().as_millis() as u64)
            .unwrap_or_default()
    }
}

enum Scheduled {
    Finished(usize, Result<ToolOutput, AppError>),
    Due(usize),
}

/// Retry records are keyed by target position so duplicate URLs keep
/// independent attempt counts.
fn retry_key(idx: usize, url: &str) -> String {
    format!("{idx}:{url}")
}

async fn attempt(
    tool: &dyn ExtractionTool,
    package: &ToolConfigurationPackage,
    idx: usize,
    url: &str,
    limiter: &RateLimiter,
) -> (usize, Result<ToolOutput, AppError>) {
    limiter.acquire().await;
    (idx, tool.execute(url, package).await)
}

async fn backoff(idx: usize, wait: Duration) -> usize {
    tokio::time::sleep(wait).await;
    idx
}

fn succeeded(
    package: &ToolConfigurationPackage,
    url: &str,
    slot: &TargetSlot,
    output: ToolOutput,
    validator: Option<&jsonschema::Validator>,
) -> TargetResult {
    let metadata = TargetMetadata {
        tool_id: package.primary_tool.tool_id.clone(),
        attempts: slot.attempts,
        duration_ms: slot.elapsed_ms(),
        data_hash: Some(compute_hash(&output.data.to_string())),
        schema_valid: validator.map(|v| v.is_valid(&output.data)),
        tool: output.metadata,
    };
    if metadata.schema_valid == Some(false) {
        tracing::warn!(%url, "Extracted data does not match expected output schema");
    }
    TargetResult::succeeded(url, output.data, metadata)
}

/// Compile the package's expected output schema, if it has one.
fn output_validator(package: &ToolConfigurationPackage) -> Option<jsonschema::Validator> {
    let schema = &package.expected_output_schema;
    if !schema.is_object() {
        return None;
    }
    match jsonschema::validator_for(schema) {
        Ok(validator) => Some(validator),
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring invalid expected output schema");
            None
        }
    }
}
