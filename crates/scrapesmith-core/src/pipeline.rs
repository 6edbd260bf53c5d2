//! Drives builds through the automatic stages of their lifecycle.
//!
//! Processors never call each other. After every stage the driver re-reads
//! the build's status and looks up the next automatic stage; it stops when
//! the build reaches a state that needs user input or a terminal state.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::build::{Build, BuildStatus, CreateBuildRequest, UserFeedback};
use crate::engine::ExecutionEngine;
use crate::error::AppError;
use crate::processors::{
    AnalysisProcessor, ExecutionProcessor, RefinementProcessor, SampleGenerationProcessor,
};
use crate::repository::BuildRepository;
use crate::traits::Analyzer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Analysis,
    SampleGeneration,
    Refinement,
    Execution,
}

impl Stage {
    /// The stage that runs automatically when a build is in `status`.
    ///
    /// Refinement is never automatic: it needs the user's feedback.
    pub fn for_status(status: BuildStatus) -> Option<Stage> {
        match status {
            BuildStatus::PendingAnalysis => Some(Stage::Analysis),
            BuildStatus::GeneratingSamples => Some(Stage::SampleGeneration),
            BuildStatus::Confirmed => Some(Stage::Execution),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Analysis => "analysis",
            Stage::SampleGeneration => "sample_generation",
            Stage::Refinement => "refinement",
            Stage::Execution => "execution",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events emitted by the pipeline for monitoring/logging.
#[derive(Debug, Clone)]
pub enum PipelineEvent<'a> {
    BuildCreated {
        build: &'a Build,
    },
    StageStarted {
        build_id: Uuid,
        stage: Stage,
    },
    StageFinished {
        build_id: Uuid,
        stage: Stage,
        success: bool,
    },
    AwaitingInput {
        build_id: Uuid,
        status: BuildStatus,
    },
    BuildFinished {
        build_id: Uuid,
        status: BuildStatus,
    },
    Rejected {
        build_id: Uuid,
        action: &'a str,
        reason: &'a str,
    },
}

/// Trait for receiving pipeline events (decoupled logging).
pub trait PipelineReporter: Send + Sync {
    fn report(&self, event: PipelineEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPipelineReporter;

impl PipelineReporter for TracingPipelineReporter {
    fn report(&self, event: PipelineEvent<'_>) {
        match event {
            PipelineEvent::BuildCreated { build } => {
                tracing::info!(
                    build_id = %build.id,
                    targets = build.target_urls.len(),
                    "Build created"
                );
            }
            PipelineEvent::StageStarted { build_id, stage } => {
                tracing::info!(%build_id, %stage, "Stage started");
            }
            PipelineEvent::StageFinished {
                build_id,
                stage,
                success,
            } => {
                if success {
                    tracing::info!(%build_id, %stage, "Stage finished");
                } else {
                    tracing::warn!(%build_id, %stage, "Stage failed");
                }
            }
            PipelineEvent::AwaitingInput { build_id, status } => {
                tracing::info!(%build_id, %status, "Waiting for user input");
            }
            PipelineEvent::BuildFinished { build_id, status } => {
                tracing::info!(%build_id, %status, "Build finished");
            }
            PipelineEvent::Rejected {
                build_id,
                action,
                reason,
            } => {
                tracing::warn!(%build_id, action, reason, "Request rejected");
            }
        }
    }
}

/// Owns one processor per stage and chains them by status.
pub struct BuildPipeline<R, A>
where
    R: BuildRepository,
    A: Analyzer,
{
    repo: R,
    analysis: AnalysisProcessor<R, A>,
    samples: SampleGenerationProcessor<R>,
    refinement: RefinementProcessor<R, A>,
    execution: ExecutionProcessor<R>,
    reporter: Arc<dyn PipelineReporter>,
}

impl<R, A> BuildPipeline<R, A>
where
    R: BuildRepository,
    A: Analyzer,
{
    pub fn new(repo: R, analyzer: A, engine: ExecutionEngine) -> Self {
        Self {
            analysis: AnalysisProcessor::new(repo.clone(), analyzer.clone()),
            samples: SampleGenerationProcessor::new(repo.clone(), engine.clone()),
            refinement: RefinementProcessor::new(repo.clone(), analyzer),
            execution: ExecutionProcessor::new(repo.clone(), engine),
            repo,
            reporter: Arc::new(TracingPipelineReporter),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn PipelineReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Create a build and run it until it needs input or finishes.
    pub async fn start(&self, request: CreateBuildRequest) -> Result<Build, AppError> {
        let build = self.repo.create_build(request).await?;
        self.reporter
            .report(PipelineEvent::BuildCreated { build: &build });

        self.advance(build.id).await;

        self.repo
            .find_build_by_id(build.id)
            .await?
            .ok_or(AppError::BuildNotFound(build.id))
    }

    /// Run automatic stages until none applies.
    ///
    /// Returns `false` if a stage failed or the build could not be loaded.
    pub async fn advance(&self, build_id: Uuid) -> bool {
        loop {
            let status = match self.current_status(build_id).await {
                Some(status) => status,
                None => return false,
            };

            let success = match Stage::for_status(status) {
                Some(stage @ Stage::Analysis) => {
                    self.run_stage(build_id, stage, self.analysis.process(build_id))
                        .await
                }
                Some(stage @ Stage::SampleGeneration) => {
                    self.run_stage(build_id, stage, self.samples.process(build_id))
                        .await
                }
                Some(stage @ Stage::Execution) => {
                    self.run_stage(build_id, stage, self.execution.process(build_id))
                        .await
                }
                _ => {
                    if status.is_terminal() {
                        self.reporter
                            .report(PipelineEvent::BuildFinished { build_id, status });
                    } else {
                        self.reporter
                            .report(PipelineEvent::AwaitingInput { build_id, status });
                    }
                    return true;
                }
            };
            if !success {
                if let Some(status) = self.current_status(build_id).await {
                    self.reporter
                        .report(PipelineEvent::BuildFinished { build_id, status });
                }
                return false;
            }

            if self.current_status(build_id).await == Some(status) {
                tracing::error!(%build_id, %status, "Stage left status unchanged, stopping");
                return false;
            }
        }
    }

    /// Apply feedback through the refinement stage, then continue.
    pub async fn submit_feedback(&self, build_id: Uuid, feedback: &UserFeedback) -> bool {
        let success = self
            .run_stage(
                build_id,
                Stage::Refinement,
                self.refinement.process(build_id, feedback),
            )
            .await;
        if !success {
            return false;
        }
        self.advance(build_id).await
    }

    /// Approve the final package and run the full extraction.
    pub async fn confirm(&self, build_id: Uuid) -> bool {
        if !transition(
            &self.repo,
            self.reporter.as_ref(),
            build_id,
            BuildStatus::Confirmed,
            "confirm",
        )
        .await
        {
            return false;
        }
        self.advance(build_id).await
    }

    pub async fn cancel(&self, build_id: Uuid) -> bool {
        cancel_build(&self.repo, self.reporter.as_ref(), build_id).await
    }

    async fn run_stage(
        &self,
        build_id: Uuid,
        stage: Stage,
        work: impl Future<Output = bool>,
    ) -> bool {
        self.reporter
            .report(PipelineEvent::StageStarted { build_id, stage });
        let success = work.await;
        self.reporter.report(PipelineEvent::StageFinished {
            build_id,
            stage,
            success,
        });
        success
    }

    async fn current_status(&self, build_id: Uuid) -> Option<BuildStatus> {
        current_status(&self.repo, build_id).await
    }
}

/// Cancel a build with only a repository at hand.
///
/// Same checks and events as [`BuildPipeline::cancel`]; no analyzer or
/// engine is needed.
pub async fn cancel_build<R: BuildRepository>(
    repo: &R,
    reporter: &dyn PipelineReporter,
    build_id: Uuid,
) -> bool {
    if !transition(repo, reporter, build_id, BuildStatus::Cancelled, "cancel").await {
        return false;
    }
    reporter.report(PipelineEvent::BuildFinished {
        build_id,
        status: BuildStatus::Cancelled,
    });
    true
}

/// Direct status change requested by the user (confirm, cancel).
async fn transition<R: BuildRepository>(
    repo: &R,
    reporter: &dyn PipelineReporter,
    build_id: Uuid,
    next: BuildStatus,
    action: &str,
) -> bool {
    let Some(current) = current_status(repo, build_id).await else {
        reporter.report(PipelineEvent::Rejected {
            build_id,
            action,
            reason: "build not found",
        });
        return false;
    };

    if !current.can_transition_to(next) {
        let reason = format!("cannot {action} a build in {current}");
        reporter.report(PipelineEvent::Rejected {
            build_id,
            action,
            reason: &reason,
        });
        return false;
    }

    match repo.update_status(build_id, next, None).await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(%build_id, status = %next, error = %e, "Failed to update build status");
            false
        }
    }
}

async fn current_status<R: BuildRepository>(repo: &R, build_id: Uuid) -> Option<BuildStatus> {
    match repo.find_build_by_id(build_id).await {
        Ok(Some(build)) => Some(build.status),
        Ok(None) => {
            tracing::warn!(%build_id, "Build not found");
            None
        }
        Err(e) => {
            tracing::error!(%build_id, error = %e, "Failed to load build");
            None
        }
    }
}
