use uuid::Uuid;

use super::{StageFailure, ensure_transition, load_build, record_failure, set_status};
use crate::build::BuildStatus;
use crate::engine::ExecutionEngine;
use crate::error::ErrorCategory;
use crate::models::ExecutionStatus;
use crate::repository::BuildRepository;

/// Runs the initial package on a handful of targets so the user can review
/// what it extracts before the full run.
pub struct SampleGenerationProcessor<R>
where
    R: BuildRepository,
{
    repo: R,
    engine: ExecutionEngine,
}

impl<R> SampleGenerationProcessor<R>
where
    R: BuildRepository,
{
    pub fn new(repo: R, engine: ExecutionEngine) -> Self {
        Self { repo, engine }
    }

    pub async fn process(&self, build_id: Uuid) -> bool {
        match self.run(build_id).await {
            Ok(()) => true,
            Err(failure) => {
                record_failure(&self.repo, build_id, "generate_samples", failure).await;
                false
            }
        }
    }

    async fn run(&self, build_id: Uuid) -> Result<(), StageFailure> {
        let build = load_build(&self.repo, build_id).await?;
        ensure_transition(&build, BuildStatus::PendingUserFeedback)?;

        let Some(package) = build.initial_package.as_ref() else {
            return Err(StageFailure::domain(
                "No tool configuration package to sample",
                ErrorCategory::SampleGeneration,
                BuildStatus::Failed,
            ));
        };

        let sample_size = self.engine.config().sample_size.max(1);
        let targets: Vec<String> = build.target_urls.iter().take(sample_size).cloned().collect();

        tracing::info!(%build_id, samples = targets.len(), "Generating samples");

        let samples = self.engine.execute_package(package, &targets).await;

        self.repo
            .update_sample_results(build_id, &samples)
            .await
            .map_err(|e| StageFailure::unexpected(e, BuildStatus::Failed))?;

        if samples.overall_status == ExecutionStatus::Failed {
            let reason = samples
                .error
                .clone()
                .or_else(|| samples.results.iter().find_map(|r| r.error.clone()))
                .unwrap_or_else(|| "no sample succeeded".to_string());
            return Err(StageFailure::domain(
                format!("Sample generation failed: {reason}"),
                ErrorCategory::SampleGeneration,
                BuildStatus::Failed,
            )
            .with_details(serde_json::json!({
                "succeeded": samples.success_count(),
                "failed": samples.failure_count(),
            })));
        }

        set_status(
            &self.repo,
            build_id,
            BuildStatus::PendingUserFeedback,
            BuildStatus::Failed,
        )
        .await?;

        tracing::info!(
            %build_id,
            status = %samples.overall_status,
            succeeded = samples.success_count(),
            "Samples ready for review"
        );
        Ok(())
    }
}
