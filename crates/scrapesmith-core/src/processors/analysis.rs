use uuid::Uuid;

use super::{StageFailure, ensure_transition, load_build, record_failure, set_status};
use crate::build::BuildStatus;
use crate::error::ErrorCategory;
use crate::repository::BuildRepository;
use crate::traits::{AnalysisOutcome, Analyzer};

pub const NO_TARGETS_MESSAGE: &str = "No target URLs provided";

/// Turns the build's objective into its initial tool configuration package.
pub struct AnalysisProcessor<R, A>
where
    R: BuildRepository,
    A: Analyzer,
{
    repo: R,
    analyzer: A,
}

impl<R, A> AnalysisProcessor<R, A>
where
    R: BuildRepository,
    A: Analyzer,
{
    pub fn new(repo: R, analyzer: A) -> Self {
        Self { repo, analyzer }
    }

    /// Analyze the build's objective and targets.
    ///
    /// On success the package is stored as the initial package and the build
    /// moves to `GENERATING_SAMPLES`.
    pub async fn process(&self, build_id: Uuid) -> bool {
        match self.run(build_id).await {
            Ok(()) => true,
            Err(failure) => {
                record_failure(&self.repo, build_id, "analyze_objective", failure).await;
                false
            }
        }
    }

    async fn run(&self, build_id: Uuid) -> Result<(), StageFailure> {
        let build = load_build(&self.repo, build_id).await?;
        ensure_transition(&build, BuildStatus::GeneratingSamples)?;

        if build.target_urls.is_empty() {
            return Err(StageFailure::domain(
                NO_TARGETS_MESSAGE,
                ErrorCategory::Validation,
                BuildStatus::Failed,
            ));
        }

        tracing::info!(
            %build_id,
            targets = build.target_urls.len(),
            "Analyzing objective"
        );

        match self
            .analyzer
            .analyze(&build.objective, &build.target_urls)
            .await
        {
            AnalysisOutcome::Package(package) => {
                self.repo
                    .update_initial_package(build_id, &package)
                    .await
                    .map_err(|e| StageFailure::unexpected(e, BuildStatus::Failed))?;
                set_status(
                    &self.repo,
                    build_id,
                    BuildStatus::GeneratingSamples,
                    BuildStatus::Failed,
                )
                .await?;

                tracing::info!(
                    %build_id,
                    tool = %package.primary_tool.tool_id,
                    auxiliary = package.auxiliary_tools.len(),
                    "Analysis produced a package"
                );
                Ok(())
            }
            AnalysisOutcome::Failed { error, reason } => Err(StageFailure::domain(
                format!("Analysis failed: {error}"),
                ErrorCategory::Analysis,
                BuildStatus::AnalysisFailed,
            )
            .with_details(serde_json::json!({ "failureReason": reason.as_str() }))),
        }
    }
}
