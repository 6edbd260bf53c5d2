use uuid::Uuid;

use super::{StageFailure, ensure_transition, load_build, record_failure, set_status};
use crate::build::{BuildStatus, FeedbackKind, UserFeedback};
use crate::error::ErrorCategory;
use crate::repository::BuildRepository;
use crate::traits::{AnalysisOutcome, Analyzer};

/// Applies user feedback by asking the analyzer for a revised package.
///
/// `approach` feedback sends the build back through sampling with the new
/// package; `samples` feedback stores it as the final package and readies
/// the build for the full run.
pub struct RefinementProcessor<R, A>
where
    R: BuildRepository,
    A: Analyzer,
{
    repo: R,
    analyzer: A,
}

impl<R, A> RefinementProcessor<R, A>
where
    R: BuildRepository,
    A: Analyzer,
{
    pub fn new(repo: R, analyzer: A) -> Self {
        Self { repo, analyzer }
    }

    pub async fn process(&self, build_id: Uuid, feedback: &UserFeedback) -> bool {
        match self.run(build_id, feedback).await {
            Ok(()) => true,
            Err(failure) => {
                record_failure(&self.repo, build_id, "process_feedback", failure).await;
                false
            }
        }
    }

    async fn run(&self, build_id: Uuid, feedback: &UserFeedback) -> Result<(), StageFailure> {
        let build = load_build(&self.repo, build_id).await?;
        ensure_transition(&build, BuildStatus::ProcessingFeedback)?;

        self.repo
            .update_user_feedback(build_id, feedback)
            .await
            .map_err(|e| StageFailure::unexpected(e, BuildStatus::Failed))?;
        set_status(
            &self.repo,
            build_id,
            BuildStatus::ProcessingFeedback,
            BuildStatus::Failed,
        )
        .await?;

        let Some(prior) = build.active_package() else {
            return Err(StageFailure::domain(
                "No tool configuration package to refine",
                ErrorCategory::Refinement,
                BuildStatus::Failed,
            ));
        };

        tracing::info!(%build_id, kind = ?feedback.kind, "Refining package from feedback");

        let revised = match self
            .analyzer
            .refine(
                &build.objective,
                prior,
                build.sample_results.as_ref(),
                feedback,
            )
            .await
        {
            AnalysisOutcome::Package(package) => package,
            AnalysisOutcome::Failed { error, reason } => {
                return Err(StageFailure::domain(
                    format!("Refinement failed: {error}"),
                    ErrorCategory::Refinement,
                    BuildStatus::Failed,
                )
                .with_details(serde_json::json!({ "failureReason": reason.as_str() })));
            }
        };

        let next = match feedback.kind {
            FeedbackKind::Approach => {
                self.repo
                    .update_initial_package(build_id, &revised)
                    .await
                    .map_err(|e| StageFailure::unexpected(e, BuildStatus::Failed))?;
                // Keep the active package in step with the new approach.
                if build.final_package.is_some() {
                    self.repo
                        .update_final_package(build_id, &revised)
                        .await
                        .map_err(|e| StageFailure::unexpected(e, BuildStatus::Failed))?;
                }
                BuildStatus::GeneratingSamples
            }
            FeedbackKind::Samples => {
                self.repo
                    .update_final_package(build_id, &revised)
                    .await
                    .map_err(|e| StageFailure::unexpected(e, BuildStatus::Failed))?;
                BuildStatus::ReadyForScraping
            }
        };

        set_status(&self.repo, build_id, next, BuildStatus::Failed).await?;
        tracing::info!(%build_id, status = %next, "Feedback applied");
        Ok(())
    }
}
