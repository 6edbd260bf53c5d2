//! Stage processors: one per phase of the build lifecycle.
//!
//! Each processor is the sole writer of its stage's transitions. Failures
//! never escape `process`: they are turned into a [`BuildError`], persisted,
//! the build is moved to the stage's failure status, and `false` is returned.

pub mod analysis;
pub mod execution;
pub mod refinement;
pub mod samples;

pub use analysis::AnalysisProcessor;
pub use execution::ExecutionProcessor;
pub use refinement::RefinementProcessor;
pub use samples::SampleGenerationProcessor;

use uuid::Uuid;

use crate::build::{Build, BuildStatus};
use crate::error::{AppError, BuildError, ErrorCategory, ErrorSeverity};
use crate::repository::BuildRepository;

/// A stage failure that has not been persisted yet.
#[derive(Debug)]
pub(crate) struct StageFailure {
    error: BuildError,
    /// Status to move the build to. `None` leaves the build untouched,
    /// e.g. when the stage was invoked in the wrong state.
    status: Option<BuildStatus>,
}

impl StageFailure {
    /// Expected, domain-level failure (collaborator said no, nothing succeeded).
    pub(crate) fn domain(
        message: impl Into<String>,
        category: ErrorCategory,
        status: BuildStatus,
    ) -> Self {
        Self {
            error: BuildError::new(message, category, ErrorSeverity::Error),
            status: Some(status),
        }
    }

    /// Infrastructure error while the stage was running.
    pub(crate) fn unexpected(error: AppError, status: BuildStatus) -> Self {
        Self {
            error: BuildError::from_app_error(&error, ErrorSeverity::Critical),
            status: Some(status),
        }
    }

    /// The stage refused to run; the build keeps its current state.
    pub(crate) fn rejected(error: AppError) -> Self {
        Self {
            error: BuildError::from_app_error(&error, ErrorSeverity::Warning),
            status: None,
        }
    }

    pub(crate) fn with_details(mut self, details: serde_json::Value) -> Self {
        self.error = self.error.with_details(details);
        self
    }
}

pub(crate) async fn load_build<R: BuildRepository>(
    repo: &R,
    build_id: Uuid,
) -> Result<Build, StageFailure> {
    match repo.find_build_by_id(build_id).await {
        Ok(Some(build)) => Ok(build),
        Ok(None) => Err(StageFailure::rejected(AppError::BuildNotFound(build_id))),
        Err(e) => Err(StageFailure::rejected(e)),
    }
}

/// Refuse to run unless the lifecycle allows `build` to reach `next`.
pub(crate) fn ensure_transition(build: &Build, next: BuildStatus) -> Result<(), StageFailure> {
    if build.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(StageFailure::rejected(AppError::InvalidTransition {
            from: build.status.to_string(),
            to: next.to_string(),
        }))
    }
}

/// Persist a status change, mapping repository errors onto `on_error`.
pub(crate) async fn set_status<R: BuildRepository>(
    repo: &R,
    build_id: Uuid,
    status: BuildStatus,
    on_error: BuildStatus,
) -> Result<(), StageFailure> {
    repo.update_status(build_id, status, None)
        .await
        .map_err(|e| StageFailure::unexpected(e, on_error))
}

/// Persist the failure record and move the build to its failure status.
pub(crate) async fn record_failure<R: BuildRepository>(
    repo: &R,
    build_id: Uuid,
    operation: &str,
    failure: StageFailure,
) {
    let error = failure.error.with_context(build_id, operation);

    let Some(status) = failure.status else {
        tracing::warn!(%build_id, operation, error = %error.message, "Stage rejected");
        return;
    };

    tracing::error!(
        %build_id,
        operation,
        category = ?error.category,
        error = %error.message,
        "Stage failed"
    );

    if let Err(e) = repo.update_error(build_id, &error).await {
        tracing::error!(%build_id, error = %e, "Failed to persist build error");
    }
    if let Err(e) = repo.update_status(build_id, status, None).await {
        tracing::error!(%build_id, %status, error = %e, "Failed to mark build as failed");
    }
}
