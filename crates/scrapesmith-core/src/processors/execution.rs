use uuid::Uuid;

use super::{StageFailure, ensure_transition, load_build, record_failure, set_status};
use crate::build::BuildStatus;
use crate::engine::ExecutionEngine;
use crate::error::{BuildError, ErrorCategory, ErrorSeverity};
use crate::models::ExecutionStatus;
use crate::repository::BuildRepository;

/// Runs the confirmed package against every target of the build.
pub struct ExecutionProcessor<R>
where
    R: BuildRepository,
{
    repo: R,
    engine: ExecutionEngine,
}

impl<R> ExecutionProcessor<R>
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
                record_failure(&self.repo, build_id, "execute_build", failure).await;
                false
            }
        }
    }

    async fn run(&self, build_id: Uuid) -> Result<(), StageFailure> {
        let build = load_build(&self.repo, build_id).await?;
        ensure_transition(&build, BuildStatus::ScrapingInProgress)?;

        let Some(package) = build.active_package() else {
            return Err(StageFailure::domain(
                "No tool configuration package to execute",
                ErrorCategory::Execution,
                BuildStatus::Failed,
            ));
        };

        set_status(
            &self.repo,
            build_id,
            BuildStatus::ScrapingInProgress,
            BuildStatus::Failed,
        )
        .await?;

        tracing::info!(
            %build_id,
            targets = build.target_urls.len(),
            tool = %package.primary_tool.tool_id,
            "Executing build"
        );

        let results = self.engine.execute_package(package, &build.target_urls).await;

        self.repo
            .update_results(build_id, &results)
            .await
            .map_err(|e| StageFailure::unexpected(e, BuildStatus::Failed))?;

        match results.overall_status {
            ExecutionStatus::Completed => {
                set_status(&self.repo, build_id, BuildStatus::Completed, BuildStatus::Failed)
                    .await?;
            }
            ExecutionStatus::PartialSuccess => {
                let warning = BuildError::new(
                    format!(
                        "{} of {} targets failed",
                        results.failure_count(),
                        results.results.len()
                    ),
                    ErrorCategory::Execution,
                    ErrorSeverity::Warning,
                )
                .with_context(build_id, "execute_build")
                .with_details(serde_json::json!({
                    "failedUrls": results
                        .results
                        .iter()
                        .filter(|r| !r.success)
                        .map(|r| r.url.as_str())
                        .collect::<Vec<_>>(),
                }));
                self.repo
                    .update_status(build_id, BuildStatus::PartialSuccess, Some(&warning))
                    .await
                    .map_err(|e| StageFailure::unexpected(e, BuildStatus::Failed))?;
            }
            ExecutionStatus::Failed => {
                let reason = results
                    .error
                    .clone()
                    .unwrap_or_else(|| "no target succeeded".to_string());
                return Err(StageFailure::domain(
                    format!("Execution failed: {reason}"),
                    ErrorCategory::Execution,
                    BuildStatus::Failed,
                ));
            }
        }

        tracing::info!(
            %build_id,
            status = %results.overall_status,
            succeeded = results.success_count(),
            failed = results.failure_count(),
            "Build executed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::CreateBuildRequest;
    use crate::error::AppError;
    use crate::memory::InMemoryBuildRepository;
    use crate::package::{ToolConfig, ToolConfigurationPackage};
    use crate::testutil::*;

    async fn confirmed_build(repo: &InMemoryBuildRepository, targets: &[&str]) -> Uuid {
        let build = repo
            .create_build(CreateBuildRequest::new(
                "extract titles",
                targets.iter().map(|t| t.to_string()),
            ))
            .await
            .unwrap();
        repo.update_initial_package(build.id, &test_package("mock"))
            .await
            .unwrap();
        repo.update_status(build.id, BuildStatus::Confirmed, None)
            .await
            .unwrap();
        build.id
    }

    #[tokio::test]
    async fn all_targets_succeed_completes_build() {
        let repo = InMemoryBuildRepository::new();
        let tool = MockTool::succeeding(serde_json::json!({"title": "ok"}));
        let id = confirmed_build(&repo, &["https://a.test", "https://b.test"]).await;

        let ok = ExecutionProcessor::new(repo.clone(), test_engine(tool))
            .process(id)
            .await;

        assert!(ok);
        let build = repo.find_build_by_id(id).await.unwrap().unwrap();
        assert_eq!(build.status, BuildStatus::Completed);
        assert_eq!(build.results.unwrap().results.len(), 2);
        assert!(build.error.is_none());
    }

    #[tokio::test]
    async fn partial_run_is_partial_success_with_warning() {
        let repo = InMemoryBuildRepository::new();
        let tool = MockTool::succeeding(serde_json::json!({}))
            .failing_for("https://bad.test", AppError::ToolError("404".into()));
        let id = confirmed_build(&repo, &["https://a.test", "https://bad.test", "https://c.test"]).await;

        let ok = ExecutionProcessor::new(repo.clone(), test_engine(tool))
            .process(id)
            .await;

        assert!(ok);
        let build = repo.find_build_by_id(id).await.unwrap().unwrap();
        assert_eq!(build.status, BuildStatus::PartialSuccess);
        let warning = build.error.unwrap();
        assert_eq!(warning.severity, ErrorSeverity::Warning);
        assert_eq!(warning.context.details["failedUrls"][0], "https://bad.test");
    }

    #[tokio::test]
    async fn nothing_succeeds_fails_build() {
        let repo = InMemoryBuildRepository::new();
        let tool = MockTool::failing(AppError::ToolError("blocked".into()));
        let id = confirmed_build(&repo, &["https://a.test"]).await;

        let ok = ExecutionProcessor::new(repo.clone(), test_engine(tool))
            .process(id)
            .await;

        assert!(!ok);
        let build = repo.find_build_by_id(id).await.unwrap().unwrap();
        assert_eq!(build.status, BuildStatus::Failed);
        assert_eq!(build.error.unwrap().category, ErrorCategory::Execution);
        assert!(build.results.is_some());
    }

    #[tokio::test]
    async fn prefers_final_package() {
        let repo = InMemoryBuildRepository::new();
        let tool = MockTool::succeeding(serde_json::json!({}));
        let id = confirmed_build(&repo, &["https://a.test"]).await;
        let final_package =
            ToolConfigurationPackage::new(ToolConfig::scraper("mock").with_selector("title", "h2"));
        repo.update_final_package(id, &final_package).await.unwrap();

        ExecutionProcessor::new(repo.clone(), test_engine(tool.clone()))
            .process(id)
            .await;

        assert_eq!(tool.last_package().unwrap(), final_package);
    }

    #[tokio::test]
    async fn unconfirmed_build_is_rejected() {
        let repo = InMemoryBuildRepository::new();
        let tool = MockTool::succeeding(serde_json::json!({}));
        let build = repo
            .create_build(CreateBuildRequest::new("x", ["https://a.test"]))
            .await
            .unwrap();
        repo.update_status(build.id, BuildStatus::ReadyForScraping, None)
            .await
            .unwrap();

        let ok = ExecutionProcessor::new(repo.clone(), test_engine(tool.clone()))
            .process(build.id)
            .await;

        assert!(!ok);
        let found = repo.find_build_by_id(build.id).await.unwrap().unwrap();
        assert_eq!(found.status, BuildStatus::ReadyForScraping);
        assert!(tool.executed_targets().is_empty());
    }
}
