use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use uuid::Uuid;

use crate::build::{Build, BuildStatus, CreateBuildRequest, UserFeedback};
use crate::error::{AppError, BuildError};
use crate::models::ExecutionResult;
use crate::package::ToolConfigurationPackage;
use crate::repository::BuildRepository;

/// Process-local [`BuildRepository`] for CLI runs and tests.
#[derive(Clone, Default)]
pub struct InMemoryBuildRepository {
    builds: Arc<Mutex<HashMap<Uuid, Build>>>,
}

impl InMemoryBuildRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Build>> {
        self.builds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn modify(&self, id: Uuid, f: impl FnOnce(&mut Build)) -> Result<(), AppError> {
        let mut builds = self.lock();
        let build = builds.get_mut(&id).ok_or(AppError::BuildNotFound(id))?;
        f(build);
        build.updated_at = Utc::now();
        Ok(())
    }
}

impl BuildRepository for InMemoryBuildRepository {
    async fn create_build(&self, request: CreateBuildRequest) -> Result<Build, AppError> {
        let build = request.into_build();
        self.lock().insert(build.id, build.clone());
        Ok(build)
    }

    async fn find_build_by_id(&self, id: Uuid) -> Result<Option<Build>, AppError> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: BuildStatus,
        error: Option<&BuildError>,
    ) -> Result<(), AppError> {
        self.modify(id, |b| {
            b.status = status;
            if let Some(error) = error {
                b.error = Some(error.clone());
            }
        })
    }

    async fn update_initial_package(
        &self,
        id: Uuid,
        package: &ToolConfigurationPackage,
    ) -> Result<(), AppError> {
        self.modify(id, |b| b.initial_package = Some(package.clone()))
    }

    async fn update_final_package(
        &self,
        id: Uuid,
        package: &ToolConfigurationPackage,
    ) -> Result<(), AppError> {
        self.modify(id, |b| b.final_package = Some(package.clone()))
    }

    async fn update_sample_results(
        &self,
        id: Uuid,
        results: &ExecutionResult,
    ) -> Result<(), AppError> {
        self.modify(id, |b| b.sample_results = Some(results.clone()))
    }

    async fn update_results(&self, id: Uuid, results: &ExecutionResult) -> Result<(), AppError> {
        self.modify(id, |b| b.results = Some(results.clone()))
    }

    async fn update_error(&self, id: Uuid, error: &BuildError) -> Result<(), AppError> {
        self.modify(id, |b| b.error = Some(error.clone()))
    }

    async fn update_user_feedback(
        &self,
        id: Uuid,
        feedback: &UserFeedback,
    ) -> Result<(), AppError> {
        self.modify(id, |b| b.user_feedback = Some(feedback.clone()))
    }

    async fn list_builds(
        &self,
        status: Option<BuildStatus>,
        limit: usize,
    ) -> Result<Vec<Build>, AppError> {
        let mut builds: Vec<Build> = self
            .lock()
            .values()
            .filter(|b| status.is_none_or(|s| b.status == s))
            .cloned()
            .collect();
        builds.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        builds.truncate(limit);
        Ok(builds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorCategory, ErrorSeverity};

    #[tokio::test]
    async fn create_and_find() {
        let repo = InMemoryBuildRepository::new();
        let build = repo
            .create_build(CreateBuildRequest::new("extract titles", ["https://a.test"]))
            .await
            .unwrap();

        let found = repo.find_build_by_id(build.id).await.unwrap().unwrap();
        assert_eq!(found.objective, "extract titles");
        assert_eq!(found.status, BuildStatus::PendingAnalysis);
        assert!(found.initial_package.is_none());
    }

    #[tokio::test]
    async fn update_status_with_error() {
        let repo = InMemoryBuildRepository::new();
        let build = repo
            .create_build(CreateBuildRequest::new("x", Vec::<String>::new()))
            .await
            .unwrap();
        let error = BuildError::new("boom", ErrorCategory::Validation, ErrorSeverity::Error);

        repo.update_status(build.id, BuildStatus::Failed, Some(&error))
            .await
            .unwrap();

        let found = repo.find_build_by_id(build.id).await.unwrap().unwrap();
        assert_eq!(found.status, BuildStatus::Failed);
        assert_eq!(found.error.unwrap().message, "boom");
        assert!(found.updated_at >= found.created_at);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let repo = InMemoryBuildRepository::new();
        let err = repo
            .update_status(Uuid::new_v4(), BuildStatus::Failed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BuildNotFound(_)));
        assert!(repo.find_build_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_filters_and_limits() {
        let repo = InMemoryBuildRepository::new();
        for i in 0..3 {
            repo.create_build(CreateBuildRequest::new(format!("b{i}"), ["https://a.test"]))
                .await
                .unwrap();
        }
        let failed = repo
            .create_build(CreateBuildRequest::new("failing", ["https://a.test"]))
            .await
            .unwrap();
        repo.update_status(failed.id, BuildStatus::Failed, None)
            .await
            .unwrap();

        assert_eq!(repo.list_builds(None, 10).await.unwrap().len(), 4);
        assert_eq!(repo.list_builds(None, 2).await.unwrap().len(), 2);
        let only_failed = repo
            .list_builds(Some(BuildStatus::Failed), 10)
            .await
            .unwrap();
        assert_eq!(only_failed.len(), 1);
        assert_eq!(only_failed[0].id, failed.id);
    }
}
