use std::future::Future;

use uuid::Uuid;

use crate::build::{Build, BuildStatus, CreateBuildRequest, UserFeedback};
use crate::error::{AppError, BuildError};
use crate::models::ExecutionResult;
use crate::package::ToolConfigurationPackage;

/// Persistence contract for builds.
///
/// Stage processors are the only writers. Every `update_*` call on an
/// unknown id fails with [`AppError::BuildNotFound`].
pub trait BuildRepository: Send + Sync + Clone {
    fn create_build(
        &self,
        request: CreateBuildRequest,
    ) -> impl Future<Output = Result<Build, AppError>> + Send;

    fn find_build_by_id(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Build>, AppError>> + Send;

    /// Set the status, optionally storing a structured error in the same write.
    fn update_status(
        &self,
        id: Uuid,
        status: BuildStatus,
        error: Option<&BuildError>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn update_initial_package(
        &self,
        id: Uuid,
        package: &ToolConfigurationPackage,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn update_final_package(
        &self,
        id: Uuid,
        package: &ToolConfigurationPackage,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn update_sample_results(
        &self,
        id: Uuid,
        results: &ExecutionResult,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn update_results(
        &self,
        id: Uuid,
        results: &ExecutionResult,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn update_error(
        &self,
        id: Uuid,
        error: &BuildError,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn update_user_feedback(
        &self,
        id: Uuid,
        feedback: &UserFeedback,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Most recently created first.
    fn list_builds(
        &self,
        status: Option<BuildStatus>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Build>, AppError>> + Send;
}
