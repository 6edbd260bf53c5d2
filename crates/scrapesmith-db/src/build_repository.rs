use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use scrapesmith_core::build::{Build, BuildStatus, CreateBuildRequest, UserFeedback};
use scrapesmith_core::error::{AppError, BuildError};
use scrapesmith_core::models::ExecutionResult;
use scrapesmith_core::package::ToolConfigurationPackage;
use scrapesmith_core::repository::BuildRepository;

const BUILD_COLUMNS: &str = "id, objective, target_urls, status, initial_package, final_package, \
     sample_results, results, error, user_feedback, created_at, updated_at";

/// PostgreSQL-backed build store. Packages, results, errors and feedback
/// live in JSONB columns; the status is stored by name.
#[derive(Clone)]
pub struct PgBuildRepository {
    pool: Pool<Postgres>,
}

impl PgBuildRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Overwrite one JSONB column. `column` is always a compile-time constant.
    async fn set_json<T: Serialize + Sync>(
        &self,
        id: Uuid,
        column: &'static str,
        value: &T,
    ) -> Result<(), AppError> {
        let value = serde_json::to_value(value)?;
        let sql = format!("UPDATE builds SET {column} = $2, updated_at = NOW() WHERE id = $1");

        let result = sqlx::query(&sql)
            .bind(id)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::BuildNotFound(id));
        }
        Ok(())
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct BuildRow {
    id: Uuid,
    objective: String,
    target_urls: Json<Vec<String>>,
    status: String,
    initial_package: Option<Json<ToolConfigurationPackage>>,
    final_package: Option<Json<ToolConfigurationPackage>>,
    sample_results: Option<Json<ExecutionResult>>,
    results: Option<Json<ExecutionResult>>,
    error: Option<Json<BuildError>>,
    user_feedback: Option<Json<UserFeedback>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<BuildRow> for Build {
    fn from(row: BuildRow) -> Self {
        Build {
            id: row.id,
            objective: row.objective,
            target_urls: row.target_urls.0,
            // The CHECK constraint keeps the column inside the known vocabulary.
            status: row.status.parse().unwrap_or(BuildStatus::Failed),
            initial_package: row.initial_package.map(|j| j.0),
            final_package: row.final_package.map(|j| j.0),
            sample_results: row.sample_results.map(|j| j.0),
            results: row.results.map(|j| j.0),
            error: row.error.map(|j| j.0),
            user_feedback: row.user_feedback.map(|j| j.0),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl BuildRepository for PgBuildRepository {
    async fn create_build(&self, request: CreateBuildRequest) -> Result<Build, AppError> {
        let build = request.into_build();

        let row = sqlx::query_as::<_, BuildRow>(&format!(
            r#"
            INSERT INTO builds (id, objective, target_urls, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING {BUILD_COLUMNS}
            "#
        ))
        .bind(build.id)
        .bind(&build.objective)
        .bind(Json(&build.target_urls))
        .bind(build.status.as_str())
        .bind(build.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.into())
    }

    async fn find_build_by_id(&self, id: Uuid) -> Result<Option<Build>, AppError> {
        let row = sqlx::query_as::<_, BuildRow>(&format!(
            "SELECT {BUILD_COLUMNS} FROM builds WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: BuildStatus,
        error: Option<&BuildError>,
    ) -> Result<(), AppError> {
        let error = error.map(serde_json::to_value).transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE builds
            SET status = $2, error = COALESCE($3, error), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::BuildNotFound(id));
        }
        tracing::debug!(build_id = %id, status = %status, "Build status updated");
        Ok(())
    }

    async fn update_initial_package(
        &self,
        id: Uuid,
        package: &ToolConfigurationPackage,
    ) -> Result<(), AppError> {
        self.set_json(id, "initial_package", package).await
    }

    async fn update_final_package(
        &self,
        id: Uuid,
        package: &ToolConfigurationPackage,
    ) -> Result<(), AppError> {
        self.set_json(id, "final_package", package).await
    }

    async fn update_sample_results(
        &self,
        id: Uuid,
        results: &ExecutionResult,
    ) -> Result<(), AppError> {
        self.set_json(id, "sample_results", results).await
    }

    async fn update_results(&self, id: Uuid, results: &ExecutionResult) -> Result<(), AppError> {
        self.set_json(id, "results", results).await
    }

    async fn update_error(&self, id: Uuid, error: &BuildError) -> Result<(), AppError> {
        self.set_json(id, "error", error).await
    }

    async fn update_user_feedback(
        &self,
        id: Uuid,
        feedback: &UserFeedback,
    ) -> Result<(), AppError> {
        self.set_json(id, "user_feedback", feedback).await
    }

    async fn list_builds(
        &self,
        status: Option<BuildStatus>,
        limit: usize,
    ) -> Result<Vec<Build>, AppError> {
        let rows = sqlx::query_as::<_, BuildRow>(&format!(
            r#"
            SELECT {BUILD_COLUMNS}
            FROM builds
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
