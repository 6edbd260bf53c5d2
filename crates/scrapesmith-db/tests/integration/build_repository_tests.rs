use scrapesmith_core::build::{BuildStatus, CreateBuildRequest, FeedbackKind, UserFeedback};
use scrapesmith_core::error::{AppError, BuildError, ErrorCategory, ErrorSeverity};
use scrapesmith_core::models::{ExecutionResult, ExecutionStatus, TargetMetadata, TargetResult};
use scrapesmith_core::package::{ToolConfig, ToolConfigurationPackage, ToolKind};
use scrapesmith_core::repository::BuildRepository;
use scrapesmith_db::{Database, PgBuildRepository};
use uuid::Uuid;

use crate::integration::common::setup_test_db;

fn package() -> ToolConfigurationPackage {
    ToolConfigurationPackage::new(ToolConfig::scraper("static_html").with_selector("title", "h1"))
        .with_auxiliary(ToolConfig::new("captcha_detector", ToolKind::Captcha))
}

#[tokio::test]
async fn create_and_find_build() {
    let (pool, _container) = setup_test_db().await;
    let repo = PgBuildRepository::new(pool);

    let created = repo
        .create_build(CreateBuildRequest::new(
            "Collect article titles",
            ["https://a.example.com", "https://b.example.com"],
        ))
        .await
        .unwrap();
    assert_eq!(created.status, BuildStatus::PendingAnalysis);

    let found = repo
        .find_build_by_id(created.id)
        .await
        .unwrap()
        .expect("Should find the build");
    assert_eq!(found.objective, "Collect article titles");
    assert_eq!(
        found.target_urls,
        vec!["https://a.example.com", "https://b.example.com"]
    );
    assert!(found.initial_package.is_none());
    assert!(found.error.is_none());

    assert!(repo.find_build_by_id(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn json_columns_roundtrip() {
    let (pool, _container) = setup_test_db().await;
    let repo = PgBuildRepository::new(pool);
    let build = repo
        .create_build(CreateBuildRequest::new("titles", ["https://a.example.com"]))
        .await
        .unwrap();

    let samples = ExecutionResult::from_results(vec![
        TargetResult::succeeded(
            "https://a.example.com",
            serde_json::json!({"title": "Hello"}),
            TargetMetadata::default(),
        ),
        TargetResult::failed(
            "https://b.example.com",
            "Tool error: 503",
            TargetMetadata::default(),
        ),
    ]);
    let feedback = UserFeedback::new(FeedbackKind::Samples, "Also grab the author");

    repo.update_initial_package(build.id, &package()).await.unwrap();
    repo.update_final_package(build.id, &package()).await.unwrap();
    repo.update_sample_results(build.id, &samples).await.unwrap();
    repo.update_results(build.id, &samples).await.unwrap();
    repo.update_user_feedback(build.id, &feedback).await.unwrap();

    let found = repo.find_build_by_id(build.id).await.unwrap().unwrap();
    assert_eq!(found.initial_package, Some(package()));
    assert_eq!(found.active_package(), Some(&package()));
    let stored = found.sample_results.unwrap();
    assert_eq!(stored.overall_status, ExecutionStatus::PartialSuccess);
    assert_eq!(stored.results[0].data, Some(serde_json::json!({"title": "Hello"})));
    assert_eq!(found.user_feedback.unwrap().kind, FeedbackKind::Samples);
    assert!(found.updated_at >= found.created_at);
}

#[tokio::test]
async fn update_status_stores_error() {
    let (pool, _container) = setup_test_db().await;
    let repo = PgBuildRepository::new(pool);
    let build = repo
        .create_build(CreateBuildRequest::new("titles", ["https://a.example.com"]))
        .await
        .unwrap();

    let error = BuildError::new("LLM unavailable", ErrorCategory::Analysis, ErrorSeverity::Error)
        .with_context(build.id, "analyze_objective")
        .with_details(serde_json::json!({"failureReason": "llm_error"}));
    repo.update_status(build.id, BuildStatus::AnalysisFailed, Some(&error))
        .await
        .unwrap();

    // A later status-only write keeps the stored error.
    repo.update_status(build.id, BuildStatus::AnalysisFailed, None)
        .await
        .unwrap();

    let found = repo.find_build_by_id(build.id).await.unwrap().unwrap();
    assert_eq!(found.status, BuildStatus::AnalysisFailed);
    let stored = found.error.unwrap();
    assert_eq!(stored.message, "LLM unavailable");
    assert_eq!(stored.context.build_id, Some(build.id));
    assert_eq!(stored.context.details["failureReason"], "llm_error");
}

#[tokio::test]
async fn updates_on_unknown_build_are_not_found() {
    let (pool, _container) = setup_test_db().await;
    let repo = PgBuildRepository::new(pool);
    let missing = Uuid::new_v4();

    let err = repo
        .update_status(missing, BuildStatus::Failed, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BuildNotFound(id) if id == missing));

    let err = repo
        .update_initial_package(missing, &package())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BuildNotFound(_)));
}

#[tokio::test]
async fn list_builds_filters_by_status_newest_first() {
    let (pool, _container) = setup_test_db().await;
    let repo = PgBuildRepository::new(pool);

    let first = repo
        .create_build(CreateBuildRequest::new("one", ["https://a.example.com"]))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let second = repo
        .create_build(CreateBuildRequest::new("two", ["https://b.example.com"]))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let third = repo
        .create_build(CreateBuildRequest::new("three", ["https://c.example.com"]))
        .await
        .unwrap();
    repo.update_status(second.id, BuildStatus::Cancelled, None)
        .await
        .unwrap();

    let all = repo.list_builds(None, 10).await.unwrap();
    let ids: Vec<Uuid> = all.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![third.id, second.id, first.id]);

    let pending = repo
        .list_builds(Some(BuildStatus::PendingAnalysis), 10)
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|b| b.status == BuildStatus::PendingAnalysis));

    let limited = repo.list_builds(None, 1).await.unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].id, third.id);
}

#[tokio::test]
async fn database_facade_vends_repositories() {
    let (pool, _container) = setup_test_db().await;
    let db = Database::from_pool(pool);
    db.health_check().await.unwrap();

    let repo = db.build_repo();
    let build = repo
        .create_build(CreateBuildRequest::new("titles", ["https://a.example.com"]))
        .await
        .unwrap();
    assert!(repo.find_build_by_id(build.id).await.unwrap().is_some());
}
