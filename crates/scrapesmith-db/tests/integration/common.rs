use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

/// Schema from `migrations/001_builds.sql`, executed one statement at a time.
const MIGRATIONS: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS builds (
        id UUID PRIMARY KEY,
        objective TEXT NOT NULL,
        target_urls JSONB NOT NULL DEFAULT '[]',
        status VARCHAR(32) NOT NULL DEFAULT 'PENDING_ANALYSIS',
        initial_package JSONB,
        final_package JSONB,
        sample_results JSONB,
        results JSONB,
        error JSONB,
        user_feedback JSONB,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CONSTRAINT chk_builds_status CHECK (
            status IN (
                'PENDING_ANALYSIS', 'ANALYSIS_FAILED', 'GENERATING_SAMPLES',
                'PENDING_USER_FEEDBACK', 'PROCESSING_FEEDBACK', 'READY_FOR_SCRAPING',
                'CONFIRMED', 'SCRAPING_IN_PROGRESS', 'COMPLETED', 'PARTIAL_SUCCESS',
                'FAILED', 'CANCELLED'
            )
        )
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_builds_created ON builds(created_at DESC)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_builds_status ON builds(status, created_at DESC)"#,
];

/// Spins up a PostgreSQL container and returns a connected pool.
///
/// The `ContainerAsync` must be kept in scope for the test duration;
/// dropping it will stop the container.
pub async fn setup_test_db() -> (PgPool, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "scrapesmith_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let connection_string = format!("postgresql://postgres:postgres@{host}:{port}/scrapesmith_test");

    // Retry connection until container is fully ready
    const MAX_RETRIES: u32 = 30;
    let mut retries = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!("Failed to connect to database after {MAX_RETRIES} retries: {e}");
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    };

    // Run migrations one statement at a time
    for migration in MIGRATIONS {
        sqlx::query(migration)
            .execute(&pool)
            .await
            .expect("Failed to run migration");
    }

    (pool, container)
}
