use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use scrapesmith_client::{HttpToolBackend, OpenAiAnalyzer, default_registry};
use scrapesmith_core::build::{Build, BuildStatus, CreateBuildRequest, FeedbackKind, UserFeedback};
use scrapesmith_core::config::EngineConfig;
use scrapesmith_core::engine::ExecutionEngine;
use scrapesmith_core::memory::InMemoryBuildRepository;
use scrapesmith_core::orchestrator::{OrchestrationMode, ToolCallInput, UnifiedOrchestrator};
use scrapesmith_core::pipeline::{BuildPipeline, TracingPipelineReporter, cancel_build};
use scrapesmith_core::registry::RegistryBackend;
use scrapesmith_core::repository::BuildRepository;
use scrapesmith_db::{Database, DatabaseConfig, PgBuildRepository};

/// Feedback text used when `--auto-confirm` accepts the samples unchanged.
const AUTO_CONFIRM_FEEDBACK: &str = "The samples look correct. Keep the configuration as is.";

#[derive(Parser)]
#[command(name = "scrapesmith", version, about = "Objective-driven scraper builder")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct LlmArgs {
    /// LLM model to use (e.g., "gpt-4o-mini")
    #[arg(short, long, env = "SCRAPESMITH_MODEL", default_value = "gpt-4o-mini")]
    model: String,

    /// OpenAI-compatible API base URL
    #[arg(
        short,
        long,
        env = "SCRAPESMITH_BASE_URL",
        default_value = "https://api.openai.com/v1"
    )]
    base_url: String,

    /// API key (reads from SCRAPESMITH_API_KEY env var if not provided)
    #[arg(short, long, env = "SCRAPESMITH_API_KEY")]
    api_key: String,

    /// Allow scraping private and loopback addresses
    #[arg(long, default_value_t = false)]
    allow_private: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a build and run it until it needs feedback or finishes
    Run {
        /// What to extract, in plain language
        #[arg(short, long)]
        objective: String,

        /// Target URL (repeat for several targets)
        #[arg(short, long = "url", required = true)]
        urls: Vec<String>,

        /// Accept the samples and run the full extraction without stopping
        #[arg(long, default_value_t = false)]
        auto_confirm: bool,

        /// Store the build in PostgreSQL (requires DATABASE_URL)
        #[arg(long, default_value_t = false)]
        persist: bool,

        #[command(flatten)]
        llm: LlmArgs,
    },

    /// Send feedback on a build waiting for input
    Feedback {
        #[arg(long)]
        build_id: Uuid,

        /// "approach" to re-derive the configuration, "samples" to tune it
        #[arg(short, long)]
        kind: FeedbackKind,

        #[arg(short, long)]
        text: String,

        #[command(flatten)]
        llm: LlmArgs,
    },

    /// Approve a build's configuration and run the full extraction
    Confirm {
        #[arg(long)]
        build_id: Uuid,

        #[command(flatten)]
        llm: LlmArgs,
    },

    /// Cancel a build before scraping starts
    Cancel {
        #[arg(long)]
        build_id: Uuid,
    },

    /// Print a stored build as JSON
    Show {
        #[arg(long)]
        build_id: Uuid,
    },

    /// List stored builds, newest first
    List {
        /// Only builds in this status (e.g. PENDING_USER_FEEDBACK)
        #[arg(short, long)]
        status: Option<BuildStatus>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Invoke a single tool through the orchestrator
    Call {
        /// Registered tool id (e.g. "static_html")
        #[arg(short, long)]
        tool: String,

        /// primary, secondary or both
        #[arg(short, long, default_value = "primary")]
        mode: OrchestrationMode,

        /// JSON payload, e.g. '{"url": "...", "selectors": {"title": "h1"}}'
        #[arg(short, long)]
        payload: String,

        /// Remote tool backend used for the secondary path
        #[arg(
            long,
            env = "SCRAPESMITH_BACKEND_URL",
            default_value = "http://127.0.0.1:8080"
        )]
        backend_url: String,

        /// API key sent to the remote backend
        #[arg(long, env = "SCRAPESMITH_BACKEND_API_KEY")]
        backend_api_key: Option<String>,

        /// Allow scraping private and loopback addresses
        #[arg(long, default_value_t = false)]
        allow_private: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("scrapesmith=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            objective,
            urls,
            auto_confirm,
            persist,
            llm,
        } => {
            if persist {
                let pipeline = build_pipeline(connect_db().await?, &llm)?;
                cmd_run(&pipeline, objective, urls, auto_confirm).await?;
            } else {
                let pipeline = build_pipeline(InMemoryBuildRepository::new(), &llm)?;
                cmd_run(&pipeline, objective, urls, auto_confirm).await?;
            }
        }
        Commands::Feedback {
            build_id,
            kind,
            text,
            llm,
        } => {
            let pipeline = build_pipeline(connect_db().await?, &llm)?;
            let feedback = UserFeedback::new(kind, text);
            let accepted = pipeline.submit_feedback(build_id, &feedback).await;
            report(pipeline.repository(), build_id, accepted, "feedback").await?;
        }
        Commands::Confirm { build_id, llm } => {
            let pipeline = build_pipeline(connect_db().await?, &llm)?;
            let accepted = pipeline.confirm(build_id).await;
            report(pipeline.repository(), build_id, accepted, "confirm").await?;
        }
        Commands::Cancel { build_id } => {
            let repo = connect_db().await?;
            let accepted = cancel_build(&repo, &TracingPipelineReporter, build_id).await;
            report(&repo, build_id, accepted, "cancel").await?;
        }
        Commands::Show { build_id } => {
            let repo = connect_db().await?;
            let build = load_build(&repo, build_id).await?;
            println!("{}", serde_json::to_string_pretty(&build)?);
        }
        Commands::List { status, limit } => {
            let repo = connect_db().await?;
            cmd_list(&repo, status, limit).await?;
        }
        Commands::Call {
            tool,
            mode,
            payload,
            backend_url,
            backend_api_key,
            allow_private,
        } => {
            cmd_call(
                &tool,
                mode,
                &payload,
                &backend_url,
                backend_api_key,
                allow_private,
            )
            .await?;
        }
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and apply migrations.
async fn connect_db() -> Result<PgBuildRepository> {
    let config = DatabaseConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(db.build_repo())
}

fn build_pipeline<R: BuildRepository>(
    repo: R,
    llm: &LlmArgs,
) -> Result<BuildPipeline<R, OpenAiAnalyzer>> {
    let registry = default_registry(llm.allow_private);
    let analyzer = OpenAiAnalyzer::with_base_url(&llm.api_key, &llm.model, &llm.base_url)
        .map_err(|e| anyhow::anyhow!(e))?
        .with_tools(&registry);
    let config = EngineConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;

    tracing::debug!(
        model = %llm.model,
        concurrency = config.concurrency,
        "Pipeline configured"
    );

    Ok(BuildPipeline::new(
        repo,
        analyzer,
        ExecutionEngine::new(registry, config),
    ))
}

async fn load_build<R: BuildRepository>(repo: &R, build_id: Uuid) -> Result<Build> {
    repo.find_build_by_id(build_id)
        .await
        .map_err(|e| anyhow::anyhow!(e))?
        .with_context(|| format!("Build {build_id} not found"))
}

async fn cmd_run<R: BuildRepository>(
    pipeline: &BuildPipeline<R, OpenAiAnalyzer>,
    objective: String,
    urls: Vec<String>,
    auto_confirm: bool,
) -> Result<()> {
    let build = pipeline
        .start(CreateBuildRequest::new(objective, urls))
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    if auto_confirm && build.status == BuildStatus::PendingUserFeedback {
        tracing::info!(build_id = %build.id, "Auto-confirming samples");
        let feedback = UserFeedback::new(FeedbackKind::Samples, AUTO_CONFIRM_FEEDBACK);
        if pipeline.submit_feedback(build.id, &feedback).await {
            pipeline.confirm(build.id).await;
        }
    }

    report(pipeline.repository(), build.id, true, "run").await
}

/// Print the build and turn rejection or failure into a non-zero exit.
async fn report<R: BuildRepository>(
    repo: &R,
    build_id: Uuid,
    accepted: bool,
    action: &str,
) -> Result<()> {
    let build = load_build(repo, build_id).await?;
    println!("{}", serde_json::to_string_pretty(&build)?);
    eprintln!("{}", summarize(&build));

    if matches!(
        build.status,
        BuildStatus::Failed | BuildStatus::AnalysisFailed
    ) {
        let reason = build
            .error
            .as_ref()
            .map(|e| e.message.as_str())
            .unwrap_or("unknown error");
        anyhow::bail!("Build {build_id} failed: {reason}");
    }
    if !accepted {
        anyhow::bail!("{action} rejected for build {build_id} in status {}", build.status);
    }
    Ok(())
}

fn summarize(build: &Build) -> String {
    let mut line = format!("Build {} is {}", build.id, build.status);
    let results = build.results.as_ref().or(build.sample_results.as_ref());
    if let Some(results) = results {
        line.push_str(&format!(
            " ({} succeeded, {} failed)",
            results.success_count(),
            results.failure_count()
        ));
    }
    match build.status {
        BuildStatus::PendingUserFeedback => {
            line.push_str(&format!(
                "\nReview the samples, then run `scrapesmith feedback --build-id {} --kind samples --text ...`",
                build.id
            ));
        }
        BuildStatus::ReadyForScraping => {
            line.push_str(&format!(
                "\nRun `scrapesmith confirm --build-id {}` to scrape every target",
                build.id
            ));
        }
        _ => {}
    }
    line
}

async fn cmd_list<R: BuildRepository>(
    repo: &R,
    status: Option<BuildStatus>,
    limit: usize,
) -> Result<()> {
    let builds = repo
        .list_builds(status, limit)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    if builds.is_empty() {
        println!("No builds found");
        return Ok(());
    }

    for build in &builds {
        println!(
            "  {} [{}] {} ({} targets) {}",
            build.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            build.status,
            build.id,
            build.target_urls.len(),
            build.objective,
        );
    }

    println!("\nTotal: {} builds", builds.len());

    Ok(())
}

async fn cmd_call(
    tool: &str,
    mode: OrchestrationMode,
    payload: &str,
    backend_url: &str,
    backend_api_key: Option<String>,
    allow_private: bool,
) -> Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("Invalid JSON in --payload")?;

    let primary = RegistryBackend::new(default_registry(allow_private));
    let mut secondary = HttpToolBackend::new(backend_url).map_err(|e| anyhow::anyhow!(e))?;
    if let Some(key) = backend_api_key {
        secondary = secondary.with_api_key(key);
    }
    let orchestrator = UnifiedOrchestrator::new(primary, secondary);

    let input = ToolCallInput::new(tool, payload);
    let result = orchestrator.call_tool(&input, mode).await;

    match (result.output, result.error) {
        (Some(output), None) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        (_, Some(error)) => anyhow::bail!("Tool call failed ({mode}): {error}"),
        (None, None) => anyhow::bail!("Tool call returned no output"),
    }
}
