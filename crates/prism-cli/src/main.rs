use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use prism_metrics::MetricsAggregator;
use prism_sheets::{FixtureSheetFetcher, GoogleSheetsClient, SheetFetcher, SheetSource};
use prism_store::{Cache, CatalogStore, MemoryCache, PgStore, SyncRunStore};
use prism_sync::{maybe_build_scheduler, SyncConfig, SyncOrchestrator};
use prism_web::AppState;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "prism-cli")]
#[command(about = "PRISM command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sheet-to-store sync and exit.
    Sync,
    /// Apply pending database migrations.
    Migrate,
    /// Serve the dashboard API, with the optional in-process scheduler.
    Serve,
    /// Print the last sync run and recent history.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let orchestrator = build_orchestrator(&config).await?;
            let outcome = orchestrator.run_sync().await;
            if outcome.success {
                println!("sync complete: {} rows updated", outcome.rows_updated);
            } else {
                bail!(
                    "sync failed: {}",
                    outcome.error.unwrap_or_else(|| "unknown error".into())
                );
            }
        }
        Commands::Migrate => {
            let store = connect_store(&config).await?;
            store.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Serve => {
            let store = connect_store(&config).await?;
            let fetcher = build_fetcher(&config)?;
            let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
            let orchestrator = Arc::new(SyncOrchestrator::new(
                fetcher,
                Arc::new(store.clone()) as Arc<dyn CatalogStore>,
                Arc::new(store.clone()),
                Arc::clone(&cache),
            ));
            let metrics = Arc::new(MetricsAggregator::new(
                Arc::new(store),
                cache,
                Duration::from_secs(config.cache_ttl_secs),
            ));

            let _scheduler = match maybe_build_scheduler(Arc::clone(&orchestrator), &config).await? {
                Some(sched) => {
                    sched.start().await.context("starting scheduler")?;
                    info!(cron = %config.sync_cron, "sync scheduler started");
                    Some(sched)
                }
                None => None,
            };

            let cron_secret = std::env::var("CRON_SECRET")
                .unwrap_or_else(|_| "your-cron-secret-here".to_string());
            let admin_token = std::env::var("ADMIN_TOKEN")
                .unwrap_or_else(|_| "your-admin-token-here".to_string());
            prism_web::serve_from_env(AppState::new(
                orchestrator,
                metrics,
                cron_secret,
                admin_token,
            ))
            .await?;
        }
        Commands::Status => {
            let store = connect_store(&config).await?;
            match store.last_run().await? {
                Some(run) => {
                    println!(
                        "last run {}: {} rows={} started={} completed={}",
                        run.id,
                        run.status.as_str(),
                        run.rows_updated,
                        run.started_at,
                        run.completed_at
                            .map(|t| t.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                    );
                    if let Some(message) = run.error_message {
                        println!("  error: {message}");
                    }
                }
                None => println!("no sync runs recorded"),
            }
            for run in store.history(5).await? {
                println!(
                    "  {} {} rows={} started={}",
                    run.id,
                    run.status.as_str(),
                    run.rows_updated,
                    run.started_at
                );
            }
        }
    }

    Ok(())
}

async fn connect_store(config: &SyncConfig) -> Result<PgStore> {
    PgStore::connect(&config.database_url)
        .await
        .with_context(|| format!("connecting to {}", config.database_url))
}

async fn build_orchestrator(config: &SyncConfig) -> Result<Arc<SyncOrchestrator>> {
    let store = connect_store(config).await?;
    let fetcher = build_fetcher(config)?;
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    Ok(Arc::new(SyncOrchestrator::new(
        fetcher,
        Arc::new(store.clone()) as Arc<dyn CatalogStore>,
        Arc::new(store),
        cache,
    )))
}

fn build_fetcher(config: &SyncConfig) -> Result<Arc<dyn SheetFetcher>> {
    if let Some(path) = &config.fixture_path {
        info!(path = %path.display(), "using fixture sheet fetcher");
        return Ok(Arc::new(FixtureSheetFetcher::new(path)));
    }
    let source = SheetSource {
        spreadsheet_id: config.sheet_id.clone(),
        sheet_name: config.sheet_name.clone(),
        api_key: config.api_key.clone(),
    };
    let client = GoogleSheetsClient::new(
        source,
        Duration::from_secs(config.http_timeout_secs),
        &config.user_agent,
    )?;
    Ok(Arc::new(client))
}
