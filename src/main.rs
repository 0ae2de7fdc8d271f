//! tpl-spider worker
//!
//! Claims web-template crawl tasks from the shared `spider_task` table and
//! crawls them into zip archives under BASE_DIR.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tpl_spider::config::AppConfig;
use tpl_spider::db::{database_url_from_env, validate_database_url};
use tpl_spider::maintenance;
use tpl_spider::worker::{
    setup_signal_handler, PgWorkerFactory, TaskRunner, WorkerConfig, WorkerFactory, WorkerPool,
};
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "tpl-spider")]
#[command(about = "Crawl web templates for tasks queued in the spider_task table")]
#[command(version)]
struct Cli {
    /// Directory holding template_temp/ and template_archive/
    base_dir: PathBuf,

    /// Config file (default: ./tpl-spider.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Process at most one task and exit (for testing)
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new(Level::DEBUG.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.as_str()))
    };
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let app = Arc::new(AppConfig::load(cli.config.as_deref()).context("loading configuration")?);
    let base_dir = cli.base_dir;

    let temp_dir = app.temp_dir(&base_dir);
    let archive_dir = app.archive_dir(&base_dir);
    for dir in [&temp_dir, &archive_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating {}", dir.display()))?;
    }

    let database_url = database_url_from_env()?;
    validate_database_url(&database_url).context("invalid DATABASE_URL")?;
    let factory = Arc::new(PgWorkerFactory::new(database_url, Arc::clone(&app)));
    let worker_config = WorkerConfig::from_app(&app, &base_dir);

    info!("Base directory: {}", base_dir.display());

    if cli.once {
        let deps = factory.build(0).await?;
        let runner = TaskRunner::new(
            deps,
            worker_config.with_worker_id("once"),
            CancellationToken::new(),
        );
        let outcome = runner.run_once().await;
        info!("Single-task run finished: {:?}", outcome);
        return Ok(());
    }

    let mut scheduler = maintenance::start_scheduler(
        &app.cleanup_cron,
        app.cleanup_max_age_days,
        vec![temp_dir, archive_dir],
    )
    .await
    .context("starting cleanup schedule")?;

    let shutdown = CancellationToken::new();
    setup_signal_handler(shutdown.clone());

    let pool = WorkerPool::start(
        app.workers,
        app.loops_per_worker,
        worker_config,
        factory,
        shutdown.clone(),
    )
    .context("starting worker pool")?;

    let joined = pool.join();
    tokio::pin!(joined);
    let exited_early = tokio::select! {
        _ = &mut joined => true,
        _ = shutdown.cancelled() => false,
    };
    if !exited_early {
        info!("Waiting for workers to finish...");
        joined.await;
    }

    if let Err(e) = scheduler.shutdown().await {
        warn!("Failed to stop cleanup schedule: {}", e);
    }

    if exited_early {
        bail!("all workers exited before shutdown was requested");
    }

    info!("tpl-spider stopped");
    Ok(())
}
