use clap::Parser;
use figment::{Figment, providers::Env};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use vvz_harvester::cli::{Args, JobCommand};
use vvz_harvester::config::Config;
use vvz_harvester::harvest::{HarvestManager, SubmitOutcome};
use vvz_harvester::logging::setup_logging;
use vvz_harvester::metrics::HarvestMetrics;
use vvz_harvester::progress::{JobStatus, ProgressTracker};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration first to get log level
    let config: Config = Figment::new()
        .merge(Env::raw())
        .extract()
        .expect("Failed to load config");
    if let Err(message) = config.validate() {
        eprintln!("Invalid configuration: {message}");
        std::process::exit(1);
    }

    setup_logging(&config, args.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        },
        "starting vvz-harvester"
    );

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("Failed to create database pool");

    sqlx::migrate!()
        .run(&db_pool)
        .await
        .expect("Failed to run database migrations");

    info!(
        base_url = config.base_url,
        parallel = config.parallel.enabled,
        max_workers = config.parallel.max_workers,
        session_pool_size = config.parallel.session_pool_size,
        "configuration loaded"
    );

    let tracker = Arc::new(ProgressTracker::new());
    let metrics = Arc::new(HarvestMetrics::new());
    let manager = Arc::new(HarvestManager::new(
        db_pool,
        Arc::new(config),
        tracker.clone(),
        metrics.clone(),
    ));

    let outcome = match args.command.unwrap_or(JobCommand::Discover) {
        JobCommand::Discover => manager.start_discovery_job().await,
        JobCommand::Remote { identifiers } => manager.start_remote_scraping_job(identifiers).await,
        JobCommand::Local { semester_id } => manager.start_local_scraping_job(semester_id).await,
    };

    match outcome {
        SubmitOutcome::Accepted => {}
        SubmitOutcome::Busy => {
            error!("another job is already running");
            std::process::exit(1);
        }
        SubmitOutcome::InvalidArgument(reason) => {
            error!(reason, "job rejected");
            std::process::exit(1);
        }
    }

    // Wait for the job, translating Ctrl+C / SIGTERM into a stop request.
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("received ctrl+c, stopping job...");
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm_stream =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM signal handler");
        sigterm_stream.recv().await;
        info!("received SIGTERM, stopping job...");
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = wait_for_completion(&manager) => {}
        _ = ctrl_c => {
            manager.stop_scraping(Some("Abbruch durch Benutzer")).await;
            wait_for_completion(&manager).await;
        }
        _ = sigterm => {
            manager.stop_scraping(Some("Abbruch durch Signal")).await;
            wait_for_completion(&manager).await;
        }
    }

    let snapshot = tracker.snapshot();
    let exit_code = match snapshot.status {
        JobStatus::Failed => {
            error!(
                detail = snapshot.message.as_deref().unwrap_or(""),
                "harvest failed"
            );
            1
        }
        status => {
            info!(
                status = ?status,
                progress = snapshot.progress,
                detail = snapshot.message.as_deref().unwrap_or(""),
                "harvest finished"
            );
            0
        }
    };

    let metrics_snapshot = metrics.snapshot();
    if metrics_snapshot.runs_failure > 0 {
        warn!(
            failures = metrics_snapshot.runs_failure,
            total = metrics_snapshot.runs_total,
            "some scraping runs failed"
        );
    }

    std::process::exit(exit_code);
}

/// Polls the job slot until the submitted job has finished.
async fn wait_for_completion(manager: &HarvestManager) {
    while manager.is_job_running().await {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
