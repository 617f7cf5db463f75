mod api;
mod config;
mod db;
mod error;
mod ingest;
mod risk;
mod scheduler;
mod source;
mod trends;
mod types;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::db::writer;
use crate::error::Result;
use crate::risk::RiskScorer;
use crate::scheduler::{JobScheduler, Pipeline};
use crate::source::MarketplaceListingSource;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Category catalog ---
    if cfg.seed_categories {
        let mut seeded = 0;
        for job in &cfg.jobs {
            seeded += writer::insert_category_if_missing(
                &pool,
                &job.category_external_id,
                &job.category_external_id,
            )
            .await?;
        }
        if seeded > 0 {
            info!("Seeded {seeded} categories from SCRAPE_JOBS");
        }
    }

    if cfg.jobs.is_empty() {
        warn!("SCRAPE_JOBS not set; no captures will run. Example: SCRAPE_JOBS=electronics|best_sellers;books|new_releases|0 6 * * *|America/New_York");
    } else {
        info!(
            jobs = cfg.jobs.len(),
            pages = cfg.scrape_pages,
            min_delay_ms = cfg.pacing.min_delay_ms,
            max_delay_ms = cfg.pacing.max_delay_ms,
            "Configured {} capture jobs",
            cfg.jobs.len(),
        );
    }

    // --- Capture pipeline + recurring jobs ---
    let source = Arc::new(MarketplaceListingSource::new(&cfg)?);
    let pipeline = Pipeline::new(pool.clone(), source);
    let health = Arc::new(HealthState::new());
    let scheduler = Arc::new(JobScheduler::new(
        pipeline,
        cfg.job_max_attempts,
        Arc::clone(&health),
    ));
    let shutdown = CancellationToken::new();
    let handles = scheduler.spawn_all(&cfg.jobs, shutdown.clone());
    info!("{} job tasks running", handles.len());

    // --- HTTP API server ---
    let api_state = ApiState {
        pool: pool.clone(),
        scorer: Arc::new(RiskScorer::new(pool.clone(), cfg.risk.clone())),
        health,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Job task ended abnormally: {e}");
        }
    }
    pool.close().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
