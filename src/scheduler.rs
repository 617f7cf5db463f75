//! Recurring capture-and-analyze runs on per-job cron schedules.
//!
//! One tokio task per configured job sleeps until the next fire time in the
//! job's timezone, then runs the pipeline. A job key is never run twice at
//! once; failed runs are retried with backoff up to `job_max_attempts`.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use dashmap::DashSet;
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::health::HealthState;
use crate::config::{JobConfig, JOB_RETRY_BACKOFF_MS};
use crate::db::queries;
use crate::error::{AppError, Result};
use crate::ingest::SnapshotIngestor;
use crate::source::ListingSource;
use crate::trends::TrendAnalyzer;
use crate::types::{to_ns, ListingType};

/// Parses a cron expression, prepending a seconds field to 5-field input.
pub fn parse_cron(expr: &str) -> Result<Schedule> {
    let expr = expr.trim();
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    Schedule::from_str(&normalized).map_err(|e| AppError::Config(format!("invalid cron '{expr}': {e}")))
}

/// Unknown zone names fall back to UTC.
pub fn resolve_timezone(name: &str) -> Tz {
    match name.trim().parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(timezone = %name, "Unrecognized timezone '{name}', scheduling in UTC");
            Tz::UTC
        }
    }
}

pub fn job_key(category_external_id: &str, listing_type: ListingType) -> String {
    format!("{category_external_id}:{listing_type}")
}

/// Next fire time strictly after `after`, evaluated in `tz`.
pub fn next_fire(schedule: &Schedule, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|t| t.with_timezone(&Utc))
}

/// Delay before retry number `attempt` (1-based); the last step repeats.
pub fn retry_delay(backoff: &[Duration], attempt: u32) -> Duration {
    let idx = (attempt.max(1) as usize - 1).min(backoff.len().saturating_sub(1));
    backoff.get(idx).copied().unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub snapshot_id: i64,
    pub trend_count: usize,
}

/// Capture followed by analysis of the captured snapshot.
#[derive(Clone)]
pub struct Pipeline {
    pool: SqlitePool,
    ingestor: Arc<SnapshotIngestor>,
    analyzer: Arc<TrendAnalyzer>,
}

impl Pipeline {
    pub fn new(pool: SqlitePool, source: Arc<dyn ListingSource>) -> Self {
        Self {
            ingestor: Arc::new(SnapshotIngestor::new(pool.clone(), source)),
            analyzer: Arc::new(TrendAnalyzer::new(pool.clone())),
            pool,
        }
    }

    /// `Ok(None)` when the category is not in the catalog.
    pub async fn capture_and_analyze(
        &self,
        category_external_id: &str,
        listing_type: ListingType,
    ) -> Result<Option<RunReport>> {
        let Some(category) = queries::category_by_external_id(&self.pool, category_external_id).await? else {
            warn!(
                category = %category_external_id,
                listing_type = %listing_type,
                "Category '{category_external_id}' is not configured; skipping run",
            );
            return Ok(None);
        };

        // Runs are never cancelled from outside; the source's request timeout bounds them.
        let cancel = CancellationToken::new();
        let snapshot_id = self
            .ingestor
            .capture_snapshot(category.id, listing_type, &cancel)
            .await?;
        let trend_count = self.analyzer.analyze_snapshot(snapshot_id, &cancel).await?;

        Ok(Some(RunReport { snapshot_id, trend_count }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Finished(Option<RunReport>),
    SkippedInFlight,
    Failed { attempts: u32, error: String },
}

/// Removes the job key from the in-flight set when the run ends, however it ends.
struct InFlightGuard {
    set: Arc<DashSet<String>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

pub struct JobScheduler {
    pipeline: Pipeline,
    in_flight: Arc<DashSet<String>>,
    health: Arc<HealthState>,
    max_attempts: u32,
    backoff: Vec<Duration>,
}

impl JobScheduler {
    pub fn new(pipeline: Pipeline, max_attempts: u32, health: Arc<HealthState>) -> Self {
        Self {
            pipeline,
            in_flight: Arc::new(DashSet::new()),
            health,
            max_attempts: max_attempts.max(1),
            backoff: JOB_RETRY_BACKOFF_MS.iter().map(|ms| Duration::from_millis(*ms)).collect(),
        }
    }

    #[cfg(test)]
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Spawns one task per job with a valid cron expression.
    pub fn spawn_all(self: Arc<Self>, jobs: &[JobConfig], shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            let key = job_key(&job.category_external_id, job.listing_type);
            let schedule = match parse_cron(&job.cron) {
                Ok(s) => s,
                Err(e) => {
                    warn!(job_key = %key, cron = %job.cron, "Job {key} disabled: {e}");
                    continue;
                }
            };
            let tz = resolve_timezone(&job.timezone);
            info!(job_key = %key, cron = %job.cron, timezone = %tz, "Scheduled job {key}");

            let this = Arc::clone(&self);
            let job = job.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                this.run_job(job, schedule, tz, shutdown).await;
            }));
        }
        handles
    }

    async fn run_job(&self, job: JobConfig, schedule: Schedule, tz: Tz, shutdown: CancellationToken) {
        let key = job_key(&job.category_external_id, job.listing_type);
        loop {
            let now = Utc::now();
            let Some(fire_at) = next_fire(&schedule, tz, now) else {
                warn!(job_key = %key, "Job {key} has no upcoming fire time; stopping");
                return;
            };
            let wait = (fire_at - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(job_key = %key, "Job {key} stopped");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            self.run_once(&job.category_external_id, job.listing_type).await;
        }
    }

    /// One guarded run with retries.
    pub async fn run_once(&self, category_external_id: &str, listing_type: ListingType) -> RunOutcome {
        let key = job_key(category_external_id, listing_type);
        if !self.in_flight.insert(key.clone()) {
            warn!(job_key = %key, "Job {key} is still running; skipping this fire");
            return RunOutcome::SkippedInFlight;
        }
        let _guard = InFlightGuard {
            set: Arc::clone(&self.in_flight),
            key: key.clone(),
        };

        self.health.run_started();
        let outcome = self.run_with_retries(&key, category_external_id, listing_type).await;
        let ok = matches!(outcome, RunOutcome::Finished(_));
        self.health.run_ended(ok, to_ns(Utc::now()).max(0) as u64);
        outcome
    }

    async fn run_with_retries(&self, key: &str, category_external_id: &str, listing_type: ListingType) -> RunOutcome {
        let mut attempt = 1;
        loop {
            match self
                .pipeline
                .capture_and_analyze(category_external_id, listing_type)
                .await
            {
                Ok(report) => {
                    if let Some(r) = report {
                        info!(
                            job_key = %key,
                            snapshot_id = r.snapshot_id,
                            trends = r.trend_count,
                            attempt,
                            "Job {key} finished: snapshot {} with {} trends",
                            r.snapshot_id,
                            r.trend_count,
                        );
                    }
                    return RunOutcome::Finished(report);
                }
                Err(e) if attempt >= self.max_attempts => {
                    error!(job_key = %key, attempt, error = %e, "Job {key} failed after {attempt} attempts: {e}");
                    return RunOutcome::Failed {
                        attempts: attempt,
                        error: e.to_string(),
                    };
                }
                Err(e) => {
                    let delay = retry_delay(&self.backoff, attempt);
                    warn!(
                        job_key = %key,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        "Job {key} attempt {attempt} failed: {e}",
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
