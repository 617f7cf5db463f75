use std::time::Duration;

use tracing::warn;

use crate::error::{AppError, Result};
use crate::types::ListingType;

pub const MARKETPLACE_BASE_URL: &str = "https://www.amazon.com";

/// Ranks at or below this value are "in the top band" for trend classification.
pub const TOP_BAND_RANK: i64 = 100;

/// Default cron expression (6-field, seconds first): once daily at midnight.
pub const DEFAULT_JOB_CRON: &str = "0 0 0 * * *";

/// Default IANA timezone for job schedules.
pub const DEFAULT_JOB_TIMEZONE: &str = "UTC";

/// Retry backoff values in milliseconds for a failed capture-and-analyze run.
pub const JOB_RETRY_BACKOFF_MS: &[u64] = &[30_000, 120_000, 600_000];

/// Listing pages fetched per capture (each page holds up to 50 ranked items).
pub const DEFAULT_SCRAPE_PAGES: u32 = 2;

pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

/// Risk threshold defaults.
pub mod risk_defaults {
    pub const INVENTORY_THRESHOLD_DAYS: f64 = 10.0;
    pub const INVENTORY_HIGH_SEVERITY_FACTOR: f64 = 0.5;
    pub const NEGATIVE_REVIEW_MEDIUM_COUNT: i64 = 1;
    pub const NEGATIVE_REVIEW_HIGH_COUNT: i64 = 3;
    pub const DATA_STALE_AFTER_HOURS: i64 = 48;
}

// ---------------------------------------------------------------------------
// Scrape pacing
// ---------------------------------------------------------------------------

/// Client-side courtesy delay and user-agent rotation applied before every fetch.
#[derive(Debug, Clone)]
pub struct PacingConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub user_agents: Vec<String>,
}

impl PacingConfig {
    /// Swaps inverted bounds and restores the default pool when empty.
    pub fn normalized(mut self) -> Self {
        if self.min_delay_ms > self.max_delay_ms {
            std::mem::swap(&mut self.min_delay_ms, &mut self.max_delay_ms);
        }
        if self.user_agents.is_empty() {
            self.user_agents = DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect();
        }
        self
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 2_000,
            max_delay_ms: 5_000,
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Risk thresholds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RiskThresholds {
    pub inventory_threshold_days: f64,
    pub inventory_high_severity_factor: f64,
    pub negative_review_medium_count: i64,
    pub negative_review_high_count: i64,
    pub data_stale_after: Duration,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        use risk_defaults::*;
        Self {
            inventory_threshold_days: INVENTORY_THRESHOLD_DAYS,
            inventory_high_severity_factor: INVENTORY_HIGH_SEVERITY_FACTOR,
            negative_review_medium_count: NEGATIVE_REVIEW_MEDIUM_COUNT,
            negative_review_high_count: NEGATIVE_REVIEW_HIGH_COUNT,
            data_stale_after: Duration::from_secs(DATA_STALE_AFTER_HOURS as u64 * 3_600),
        }
    }
}

impl RiskThresholds {
    /// Replaces each misconfigured value with its default. Never fails.
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        let mut out = self;

        if !out.inventory_threshold_days.is_finite() || out.inventory_threshold_days < 0.0 {
            warn!(
                value = out.inventory_threshold_days,
                "inventory threshold days invalid, using default {}", defaults.inventory_threshold_days,
            );
            out.inventory_threshold_days = defaults.inventory_threshold_days;
        }

        let factor = out.inventory_high_severity_factor;
        if !factor.is_finite() || factor <= 0.0 || factor > 1.0 {
            warn!(
                value = factor,
                "inventory high severity factor outside (0, 1], using default {}",
                defaults.inventory_high_severity_factor,
            );
            out.inventory_high_severity_factor = defaults.inventory_high_severity_factor;
        }

        let medium = out.negative_review_medium_count;
        let high = out.negative_review_high_count;
        if medium < 1 || high < 1 || high < medium {
            warn!(
                medium,
                high,
                "negative review thresholds invalid, using defaults {}/{}",
                defaults.negative_review_medium_count,
                defaults.negative_review_high_count,
            );
            out.negative_review_medium_count = defaults.negative_review_medium_count;
            out.negative_review_high_count = defaults.negative_review_high_count;
        }

        if out.data_stale_after.is_zero() {
            warn!("data staleness window is zero, using default");
            out.data_stale_after = defaults.data_stale_after;
        }

        out
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// One recurring capture: a category + listing type on a cron schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    pub category_external_id: String,
    pub listing_type: ListingType,
    pub cron: String,
    pub timezone: String,
}

impl JobConfig {
    /// Parses `categoryExternalId|listingType[|cron[|timezone]]`.
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split('|').map(str::trim).collect();
        let category = parts.first().copied().unwrap_or("");
        if category.is_empty() {
            return Err(AppError::Config(format!("job '{raw}' has no category id")));
        }
        let listing_type = parts
            .get(1)
            .ok_or_else(|| AppError::Config(format!("job '{raw}' has no listing type")))?
            .parse::<ListingType>()
            .map_err(|e| AppError::Config(format!("job '{raw}': {e}")))?;
        let cron = parts
            .get(2)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .unwrap_or_else(|| DEFAULT_JOB_CRON.to_string());
        let timezone = parts
            .get(3)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .unwrap_or_else(|| DEFAULT_JOB_TIMEZONE.to_string());

        Ok(Self {
            category_external_id: category.to_string(),
            listing_type,
            cron,
            timezone,
        })
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub marketplace_base_url: String,
    /// Listing pages fetched per capture (SCRAPE_PAGES)
    pub scrape_pages: u32,
    /// Per-request timeout in seconds (SCRAPE_TIMEOUT_SECS)
    pub scrape_timeout_secs: u64,
    pub pacing: PacingConfig,
    /// SCRAPE_JOBS, `;`-separated `category|listing_type[|cron[|tz]]`
    pub jobs: Vec<JobConfig>,
    /// Insert missing category rows for configured jobs at startup (SEED_CATEGORIES)
    pub seed_categories: bool,
    pub risk: RiskThresholds,
    /// Attempts per scheduled run before giving up until the next fire time (JOB_MAX_ATTEMPTS)
    pub job_max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            db_path: "scanner.db".to_string(),
            api_port: 3000,
            marketplace_base_url: MARKETPLACE_BASE_URL.to_string(),
            scrape_pages: DEFAULT_SCRAPE_PAGES,
            scrape_timeout_secs: 30,
            pacing: PacingConfig::default(),
            jobs: Vec::new(),
            seed_categories: true,
            risk: RiskThresholds::default(),
            job_max_attempts: 3,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let pacing = PacingConfig {
            min_delay_ms: env_parse("SCRAPE_MIN_DELAY_MS", 2_000),
            max_delay_ms: env_parse("SCRAPE_MAX_DELAY_MS", 5_000),
            user_agents: std::env::var("SCRAPE_USER_AGENTS")
                .unwrap_or_default()
                .split('|')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
        .normalized();

        let jobs = std::env::var("SCRAPE_JOBS")
            .unwrap_or_default()
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(JobConfig::parse)
            .collect::<Result<Vec<_>>>()?;

        let risk = RiskThresholds {
            inventory_threshold_days: env_parse(
                "RISK_INVENTORY_THRESHOLD_DAYS",
                risk_defaults::INVENTORY_THRESHOLD_DAYS,
            ),
            inventory_high_severity_factor: env_parse(
                "RISK_INVENTORY_HIGH_FACTOR",
                risk_defaults::INVENTORY_HIGH_SEVERITY_FACTOR,
            ),
            negative_review_medium_count: env_parse(
                "RISK_NEGATIVE_REVIEW_MEDIUM",
                risk_defaults::NEGATIVE_REVIEW_MEDIUM_COUNT,
            ),
            negative_review_high_count: env_parse(
                "RISK_NEGATIVE_REVIEW_HIGH",
                risk_defaults::NEGATIVE_REVIEW_HIGH_COUNT,
            ),
            data_stale_after: stale_window_from_hours(env_parse(
                "RISK_DATA_STALE_AFTER_HOURS",
                risk_defaults::DATA_STALE_AFTER_HOURS,
            )),
        }
        .sanitized();

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "scanner.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            marketplace_base_url: std::env::var("MARKETPLACE_BASE_URL")
                .unwrap_or_else(|_| MARKETPLACE_BASE_URL.to_string()),
            scrape_pages: env_parse("SCRAPE_PAGES", DEFAULT_SCRAPE_PAGES).max(1),
            scrape_timeout_secs: env_parse("SCRAPE_TIMEOUT_SECS", 30),
            pacing,
            jobs,
            seed_categories: env_parse("SEED_CATEGORIES", true),
            risk,
            job_max_attempts: env_parse("JOB_MAX_ATTEMPTS", 3u32).max(1),
        })
    }
}

/// Converts a staleness window in hours, falling back to the default when it overflows.
fn stale_window_from_hours(hours: i64) -> Duration {
    match u64::try_from(hours.max(0)).ok().and_then(|h| h.checked_mul(3_600)) {
        Some(secs) => Duration::from_secs(secs),
        None => {
            warn!("RISK_DATA_STALE_AFTER_HOURS={hours} is out of range, using default");
            RiskThresholds::default().data_stale_after
        }
    }
}

/// Reads and parses an optional env var, falling back to `default` when unset or malformed.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            warn!("{key}={raw:?} is not valid, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_parse_applies_defaults() {
        let job = JobConfig::parse("electronics|best_sellers").unwrap();
        assert_eq!(job.category_external_id, "electronics");
        assert_eq!(job.listing_type, ListingType::BestSellers);
        assert_eq!(job.cron, DEFAULT_JOB_CRON);
        assert_eq!(job.timezone, "UTC");
    }

    #[test]
    fn job_parse_reads_cron_and_timezone() {
        let job = JobConfig::parse("books | new_releases | 0 30 6 * * * | America/New_York").unwrap();
        assert_eq!(job.category_external_id, "books");
        assert_eq!(job.listing_type, ListingType::NewReleases);
        assert_eq!(job.cron, "0 30 6 * * *");
        assert_eq!(job.timezone, "America/New_York");
    }

    #[test]
    fn job_parse_rejects_missing_parts() {
        assert!(JobConfig::parse("|best_sellers").is_err());
        assert!(JobConfig::parse("books").is_err());
        assert!(JobConfig::parse("books|top_rated").is_err());
    }

    #[test]
    fn pacing_normalizes_inverted_bounds_and_empty_pool() {
        let p = PacingConfig { min_delay_ms: 900, max_delay_ms: 100, user_agents: vec![] }.normalized();
        assert_eq!((p.min_delay_ms, p.max_delay_ms), (100, 900));
        assert_eq!(p.user_agents.len(), DEFAULT_USER_AGENTS.len());
    }

    #[test]
    fn negative_thresholds_fall_back_to_defaults() {
        let t = RiskThresholds {
            inventory_threshold_days: -5.0,
            inventory_high_severity_factor: 1.5,
            negative_review_medium_count: 4,
            negative_review_high_count: 2,
            data_stale_after: Duration::ZERO,
        }
        .sanitized();
        assert_eq!(t, RiskThresholds::default());
    }

    #[test]
    fn valid_thresholds_are_kept() {
        let custom = RiskThresholds {
            inventory_threshold_days: 14.0,
            inventory_high_severity_factor: 0.25,
            negative_review_medium_count: 2,
            negative_review_high_count: 5,
            data_stale_after: Duration::from_secs(3_600),
        };
        assert_eq!(custom.clone().sanitized(), custom);
    }

    #[test]
    fn stale_window_overflow_falls_back_to_default() {
        let default = RiskThresholds::default().data_stale_after;
        assert_eq!(stale_window_from_hours(9_000_000_000_000_000), default);
        assert_eq!(stale_window_from_hours(i64::MAX), default);
        assert_eq!(stale_window_from_hours(72), Duration::from_secs(72 * 3_600));
        // negative hours clamp to zero, which `sanitized` then rejects
        assert_eq!(stale_window_from_hours(-4), Duration::ZERO);
    }

    #[test]
    fn huge_stale_hours_env_is_non_fatal() {
        std::env::set_var("RISK_DATA_STALE_AFTER_HOURS", "9000000000000000");
        let cfg = Config::from_env();
        std::env::remove_var("RISK_DATA_STALE_AFTER_HOURS");
        let cfg = cfg.unwrap();
        assert_eq!(cfg.risk.data_stale_after, RiskThresholds::default().data_stale_after);
    }
}
