//! Operational risk scoring over the latest completed operational snapshot.
//!
//! Scoring is a pure function of one metric row and the configured thresholds.
//! Queries never fail on missing or stale data: no snapshot yields an empty
//! result flagged stale, and an old snapshot is still scored but flagged.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;

use crate::config::RiskThresholds;
use crate::db::models::OperationalMetricRow;
use crate::db::queries;
use crate::error::Result;
use crate::types::{from_ns, IssueType, Severity};

pub const DEFAULT_PAGE_SIZE: u32 = 25;
pub const MAX_PAGE_SIZE: u32 = 200;

const AD_WASTE_REASON: &str = "ad spend data is not collected; ad waste scoring is not implemented";

// ---------------------------------------------------------------------------
// Pure scoring
// ---------------------------------------------------------------------------

/// `None` when days of cover are unknown or above the threshold.
pub fn low_stock_severity(inventory_days: Option<f64>, t: &RiskThresholds) -> Option<Severity> {
    let days = inventory_days.filter(|d| d.is_finite())?;
    if days > t.inventory_threshold_days {
        return None;
    }
    if days <= t.inventory_threshold_days * t.inventory_high_severity_factor {
        Some(Severity::High)
    } else {
        Some(Severity::Medium)
    }
}

pub fn negative_review_severity(count: i64, t: &RiskThresholds) -> Option<Severity> {
    if count >= t.negative_review_high_count {
        Some(Severity::High)
    } else if count >= t.negative_review_medium_count {
        Some(Severity::Medium)
    } else {
        None
    }
}

/// True when the data is older than `stale_after`. Timestamps in the future are fresh.
pub fn is_stale(captured_at: DateTime<Utc>, now: DateTime<Utc>, stale_after: Duration) -> bool {
    match (now - captured_at).to_std() {
        Ok(age) => age > stale_after,
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

/// Per-issue-type outcome. `NotAvailable` means no computation exists, which is
/// different from `Computed` with zero issues.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CategoryStatus {
    Computed { total: usize, high: usize, medium: usize },
    NotAvailable { reason: String },
}

impl CategoryStatus {
    fn ad_waste() -> Self {
        CategoryStatus::NotAvailable {
            reason: AD_WASTE_REASON.to_string(),
        }
    }

    fn tally(issues: &[RiskIssue], issue_type: IssueType) -> Self {
        let (mut high, mut medium) = (0, 0);
        for issue in issues.iter().filter(|i| i.issue_type == issue_type) {
            match issue.severity {
                Severity::High => high += 1,
                Severity::Medium => medium += 1,
            }
        }
        CategoryStatus::Computed {
            total: high + medium,
            high,
            medium,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskIssue {
    pub product_id: String,
    pub product_title: Option<String>,
    pub issue_type: IssueType,
    pub severity: Severity,
    pub detail: String,
    pub inventory_quantity: Option<i64>,
    pub inventory_days: Option<f64>,
    pub units_sold_7d: Option<i64>,
    pub is_stockout: Option<bool>,
    pub negative_review_count: i64,
    pub latest_negative_review_at: Option<DateTime<Utc>>,
    pub latest_negative_review_excerpt: Option<String>,
    pub latest_negative_review_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskSummary {
    pub snapshot_id: Option<i64>,
    pub captured_at: Option<DateTime<Utc>>,
    pub is_stale: bool,
    pub low_stock: CategoryStatus,
    pub negative_review: CategoryStatus,
    pub ad_waste: CategoryStatus,
    pub total_issues: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueFilter {
    pub issue_type: Option<IssueType>,
    pub severity: Option<Severity>,
    pub search: Option<String>,
    /// 1-based.
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl IssueFilter {
    fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    fn matches(&self, issue: &RiskIssue) -> bool {
        if self.issue_type.is_some_and(|t| t != issue.issue_type) {
            return false;
        }
        if self.severity.is_some_and(|s| s != issue.severity) {
            return false;
        }
        match self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                issue.product_id.to_lowercase().contains(&needle)
                    || issue
                        .product_title
                        .as_deref()
                        .is_some_and(|t| t.to_lowercase().contains(&needle))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuePage {
    pub items: Vec<RiskIssue>,
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
    pub is_stale: bool,
    pub captured_at: Option<DateTime<Utc>>,
    pub ad_waste: CategoryStatus,
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

/// Every issue raised by one metric row, at most one per issue type.
pub fn score_metric(row: &OperationalMetricRow, t: &RiskThresholds) -> Vec<RiskIssue> {
    let mut issues = Vec::new();

    if let Some(severity) = low_stock_severity(row.inventory_days, t) {
        let days = row.inventory_days.unwrap_or_default();
        issues.push(issue_from(
            row,
            IssueType::LowStock,
            severity,
            format!(
                "{days:.1} days of inventory left (threshold {} days)",
                t.inventory_threshold_days
            ),
        ));
    }

    if let Some(severity) = negative_review_severity(row.negative_review_count, t) {
        let n = row.negative_review_count;
        let noun = if n == 1 { "review" } else { "reviews" };
        issues.push(issue_from(
            row,
            IssueType::NegativeReview,
            severity,
            format!("{n} negative {noun}"),
        ));
    }

    issues
}

fn issue_from(row: &OperationalMetricRow, issue_type: IssueType, severity: Severity, detail: String) -> RiskIssue {
    RiskIssue {
        product_id: row.product_id.clone(),
        product_title: row.product_title.clone(),
        issue_type,
        severity,
        detail,
        inventory_quantity: row.inventory_quantity,
        inventory_days: row.inventory_days,
        units_sold_7d: row.units_sold_7d,
        is_stockout: row.is_stockout,
        negative_review_count: row.negative_review_count,
        latest_negative_review_at: row.latest_negative_review_at.map(from_ns),
        latest_negative_review_excerpt: row.latest_negative_review_excerpt.clone(),
        latest_negative_review_url: row.latest_negative_review_url.clone(),
    }
}

struct Scored {
    snapshot_id: Option<i64>,
    captured_at: Option<DateTime<Utc>>,
    is_stale: bool,
    issues: Vec<RiskIssue>,
}

pub struct RiskScorer {
    pool: SqlitePool,
    thresholds: RiskThresholds,
}

impl RiskScorer {
    pub fn new(pool: SqlitePool, thresholds: RiskThresholds) -> Self {
        Self {
            pool,
            thresholds: thresholds.sanitized(),
        }
    }

    pub async fn summary(&self) -> Result<RiskSummary> {
        self.summary_at(Utc::now()).await
    }

    pub async fn summary_at(&self, now: DateTime<Utc>) -> Result<RiskSummary> {
        let scored = self.score_latest(now).await?;
        Ok(RiskSummary {
            snapshot_id: scored.snapshot_id,
            captured_at: scored.captured_at,
            is_stale: scored.is_stale,
            low_stock: CategoryStatus::tally(&scored.issues, IssueType::LowStock),
            negative_review: CategoryStatus::tally(&scored.issues, IssueType::NegativeReview),
            ad_waste: CategoryStatus::ad_waste(),
            total_issues: scored.issues.len(),
        })
    }

    pub async fn issues(&self, filter: &IssueFilter) -> Result<IssuePage> {
        self.issues_at(filter, Utc::now()).await
    }

    pub async fn issues_at(&self, filter: &IssueFilter, now: DateTime<Utc>) -> Result<IssuePage> {
        let scored = self.score_latest(now).await?;

        let mut matching: Vec<RiskIssue> = scored
            .issues
            .into_iter()
            .filter(|i| filter.matches(i))
            .collect();
        matching.sort_by(|a, b| {
            a.severity
                .cmp(&b.severity)
                .then_with(|| a.issue_type.cmp(&b.issue_type))
                .then_with(|| a.product_id.cmp(&b.product_id))
        });

        let total = matching.len();
        let page = filter.page();
        let page_size = filter.page_size();
        let offset = (page as usize - 1).saturating_mul(page_size as usize);
        let items = matching
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .collect();

        Ok(IssuePage {
            items,
            total,
            page,
            page_size,
            is_stale: scored.is_stale,
            captured_at: scored.captured_at,
            ad_waste: CategoryStatus::ad_waste(),
        })
    }

    async fn score_latest(&self, now: DateTime<Utc>) -> Result<Scored> {
        let Some(snapshot) = queries::latest_completed_operational_snapshot(&self.pool).await? else {
            debug!("no completed operational snapshot; risk results are empty");
            return Ok(Scored {
                snapshot_id: None,
                captured_at: None,
                is_stale: true,
                issues: Vec::new(),
            });
        };

        let captured_at = from_ns(snapshot.captured_at);
        let rows = queries::operational_metrics(&self.pool, snapshot.id).await?;
        let issues = rows
            .iter()
            .flat_map(|row| score_metric(row, &self.thresholds))
            .collect();

        Ok(Scored {
            snapshot_id: Some(snapshot.id),
            captured_at: Some(captured_at),
            is_stale: is_stale(captured_at, now, self.thresholds.data_stale_after),
            issues,
        })
    }
}
