use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Nanoseconds since the Unix epoch. Every persisted timestamp uses this encoding.
pub fn to_ns(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

pub fn from_ns(ns: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(ns)
}

// ---------------------------------------------------------------------------
// Listing type
// ---------------------------------------------------------------------------

/// Which ranked view of a category is captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingType {
    BestSellers,
    NewReleases,
    MoversAndShakers,
}

impl ListingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingType::BestSellers => "best_sellers",
            ListingType::NewReleases => "new_releases",
            ListingType::MoversAndShakers => "movers_and_shakers",
        }
    }

    /// Path segment of the marketplace page for this view.
    pub fn url_path(&self) -> &'static str {
        match self {
            ListingType::BestSellers => "bestsellers",
            ListingType::NewReleases => "new-releases",
            ListingType::MoversAndShakers => "movers-and-shakers",
        }
    }
}

impl std::fmt::Display for ListingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ListingType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "best_sellers" | "bestsellers" => Ok(ListingType::BestSellers),
            "new_releases" => Ok(ListingType::NewReleases),
            "movers_and_shakers" | "movers" => Ok(ListingType::MoversAndShakers),
            other => Err(AppError::InvalidInput(format!("unknown listing type '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Running,
    Completed,
    Failed,
}

impl SnapshotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotStatus::Running => "running",
            SnapshotStatus::Completed => "completed",
            SnapshotStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SnapshotStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(SnapshotStatus::Running),
            "completed" => Ok(SnapshotStatus::Completed),
            "failed" => Ok(SnapshotStatus::Failed),
            other => Err(AppError::InvalidInput(format!("unknown snapshot status '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Trend kinds
// ---------------------------------------------------------------------------

/// Kinds are independent: one (product, snapshot) pair may carry several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendKind {
    /// Rank improved (current < previous).
    RankSurge,
    /// Crossed from outside the top band into it.
    NewEntry,
    /// Both observations inside the top band.
    ConsistentPerformer,
}

impl TrendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendKind::RankSurge => "rank_surge",
            TrendKind::NewEntry => "new_entry",
            TrendKind::ConsistentPerformer => "consistent_performer",
        }
    }
}

impl std::fmt::Display for TrendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Risk classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    LowStock,
    NegativeReview,
    /// Present in the response shape; no computation exists behind it.
    AdWaste,
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IssueType::LowStock => "low_stock",
            IssueType::NegativeReview => "negative_review",
            IssueType::AdWaste => "ad_waste",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for IssueType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low_stock" => Ok(IssueType::LowStock),
            "negative_review" => Ok(IssueType::NegativeReview),
            "ad_waste" => Ok(IssueType::AdWaste),
            other => Err(AppError::InvalidInput(format!("unknown issue type '{other}'"))),
        }
    }
}

/// Ordered so that `High` sorts before `Medium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::High => write!(f, "high"),
            Severity::Medium => write!(f, "medium"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            other => Err(AppError::InvalidInput(format!("unknown severity '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Listing entries: produced by a ListingSource, consumed by the ingestor
// ---------------------------------------------------------------------------

/// One ranked item as scraped from a listing page. Optional fields stay
/// optional all the way into storage: unknown is not zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingEntry {
    /// Marketplace's stable item identifier.
    pub identifier: String,
    pub title: String,
    pub brand: Option<String>,
    pub image_url: Option<String>,
    /// 1 = best.
    pub rank: i64,
    pub price: Option<f64>,
    pub rating: Option<f64>,
    pub review_count: Option<i64>,
    pub listing_date: Option<String>,
}

#[cfg(test)]
impl ListingEntry {
    pub fn new(identifier: impl Into<String>, title: impl Into<String>, rank: i64) -> Self {
        Self {
            identifier: identifier.into(),
            title: title.into(),
            brand: None,
            image_url: None,
            rank,
            price: None,
            rating: None,
            review_count: None,
            listing_date: None,
        }
    }
}
