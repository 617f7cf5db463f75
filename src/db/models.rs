//! Database row types matching `migrations/0001_initial.sql`.
//! Timestamps are nanosecond epochs; use `types::from_ns` to convert.

use serde::Serialize;

use crate::error::Result;
use crate::types::{ListingType, SnapshotStatus};

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct CategoryRow {
    pub id: i64,
    pub name: String,
    pub external_id: String,
    pub parent_id: Option<i64>,
}

#[cfg(test)]
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ProductRow {
    pub id: String,
    pub title: String,
    pub brand: Option<String>,
    pub category_id: i64,
    pub listing_date: Option<String>,
    pub image_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct SnapshotRow {
    pub id: i64,
    pub captured_at: i64,
    pub category_id: i64,
    pub listing_type: String,
    pub status: String,
    pub error: Option<String>,
}

impl SnapshotRow {
    pub fn status(&self) -> Result<SnapshotStatus> {
        self.status.parse()
    }

    pub fn listing_type(&self) -> Result<ListingType> {
        self.listing_type.parse()
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct DataPointRow {
    pub id: i64,
    pub product_id: String,
    pub snapshot_id: i64,
    pub captured_at: i64,
    pub rank: i64,
    pub price: Option<f64>,
    pub rating: Option<f64>,
    pub review_count: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TrendRow {
    pub id: i64,
    pub product_id: String,
    pub snapshot_id: i64,
    pub kind: String,
    pub description: String,
    pub recorded_at: i64,
    pub dedup_key: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct OperationalSnapshotRow {
    pub id: i64,
    pub captured_at: i64,
    pub status: String,
    pub error: Option<String>,
}

/// A metric row joined with the catalog title of its product (if known).
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct OperationalMetricRow {
    pub id: i64,
    pub operational_snapshot_id: i64,
    pub product_id: String,
    pub captured_at: i64,
    pub inventory_quantity: Option<i64>,
    pub inventory_days: Option<f64>,
    pub units_sold_7d: Option<i64>,
    pub is_stockout: Option<bool>,
    pub negative_review_count: i64,
    pub latest_negative_review_at: Option<i64>,
    pub latest_negative_review_excerpt: Option<String>,
    pub latest_negative_review_url: Option<String>,
    pub buy_box_price: Option<f64>,
    pub product_title: Option<String>,
}

/// Input shape for recording one product's operational metrics.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct NewOperationalMetric {
    pub product_id: String,
    pub inventory_quantity: Option<i64>,
    pub inventory_days: Option<f64>,
    pub units_sold_7d: Option<i64>,
    pub is_stockout: Option<bool>,
    pub negative_review_count: i64,
    pub latest_negative_review_at: Option<i64>,
    pub latest_negative_review_excerpt: Option<String>,
    pub latest_negative_review_url: Option<String>,
    pub buy_box_price: Option<f64>,
}
