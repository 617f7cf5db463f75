//! Read helpers. The trend analyzer and risk scorer load exactly the rows they need
//! through these instead of walking object graphs.

use sqlx::SqliteExecutor;

#[cfg(test)]
use crate::db::models::ProductRow;
use crate::db::models::{
    CategoryRow, DataPointRow, OperationalMetricRow, OperationalSnapshotRow, SnapshotRow, TrendRow,
};
use crate::error::Result;
use crate::types::{ListingType, SnapshotStatus};

pub async fn category_by_id<'e, E>(exec: E, id: i64) -> Result<Option<CategoryRow>>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query_as::<_, CategoryRow>(
        "SELECT id, name, external_id, parent_id FROM categories WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(exec)
    .await?;
    Ok(row)
}

pub async fn category_by_external_id<'e, E>(exec: E, external_id: &str) -> Result<Option<CategoryRow>>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query_as::<_, CategoryRow>(
        "SELECT id, name, external_id, parent_id FROM categories WHERE external_id = ?",
    )
    .bind(external_id)
    .fetch_optional(exec)
    .await?;
    Ok(row)
}

#[cfg(test)]
pub async fn product_by_id<'e, E>(exec: E, id: &str) -> Result<Option<ProductRow>>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query_as::<_, ProductRow>(
        r#"
        SELECT id, title, brand, category_id, listing_date, image_url, created_at, updated_at
        FROM products WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(exec)
    .await?;
    Ok(row)
}

pub async fn snapshot_by_id<'e, E>(exec: E, id: i64) -> Result<Option<SnapshotRow>>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query_as::<_, SnapshotRow>(
        "SELECT id, captured_at, category_id, listing_type, status, error FROM snapshots WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(exec)
    .await?;
    Ok(row)
}

pub async fn recent_snapshots<'e, E>(exec: E, limit: i64) -> Result<Vec<SnapshotRow>>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query_as::<_, SnapshotRow>(
        r#"
        SELECT id, captured_at, category_id, listing_type, status, error
        FROM snapshots
        ORDER BY captured_at DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(exec)
    .await?;
    Ok(rows)
}

pub async fn data_points_for_snapshot<'e, E>(exec: E, snapshot_id: i64) -> Result<Vec<DataPointRow>>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query_as::<_, DataPointRow>(
        r#"
        SELECT id, product_id, snapshot_id, captured_at, rank, price, rating, review_count
        FROM product_data_points
        WHERE snapshot_id = ?
        ORDER BY rank ASC, id ASC
        "#,
    )
    .bind(snapshot_id)
    .fetch_all(exec)
    .await?;
    Ok(rows)
}

/// The product's latest data point captured strictly before `before`, restricted to
/// completed snapshots of the same category + listing type.
pub async fn previous_data_point<'e, E>(
    exec: E,
    product_id: &str,
    category_id: i64,
    listing_type: ListingType,
    before: i64,
) -> Result<Option<DataPointRow>>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query_as::<_, DataPointRow>(
        r#"
        SELECT dp.id, dp.product_id, dp.snapshot_id, dp.captured_at, dp.rank,
               dp.price, dp.rating, dp.review_count
        FROM product_data_points dp
        JOIN snapshots s ON s.id = dp.snapshot_id
        WHERE dp.product_id = ?
          AND s.category_id = ?
          AND s.listing_type = ?
          AND s.status = ?
          AND dp.captured_at < ?
        ORDER BY dp.captured_at DESC, dp.id DESC
        LIMIT 1
        "#,
    )
    .bind(product_id)
    .bind(category_id)
    .bind(listing_type.as_str())
    .bind(SnapshotStatus::Completed.as_str())
    .bind(before)
    .fetch_optional(exec)
    .await?;
    Ok(row)
}

pub async fn trends_for_snapshot<'e, E>(exec: E, snapshot_id: i64) -> Result<Vec<TrendRow>>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query_as::<_, TrendRow>(
        r#"
        SELECT id, product_id, snapshot_id, kind, description, recorded_at, dedup_key
        FROM trends
        WHERE snapshot_id = ?
        ORDER BY id ASC
        "#,
    )
    .bind(snapshot_id)
    .fetch_all(exec)
    .await?;
    Ok(rows)
}

pub async fn trend_count_for_snapshot<'e, E>(exec: E, snapshot_id: i64) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trends WHERE snapshot_id = ?")
        .bind(snapshot_id)
        .fetch_one(exec)
        .await?;
    Ok(n)
}

/// Number of surplus trend rows for a snapshot, i.e. rows whose dedup key was
/// already written by an earlier analysis of the same snapshot.
pub async fn duplicate_trend_count<'e, E>(exec: E, snapshot_id: i64) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let n: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) - COUNT(DISTINCT dedup_key) FROM trends WHERE snapshot_id = ?",
    )
    .bind(snapshot_id)
    .fetch_one(exec)
    .await?;
    Ok(n)
}

pub async fn latest_completed_operational_snapshot<'e, E>(
    exec: E,
) -> Result<Option<OperationalSnapshotRow>>
where
    E: SqliteExecutor<'e>,
{
    let row = sqlx::query_as::<_, OperationalSnapshotRow>(
        r#"
        SELECT id, captured_at, status, error
        FROM operational_snapshots
        WHERE status = ?
        ORDER BY captured_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(SnapshotStatus::Completed.as_str())
    .fetch_optional(exec)
    .await?;
    Ok(row)
}

pub async fn operational_metrics<'e, E>(
    exec: E,
    operational_snapshot_id: i64,
) -> Result<Vec<OperationalMetricRow>>
where
    E: SqliteExecutor<'e>,
{
    let rows = sqlx::query_as::<_, OperationalMetricRow>(
        r#"
        SELECT m.id, m.operational_snapshot_id, m.product_id, m.captured_at,
               m.inventory_quantity, m.inventory_days, m.units_sold_7d, m.is_stockout,
               m.negative_review_count, m.latest_negative_review_at,
               m.latest_negative_review_excerpt, m.latest_negative_review_url,
               m.buy_box_price, p.title AS product_title
        FROM product_operational_metrics m
        LEFT JOIN products p ON p.id = m.product_id
        WHERE m.operational_snapshot_id = ?
        ORDER BY m.product_id ASC
        "#,
    )
    .bind(operational_snapshot_id)
    .fetch_all(exec)
    .await?;
    Ok(rows)
}
