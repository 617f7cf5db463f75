//! Write helpers. Each takes any SQLite executor so callers can run it on the
//! pool directly or inside a transaction (`&mut *tx`).

use sqlx::SqliteExecutor;

#[cfg(test)]
use crate::db::models::NewOperationalMetric;
use crate::error::Result;
use crate::types::{ListingEntry, ListingType, SnapshotStatus, TrendKind};

#[cfg(test)]
pub async fn insert_category<'e, E>(
    exec: E,
    name: &str,
    external_id: &str,
    parent_id: Option<i64>,
) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let done = sqlx::query("INSERT INTO categories (name, external_id, parent_id) VALUES (?, ?, ?)")
        .bind(name)
        .bind(external_id)
        .bind(parent_id)
        .execute(exec)
        .await?;
    Ok(done.last_insert_rowid())
}

/// Inserts a category keyed by external id unless one already exists. Returns rows inserted.
pub async fn insert_category_if_missing<'e, E>(exec: E, name: &str, external_id: &str) -> Result<u64>
where
    E: SqliteExecutor<'e>,
{
    let done = sqlx::query("INSERT OR IGNORE INTO categories (name, external_id) VALUES (?, ?)")
        .bind(name)
        .bind(external_id)
        .execute(exec)
        .await?;
    Ok(done.rows_affected())
}

pub async fn insert_snapshot<'e, E>(
    exec: E,
    captured_at: i64,
    category_id: i64,
    listing_type: ListingType,
    status: SnapshotStatus,
) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let done = sqlx::query(
        "INSERT INTO snapshots (captured_at, category_id, listing_type, status) VALUES (?, ?, ?, ?)",
    )
    .bind(captured_at)
    .bind(category_id)
    .bind(listing_type.as_str())
    .bind(status.as_str())
    .execute(exec)
    .await?;
    Ok(done.last_insert_rowid())
}

pub async fn set_snapshot_status<'e, E>(
    exec: E,
    snapshot_id: i64,
    status: SnapshotStatus,
    error: Option<&str>,
) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query("UPDATE snapshots SET status = ?, error = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(error)
        .bind(snapshot_id)
        .execute(exec)
        .await?;
    Ok(())
}

/// Creates the product on first sighting, otherwise refreshes its mutable fields.
/// A missing brand/image/listing date on a later sighting keeps the stored value.
pub async fn upsert_product<'e, E>(
    exec: E,
    entry: &ListingEntry,
    category_id: i64,
    now: i64,
) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO products (id, title, brand, category_id, listing_date, image_url, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            brand = COALESCE(excluded.brand, products.brand),
            listing_date = COALESCE(excluded.listing_date, products.listing_date),
            image_url = COALESCE(excluded.image_url, products.image_url),
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&entry.identifier)
    .bind(&entry.title)
    .bind(&entry.brand)
    .bind(category_id)
    .bind(&entry.listing_date)
    .bind(&entry.image_url)
    .bind(now)
    .bind(now)
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn insert_data_point<'e, E>(
    exec: E,
    snapshot_id: i64,
    captured_at: i64,
    entry: &ListingEntry,
) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let done = sqlx::query(
        r#"
        INSERT INTO product_data_points (
            product_id, snapshot_id, captured_at, rank, price, rating, review_count
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.identifier)
    .bind(snapshot_id)
    .bind(captured_at)
    .bind(entry.rank)
    .bind(entry.price)
    .bind(entry.rating)
    .bind(entry.review_count)
    .execute(exec)
    .await?;
    Ok(done.last_insert_rowid())
}

/// Key identifying one (product, snapshot, kind) signal; repeated keys mean re-analysis.
pub fn trend_dedup_key(product_id: &str, snapshot_id: i64, kind: TrendKind) -> String {
    format!("{product_id}:{snapshot_id}:{kind}")
}

pub async fn insert_trend<'e, E>(
    exec: E,
    product_id: &str,
    snapshot_id: i64,
    kind: TrendKind,
    description: &str,
    recorded_at: i64,
) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let dedup_key = trend_dedup_key(product_id, snapshot_id, kind);
    let done = sqlx::query(
        r#"
        INSERT INTO trends (product_id, snapshot_id, kind, description, recorded_at, dedup_key)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(product_id)
    .bind(snapshot_id)
    .bind(kind.as_str())
    .bind(description)
    .bind(recorded_at)
    .bind(dedup_key)
    .execute(exec)
    .await?;
    Ok(done.last_insert_rowid())
}

#[cfg(test)]
pub async fn insert_operational_snapshot<'e, E>(
    exec: E,
    captured_at: i64,
    status: SnapshotStatus,
    error: Option<&str>,
) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let done = sqlx::query(
        "INSERT INTO operational_snapshots (captured_at, status, error) VALUES (?, ?, ?)",
    )
    .bind(captured_at)
    .bind(status.as_str())
    .bind(error)
    .execute(exec)
    .await?;
    Ok(done.last_insert_rowid())
}

#[cfg(test)]
pub async fn insert_operational_metric<'e, E>(
    exec: E,
    operational_snapshot_id: i64,
    captured_at: i64,
    m: &NewOperationalMetric,
) -> Result<i64>
where
    E: SqliteExecutor<'e>,
{
    let done = sqlx::query(
        r#"
        INSERT INTO product_operational_metrics (
            operational_snapshot_id, product_id, captured_at,
            inventory_quantity, inventory_days, units_sold_7d, is_stockout,
            negative_review_count, latest_negative_review_at,
            latest_negative_review_excerpt, latest_negative_review_url,
            buy_box_price
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(operational_snapshot_id)
    .bind(&m.product_id)
    .bind(captured_at)
    .bind(m.inventory_quantity)
    .bind(m.inventory_days)
    .bind(m.units_sold_7d)
    .bind(m.is_stockout)
    .bind(m.negative_review_count)
    .bind(m.latest_negative_review_at)
    .bind(&m.latest_negative_review_excerpt)
    .bind(&m.latest_negative_review_url)
    .bind(m.buy_box_price)
    .execute(exec)
    .await?;
    Ok(done.last_insert_rowid())
}
