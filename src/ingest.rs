use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::db::models::CategoryRow;
use crate::db::{queries, writer};
use crate::error::{AppError, Result};
use crate::source::ListingSource;
use crate::types::{to_ns, ListingEntry, ListingType, SnapshotStatus};

/// Records one capture of a category view: a snapshot row, product upserts and
/// one data point per ranked entry.
///
/// The snapshot row is created in `running` state before the fetch so failed
/// attempts stay visible. Product upserts, data points and the `completed`
/// status are committed in a single transaction.
pub struct SnapshotIngestor {
    pool: SqlitePool,
    source: Arc<dyn ListingSource>,
}

impl SnapshotIngestor {
    pub fn new(pool: SqlitePool, source: Arc<dyn ListingSource>) -> Self {
        Self { pool, source }
    }

    pub async fn capture_snapshot(
        &self,
        category_id: i64,
        listing_type: ListingType,
        cancel: &CancellationToken,
    ) -> Result<i64> {
        self.capture_at(category_id, listing_type, Utc::now(), cancel).await
    }

    /// Same as [`capture_snapshot`](Self::capture_snapshot) with an explicit capture time.
    pub async fn capture_at(
        &self,
        category_id: i64,
        listing_type: ListingType,
        captured_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<i64> {
        let category = queries::category_by_id(&self.pool, category_id)
            .await?
            .ok_or(AppError::CategoryNotFound(category_id))?;

        let captured_ns = to_ns(captured_at);
        let snapshot_id = writer::insert_snapshot(
            &self.pool,
            captured_ns,
            category.id,
            listing_type,
            SnapshotStatus::Running,
        )
        .await?;

        info!(
            snapshot_id,
            category = %category.external_id,
            listing_type = %listing_type,
            "Snapshot {snapshot_id} started for {}/{listing_type}",
            category.external_id,
        );

        match self
            .fetch_and_persist(&category, listing_type, snapshot_id, captured_ns, cancel)
            .await
        {
            Ok(count) => {
                info!(
                    snapshot_id,
                    category = %category.external_id,
                    listing_type = %listing_type,
                    data_points = count,
                    "Snapshot {snapshot_id} completed with {count} data points",
                );
                Ok(snapshot_id)
            }
            Err(e) => {
                let message = e.to_string();
                error!(
                    snapshot_id,
                    category = %category.external_id,
                    listing_type = %listing_type,
                    error = %message,
                    "Snapshot {snapshot_id} failed: {message}",
                );
                if let Err(mark_err) = writer::set_snapshot_status(
                    &self.pool,
                    snapshot_id,
                    SnapshotStatus::Failed,
                    Some(&message),
                )
                .await
                {
                    error!(snapshot_id, "could not mark snapshot failed: {mark_err}");
                }
                Err(e)
            }
        }
    }

    async fn fetch_and_persist(
        &self,
        category: &CategoryRow,
        listing_type: ListingType,
        snapshot_id: i64,
        captured_ns: i64,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let raw = self
            .source
            .fetch(&category.external_id, listing_type, cancel)
            .await?;
        let raw_count = raw.len();
        let entries = normalize_entries(raw);

        if entries.is_empty() {
            warn!(
                snapshot_id,
                category = %category.external_id,
                listing_type = %listing_type,
                raw_entries = raw_count,
                "Listing source returned no usable entries; completing snapshot {snapshot_id} empty",
            );
        } else if entries.len() < raw_count {
            warn!(
                snapshot_id,
                dropped = raw_count - entries.len(),
                "dropped invalid or duplicate listing entries",
            );
        }

        let now = to_ns(Utc::now());
        let mut tx = self.pool.begin().await?;
        for entry in &entries {
            writer::upsert_product(&mut *tx, entry, category.id, now).await?;
            writer::insert_data_point(&mut *tx, snapshot_id, captured_ns, entry).await?;
        }
        writer::set_snapshot_status(&mut *tx, snapshot_id, SnapshotStatus::Completed, None).await?;
        tx.commit().await?;

        Ok(entries.len())
    }
}

/// Drops entries that cannot be stored (blank identifier or title, non-positive rank)
/// and collapses repeated identifiers onto their best rank. Output is ordered by rank.
pub fn normalize_entries(entries: Vec<ListingEntry>) -> Vec<ListingEntry> {
    let mut best: HashMap<String, ListingEntry> = HashMap::new();
    for mut entry in entries {
        entry.identifier = entry.identifier.trim().to_string();
        entry.title = entry.title.trim().to_string();
        if entry.identifier.is_empty() || entry.title.is_empty() || entry.rank < 1 {
            continue;
        }
        match best.get(&entry.identifier) {
            Some(existing) if existing.rank <= entry.rank => {}
            _ => {
                best.insert(entry.identifier.clone(), entry);
            }
        }
    }
    let mut out: Vec<ListingEntry> = best.into_values().collect();
    out.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.identifier.cmp(&b.identifier)));
    out
}
