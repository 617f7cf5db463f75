use chrono::Utc;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TOP_BAND_RANK;
use crate::db::{queries, writer};
use crate::error::{AppError, Result};
use crate::types::{to_ns, SnapshotStatus, TrendKind};

/// Classify the move from a previous rank `prev` to the current rank `cur`
/// (lower is better). Kinds are independent and may all fire at once.
pub fn classify_rank_change(prev: i64, cur: i64) -> Vec<TrendKind> {
    let mut kinds = Vec::with_capacity(3);
    if cur < prev {
        kinds.push(TrendKind::RankSurge);
    }
    if prev > TOP_BAND_RANK && cur <= TOP_BAND_RANK {
        kinds.push(TrendKind::NewEntry);
    }
    if prev <= TOP_BAND_RANK && cur <= TOP_BAND_RANK {
        kinds.push(TrendKind::ConsistentPerformer);
    }
    kinds
}

pub fn describe(kind: TrendKind, prev: i64, cur: i64) -> String {
    match kind {
        TrendKind::RankSurge => {
            let gain = prev - cur;
            let noun = if gain == 1 { "position" } else { "positions" };
            format!("Rank improved by {gain} {noun} (#{prev} → #{cur})")
        }
        TrendKind::NewEntry => {
            format!("Entered the top {TOP_BAND_RANK} (#{prev} → #{cur})")
        }
        TrendKind::ConsistentPerformer => {
            format!("Held a top {TOP_BAND_RANK} position (#{prev} → #{cur})")
        }
    }
}

/// Derives trend rows for a completed snapshot by comparing each product's data
/// point with its prior one in the same category + listing type.
pub struct TrendAnalyzer {
    pool: SqlitePool,
}

impl TrendAnalyzer {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns the number of trend rows written. Not idempotent: a second call for
    /// the same snapshot writes the same rows again (detectable via dedup keys).
    pub async fn analyze_snapshot(&self, snapshot_id: i64, cancel: &CancellationToken) -> Result<usize> {
        let snapshot = queries::snapshot_by_id(&self.pool, snapshot_id)
            .await?
            .ok_or(AppError::SnapshotNotFound(snapshot_id))?;

        let status = snapshot.status()?;
        if status != SnapshotStatus::Completed {
            return Err(AppError::SnapshotNotCompleted {
                id: snapshot_id,
                status: status.to_string(),
            });
        }
        let listing_type = snapshot.listing_type()?;

        let existing = queries::trend_count_for_snapshot(&self.pool, snapshot_id).await?;
        if existing > 0 {
            warn!(
                snapshot_id,
                existing_trends = existing,
                "Snapshot {snapshot_id} was already analyzed; trends will be written again",
            );
        }

        let points = queries::data_points_for_snapshot(&self.pool, snapshot_id).await?;
        let recorded_at = to_ns(Utc::now());
        let mut pending: Vec<(String, TrendKind, String)> = Vec::new();
        let mut skipped = 0usize;

        for point in &points {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            let previous = queries::previous_data_point(
                &self.pool,
                &point.product_id,
                snapshot.category_id,
                listing_type,
                snapshot.captured_at,
            )
            .await?;

            let Some(previous) = previous else {
                skipped += 1;
                continue;
            };

            for kind in classify_rank_change(previous.rank, point.rank) {
                pending.push((
                    point.product_id.clone(),
                    kind,
                    describe(kind, previous.rank, point.rank),
                ));
            }
        }

        debug!(snapshot_id, skipped, "products without a prior observation");

        let mut tx = self.pool.begin().await?;
        for (product_id, kind, description) in &pending {
            writer::insert_trend(&mut *tx, product_id, snapshot_id, *kind, description, recorded_at).await?;
        }
        tx.commit().await?;

        info!(
            snapshot_id,
            listing_type = %listing_type,
            data_points = points.len(),
            trends = pending.len(),
            "Snapshot {snapshot_id} analyzed: {} trends from {} data points",
            pending.len(),
            points.len(),
        );
        Ok(pending.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, TimeZone};

    use super::*;
    use crate::db::memory_pool;
    use crate::ingest::tests::seed_category;
    use crate::ingest::SnapshotIngestor;
    use crate::source::testing::{entry, StaticListingSource};
    use crate::types::ListingType;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    struct Harness {
        pool: SqlitePool,
        source: Arc<StaticListingSource>,
        ingestor: SnapshotIngestor,
        analyzer: TrendAnalyzer,
        category_id: i64,
    }

    impl Harness {
        async fn new() -> Self {
            let pool = memory_pool().await;
            let category_id = seed_category(&pool, "electronics").await;
            let source = Arc::new(StaticListingSource::new());
            Self {
                ingestor: SnapshotIngestor::new(pool.clone(), source.clone()),
                analyzer: TrendAnalyzer::new(pool.clone()),
                pool,
                source,
                category_id,
            }
        }

        async fn capture(&self, listing_type: ListingType, hours: i64, ranks: &[(&str, i64)]) -> i64 {
            self.source
                .push_ok(ranks.iter().map(|(id, rank)| entry(id, *rank)).collect());
            self.ingestor
                .capture_at(
                    self.category_id,
                    listing_type,
                    t0() + Duration::hours(hours),
                    &CancellationToken::new(),
                )
                .await
                .unwrap()
        }

        async fn analyze(&self, snapshot_id: i64) -> usize {
            self.analyzer
                .analyze_snapshot(snapshot_id, &CancellationToken::new())
                .await
                .unwrap()
        }

        async fn kinds(&self, snapshot_id: i64, product_id: &str) -> Vec<String> {
            let mut kinds: Vec<String> = queries::trends_for_snapshot(&self.pool, snapshot_id)
                .await
                .unwrap()
                .into_iter()
                .filter(|t| t.product_id == product_id)
                .map(|t| t.kind)
                .collect();
            kinds.sort();
            kinds
        }
    }

    #[test]
    fn rank_change_rules() {
        assert_eq!(
            classify_rank_change(150, 80),
            vec![TrendKind::RankSurge, TrendKind::NewEntry]
        );
        assert_eq!(classify_rank_change(40, 55), vec![TrendKind::ConsistentPerformer]);
        assert_eq!(
            classify_rank_change(40, 10),
            vec![TrendKind::RankSurge, TrendKind::ConsistentPerformer]
        );
        assert_eq!(classify_rank_change(300, 250), vec![TrendKind::RankSurge]);
        assert!(classify_rank_change(80, 150).is_empty());
        assert!(classify_rank_change(200, 200).is_empty());
        // band edges are inclusive
        assert_eq!(
            classify_rank_change(101, 100),
            vec![TrendKind::RankSurge, TrendKind::NewEntry]
        );
        assert_eq!(classify_rank_change(100, 100), vec![TrendKind::ConsistentPerformer]);
    }

    #[test]
    fn rank_change_rules_hold_over_a_grid() {
        for prev in [1, 50, 99, 100, 101, 150, 500] {
            for cur in [1, 50, 99, 100, 101, 150, 500] {
                let kinds = classify_rank_change(prev, cur);
                assert_eq!(kinds.contains(&TrendKind::RankSurge), cur < prev);
                assert_eq!(kinds.contains(&TrendKind::NewEntry), prev > 100 && cur <= 100);
                assert_eq!(kinds.contains(&TrendKind::ConsistentPerformer), prev <= 100 && cur <= 100);
            }
        }
    }

    #[test]
    fn descriptions_state_the_move() {
        assert_eq!(
            describe(TrendKind::RankSurge, 150, 80),
            "Rank improved by 70 positions (#150 → #80)"
        );
        assert_eq!(describe(TrendKind::RankSurge, 2, 1), "Rank improved by 1 position (#2 → #1)");
        assert!(describe(TrendKind::NewEntry, 150, 80).contains("top 100"));
    }

    #[tokio::test]
    async fn surge_into_top_band_emits_surge_and_new_entry() {
        let h = Harness::new().await;
        let first = h.capture(ListingType::BestSellers, 0, &[("P1", 150)]).await;
        assert_eq!(h.analyze(first).await, 0);

        let second = h.capture(ListingType::BestSellers, 24, &[("P1", 80)]).await;
        assert_eq!(h.analyze(second).await, 2);
        assert_eq!(h.kinds(second, "P1").await, vec!["new_entry", "rank_surge"]);
    }

    #[tokio::test]
    async fn slipping_inside_band_is_consistent_only() {
        let h = Harness::new().await;
        h.capture(ListingType::BestSellers, 0, &[("P1", 40)]).await;
        let second = h.capture(ListingType::BestSellers, 24, &[("P1", 55)]).await;
        assert_eq!(h.analyze(second).await, 1);
        assert_eq!(h.kinds(second, "P1").await, vec!["consistent_performer"]);
    }

    #[tokio::test]
    async fn compares_with_latest_prior_point_only() {
        let h = Harness::new().await;
        h.capture(ListingType::BestSellers, 0, &[("P1", 500)]).await;
        h.capture(ListingType::BestSellers, 12, &[("P1", 90)]).await;
        let third = h.capture(ListingType::BestSellers, 24, &[("P1", 95)]).await;
        h.analyze(third).await;
        // 90 → 95, not 500 → 95
        assert_eq!(h.kinds(third, "P1").await, vec!["consistent_performer"]);
    }

    #[tokio::test]
    async fn first_sighting_is_skipped() {
        let h = Harness::new().await;
        h.capture(ListingType::BestSellers, 0, &[("P1", 10)]).await;
        let second = h.capture(ListingType::BestSellers, 24, &[("P1", 5), ("P2", 1)]).await;
        h.analyze(second).await;
        assert!(h.kinds(second, "P2").await.is_empty());
        assert_eq!(h.kinds(second, "P1").await.len(), 2);
    }

    #[tokio::test]
    async fn lineages_do_not_mix_listing_types() {
        let h = Harness::new().await;
        h.capture(ListingType::NewReleases, 0, &[("P1", 150)]).await;
        let best = h.capture(ListingType::BestSellers, 24, &[("P1", 80)]).await;
        assert_eq!(h.analyze(best).await, 0);
    }

    #[tokio::test]
    async fn failed_snapshots_are_not_prior_points() {
        let h = Harness::new().await;
        h.capture(ListingType::BestSellers, 0, &[("P1", 150)]).await;
        h.source.push_err("timeout");
        let _ = h
            .ingestor
            .capture_at(
                h.category_id,
                ListingType::BestSellers,
                t0() + Duration::hours(6),
                &CancellationToken::new(),
            )
            .await;
        let third = h.capture(ListingType::BestSellers, 24, &[("P1", 80)]).await;
        assert_eq!(h.analyze(third).await, 2);
    }

    #[tokio::test]
    async fn empty_snapshot_analyzes_to_zero_trends() {
        let h = Harness::new().await;
        h.capture(ListingType::BestSellers, 0, &[("P1", 3)]).await;
        let empty = h.capture(ListingType::BestSellers, 24, &[]).await;
        assert_eq!(h.analyze(empty).await, 0);
        assert_eq!(queries::trend_count_for_snapshot(&h.pool, empty).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reanalysis_duplicates_are_detectable() {
        let h = Harness::new().await;
        h.capture(ListingType::BestSellers, 0, &[("P1", 150)]).await;
        let second = h.capture(ListingType::BestSellers, 24, &[("P1", 80)]).await;
        assert_eq!(h.analyze(second).await, 2);
        assert_eq!(queries::duplicate_trend_count(&h.pool, second).await.unwrap(), 0);

        assert_eq!(h.analyze(second).await, 2);
        assert_eq!(queries::trend_count_for_snapshot(&h.pool, second).await.unwrap(), 4);
        assert_eq!(queries::duplicate_trend_count(&h.pool, second).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn missing_or_unfinished_snapshots_are_rejected() {
        let h = Harness::new().await;
        let err = h
            .analyzer
            .analyze_snapshot(999, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SnapshotNotFound(999)));

        let running = writer::insert_snapshot(
            &h.pool,
            to_ns(t0()),
            h.category_id,
            ListingType::BestSellers,
            SnapshotStatus::Running,
        )
        .await
        .unwrap();
        let err = h
            .analyzer
            .analyze_snapshot(running, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::SnapshotNotCompleted { .. }));
    }
}
