use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::health::{HealthSnapshot, HealthState};
use crate::db::models::{SnapshotRow, TrendRow};
use crate::db::queries;
use crate::error::AppError;
use crate::risk::{IssueFilter, IssuePage, RiskScorer, RiskSummary};

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub scorer: Arc<RiskScorer>,
    pub health: Arc<HealthState>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/risk/summary", get(get_risk_summary))
        .route("/risk/issues", get(get_risk_issues))
        .route("/snapshots/recent", get(get_recent_snapshots))
        .route("/snapshots/:id/trends", get(get_snapshot_trends))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RecentSnapshotsQuery {
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub database_ok: bool,
    #[serde(flatten)]
    pub runs: HealthSnapshot,
}

#[derive(Serialize)]
pub struct SnapshotTrendsResponse {
    pub snapshot: SnapshotRow,
    pub trends: Vec<TrendRow>,
    /// Rows repeated by re-analysis of the same snapshot.
    pub duplicate_trends: i64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let database_ok = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    Json(HealthResponse {
        database_ok,
        runs: state.health.snapshot(),
    })
}

async fn get_risk_summary(State(state): State<ApiState>) -> Result<Json<RiskSummary>, AppError> {
    Ok(Json(state.scorer.summary().await?))
}

async fn get_risk_issues(
    State(state): State<ApiState>,
    Query(filter): Query<IssueFilter>,
) -> Result<Json<IssuePage>, AppError> {
    Ok(Json(state.scorer.issues(&filter).await?))
}

async fn get_recent_snapshots(
    State(state): State<ApiState>,
    Query(params): Query<RecentSnapshotsQuery>,
) -> Result<Json<Vec<SnapshotRow>>, AppError> {
    let limit = params.limit.unwrap_or(20).clamp(1, 500);
    Ok(Json(queries::recent_snapshots(&state.pool, limit).await?))
}

async fn get_snapshot_trends(
    State(state): State<ApiState>,
    Path(snapshot_id): Path<i64>,
) -> Result<Json<SnapshotTrendsResponse>, AppError> {
    let snapshot = queries::snapshot_by_id(&state.pool, snapshot_id)
        .await?
        .ok_or(AppError::SnapshotNotFound(snapshot_id))?;
    let trends = queries::trends_for_snapshot(&state.pool, snapshot_id).await?;
    let duplicate_trends = queries::duplicate_trend_count(&state.pool, snapshot_id).await?;

    Ok(Json(SnapshotTrendsResponse {
        snapshot,
        trends,
        duplicate_trends,
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::config::RiskThresholds;
    use crate::db::memory_pool;
    use crate::db::models::NewOperationalMetric;
    use crate::db::writer;
    use crate::types::{to_ns, SnapshotStatus};

    async fn state() -> ApiState {
        let pool = memory_pool().await;
        ApiState {
            pool: pool.clone(),
            scorer: Arc::new(RiskScorer::new(pool, RiskThresholds::default())),
            health: Arc::new(HealthState::new()),
        }
    }

    async fn seed_operational(pool: &sqlx::SqlitePool) {
        let ns = to_ns(Utc::now());
        let id = writer::insert_operational_snapshot(pool, ns, SnapshotStatus::Completed, None)
            .await
            .unwrap();
        let metrics = [
            NewOperationalMetric {
                product_id: "LOW".to_string(),
                inventory_days: Some(2.0),
                ..Default::default()
            },
            NewOperationalMetric {
                product_id: "REV".to_string(),
                negative_review_count: 4,
                ..Default::default()
            },
        ];
        for m in &metrics {
            writer::insert_operational_metric(pool, id, ns, m).await.unwrap();
        }
    }

    async fn get(state: ApiState, uri: &str) -> (StatusCode, String) {
        let res = router(state)
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn json(body: &str) -> Value {
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn issues_query_string_filters_by_type_and_severity() {
        let state = state().await;
        seed_operational(&state.pool).await;

        let (status, body) = get(state.clone(), "/risk/issues?issue_type=negative_review&severity=high").await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["total"], 1);
        assert_eq!(body["items"][0]["product_id"], "REV");
        assert_eq!(body["items"][0]["issue_type"], "negative_review");
        assert_eq!(body["is_stale"], false);

        let (status, body) = get(state, "/risk/issues?issue_type=ad_waste&severity=high").await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["total"], 0);
        assert_eq!(body["ad_waste"]["status"], "not_available");
    }

    #[tokio::test]
    async fn unknown_issue_type_is_a_bad_request() {
        let (status, _) = get(state().await, "/risk/issues?issue_type=shipping_delay").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_snapshot_trends_is_not_found() {
        let (status, body) = get(state().await, "/snapshots/999/trends").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("999"));
    }

    #[tokio::test]
    async fn health_reports_database_and_run_counters() {
        let (status, body) = get(state().await, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let body = json(&body);
        assert_eq!(body["database_ok"], true);
        assert_eq!(body["runs_in_flight"], 0);
    }
}
