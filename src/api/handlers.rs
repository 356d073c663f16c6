//! Admin endpoint handlers.
//!
//! Every handler reports its outcome through the response envelope; a
//! failing store or rollup maps to a 500 with the error message, never a
//! panic or process exit.

use axum::extract::{Query, State};
use axum::response::Response;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::backfill;
use crate::engine::AggregationEngine;
use crate::rollup::RollupStage;

use super::envelope::{ApiErrorResponse, ApiResponse};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<AggregationEngine>,
}

// ============================================================================
// Health
// ============================================================================

/// GET /api/v1/health
pub async fn health(State(state): State<ApiState>) -> Response {
    let engine = &state.engine;
    match engine.store().stats() {
        Ok(stats) => ApiResponse::ok(serde_json::json!({
            "status": "healthy",
            "backend": engine.store().backend_name(),
            "live_buckets": engine.live_bucket_count(),
            "subscribers": engine.events().subscriber_count(),
            "records": stats,
        })),
        Err(e) => ApiErrorResponse::internal(format!("store stats unavailable: {e}")),
    }
}

// ============================================================================
// Rollup trigger
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RollupQuery {
    /// RFC 3339 timestamp inside the interval to roll up. Defaults to the
    /// most recently completed interval.
    pub interval: Option<DateTime<Utc>>,
}

/// POST /api/v1/admin/rollup/ten-minute
pub async fn trigger_ten_minute_rollup(
    State(state): State<ApiState>,
    Query(query): Query<RollupQuery>,
) -> Response {
    run_rollup(&state, RollupStage::TenMinute, query.interval)
}

/// POST /api/v1/admin/rollup/hourly
pub async fn trigger_hourly_rollup(
    State(state): State<ApiState>,
    Query(query): Query<RollupQuery>,
) -> Response {
    run_rollup(&state, RollupStage::Hourly, query.interval)
}

fn run_rollup(state: &ApiState, stage: RollupStage, interval: Option<DateTime<Utc>>) -> Response {
    let resolution = stage.resolution();
    let interval_start = match interval {
        Some(ts) => resolution.align(ts),
        None => resolution.align(Utc::now()) - resolution.width(),
    };

    info!(stage = %stage, interval = %interval_start, "Rollup triggered via API");
    match state.engine.run_rollup(stage, interval_start) {
        Ok(outcome) => ApiResponse::ok(serde_json::json!({
            "stage": stage.to_string(),
            "interval_start": outcome.interval_start,
            "stations": outcome.stations,
        })),
        Err(e) => ApiErrorResponse::internal(format!("rollup failed: {e}")),
    }
}

// ============================================================================
// Backfill trigger
// ============================================================================

/// POST /api/v1/admin/backfill/ten-minute
pub async fn trigger_ten_minute_backfill(State(state): State<ApiState>) -> Response {
    let lookback = Duration::minutes(state.engine.config().backfill.ten_minute_lookback_mins);
    run_backfill(&state, RollupStage::TenMinute, lookback)
}

/// POST /api/v1/admin/backfill/hourly
pub async fn trigger_hourly_backfill(State(state): State<ApiState>) -> Response {
    let lookback = Duration::minutes(state.engine.config().backfill.hourly_lookback_mins);
    run_backfill(&state, RollupStage::Hourly, lookback)
}

fn run_backfill(state: &ApiState, stage: RollupStage, lookback: Duration) -> Response {
    let engine = &state.engine;
    info!(stage = %stage, lookback_mins = lookback.num_minutes(), "Backfill triggered via API");
    let outcome = backfill::backfill_recent(
        engine.store().as_ref(),
        engine.events(),
        &engine.config().aggregation,
        stage,
        lookback,
        Utc::now(),
    );
    ApiResponse::ok(serde_json::json!({
        "stage": stage.to_string(),
        "intervals_checked": outcome.intervals_checked,
        "intervals_rolled": outcome.intervals_rolled,
        "intervals_failed": outcome.intervals_failed,
    }))
}

// ============================================================================
// Tendency recalculation
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RecalculateQuery {
    /// Restrict to one station. All stations when absent.
    pub station_id: Option<String>,
    /// `ten-minute` (default) or `hourly`.
    pub resolution: Option<String>,
}

/// POST /api/v1/admin/tendencies/recalculate
pub async fn recalculate_tendencies(
    State(state): State<ApiState>,
    Query(query): Query<RecalculateQuery>,
) -> Response {
    let stage = match query.resolution.as_deref() {
        None => RollupStage::TenMinute,
        Some(s) => match s.parse::<RollupStage>() {
            Ok(stage) => stage,
            Err(e) => return ApiErrorResponse::bad_request(e.to_string()),
        },
    };

    let engine = &state.engine;
    info!(
        stage = %stage,
        station = query.station_id.as_deref().unwrap_or("*"),
        "Tendency recalculation triggered via API"
    );
    match backfill::recalculate_tendencies(
        engine.store().as_ref(),
        &engine.config().aggregation,
        stage,
        query.station_id.as_deref(),
    ) {
        Ok(rewritten) => ApiResponse::ok(serde_json::json!({
            "stage": stage.to_string(),
            "rewritten": rewritten,
        })),
        Err(e) => ApiErrorResponse::internal(format!("recalculation failed: {e}")),
    }
}
