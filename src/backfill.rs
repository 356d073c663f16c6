//! Catch-up for missed rollup intervals and tendency recalculation.
//!
//! The scheduled rollup drivers only process the interval that just closed.
//! If the process was down (or a scheduled run failed) over a boundary, the
//! records for that interval never materialize. `backfill_recent` walks a
//! lookback window of completed intervals and re-runs any whose source data
//! exists but whose target records do not. Because rollups are upserts, it
//! is safe to run at any time, repeatedly, and concurrently with the
//! schedulers.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::broadcast::EventBus;
use crate::config::AggregationConfig;
use crate::rollup::{self, RollupStage};
use crate::stats;
use crate::storage::{AggregateStore, StoreError};

/// Result of one backfill pass.
#[derive(Debug, Clone, Default)]
pub struct BackfillOutcome {
    /// Completed intervals examined inside the lookback window.
    pub intervals_checked: usize,
    /// Intervals that had source data with at least one missing target
    /// record and were therefore re-rolled.
    pub intervals_rolled: usize,
    /// Intervals whose check or rollup errored. Logged, skipped, and left
    /// for the next pass; a failure never aborts the rest of the window.
    pub intervals_failed: usize,
}

/// Re-run any missed rollups for `stage` inside the lookback window ending
/// at `now`. The still-open interval containing `now` is never touched.
pub fn backfill_recent(
    store: &dyn AggregateStore,
    events: &EventBus,
    cfg: &AggregationConfig,
    stage: RollupStage,
    lookback: Duration,
    now: DateTime<Utc>,
) -> BackfillOutcome {
    let resolution = stage.resolution();
    let width = resolution.width();
    let window_end = resolution.align(now);
    let mut interval = resolution.align(now - lookback);

    let mut outcome = BackfillOutcome::default();

    while interval < window_end {
        outcome.intervals_checked += 1;
        match interval_needs_rollup(store, stage, interval) {
            Ok(false) => {}
            Ok(true) => match rollup::run_stage(stage, store, events, cfg, interval) {
                Ok(rolled) => {
                    debug!(
                        stage = %stage,
                        interval = %interval,
                        stations = rolled.stations,
                        "Backfilled missed interval"
                    );
                    outcome.intervals_rolled += 1;
                }
                Err(e) => {
                    warn!(
                        stage = %stage,
                        interval = %interval,
                        error = %e,
                        "Backfill rollup failed — continuing with later intervals"
                    );
                    outcome.intervals_failed += 1;
                }
            },
            Err(e) => {
                warn!(
                    stage = %stage,
                    interval = %interval,
                    error = %e,
                    "Backfill interval check failed — continuing with later intervals"
                );
                outcome.intervals_failed += 1;
            }
        }
        interval += width;
    }

    if outcome.intervals_rolled > 0 || outcome.intervals_failed > 0 {
        info!(
            stage = %stage,
            checked = outcome.intervals_checked,
            rolled = outcome.intervals_rolled,
            failed = outcome.intervals_failed,
            "Backfill pass complete"
        );
    } else {
        debug!(
            stage = %stage,
            checked = outcome.intervals_checked,
            "Backfill pass complete — nothing missing"
        );
    }

    outcome
}

/// True when the interval has source rows for some station that has no
/// target record at the interval start.
fn interval_needs_rollup(
    store: &dyn AggregateStore,
    stage: RollupStage,
    interval_start: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let interval_end = interval_start + stage.resolution().width();

    let source_stations: BTreeSet<String> = match stage {
        RollupStage::TenMinute => store
            .range_one_minute(interval_start, interval_end)?
            .into_iter()
            .map(|r| r.station_id)
            .collect(),
        RollupStage::Hourly => store
            .range_ten_minute(interval_start, interval_end)?
            .into_iter()
            .map(|r| r.station_id)
            .collect(),
    };

    for station_id in source_stations {
        let present = match stage {
            RollupStage::TenMinute => store.get_ten_minute(&station_id, interval_start)?.is_some(),
            RollupStage::Hourly => store.get_hourly(&station_id, interval_start)?.is_some(),
        };
        if !present {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Rewrite the tendency field of every persisted record at the stage's
/// resolution by walking each station's history in chronological order.
///
/// Useful after the tendency threshold changes or after backfill writes
/// records out of order. Only records whose tendency actually changes are
/// rewritten. Returns the number of rewritten records.
pub fn recalculate_tendencies(
    store: &dyn AggregateStore,
    cfg: &AggregationConfig,
    stage: RollupStage,
    station: Option<&str>,
) -> Result<usize, StoreError> {
    let stations: Vec<String> = match station {
        Some(id) => vec![id.to_string()],
        None => store.stations(stage.resolution())?,
    };

    let mut rewritten = 0;
    for station_id in &stations {
        rewritten += match stage {
            RollupStage::TenMinute => recalculate_ten_minute(store, cfg, station_id)?,
            RollupStage::Hourly => recalculate_hourly(store, cfg, station_id)?,
        };
    }

    info!(
        stage = %stage,
        stations = stations.len(),
        rewritten,
        "Tendency recalculation complete"
    );
    Ok(rewritten)
}

fn recalculate_ten_minute(
    store: &dyn AggregateStore,
    cfg: &AggregationConfig,
    station_id: &str,
) -> Result<usize, StoreError> {
    let history = store.station_ten_minute_history(station_id)?;
    let mut previous_avg: Option<f64> = None;
    let mut rewritten = 0;

    for record in history {
        let tendency = stats::tendency(record.avg_speed, previous_avg, cfg.tendency_threshold_mps);
        if tendency != record.tendency {
            let mut updated = record.clone();
            updated.tendency = tendency;
            store.upsert_ten_minute(&updated)?;
            rewritten += 1;
        }
        previous_avg = Some(record.avg_speed);
    }

    Ok(rewritten)
}

fn recalculate_hourly(
    store: &dyn AggregateStore,
    cfg: &AggregationConfig,
    station_id: &str,
) -> Result<usize, StoreError> {
    let history = store.station_hourly_history(station_id)?;
    let mut previous_avg: Option<f64> = None;
    let mut rewritten = 0;

    for record in history {
        let tendency = stats::tendency(record.avg_speed, previous_avg, cfg.tendency_threshold_mps);
        if tendency != record.tendency {
            let mut updated = record.clone();
            updated.tendency = tendency;
            store.upsert_hourly(&updated)?;
            rewritten += 1;
        }
        previous_avg = Some(record.avg_speed);
    }

    Ok(rewritten)
}
