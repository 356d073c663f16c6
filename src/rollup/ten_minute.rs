//! Ten-minute rollup: one-minute records → ten-minute records.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

use super::RollupOutcome;
use crate::broadcast::{AggregatePayload, EventBus};
use crate::config::AggregationConfig;
use crate::stats;
use crate::storage::{AggregateStore, StoreError};
use crate::types::{OneMinuteAggregate, Resolution, TenMinuteAggregate};

/// Roll up one ten-minute interval from persisted one-minute records.
///
/// The average is the unweighted mean of the per-minute averages — minutes
/// with more samples do not count more. Likewise each minute casts exactly
/// one dominant-direction vote. Both are deliberate: a minute is the unit
/// of contribution at this resolution, regardless of its sample density.
///
/// Stations with no rows in the window are skipped silently; absence of
/// data is not an error.
pub fn run(
    store: &dyn AggregateStore,
    events: &EventBus,
    cfg: &AggregationConfig,
    interval_start: DateTime<Utc>,
) -> Result<RollupOutcome, StoreError> {
    let interval_start = Resolution::TenMinute.align(interval_start);
    let interval_end = interval_start + Resolution::TenMinute.width();

    let rows = store.range_one_minute(interval_start, interval_end)?;

    let mut by_station: BTreeMap<&str, Vec<&OneMinuteAggregate>> = BTreeMap::new();
    for row in &rows {
        by_station.entry(row.station_id.as_str()).or_default().push(row);
    }

    let mut stations = 0;
    for (station_id, station_rows) in by_station {
        #[allow(clippy::cast_precision_loss)]
        let count = station_rows.len() as f64;
        let avg_speed = station_rows.iter().map(|r| r.avg_speed).sum::<f64>() / count;
        let min_speed = station_rows.iter().map(|r| r.min_speed).fold(f64::INFINITY, f64::min);
        let max_speed = station_rows
            .iter()
            .map(|r| r.max_speed)
            .fold(f64::NEG_INFINITY, f64::max);

        let votes: Vec<u16> = station_rows.iter().map(|r| r.dominant_direction).collect();
        let dominant_direction = stats::dominant_vote(&votes).unwrap_or(0);

        let previous = store.latest_ten_minute_before(station_id, interval_start)?;
        let tendency = stats::tendency(
            avg_speed,
            previous.map(|p| p.avg_speed),
            cfg.tendency_threshold_mps,
        );

        let aggregate = TenMinuteAggregate {
            station_id: station_id.to_string(),
            timestamp: interval_start,
            avg_speed,
            min_speed,
            max_speed,
            dominant_direction,
            tendency,
        };

        store.upsert_ten_minute(&aggregate)?;
        debug!(
            station = %aggregate.station_id,
            interval = %interval_start,
            avg_speed = aggregate.avg_speed,
            tendency = %aggregate.tendency,
            minutes = station_rows.len(),
            "Ten-minute aggregate persisted"
        );
        events.publish(AggregatePayload::TenMinute(aggregate));
        stations += 1;
    }

    if stations == 0 {
        debug!(interval = %interval_start, "No one-minute data in interval — nothing to roll up");
    }

    Ok(RollupOutcome {
        interval_start,
        stations,
    })
}
