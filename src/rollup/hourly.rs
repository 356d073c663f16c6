//! Hourly rollup: ten-minute records → hourly records.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

use super::RollupOutcome;
use crate::broadcast::{AggregatePayload, EventBus};
use crate::config::AggregationConfig;
use crate::stats;
use crate::storage::{AggregateStore, StoreError};
use crate::types::{HourlyAggregate, Resolution, TenMinuteAggregate};

/// Roll up one hour from persisted ten-minute records (nominally six per
/// station). Same shape as the ten-minute rollup one level down, plus two
/// hour-only statistics: gust speed (max of the ten-minute maxima) and calm
/// periods (ten-minute records averaging below the calm threshold).
pub fn run(
    store: &dyn AggregateStore,
    events: &EventBus,
    cfg: &AggregationConfig,
    interval_start: DateTime<Utc>,
) -> Result<RollupOutcome, StoreError> {
    let interval_start = Resolution::Hourly.align(interval_start);
    let interval_end = interval_start + Resolution::Hourly.width();

    let rows = store.range_ten_minute(interval_start, interval_end)?;

    let mut by_station: BTreeMap<&str, Vec<&TenMinuteAggregate>> = BTreeMap::new();
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
        let gust_speed = max_speed;

        #[allow(clippy::cast_possible_truncation)]
        let calm_periods = station_rows
            .iter()
            .filter(|r| r.avg_speed < cfg.calm_threshold_mps)
            .count() as u32;

        let votes: Vec<u16> = station_rows.iter().map(|r| r.dominant_direction).collect();
        let dominant_direction = stats::dominant_vote(&votes).unwrap_or(0);

        let previous = store.latest_hourly_before(station_id, interval_start)?;
        let tendency = stats::tendency(
            avg_speed,
            previous.map(|p| p.avg_speed),
            cfg.tendency_threshold_mps,
        );

        let aggregate = HourlyAggregate {
            station_id: station_id.to_string(),
            timestamp: interval_start,
            avg_speed,
            min_speed,
            max_speed,
            dominant_direction,
            tendency,
            gust_speed,
            calm_periods,
        };

        store.upsert_hourly(&aggregate)?;
        debug!(
            station = %aggregate.station_id,
            interval = %interval_start,
            avg_speed = aggregate.avg_speed,
            gust_speed = aggregate.gust_speed,
            calm_periods = aggregate.calm_periods,
            tendency = %aggregate.tendency,
            "Hourly aggregate persisted"
        );
        events.publish(AggregatePayload::Hourly(aggregate));
        stations += 1;
    }

    if stations == 0 {
        debug!(interval = %interval_start, "No ten-minute data in interval — nothing to roll up");
    }

    Ok(RollupOutcome {
        interval_start,
        stations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::Tendency;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 14, h, m, 0).unwrap()
    }

    fn bus() -> EventBus {
        EventBus::new(16, "wind")
    }

    fn ten_minute(station: &str, timestamp: DateTime<Utc>, avg: f64, max: f64) -> TenMinuteAggregate {
        TenMinuteAggregate {
            station_id: station.to_string(),
            timestamp,
            avg_speed: avg,
            min_speed: (avg - 1.0).max(0.0),
            max_speed: max,
            dominant_direction: 90,
            tendency: Tendency::Stable,
        }
    }

    #[test]
    fn test_gust_is_max_of_maxima() {
        let store = MemoryStore::new();
        let cfg = AggregationConfig::default();

        for (i, max) in [8.0, 14.5, 9.0, 11.0, 10.0, 12.0].iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let t = ts(10, (i * 10) as u32);
            store.upsert_ten_minute(&ten_minute("vasiliki-001", t, 6.0, *max)).unwrap();
        }

        run(&store, &bus(), &cfg, ts(10, 0)).unwrap();

        let agg = store.get_hourly("vasiliki-001", ts(10, 0)).unwrap().unwrap();
        assert!((agg.gust_speed - 14.5).abs() < f64::EPSILON);
        assert!((agg.max_speed - 14.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_calm_periods_count_sub_threshold_intervals() {
        let store = MemoryStore::new();
        let cfg = AggregationConfig::default();

        // Two calm (< 1.0 m/s), one exactly at threshold (not calm), three windy.
        let averages = [0.3, 0.9, 1.0, 5.0, 6.0, 7.0];
        for (i, avg) in averages.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let t = ts(10, (i * 10) as u32);
            store.upsert_ten_minute(&ten_minute("vasiliki-001", t, *avg, *avg + 1.0)).unwrap();
        }

        run(&store, &bus(), &cfg, ts(10, 0)).unwrap();

        let agg = store.get_hourly("vasiliki-001", ts(10, 0)).unwrap().unwrap();
        assert_eq!(agg.calm_periods, 2);
    }

    #[test]
    fn test_tendency_against_previous_hour() {
        let store = MemoryStore::new();
        let cfg = AggregationConfig::default();

        store.upsert_ten_minute(&ten_minute("vasiliki-001", ts(10, 0), 8.0, 9.0)).unwrap();
        run(&store, &bus(), &cfg, ts(10, 0)).unwrap();

        store.upsert_ten_minute(&ten_minute("vasiliki-001", ts(11, 0), 4.0, 5.0)).unwrap();
        run(&store, &bus(), &cfg, ts(11, 0)).unwrap();

        let agg = store.get_hourly("vasiliki-001", ts(11, 0)).unwrap().unwrap();
        assert_eq!(agg.tendency, Tendency::Decreasing);
    }

    #[test]
    fn test_empty_hour_writes_nothing() {
        let store = MemoryStore::new();
        let cfg = AggregationConfig::default();

        let outcome = run(&store, &bus(), &cfg, ts(10, 0)).unwrap();
        assert_eq!(outcome.stations, 0);
        assert_eq!(store.stats().unwrap().hourly_count, 0);
    }

    #[test]
    fn test_partial_hour_still_rolls_up() {
        let store = MemoryStore::new();
        let cfg = AggregationConfig::default();

        // Only two of the nominal six ten-minute slots present.
        store.upsert_ten_minute(&ten_minute("vasiliki-001", ts(10, 20), 4.0, 6.0)).unwrap();
        store.upsert_ten_minute(&ten_minute("vasiliki-001", ts(10, 50), 6.0, 8.0)).unwrap();

        let outcome = run(&store, &bus(), &cfg, ts(10, 0)).unwrap();
        assert_eq!(outcome.stations, 1);

        let agg = store.get_hourly("vasiliki-001", ts(10, 0)).unwrap().unwrap();
        assert!((agg.avg_speed - 5.0).abs() < f64::EPSILON);
    }
}
