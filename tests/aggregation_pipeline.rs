//! End-to-end regression tests for the aggregation pipeline.
//!
//! Exercises the full path a raw sample takes: ingest into a live bucket,
//! flush to a persisted one-minute aggregate, ten-minute and hourly
//! rollups, broadcast events, and crash recovery via backfill. Durable
//! paths run against a real sled store in a temp directory.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;

use aiolos_core::backfill;
use aiolos_core::config::EngineConfig;
use aiolos_core::engine::AggregationEngine;
use aiolos_core::rollup::RollupStage;
use aiolos_core::storage::{AggregateStore, MemoryStore, SledStore};
use aiolos_core::types::Tendency;

fn ts(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 14, h, m, s).unwrap()
}

fn sled_engine() -> (AggregationEngine, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SledStore::open(dir.path()).unwrap());
    let engine = AggregationEngine::new(EngineConfig::default(), store);
    (engine, dir)
}

#[test]
fn test_single_minute_end_to_end() {
    let (engine, _dir) = sled_engine();

    // Five samples inside minute 10:00, all from the east.
    for (i, speed) in [3.0, 4.0, 5.0, 6.0, 7.0].iter().enumerate() {
        engine.ingest("vasiliki-001", *speed, 90.0, ts(10, 0, (i * 10) as u32));
    }

    let outcome = engine.flush_completed(ts(10, 1, 5));
    assert_eq!(outcome.flushed, 1);

    let agg = engine
        .store()
        .get_one_minute("vasiliki-001", ts(10, 0, 0))
        .unwrap()
        .unwrap();
    assert!((agg.avg_speed - 5.0).abs() < f64::EPSILON);
    assert!((agg.min_speed - 3.0).abs() < f64::EPSILON);
    assert!((agg.max_speed - 7.0).abs() < f64::EPSILON);
    assert_eq!(agg.dominant_direction, 90);
    assert_eq!(agg.sample_count, 5);
}

#[test]
fn test_full_hour_through_all_resolutions() {
    let (engine, _dir) = sled_engine();

    // One sample per minute for a full hour: speed ramps 2.0 → 7.9,
    // direction swings between east and south-east.
    for m in 0..60u32 {
        let speed = 2.0 + f64::from(m) * 0.1;
        let dir = if m % 3 == 0 { 135.0 } else { 90.0 };
        engine.ingest("vasiliki-001", speed, dir, ts(10, m, 30));
    }
    engine.force_flush_all();

    for m in (0..60).step_by(10) {
        engine.run_rollup(RollupStage::TenMinute, ts(10, m, 0)).unwrap();
    }
    engine.run_rollup(RollupStage::Hourly, ts(10, 0, 0)).unwrap();

    let stats = engine.store().stats().unwrap();
    assert_eq!(stats.one_minute_count, 60);
    assert_eq!(stats.ten_minute_count, 6);
    assert_eq!(stats.hourly_count, 1);

    let hour = engine
        .store()
        .get_hourly("vasiliki-001", ts(10, 0, 0))
        .unwrap()
        .unwrap();
    // Mean of 2.0..=7.9 stepped by 0.1 is 4.95.
    assert!((hour.avg_speed - 4.95).abs() < 1e-9);
    assert!((hour.min_speed - 2.0).abs() < f64::EPSILON);
    assert!((hour.gust_speed - 7.9).abs() < 1e-9);
    assert_eq!(hour.dominant_direction, 90);
    assert_eq!(hour.calm_periods, 0);

    // Later ten-minute intervals trend upward against their predecessors.
    let last = engine
        .store()
        .get_ten_minute("vasiliki-001", ts(10, 50, 0))
        .unwrap()
        .unwrap();
    assert_eq!(last.tendency, Tendency::Increasing);
}

#[test]
fn test_calm_morning_counts_calm_periods() {
    let (engine, _dir) = sled_engine();

    // First half of the hour nearly still, second half a steady breeze.
    for m in 0..60u32 {
        let speed = if m < 30 { 0.2 } else { 4.0 };
        engine.ingest("vasiliki-001", speed, 180.0, ts(6, m, 0));
    }
    engine.force_flush_all();
    for m in (0..60).step_by(10) {
        engine.run_rollup(RollupStage::TenMinute, ts(6, m, 0)).unwrap();
    }
    engine.run_rollup(RollupStage::Hourly, ts(6, 0, 0)).unwrap();

    let hour = engine
        .store()
        .get_hourly("vasiliki-001", ts(6, 0, 0))
        .unwrap()
        .unwrap();
    assert_eq!(hour.calm_periods, 3);
}

#[test]
fn test_broadcast_carries_every_resolution() {
    let (engine, _dir) = sled_engine();
    let mut rx = engine.events().subscribe();

    engine.ingest("vasiliki-001", 5.0, 90.0, ts(10, 0, 10));
    engine.force_flush_all();
    engine.run_rollup(RollupStage::TenMinute, ts(10, 0, 0)).unwrap();
    engine.run_rollup(RollupStage::Hourly, ts(10, 0, 0)).unwrap();

    let channels: Vec<String> = (0..3).map(|_| rx.try_recv().unwrap().channel).collect();
    assert_eq!(
        channels,
        vec![
            "wind:1m:vasiliki-001",
            "wind:10m:vasiliki-001",
            "wind:1h:vasiliki-001",
        ]
    );
}

#[test]
fn test_backfill_recovers_after_restart() {
    let dir = TempDir::new().unwrap();
    let cfg = EngineConfig::default();

    // First process lifetime: one-minute data lands, process dies before
    // any rollup fires.
    {
        let store = Arc::new(SledStore::open(dir.path()).unwrap());
        let engine = AggregationEngine::new(cfg.clone(), store);
        for m in 0..30u32 {
            engine.ingest("vasiliki-001", 5.0 + f64::from(m % 3), 270.0, ts(10, m, 0));
        }
        engine.force_flush_all();
    }

    // Second lifetime: backfill finds the three completed ten-minute
    // intervals and rolls them without re-ingesting anything.
    let store = Arc::new(SledStore::open(dir.path()).unwrap());
    let engine = AggregationEngine::new(cfg, store);

    let outcome = backfill::backfill_recent(
        engine.store().as_ref(),
        engine.events(),
        &engine.config().aggregation,
        RollupStage::TenMinute,
        Duration::minutes(60),
        ts(10, 35, 0),
    );
    assert_eq!(outcome.intervals_rolled, 3);
    assert_eq!(outcome.intervals_failed, 0);

    for m in (0..30).step_by(10) {
        assert!(engine
            .store()
            .get_ten_minute("vasiliki-001", ts(10, m, 0))
            .unwrap()
            .is_some());
    }
}

#[test]
fn test_rollup_rerun_is_idempotent_through_sled() {
    let (engine, _dir) = sled_engine();

    for m in 0..10u32 {
        engine.ingest("vasiliki-001", 6.0, 45.0, ts(10, m, 0));
    }
    engine.force_flush_all();

    engine.run_rollup(RollupStage::TenMinute, ts(10, 0, 0)).unwrap();
    let first = engine
        .store()
        .get_ten_minute("vasiliki-001", ts(10, 0, 0))
        .unwrap()
        .unwrap();

    engine.run_rollup(RollupStage::TenMinute, ts(10, 0, 0)).unwrap();
    let second = engine
        .store()
        .get_ten_minute("vasiliki-001", ts(10, 0, 0))
        .unwrap()
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(engine.store().stats().unwrap().ten_minute_count, 1);
}

#[test]
fn test_two_stations_stay_separate() {
    let store = Arc::new(MemoryStore::new());
    let engine = AggregationEngine::new(EngineConfig::default(), store);

    engine.ingest("vasiliki-001", 8.0, 90.0, ts(10, 0, 10));
    engine.ingest("vasiliki-002", 2.0, 270.0, ts(10, 0, 20));
    engine.force_flush_all();
    engine.run_rollup(RollupStage::TenMinute, ts(10, 0, 0)).unwrap();

    let a = engine
        .store()
        .get_ten_minute("vasiliki-001", ts(10, 0, 0))
        .unwrap()
        .unwrap();
    let b = engine
        .store()
        .get_ten_minute("vasiliki-002", ts(10, 0, 0))
        .unwrap()
        .unwrap();
    assert!((a.avg_speed - 8.0).abs() < f64::EPSILON);
    assert!((b.avg_speed - 2.0).abs() < f64::EPSILON);
    assert_eq!(a.dominant_direction, 90);
    assert_eq!(b.dominant_direction, 270);
}

#[test]
fn test_late_samples_overwrite_flushed_minute() {
    let (engine, _dir) = sled_engine();

    engine.ingest("vasiliki-001", 4.0, 90.0, ts(10, 0, 10));
    engine.flush_completed(ts(10, 1, 5));

    // A late sample for the already-flushed minute arrives and is flushed
    // again: last write wins for that minute's record.
    engine.ingest("vasiliki-001", 10.0, 180.0, ts(10, 0, 55));
    engine.flush_completed(ts(10, 1, 35));

    let agg = engine
        .store()
        .get_one_minute("vasiliki-001", ts(10, 0, 0))
        .unwrap()
        .unwrap();
    assert!((agg.avg_speed - 10.0).abs() < f64::EPSILON);
    assert_eq!(agg.sample_count, 1);
    assert_eq!(agg.dominant_direction, 180);
}
