//! The aggregation engine: ingest, bucket, flush, roll up.
//!
//! [`AggregationEngine`] owns the live minute buckets and the background
//! tasks that drain them. Ingest is synchronous and lock-bounded — it only
//! updates the in-memory bucket map, never touches the store — so callers
//! on a hot network path pay a hash-map insert, nothing more. Everything
//! slow (persistence, rollups, broadcast fan-out) happens on the spawned
//! schedulers.

pub mod bucket;
pub mod flush;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broadcast::EventBus;
use crate::config::EngineConfig;
use crate::rollup::{self, RollupStage};
use crate::storage::AggregateStore;
use crate::types::{RawSample, Resolution};

use bucket::{BucketKey, MinuteBucket};
use flush::{BucketMap, FlushOutcome};

/// Live aggregation engine for one deployment.
///
/// Construct with [`AggregationEngine::new`], call [`start`] to launch the
/// flush scheduler and rollup drivers, feed samples through [`ingest`], and
/// call [`stop`] for an orderly drain on shutdown.
///
/// [`start`]: AggregationEngine::start
/// [`ingest`]: AggregationEngine::ingest
/// [`stop`]: AggregationEngine::stop
pub struct AggregationEngine {
    cfg: EngineConfig,
    store: Arc<dyn AggregateStore>,
    events: EventBus,
    buckets: BucketMap,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AggregationEngine {
    pub fn new(cfg: EngineConfig, store: Arc<dyn AggregateStore>) -> Self {
        let events = EventBus::new(cfg.broadcast.capacity, cfg.broadcast.channel_prefix.clone());
        info!(backend = store.backend_name(), "Aggregation engine created");
        Self {
            cfg,
            store,
            events,
            buckets: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Fold one raw reading into its station's live minute bucket.
    ///
    /// The timestamp decides the bucket; out-of-order and late samples land
    /// in whatever minute they belong to. No I/O, no await.
    pub fn ingest(
        &self,
        station_id: &str,
        speed_mps: f64,
        direction_deg: f64,
        timestamp: DateTime<Utc>,
    ) {
        let key = BucketKey {
            station_id: station_id.to_string(),
            interval_start: Resolution::OneMinute.align(timestamp),
        };

        let mut map = self.lock_buckets();
        match map.entry(key) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                entry.get_mut().record(speed_mps, direction_deg);
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(MinuteBucket::first_sample(speed_mps, direction_deg));
            }
        }
    }

    /// [`ingest`](Self::ingest) for callers holding a [`RawSample`].
    pub fn ingest_sample(&self, sample: &RawSample) {
        self.ingest(
            &sample.station_id,
            sample.speed_mps,
            sample.direction_deg,
            sample.timestamp,
        );
    }

    /// Launch the flush scheduler and both rollup drivers.
    ///
    /// Idempotent in effect only if called once; calling twice spawns
    /// duplicate schedulers, so callers own that discipline.
    pub fn start(&self) {
        let mut tasks = self.lock_tasks();

        tasks.push(tokio::spawn(flush::run_scheduler(
            Arc::clone(&self.buckets),
            Arc::clone(&self.store),
            self.events.clone(),
            self.cfg.aggregation.flush_interval_secs,
            self.cancel.child_token(),
        )));

        for stage in [RollupStage::TenMinute, RollupStage::Hourly] {
            tasks.push(tokio::spawn(rollup::run_driver(
                stage,
                Arc::clone(&self.store),
                self.events.clone(),
                self.cfg.aggregation.clone(),
                self.cancel.child_token(),
            )));
        }

        info!(tasks = tasks.len(), "Aggregation engine started");
    }

    /// Stop all background tasks and drain every live bucket to the store.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = self.lock_tasks().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Engine task ended abnormally");
            }
        }

        let outcome = self.force_flush_all();
        info!(
            flushed = outcome.flushed,
            retained = outcome.retained,
            "Aggregation engine stopped"
        );
    }

    /// Flush completed minute buckets immediately instead of waiting for
    /// the next scheduler tick.
    pub fn flush_completed(&self, now: DateTime<Utc>) -> FlushOutcome {
        flush::flush_completed(&self.buckets, self.store.as_ref(), &self.events, now)
    }

    /// Flush every live bucket, including the still-open minute.
    pub fn force_flush_all(&self) -> FlushOutcome {
        flush::force_flush_all(&self.buckets, self.store.as_ref(), &self.events)
    }

    /// Run one rollup stage for a single interval, immediately.
    pub fn run_rollup(
        &self,
        stage: RollupStage,
        interval_start: DateTime<Utc>,
    ) -> Result<rollup::RollupOutcome, crate::storage::StoreError> {
        rollup::run_stage(
            stage,
            self.store.as_ref(),
            &self.events,
            &self.cfg.aggregation,
            interval_start,
        )
    }

    /// Number of live (unflushed) buckets.
    pub fn live_bucket_count(&self) -> usize {
        self.lock_buckets().len()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn AggregateStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_buckets(&self) -> std::sync::MutexGuard<'_, HashMap<BucketKey, MinuteBucket>> {
        match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 14, h, m, s).unwrap()
    }

    fn engine() -> AggregationEngine {
        AggregationEngine::new(EngineConfig::default(), Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_ingest_groups_by_station_and_minute() {
        let engine = engine();

        engine.ingest("vasiliki-001", 5.0, 90.0, ts(10, 0, 10));
        engine.ingest("vasiliki-001", 6.0, 90.0, ts(10, 0, 50));
        engine.ingest("vasiliki-001", 7.0, 90.0, ts(10, 1, 5));
        engine.ingest("vasiliki-002", 3.0, 180.0, ts(10, 0, 20));

        assert_eq!(engine.live_bucket_count(), 3);
    }

    #[test]
    fn test_ingest_sample_delegates() {
        let engine = engine();
        engine.ingest_sample(&RawSample {
            station_id: "vasiliki-001".to_string(),
            speed_mps: 5.0,
            direction_deg: 90.0,
            timestamp: ts(10, 0, 10),
        });
        assert_eq!(engine.live_bucket_count(), 1);
    }

    #[test]
    fn test_flush_completed_leaves_open_minute() {
        let engine = engine();

        engine.ingest("vasiliki-001", 5.0, 90.0, ts(10, 0, 10));
        engine.ingest("vasiliki-001", 7.0, 90.0, ts(10, 1, 5));

        let outcome = engine.flush_completed(ts(10, 1, 30));
        assert_eq!(outcome.flushed, 1);
        assert_eq!(engine.live_bucket_count(), 1);

        let store = engine.store();
        let agg = store.get_one_minute("vasiliki-001", ts(10, 0, 0)).unwrap().unwrap();
        assert!((agg.avg_speed - 5.0).abs() < f64::EPSILON);
        assert!(store.get_one_minute("vasiliki-001", ts(10, 1, 0)).unwrap().is_none());
    }

    #[test]
    fn test_force_flush_drains_everything() {
        let engine = engine();

        engine.ingest("vasiliki-001", 5.0, 90.0, ts(10, 0, 10));
        engine.ingest("vasiliki-002", 3.0, 180.0, ts(10, 0, 20));

        let outcome = engine.force_flush_all();
        assert_eq!(outcome.flushed, 2);
        assert_eq!(engine.live_bucket_count(), 0);
    }

    #[tokio::test]
    async fn test_start_stop_drains_buckets() {
        let engine = engine();
        engine.start();

        engine.ingest("vasiliki-001", 5.0, 90.0, ts(10, 0, 10));
        engine.stop().await;

        assert_eq!(engine.live_bucket_count(), 0);
        assert!(engine
            .store()
            .get_one_minute("vasiliki-001", ts(10, 0, 0))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_flush_publishes_events() {
        let engine = engine();
        let mut rx = engine.events().subscribe();

        engine.ingest("vasiliki-001", 5.0, 90.0, ts(10, 0, 10));
        engine.force_flush_all();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.channel, "wind:1m:vasiliki-001");
    }
}
