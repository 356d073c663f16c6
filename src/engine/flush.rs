//! Flush scheduler: finalizes completed minute buckets.
//!
//! Runs on a fixed period, deliberately shorter than the bucket width, so a
//! completed minute is persisted within one tick rather than one minute.
//! Completed buckets are removed from the live map under the lock, then
//! persisted and broadcast outside it; a bucket whose persist fails is
//! merged back into the map and retried on the next tick. That retry is the
//! engine's only internal retry mechanism — unbounded in time, bounded by
//! process memory and uptime.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::bucket::{BucketKey, MinuteBucket};
use crate::broadcast::{AggregatePayload, EventBus};
use crate::storage::AggregateStore;
use crate::types::Resolution;

/// The live bucket map, shared between ingest and the flush scheduler.
pub(crate) type BucketMap = Arc<Mutex<HashMap<BucketKey, MinuteBucket>>>;

/// Result of one flush pass.
#[derive(Debug, Default)]
pub struct FlushOutcome {
    /// Buckets finalized, persisted, and broadcast.
    pub flushed: usize,
    /// Buckets whose persist failed and that were put back for retry.
    pub retained: usize,
}

/// Lock a bucket map, recovering the guard if a panicking thread poisoned it.
fn lock_buckets(buckets: &BucketMap) -> std::sync::MutexGuard<'_, HashMap<BucketKey, MinuteBucket>> {
    match buckets.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Flush every bucket whose minute is complete relative to `now`.
///
/// A bucket is complete when its interval start lies strictly before the
/// current minute boundary — the still-open minute is never flushed.
pub fn flush_completed(
    buckets: &BucketMap,
    store: &dyn AggregateStore,
    events: &EventBus,
    now: DateTime<Utc>,
) -> FlushOutcome {
    let cutoff = Resolution::OneMinute.align(now);
    flush_matching(buckets, store, events, |key| key.interval_start < cutoff)
}

/// Flush every live bucket regardless of completion state.
///
/// Used for orderly shutdown and for test determinism. Stopping the
/// scheduler alone does not drain outstanding buckets; callers must invoke
/// this before dropping the engine or in-memory data is lost.
pub fn force_flush_all(
    buckets: &BucketMap,
    store: &dyn AggregateStore,
    events: &EventBus,
) -> FlushOutcome {
    flush_matching(buckets, store, events, |_| true)
}

fn flush_matching<F: Fn(&BucketKey) -> bool>(
    buckets: &BucketMap,
    store: &dyn AggregateStore,
    events: &EventBus,
    should_flush: F,
) -> FlushOutcome {
    // Take matching buckets out under the lock; all I/O happens after it
    // is released so ingest is never blocked on the store.
    let taken: Vec<(BucketKey, MinuteBucket)> = {
        let mut map = lock_buckets(buckets);
        let keys: Vec<BucketKey> = map.keys().filter(|k| should_flush(k)).cloned().collect();
        keys.into_iter()
            .filter_map(|key| map.remove(&key).map(|bucket| (key, bucket)))
            .collect()
    };

    let mut outcome = FlushOutcome::default();

    for (key, bucket) in taken {
        let aggregate = bucket.finalize(&key);

        // Late-arrival anomaly: samples landed for a minute that was already
        // flushed. The upsert below overwrites the earlier record with the
        // late bucket's statistics.
        if let Ok(Some(_)) = store.get_one_minute(&key.station_id, key.interval_start) {
            warn!(
                station = %key.station_id,
                interval = %key.interval_start,
                samples = bucket.sample_count(),
                "Late samples for an already-flushed minute — overwriting earlier record"
            );
        }

        match store.upsert_one_minute(&aggregate) {
            Ok(()) => {
                debug!(
                    station = %aggregate.station_id,
                    interval = %aggregate.timestamp,
                    avg_speed = aggregate.avg_speed,
                    samples = aggregate.sample_count,
                    "One-minute aggregate persisted"
                );
                events.publish(AggregatePayload::OneMinute(aggregate));
                outcome.flushed += 1;
            }
            Err(e) => {
                warn!(
                    station = %key.station_id,
                    interval = %key.interval_start,
                    error = %e,
                    "Failed to persist one-minute aggregate — retaining bucket for retry"
                );
                // Ingest may have re-created a bucket under this key while
                // we were persisting; merge rather than clobber.
                let mut map = lock_buckets(buckets);
                match map.entry(key) {
                    std::collections::hash_map::Entry::Occupied(mut entry) => {
                        entry.get_mut().merge(&bucket);
                    }
                    std::collections::hash_map::Entry::Vacant(entry) => {
                        entry.insert(bucket);
                    }
                }
                outcome.retained += 1;
            }
        }
    }

    outcome
}

/// Periodic flush task. Runs until cancelled; does not drain on shutdown.
pub(crate) async fn run_scheduler(
    buckets: BucketMap,
    store: Arc<dyn AggregateStore>,
    events: EventBus,
    interval_secs: u64,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first interval tick fires immediately; harmless, skip it anyway
    // so the first real flush happens one full period after start.
    ticker.tick().await;

    info!(interval_secs, "Flush scheduler started");

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("Flush scheduler stopped");
                break;
            }
            _ = ticker.tick() => {
                let outcome = flush_completed(&buckets, store.as_ref(), &events, Utc::now());
                if outcome.flushed > 0 || outcome.retained > 0 {
                    debug!(
                        flushed = outcome.flushed,
                        retained = outcome.retained,
                        "Flush tick complete"
                    );
                }
            }
        }
    }
}
