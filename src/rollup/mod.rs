//! Rollup aggregators: derive coarser records from persisted finer ones.
//!
//! Both stages share the same shape: read the finer-resolution rows inside
//! the target window, group by station, summarize, classify tendency
//! against the previous same-resolution record, upsert, broadcast. The
//! upsert keying makes every rollup idempotent — re-running an interval
//! with unchanged source data rewrites identical values under the same key.
//!
//! Rollups read only persisted data, never the live bucket map, so they
//! need no coordination with the flush scheduler beyond firing a few
//! seconds after the boundary (see `rollup_grace_secs`).

pub mod hourly;
pub mod ten_minute;

use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broadcast::EventBus;
use crate::config::AggregationConfig;
use crate::storage::{AggregateStore, StoreError};
use crate::types::Resolution;

/// The two rollup stages. One-minute records are produced by the flush
/// scheduler, not by a rollup, so they are not a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollupStage {
    TenMinute,
    Hourly,
}

impl RollupStage {
    /// Resolution of the records this stage produces.
    pub fn resolution(self) -> Resolution {
        match self {
            Self::TenMinute => Resolution::TenMinute,
            Self::Hourly => Resolution::Hourly,
        }
    }

    /// Resolution of the records this stage reads.
    pub fn source_resolution(self) -> Resolution {
        match self {
            Self::TenMinute => Resolution::OneMinute,
            Self::Hourly => Resolution::TenMinute,
        }
    }
}

impl std::fmt::Display for RollupStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TenMinute => f.write_str("ten-minute"),
            Self::Hourly => f.write_str("hourly"),
        }
    }
}

/// Parse error for [`RollupStage`].
#[derive(Debug, thiserror::Error)]
#[error("unknown rollup stage '{0}' (expected 'ten-minute' or 'hourly')")]
pub struct ParseStageError(String);

impl FromStr for RollupStage {
    type Err = ParseStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ten-minute" => Ok(Self::TenMinute),
            "hourly" => Ok(Self::Hourly),
            other => Err(ParseStageError(other.to_string())),
        }
    }
}

/// Result of one rollup invocation.
#[derive(Debug, Clone)]
pub struct RollupOutcome {
    pub interval_start: DateTime<Utc>,
    /// Stations for which a record was written. Zero means the interval
    /// had no source data — a gap, not an error.
    pub stations: usize,
}

/// Run one rollup stage for a single interval.
pub fn run_stage(
    stage: RollupStage,
    store: &dyn AggregateStore,
    events: &EventBus,
    cfg: &AggregationConfig,
    interval_start: DateTime<Utc>,
) -> Result<RollupOutcome, StoreError> {
    match stage {
        RollupStage::TenMinute => ten_minute::run(store, events, cfg, interval_start),
        RollupStage::Hourly => hourly::run(store, events, cfg, interval_start),
    }
}

/// Periodic rollup driver: fires once per resolution width, shortly after
/// each boundary, for the just-completed interval. The still-open current
/// interval is never processed.
pub(crate) async fn run_driver(
    stage: RollupStage,
    store: Arc<dyn AggregateStore>,
    events: EventBus,
    cfg: AggregationConfig,
    cancel: CancellationToken,
) {
    let width = stage.resolution().width();
    info!(stage = %stage, "Rollup driver started");

    loop {
        let now = Utc::now();
        let next_boundary = stage.resolution().align(now) + width;
        #[allow(clippy::cast_possible_wrap)]
        let fire_at = next_boundary + chrono::Duration::seconds(cfg.rollup_grace_secs as i64);
        let delay = (fire_at - now).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            () = cancel.cancelled() => {
                info!(stage = %stage, "Rollup driver stopped");
                break;
            }
            () = tokio::time::sleep(delay) => {
                let interval_start = next_boundary - width;
                match run_stage(stage, store.as_ref(), &events, &cfg, interval_start) {
                    Ok(outcome) => {
                        info!(
                            stage = %stage,
                            interval = %outcome.interval_start,
                            stations = outcome.stations,
                            "Scheduled rollup complete"
                        );
                    }
                    Err(e) => {
                        // Skip the interval; the catch-up engine or the
                        // next backfill pass picks it up.
                        warn!(
                            stage = %stage,
                            interval = %interval_start,
                            error = %e,
                            "Scheduled rollup failed"
                        );
                    }
                }
            }
        }
    }
}
