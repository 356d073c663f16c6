//! Aiolos wind telemetry aggregation engine.
//!
//! Turns raw (speed, direction, timestamp) readings from remote wind
//! stations into a three-resolution time series:
//!
//! - raw samples accumulate in live one-minute buckets, flushed to
//!   persisted one-minute aggregates on a schedule
//! - one-minute aggregates roll up into ten-minute aggregates with a
//!   tendency classification against the previous interval
//! - ten-minute aggregates roll up into hourly aggregates with gust and
//!   calm-period statistics
//!
//! Every finalized aggregate is persisted via [`storage::AggregateStore`]
//! and broadcast on a resolution- and station-specific channel through
//! [`broadcast::EventBus`]. Missed intervals are recovered by
//! [`backfill::backfill_recent`]; a small axum admin surface ([`api`])
//! exposes health and manual triggers.

pub mod api;
pub mod backfill;
pub mod broadcast;
pub mod config;
pub mod engine;
pub mod rollup;
pub mod stats;
pub mod storage;
pub mod types;

pub use broadcast::{AggregateEvent, AggregatePayload, EventBus};
pub use config::EngineConfig;
pub use engine::AggregationEngine;
pub use rollup::RollupStage;
pub use storage::{AggregateStore, MemoryStore, SledStore, StoreError};
pub use types::{
    HourlyAggregate, OneMinuteAggregate, RawSample, Resolution, Tendency, TenMinuteAggregate,
};
