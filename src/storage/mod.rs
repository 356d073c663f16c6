//! Persistence for wind aggregates.
//!
//! [`AggregateStore`] abstracts the three per-resolution stores so backends
//! can be swapped without touching engine or rollup code:
//! - [`SledStore`]: durable sled backend, one tree per resolution
//! - [`MemoryStore`]: in-memory store for tests and minimal deployments
//!
//! Every store is keyed by (station, timestamp); writes are upserts, so a
//! rollup re-run for the same interval overwrites in place and can never
//! create a duplicate record.

mod memory;
mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

use chrono::{DateTime, Utc};

use crate::types::{HourlyAggregate, OneMinuteAggregate, Resolution, TenMinuteAggregate};

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Record counts per resolution, surfaced on the health endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub one_minute_count: usize,
    pub ten_minute_count: usize,
    pub hourly_count: usize,
}

/// Trait for pluggable aggregate persistence backends.
///
/// Implementations must be thread-safe (Send + Sync): the flush scheduler,
/// the rollup drivers, and concurrent backfill runs all hold the same store.
/// Range reads return records sorted by station, then timestamp ascending.
pub trait AggregateStore: Send + Sync {
    // ------------------------------------------------------------------
    // One-minute
    // ------------------------------------------------------------------

    /// Insert or overwrite the one-minute record for (station, timestamp).
    fn upsert_one_minute(&self, agg: &OneMinuteAggregate) -> Result<(), StoreError>;

    fn get_one_minute(
        &self,
        station_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<OneMinuteAggregate>, StoreError>;

    /// All one-minute records with `timestamp ∈ [start, end)`, all stations.
    fn range_one_minute(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<OneMinuteAggregate>, StoreError>;

    // ------------------------------------------------------------------
    // Ten-minute
    // ------------------------------------------------------------------

    fn upsert_ten_minute(&self, agg: &TenMinuteAggregate) -> Result<(), StoreError>;

    fn get_ten_minute(
        &self,
        station_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<TenMinuteAggregate>, StoreError>;

    /// All ten-minute records with `timestamp ∈ [start, end)`, all stations.
    fn range_ten_minute(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TenMinuteAggregate>, StoreError>;

    /// The nearest ten-minute record strictly earlier than `before` for the
    /// station, if any. Used for tendency classification.
    fn latest_ten_minute_before(
        &self,
        station_id: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<TenMinuteAggregate>, StoreError>;

    /// Full ten-minute history for one station, chronological ascending.
    fn station_ten_minute_history(
        &self,
        station_id: &str,
    ) -> Result<Vec<TenMinuteAggregate>, StoreError>;

    // ------------------------------------------------------------------
    // Hourly
    // ------------------------------------------------------------------

    fn upsert_hourly(&self, agg: &HourlyAggregate) -> Result<(), StoreError>;

    fn get_hourly(
        &self,
        station_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<HourlyAggregate>, StoreError>;

    /// The nearest hourly record strictly earlier than `before` for the
    /// station, if any.
    fn latest_hourly_before(
        &self,
        station_id: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<HourlyAggregate>, StoreError>;

    /// Full hourly history for one station, chronological ascending.
    fn station_hourly_history(&self, station_id: &str)
        -> Result<Vec<HourlyAggregate>, StoreError>;

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    /// Distinct station ids present at the given resolution, sorted.
    fn stations(&self, resolution: Resolution) -> Result<Vec<String>, StoreError>;

    /// Record counts per resolution.
    fn stats(&self) -> Result<StoreStats, StoreError>;

    /// Backend name for logging.
    fn backend_name(&self) -> &'static str;
}
