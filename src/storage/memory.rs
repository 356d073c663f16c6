//! In-memory aggregate store for tests and minimal deployments.
//!
//! Thread-safe via `RwLock`. Not durable — data lost on restart.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{AggregateStore, StoreError, StoreStats};
use crate::types::{HourlyAggregate, OneMinuteAggregate, Resolution, TenMinuteAggregate};

type Table<T> = RwLock<BTreeMap<(String, i64), T>>;

/// In-memory store backed by per-resolution `BTreeMap`s keyed
/// (station, epoch seconds), matching the sled key order.
#[derive(Default)]
pub struct MemoryStore {
    one_minute: Table<OneMinuteAggregate>,
    ten_minute: Table<TenMinuteAggregate>,
    hourly: Table<HourlyAggregate>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn upsert<T: Clone>(
        table: &Table<T>,
        station_id: &str,
        timestamp: DateTime<Utc>,
        record: &T,
    ) -> Result<(), StoreError> {
        let mut map = table.write().map_err(|e| StoreError::Storage(e.to_string()))?;
        map.insert((station_id.to_string(), timestamp.timestamp()), record.clone());
        Ok(())
    }

    fn get<T: Clone>(
        table: &Table<T>,
        station_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<T>, StoreError> {
        let map = table.read().map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(map.get(&(station_id.to_string(), timestamp.timestamp())).cloned())
    }

    fn range_all<T: Clone>(
        table: &Table<T>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<T>, StoreError> {
        let map = table.read().map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(map
            .iter()
            .filter(|((_, ts), _)| *ts >= start.timestamp() && *ts < end.timestamp())
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn latest_before<T: Clone>(
        table: &Table<T>,
        station_id: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<T>, StoreError> {
        let map = table.read().map_err(|e| StoreError::Storage(e.to_string()))?;
        let lo = (station_id.to_string(), i64::MIN);
        let hi = (station_id.to_string(), before.timestamp());
        Ok(map.range(lo..hi).next_back().map(|(_, record)| record.clone()))
    }

    fn station_history<T: Clone>(
        table: &Table<T>,
        station_id: &str,
    ) -> Result<Vec<T>, StoreError> {
        let map = table.read().map_err(|e| StoreError::Storage(e.to_string()))?;
        let lo = (station_id.to_string(), i64::MIN);
        let hi = (station_id.to_string(), i64::MAX);
        Ok(map.range(lo..=hi).map(|(_, record)| record.clone()).collect())
    }

    fn station_list<T>(table: &Table<T>) -> Result<Vec<String>, StoreError> {
        let map = table.read().map_err(|e| StoreError::Storage(e.to_string()))?;
        let mut stations: Vec<String> = map.keys().map(|(station, _)| station.clone()).collect();
        stations.dedup();
        Ok(stations)
    }
}

impl AggregateStore for MemoryStore {
    fn upsert_one_minute(&self, agg: &OneMinuteAggregate) -> Result<(), StoreError> {
        Self::upsert(&self.one_minute, &agg.station_id, agg.timestamp, agg)
    }

    fn get_one_minute(
        &self,
        station_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<OneMinuteAggregate>, StoreError> {
        Self::get(&self.one_minute, station_id, timestamp)
    }

    fn range_one_minute(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<OneMinuteAggregate>, StoreError> {
        Self::range_all(&self.one_minute, start, end)
    }

    fn upsert_ten_minute(&self, agg: &TenMinuteAggregate) -> Result<(), StoreError> {
        Self::upsert(&self.ten_minute, &agg.station_id, agg.timestamp, agg)
    }

    fn get_ten_minute(
        &self,
        station_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<TenMinuteAggregate>, StoreError> {
        Self::get(&self.ten_minute, station_id, timestamp)
    }

    fn range_ten_minute(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TenMinuteAggregate>, StoreError> {
        Self::range_all(&self.ten_minute, start, end)
    }

    fn latest_ten_minute_before(
        &self,
        station_id: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<TenMinuteAggregate>, StoreError> {
        Self::latest_before(&self.ten_minute, station_id, before)
    }

    fn station_ten_minute_history(
        &self,
        station_id: &str,
    ) -> Result<Vec<TenMinuteAggregate>, StoreError> {
        Self::station_history(&self.ten_minute, station_id)
    }

    fn upsert_hourly(&self, agg: &HourlyAggregate) -> Result<(), StoreError> {
        Self::upsert(&self.hourly, &agg.station_id, agg.timestamp, agg)
    }

    fn get_hourly(
        &self,
        station_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<HourlyAggregate>, StoreError> {
        Self::get(&self.hourly, station_id, timestamp)
    }

    fn latest_hourly_before(
        &self,
        station_id: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<HourlyAggregate>, StoreError> {
        Self::latest_before(&self.hourly, station_id, before)
    }

    fn station_hourly_history(
        &self,
        station_id: &str,
    ) -> Result<Vec<HourlyAggregate>, StoreError> {
        Self::station_history(&self.hourly, station_id)
    }

    fn stations(&self, resolution: Resolution) -> Result<Vec<String>, StoreError> {
        match resolution {
            Resolution::OneMinute => Self::station_list(&self.one_minute),
            Resolution::TenMinute => Self::station_list(&self.ten_minute),
            Resolution::Hourly => Self::station_list(&self.hourly),
        }
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        let one = self.one_minute.read().map_err(|e| StoreError::Storage(e.to_string()))?;
        let ten = self.ten_minute.read().map_err(|e| StoreError::Storage(e.to_string()))?;
        let hour = self.hourly.read().map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(StoreStats {
            one_minute_count: one.len(),
            ten_minute_count: ten.len(),
            hourly_count: hour.len(),
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
