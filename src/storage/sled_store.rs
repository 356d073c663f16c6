//! Sled-backed aggregate store.
//!
//! One sled tree per resolution. Keys are `station_id` bytes, a 0x00
//! separator, then the interval-start epoch seconds as big-endian i64 —
//! station-major, so per-station time ranges and latest-before lookups are
//! single prefix scans that sort chronologically for free.
//!
//! Values are JSON-serialized records. Writes do not flush on every call;
//! sled's background flushing is durable enough here because any record
//! lost to a crash is regenerated by the catch-up engine on restart.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use super::{AggregateStore, StoreError, StoreStats};
use crate::types::{HourlyAggregate, OneMinuteAggregate, Resolution, TenMinuteAggregate};

const ONE_MINUTE_TREE: &str = "one_minute";
const TEN_MINUTE_TREE: &str = "ten_minute";
const HOURLY_TREE: &str = "hourly";

/// Durable aggregate store on sled.
#[derive(Clone)]
pub struct SledStore {
    db: Arc<sled::Db>,
    one_minute: sled::Tree,
    ten_minute: sled::Tree,
    hourly: sled::Tree,
}

impl SledStore {
    /// Open or create the aggregate database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref)?;
        let one_minute = db.open_tree(ONE_MINUTE_TREE)?;
        let ten_minute = db.open_tree(TEN_MINUTE_TREE)?;
        let hourly = db.open_tree(HOURLY_TREE)?;

        tracing::info!(path = %path_ref.display(), "Aggregate store opened");

        Ok(Self {
            db: Arc::new(db),
            one_minute,
            ten_minute,
            hourly,
        })
    }

    /// Flush all trees to disk. Called on orderly shutdown.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn tree(&self, resolution: Resolution) -> &sled::Tree {
        match resolution {
            Resolution::OneMinute => &self.one_minute,
            Resolution::TenMinute => &self.ten_minute,
            Resolution::Hourly => &self.hourly,
        }
    }

    /// Key layout: `station_id || 0x00 || timestamp_secs_be`.
    fn key(station_id: &str, timestamp: DateTime<Utc>) -> Vec<u8> {
        let mut key = Vec::with_capacity(station_id.len() + 9);
        key.extend_from_slice(station_id.as_bytes());
        key.push(0x00);
        key.extend_from_slice(&timestamp.timestamp().to_be_bytes());
        key
    }

    /// Exclusive upper bound covering every key for `station_id`.
    fn station_upper_bound(station_id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(station_id.len() + 1);
        key.extend_from_slice(station_id.as_bytes());
        key.push(0x01);
        key
    }

    fn station_lower_bound(station_id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(station_id.len() + 1);
        key.extend_from_slice(station_id.as_bytes());
        key.push(0x00);
        key
    }

    fn upsert<T: Serialize>(
        tree: &sled::Tree,
        station_id: &str,
        timestamp: DateTime<Utc>,
        record: &T,
    ) -> Result<(), StoreError> {
        let key = Self::key(station_id, timestamp);
        let value = serde_json::to_vec(record)?;
        tree.insert(key, value)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(
        tree: &sled::Tree,
        station_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<T>, StoreError> {
        match tree.get(Self::key(station_id, timestamp))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Whole-tree scan filtered on `timestamp ∈ [start, end)`.
    ///
    /// Station-major keys make a cross-station time range a full scan; the
    /// rollup windows this serves are short and the trees stay small under
    /// the external retention policy, so this is fine in practice.
    fn range_all<T: DeserializeOwned>(
        tree: &sled::Tree,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<T>, StoreError> {
        let start_secs = start.timestamp();
        let end_secs = end.timestamp();
        let mut records = Vec::new();

        for item in tree.iter() {
            let (key, value) = item?;
            let Some(ts) = timestamp_from_key(&key) else {
                continue;
            };
            if ts >= start_secs && ts < end_secs {
                records.push(serde_json::from_slice(&value)?);
            }
        }

        Ok(records)
    }

    fn latest_before<T: DeserializeOwned>(
        tree: &sled::Tree,
        station_id: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<T>, StoreError> {
        let lo = Self::station_lower_bound(station_id);
        let hi = Self::key(station_id, before);

        match tree.range(lo..hi).rev().next() {
            Some(item) => {
                let (_key, value) = item?;
                Ok(Some(serde_json::from_slice(&value)?))
            }
            None => Ok(None),
        }
    }

    fn station_history<T: DeserializeOwned>(
        tree: &sled::Tree,
        station_id: &str,
    ) -> Result<Vec<T>, StoreError> {
        let lo = Self::station_lower_bound(station_id);
        let hi = Self::station_upper_bound(station_id);

        let mut records = Vec::new();
        for item in tree.range(lo..hi) {
            let (_key, value) = item?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }
}

/// Extract the big-endian timestamp suffix from a store key.
fn timestamp_from_key(key: &[u8]) -> Option<i64> {
    if key.len() < 9 {
        return None;
    }
    let ts_bytes: [u8; 8] = key[key.len() - 8..].try_into().ok()?;
    Some(i64::from_be_bytes(ts_bytes))
}

/// Extract the station id prefix from a store key.
fn station_from_key(key: &[u8]) -> Option<String> {
    if key.len() < 9 {
        return None;
    }
    let station_bytes = &key[..key.len() - 9];
    String::from_utf8(station_bytes.to_vec()).ok()
}

impl AggregateStore for SledStore {
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
        let mut stations = BTreeSet::new();
        for item in self.tree(resolution).iter() {
            let (key, _value) = item?;
            if let Some(station) = station_from_key(&key) {
                stations.insert(station);
            }
        }
        Ok(stations.into_iter().collect())
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(StoreStats {
            one_minute_count: self.one_minute.len(),
            ten_minute_count: self.ten_minute.len(),
            hourly_count: self.hourly.len(),
        })
    }

    fn backend_name(&self) -> &'static str {
        "sled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Tendency;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 14, h, m, 0).unwrap()
    }

    fn one_minute(station: &str, timestamp: DateTime<Utc>, avg: f64) -> OneMinuteAggregate {
        OneMinuteAggregate {
            station_id: station.to_string(),
            timestamp,
            avg_speed: avg,
            min_speed: avg - 1.0,
            max_speed: avg + 1.0,
            dominant_direction: 90,
            sample_count: 12,
        }
    }

    fn ten_minute(station: &str, timestamp: DateTime<Utc>, avg: f64) -> TenMinuteAggregate {
        TenMinuteAggregate {
            station_id: station.to_string(),
            timestamp,
            avg_speed: avg,
            min_speed: avg - 1.0,
            max_speed: avg + 1.0,
            dominant_direction: 90,
            tendency: Tendency::Stable,
        }
    }

    #[test]
    fn test_upsert_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        store.upsert_one_minute(&one_minute("vasiliki-001", ts(10, 0), 5.0)).unwrap();
        store.upsert_one_minute(&one_minute("vasiliki-001", ts(10, 0), 7.0)).unwrap();

        let got = store.get_one_minute("vasiliki-001", ts(10, 0)).unwrap().unwrap();
        assert!((got.avg_speed - 7.0).abs() < f64::EPSILON);
        assert_eq!(store.stats().unwrap().one_minute_count, 1);
    }

    #[test]
    fn test_range_is_half_open() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        for m in 0..=10 {
            store.upsert_one_minute(&one_minute("vasiliki-001", ts(10, m), 5.0)).unwrap();
        }

        let rows = store.range_one_minute(ts(10, 0), ts(10, 10)).unwrap();
        assert_eq!(rows.len(), 10);
        assert!(rows.iter().all(|r| r.timestamp < ts(10, 10)));
    }

    #[test]
    fn test_range_spans_stations() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        store.upsert_one_minute(&one_minute("vasiliki-001", ts(10, 1), 5.0)).unwrap();
        store.upsert_one_minute(&one_minute("vasiliki-002", ts(10, 2), 6.0)).unwrap();

        let rows = store.range_one_minute(ts(10, 0), ts(10, 10)).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_latest_before_is_strict() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        store.upsert_ten_minute(&ten_minute("vasiliki-001", ts(10, 0), 4.0)).unwrap();
        store.upsert_ten_minute(&ten_minute("vasiliki-001", ts(10, 10), 5.0)).unwrap();

        // Strictly earlier: the record at 10:10 itself must not match.
        let prev = store
            .latest_ten_minute_before("vasiliki-001", ts(10, 10))
            .unwrap()
            .unwrap();
        assert_eq!(prev.timestamp, ts(10, 0));

        let none = store.latest_ten_minute_before("vasiliki-001", ts(10, 0)).unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_latest_before_ignores_other_stations() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        store.upsert_ten_minute(&ten_minute("vasiliki-001", ts(10, 0), 4.0)).unwrap();

        let none = store.latest_ten_minute_before("vasiliki-002", ts(11, 0)).unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_station_history_chronological() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        // Insert out of order; prefix scan must come back sorted.
        store.upsert_ten_minute(&ten_minute("vasiliki-001", ts(10, 20), 6.0)).unwrap();
        store.upsert_ten_minute(&ten_minute("vasiliki-001", ts(10, 0), 4.0)).unwrap();
        store.upsert_ten_minute(&ten_minute("vasiliki-001", ts(10, 10), 5.0)).unwrap();

        let history = store.station_ten_minute_history("vasiliki-001").unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].timestamp, ts(10, 0));
        assert_eq!(history[2].timestamp, ts(10, 20));
    }

    #[test]
    fn test_stations_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        store.upsert_ten_minute(&ten_minute("vasiliki-002", ts(10, 0), 4.0)).unwrap();
        store.upsert_ten_minute(&ten_minute("vasiliki-001", ts(10, 0), 4.0)).unwrap();
        store.upsert_ten_minute(&ten_minute("vasiliki-001", ts(10, 10), 5.0)).unwrap();

        let stations = store.stations(Resolution::TenMinute).unwrap();
        assert_eq!(stations, vec!["vasiliki-001", "vasiliki-002"]);
    }
}
