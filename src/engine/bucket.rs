//! Live minute buckets: per-station, per-minute running statistics.
//!
//! A bucket exists only between the first sample of its minute and the
//! flush that finalizes it. All bucket mutation happens under the engine's
//! bucket-map lock, so the fields here need no interior synchronization.

use chrono::{DateTime, Utc};

use crate::stats::DirectionHistogram;
use crate::types::OneMinuteAggregate;

/// Identity of a live bucket: one station, one minute interval.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub station_id: String,
    /// Minute-aligned interval start.
    pub interval_start: DateTime<Utc>,
}

/// Running statistics for one unfinished minute interval.
#[derive(Debug, Clone)]
pub struct MinuteBucket {
    speed_sum: f64,
    min_speed: f64,
    max_speed: f64,
    directions: DirectionHistogram,
    sample_count: u32,
}

impl MinuteBucket {
    /// Create a bucket from its first sample.
    pub fn first_sample(speed_mps: f64, direction_deg: f64) -> Self {
        let mut directions = DirectionHistogram::new();
        directions.increment(direction_deg);
        Self {
            speed_sum: speed_mps,
            min_speed: speed_mps,
            max_speed: speed_mps,
            directions,
            sample_count: 1,
        }
    }

    /// Fold one more sample into the running statistics.
    pub fn record(&mut self, speed_mps: f64, direction_deg: f64) {
        self.speed_sum += speed_mps;
        self.min_speed = self.min_speed.min(speed_mps);
        self.max_speed = self.max_speed.max(speed_mps);
        self.directions.increment(direction_deg);
        self.sample_count = self.sample_count.saturating_add(1);
    }

    /// Fold another bucket for the same key into this one.
    ///
    /// Used when a failed flush puts a bucket back and ingest has meanwhile
    /// re-created a bucket under the same key.
    pub fn merge(&mut self, other: &Self) {
        self.speed_sum += other.speed_sum;
        self.min_speed = self.min_speed.min(other.min_speed);
        self.max_speed = self.max_speed.max(other.max_speed);
        self.directions.merge(&other.directions);
        self.sample_count = self.sample_count.saturating_add(other.sample_count);
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// Finalize into a persisted one-minute record.
    ///
    /// A bucket always holds at least one sample (it is created from one),
    /// so the average is well-defined.
    pub fn finalize(&self, key: &BucketKey) -> OneMinuteAggregate {
        OneMinuteAggregate {
            station_id: key.station_id.clone(),
            timestamp: key.interval_start,
            avg_speed: self.speed_sum / f64::from(self.sample_count.max(1)),
            min_speed: self.min_speed,
            max_speed: self.max_speed,
            dominant_direction: self.directions.dominant().unwrap_or(0),
            sample_count: self.sample_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key() -> BucketKey {
        BucketKey {
            station_id: "vasiliki-001".to_string(),
            interval_start: Utc.with_ymd_and_hms(2024, 7, 14, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_running_statistics() {
        let mut bucket = MinuteBucket::first_sample(3.0, 90.0);
        for speed in [4.0, 5.0, 6.0, 7.0] {
            bucket.record(speed, 90.0);
        }

        let agg = bucket.finalize(&key());
        assert!((agg.avg_speed - 5.0).abs() < f64::EPSILON);
        assert!((agg.min_speed - 3.0).abs() < f64::EPSILON);
        assert!((agg.max_speed - 7.0).abs() < f64::EPSILON);
        assert_eq!(agg.dominant_direction, 90);
        assert_eq!(agg.sample_count, 5);
    }

    #[test]
    fn test_dominant_direction_is_mode() {
        let mut bucket = MinuteBucket::first_sample(5.0, 10.0);
        bucket.record(5.0, 10.0);
        bucket.record(5.0, 10.0);
        for _ in 0..5 {
            bucket.record(5.0, 20.0);
        }
        assert_eq!(bucket.finalize(&key()).dominant_direction, 20);
    }

    #[test]
    fn test_merge_combines_everything() {
        let mut a = MinuteBucket::first_sample(2.0, 45.0);
        a.record(4.0, 45.0);

        let mut b = MinuteBucket::first_sample(10.0, 180.0);
        b.record(8.0, 45.0);

        a.merge(&b);
        let agg = a.finalize(&key());
        assert_eq!(agg.sample_count, 4);
        assert!((agg.avg_speed - 6.0).abs() < f64::EPSILON);
        assert!((agg.min_speed - 2.0).abs() < f64::EPSILON);
        assert!((agg.max_speed - 10.0).abs() < f64::EPSILON);
        assert_eq!(agg.dominant_direction, 45);
    }
}
