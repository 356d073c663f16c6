//! Core data model for the aggregation engine.
//!
//! Three persisted record types, one per resolution, plus the transient
//! [`RawSample`] consumed by the minute-bucket accumulator. Every persisted
//! timestamp is exactly aligned to its resolution boundary (see
//! [`Resolution::align`]); the store enforces at most one record per
//! (station, timestamp, resolution) by keying on exactly that pair.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Resolution
// ============================================================================

/// Aggregation resolution: the width of the time window a record summarizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    OneMinute,
    TenMinute,
    Hourly,
}

impl Resolution {
    /// Window width of this resolution.
    pub fn width(self) -> Duration {
        match self {
            Self::OneMinute => Duration::minutes(1),
            Self::TenMinute => Duration::minutes(10),
            Self::Hourly => Duration::hours(1),
        }
    }

    /// Floor a timestamp down to the start of its containing window.
    ///
    /// Sub-second precision is dropped; the result is always a whole-second
    /// UTC timestamp on a resolution boundary.
    pub fn align(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let width_secs = self.width().num_seconds();
        let aligned = ts.timestamp() - ts.timestamp().rem_euclid(width_secs);
        DateTime::from_timestamp(aligned, 0).unwrap_or(ts)
    }

    /// Short tag used in broadcast channel names and log fields.
    pub fn tag(self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::TenMinute => "10m",
            Self::Hourly => "1h",
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

// ============================================================================
// Tendency
// ============================================================================

/// Qualitative trend between an aggregate and its immediate predecessor
/// at the same resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tendency {
    Increasing,
    Decreasing,
    Stable,
}

impl std::fmt::Display for Tendency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Increasing => f.write_str("increasing"),
            Self::Decreasing => f.write_str("decreasing"),
            Self::Stable => f.write_str("stable"),
        }
    }
}

// ============================================================================
// Raw sample
// ============================================================================

/// A single raw wind reading from a station.
///
/// Transient: consumed once by `AggregationEngine::ingest` and never
/// persisted. Validation (speed >= 0, direction in 0..360) happens in the
/// ingestion layer upstream of this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSample {
    pub station_id: String,
    /// Wind speed in m/s.
    pub speed_mps: f64,
    /// Wind direction in degrees, 0 = north, clockwise.
    pub direction_deg: f64,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Persisted aggregates
// ============================================================================

/// One-minute wind aggregate for a single station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneMinuteAggregate {
    pub station_id: String,
    /// Minute-aligned interval start.
    pub timestamp: DateTime<Utc>,
    pub avg_speed: f64,
    pub min_speed: f64,
    pub max_speed: f64,
    /// Mode of the rounded-degree direction histogram.
    pub dominant_direction: u16,
    pub sample_count: u32,
}

/// Ten-minute wind aggregate, rolled up from one-minute records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenMinuteAggregate {
    pub station_id: String,
    /// 10-minute-aligned interval start.
    pub timestamp: DateTime<Utc>,
    pub avg_speed: f64,
    pub min_speed: f64,
    pub max_speed: f64,
    pub dominant_direction: u16,
    pub tendency: Tendency,
}

/// Hourly wind aggregate, rolled up from ten-minute records.
///
/// Adds gust and calm statistics on top of the ten-minute fields:
/// `gust_speed` is the max of the contributing ten-minute `max_speed`
/// values, `calm_periods` counts contributing ten-minute records whose
/// average fell below the configured calm threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyAggregate {
    pub station_id: String,
    /// Hour-aligned interval start.
    pub timestamp: DateTime<Utc>,
    pub avg_speed: f64,
    pub min_speed: f64,
    pub max_speed: f64,
    pub dominant_direction: u16,
    pub tendency: Tendency,
    pub gust_speed: f64,
    pub calm_periods: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 14, h, m, s).unwrap()
    }

    #[test]
    fn test_minute_alignment() {
        assert_eq!(Resolution::OneMinute.align(ts(10, 0, 37)), ts(10, 0, 0));
        assert_eq!(Resolution::OneMinute.align(ts(10, 0, 0)), ts(10, 0, 0));
    }

    #[test]
    fn test_ten_minute_alignment() {
        assert_eq!(Resolution::TenMinute.align(ts(10, 9, 59)), ts(10, 0, 0));
        assert_eq!(Resolution::TenMinute.align(ts(10, 10, 0)), ts(10, 10, 0));
        assert_eq!(Resolution::TenMinute.align(ts(10, 47, 12)), ts(10, 40, 0));
    }

    #[test]
    fn test_hour_alignment() {
        assert_eq!(Resolution::Hourly.align(ts(10, 59, 59)), ts(10, 0, 0));
        assert_eq!(Resolution::Hourly.align(ts(11, 0, 0)), ts(11, 0, 0));
    }

    #[test]
    fn test_alignment_drops_subseconds() {
        let t = ts(10, 3, 2) + chrono::Duration::milliseconds(450);
        assert_eq!(Resolution::OneMinute.align(t), ts(10, 3, 0));
    }

    #[test]
    fn test_resolution_tags() {
        assert_eq!(Resolution::OneMinute.tag(), "1m");
        assert_eq!(Resolution::TenMinute.tag(), "10m");
        assert_eq!(Resolution::Hourly.tag(), "1h");
    }
}
