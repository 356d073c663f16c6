//! System-wide default constants.
//!
//! Centralises the engine's magic numbers. Grouped by subsystem for easy
//! discovery; every value here can be overridden from `aiolos.toml`.

// ============================================================================
// Flush scheduler
// ============================================================================

/// Flush tick period (seconds).
///
/// Deliberately shorter than the 1-minute bucket width so completed buckets
/// are finalized promptly instead of waiting for the next bucket boundary.
pub const FLUSH_INTERVAL_SECS: u64 = 30;

// ============================================================================
// Rollups
// ============================================================================

/// Speed delta (m/s) the current average must exceed, strictly, relative to
/// the previous same-resolution average before a tendency is declared.
pub const TENDENCY_THRESHOLD_MPS: f64 = 0.5;

/// Ten-minute averages below this (m/s) count as a calm period in the
/// hourly rollup.
pub const CALM_THRESHOLD_MPS: f64 = 1.0;

/// Delay after a resolution boundary before the rollup driver fires
/// (seconds). Gives the flush scheduler time to land the final records of
/// the just-completed interval.
pub const ROLLUP_GRACE_SECS: u64 = 5;

// ============================================================================
// Backfill
// ============================================================================

/// Lookback window for the ten-minute catch-up pass (minutes).
pub const TEN_MINUTE_BACKFILL_LOOKBACK_MINS: i64 = 60;

/// Lookback window for the hourly catch-up pass (minutes). 360 = 6 hours.
pub const HOURLY_BACKFILL_LOOKBACK_MINS: i64 = 360;

// ============================================================================
// Broadcast
// ============================================================================

/// Bounded capacity of the broadcast channel. Slow subscribers lagging
/// behind by more than this many events start missing events
/// (at-least-once, not exactly-once).
pub const BROADCAST_CAPACITY: usize = 256;

/// Prefix for broadcast channel names: `<prefix>:<resolution>:<station>`.
pub const BROADCAST_CHANNEL_PREFIX: &str = "wind";

// ============================================================================
// Server
// ============================================================================

/// Default bind address for the admin HTTP surface.
pub const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:8080";

/// Default sled data directory.
pub const DEFAULT_DATA_DIR: &str = "data/aggregates";
