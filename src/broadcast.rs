//! Broadcast of finalized aggregates to pub/sub subscribers.
//!
//! A single bounded `tokio::sync::broadcast` channel carries every
//! [`AggregateEvent`]; the event's `channel` field names the logical
//! resolution-and-station topic (`wind:1m:vasiliki-001`, ...) so a
//! downstream transport can fan events out per topic. Delivery is
//! at-least-once at best: a subscriber that lags past the channel capacity
//! misses events, and nobody listening is not an error.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::{HourlyAggregate, OneMinuteAggregate, Resolution, TenMinuteAggregate};

/// Payload of a broadcast event: the freshly persisted aggregate.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "resolution", rename_all = "kebab-case")]
pub enum AggregatePayload {
    OneMinute(OneMinuteAggregate),
    TenMinute(TenMinuteAggregate),
    Hourly(HourlyAggregate),
}

impl AggregatePayload {
    pub fn resolution(&self) -> Resolution {
        match self {
            Self::OneMinute(_) => Resolution::OneMinute,
            Self::TenMinute(_) => Resolution::TenMinute,
            Self::Hourly(_) => Resolution::Hourly,
        }
    }

    pub fn station_id(&self) -> &str {
        match self {
            Self::OneMinute(agg) => &agg.station_id,
            Self::TenMinute(agg) => &agg.station_id,
            Self::Hourly(agg) => &agg.station_id,
        }
    }
}

/// A single broadcast event on a resolution- and station-specific channel.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateEvent {
    /// Logical channel name: `<prefix>:<resolution>:<station>`.
    pub channel: String,
    #[serde(flatten)]
    pub payload: AggregatePayload,
}

/// Handle to the aggregate broadcast channel.
///
/// Cloneable; all clones share one underlying channel. Subscribers created
/// after an event was sent do not see it.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AggregateEvent>,
    channel_prefix: String,
}

impl EventBus {
    pub fn new(capacity: usize, channel_prefix: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            channel_prefix: channel_prefix.into(),
        }
    }

    /// Subscribe to all aggregate events.
    pub fn subscribe(&self) -> broadcast::Receiver<AggregateEvent> {
        self.sender.subscribe()
    }

    /// Publish a freshly persisted aggregate.
    ///
    /// Returns the number of subscribers that received the event. Zero
    /// subscribers is normal during startup and in tests.
    pub fn publish(&self, payload: AggregatePayload) -> usize {
        let channel = format!(
            "{}:{}:{}",
            self.channel_prefix,
            payload.resolution().tag(),
            payload.station_id()
        );

        let event = AggregateEvent { channel, payload };
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("Aggregate event dropped: no broadcast subscribers");
                0
            }
        }
    }

    /// Current subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
