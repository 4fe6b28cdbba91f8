//! # Notification Module
//!
//! Fire-and-forget publication of domain events. Delivery transport
//! (WebSocket fan-out, push, e-mail) is a downstream concern; this
//! module only defines the messages and a broadcast channel that
//! interested consumers subscribe to.
//!
//! Publishing is strictly after-commit and isolated: a notification
//! that finds no subscriber, or a subscriber that lags and drops
//! messages, never affects the state transition that triggered it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::db::SeatStatus;

/// Buffered messages per subscriber before the oldest are dropped.
const CHANNEL_CAPACITY: usize = 1024;

/// Notification event types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Notification {
    /// A seat changed status (reserved, released, or sold).
    SeatStatusChanged {
        event_id: i64,
        seat_id: i64,
        seat_code: String,
        status: SeatStatus,
    },

    /// A queue entry was admitted and may start seat selection.
    QueueEntered {
        event_id: i64,
        user_id: i64,
        expires_at: DateTime<Utc>,
    },

    /// A queue entry's window lapsed.
    QueueExpired { event_id: i64, user_id: i64 },

    /// Payment confirmed; the purchase is final.
    PaymentCompleted {
        event_id: i64,
        user_id: i64,
        seat_id: i64,
    },
}

/// Timestamped wrapper that goes over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationMessage {
    #[serde(flatten)]
    pub notification: Notification,
    pub timestamp: DateTime<Utc>,
}

/// Broadcast publisher for domain notifications.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<NotificationMessage>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish a notification to whoever is listening.
    ///
    /// Never fails: with no subscribers the message is simply
    /// dropped, which is the correct behavior for advisory events.
    pub fn publish(&self, notification: Notification) {
        let message = NotificationMessage {
            notification,
            timestamp: Utc::now(),
        };

        match self.tx.send(message) {
            Ok(receivers) => debug!(receivers, "Published notification"),
            Err(_) => debug!("No notification subscribers, message dropped"),
        }
    }

    /// Subscribe to the notification stream.
    #[allow(dead_code)] // consumed by downstream delivery transports
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationMessage> {
        self.tx.subscribe()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();

        notifier.publish(Notification::QueueExpired {
            event_id: 1,
            user_id: 42,
        });

        let message = rx.recv().await.unwrap();
        match message.notification {
            Notification::QueueExpired { event_id, user_id } => {
                assert_eq!(event_id, 1);
                assert_eq!(user_id, 42);
            }
            other => panic!("unexpected notification: {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let notifier = Notifier::new();
        // Must not panic or error
        notifier.publish(Notification::QueueExpired {
            event_id: 1,
            user_id: 42,
        });
    }

    #[test]
    fn test_wire_format() {
        let message = NotificationMessage {
            notification: Notification::SeatStatusChanged {
                event_id: 1,
                seat_id: 10,
                seat_code: "A1".into(),
                status: SeatStatus::Reserved,
            },
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"event\":\"seat_status_changed\""));
        assert!(json.contains("\"seat_code\":\"A1\""));
    }
}
