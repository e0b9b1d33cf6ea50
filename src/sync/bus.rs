//! Typed publish/subscribe for session notifications.
//!
//! Subscribers pick a topic and receive only that topic's events. Dropping
//! the [`Subscription`] unsubscribes.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

use crate::io::api::ApiError;
use crate::sync::connection::ConnectionError;
use crate::sync::dispatcher::OpId;

/// Which push channel a connection notice is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sse,
    Socket,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Sse => write!(f, "sse"),
            Channel::Socket => write!(f, "socket"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected {
        channel: Channel,
    },
    Reconnecting {
        channel: Channel,
        attempt: u32,
        #[serde(serialize_with = "as_millis")]
        delay: Duration,
    },
    /// Retries exhausted or a non-retryable failure
    Failed {
        channel: Channel,
        error: ConnectionError,
    },
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Everything the session announces
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The canonical store was replaced; `revision` increases by one per change
    StoreChanged { revision: u64 },
    Connection(ConnectionStatus),
    /// A persistence call failed and the rollback policy has been applied
    PersistFailed {
        op: OpId,
        intent: &'static str,
        error: ApiError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Store,
    Connection,
    Persistence,
    All,
}

impl SessionEvent {
    pub fn topic(&self) -> Topic {
        match self {
            SessionEvent::StoreChanged { .. } => Topic::Store,
            SessionEvent::Connection(_) => Topic::Connection,
            SessionEvent::PersistFailed { .. } => Topic::Persistence,
        }
    }
}

/// Cloneable handle for publishing and subscribing
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        EventBus { tx }
    }

    /// Publish to current subscribers. Returns how many received it.
    pub fn publish(&self, event: SessionEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        Subscription {
            topic,
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// A live subscription to one topic
#[derive(Debug)]
pub struct Subscription {
    topic: Topic,
    rx: broadcast::Receiver<SessionEvent>,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    fn wants(&self, event: &SessionEvent) -> bool {
        self.topic == Topic::All || event.topic() == self.topic
    }

    /// Next event on this topic; `None` once the bus is gone. Events missed
    /// by a slow subscriber are skipped with a warning.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "subscriber lagged behind the event bus");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-queued event on this topic, without waiting
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(skipped = n, "subscriber lagged behind the event bus");
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn topics_filter_events() {
        let bus = EventBus::default();
        let mut store = bus.subscribe(Topic::Store);
        let mut conn = bus.subscribe(Topic::Connection);

        bus.publish(SessionEvent::Connection(ConnectionStatus::Connected {
            channel: Channel::Sse,
        }));
        bus.publish(SessionEvent::StoreChanged { revision: 1 });

        assert_eq!(
            store.recv().await,
            Some(SessionEvent::StoreChanged { revision: 1 })
        );
        assert!(matches!(
            conn.recv().await,
            Some(SessionEvent::Connection(ConnectionStatus::Connected { .. }))
        ));
        assert!(conn.try_recv().is_none());
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let bus = EventBus::default();
        let sub = bus.subscribe(Topic::All);
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(SessionEvent::StoreChanged { revision: 2 }), 0);
    }

    #[test]
    fn status_serializes_for_json_output() {
        let status = ConnectionStatus::Reconnecting {
            channel: Channel::Socket,
            attempt: 2,
            delay: Duration::from_millis(2000),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "reconnecting");
        assert_eq!(json["channel"], "socket");
        assert_eq!(json["delay"], 2000);
    }
}
