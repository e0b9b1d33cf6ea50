//! Liveness and reconnection for the push channels.
//!
//! A supervisor runs one channel at a time. Any frame resets the heartbeat
//! timer; silence past the timeout, a transport failure, or a closed stream
//! counts as a failed attempt. Attempts are retried with exponential backoff
//! until `max_retries` consecutive failures, after which the error is
//! published and the supervisor stops. Authentication failures are never
//! retried.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::model::config::RealtimeConfig;
use crate::sync::bus::{Channel, ConnectionStatus, EventBus, SessionEvent};
use crate::sync::events::RemoteEvent;

/// Error type surfaced when a push channel cannot be kept alive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "message")]
pub enum ConnectionError {
    #[serde(rename = "connection_error")]
    #[error("connection error: {0}")]
    Connection(String),
    #[serde(rename = "auth_error")]
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[serde(rename = "network_error")]
    #[error("network error: {0}")]
    Network(String),
    #[serde(rename = "heartbeat_timeout")]
    #[error("no heartbeat received in time")]
    HeartbeatTimeout,
}

impl ConnectionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionError::Connection(_) => "connection_error",
            ConnectionError::Auth(_) => "auth_error",
            ConnectionError::Network(_) => "network_error",
            ConnectionError::HeartbeatTimeout => "heartbeat_timeout",
        }
    }

    fn is_retryable(&self) -> bool {
        !matches!(self, ConnectionError::Auth(_))
    }
}

/// Future returned by [`PushChannel::run`]
pub type StreamFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ConnectionError>> + Send + 'a>>;

/// A server push stream. `run` connects, forwards decoded events into
/// `sink` until the stream ends, and returns why it ended. Heartbeats are
/// forwarded too so the supervisor can track liveness.
pub trait PushChannel: Send + Sync {
    fn channel(&self) -> Channel;
    fn run(&self, sink: mpsc::Sender<RemoteEvent>) -> StreamFuture<'_>;
}

/// Delay before reconnect attempt `attempt` (0-based): base doubled per
/// attempt, capped at the configured maximum.
pub fn backoff_delay(attempt: u32, config: &RealtimeConfig) -> Duration {
    let factor = 2u64.saturating_pow(attempt);
    let millis = config.backoff_base_ms.saturating_mul(factor);
    Duration::from_millis(millis.min(config.backoff_max_ms))
}

enum RunEnd {
    /// The consumer went away; stop without error
    Stopped,
    Failed {
        error: ConnectionError,
        received: bool,
    },
}

/// Keep `channel` connected, forwarding non-heartbeat events to `events`.
/// Returns `Ok` when the receiving side of `events` is dropped, or the
/// final error once retries are exhausted.
pub async fn supervise(
    channel: Arc<dyn PushChannel>,
    config: RealtimeConfig,
    events: mpsc::Sender<RemoteEvent>,
    bus: EventBus,
) -> Result<(), ConnectionError> {
    let name = channel.channel();
    let mut failures: u32 = 0;
    loop {
        debug!(channel = %name, "connecting");
        let (error, received) = match run_once(channel.as_ref(), &config, &events, &bus).await {
            RunEnd::Stopped => return Ok(()),
            RunEnd::Failed { error, received } => (error, received),
        };
        if received {
            failures = 0;
        }
        failures += 1;
        if !error.is_retryable() || failures > config.max_retries {
            warn!(channel = %name, %error, attempts = failures, "giving up on push channel");
            bus.publish(SessionEvent::Connection(ConnectionStatus::Failed {
                channel: name,
                error: error.clone(),
            }));
            return Err(error);
        }
        let delay = backoff_delay(failures - 1, &config);
        info!(channel = %name, %error, attempt = failures, ?delay, "reconnecting");
        bus.publish(SessionEvent::Connection(ConnectionStatus::Reconnecting {
            channel: name,
            attempt: failures,
            delay,
        }));
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = events.closed() => return Ok(()),
        }
    }
}

async fn run_once(
    channel: &dyn PushChannel,
    config: &RealtimeConfig,
    events: &mpsc::Sender<RemoteEvent>,
    bus: &EventBus,
) -> RunEnd {
    let (tx, mut rx) = mpsc::channel(64);
    let mut run = channel.run(tx);
    let mut outcome: Option<Result<(), ConnectionError>> = None;
    let mut received = false;

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(event) => {
                    if !received {
                        received = true;
                        bus.publish(SessionEvent::Connection(ConnectionStatus::Connected {
                            channel: channel.channel(),
                        }));
                    }
                    if event.is_heartbeat() {
                        continue;
                    }
                    if events.send(event).await.is_err() {
                        return RunEnd::Stopped;
                    }
                }
                None => {
                    // sink dropped: the run future has finished
                    let result = match outcome.take() {
                        Some(result) => result,
                        None => run.await,
                    };
                    let error = match result {
                        Ok(()) => ConnectionError::Network("stream closed".to_string()),
                        Err(e) => e,
                    };
                    return RunEnd::Failed { error, received };
                }
            },
            result = &mut run, if outcome.is_none() => outcome = Some(result),
            () = tokio::time::sleep(config.heartbeat_timeout()) => {
                return RunEnd::Failed {
                    error: ConnectionError::HeartbeatTimeout,
                    received,
                };
            }
            () = events.closed() => return RunEnd::Stopped,
        }
    }
}

/// Start a supervisor per channel. Events from all of them arrive on the
/// returned receiver; dropping it stops the supervisors.
pub fn spawn_channels(
    channels: Vec<Arc<dyn PushChannel>>,
    config: &RealtimeConfig,
    bus: &EventBus,
) -> (mpsc::Receiver<RemoteEvent>, Vec<JoinHandle<Result<(), ConnectionError>>>) {
    let (tx, rx) = mpsc::channel(256);
    let handles = channels
        .into_iter()
        .map(|channel| tokio::spawn(supervise(channel, config.clone(), tx.clone(), bus.clone())))
        .collect();
    (rx, handles)
}
