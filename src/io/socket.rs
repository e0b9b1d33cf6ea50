//! socket.io over a WebSocket: the engine.io v4 packet codec and the reader
//! that joins the task namespace and forwards its events.

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, warn};

use crate::model::config::ServerConfig;
use crate::sync::bus::Channel;
use crate::sync::connection::{ConnectionError, PushChannel, StreamFuture};
use crate::sync::events::{EventError, RemoteEvent, decode_socket};

/// One engine.io text packet, with socket.io framing for type 4
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open,
    Close,
    Ping,
    Pong,
    Connect {
        namespace: String,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        name: String,
        payload: Value,
    },
    ConnectError {
        namespace: String,
        message: String,
    },
    /// Upgrade, noop and socket.io types this client never acts on
    Other(String),
}

pub fn parse_packet(text: &str) -> Result<Packet, EventError> {
    let mut chars = text.chars();
    let packet = match chars.next() {
        Some('0') => Packet::Open,
        Some('1') => Packet::Close,
        Some('2') => Packet::Ping,
        Some('3') => Packet::Pong,
        Some('4') => parse_message(&text[1..])?,
        Some(_) => Packet::Other(text.to_string()),
        None => return Err(EventError::Frame("empty packet".to_string())),
    };
    Ok(packet)
}

/// socket.io packet: `<type>[/<namespace>,][<ack id>][<json>]`
fn parse_message(text: &str) -> Result<Packet, EventError> {
    let kind = text
        .chars()
        .next()
        .ok_or_else(|| EventError::Frame("empty socket.io packet".to_string()))?;
    let rest = &text[kind.len_utf8()..];
    let (namespace, rest) = match rest.strip_prefix('/') {
        Some(after) => match after.split_once(',') {
            Some((ns, body)) => (format!("/{ns}"), body),
            None => (format!("/{after}"), ""),
        },
        None => ("/".to_string(), rest),
    };
    let body = rest.trim_start_matches(|c: char| c.is_ascii_digit());
    let json = || -> Result<Value, EventError> {
        if body.is_empty() {
            Ok(Value::Null)
        } else {
            serde_json::from_str(body).map_err(|e| EventError::Frame(e.to_string()))
        }
    };

    let packet = match kind {
        '0' => Packet::Connect { namespace },
        '1' => Packet::Disconnect { namespace },
        '2' => {
            let Value::Array(mut args) = json()? else {
                return Err(EventError::Frame("event payload is not an array".to_string()));
            };
            if args.is_empty() {
                return Err(EventError::Frame("event has no name".to_string()));
            }
            let name = match args.remove(0) {
                Value::String(name) => name,
                other => return Err(EventError::Frame(format!("event name {other} is not a string"))),
            };
            let payload = if args.is_empty() {
                Value::Null
            } else {
                args.remove(0)
            };
            Packet::Event {
                namespace,
                name,
                payload,
            }
        }
        '4' => {
            let value = json()?;
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string());
            Packet::ConnectError { namespace, message }
        }
        _ => Packet::Other(format!("4{text}")),
    };
    Ok(packet)
}

/// The namespace connect packet carrying the client's identity
pub fn connect_packet(namespace: &str, user_id: Option<&str>, token: Option<&str>) -> String {
    let auth = json!({ "userId": user_id, "token": token });
    if namespace == "/" {
        format!("40{auth}")
    } else {
        format!("40{namespace},{auth}")
    }
}

/// `ws(s)://host/socket.io/?EIO=4&transport=websocket` for an http(s) base URL
pub fn socket_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws}/socket.io/?EIO=4&transport=websocket")
}

/// [`PushChannel`] joining the task namespace over socket.io
pub struct SocketChannel {
    url: String,
    namespace: String,
    user_id: Option<String>,
    token: Option<String>,
}

impl SocketChannel {
    pub fn new(server: &ServerConfig, token: Option<String>) -> Self {
        SocketChannel {
            url: socket_url(&server.base_url),
            namespace: server.socket_namespace.clone(),
            user_id: server.user_id.clone(),
            token,
        }
    }

    async fn stream(&self, sink: mpsc::Sender<RemoteEvent>) -> Result<(), ConnectionError> {
        let (socket, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(connect_error)?;
        debug!(url = %self.url, "socket open");
        let (mut write, mut read) = socket.split();

        while let Some(message) = read.next().await {
            let message = message.map_err(|e| ConnectionError::Network(e.to_string()))?;
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => return Ok(()),
                _ => continue,
            };
            let packet = match parse_packet(&text) {
                Ok(packet) => packet,
                Err(error) => {
                    warn!(%error, "skipping malformed socket frame");
                    continue;
                }
            };
            let event = match packet {
                Packet::Open => {
                    let join = connect_packet(
                        &self.namespace,
                        self.user_id.as_deref(),
                        self.token.as_deref(),
                    );
                    write
                        .send(Message::Text(join.into()))
                        .await
                        .map_err(|e| ConnectionError::Network(e.to_string()))?;
                    continue;
                }
                Packet::Ping => {
                    write
                        .send(Message::Text("3".into()))
                        .await
                        .map_err(|e| ConnectionError::Network(e.to_string()))?;
                    RemoteEvent::Heartbeat
                }
                Packet::Connect { namespace } if namespace == self.namespace => {
                    debug!(%namespace, "joined namespace");
                    RemoteEvent::Heartbeat
                }
                Packet::ConnectError { message, .. } => return Err(ConnectionError::Auth(message)),
                Packet::Disconnect { namespace } if namespace == self.namespace => {
                    return Err(ConnectionError::Connection(format!(
                        "server left namespace {namespace}"
                    )));
                }
                Packet::Close => return Ok(()),
                Packet::Event {
                    namespace,
                    name,
                    payload,
                } if namespace == self.namespace => match decode_socket(&name, &payload) {
                    Ok(event) => event,
                    Err(error) => {
                        warn!(%name, %error, "skipping malformed socket event");
                        continue;
                    }
                },
                _ => continue,
            };
            if sink.send(event).await.is_err() {
                return Ok(());
            }
        }
        Ok(())
    }
}

fn connect_error(error: tungstenite::Error) -> ConnectionError {
    match error {
        tungstenite::Error::Http(response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            ConnectionError::Auth(format!("socket handshake returned {}", response.status()))
        }
        tungstenite::Error::Http(response) => {
            ConnectionError::Connection(format!("socket handshake returned {}", response.status()))
        }
        other => ConnectionError::Network(other.to_string()),
    }
}

impl PushChannel for SocketChannel {
    fn channel(&self) -> Channel {
        Channel::Socket
    }

    fn run(&self, sink: mpsc::Sender<RemoteEvent>) -> StreamFuture<'_> {
        Box::pin(self.stream(sink))
    }
}
