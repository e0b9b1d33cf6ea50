//! Server-sent events push channel.

use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::model::config::ServerConfig;
use crate::sync::bus::Channel;
use crate::sync::connection::{ConnectionError, PushChannel, StreamFuture};
use crate::sync::events::{RemoteEvent, decode_sse};

/// One complete block from the event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    Message { event: Option<String>, data: String },
    /// A comment-only block; servers send these to keep the stream open
    KeepAlive,
}

/// Incremental `text/event-stream` framing. Bytes go in as they arrive,
/// complete blocks come out.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend(chunk.iter().filter(|b| **b != b'\r'));
        let mut frames = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            let text = String::from_utf8_lossy(&block[..end]);
            if let Some(frame) = parse_block(&text) {
                frames.push(frame);
            }
        }
        frames
    }
}

fn parse_block(block: &str) -> Option<SseFrame> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();
    let mut comment = false;
    for line in block.lines() {
        if line.starts_with(':') {
            comment = true;
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "data" => data.push(value),
            "event" => event = Some(value.to_string()),
            _ => {}
        }
    }
    if !data.is_empty() {
        Some(SseFrame::Message {
            event,
            data: data.join("\n"),
        })
    } else if comment {
        Some(SseFrame::KeepAlive)
    } else {
        None
    }
}

/// [`PushChannel`] reading `GET {base}{events_path}` as an event stream
pub struct SseChannel {
    client: Client,
    url: String,
    token: Option<String>,
}

impl SseChannel {
    pub fn new(server: &ServerConfig, token: Option<String>) -> Result<Self, ConnectionError> {
        // no overall timeout: the response never ends on its own
        let client = Client::builder()
            .connect_timeout(server.request_timeout())
            .build()
            .map_err(|e| ConnectionError::Connection(e.to_string()))?;
        Ok(SseChannel {
            client,
            url: server.url(&server.events_path),
            token,
        })
    }

    async fn stream(&self, sink: mpsc::Sender<RemoteEvent>) -> Result<(), ConnectionError> {
        let mut request = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(token) = &self.token {
            request = request.query(&[("token", token)]).bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ConnectionError::Network(e.to_string()))?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ConnectionError::Auth(format!("event stream returned {status}")));
        }
        if !status.is_success() {
            return Err(ConnectionError::Connection(format!(
                "event stream returned {status}"
            )));
        }
        debug!(url = %self.url, "event stream open");

        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::default();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| ConnectionError::Network(e.to_string()))?;
            for frame in decoder.push(&chunk) {
                let event = match frame {
                    SseFrame::KeepAlive => RemoteEvent::Heartbeat,
                    SseFrame::Message { event, data } => match decode_sse(&data) {
                        Ok(decoded) => decoded,
                        Err(error) => {
                            warn!(event = ?event, %error, "skipping malformed event");
                            continue;
                        }
                    },
                };
                if sink.send(event).await.is_err() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

impl PushChannel for SseChannel {
    fn channel(&self) -> Channel {
        Channel::Sse
    }

    fn run(&self, sink: mpsc::Sender<RemoteEvent>) -> StreamFuture<'_> {
        Box::pin(self.stream(sink))
    }
}
