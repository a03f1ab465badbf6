//! Pull transport adapter (Server-Sent-Events).
//!
//! Opens `GET {base}/stream` and turns the response body into a
//! [`TransportEvent`] stream. The body may use SSE framing (`data:` lines
//! dispatched on a blank line) or plain line-delimited JSON; both are
//! accepted.
//!
//! # Event Mapping
//!
//! | Payload | Event |
//! |---------|-------|
//! | `{"text": "..."}` | `Data` |
//! | `{"done": true}` | `Closed`, stream ends |
//! | `{"error": "..."}` | `Error(Remote)` |
//! | `{}` | nothing (keep-alive) |
//! | malformed | `Error(Parse)`, stream continues |
//! | body read failure / EOF without `done` | `Error(Transport)`, stream ends |

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::config::SessionConfig;
use crate::error::Result;
use crate::protocol::PullFrame;

use super::event::{Payload, StreamFault, TransportEvent};

// ============================================================================
// Types
// ============================================================================

/// Stream of events from one opened pull handle.
pub type EventStream = BoxStream<'static, TransportEvent>;

// ============================================================================
// PullConnector
// ============================================================================

/// Opens pull-stream handles.
///
/// Each call to [`open`](Self::open) is an independent handle; dropping
/// the returned stream closes it.
#[async_trait]
pub trait PullConnector: Send + Sync + 'static {
    /// Opens a new handle.
    ///
    /// # Errors
    ///
    /// Connection-level failures only; per-message problems are reported
    /// inside the stream.
    async fn open(&self) -> Result<EventStream>;
}

// ============================================================================
// EventSourceConnector
// ============================================================================

/// HTTP event-stream connector backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct EventSourceConnector {
    client: reqwest::Client,
    url: Url,
}

impl EventSourceConnector {
    /// Creates a connector for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`](crate::Error::Http) if the HTTP client cannot
    /// be built.
    pub fn new(url: Url, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self { client, url })
    }

    /// Creates a connector for the configured `/stream` endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be derived or the client cannot
    /// be built.
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        Self::new(config.stream_url()?, config.connect_timeout())
    }

    /// Endpoint this connector opens.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl PullConnector for EventSourceConnector {
    async fn open(&self) -> Result<EventStream> {
        debug!(url = %self.url, "Opening event stream");

        let response = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?
            .error_for_status()?;

        info!(url = %self.url, status = %response.status(), "Event stream opened");

        Ok(event_stream(response.bytes_stream()))
    }
}

// ============================================================================
// Body Decoding
// ============================================================================

/// Turns a raw body into transport events.
///
/// The returned stream always ends with either `Closed` or
/// `Error(Transport)`.
pub fn event_stream<S, E>(bytes: S) -> EventStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let pump = BodyPump {
        bytes: Box::pin(bytes),
        decoder: LineDecoder::default(),
        queue: VecDeque::new(),
        finished: false,
    };

    stream::unfold(pump, |mut pump| async move {
        pump.next_event().await.map(|event| (event, pump))
    })
    .boxed()
}

/// State carried between polls of [`event_stream`].
struct BodyPump<S> {
    bytes: Pin<Box<S>>,
    decoder: LineDecoder,
    queue: VecDeque<TransportEvent>,
    finished: bool,
}

impl<S, E> BodyPump<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send,
    E: Display,
{
    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            if let Some(event) = self.queue.pop_front() {
                return Some(event);
            }
            if self.finished {
                return None;
            }

            if let Some(line) = self.decoder.next_line() {
                if let Some(data) = self.decoder.feed_line(&line) {
                    self.dispatch(&data);
                }
                continue;
            }

            match self.bytes.next().await {
                Some(Ok(chunk)) => self.decoder.push(&chunk),
                Some(Err(e)) => {
                    warn!(error = %e, "Event stream read failed");
                    self.fail(format!("stream read failed: {e}"));
                }
                None => {
                    if let Some(data) = self.decoder.finish() {
                        self.dispatch(&data);
                    }
                    if !self.finished {
                        debug!("Event stream ended without done marker");
                        self.fail("stream ended unexpectedly".to_string());
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, data: &str) {
        match PullFrame::decode(data) {
            Ok(PullFrame::Text(text)) => {
                self.queue
                    .push_back(TransportEvent::Data(Payload::measured(text, data)));
            }
            Ok(PullFrame::Done) => {
                self.queue.push_back(TransportEvent::Closed);
                self.finished = true;
            }
            Ok(PullFrame::Failed(message)) => {
                self.queue
                    .push_back(TransportEvent::Error(StreamFault::Remote(message)));
            }
            Ok(PullFrame::KeepAlive) => trace!("Event stream keep-alive"),
            Err(e) => {
                warn!(error = %e, "Dropping malformed event");
                self.queue.push_back(TransportEvent::Error(e.into()));
            }
        }
    }

    fn fail(&mut self, message: String) {
        self.queue
            .push_back(TransportEvent::Error(StreamFault::Transport(message)));
        self.finished = true;
    }
}

// ============================================================================
// LineDecoder
// ============================================================================

/// Splits a byte body into lines and assembles SSE `data` fields.
#[derive(Debug, Default)]
struct LineDecoder {
    buffer: BytesMut,
    data: Vec<String>,
}

impl LineDecoder {
    fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Takes the next complete line, without its terminator.
    fn next_line(&mut self) -> Option<String> {
        let newline = self.buffer.iter().position(|&b| b == b'\n')?;
        let mut line = self.buffer.split_to(newline + 1);
        line.truncate(newline);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Feeds one line; returns a data field when one is complete.
    fn feed_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.take_data();
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(value) = line.strip_prefix("data:") {
            self.data
                .push(value.strip_prefix(' ').unwrap_or(value).to_string());
            return None;
        }
        if line == "data" {
            self.data.push(String::new());
            return None;
        }
        if line.starts_with('{') && self.data.is_empty() {
            return Some(line.to_string());
        }
        // event:, id:, retry: and unknown fields
        None
    }

    /// Flushes whatever is left at end of body.
    fn finish(&mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let rest = String::from_utf8_lossy(&self.buffer).into_owned();
            self.buffer.clear();
            if let Some(data) = self.feed_line(rest.trim_end_matches('\r')) {
                return Some(data);
            }
        }
        self.take_data()
    }

    fn take_data(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();
        Some(data)
    }
}

// ============================================================================
// Tests
// ============================================================================
