//! Socket stream adapter.
//!
//! Runs the logical "stream session" on top of a shared duplex link. The
//! adapter never owns a connection: it emits `startStream` / `stopStream`
//! through the sender it is given and translates the server's
//! `streamData` / `streamEnd` events into [`TransportEvent`]s.

use serde::Deserialize;
use serde_json::Value;

use crate::error::Result;
use crate::protocol::{START_STREAM_EVENT, STOP_STREAM_EVENT, STREAM_DATA_EVENT, STREAM_END_EVENT};

use super::duplex::DuplexSender;
use super::event::{Payload, StreamFault, TransportEvent};

#[derive(Debug, Deserialize)]
struct StreamData {
    #[serde(default)]
    text: Option<String>,
}

/// Translator between the duplex link and the Socket stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketStream;

impl SocketStream {
    /// Asks the server to begin streaming.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`](crate::Error::ConnectionClosed) if
    /// the link is gone.
    pub fn start(sender: &DuplexSender) -> Result<()> {
        sender.emit(START_STREAM_EVENT, Vec::new())
    }

    /// Asks the server to stop streaming.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`](crate::Error::ConnectionClosed) if
    /// the link is gone.
    pub fn stop(sender: &DuplexSender) -> Result<()> {
        sender.emit(STOP_STREAM_EVENT, Vec::new())
    }

    /// Maps a server event to a stream event.
    ///
    /// Returns `None` for events that do not belong to the stream and for
    /// keep-alive data without text.
    #[must_use]
    pub fn translate(name: &str, payload: &Value) -> Option<TransportEvent> {
        match name {
            STREAM_DATA_EVENT => Self::data(payload),
            STREAM_END_EVENT => Some(TransportEvent::Closed),
            _ => None,
        }
    }

    fn data(payload: &Value) -> Option<TransportEvent> {
        let data: StreamData = match serde_json::from_value(payload.clone()) {
            Ok(data) => data,
            Err(e) => {
                return Some(TransportEvent::Error(StreamFault::Parse(format!(
                    "parse failure: {e}"
                ))));
            }
        };

        let text = data.text.filter(|text| !text.is_empty())?;
        Some(TransportEvent::Data(Payload::measured(text, &payload.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::transport::duplex::{DuplexLink, LinkCommand};

    #[test]
    fn test_stream_data_becomes_data() {
        let event = SocketStream::translate("streamData", &json!({ "text": "hello" }));
        // {"text":"hello"} is 16 characters
        assert_eq!(event, Some(TransportEvent::data("hello", 16)));
    }

    #[test]
    fn test_stream_end_becomes_closed() {
        assert_eq!(
            SocketStream::translate("streamEnd", &Value::Null),
            Some(TransportEvent::Closed)
        );
    }

    #[test]
    fn test_empty_text_is_keep_alive() {
        assert_eq!(SocketStream::translate("streamData", &json!({ "text": "" })), None);
        assert_eq!(SocketStream::translate("streamData", &json!({})), None);
    }

    #[test]
    fn test_malformed_data_is_parse_fault() {
        let event = SocketStream::translate("streamData", &json!("just a string"));
        assert!(matches!(event, Some(TransportEvent::Error(fault)) if fault.is_parse()));
    }

    #[test]
    fn test_unrelated_events_are_ignored() {
        assert_eq!(SocketStream::translate("chat", &json!({ "text": "x" })), None);
    }

    #[tokio::test]
    async fn test_start_and_stop_emit_commands() {
        let (link, mut endpoint) = DuplexLink::pair();

        SocketStream::start(&link.sender).unwrap();
        SocketStream::stop(&link.sender).unwrap();

        assert_eq!(
            endpoint.commands.recv().await,
            Some(LinkCommand::Emit {
                name: "startStream".into(),
                args: vec![],
            })
        );
        assert_eq!(
            endpoint.commands.recv().await,
            Some(LinkCommand::Emit {
                name: "stopStream".into(),
                args: vec![],
            })
        );
    }
}
