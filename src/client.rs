//! Downstream helper: read a relay's SSE output back into [`Event`]s.
//!
//! Uses eventsource-stream for SSE parsing, so frames split across network
//! chunks and multi-line `data:` payloads are reassembled before decoding.

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::stream::{BoxStream, Stream, StreamExt};

use crate::error::{BridgeError, Result};
use crate::event::Event;

/// Parse an SSE byte stream produced by a relay into events.
pub fn relay_events<S, E>(bytes: S) -> BoxStream<'static, Result<Event>>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    bytes
        .eventsource()
        .map(|item| match item {
            Ok(frame) => Event::from_sse(&frame.event, &frame.data),
            Err(e) => Err(BridgeError::transport(format!("SSE error: {}", e))),
        })
        .boxed()
}

/// Events of a bridge HTTP response.
pub fn response_events(response: reqwest::Response) -> BoxStream<'static, Result<Event>> {
    relay_events(response.bytes_stream())
}
