use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, Stream, StreamExt};

use super::{StreamDecoder, VendorDecoder};
use crate::error::{BridgeError, Result};
use crate::event::{AssembledToolCall, Event};

/// A boxed upstream body.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Splits a byte stream into `\n`-terminated lines.
///
/// Bytes are buffered until a full line is available, so chunk boundaries may
/// fall anywhere, including inside a multi-byte character. A trailing `\r` is
/// stripped. A line that is not valid UTF-8 is a decode error.
pub struct LineReader {
    inner: ByteStream,
    buf: BytesMut,
    eof: bool,
}

impl LineReader {
    pub fn new(inner: ByteStream) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            eof: false,
        }
    }

    /// Next complete line. The final unterminated line is returned at end of input.
    pub async fn next_line(&mut self) -> Option<Result<String>> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let line = self.buf.split_to(pos + 1);
                return Some(decode_line(&line[..pos]));
            }

            if self.eof {
                if self.buf.is_empty() {
                    return None;
                }
                let rest = self.buf.split();
                return Some(decode_line(&rest));
            }

            match self.inner.next().await {
                Some(Ok(chunk)) => self.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    self.eof = true;
                    self.buf.clear();
                    return Some(Err(e));
                }
                None => self.eof = true,
            }
        }
    }
}

fn decode_line(raw: &[u8]) -> Result<String> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8(raw.to_vec())
        .map_err(|e| BridgeError::decode(format!("Stream line is not valid UTF-8: {}", e)))
}

/// The decoded event sequence of one upstream body.
///
/// Lazy, finite and non-restartable. Once a terminal event has been yielded the
/// sequence ends; the assembled tool calls stay available through
/// [`DecodedStream::tool_calls`].
pub struct DecodedStream {
    lines: LineReader,
    decoder: StreamDecoder,
    pending: VecDeque<Event>,
    exhausted: bool,
}

impl DecodedStream {
    pub fn new(body: ByteStream, vendor: Box<dyn VendorDecoder>) -> Self {
        Self {
            lines: LineReader::new(body),
            decoder: StreamDecoder::new(vendor),
            pending: VecDeque::new(),
            exhausted: false,
        }
    }

    pub async fn next_event(&mut self) -> Option<Event> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.exhausted {
                return None;
            }

            match self.lines.next_line().await {
                Some(Ok(line)) => {
                    self.pending.extend(self.decoder.feed_line(&line));
                    if self.decoder.is_done() {
                        self.exhausted = true;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(vendor = self.decoder.vendor_name(), error = %e, "Upstream read failed");
                    self.pending.extend(self.decoder.fail(&e));
                    self.exhausted = true;
                }
                None => {
                    self.pending.extend(self.decoder.finish());
                    self.exhausted = true;
                }
            }
        }
    }

    /// Tool calls assembled so far, ordered by index.
    pub fn tool_calls(&self) -> Vec<AssembledToolCall> {
        self.decoder.tool_calls()
    }

    pub fn into_events(mut self) -> impl Stream<Item = Event> + Send {
        async_stream::stream! {
            while let Some(event) = self.next_event().await {
                yield event;
            }
        }
    }
}
