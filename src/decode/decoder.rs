//! Line-at-a-time state machine shared by every vendor.
//!
//! The [`StreamDecoder`] processes SSE lines one at a time, maintaining state
//! about whether the choice has finished and whether the stream has ended,
//! and emitting the corresponding [`Event`]s. It performs no I/O.
//!
//! Usage:
//!   let mut decoder = StreamDecoder::new(decoder_for(VendorFormat::OpenAi));
//!   for line in body_lines {
//!       let events = decoder.feed_line(&line);
//!       // forward each event
//!       if decoder.is_done() { break; }
//!   }
//!   let final_events = decoder.finish();

use tracing::{debug, warn};

use super::{Frame, VendorDecoder};
use crate::assembler::ToolCallAssembler;
use crate::error::BridgeError;
use crate::event::{AssembledToolCall, Event, FinishReason};

pub struct StreamDecoder {
    vendor: Box<dyn VendorDecoder>,
    assembler: ToolCallAssembler,
    /// A final finish reason was emitted; content is no longer accepted.
    finished: bool,
    /// The stream has ended; nothing more will be emitted.
    done: bool,
}

impl StreamDecoder {
    pub fn new(vendor: Box<dyn VendorDecoder>) -> Self {
        Self {
            vendor,
            assembler: ToolCallAssembler::new(),
            finished: false,
            done: false,
        }
    }

    pub fn vendor_name(&self) -> &'static str {
        self.vendor.name()
    }

    /// Process one body line, returning zero or more events.
    pub fn feed_line(&mut self, line: &str) -> Vec<Event> {
        if self.done {
            return Vec::new();
        }

        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Vec::new();
        }

        let profile = self.vendor.profile();
        let payload = match profile.data_prefix {
            Some(prefix) => match line.strip_prefix(prefix) {
                Some(rest) => rest.trim(),
                None => return Vec::new(),
            },
            None => line.trim(),
        };

        // A bare prefix is a keep-alive frame.
        if payload.is_empty() {
            return Vec::new();
        }

        if profile.done_sentinel == Some(payload) {
            self.done = true;
            return self.finish_with(FinishReason::Stop);
        }

        // Trailing frames after a finish reason are drained, not interpreted.
        if self.finished {
            return Vec::new();
        }

        let frame = match self.vendor.decode(payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(vendor = self.vendor.name(), error = %e, "Malformed stream frame");
                return self.fail(&e);
            }
        };

        self.apply(frame)
    }

    fn apply(&mut self, frame: Frame) -> Vec<Event> {
        if let Some(fault) = frame.fault {
            return self.fail(&BridgeError::vendor(fault.code, fault.message));
        }
        if let Some(direction) = frame.policy {
            return self.fail(&BridgeError::ContentPolicy { direction });
        }

        let mut events = Vec::new();

        // Function intent wins: text in a frame carrying tool calls is dropped.
        if !frame.tool_calls.is_empty() {
            if frame.text.as_deref().is_some_and(|t| !t.is_empty()) {
                debug!(vendor = self.vendor.name(), "Dropping text that accompanied a tool call");
            }
            for tc in frame.tool_calls {
                let id = tc.id.unwrap_or_default();
                let name = tc.name.unwrap_or_default();
                self.assembler.append(tc.index, &id, &name, &tc.arguments);
                events.push(Event::ToolCallFragment {
                    index: tc.index,
                    id,
                    name,
                    arguments_chunk: tc.arguments,
                });
            }
        } else if let Some(text) = frame.text.filter(|t| !t.is_empty()) {
            events.push(Event::TextDelta { content: text });
        }

        for tc in frame.restated_tool_calls {
            if self.assembler.get(tc.index).is_some() {
                continue;
            }
            let id = tc.id.unwrap_or_default();
            let name = tc.name.unwrap_or_default();
            self.assembler.append(tc.index, &id, &name, &tc.arguments);
            events.push(Event::ToolCallFragment {
                index: tc.index,
                id,
                name,
                arguments_chunk: tc.arguments,
            });
        }

        if let Some(reason) = frame.finish_reason.filter(|r| r.is_final()) {
            events.append(&mut self.finish_with(reason));
        }

        events
    }

    /// Terminate the stream with an error event.
    pub fn fail(&mut self, err: &BridgeError) -> Vec<Event> {
        if self.done {
            return Vec::new();
        }
        self.done = true;
        if self.finished {
            // Nothing may follow a finish event.
            return Vec::new();
        }
        self.finished = true;
        vec![Event::from_error(err)]
    }

    /// Call when the body ends. A stream that never reported a finish reason
    /// ends with `Finish{Unspecified}`.
    pub fn finish(&mut self) -> Vec<Event> {
        if self.done {
            return Vec::new();
        }
        self.done = true;
        self.finish_with(FinishReason::Unspecified)
    }

    fn finish_with(&mut self, reason: FinishReason) -> Vec<Event> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        vec![Event::finish(reason)]
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn tool_calls(&self) -> Vec<AssembledToolCall> {
        self.assembler.snapshot()
    }
}
