//! The uniform delta events produced by every vendor decoder, and their SSE framing.
//!
//! An [`Event`] is one unit of stream output. Decoders emit them in arrival
//! order; the relay writes each one to the downstream client as a single
//! [`SseFrame`]. `Finish` and `Error` are terminal: nothing follows them on
//! the same stream.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    TextDelta {
        content: String,
    },
    /// The chunk just appended to the tool call at `index`. `id` and `name`
    /// are empty unless this fragment carried them.
    #[serde(rename = "tool_call")]
    ToolCallFragment {
        index: u32,
        id: String,
        name: String,
        arguments_chunk: String,
    },
    Finish {
        reason: FinishReason,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl Event {
    pub fn text(content: impl Into<String>) -> Self {
        Self::TextDelta {
            content: content.into(),
        }
    }

    pub fn finish(reason: FinishReason) -> Self {
        Self::Finish { reason }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }

    /// Convert a failure into the terminal event handed to the consumer.
    pub fn from_error(err: &BridgeError) -> Self {
        let kind = match err {
            BridgeError::Decode { .. } | BridgeError::Json(_) => ErrorKind::Decode,
            BridgeError::ContentPolicy { .. } => ErrorKind::ContentPolicy,
            BridgeError::Vendor { .. } => ErrorKind::Vendor,
            _ => ErrorKind::Transport,
        };
        Self::error(kind, err.to_string())
    }

    /// SSE `event:` name for this event.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text_delta",
            Self::ToolCallFragment { .. } => "tool_call",
            Self::Finish { .. } => "finish",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Error { .. })
    }

    /// Rebuild an event from a received SSE frame's `event` and `data` fields.
    pub fn from_sse(event_name: &str, data: &str) -> Result<Self> {
        let event: Self = serde_json::from_str(data)?;
        if event.event_name() != event_name {
            return Err(BridgeError::decode(format!(
                "SSE event name '{}' does not match payload type '{}'",
                event_name,
                event.event_name()
            )));
        }
        Ok(event)
    }
}

/// Why a choice stopped producing deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Unspecified,
}

impl FinishReason {
    /// Parse a vendor finish-reason string. `None` means the field carried no reason.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "" | "null" => None,
            "stop" => Some(Self::Stop),
            "length" | "max_output" | "max_tokens" => Some(Self::Length),
            "tool_calls" | "function_call" => Some(Self::ToolCalls),
            "content_filter" => Some(Self::ContentFilter),
            _ => Some(Self::Unspecified),
        }
    }

    /// Whether this reason ends content for its choice.
    pub fn is_final(self) -> bool {
        self != Self::Unspecified
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Decode,
    ContentPolicy,
    Vendor,
}

/// Which side of the conversation a vendor flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDirection {
    Input,
    Output,
}

impl fmt::Display for PolicyDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// A tool call assembled from every fragment seen for its index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledToolCall {
    pub index: u32,
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// One Server-Sent-Events frame as written to the downstream client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
    pub data: String,
}

impl SseFrame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            id: None,
            retry: None,
            data: data.into(),
        }
    }

    pub fn from_event(event: &Event, id: Option<String>, retry: Option<u64>) -> Result<Self> {
        Ok(Self {
            event: event.event_name().to_string(),
            id,
            retry,
            data: serde_json::to_string(event)?,
        })
    }

    /// Wire encoding: `event`, `id`, `retry`, one `data:` line per payload
    /// line, then a blank line.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.data.len() + self.event.len() + 48);
        out.push_str("event: ");
        out.push_str(&self.event);
        out.push('\n');
        out.push_str("id: ");
        out.push_str(self.id.as_deref().unwrap_or(""));
        out.push('\n');
        out.push_str("retry: ");
        out.push_str(&self.retry.unwrap_or(0).to_string());
        out.push('\n');
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}
