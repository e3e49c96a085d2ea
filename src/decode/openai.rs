//! Decoder for the [OpenAI Chat Completions](https://platform.openai.com/docs/api-reference/chat-streaming)
//! streaming format, also spoken by most OpenAI-compatible vendors.
//!
//! - `data: {"choices":[{"delta":{"content":"Hello"}}]}` -> text
//! - `data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"read"}}]}}]}` -> tool call fragment
//! - `data: {"choices":[{"finish_reason":"tool_calls",...}]}` -> finish
//! - `data: {"error":{"message":"..."}}` -> vendor error
//! - `data: [DONE]` -> end of stream

use serde::Deserialize;

use super::{Frame, ToolCallDelta, VendorDecoder, VendorFault, VendorProfile};
use crate::error::{BridgeError, Result};
use crate::event::FinishReason;

pub struct OpenAiDecoder;

impl VendorDecoder for OpenAiDecoder {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn profile(&self) -> VendorProfile {
        VendorProfile {
            data_prefix: Some("data:"),
            done_sentinel: Some("[DONE]"),
        }
    }

    fn decode(&self, payload: &str) -> Result<Frame> {
        let chunk: ChatCompletionChunk = serde_json::from_str(payload)
            .map_err(|e| BridgeError::decode(format!("Invalid OpenAI chunk: {}", e)))?;

        if let Some(err) = chunk.error {
            return Ok(Frame {
                fault: Some(VendorFault {
                    code: err.code.as_ref().and_then(|c| c.as_i64()).unwrap_or(0),
                    message: err.message,
                }),
                ..Frame::default()
            });
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            // Usage-only or empty frames carry nothing to surface.
            return Ok(Frame::default());
        };

        // Reasoning models (DeepSeek R1 and friends) stream chain-of-thought in
        // `reasoning_content`; it is surfaced as text when `content` is empty.
        let text = choice
            .delta
            .content
            .filter(|s| !s.is_empty())
            .or(choice.delta.reasoning_content.filter(|s| !s.is_empty()));

        let tool_calls = choice
            .delta
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let (name, arguments) = match tc.function {
                    Some(f) => (f.name, f.arguments.unwrap_or_default()),
                    None => (None, String::new()),
                };
                ToolCallDelta {
                    index: tc.index,
                    id: tc.id,
                    name,
                    arguments,
                }
            })
            .collect();

        Ok(Frame {
            text,
            tool_calls,
            finish_reason: choice.finish_reason.as_deref().and_then(FinishReason::parse),
            ..Frame::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Streaming chunk types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ChatError>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ChunkToolCallFunction>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChunkToolCallFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatError {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}
