//! Decoder for Minimax `chatcompletion_pro` streams.
//!
//! Every data line is a full envelope:
//! `data: {"choices":[{"messages":[{"sender_type":"BOT","text":"..."}]}],"input_sensitive":false,"output_sensitive":false,"base_resp":{"status_code":0}}`
//!
//! There is no done sentinel. The envelope carrying `finish_reason` repeats the
//! whole reply, so only its finish reason is used.

use serde::Deserialize;

use super::{Frame, ToolCallDelta, VendorDecoder, VendorFault, VendorProfile};
use crate::error::{BridgeError, Result};
use crate::event::{FinishReason, PolicyDirection};

pub struct MinimaxDecoder;

impl VendorDecoder for MinimaxDecoder {
    fn name(&self) -> &'static str {
        "minimax"
    }

    fn profile(&self) -> VendorProfile {
        VendorProfile {
            data_prefix: Some("data: "),
            done_sentinel: None,
        }
    }

    fn decode(&self, payload: &str) -> Result<Frame> {
        let completion: Completion = serde_json::from_str(payload)
            .map_err(|e| BridgeError::decode(format!("Invalid Minimax envelope: {}", e)))?;

        if let Some(resp) = completion.base_resp.filter(|r| r.status_code != 0) {
            return Ok(Frame {
                fault: Some(VendorFault {
                    code: resp.status_code,
                    message: resp.status_msg,
                }),
                ..Frame::default()
            });
        }

        let policy = if completion.input_sensitive {
            Some(PolicyDirection::Input)
        } else if completion.output_sensitive {
            Some(PolicyDirection::Output)
        } else {
            None
        };
        if policy.is_some() {
            return Ok(Frame {
                policy,
                ..Frame::default()
            });
        }

        let Some(choice) = completion.choices.into_iter().next() else {
            return Ok(Frame::default());
        };

        let finish_reason = choice.finish_reason.as_deref().and_then(FinishReason::parse);
        let message = choice.messages.into_iter().next();

        // The finish frame repeats the whole reply; its function call is kept
        // in case it never streamed as fragments.
        if finish_reason.is_some() {
            return Ok(Frame {
                restated_tool_calls: message
                    .and_then(|m| m.function_call)
                    .map(function_call_delta)
                    .into_iter()
                    .collect(),
                finish_reason,
                ..Frame::default()
            });
        }

        let Some(message) = message else {
            return Ok(Frame::default());
        };

        let tool_calls = message
            .function_call
            .map(function_call_delta)
            .into_iter()
            .collect();

        Ok(Frame {
            text: Some(message.text),
            tool_calls,
            ..Frame::default()
        })
    }
}

fn function_call_delta(fc: FunctionCall) -> ToolCallDelta {
    ToolCallDelta {
        index: 0,
        id: None,
        name: Some(fc.name).filter(|n| !n.is_empty()),
        arguments: fc.arguments,
    }
}

#[derive(Debug, Clone, Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    input_sensitive: bool,
    #[serde(default)]
    output_sensitive: bool,
    #[serde(default)]
    base_resp: Option<BaseResp>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Message {
    #[serde(default)]
    text: String,
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Clone, Deserialize)]
struct FunctionCall {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Clone, Deserialize)]
struct BaseResp {
    #[serde(default)]
    status_code: i64,
    #[serde(default)]
    status_msg: String,
}
