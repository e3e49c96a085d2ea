//! Producer side: open the vendor stream and push its decoded events into a relay.

use futures::{StreamExt, TryStreamExt};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::decode::{ByteStream, DecodedStream, VendorDecoder};
use crate::error::{BridgeError, Result};
use crate::event::{AssembledToolCall, Event};
use crate::message::{ChatMessage, ChatRequest, Role};
use crate::providers::VendorFormat;
use crate::relay::RelaySender;

/// What a producer task did before it closed its relay source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PumpReport {
    pub events_sent: usize,
    /// Tool calls assembled from the stream, for the caller's tool executor.
    pub tool_calls: Vec<AssembledToolCall>,
}

/// Send a streaming chat request to the configured vendor.
///
/// The response is returned whatever its status; [`pump`] turns an error
/// status into an in-stream error event.
pub async fn open_stream(
    req: &ChatRequest,
    config: &BridgeConfig,
    client: &reqwest::Client,
) -> Result<reqwest::Response> {
    let api_key = config.resolve_api_key()?;
    let url = config.chat_url()?;
    let body = encode_request(req, config)?;

    info!(
        url = %url,
        model = %config.resolve_model(&req.model),
        messages = req.messages.len(),
        "Opening upstream stream"
    );

    client
        .post(&url)
        .bearer_auth(api_key)
        .header("Content-Type", "application/json")
        .header("Accept", "text/event-stream")
        .json(&body)
        .send()
        .await
        .map_err(|e| BridgeError::transport(format!("Streaming request failed: {}", e)))
}

/// Encode `req` as the vendor's streaming request body.
pub fn encode_request(req: &ChatRequest, config: &BridgeConfig) -> Result<Value> {
    let model = config.resolve_model(&req.model);
    let mut body = match config.vendor_format() {
        VendorFormat::OpenAi => {
            let mut body = serde_json::to_value(req)?;
            body["model"] = json!(model);
            body
        }
        VendorFormat::Minimax => encode_minimax(req, model),
    };
    body["stream"] = json!(true);
    Ok(body)
}

fn encode_minimax(req: &ChatRequest, model: &str) -> Value {
    const BOT_NAME: &str = "assistant";

    let system: Vec<String> = req
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(ChatMessage::text)
        .collect();

    let messages: Vec<Value> = req
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let (sender_type, sender_name) = match m.role {
                Role::Assistant => ("BOT", BOT_NAME.to_string()),
                Role::Tool => ("FUNCTION", m.name.clone().unwrap_or_else(|| "tool".to_string())),
                _ => ("USER", m.name.clone().unwrap_or_else(|| "user".to_string())),
            };
            let mut msg = json!({
                "sender_type": sender_type,
                "sender_name": sender_name,
                "text": m.text(),
            });
            if let Some(call) = m.tool_calls.as_ref().and_then(|calls| calls.first()) {
                msg["function_call"] = json!({
                    "name": call.function.name,
                    "arguments": call.function.arguments,
                });
            }
            msg
        })
        .collect();

    let mut body = Value::Object(req.extra.clone());
    body["model"] = json!(model);
    body["messages"] = json!(messages);
    body["bot_setting"] = json!([{ "bot_name": BOT_NAME, "content": system.join("\n") }]);
    body["reply_constraints"] = json!({ "sender_type": "BOT", "sender_name": BOT_NAME });
    if let Some(tools) = &req.tools {
        let functions: Vec<Value> = tools
            .iter()
            .filter_map(|t| t.get("function").cloned())
            .collect();
        body["functions"] = json!(functions);
    }
    body
}

/// Adapt a reqwest body into the decoder's byte stream.
pub fn byte_stream(response: reqwest::Response) -> ByteStream {
    response
        .bytes_stream()
        .map_err(|e| BridgeError::transport(format!("Upstream read failed: {}", e)))
        .boxed()
}

/// Producer task body: decode `response` with `vendor` and forward every event.
pub async fn pump(
    response: reqwest::Response,
    vendor: Box<dyn VendorDecoder>,
    mut sender: RelaySender,
    cancel: CancellationToken,
) -> PumpReport {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), body = %truncate(&body, 300), "Upstream returned an error status");
        let err = BridgeError::vendor(i64::from(status.as_u16()), error_message(&body));
        let events_sent = match sender.send(Event::from_error(&err)).await {
            Ok(()) => 1,
            Err(_) => 0,
        };
        sender.close();
        return PumpReport {
            events_sent,
            tool_calls: Vec::new(),
        };
    }

    forward(DecodedStream::new(byte_stream(response), vendor), sender, cancel).await
}

/// Forward decoded events into the relay until the sequence ends, the relay
/// refuses, or `cancel` fires. Closes the sender on every path.
pub async fn forward(
    mut decoded: DecodedStream,
    mut sender: RelaySender,
    cancel: CancellationToken,
) -> PumpReport {
    let mut events_sent = 0;

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            event = decoded.next_event() => event,
        };
        let Some(event) = next else {
            break;
        };
        if sender.send(event).await.is_err() {
            debug!(events_sent, "Relay stopped accepting events");
            break;
        }
        events_sent += 1;
    }

    sender.close();
    PumpReport {
        events_sent,
        tool_calls: decoded.tool_calls(),
    }
}

/// Best-effort message from a vendor error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.pointer("/base_resp/status_msg"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| truncate(body, 500).to_string())
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
