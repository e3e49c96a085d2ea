//! Vendor stream decoding.
//!
//! Turns one upstream SSE body into a sequence of uniform [`Event`]s. Each
//! vendor implements [`VendorDecoder`], which only knows its line framing and
//! how to map one JSON envelope into a vendor-neutral [`Frame`]. The shared
//! [`StreamDecoder`] state machine handles sentinels, policy flags, finish
//! reasons and tool-call assembly for every vendor alike.
//!
//! [`Event`]: crate::event::Event

mod decoder;
mod lines;
pub mod minimax;
pub mod openai;

pub use decoder::StreamDecoder;
pub use lines::{ByteStream, DecodedStream, LineReader};

use crate::error::Result;
use crate::event::{FinishReason, PolicyDirection};
use crate::providers::VendorFormat;

/// Line framing conventions of a vendor's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorProfile {
    /// Prefix marking data lines. `None` means every line is a JSON envelope.
    pub data_prefix: Option<&'static str>,
    /// Payload that ends the stream successfully.
    pub done_sentinel: Option<&'static str>,
}

/// One decoded envelope, reduced to what the state machine needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
    /// Complete tool calls restated by an aggregate frame. Only indices that
    /// received no fragments earlier in the stream are applied.
    pub restated_tool_calls: Vec<ToolCallDelta>,
    pub finish_reason: Option<FinishReason>,
    pub policy: Option<PolicyDirection>,
    pub fault: Option<VendorFault>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallDelta {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

/// An error the vendor reported inside an otherwise well-formed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorFault {
    pub code: i64,
    pub message: String,
}

/// Per-vendor envelope adapter.
pub trait VendorDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    fn profile(&self) -> VendorProfile;

    /// Decode one data payload (prefix already stripped).
    fn decode(&self, payload: &str) -> Result<Frame>;
}

pub fn decoder_for(format: VendorFormat) -> Box<dyn VendorDecoder> {
    match format {
        VendorFormat::OpenAi => Box::new(openai::OpenAiDecoder),
        VendorFormat::Minimax => Box::new(minimax::MinimaxDecoder),
    }
}
