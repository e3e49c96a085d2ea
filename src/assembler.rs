//! Incremental assembly of streamed tool calls.
//!
//! Vendors split one tool call across many chunks keyed by a position index.
//! Only the first chunk of a call carries its id and name; every chunk may
//! carry a slice of the JSON arguments. New indices may appear while older
//! ones are still receiving chunks.

use std::collections::BTreeMap;

use crate::event::AssembledToolCall;

#[derive(Debug, Default, Clone)]
pub struct ToolCallAssembler {
    calls: BTreeMap<u32, AssembledToolCall>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one fragment. The first non-empty `id` and `name` for an index
    /// are kept; `arguments_chunk` is always appended.
    pub fn append(&mut self, index: u32, id: &str, name: &str, arguments_chunk: &str) {
        let call = self.calls.entry(index).or_insert_with(|| AssembledToolCall {
            index,
            ..AssembledToolCall::default()
        });
        if call.id.is_empty() && !id.is_empty() {
            call.id = id.to_string();
        }
        if call.name.is_empty() && !name.is_empty() {
            call.name = name.to_string();
        }
        call.arguments.push_str(arguments_chunk);
    }

    /// Current calls ordered by index.
    pub fn snapshot(&self) -> Vec<AssembledToolCall> {
        self.calls.values().cloned().collect()
    }

    pub fn get(&self, index: u32) -> Option<&AssembledToolCall> {
        self.calls.get(&index)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
