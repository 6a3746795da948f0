//! Reassembly of streamed tool calls
//!
//! Tool-call arguments arrive as text fragments spread over many frames. The
//! accumulator concatenates them per slot index and only hands out complete
//! [`ToolCall`]s when the turn closes.

use crate::protocol::{StreamEvent, ToolCall};
use std::collections::BTreeMap;
use tracing::warn;

/// One tool-call fragment as decoded from a frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolFragment {
    pub index: Option<usize>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

#[derive(Debug, Default)]
struct ToolCallSlot {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Per-index buffers for one streaming decode
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    slots: BTreeMap<usize, ToolCallSlot>,
    last_index: Option<usize>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fragment and return the delta event describing it
    ///
    /// A fragment without an index continues the most recently opened slot,
    /// unless it carries an id different from that slot's, which opens a new
    /// slot. Empty ids and names count as absent.
    pub fn push(&mut self, fragment: ToolFragment) -> StreamEvent {
        let id = non_empty(fragment.id);
        let name = non_empty(fragment.name);
        let index = fragment
            .index
            .unwrap_or_else(|| self.implicit_index(id.as_deref()));

        let slot = self.slots.entry(index).or_default();
        if slot.id.is_none() {
            slot.id = id.clone();
        }
        // Some backends repeat the name on every fragment
        if slot.name.is_none() {
            slot.name = name.clone();
        }
        slot.arguments.push_str(&fragment.arguments);
        self.last_index = Some(index);

        StreamEvent::ToolCallDelta {
            index,
            id,
            name,
            arguments: fragment.arguments,
        }
    }

    fn implicit_index(&self, id: Option<&str>) -> usize {
        let Some(last) = self.last_index else {
            return self.next_free_index();
        };

        let opens_new_call = match (id, self.slots.get(&last).and_then(|s| s.id.as_deref())) {
            (Some(new_id), Some(current_id)) => new_id != current_id,
            _ => false,
        };

        if opens_new_call {
            self.next_free_index()
        } else {
            last
        }
    }

    fn next_free_index(&self) -> usize {
        self.slots.keys().next_back().map_or(0, |max| max + 1)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Indices with unfinished calls, ascending
    pub fn open_indices(&self) -> Vec<usize> {
        self.slots.keys().copied().collect()
    }

    /// Close every open slot, in index order
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        self.last_index = None;
        std::mem::take(&mut self.slots)
            .into_iter()
            .map(|(index, slot)| {
                let name = slot.name.unwrap_or_else(|| {
                    warn!("Tool call at index {} closed without a name", index);
                    String::new()
                });
                let id = slot.id.unwrap_or_else(|| format!("call_{}", index));
                StreamEvent::ToolCallComplete {
                    index,
                    call: ToolCall::function(id, name, slot.arguments),
                }
            })
            .collect()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
