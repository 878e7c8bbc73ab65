//! Folds stream events into one growing assistant turn.
//!
//! Tool calls arrive as fragments spread over many records, keyed by a server
//! assigned position index:
//!
//! ```text
//! { index: 1, function: { name: "search_web" } }
//! { index: 0, id: "call_a", function: { name: "search_web" } }
//! { index: 1, id: "call_b", function: { arguments: "{\"query\":" } }
//! { index: 0, function: { arguments: "{\"query\":\"tokio\"}" } }
//! { index: 1, function: { arguments: "\"axum\"}" } }
//! ```
//!
//! Merge rules per slot: `id` and `name` are first-write-wins, argument fragments are
//! always appended. Slots live in a `BTreeMap` so the final list is in index order no
//! matter which index showed up first.

use crate::types::{AssistantTurn, StreamEvent, ToolCallDelta, ToolCallRequest, TurnStatus};
use std::collections::BTreeMap;

/// Stateful builder for one assistant turn.
#[derive(Debug, Default)]
pub struct DeltaAccumulator {
    text: String,
    slots: BTreeMap<u32, PartialToolCall>,
    closed: bool,
}

/// A tool call that is still being assembled.
#[derive(Debug, Default, Clone)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True after a [`StreamEvent::Done`] has been applied.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Merges one event. Returns `true` when the turn changed.
    ///
    /// Events after `Done` are ignored.
    pub fn apply(&mut self, event: StreamEvent) -> bool {
        if self.closed {
            return false;
        }

        match event {
            StreamEvent::Content(fragment) => {
                if fragment.is_empty() {
                    return false;
                }
                self.text.push_str(&fragment);
                true
            }
            StreamEvent::ToolCallDelta(delta) => self.merge_tool_call(delta),
            StreamEvent::Done => {
                self.closed = true;
                true
            }
        }
    }

    /// Returns `false` when an index-less fragment has no slot left to go to.
    fn merge_tool_call(&mut self, delta: ToolCallDelta) -> bool {
        let index = match delta.index {
            Some(index) => index,
            None => match self.slots.keys().next_back() {
                Some(last) => match last.checked_add(1) {
                    Some(next) => next,
                    None => {
                        log::warn!(
                            "Dropping tool call fragment without index: no slot after {}",
                            last
                        );
                        return false;
                    }
                },
                None => 0,
            },
        };
        let slot = self.slots.entry(index).or_default();

        if slot.id.is_none() {
            slot.id = delta.id.filter(|id| !id.is_empty());
        }
        if slot.name.is_none() {
            slot.name = delta.name.filter(|name| !name.is_empty());
        }
        if let Some(fragment) = delta.arguments_fragment {
            slot.arguments.push_str(&fragment);
        }
        true
    }

    /// Render-ready view of the in-flight turn. Arguments are returned as
    /// accumulated, possibly incomplete JSON.
    pub fn snapshot(&self) -> AssistantTurn {
        AssistantTurn {
            text: self.text.clone(),
            tool_calls: self
                .slots
                .iter()
                .map(|(index, slot)| ToolCallRequest {
                    index: *index,
                    id: slot.id.clone().unwrap_or_default(),
                    name: slot.name.clone().unwrap_or_default(),
                    arguments: slot.arguments.clone(),
                })
                .collect(),
            status: TurnStatus::Streaming,
        }
    }

    /// Closes the turn.
    ///
    /// Arguments that are not valid JSON become `{}` so one garbled call does not
    /// sink the others; calls that never received an id get `call_<index>`.
    pub fn finish(mut self) -> AssistantTurn {
        self.closed = true;

        let tool_calls = self
            .slots
            .into_iter()
            .map(|(index, slot)| {
                let arguments = if serde_json::from_str::<serde_json::Value>(&slot.arguments).is_ok()
                {
                    slot.arguments
                } else {
                    if !slot.arguments.is_empty() {
                        log::debug!(
                            "Tool call {} has malformed arguments, using {{}}: {}",
                            index,
                            slot.arguments
                        );
                    }
                    "{}".to_string()
                };

                ToolCallRequest {
                    index,
                    id: slot.id.unwrap_or_else(|| format!("call_{}", index)),
                    name: slot.name.unwrap_or_default(),
                    arguments,
                }
            })
            .collect();

        AssistantTurn {
            tool_calls,
            ..AssistantTurn::text(self.text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(index: u32, id: Option<&str>, name: Option<&str>, args: Option<&str>) -> StreamEvent {
        StreamEvent::ToolCallDelta(ToolCallDelta {
            index: Some(index),
            id: id.map(str::to_string),
            name: name.map(str::to_string),
            arguments_fragment: args.map(str::to_string),
        })
    }

    #[test]
    fn test_text_fragments_concatenate_without_separator() {
        let mut acc = DeltaAccumulator::new();
        acc.apply(StreamEvent::Content("The capital".to_string()));
        acc.apply(StreamEvent::Content(" of France".to_string()));
        acc.apply(StreamEvent::Content("is".to_string()));
        acc.apply(StreamEvent::Done);

        let turn = acc.finish();
        assert_eq!(turn.text, "The capital of Franceis");
        assert!(turn.tool_calls.is_empty());
        assert_eq!(turn.status, TurnStatus::Complete);
    }

    #[test]
    fn test_arguments_equal_concatenation_for_any_partition() {
        let full = r#"{"query":"rust async runtimes","lang":"en"}"#;
        let chars: Vec<char> = full.chars().collect();

        for parts in 1..=chars.len() {
            let mut acc = DeltaAccumulator::new();
            acc.apply(delta(0, Some("call_1"), Some("search_web"), None));

            let size = chars.len().div_ceil(parts);
            let fragments: Vec<String> = chars.chunks(size).map(|c| c.iter().collect()).collect();
            for fragment in &fragments {
                acc.apply(delta(0, None, None, Some(fragment)));
            }

            let turn = acc.finish();
            assert_eq!(turn.tool_calls.len(), 1);
            assert_eq!(turn.tool_calls[0].arguments, fragments.concat());
            assert_eq!(turn.tool_calls[0].arguments, full);
        }
    }

    #[test]
    fn test_index_order_independent_of_arrival_order() {
        let interleaved = vec![
            delta(1, Some("call_b"), Some("search_web"), Some(r#"{"query":"#)),
            delta(0, Some("call_a"), Some("search_web"), Some(r#"{"query":"#)),
            delta(1, None, None, Some(r#""axum"}"#)),
            delta(0, None, None, Some(r#""tokio"}"#)),
        ];
        let sequential = vec![
            delta(0, Some("call_a"), Some("search_web"), Some(r#"{"query":"#)),
            delta(0, None, None, Some(r#""tokio"}"#)),
            delta(1, Some("call_b"), Some("search_web"), Some(r#"{"query":"#)),
            delta(1, None, None, Some(r#""axum"}"#)),
        ];

        let run = |events: Vec<StreamEvent>| {
            let mut acc = DeltaAccumulator::new();
            for event in events {
                acc.apply(event);
            }
            acc.finish()
        };

        let a = run(interleaved);
        let b = run(sequential);
        assert_eq!(a, b);
        assert_eq!(a.tool_calls[0].id, "call_a");
        assert_eq!(a.tool_calls[0].arguments, r#"{"query":"tokio"}"#);
        assert_eq!(a.tool_calls[1].id, "call_b");
        assert_eq!(a.tool_calls[1].arguments, r#"{"query":"axum"}"#);
    }

    #[test]
    fn test_gap_in_indices_still_ordered() {
        let mut acc = DeltaAccumulator::new();
        acc.apply(delta(2, Some("c"), Some("search_web"), Some("{}")));
        acc.apply(delta(0, Some("a"), Some("search_web"), Some("{}")));

        let turn = acc.finish();
        let indices: Vec<u32> = turn.tool_calls.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn test_id_and_name_are_first_write_wins() {
        let mut acc = DeltaAccumulator::new();
        acc.apply(delta(0, None, Some(""), Some("{")));
        acc.apply(delta(0, Some("call_1"), Some("search_web"), None));
        acc.apply(delta(0, Some("call_2"), Some("other"), Some("}")));

        let turn = acc.finish();
        assert_eq!(turn.tool_calls[0].id, "call_1");
        assert_eq!(turn.tool_calls[0].name, "search_web");
        assert_eq!(turn.tool_calls[0].arguments, "{}");
    }

    #[test]
    fn test_malformed_arguments_become_empty_object() {
        let mut acc = DeltaAccumulator::new();
        acc.apply(delta(0, Some("a"), Some("search_web"), Some(r#"{"query":"ok"}"#)));
        acc.apply(delta(1, Some("b"), Some("search_web"), Some(r#"{"query":"tru"#)));
        acc.apply(delta(2, Some("c"), Some("search_web"), None));

        let turn = acc.finish();
        assert_eq!(turn.tool_calls[0].arguments, r#"{"query":"ok"}"#);
        assert_eq!(turn.tool_calls[1].arguments, "{}");
        assert_eq!(turn.tool_calls[2].arguments, "{}");
    }

    #[test]
    fn test_missing_id_is_synthesized() {
        let mut acc = DeltaAccumulator::new();
        acc.apply(delta(3, None, Some("search_web"), Some("{}")));
        assert_eq!(acc.finish().tool_calls[0].id, "call_3");
    }

    #[test]
    fn test_missing_index_appends_new_slot() {
        let mut acc = DeltaAccumulator::new();
        acc.apply(StreamEvent::ToolCallDelta(ToolCallDelta {
            index: None,
            id: Some("first".to_string()),
            ..Default::default()
        }));
        acc.apply(delta(4, Some("explicit"), None, None));
        acc.apply(StreamEvent::ToolCallDelta(ToolCallDelta {
            index: None,
            id: Some("after".to_string()),
            ..Default::default()
        }));

        let ids: Vec<(u32, String)> = acc
            .finish()
            .tool_calls
            .into_iter()
            .map(|c| (c.index, c.id))
            .collect();
        assert_eq!(
            ids,
            vec![
                (0, "first".to_string()),
                (4, "explicit".to_string()),
                (5, "after".to_string())
            ]
        );
    }

    #[test]
    fn test_missing_index_after_highest_index_is_dropped() {
        let mut acc = DeltaAccumulator::new();
        assert!(acc.apply(delta(u32::MAX, Some("last"), Some("search_web"), Some("{}"))));
        let changed = acc.apply(StreamEvent::ToolCallDelta(ToolCallDelta {
            index: None,
            id: Some("overflow".to_string()),
            arguments_fragment: Some("{\"query\":\"x\"}".to_string()),
            ..Default::default()
        }));
        assert!(!changed);

        let turn = acc.finish();
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].index, u32::MAX);
        assert_eq!(turn.tool_calls[0].id, "last");
        assert_eq!(turn.tool_calls[0].arguments, "{}");
    }

    #[test]
    fn test_snapshot_shows_partial_arguments() {
        let mut acc = DeltaAccumulator::new();
        acc.apply(StreamEvent::Content("Searching".to_string()));
        acc.apply(delta(0, Some("a"), Some("search_web"), Some(r#"{"que"#)));

        let snapshot = acc.snapshot();
        assert_eq!(snapshot.status, TurnStatus::Streaming);
        assert_eq!(snapshot.text, "Searching");
        assert_eq!(snapshot.tool_calls[0].arguments, r#"{"que"#);
    }

    #[test]
    fn test_events_after_done_are_ignored() {
        let mut acc = DeltaAccumulator::new();
        assert!(acc.apply(StreamEvent::Content("a".to_string())));
        assert!(acc.apply(StreamEvent::Done));
        assert!(acc.is_closed());
        assert!(!acc.apply(StreamEvent::Content("b".to_string())));
        assert_eq!(acc.text(), "a");
    }
}
