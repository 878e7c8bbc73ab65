//! Core types for the streaming agent
//!
//! Two groups live here: the conversation model the controller owns ([`Turn`] and
//! friends) and the OpenAI-compatible wire format used on the chat endpoint. The wire
//! structs are deliberately lenient on the way in: every delta field is optional and
//! absent or `null` values simply mean "nothing to merge for this field".

use serde::{Deserialize, Serialize};

/// Fixed assistant text used when the user cancels an in-flight request.
pub const CANCELED_MESSAGE: &str = "Request canceled.";

/// Assistant text used when a request fails at the transport level.
pub fn failed_message(reason: impl std::fmt::Display) -> String {
    format!("Request failed: {}", reason)
}

/// One logical unit of conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    User(UserTurn),
    Assistant(AssistantTurn),
    ToolResult(ToolResultTurn),
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Turn::User(UserTurn { text: text.into() })
    }

    pub fn as_assistant(&self) -> Option<&AssistantTurn> {
        match self {
            Turn::Assistant(turn) => Some(turn),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResultTurn> {
        match self {
            Turn::ToolResult(turn) => Some(turn),
            _ => None,
        }
    }
}

/// Text typed by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTurn {
    pub text: String,
}

/// Lifecycle of an assistant turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Still receiving deltas
    Streaming,
    /// Stream closed normally
    Complete,
    /// User canceled while the turn was in flight
    Canceled,
    /// Transport failure; `text` holds the error message
    Failed,
}

/// Output of the model for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantTurn {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub status: TurnStatus,
}

impl AssistantTurn {
    /// An empty turn in the `Streaming` state.
    pub fn streaming() -> Self {
        Self {
            text: String::new(),
            tool_calls: Vec::new(),
            status: TurnStatus::Streaming,
        }
    }

    /// A finished turn with text only.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            status: TurnStatus::Complete,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Result of one tool call, fed back to the model on the next request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResultTurn {
    pub tool_call_id: String,
    pub tool_name: String,
    /// Machine payload sent to the model as the tool message content
    pub raw_payload: String,
    /// Display fields, never sent to the model
    pub ok: bool,
    pub summary: String,
}

impl ToolResultTurn {
    pub fn new(request: &ToolCallRequest, outcome: &ToolOutcome) -> Self {
        Self {
            tool_call_id: request.id.clone(),
            tool_name: request.name.clone(),
            raw_payload: outcome.raw.clone(),
            ok: outcome.ok,
            summary: outcome.summary.clone(),
        }
    }
}

/// A tool invocation requested by the model.
///
/// Identity during streaming is the server-assigned `index`, not `id`: the id may
/// arrive on a later fragment than the first one for that index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub index: u32,
    pub id: String,
    pub name: String,
    /// JSON text; may be incomplete until the turn is finalized
    pub arguments: String,
}

/// One decoded unit of the model stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Appendable text fragment
    Content(String),
    /// Partial tool call; every field is optional
    ToolCallDelta(ToolCallDelta),
    /// The stream closed
    Done,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallDelta {
    /// `None` appends a new slot after the highest index seen so far
    pub index: Option<u32>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments_fragment: Option<String>,
}

/// What a tool produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub ok: bool,
    /// Human readable, for display
    pub summary: String,
    /// Machine payload, fed back to the model
    pub raw: String,
}

impl ToolOutcome {
    pub fn success(summary: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            ok: true,
            summary: summary.into(),
            raw: raw.into(),
        }
    }

    pub fn failure(summary: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            ok: false,
            summary: summary.into(),
            raw: raw.into(),
        }
    }
}

// ============================================================================
// WIRE FORMAT
// ============================================================================

/// Chat completions request body
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub stream: bool,
    pub tools: Vec<serde_json::Value>,
    pub tool_choice: String,
}

/// Message in the outgoing history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl WireMessage {
    fn bare(role: &str) -> Self {
        Self {
            role: role.to_string(),
            content: None,
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            content: Some(WireContent::Text(text.into())),
            ..Self::bare("system")
        }
    }

    pub fn from_turn(turn: &Turn) -> Self {
        match turn {
            Turn::User(user) => Self {
                content: Some(WireContent::Text(user.text.clone())),
                ..Self::bare("user")
            },
            Turn::Assistant(assistant) => {
                let content = (!assistant.text.is_empty())
                    .then(|| WireContent::Parts(vec![WireContentPart::text(&assistant.text)]));
                let tool_calls = assistant.has_tool_calls().then(|| {
                    assistant
                        .tool_calls
                        .iter()
                        .map(WireToolCall::from_request)
                        .collect()
                });
                Self {
                    content,
                    tool_calls,
                    ..Self::bare("assistant")
                }
            }
            Turn::ToolResult(result) => Self {
                content: Some(WireContent::Text(result.raw_payload.clone())),
                tool_call_id: Some(result.tool_call_id.clone()),
                name: Some(result.tool_name.clone()),
                ..Self::bare("tool")
            },
        }
    }
}

/// Message content: a plain string or typed parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Parts(Vec<WireContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireContentPart {
    #[serde(rename = "type")]
    pub part_type: String,
    pub text: String,
}

impl WireContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            part_type: "text".to_string(),
            text: text.into(),
        }
    }
}

/// Finalized tool call in an assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: WireFunction,
}

impl WireToolCall {
    pub fn from_request(request: &ToolCallRequest) -> Self {
        Self {
            id: request.id.clone(),
            call_type: "function".to_string(),
            function: WireFunction {
                name: request.name.clone(),
                arguments: request.arguments.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFunction {
    pub name: String,
    pub arguments: String,
}

/// Streaming chunk (`choices[0].delta` is the only part we read)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Option<ChunkDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<DeltaContent>,
    #[serde(default)]
    pub tool_calls: Option<Vec<WireToolCallDelta>>,
}

/// Delta content arrives either as a string or as a list of `{text}` segments.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DeltaContent {
    Text(String),
    Parts(Vec<DeltaContentPart>),
}

impl DeltaContent {
    pub fn joined(&self) -> String {
        match self {
            DeltaContent::Text(text) => text.clone(),
            DeltaContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeltaContentPart {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireToolCallDelta {
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<WireFunctionDelta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireFunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

impl ChatChunk {
    /// Converts the first choice's delta into stream events, in field order:
    /// text first, then tool call fragments in the order the server listed them.
    pub fn into_events(self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let Some(delta) = self.choices.into_iter().next().and_then(|c| c.delta) else {
            return events;
        };

        if let Some(content) = delta.content {
            let text = content.joined();
            if !text.is_empty() {
                events.push(StreamEvent::Content(text));
            }
        }

        for call in delta.tool_calls.unwrap_or_default() {
            let (name, arguments_fragment) = match call.function {
                Some(function) => (function.name, function.arguments),
                None => (None, None),
            };
            events.push(StreamEvent::ToolCallDelta(ToolCallDelta {
                index: call.index,
                id: call.id,
                name,
                arguments_fragment,
            }));
        }

        events
    }
}
