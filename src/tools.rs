//! # Tool definitions and the executor seam
//!
//! The model is offered exactly one tool, `search_web`. Its JSON schema is fixed and
//! sent with every request through [`Tool::to_openai_format`]:
//!
//! ```json
//! {
//!   "type": "function",
//!   "function": {
//!     "name": "search_web",
//!     "description": "Search the web for up-to-date information.",
//!     "parameters": {
//!       "type": "object",
//!       "properties": { "query": { "type": "string", "description": "..." } },
//!       "required": ["query"]
//!     }
//!   }
//! }
//! ```
//!
//! ## Execution
//!
//! The controller hands every finalized [`ToolCallRequest`] to a [`ToolExecutor`],
//! one at a time and in index order. Executors never fail: every problem (bad
//! arguments, unknown tool, network error) comes back as an `ok: false`
//! [`ToolOutcome`] so the model can see it and decide what to do next.
//!
//! [`DefaultToolExecutor`] dispatches `search_web` to [`WebSearch`]. Tests and hosts
//! that want a different side effect implement the trait themselves:
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use streaming_agent::{AgentConfig, Tool, ToolCallRequest, ToolExecutor, ToolOutcome};
//!
//! struct Canned;
//!
//! #[async_trait]
//! impl ToolExecutor for Canned {
//!     fn definitions(&self) -> Vec<Tool> {
//!         vec![streaming_agent::search_web_tool()]
//!     }
//!
//!     async fn execute(&self, _request: &ToolCallRequest, _config: &AgentConfig) -> ToolOutcome {
//!         ToolOutcome::success("1. Tokio", "[]")
//!     }
//! }
//! ```

use crate::config::AgentConfig;
use crate::search::WebSearch;
use crate::types::{ToolCallRequest, ToolOutcome};
use async_trait::async_trait;
use serde_json::{Value, json};

/// Name of the built-in web search tool
pub const SEARCH_WEB: &str = "search_web";

/// Tool metadata in OpenAI function-calling terms.
///
/// Only the declaration lives here; the side effect belongs to a [`ToolExecutor`].
#[derive(Debug, Clone, PartialEq)]
pub struct Tool {
    name: String,
    description: String,
    /// Full JSON Schema object for the arguments
    input_schema: Value,
}

impl Tool {
    /// Create a tool declaration. `input_schema` must already be a JSON Schema
    /// object (`{"type": "object", "properties": {...}}`); anything else is replaced
    /// by an empty object schema.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        let is_schema =
            input_schema.get("type").is_some() && input_schema.get("properties").is_some();
        let input_schema = if is_schema {
            input_schema
        } else {
            json!({"type": "object", "properties": {}, "required": []})
        };

        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// The `{"type": "function", "function": {...}}` entry for the `tools` array.
    pub fn to_openai_format(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }
}

/// The fixed `search_web` declaration.
pub fn search_web_tool() -> Tool {
    Tool::new(
        SEARCH_WEB,
        "Search the web for up-to-date information. Returns up to 5 results with title, link and snippet.",
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                }
            },
            "required": ["query"]
        }),
    )
}

/// Performs the side effect behind a tool call.
///
/// `config` is the snapshot taken right before this call, so endpoint or key
/// changes made between calls are picked up. Implementations must not panic and
/// must not block; they may be dropped mid-flight when the user cancels.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Declarations sent to the model with every request.
    fn definitions(&self) -> Vec<Tool>;

    /// Runs one call to completion.
    async fn execute(&self, request: &ToolCallRequest, config: &AgentConfig) -> ToolOutcome;
}

/// Executor for the built-in `search_web` tool.
#[derive(Debug, Clone, Default)]
pub struct DefaultToolExecutor {
    search: WebSearch,
}

impl DefaultToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured search client (custom proxy, TLS roots, ...).
    pub fn with_search(search: WebSearch) -> Self {
        Self { search }
    }
}

#[async_trait]
impl ToolExecutor for DefaultToolExecutor {
    fn definitions(&self) -> Vec<Tool> {
        vec![search_web_tool()]
    }

    async fn execute(&self, request: &ToolCallRequest, config: &AgentConfig) -> ToolOutcome {
        match request.name.as_str() {
            SEARCH_WEB => self.search.run(request, config).await,
            other => {
                log::warn!("Model requested unknown tool '{}'", other);
                let message = format!("Unknown tool: {}", other);
                ToolOutcome::failure(message.clone(), message)
            }
        }
    }
}
