//! # Streaming Agent
//!
//! A streaming, tool-calling agent client for OpenAI-compatible chat completion
//! endpoints.
//!
//! ## Overview
//!
//! One call to [`Client::submit`] runs a full cycle:
//!
//! 1. the whole conversation is sent to the chat endpoint with `stream: true`
//! 2. the SSE response is split into records, decoded, and folded into one
//!    assistant turn while live snapshots go to a [`TranscriptSink`]
//! 3. if the model asked for tools, each call runs in order (a web search by
//!    default) and its result is appended to the history
//! 4. the loop goes back to step 1 until the model answers without tools
//!
//! Failures never crash the session. A broken stream, a non-2xx response or a
//! failed search ends up in the history as a turn explaining what happened, and the
//! client returns to idle so the user can try again.
//!
//! ## Key Features
//!
//! - **Chunk-boundary safe decoding**: records are only decoded once their blank-line
//!   separator has arrived, however the transport splits the bytes
//! - **Fragment merging**: tool-call fragments are merged by index, arguments are
//!   concatenated, out-of-order indices still produce an ordered list
//! - **Sequential tools**: results land in history in a deterministic order
//! - **Cooperative cancellation**: [`Client::cancel`] aborts the request, the
//!   stream, or the running tool at the next suspension point
//!
//! ## Example
//!
//! ```rust,no_run
//! use streaming_agent::{event_channel, AgentConfig, Client, TranscriptEvent};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AgentConfig::builder()
//!         .api_key(std::env::var("STREAMING_AGENT_API_KEY")?)
//!         .model("gpt-4o-mini")
//!         .build()?;
//!
//!     let (sink, mut events) = event_channel();
//!     let client = Client::builder(config).sink(sink).build()?;
//!
//!     let printer = tokio::spawn(async move {
//!         while let Some(event) = events.next().await {
//!             match event {
//!                 TranscriptEvent::ToolStarted(call) => println!("-> {} {}", call.name, call.arguments),
//!                 TranscriptEvent::TurnAppended { turn, .. } => println!("{:?}", turn),
//!                 _ => {}
//!             }
//!         }
//!     });
//!
//!     client.submit("What changed in the latest Rust release?").await?;
//!     drop(client);
//!     printer.await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **sse**: frame decoder (byte chunks to JSON payloads)
//! - **accumulator**: delta accumulator (stream events to one assistant turn)
//! - **tools** / **search**: tool declarations, the executor seam, `search_web`
//! - **client**: the agent loop controller and its state machine
//! - **session** / **sink**: conversation state and the events a UI renders from
//! - **types**: turns, stream events and the wire format
//! - **config** / **error**: configuration and the crate error type

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

/// Delta accumulator: folds stream events into a growing assistant turn.
mod accumulator;

/// Agent loop controller: request, stream, run tools, recurse.
mod client;

/// `AgentConfig`, its builder, environment overrides and JSON persistence.
mod config;

/// Error types and the crate-wide `Result` alias.
mod error;

/// The `search_web` tool backed by an HTTP search API.
mod search;

/// Session state and snapshots.
mod session;

/// Transcript events and sinks.
mod sink;

/// Tool declarations and the `ToolExecutor` trait.
mod tools;

/// Conversation turns, stream events and wire types.
mod types;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================

/// Frame decoder, public so hosts can decode SSE bodies on their own.
pub mod sse;

// --- Core Client API ---

pub use client::{CancelHandle, Client, ClientBuilder, build_request};

// --- Configuration ---

pub use config::{
    AgentConfig, AgentConfigBuilder, DEFAULT_API_ENDPOINT, DEFAULT_MODEL,
    DEFAULT_SEARCH_ENDPOINT, DEFAULT_SYSTEM_PROMPT, DEFAULT_TIMEOUT_SECS,
};

// --- Error Handling ---

pub use error::{Error, Result};

// --- Streaming ---

pub use accumulator::DeltaAccumulator;

// --- Session and Transcript ---

pub use session::{AgentSession, AgentState, SessionSnapshot};
pub use sink::{NoopSink, TranscriptEvent, TranscriptSink, event_channel};

// --- Tool System ---

pub use search::{MAX_RESULTS, SearchHit, WebSearch};
pub use tools::{DefaultToolExecutor, SEARCH_WEB, Tool, ToolExecutor, search_web_tool};

// --- Core Types ---

pub use types::{
    AssistantTurn, CANCELED_MESSAGE, ChatChunk, ChatRequest, StreamEvent, ToolCallDelta,
    ToolCallRequest, ToolOutcome, ToolResultTurn, Turn, TurnStatus, UserTurn, WireMessage,
    failed_message,
};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// The types most hosts need. Import with `use streaming_agent::prelude::*;`.
pub mod prelude {
    pub use crate::{
        AgentConfig, AgentState, AssistantTurn, CancelHandle, Client, Error, Result,
        ToolCallRequest, ToolExecutor, ToolOutcome, TranscriptEvent, TranscriptSink, Turn,
        TurnStatus, event_channel,
    };
}
