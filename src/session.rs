//! Session state owned by the controller
//!
//! [`AgentSession`] lives behind a single mutex inside [`Client`](crate::Client). The
//! lock is only ever held for short synchronous updates, never across an `.await`.

use crate::types::{AssistantTurn, Turn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Where the controller is in a cycle.
///
/// ```text
/// Idle -> Requesting -> StreamingTurn -> Idle                      (no tool calls)
///                                     -> ExecutingTools -> Requesting (recurse)
/// any non-Idle --cancel--> Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Requesting,
    StreamingTurn,
    ExecutingTools,
}

impl AgentState {
    pub fn is_idle(self) -> bool {
        self == AgentState::Idle
    }
}

/// Conversation history plus the bookkeeping for the active cycle.
#[derive(Debug)]
pub struct AgentSession {
    /// Finalized turns, oldest first
    pub history: Vec<Turn>,
    /// The assistant turn currently being streamed, if any
    pub in_flight: Option<AssistantTurn>,
    pub state: AgentState,
    /// Token for the active cycle; `None` while idle
    pub cancel: Option<CancellationToken>,
    /// Bumped by `clear`. A cycle that finds a different epoch than the one it
    /// started with drops its results.
    pub epoch: u64,
    /// Tool rounds completed since the last user message
    pub tool_rounds: u32,
}

impl Default for AgentSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentSession {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            in_flight: None,
            state: AgentState::Idle,
            cancel: None,
            epoch: 0,
            tool_rounds: 0,
        }
    }

    pub fn is_streaming(&self) -> bool {
        !self.state.is_idle()
    }

    /// Appends a finalized turn and returns its position.
    pub fn push(&mut self, turn: Turn) -> usize {
        self.history.push(turn);
        self.history.len() - 1
    }

    /// Drops everything, keeps counting epochs.
    pub fn reset(&mut self) {
        self.history.clear();
        self.in_flight = None;
        self.state = AgentState::Idle;
        self.cancel = None;
        self.tool_rounds = 0;
        self.epoch += 1;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            history: self.history.clone(),
            in_flight: self.in_flight.clone(),
            state: self.state,
            streaming: self.is_streaming(),
        }
    }
}

/// Read-only copy of the session a UI can render from scratch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub history: Vec<Turn>,
    pub in_flight: Option<AssistantTurn>,
    pub state: AgentState,
    pub streaming: bool,
}
