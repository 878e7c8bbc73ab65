//! Transcript sink: how the controller tells a UI what changed
//!
//! Every update is pushed through [`TranscriptSink::on_event`] in the order it
//! happened. Sinks are called synchronously from the controller's task, so they
//! must return quickly; forward to a channel if rendering is slow.
//!
//! ```rust,no_run
//! use streaming_agent::{event_channel, AgentConfig, Client, TranscriptEvent};
//! use futures::StreamExt;
//!
//! # async fn example() -> streaming_agent::Result<()> {
//! let (sink, mut events) = event_channel();
//! let client = Client::builder(AgentConfig::from_env()).sink(sink).build()?;
//!
//! tokio::spawn(async move {
//!     while let Some(event) = events.next().await {
//!         if let TranscriptEvent::AssistantUpdated(turn) = event {
//!             print!("\r{}", turn.text);
//!         }
//!     }
//! });
//!
//! client.submit("What's new in tokio?").await?;
//! # Ok(())
//! # }
//! ```

use crate::session::AgentState;
use crate::types::{AssistantTurn, ToolCallRequest, ToolOutcome, Turn};
use tokio::sync::mpsc::UnboundedSender;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// One ordered update from the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEvent {
    /// The state machine moved
    StateChanged(AgentState),
    /// A turn was finalized into history at `index`
    TurnAppended { index: usize, turn: Turn },
    /// Live view of the in-flight assistant turn, sent after every stream event
    AssistantUpdated(AssistantTurn),
    /// A tool call is about to run
    ToolStarted(ToolCallRequest),
    /// A tool call finished (`outcome.ok` tells done from failed)
    ToolFinished {
        request: ToolCallRequest,
        outcome: ToolOutcome,
    },
    /// The conversation was cleared
    Cleared,
}

/// Receiver of transcript updates.
pub trait TranscriptSink: Send + Sync {
    fn on_event(&self, event: TranscriptEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl TranscriptSink for NoopSink {
    fn on_event(&self, _event: TranscriptEvent) {}
}

impl<F> TranscriptSink for F
where
    F: Fn(TranscriptEvent) + Send + Sync,
{
    fn on_event(&self, event: TranscriptEvent) {
        self(event)
    }
}

impl TranscriptSink for UnboundedSender<TranscriptEvent> {
    fn on_event(&self, event: TranscriptEvent) {
        // Receiver gone means nobody is rendering; nothing to do.
        let _ = self.send(event);
    }
}

/// A sender to hand to the client and a stream of the events it receives.
pub fn event_channel() -> (
    UnboundedSender<TranscriptEvent>,
    UnboundedReceiverStream<TranscriptEvent>,
) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    (tx, UnboundedReceiverStream::new(rx))
}
