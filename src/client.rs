//! Agent loop controller
//!
//! [`Client`] owns the conversation and drives one cycle at a time:
//!
//! ```text
//! submit(text)
//!   └─ Requesting ──► StreamingTurn ──► no tool calls ──► Idle
//!          ▲                         └► tool calls ──► ExecutingTools ─┐
//!          └───────────────────────────────────────────────────────────┘
//! ```
//!
//! - Every request carries the whole history, the system prompt and the fixed tool
//!   declarations.
//! - Stream records go through the frame decoder into a [`DeltaAccumulator`]; a
//!   snapshot of the in-flight turn is pushed to the sink after every event.
//! - Tool calls run strictly one after another in index order. Each result is
//!   appended to history before the next call starts.
//! - Transport failures end the cycle with an assistant turn explaining what went
//!   wrong. Nothing is retried.
//!
//! ## Cancellation
//!
//! [`Client::cancel`] (or a [`CancelHandle`]) trips the cycle's
//! [`CancellationToken`]. The token is raced against the request send, every chunk
//! read and every tool call, so the cycle unwinds at the next suspension point.
//!
//! ## Concurrency
//!
//! `Client` is cheap to clone. All clones share one session, guarded by a single
//! mutex that is never held across an `.await`. Sink callbacks run after the lock
//! is released, so a sink may call back into the client.
//!
//! # Example
//!
//! ```rust,no_run
//! use streaming_agent::{AgentConfig, Client};
//!
//! # async fn example() -> streaming_agent::Result<()> {
//! let config = AgentConfig::builder().api_key("sk-...").build()?;
//! let client = Client::new(config)?;
//!
//! client.submit("Find recent news about the Rust 2024 edition").await?;
//!
//! for turn in client.history() {
//!     println!("{:?}", turn);
//! }
//! # Ok(())
//! # }
//! ```

use crate::accumulator::DeltaAccumulator;
use crate::config::AgentConfig;
use crate::search::WebSearch;
use crate::session::{AgentSession, AgentState, SessionSnapshot};
use crate::sink::{NoopSink, TranscriptEvent, TranscriptSink};
use crate::sse;
use crate::tools::{DefaultToolExecutor, Tool, ToolExecutor};
use crate::types::{
    AssistantTurn, CANCELED_MESSAGE, ChatChunk, ChatRequest, StreamEvent, ToolCallRequest,
    ToolOutcome, ToolResultTurn, Turn, TurnStatus, WireMessage, failed_message,
};
use crate::{Error, Result};
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Builds the chat completions request body for the current history.
///
/// The system prompt is only sent when non-empty. Failed and canceled assistant
/// turns are sent like any other assistant turn so the model sees what happened.
pub fn build_request(config: &AgentConfig, history: &[Turn], tools: &[Tool]) -> ChatRequest {
    let mut messages = Vec::with_capacity(history.len() + 1);
    if !config.system_prompt.trim().is_empty() {
        messages.push(WireMessage::system(config.system_prompt.trim()));
    }
    messages.extend(history.iter().map(WireMessage::from_turn));

    ChatRequest {
        model: config.model.clone(),
        messages,
        stream: true,
        tools: tools.iter().map(Tool::to_openai_format).collect(),
        tool_choice: "auto".to_string(),
    }
}

/// How a single streamed request ended.
enum TurnOutcome {
    /// Stream closed normally
    Finished(AssistantTurn),
    /// User canceled; carries what had been accumulated
    Canceled(DeltaAccumulator),
    /// Transport failure
    Failed(Error),
    /// The session was cleared underneath us
    Abandoned,
}

/// Cloneable handle that cancels whatever cycle is running.
///
/// ```rust,no_run
/// # use streaming_agent::{AgentConfig, Client};
/// # async fn example(client: Client) {
/// let handle = client.cancel_handle();
/// tokio::spawn(async move {
///     tokio::time::sleep(std::time::Duration::from_secs(10)).await;
///     handle.cancel();
/// });
/// let _ = client.submit("Write a very long essay").await;
/// # }
/// ```
#[derive(Clone)]
pub struct CancelHandle {
    session: Arc<Mutex<AgentSession>>,
}

impl CancelHandle {
    /// Returns `true` if a cycle was running.
    pub fn cancel(&self) -> bool {
        cancel_session(&self.session)
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle").finish_non_exhaustive()
    }
}

/// Runs `future` unless `token` trips first.
async fn or_cancel<F: Future>(token: &CancellationToken, future: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        output = future => Ok(output),
    }
}

fn lock(session: &Mutex<AgentSession>) -> MutexGuard<'_, AgentSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

fn cancel_session(session: &Mutex<AgentSession>) -> bool {
    let session = lock(session);
    match &session.cancel {
        Some(token) if !token.is_cancelled() => {
            log::debug!("Canceling cycle in state {:?}", session.state);
            token.cancel();
            true
        }
        _ => false,
    }
}

/// Moves the state machine and records the transition.
fn transition(session: &mut AgentSession, events: &mut Vec<TranscriptEvent>, state: AgentState) {
    if session.state != state {
        log::debug!("Agent state {:?} -> {:?}", session.state, state);
        session.state = state;
        events.push(TranscriptEvent::StateChanged(state));
    }
}

/// Appends a turn to history and records it.
fn append(session: &mut AgentSession, events: &mut Vec<TranscriptEvent>, turn: Turn) {
    let index = session.push(turn.clone());
    events.push(TranscriptEvent::TurnAppended { index, turn });
}

/// Text and status for a turn the user canceled.
fn canceled_turn(accumulator: DeltaAccumulator, keep_partial: bool) -> AssistantTurn {
    let text = if keep_partial && !accumulator.text().is_empty() {
        accumulator.text().to_string()
    } else {
        CANCELED_MESSAGE.to_string()
    };

    AssistantTurn {
        text,
        tool_calls: Vec::new(),
        status: TurnStatus::Canceled,
    }
}

fn failed_turn(error: &Error) -> AssistantTurn {
    AssistantTurn {
        text: failed_message(error),
        tool_calls: Vec::new(),
        status: TurnStatus::Failed,
    }
}

struct Inner {
    session: Arc<Mutex<AgentSession>>,
    config: Mutex<AgentConfig>,
    http: reqwest::Client,
    executor: Arc<dyn ToolExecutor>,
    sink: Arc<dyn TranscriptSink>,
}

/// Streaming tool-calling agent.
///
/// See the [module docs](self) for the cycle it runs.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Client`]
pub struct ClientBuilder {
    config: AgentConfig,
    executor: Option<Arc<dyn ToolExecutor>>,
    sink: Option<Arc<dyn TranscriptSink>>,
    http: Option<reqwest::Client>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .field("custom_executor", &self.executor.is_some())
            .field("custom_sink", &self.sink.is_some())
            .finish()
    }
}

impl ClientBuilder {
    /// Replace the built-in `search_web` executor.
    pub fn executor(mut self, executor: impl ToolExecutor + 'static) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    /// Where transcript updates go. Defaults to [`NoopSink`].
    pub fn sink(mut self, sink: impl TranscriptSink + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Reuse an existing HTTP client (proxy, TLS roots, connection pool).
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> Result<Client> {
        let http = match self.http {
            Some(http) => http,
            None => reqwest::Client::builder()
                .build()
                .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?,
        };

        let executor = self.executor.unwrap_or_else(|| {
            Arc::new(DefaultToolExecutor::with_search(WebSearch::with_client(
                http.clone(),
            )))
        });

        Ok(Client {
            inner: Arc::new(Inner {
                session: Arc::new(Mutex::new(AgentSession::new())),
                config: Mutex::new(self.config),
                http,
                executor,
                sink: self.sink.unwrap_or_else(|| Arc::new(NoopSink)),
            }),
        })
    }
}

impl Client {
    /// Client with the built-in search tool and no sink.
    pub fn new(config: AgentConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: AgentConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            executor: None,
            sink: None,
            http: None,
        }
    }

    // ------------------------------------------------------------------------
    // Session access
    // ------------------------------------------------------------------------

    fn session(&self) -> MutexGuard<'_, AgentSession> {
        lock(&self.inner.session)
    }

    /// Runs `f` against the session if it still belongs to `epoch`, then delivers
    /// the events it produced. Returns `false` when the session was cleared.
    fn update(
        &self,
        epoch: u64,
        f: impl FnOnce(&mut AgentSession, &mut Vec<TranscriptEvent>),
    ) -> bool {
        let mut events = Vec::new();
        {
            let mut session = self.session();
            if session.epoch != epoch {
                return false;
            }
            f(&mut session, &mut events);
        }
        self.emit(events);
        true
    }

    fn emit(&self, events: Vec<TranscriptEvent>) {
        for event in events {
            self.inner.sink.on_event(event);
        }
    }

    /// Copy of the finalized history.
    pub fn history(&self) -> Vec<Turn> {
        self.session().history.clone()
    }

    pub fn state(&self) -> AgentState {
        self.session().state
    }

    /// True whenever a cycle is active.
    pub fn is_streaming(&self) -> bool {
        self.session().is_streaming()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session().snapshot()
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> AgentConfig {
        self.inner
            .config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swaps the configuration. A running cycle picks it up at its next request
    /// or tool call.
    pub fn set_config(&self, config: AgentConfig) {
        *self
            .inner
            .config
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = config;
    }

    // ------------------------------------------------------------------------
    // User actions
    // ------------------------------------------------------------------------

    /// Cancels the running cycle, if any. Returns `true` if one was running.
    pub fn cancel(&self) -> bool {
        cancel_session(&self.inner.session)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            session: self.inner.session.clone(),
        }
    }

    /// Cancels any running cycle and empties the conversation.
    ///
    /// A cycle that was running notices the reset and drops its results.
    pub fn clear(&self) {
        let was_busy = {
            let mut session = self.session();
            if let Some(token) = session.cancel.take() {
                token.cancel();
            }
            let was_busy = session.is_streaming();
            session.reset();
            was_busy
        };

        log::debug!("Conversation cleared");
        let mut events = vec![TranscriptEvent::Cleared];
        if was_busy {
            events.push(TranscriptEvent::StateChanged(AgentState::Idle));
        }
        self.emit(events);
    }

    /// Appends `text` as a user turn and runs cycles until the model answers
    /// without calling tools, the user cancels, or a request fails.
    ///
    /// Blank input is ignored.
    ///
    /// # Errors
    ///
    /// - [`Error::Busy`] if a cycle is already running, whatever the configuration
    /// - [`Error::Config`] if the configuration cannot run a cycle (no API key);
    ///   the session is left untouched
    ///
    /// Transport and tool failures are not errors here: they end up in history.
    pub async fn submit(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let mut events = Vec::new();
        let (token, epoch) = {
            let mut session = self.session();
            if !session.state.is_idle() {
                return Err(Error::Busy);
            }
            self.config().validate()?;

            let token = CancellationToken::new();
            session.cancel = Some(token.clone());
            session.tool_rounds = 0;
            append(&mut session, &mut events, Turn::user(text));
            transition(&mut session, &mut events, AgentState::Requesting);
            (token, session.epoch)
        };
        self.emit(events);

        self.run_cycle(&token, epoch).await;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // The loop
    // ------------------------------------------------------------------------

    async fn run_cycle(&self, token: &CancellationToken, epoch: u64) {
        loop {
            let config = self.config();
            let Some(request) = self.prepare_request(&config, epoch) else {
                return;
            };

            match self.stream_turn(&config, &request, token, epoch).await {
                TurnOutcome::Finished(turn) if turn.has_tool_calls() => {
                    if !self.begin_tools(turn, &config, epoch) {
                        return;
                    }
                    if !self.execute_tools(token, epoch).await {
                        return;
                    }
                    if !self.update(epoch, |session, events| {
                        transition(session, events, AgentState::Requesting)
                    }) {
                        return;
                    }
                }
                TurnOutcome::Finished(turn) => {
                    self.finish(epoch, Some(turn));
                    return;
                }
                TurnOutcome::Canceled(accumulator) => {
                    log::debug!("Request canceled by user");
                    let turn = canceled_turn(accumulator, config.keep_partial_on_cancel);
                    self.finish(epoch, Some(turn));
                    return;
                }
                TurnOutcome::Failed(error) => {
                    log::warn!("Chat request failed: {}", error);
                    self.finish(epoch, Some(failed_turn(&error)));
                    return;
                }
                TurnOutcome::Abandoned => return,
            }
        }
    }

    /// Builds the request body and opens an empty in-flight turn.
    fn prepare_request(&self, config: &AgentConfig, epoch: u64) -> Option<ChatRequest> {
        let tools = self.inner.executor.definitions();
        let mut request = None;
        self.update(epoch, |session, events| {
            request = Some(build_request(config, &session.history, &tools));
            let turn = AssistantTurn::streaming();
            session.in_flight = Some(turn.clone());
            events.push(TranscriptEvent::AssistantUpdated(turn));
        });
        request
    }

    async fn stream_turn(
        &self,
        config: &AgentConfig,
        request: &ChatRequest,
        token: &CancellationToken,
        epoch: u64,
    ) -> TurnOutcome {
        let mut accumulator = DeltaAccumulator::new();

        log::debug!(
            "Sending chat request to {} (model {}, {} messages)",
            config.api_endpoint,
            request.model,
            request.messages.len()
        );

        let send = self
            .inner
            .http
            .post(&config.api_endpoint)
            .bearer_auth(&config.api_key)
            .timeout(Duration::from_secs(config.timeout_secs))
            .json(request)
            .send();

        let response = or_cancel(token, send)
            .await
            .and_then(|response| response.map_err(Error::from));
        let response = match response {
            Ok(response) => response,
            Err(e) if e.is_cancelled() => return TurnOutcome::Canceled(accumulator),
            Err(e) => return TurnOutcome::Failed(e),
        };

        let status = response.status();
        if !status.is_success() {
            let body = match or_cancel(token, response.text()).await {
                Ok(body) => body.unwrap_or_default(),
                Err(_) => return TurnOutcome::Canceled(accumulator),
            };
            return TurnOutcome::Failed(Error::api(status, body.trim()));
        }

        if !self.update(epoch, |session, events| {
            transition(session, events, AgentState::StreamingTurn)
        }) {
            return TurnOutcome::Abandoned;
        }

        let mut frames = sse::decode_stream(response.bytes_stream());
        loop {
            let next = match or_cancel(token, frames.next()).await {
                Ok(next) => next,
                Err(_) => return TurnOutcome::Canceled(accumulator),
            };

            let value = match next {
                Some(Ok(value)) => value,
                Some(Err(e)) => return TurnOutcome::Failed(e),
                None => break,
            };

            let chunk: ChatChunk = match serde_json::from_value(value) {
                Ok(chunk) => chunk,
                Err(e) => {
                    log::trace!("Skipping record that is not a chat chunk: {}", e);
                    continue;
                }
            };

            for event in chunk.into_events() {
                if !accumulator.apply(event) {
                    continue;
                }
                let snapshot = accumulator.snapshot();
                if !self.update(epoch, |session, events| {
                    session.in_flight = Some(snapshot.clone());
                    events.push(TranscriptEvent::AssistantUpdated(snapshot));
                }) {
                    return TurnOutcome::Abandoned;
                }
            }
        }

        accumulator.apply(StreamEvent::Done);
        TurnOutcome::Finished(accumulator.finish())
    }

    /// Appends a turn that requested tools and enters `ExecutingTools`.
    ///
    /// When the round limit is reached the tool calls are dropped and the cycle
    /// ends instead. Returns `false` if no tools should run.
    fn begin_tools(&self, mut turn: AssistantTurn, config: &AgentConfig, epoch: u64) -> bool {
        let mut proceed = false;
        let updated = self.update(epoch, |session, events| {
            if let Some(max) = config.max_tool_rounds {
                if session.tool_rounds >= max {
                    log::warn!(
                        "Reached max_tool_rounds ({}), dropping {} tool call(s)",
                        max,
                        turn.tool_calls.len()
                    );
                    turn.tool_calls.clear();
                    session.in_flight = None;
                    append(session, events, Turn::Assistant(turn));
                    return;
                }
            }

            session.tool_rounds += 1;
            session.in_flight = None;
            append(session, events, Turn::Assistant(turn));
            transition(session, events, AgentState::ExecutingTools);
            proceed = true;
        });

        if updated && !proceed {
            self.finish(epoch, None);
        }
        updated && proceed
    }

    /// Runs the tool calls of the last assistant turn in index order.
    ///
    /// Returns `true` when every call produced a result and the loop should
    /// request again.
    async fn execute_tools(&self, token: &CancellationToken, epoch: u64) -> bool {
        let calls: Vec<ToolCallRequest> = {
            let session = self.session();
            if session.epoch != epoch {
                return false;
            }
            session
                .history
                .last()
                .and_then(Turn::as_assistant)
                .map(|turn| turn.tool_calls.clone())
                .unwrap_or_default()
        };

        for (position, call) in calls.iter().enumerate() {
            if token.is_cancelled() {
                self.cancel_tools(&calls[position..], epoch);
                return false;
            }

            // Fresh snapshot so endpoint or key edits apply to the next call.
            let config = self.config();

            if !self.update(epoch, |_, events| {
                events.push(TranscriptEvent::ToolStarted(call.clone()))
            }) {
                return false;
            }
            log::debug!("Running tool {} ({})", call.name, call.id);

            let outcome = match or_cancel(token, self.inner.executor.execute(call, &config)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.cancel_tools(&calls[position..], epoch);
                    return false;
                }
            };

            log::debug!("Tool {} finished (ok: {})", call.id, outcome.ok);
            if !self.record_tool_result(call, outcome, epoch) {
                return false;
            }
        }

        true
    }

    fn record_tool_result(&self, call: &ToolCallRequest, outcome: ToolOutcome, epoch: u64) -> bool {
        self.update(epoch, |session, events| {
            let turn = Turn::ToolResult(ToolResultTurn::new(call, &outcome));
            events.push(TranscriptEvent::ToolFinished {
                request: call.clone(),
                outcome,
            });
            append(session, events, turn);
        })
    }

    /// Gives every call that has no result yet a failed one, so each tool call
    /// in history stays paired with a result, then ends the cycle.
    fn cancel_tools(&self, remaining: &[ToolCallRequest], epoch: u64) {
        log::debug!("Tool execution canceled, {} call(s) skipped", remaining.len());
        for call in remaining {
            let outcome = ToolOutcome::failure(CANCELED_MESSAGE, CANCELED_MESSAGE);
            if !self.record_tool_result(call, outcome, epoch) {
                return;
            }
        }
        self.finish(epoch, None);
    }

    /// Appends the final turn (if any) and returns to `Idle`.
    fn finish(&self, epoch: u64, turn: Option<AssistantTurn>) {
        self.update(epoch, |session, events| {
            session.in_flight = None;
            if let Some(turn) = turn {
                append(session, events, Turn::Assistant(turn));
            }
            session.cancel = None;
            transition(session, events, AgentState::Idle);
        });
    }
}
