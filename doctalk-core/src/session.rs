//! Streaming question-answering session.
//!
//! This module drives one chat turn at a time against the answer
//! service: it opens the turn exchange, decodes the event stream
//! incrementally, accumulates answer text / citations / usage for
//! observers, and exposes cancellation.

use crate::config::ServiceConfig;
use crate::model::{ChatTurnRequest, Citation, StreamEvent, TurnOptions, TurnUsage};
use futures::StreamExt;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Failures surfaced to the caller of [`TurnSession::send`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("A turn is already in flight on this session")]
    AlreadyInFlight,

    #[error("Rate limited by the answer service: {0}")]
    RateLimited(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Stream protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Turn failed: {0}")]
    Unknown(String),
}

impl SessionError {
    /// Map a non-success HTTP status on the turn exchange to an error
    /// kind.
    fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let detail = if body.trim().is_empty() {
            status.to_string()
        } else {
            body.trim().to_string()
        };
        match status.as_u16() {
            401 => SessionError::Unauthorized(detail),
            403 => SessionError::Forbidden(detail),
            429 => SessionError::RateLimited(detail),
            _ => SessionError::Unknown(format!("unexpected status {status}: {detail}")),
        }
    }

    /// Classify a transport failure from the HTTP client.
    fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_decode() {
            SessionError::Unknown(err.to_string())
        } else {
            SessionError::NetworkUnavailable(err.to_string())
        }
    }

    /// Classify the message carried by a terminal `error` event.
    ///
    /// The service does not send a machine-readable kind, so this
    /// categorizes by message content.
    fn classify_service_message(message: &str) -> Self {
        let lowered = message.to_lowercase();
        if lowered.contains("rate limit")
            || lowered.contains("quota")
            || lowered.contains("too many requests")
        {
            return SessionError::RateLimited(message.to_string());
        }
        if lowered.contains("forbidden") || lowered.contains("permission") {
            return SessionError::Forbidden(message.to_string());
        }
        if lowered.contains("unauthorized") || lowered.contains("auth") {
            return SessionError::Unauthorized(message.to_string());
        }
        SessionError::Unknown(message.to_string())
    }
}

/// Lifecycle of a turn.
///
/// `Done`, `Errored`, and `Cancelled` are transient: the session
/// passes through them and settles back on `Idle`, so observers only
/// ever poll `Idle`, `Sending`, or `Streaming`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnPhase {
    #[default]
    Idle,
    Sending,
    Streaming,
    Done,
    Errored,
    Cancelled,
}

/// Line decoder for the `data: `-prefixed event stream.
///
/// The transport may split a frame anywhere, including inside a
/// multi-byte UTF-8 character, so the carry buffer holds raw bytes and
/// only complete newline-terminated lines are converted to text. A
/// fresh buffer is created for every turn.
#[derive(Debug, Default)]
pub struct EventLineBuffer {
    buffer: Vec<u8>,
}

impl EventLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of bytes, returning the payload of every
    /// complete `data: ` line it finishes. Lines without the prefix
    /// are ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line[..newline]);
            if let Some(payload) = Self::data_payload(&line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Drain any unterminated final line at end of stream.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest);
        Self::data_payload(&line)
    }

    fn data_payload(line: &str) -> Option<String> {
        let payload = line.trim_end_matches('\r').trim().strip_prefix("data: ")?;
        if payload.trim().is_empty() {
            return None;
        }
        Some(payload.to_string())
    }
}

/// Mutable state for the turn currently owned by a session.
#[derive(Debug, Default)]
struct TurnState {
    /// Monotonic turn counter; guards late event application after a
    /// cancel or a subsequent turn
    turn: u64,
    phase: TurnPhase,
    answer: String,
    citations: Vec<Citation>,
    usage: Option<TurnUsage>,
    conversation_id: Option<String>,
    cancel: Option<watch::Sender<bool>>,
}

impl TurnState {
    /// Pass through `terminal` and settle back on `Idle`, releasing
    /// the cancellation handle.
    fn settle(&mut self, terminal: TurnPhase) {
        debug!(?terminal, "turn settled");
        self.cancel = None;
        self.phase = TurnPhase::Idle;
    }
}

/// Terminal outcome of a turn's event stream.
enum TurnOutcome {
    Completed(Option<String>),
    Failed(SessionError),
}

/// Client controller for streaming chat turns.
///
/// A session drives at most one turn at a time; a second
/// [`send`](Self::send) while one is in flight fails with
/// [`SessionError::AlreadyInFlight`] without touching the in-flight
/// turn. Accumulated answer text, citations, and usage counters are
/// readable while the stream is being consumed.
pub struct TurnSession {
    client: reqwest::Client,
    endpoint: String,
    organization_id: String,
    state: Mutex<TurnState>,
}

impl TurnSession {
    /// Create a session for one organization against the configured
    /// service endpoint.
    pub fn new(
        config: &ServiceConfig,
        organization_id: impl Into<String>,
    ) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| SessionError::Unknown(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, config.turn_url(), organization_id))
    }

    /// Create a session with a caller-supplied HTTP client and
    /// endpoint URL.
    pub fn with_client(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        organization_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            organization_id: organization_id.into(),
            state: Mutex::new(TurnState::default()),
        }
    }

    /// Submit one chat turn and drive its stream to a terminal event.
    ///
    /// Resolves with the new-or-existing conversation id on success,
    /// or `Ok(None)` when the caller cancelled the turn via
    /// [`stop`](Self::stop) (cancellation is not an error) or the
    /// service reported no conversation id.
    #[instrument(skip(self, request), fields(organization = %request.organization_id))]
    pub async fn send(&self, request: ChatTurnRequest) -> Result<Option<String>, SessionError> {
        let (turn, mut cancel_rx) = self.begin_turn()?;
        info!(
            conversation = request.conversation_id.as_deref().unwrap_or("<new>"),
            "starting chat turn"
        );

        let exchange = self.client.post(&self.endpoint).json(&request).send();
        tokio::pin!(exchange);
        let response = tokio::select! {
            _ = cancel_rx.changed() => {
                debug!("turn cancelled while connecting");
                return Ok(None);
            }
            response = &mut exchange => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                self.finish_turn(turn, TurnPhase::Errored);
                return Err(SessionError::from_transport(&e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            self.finish_turn(turn, TurnPhase::Errored);
            return Err(SessionError::from_status(status, &body));
        }

        self.enter_streaming(turn);
        let mut decoder = EventLineBuffer::new();
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                _ = cancel_rx.changed() => {
                    debug!("turn cancelled mid-stream");
                    return Ok(None);
                }
                chunk = stream.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    for payload in decoder.feed(&bytes) {
                        if let Some(outcome) = self.handle_payload(turn, &payload) {
                            return self.finish_with(turn, outcome);
                        }
                    }
                }
                Some(Err(e)) => {
                    self.finish_turn(turn, TurnPhase::Errored);
                    return Err(SessionError::from_transport(&e));
                }
                None => {
                    // EOF. The terminal event may sit in an
                    // unterminated final line.
                    if let Some(payload) = decoder.flush() {
                        if let Some(outcome) = self.handle_payload(turn, &payload) {
                            return self.finish_with(turn, outcome);
                        }
                    }
                    self.finish_turn(turn, TurnPhase::Errored);
                    return Err(SessionError::ProtocolViolation(
                        "stream ended without a terminal event".to_string(),
                    ));
                }
            }
        }
    }

    /// Cancel the in-flight turn, if any.
    ///
    /// Safe to call at any time and idempotent. The state transition
    /// happens synchronously before `stop` returns: the session is
    /// back at `Idle`, the cancellation handle is consumed, and no
    /// further event will be applied to the cancelled turn. The
    /// pending [`send`](Self::send) resolves with `Ok(None)`.
    pub fn stop(&self) {
        let mut state = self.lock_state();
        match state.phase {
            TurnPhase::Sending | TurnPhase::Streaming => {
                if let Some(cancel) = state.cancel.take() {
                    let _ = cancel.send(true);
                }
                info!("chat turn cancelled");
                state.settle(TurnPhase::Cancelled);
            }
            _ => {}
        }
    }

    /// Resubmit a message on an existing conversation. Plain
    /// re-invocation of [`send`](Self::send); no retry special-casing.
    pub async fn regenerate(
        &self,
        last_message: impl Into<String>,
        options: TurnOptions,
        conversation_id: Option<String>,
    ) -> Result<Option<String>, SessionError> {
        let mut request =
            ChatTurnRequest::new(self.organization_id.clone(), last_message).with_options(options);
        request.conversation_id = conversation_id;
        self.send(request).await
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> TurnPhase {
        self.lock_state().phase
    }

    /// Answer text accumulated so far for the current or most recent
    /// turn.
    pub fn answer_text(&self) -> String {
        self.lock_state().answer.clone()
    }

    /// Citation list most recently delivered by the service.
    pub fn citations(&self) -> Vec<Citation> {
        self.lock_state().citations.clone()
    }

    /// Usage counters most recently delivered by the service.
    pub fn usage(&self) -> Option<TurnUsage> {
        self.lock_state().usage.clone()
    }

    /// Conversation id delivered by the terminal `done` event, if any.
    pub fn conversation_id(&self) -> Option<String> {
        self.lock_state().conversation_id.clone()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, TurnState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the session for a new turn and reset accumulated state.
    fn begin_turn(&self) -> Result<(u64, watch::Receiver<bool>), SessionError> {
        let mut state = self.lock_state();
        if state.phase != TurnPhase::Idle {
            return Err(SessionError::AlreadyInFlight);
        }
        state.turn += 1;
        state.phase = TurnPhase::Sending;
        state.answer.clear();
        state.citations.clear();
        state.usage = None;
        state.conversation_id = None;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        state.cancel = Some(cancel_tx);
        Ok((state.turn, cancel_rx))
    }

    fn enter_streaming(&self, turn: u64) {
        let mut state = self.lock_state();
        if state.turn == turn && state.phase == TurnPhase::Sending {
            state.phase = TurnPhase::Streaming;
        }
    }

    /// Settle the turn through `terminal` back to `Idle`. No-op if the
    /// turn was already cancelled or superseded.
    fn finish_turn(&self, turn: u64, terminal: TurnPhase) {
        let mut state = self.lock_state();
        if state.turn != turn {
            return;
        }
        if matches!(state.phase, TurnPhase::Sending | TurnPhase::Streaming) {
            state.settle(terminal);
        }
    }

    fn finish_with(
        &self,
        turn: u64,
        outcome: TurnOutcome,
    ) -> Result<Option<String>, SessionError> {
        match outcome {
            TurnOutcome::Completed(conversation_id) => {
                info!("chat turn complete");
                self.finish_turn(turn, TurnPhase::Done);
                Ok(conversation_id)
            }
            TurnOutcome::Failed(error) => {
                self.finish_turn(turn, TurnPhase::Errored);
                Err(error)
            }
        }
    }

    /// Parse one `data: ` payload and apply it. Returns the terminal
    /// outcome once the turn is over; malformed payloads are logged
    /// and skipped so one corrupt frame cannot abort the turn.
    fn handle_payload(&self, turn: u64, payload: &str) -> Option<TurnOutcome> {
        let event: StreamEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "skipping malformed stream line");
                return None;
            }
        };

        match event {
            StreamEvent::Token { text } => {
                self.apply(turn, |state| state.answer.push_str(&text));
                None
            }
            StreamEvent::Citations { items } => {
                debug!(count = items.len(), "citations replaced");
                self.apply(turn, |state| state.citations = items);
                None
            }
            StreamEvent::Usage {
                tokens_in,
                tokens_out,
                model,
            } => {
                self.apply(turn, |state| {
                    state.usage = Some(TurnUsage {
                        tokens_in,
                        tokens_out,
                        model,
                    })
                });
                None
            }
            StreamEvent::Done { conversation_id } => {
                self.apply(turn, |state| {
                    state.conversation_id = conversation_id.clone()
                });
                Some(TurnOutcome::Completed(conversation_id))
            }
            StreamEvent::Error { message } => Some(TurnOutcome::Failed(
                SessionError::classify_service_message(&message),
            )),
        }
    }

    /// Apply a mutation to the turn's accumulated state, unless the
    /// turn was cancelled or superseded in the meantime.
    fn apply(&self, turn: u64, mutate: impl FnOnce(&mut TurnState)) {
        let mut state = self.lock_state();
        if state.turn == turn
            && matches!(state.phase, TurnPhase::Sending | TurnPhase::Streaming)
        {
            mutate(&mut state);
        }
    }
}
