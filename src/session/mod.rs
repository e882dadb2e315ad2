//! Per-connection session orchestration
//!
//! One [`ConnectionSession`] per WebSocket connection, with no shared mutable
//! state across sessions. The session owns the connection-level state
//! machine (`Authenticating → Listening → Closed`) and composes the ingest
//! bridge, the transcript dispatcher, and the synthesis pipeline.
//!
//! The session runs as a single cooperative task selecting over inbound
//! client commands and recognizer events. Turn processing is spawned off so
//! audio ingestion never blocks on a reply in flight; the only state shared
//! with a turn is the single-flight flag and the counters.

mod bridge;
mod dispatcher;
mod pipeline;

pub use bridge::AudioIngestBridge;
pub use dispatcher::TranscriptDispatcher;
pub use pipeline::{AudioFrame, ResponseSynthesisPipeline, SynthesisSegment};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::llm::ReplyGenerator;
use crate::protocol::{ClientCommand, ServerEvent};
use crate::security::{Identity, SpeakerVerifier, TokenValidator};
use crate::voice::{SpeechRecognizer, SpeechSynthesizer, samples_to_bytes};
use crate::Result;

/// Connection-level lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the first (auth) message
    Authenticating,
    /// Accepting audio; turns may be processing concurrently
    Listening,
    /// Terminal; cleanup has run
    Closed,
}

/// Transcript event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptKind {
    /// Incremental result, subject to revision
    Partial,
    /// Confirmed result; starts a turn
    Final,
}

/// A recognition result marshalled onto the session timeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    pub kind: TranscriptKind,
    pub text: String,
    /// Arrival sequence number, strictly increasing per session
    pub seq: u64,
}

/// Monotonic per-session counters; never reset for the session lifetime
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub chunks_received: AtomicU64,
    pub bytes_pushed: AtomicU64,
    pub chunks_discarded: AtomicU64,
}

/// Engines and capabilities a session consumes
#[derive(Clone)]
pub struct SessionEngines {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub verifier: Option<Arc<dyn SpeakerVerifier>>,
}

/// Owns one connection's lifecycle from auth to cleanup
pub struct ConnectionSession {
    id: String,
    state: SessionState,
    validator: Arc<TokenValidator>,
    engines: SessionEngines,
    events: mpsc::Sender<ServerEvent>,
    counters: Arc<SessionCounters>,
}

impl ConnectionSession {
    #[must_use]
    pub fn new(
        validator: Arc<TokenValidator>,
        engines: SessionEngines,
        events: mpsc::Sender<ServerEvent>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state: SessionState::Authenticating,
            validator,
            engines,
            events,
            counters: Arc::new(SessionCounters::default()),
        }
    }

    /// Opaque session identity
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn counters(&self) -> &SessionCounters {
        &self.counters
    }

    /// Drive the session until the connection closes or fails
    ///
    /// Consumes inbound commands and emits [`ServerEvent`]s. Terminal
    /// failures send a single `error` event before cleanup; cleanup runs
    /// exactly once on every exit path.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<ClientCommand>) {
        tracing::info!(session_id = %self.id, "session opened");

        let Some(identity) = self.authenticate(&mut commands).await else {
            self.state = SessionState::Closed;
            tracing::info!(session_id = %self.id, "session closed during authentication");
            return;
        };

        // recognizer callbacks arrive through this channel, possibly from
        // a task outside the session's own timeline
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let stream = match self.engines.recognizer.start(engine_tx).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(session_id = %self.id, error = %e, "recognizer failed to start");
                self.send_error(format!("Speech service failed: {e}")).await;
                self.state = SessionState::Closed;
                return;
            }
        };

        let mut bridge = AudioIngestBridge::new(stream, engine_rx, Arc::clone(&self.counters));

        if self.events.send(ServerEvent::Ready).await.is_err() {
            bridge.stop();
            self.state = SessionState::Closed;
            return;
        }
        self.state = SessionState::Listening;
        tracing::info!(session_id = %self.id, user_id = %identity.user_id, "session listening");

        let dispatcher = TranscriptDispatcher::new(
            self.id.clone(),
            identity,
            Arc::clone(&self.engines.generator),
            Arc::clone(&self.engines.synthesizer),
            self.engines.verifier.clone(),
            self.events.clone(),
        );

        loop {
            enum Step {
                Command(Option<ClientCommand>),
                Engine(Option<Result<TranscriptEvent>>),
            }

            let step = tokio::select! {
                cmd = commands.recv() => Step::Command(cmd),
                event = bridge.next_event() => Step::Engine(event),
            };

            match step {
                Step::Command(None) => {
                    tracing::info!(session_id = %self.id, "transport closed");
                    break;
                }
                Step::Command(Some(ClientCommand::Audio { data })) => {
                    let pcm = samples_to_bytes(&data);
                    if let Err(e) = bridge.push_audio(&pcm) {
                        tracing::error!(session_id = %self.id, error = %e, "audio forwarding failed");
                        self.send_error(format!("Speech service failed: {e}")).await;
                        break;
                    }
                }
                Step::Command(Some(ClientCommand::Stop)) => {
                    tracing::info!(session_id = %self.id, "stop requested by client");
                    break;
                }
                Step::Command(Some(ClientCommand::Auth { .. })) => {
                    tracing::debug!(session_id = %self.id, "ignoring repeated auth message");
                }
                Step::Engine(Some(Ok(event))) => {
                    let audio = (event.kind == TranscriptKind::Final)
                        .then(|| bridge.take_recent_audio());
                    dispatcher.dispatch(event, audio).await;
                }
                Step::Engine(Some(Err(e))) => {
                    tracing::error!(session_id = %self.id, error = %e, "recognition engine fault");
                    self.send_error(format!("Speech service failed: {e}")).await;
                    break;
                }
                Step::Engine(None) => {
                    tracing::error!(session_id = %self.id, "recognition engine stopped unexpectedly");
                    self.send_error("Speech service stopped unexpectedly".to_string())
                        .await;
                    break;
                }
            }
        }

        // terminal cleanup: every loop exit passes through here exactly once.
        // An in-flight turn keeps its clone of the event sender and drains
        // to completion; no new turn can start.
        bridge.stop();
        self.state = SessionState::Closed;
        tracing::info!(
            session_id = %self.id,
            chunks = self.counters.chunks_received.load(Ordering::Relaxed),
            bytes = self.counters.bytes_pushed.load(Ordering::Relaxed),
            discarded = self.counters.chunks_discarded.load(Ordering::Relaxed),
            "session closed"
        );
    }

    /// Consume the first inbound message and validate its token
    async fn authenticate(
        &mut self,
        commands: &mut mpsc::Receiver<ClientCommand>,
    ) -> Option<Identity> {
        let first = commands.recv().await?;

        let ClientCommand::Auth { token } = first else {
            tracing::warn!(session_id = %self.id, "first message was not auth");
            self.send_error("Authentication required".to_string()).await;
            return None;
        };

        match self.validator.validate(&token) {
            Ok(identity) => {
                tracing::info!(session_id = %self.id, user_id = %identity.user_id, "authenticated");
                Some(identity)
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "authentication failed");
                self.send_error("Authentication failed".to_string()).await;
                None
            }
        }
    }

    async fn send_error(&self, message: String) {
        let _ = self.events.send(ServerEvent::Error { message }).await;
    }
}
