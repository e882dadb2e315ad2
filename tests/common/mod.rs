//! Shared test fakes
//!
//! Scripted engines for driving sessions without audio hardware or network
//! services: the recognizer is fired by hand through a handle, generation
//! replays a fixed token stream, synthesis echoes segment text as bytes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use tokio::sync::{Notify, mpsc};

use cadence_relay::llm::{Intent, ReplyGenerator, TokenStream, TurnContext};
use cadence_relay::protocol::ServerEvent;
use cadence_relay::voice::{
    RecognitionStream, RecognizerEvent, SpeechRecognizer, SpeechSynthesizer,
};
use cadence_relay::{Error, Result};

/// Test-side handle into a [`ScriptedRecognizer`]
#[derive(Default)]
pub struct RecognizerHandle {
    events: Mutex<Option<mpsc::UnboundedSender<RecognizerEvent>>>,
    pub bytes_pushed: AtomicUsize,
    pub stops: AtomicUsize,
}

impl RecognizerHandle {
    fn send(&self, event: RecognizerEvent) {
        let guard = self.events.lock().unwrap();
        let sender = guard.as_ref().expect("recognizer not started");
        let _ = sender.send(event);
    }

    pub fn fire_partial(&self, text: &str) {
        self.send(RecognizerEvent::Partial(text.to_string()));
    }

    pub fn fire_final(&self, text: &str) {
        self.send(RecognizerEvent::Final(text.to_string()));
    }

    pub fn fire_fault(&self, message: &str) {
        self.send(RecognizerEvent::Fault(message.to_string()));
    }
}

/// Recognizer whose callbacks are fired by the test through its handle
pub struct ScriptedRecognizer {
    pub handle: Arc<RecognizerHandle>,
}

impl ScriptedRecognizer {
    pub fn new() -> (Self, Arc<RecognizerHandle>) {
        let handle = Arc::new(RecognizerHandle::default());
        (
            Self {
                handle: Arc::clone(&handle),
            },
            handle,
        )
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    async fn start(
        &self,
        events: mpsc::UnboundedSender<RecognizerEvent>,
    ) -> Result<Box<dyn RecognitionStream>> {
        *self.handle.events.lock().unwrap() = Some(events);
        Ok(Box::new(ScriptedStream {
            handle: Arc::clone(&self.handle),
        }))
    }
}

struct ScriptedStream {
    handle: Arc<RecognizerHandle>,
}

impl RecognitionStream for ScriptedStream {
    fn push_audio(&self, pcm: &[u8]) -> Result<()> {
        self.handle.bytes_pushed.fetch_add(pcm.len(), Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.handle.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Recognizer that cannot be constructed (engine start failure path)
pub struct BrokenRecognizer;

#[async_trait]
impl SpeechRecognizer for BrokenRecognizer {
    async fn start(
        &self,
        _events: mpsc::UnboundedSender<RecognizerEvent>,
    ) -> Result<Box<dyn RecognitionStream>> {
        Err(Error::Stt("no such audio device".to_string()))
    }
}

/// Generator replaying a fixed token stream for every turn
pub struct ScriptedGenerator {
    pub tokens: Vec<String>,
    /// Fail before producing any token
    pub fail_at_start: bool,
    /// When set, the stream waits for a permit before yielding tokens
    pub gate: Option<Arc<Notify>>,
    pub calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn speaking(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(ToString::to_string).collect(),
            fail_at_start: false,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            tokens: Vec::new(),
            fail_at_start: true,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn gated(tokens: &[&str], gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::speaking(tokens)
        }
    }
}

#[async_trait]
impl ReplyGenerator for ScriptedGenerator {
    async fn stream_reply(
        &self,
        _transcript: &str,
        _context: &TurnContext,
    ) -> Result<TokenStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_at_start {
            return Err(Error::Generation("model unavailable".to_string()));
        }

        let tokens = self.tokens.clone();
        let gate = self.gate.clone();
        let stream = stream::once(async move {
            if let Some(gate) = gate {
                gate.notified().await;
            }
            stream::iter(tokens.into_iter().map(Ok))
        })
        .flatten();

        Ok(stream.boxed())
    }

    async fn extract_intent(&self, _transcript: &str) -> Result<Intent> {
        Ok(Intent {
            intent: "test".to_string(),
            entities: Vec::new(),
            confidence: 0.9,
        })
    }
}

/// Synthesizer echoing segment text back as audio bytes
#[derive(Default)]
pub struct EchoSynthesizer {
    pub segments: Mutex<Vec<String>>,
    pub fail_on: Option<String>,
}

#[async_trait]
impl SpeechSynthesizer for EchoSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.segments.lock().unwrap().push(text.to_string());
        if self.fail_on.as_deref() == Some(text) {
            return Err(Error::Tts("voice service down".to_string()));
        }
        Ok(text.as_bytes().to_vec())
    }
}

/// Receive the next server event or panic after a deadline
pub async fn recv_event(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for server event")
        .expect("event channel closed")
}

/// Assert the event channel closes (session over, turns drained)
pub async fn expect_closed(rx: &mut mpsc::Receiver<ServerEvent>) {
    let next = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for channel close");
    assert!(next.is_none(), "expected closed channel, got {next:?}");
}
