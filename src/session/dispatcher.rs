//! Transcript dispatcher
//!
//! Decides what a transcript event triggers. Partials are forwarded to the
//! client as UI feedback and nothing else. Finals start a conversational
//! turn behind a single-flight guard: a final arriving while a turn is
//! active is dropped, never queued, so one turn's audio frames are never
//! interleaved with another's.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use super::pipeline::ResponseSynthesisPipeline;
use super::{TranscriptEvent, TranscriptKind};
use crate::llm::{Intent, ReplyGenerator, TurnContext};
use crate::protocol::ServerEvent;
use crate::security::{Identity, SpeakerVerifier};
use crate::voice::SpeechSynthesizer;

/// Resets the single-flight flag when the turn task exits, on every path
struct TurnGuard(Arc<AtomicBool>);

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Routes transcript events into turns
pub struct TranscriptDispatcher {
    session_id: String,
    identity: Identity,
    generator: Arc<dyn ReplyGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    verifier: Option<Arc<dyn SpeakerVerifier>>,
    events: mpsc::Sender<ServerEvent>,
    turn_in_progress: Arc<AtomicBool>,
}

impl TranscriptDispatcher {
    #[must_use]
    pub fn new(
        session_id: String,
        identity: Identity,
        generator: Arc<dyn ReplyGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        verifier: Option<Arc<dyn SpeakerVerifier>>,
        events: mpsc::Sender<ServerEvent>,
    ) -> Self {
        Self {
            session_id,
            identity,
            generator,
            synthesizer,
            verifier,
            events,
            turn_in_progress: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a turn is currently in flight
    #[must_use]
    pub fn turn_in_progress(&self) -> bool {
        self.turn_in_progress.load(Ordering::SeqCst)
    }

    /// Handle one transcript event
    ///
    /// `utterance_audio` is the recent audio backing a final event, consumed
    /// by the speaker-verification capability when one is configured.
    pub async fn dispatch(&self, event: TranscriptEvent, utterance_audio: Option<Vec<u8>>) {
        match event.kind {
            TranscriptKind::Partial => {
                // best-effort UI feedback; never blocks further processing
                let _ = self
                    .events
                    .send(ServerEvent::PartialTranscript { text: event.text })
                    .await;
            }
            TranscriptKind::Final => self.begin_turn(event, utterance_audio),
        }
    }

    /// Start a turn for a final transcript, unless one is already in flight
    fn begin_turn(&self, event: TranscriptEvent, utterance_audio: Option<Vec<u8>>) {
        if self
            .turn_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::info!(
                session_id = %self.session_id,
                seq = event.seq,
                text = %event.text,
                "turn in flight, dropping final transcript"
            );
            return;
        }

        let guard = TurnGuard(Arc::clone(&self.turn_in_progress));
        let session_id = self.session_id.clone();
        let identity = self.identity.clone();
        let generator = Arc::clone(&self.generator);
        let synthesizer = Arc::clone(&self.synthesizer);
        let verifier = self.verifier.clone();
        let events = self.events.clone();

        // the turn runs concurrently with continued audio ingestion
        tokio::spawn(async move {
            let _guard = guard;
            run_turn(
                &session_id,
                &identity,
                generator,
                synthesizer,
                verifier,
                events,
                event.text,
                utterance_audio,
            )
            .await;
        });
    }
}

/// One complete turn: final transcript → context → generation → synthesis
#[allow(clippy::too_many_arguments)]
async fn run_turn(
    session_id: &str,
    identity: &Identity,
    generator: Arc<dyn ReplyGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    verifier: Option<Arc<dyn SpeakerVerifier>>,
    events: mpsc::Sender<ServerEvent>,
    transcript: String,
    utterance_audio: Option<Vec<u8>>,
) {
    if events
        .send(ServerEvent::FinalTranscript {
            text: transcript.clone(),
        })
        .await
        .is_err()
    {
        // connection is gone; nothing left to do
        return;
    }

    let intent = match generator.extract_intent(&transcript).await {
        Ok(intent) => intent,
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "intent extraction failed, using fallback");
            Intent::unknown()
        }
    };

    let mut context = TurnContext::new();
    context.insert("user_id", identity.user_id.clone());
    if let Some(name) = &identity.display_name {
        context.insert("user_name", name.clone());
    }
    context.merge_intent(&intent);

    if let (Some(verifier), Some(audio)) = (&verifier, &utterance_audio) {
        match verifier.verify(audio, &identity.user_id).await {
            Ok(score) => context.insert("speaker_confidence", f64::from(score)),
            Err(e) => {
                // advisory signal only; its absence never blocks the turn
                tracing::warn!(session_id = %session_id, error = %e, "speaker verification failed");
            }
        }
    }

    let pipeline = ResponseSynthesisPipeline::new(generator, synthesizer, events);
    match pipeline.run(&transcript, &context).await {
        Ok(frames) => {
            tracing::info!(session_id = %session_id, frames, "turn complete");
        }
        Err(e) => {
            // recoverable at turn granularity: no reply, session keeps listening
            tracing::warn!(session_id = %session_id, error = %e, "turn aborted");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::StreamExt;
    use futures::stream;

    use super::*;
    use crate::Result;
    use crate::llm::TokenStream;

    /// Generator whose reply stream waits until released, to hold a turn open
    struct GatedGenerator {
        release: Arc<tokio::sync::Notify>,
        calls: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl ReplyGenerator for GatedGenerator {
        async fn stream_reply(
            &self,
            _transcript: &str,
            _context: &TurnContext,
        ) -> Result<TokenStream> {
            *self.calls.lock().unwrap() += 1;
            let release = Arc::clone(&self.release);
            let stream = stream::once(async move {
                release.notified().await;
                Ok("Done.".to_string())
            });
            Ok(stream.boxed())
        }

        async fn extract_intent(&self, _transcript: &str) -> Result<Intent> {
            Ok(Intent::unknown())
        }
    }

    struct SilentSynthesizer;

    #[async_trait]
    impl SpeechSynthesizer for SilentSynthesizer {
        async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
            Ok(text.as_bytes().to_vec())
        }
    }

    fn final_event(text: &str, seq: u64) -> TranscriptEvent {
        TranscriptEvent {
            kind: TranscriptKind::Final,
            text: text.to_string(),
            seq,
        }
    }

    fn dispatcher(
        generator: Arc<dyn ReplyGenerator>,
    ) -> (TranscriptDispatcher, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(32);
        let dispatcher = TranscriptDispatcher::new(
            "session-test".to_string(),
            Identity {
                user_id: "user-1".to_string(),
                display_name: None,
            },
            generator,
            Arc::new(SilentSynthesizer),
            None,
            tx,
        );
        (dispatcher, rx)
    }

    #[tokio::test]
    async fn partial_is_forwarded_without_starting_a_turn() {
        let generator = Arc::new(GatedGenerator {
            release: Arc::new(tokio::sync::Notify::new()),
            calls: Arc::new(Mutex::new(0)),
        });
        let (dispatcher, mut rx) = dispatcher(Arc::clone(&generator) as Arc<dyn ReplyGenerator>);

        dispatcher
            .dispatch(
                TranscriptEvent {
                    kind: TranscriptKind::Partial,
                    text: "turn on".to_string(),
                    seq: 0,
                },
                None,
            )
            .await;

        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerEvent::PartialTranscript { text } if text == "turn on"
        ));
        assert!(!dispatcher.turn_in_progress());
        assert_eq!(*generator.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn overlapping_final_is_dropped() {
        let release = Arc::new(tokio::sync::Notify::new());
        let calls = Arc::new(Mutex::new(0));
        let generator = Arc::new(GatedGenerator {
            release: Arc::clone(&release),
            calls: Arc::clone(&calls),
        });
        let (dispatcher, mut rx) = dispatcher(generator as Arc<dyn ReplyGenerator>);

        dispatcher.dispatch(final_event("first", 0), None).await;

        // first turn is now blocked inside generation
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerEvent::FinalTranscript { text } if text == "first"
        ));
        assert!(dispatcher.turn_in_progress());

        // second final while the turn is active: dropped, no transcript, no frames
        dispatcher.dispatch(final_event("second", 1), None).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(*calls.lock().unwrap(), 1);

        // release the first turn and let it finish
        release.notify_one();
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerEvent::Audio { data } if data == b"Done."
        ));

        // guard reset: a new final starts a new turn
        tokio::time::timeout(Duration::from_secs(1), async {
            while dispatcher.turn_in_progress() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("turn flag should reset");

        dispatcher.dispatch(final_event("third", 2), None).await;
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerEvent::FinalTranscript { text } if text == "third"
        ));
    }

    #[tokio::test]
    async fn speaker_confidence_lands_in_turn_context() {
        /// Records the turn context it was asked to reply with
        struct ContextProbe {
            seen: Arc<Mutex<Option<String>>>,
        }

        #[async_trait]
        impl ReplyGenerator for ContextProbe {
            async fn stream_reply(
                &self,
                _transcript: &str,
                context: &TurnContext,
            ) -> Result<TokenStream> {
                *self.seen.lock().unwrap() = Some(context.to_json());
                Ok(stream::empty::<Result<String>>().boxed())
            }

            async fn extract_intent(&self, _transcript: &str) -> Result<Intent> {
                Ok(Intent::unknown())
            }
        }

        let seen = Arc::new(Mutex::new(None));
        let (tx, mut rx) = mpsc::channel(32);
        let dispatcher = TranscriptDispatcher::new(
            "session-test".to_string(),
            Identity {
                user_id: "user-1".to_string(),
                display_name: Some("Ada".to_string()),
            },
            Arc::new(ContextProbe {
                seen: Arc::clone(&seen),
            }),
            Arc::new(SilentSynthesizer),
            Some(Arc::new(crate::security::FixedConfidenceVerifier::default())),
            tx,
        );

        dispatcher
            .dispatch(final_event("hello", 0), Some(vec![0u8; 640]))
            .await;

        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerEvent::FinalTranscript { .. }
        ));

        tokio::time::timeout(Duration::from_secs(1), async {
            while dispatcher.turn_in_progress() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("turn should finish");

        let json = seen.lock().unwrap().clone().expect("context should be recorded");
        assert!(json.contains("speaker_confidence"));
        assert!(json.contains("user-1"));
        assert!(json.contains("Ada"));
    }

    #[tokio::test]
    async fn flag_resets_when_generation_fails() {
        struct FailingGenerator;

        #[async_trait]
        impl ReplyGenerator for FailingGenerator {
            async fn stream_reply(
                &self,
                _transcript: &str,
                _context: &TurnContext,
            ) -> Result<TokenStream> {
                Err(crate::Error::Generation("no capacity".to_string()))
            }

            async fn extract_intent(&self, _transcript: &str) -> Result<Intent> {
                Err(crate::Error::Generation("no capacity".to_string()))
            }
        }

        let (dispatcher, mut rx) = dispatcher(Arc::new(FailingGenerator));

        dispatcher.dispatch(final_event("hello", 0), None).await;

        // final transcript still goes out, then the turn aborts silently
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerEvent::FinalTranscript { .. }
        ));

        tokio::time::timeout(Duration::from_secs(1), async {
            while dispatcher.turn_in_progress() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("turn flag should reset after failure");

        // no error frame reached the transport
        assert!(rx.try_recv().is_err());
    }
}
