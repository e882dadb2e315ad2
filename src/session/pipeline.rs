//! Response synthesis pipeline
//!
//! Consumes the live token stream for one turn, segments it into
//! sentence-sized units, and synthesizes each unit in order. Each segment is
//! synthesized and its frame emitted before further tokens are consumed, so
//! a listener always hears sentence N fully before sentence N+1 begins.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;

use crate::llm::{ReplyGenerator, TurnContext};
use crate::protocol::ServerEvent;
use crate::voice::SpeechSynthesizer;
use crate::{Error, Result};

/// Characters that end a synthesizable sentence unit
const SENTENCE_MARKERS: &[char] = &['.', '!', '?', '\n'];

/// A sentence-sized span of generated text submitted to synthesis as one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisSegment {
    /// Per-turn ordinal; assigned only to segments that produce audio
    pub ordinal: u32,
    pub text: String,
}

/// One synthesized audio frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Ordinal of the originating segment; contiguous from 0 within a turn
    pub ordinal: u32,
    pub data: Vec<u8>,
}

/// Streams one turn's reply: generation → segmentation → synthesis → frames
pub struct ResponseSynthesisPipeline {
    generator: Arc<dyn ReplyGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    events: mpsc::Sender<ServerEvent>,
}

impl ResponseSynthesisPipeline {
    #[must_use]
    pub fn new(
        generator: Arc<dyn ReplyGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        events: mpsc::Sender<ServerEvent>,
    ) -> Self {
        Self {
            generator,
            synthesizer,
            events,
        }
    }

    /// Run the pipeline to completion; returns the number of frames emitted
    ///
    /// Synthesis failures skip the affected segment and continue. Generation
    /// failures (before or mid-stream) abort the remainder of the turn;
    /// frames already emitted stand.
    ///
    /// # Errors
    ///
    /// Returns error if generation fails or the outbound channel closes
    pub async fn run(&self, transcript: &str, context: &TurnContext) -> Result<u32> {
        let mut stream = self.generator.stream_reply(transcript, context).await?;

        let mut buffer = String::new();
        let mut next_ordinal = 0u32;

        while let Some(token) = stream.next().await {
            buffer.push_str(&token?);

            if buffer.contains(SENTENCE_MARKERS) {
                next_ordinal = self.flush_segment(&mut buffer, next_ordinal).await?;
            }
        }

        // stream ended with buffered content
        next_ordinal = self.flush_segment(&mut buffer, next_ordinal).await?;

        Ok(next_ordinal)
    }

    /// Synthesize the buffered segment and emit its frame
    ///
    /// Empty buffers produce no segment; failed or silent synthesis skips
    /// the segment without consuming an ordinal. Returns the next ordinal.
    async fn flush_segment(&self, buffer: &mut String, ordinal: u32) -> Result<u32> {
        let text = buffer.trim().to_string();
        buffer.clear();

        if text.is_empty() {
            return Ok(ordinal);
        }

        let segment = SynthesisSegment { ordinal, text };
        tracing::debug!(ordinal = segment.ordinal, text = %segment.text, "synthesizing segment");

        let data = match self.synthesizer.synthesize(&segment.text).await {
            Ok(data) if data.is_empty() => {
                tracing::warn!(ordinal = segment.ordinal, "synthesis returned no audio, skipping segment");
                return Ok(ordinal);
            }
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(ordinal = segment.ordinal, error = %e, "synthesis failed, skipping segment");
                return Ok(ordinal);
            }
        };

        let frame = AudioFrame {
            ordinal: segment.ordinal,
            data,
        };
        self.events
            .send(ServerEvent::Audio { data: frame.data })
            .await
            .map_err(|_| Error::Session("outbound channel closed".to_string()))?;

        Ok(ordinal + 1)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures::stream;

    use super::*;
    use crate::llm::Intent;

    /// Generator fake replaying a scripted token stream
    struct ScriptedGenerator {
        tokens: Vec<Result<String>>,
        fail_at_start: bool,
    }

    #[async_trait]
    impl ReplyGenerator for ScriptedGenerator {
        async fn stream_reply(
            &self,
            _transcript: &str,
            _context: &TurnContext,
        ) -> Result<crate::llm::TokenStream> {
            if self.fail_at_start {
                return Err(Error::Generation("model unavailable".to_string()));
            }
            let tokens: Vec<Result<String>> = self
                .tokens
                .iter()
                .map(|t| match t {
                    Ok(s) => Ok(s.clone()),
                    Err(_) => Err(Error::Generation("stream broke".to_string())),
                })
                .collect();
            Ok(stream::iter(tokens).boxed())
        }

        async fn extract_intent(&self, _transcript: &str) -> Result<Intent> {
            Ok(Intent::unknown())
        }
    }

    /// Synthesizer fake recording the segments it receives
    struct RecordingSynthesizer {
        segments: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl SpeechSynthesizer for RecordingSynthesizer {
        async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
            self.segments.lock().unwrap().push(text.to_string());
            if self.fail_on.as_deref() == Some(text) {
                return Err(Error::Tts("voice service down".to_string()));
            }
            Ok(text.as_bytes().to_vec())
        }
    }

    fn pipeline(
        tokens: &[&str],
        fail_on: Option<&str>,
    ) -> (
        ResponseSynthesisPipeline,
        Arc<RecordingSynthesizer>,
        mpsc::Receiver<ServerEvent>,
    ) {
        let generator = Arc::new(ScriptedGenerator {
            tokens: tokens.iter().map(|t| Ok((*t).to_string())).collect(),
            fail_at_start: false,
        });
        let synthesizer = Arc::new(RecordingSynthesizer {
            segments: Mutex::new(Vec::new()),
            fail_on: fail_on.map(ToString::to_string),
        });
        let (tx, rx) = mpsc::channel(32);
        (
            ResponseSynthesisPipeline::new(generator, Arc::clone(&synthesizer) as Arc<dyn SpeechSynthesizer>, tx),
            synthesizer,
            rx,
        )
    }

    #[tokio::test]
    async fn segments_token_stream_at_sentence_boundaries() {
        let (pipeline, synthesizer, mut rx) =
            pipeline(&["Hel", "lo. ", "How are you", "?"], None);

        let frames = pipeline.run("hi", &TurnContext::new()).await.unwrap();
        assert_eq!(frames, 2);

        let segments = synthesizer.segments.lock().unwrap().clone();
        assert_eq!(segments, vec!["Hello.".to_string(), "How are you?".to_string()]);

        // frames arrive in segment order
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first, ServerEvent::Audio { data } if data == b"Hello."));
        assert!(matches!(second, ServerEvent::Audio { data } if data == b"How are you?"));
    }

    #[tokio::test]
    async fn trailing_text_without_marker_is_flushed_at_end() {
        let (pipeline, synthesizer, _rx) = pipeline(&["One. ", "and then some"], None);

        let frames = pipeline.run("hi", &TurnContext::new()).await.unwrap();
        assert_eq!(frames, 2);

        let segments = synthesizer.segments.lock().unwrap().clone();
        assert_eq!(segments, vec!["One.".to_string(), "and then some".to_string()]);
    }

    #[tokio::test]
    async fn whitespace_only_buffer_produces_no_segment() {
        let (pipeline, synthesizer, _rx) = pipeline(&["Done.", "  \n "], None);

        let frames = pipeline.run("hi", &TurnContext::new()).await.unwrap();
        assert_eq!(frames, 1);
        assert_eq!(synthesizer.segments.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_segment_is_skipped_and_ordinals_stay_contiguous() {
        let (pipeline, synthesizer, mut rx) =
            pipeline(&["A.", "B.", "C."], Some("B."));

        let frames = pipeline.run("hi", &TurnContext::new()).await.unwrap();
        // B failed: two frames, ordinals 0 and 1 with no gap
        assert_eq!(frames, 2);

        let segments = synthesizer.segments.lock().unwrap().clone();
        assert_eq!(segments, vec!["A.".to_string(), "B.".to_string(), "C.".to_string()]);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first, ServerEvent::Audio { data } if data == b"A."));
        assert!(matches!(second, ServerEvent::Audio { data } if data == b"C."));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn generation_failure_before_tokens_emits_nothing() {
        let generator = Arc::new(ScriptedGenerator {
            tokens: Vec::new(),
            fail_at_start: true,
        });
        let synthesizer = Arc::new(RecordingSynthesizer {
            segments: Mutex::new(Vec::new()),
            fail_on: None,
        });
        let (tx, mut rx) = mpsc::channel(32);
        let pipeline =
            ResponseSynthesisPipeline::new(generator, Arc::clone(&synthesizer) as Arc<dyn SpeechSynthesizer>, tx);

        let err = pipeline.run("hi", &TurnContext::new()).await.unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
        assert!(rx.try_recv().is_err());
        assert!(synthesizer.segments.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn midstream_failure_keeps_emitted_frames() {
        let generator = Arc::new(ScriptedGenerator {
            tokens: vec![Ok("First.".to_string()), Err(Error::Generation(String::new()))],
            fail_at_start: false,
        });
        let synthesizer = Arc::new(RecordingSynthesizer {
            segments: Mutex::new(Vec::new()),
            fail_on: None,
        });
        let (tx, mut rx) = mpsc::channel(32);
        let pipeline =
            ResponseSynthesisPipeline::new(generator, Arc::clone(&synthesizer) as Arc<dyn SpeechSynthesizer>, tx);

        let err = pipeline.run("hi", &TurnContext::new()).await.unwrap_err();
        assert!(matches!(err, Error::Generation(_)));

        // the segment completed before the failure was still spoken
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerEvent::Audio { data } if data == b"First."
        ));
    }
}
