//! Speech-to-text (STT) processing
//!
//! The session core consumes recognition through [`SpeechRecognizer`] /
//! [`RecognitionStream`]: audio is pushed in, transcript events come back on
//! a channel, delivered from whatever task or thread the engine runs on.
//!
//! The production adapter segments the inbound stream into utterances with
//! energy-based endpointing, then batch-transcribes each utterance via
//! OpenAI Whisper or Deepgram. Batch providers yield no interim hypotheses,
//! so these adapters emit only `Final` events.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::pcm::{SAMPLE_RATE, bytes_to_samples, pcm_to_wav, rms};
use crate::{Error, Result};

/// Minimum normalized RMS to consider a chunk speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum utterance length to transcribe (samples at 16 kHz; 0.3 s)
const MIN_SPEECH_SAMPLES: usize = 4800;

/// Trailing silence that ends an utterance (samples; 0.5 s)
const SILENCE_SAMPLES: usize = 8000;

/// Events delivered by a running recognizer
///
/// May be produced from a context outside the session's own execution
/// timeline; the ingest bridge marshals them back in order.
#[derive(Debug, Clone)]
pub enum RecognizerEvent {
    /// Interim hypothesis, subject to revision
    Partial(String),
    /// Confirmed recognition result
    Final(String),
    /// Unrecoverable engine failure; the session must close
    Fault(String),
}

/// A recognition engine that can open per-session streams
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Start a recognition stream. Events are delivered through `events`
    /// in engine order until the stream is stopped or faults.
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot be constructed or started
    async fn start(
        &self,
        events: mpsc::UnboundedSender<RecognizerEvent>,
    ) -> Result<Box<dyn RecognitionStream>>;
}

/// A running per-session recognition stream
pub trait RecognitionStream: Send + Sync {
    /// Push raw 16 kHz 16-bit mono LE PCM into the engine
    ///
    /// # Errors
    ///
    /// Returns error if the engine input stream is closed
    fn push_audio(&self, pcm: &[u8]) -> Result<()>;

    /// Close the engine input stream. Idempotent; safe to call concurrently
    /// with a callback firing.
    fn stop(&self);
}

/// STT provider backend
#[derive(Clone, Copy, Debug)]
enum SttProvider {
    Whisper,
    Deepgram,
}

/// Batch-transcription recognizer over HTTP
pub struct HttpRecognizer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    provider: SttProvider,
}

impl HttpRecognizer {
    /// Create a recognizer backed by `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider: SttProvider::Whisper,
        })
    }

    /// Create a recognizer backed by Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("Deepgram API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider: SttProvider::Deepgram,
        })
    }

    /// Transcribe one WAV-wrapped utterance
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String> {
        match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(wav).await,
            SttProvider::Deepgram => self.transcribe_deepgram(wav).await,
        }
    }

    async fn transcribe_whisper(&self, wav: Vec<u8>) -> Result<String> {
        #[derive(serde::Deserialize)]
        struct WhisperResponse {
            text: String,
        }

        tracing::debug!(audio_bytes = wav.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Stt(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response
            .json()
            .await
            .map_err(|e| Error::Stt(e.to_string()))?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }

    async fn transcribe_deepgram(&self, wav: Vec<u8>) -> Result<String> {
        #[derive(serde::Deserialize)]
        struct DeepgramResponse {
            results: DeepgramResults,
        }

        #[derive(serde::Deserialize)]
        struct DeepgramResults {
            channels: Vec<DeepgramChannel>,
        }

        #[derive(serde::Deserialize)]
        struct DeepgramChannel {
            alternatives: Vec<DeepgramAlternative>,
        }

        #[derive(serde::Deserialize)]
        struct DeepgramAlternative {
            transcript: String,
        }

        tracing::debug!(audio_bytes = wav.len(), "starting Deepgram transcription");

        let url = format!(
            "https://api.deepgram.com/v1/listen?model={}&punctuate=true",
            self.model
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(wav)
            .send()
            .await
            .map_err(|e| Error::Stt(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response
            .json()
            .await
            .map_err(|e| Error::Stt(e.to_string()))?;

        let transcript = result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default();

        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

/// Worker input
enum WorkerMsg {
    Pcm(Vec<u8>),
    Shutdown,
}

#[async_trait]
impl SpeechRecognizer for HttpRecognizer {
    async fn start(
        &self,
        events: mpsc::UnboundedSender<RecognizerEvent>,
    ) -> Result<Box<dyn RecognitionStream>> {
        let (input_tx, mut input_rx) = mpsc::unbounded_channel::<WorkerMsg>();

        let recognizer = Self {
            client: self.client.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            provider: self.provider,
        };

        tokio::spawn(async move {
            let mut segmenter = UtteranceSegmenter::new();

            loop {
                let msg = input_rx.recv().await;
                let utterance = match msg {
                    Some(WorkerMsg::Pcm(pcm)) => segmenter.push(&pcm),
                    Some(WorkerMsg::Shutdown) | None => {
                        // flush whatever is buffered, then exit
                        if let Some(pcm) = segmenter.flush() {
                            recognizer.emit_utterance(&events, pcm).await;
                        }
                        break;
                    }
                };

                if let Some(pcm) = utterance {
                    if !recognizer.emit_utterance(&events, pcm).await {
                        break;
                    }
                }
            }

            tracing::debug!("recognition worker exited");
        });

        Ok(Box::new(HttpRecognitionStream {
            input: input_tx,
            stopped: Arc::new(AtomicBool::new(false)),
        }))
    }
}

impl HttpRecognizer {
    /// Transcribe a completed utterance and deliver the resulting event.
    /// Returns false when the worker should stop (fault or receiver gone).
    async fn emit_utterance(
        &self,
        events: &mpsc::UnboundedSender<RecognizerEvent>,
        pcm: Vec<u8>,
    ) -> bool {
        let wav = match pcm_to_wav(&pcm, SAMPLE_RATE) {
            Ok(wav) => wav,
            Err(e) => {
                let _ = events.send(RecognizerEvent::Fault(e.to_string()));
                return false;
            }
        };

        match self.transcribe(wav).await {
            Ok(text) if text.trim().is_empty() => true,
            Ok(text) => events.send(RecognizerEvent::Final(text)).is_ok(),
            Err(e) => {
                let _ = events.send(RecognizerEvent::Fault(e.to_string()));
                false
            }
        }
    }
}

/// Handle for a running HTTP recognition stream
struct HttpRecognitionStream {
    input: mpsc::UnboundedSender<WorkerMsg>,
    stopped: Arc<AtomicBool>,
}

impl RecognitionStream for HttpRecognitionStream {
    fn push_audio(&self, pcm: &[u8]) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::Stt("input stream closed".to_string()));
        }
        self.input
            .send(WorkerMsg::Pcm(pcm.to_vec()))
            .map_err(|_| Error::Stt("recognition worker gone".to_string()))
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            let _ = self.input.send(WorkerMsg::Shutdown);
            tracing::debug!("recognition input stream closed");
        }
    }
}

/// Energy-based utterance endpointing
///
/// Accumulates PCM while speech energy is present; an utterance completes
/// after enough speech followed by sustained silence.
pub struct UtteranceSegmenter {
    buffer: Vec<u8>,
    speech_samples: usize,
    silence_samples: usize,
}

impl UtteranceSegmenter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            speech_samples: 0,
            silence_samples: 0,
        }
    }

    /// Feed a PCM chunk; returns a completed utterance when one ends
    pub fn push(&mut self, pcm: &[u8]) -> Option<Vec<u8>> {
        let samples = bytes_to_samples(pcm);
        let is_speech = rms(&samples) > ENERGY_THRESHOLD;

        if self.buffer.is_empty() && !is_speech {
            return None;
        }

        self.buffer.extend_from_slice(pcm);

        if is_speech {
            self.speech_samples += samples.len();
            self.silence_samples = 0;
            return None;
        }

        self.silence_samples += samples.len();
        if self.silence_samples > SILENCE_SAMPLES {
            if self.speech_samples > MIN_SPEECH_SAMPLES {
                tracing::debug!(samples = self.speech_samples, "utterance complete");
                self.reset_counters();
                return Some(std::mem::take(&mut self.buffer));
            }
            // too short to transcribe: noise blip, reset
            self.buffer.clear();
            self.reset_counters();
        }

        None
    }

    /// Take whatever is buffered, if long enough to transcribe
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        let enough = self.speech_samples > MIN_SPEECH_SAMPLES;
        self.reset_counters();
        if enough {
            Some(std::mem::take(&mut self.buffer))
        } else {
            self.buffer.clear();
            None
        }
    }

    fn reset_counters(&mut self) {
        self.speech_samples = 0;
        self.silence_samples = 0;
    }
}

impl Default for UtteranceSegmenter {
    fn default() -> Self {
        Self::new()
    }
}
