//! Audio ingest bridge
//!
//! Owns the hand-off between the recognition engine and the session task.
//! Audio flows in through [`AudioIngestBridge::push_audio`]; engine callbacks
//! flow back through an unbounded FIFO channel and are marshalled onto the
//! session timeline by [`AudioIngestBridge::next_event`], which assigns each
//! one a fresh sequence number. Order is exactly the engine's callback order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use super::{SessionCounters, TranscriptEvent, TranscriptKind};
use crate::voice::{RecognitionStream, RecognizerEvent};
use crate::{Error, Result};

/// Rolling window of recent PCM retained for speaker verification
/// (10 s at 16 kHz, 16-bit mono)
const RECENT_AUDIO_BYTES: usize = 320_000;

/// Bridges the connection's audio path and the engine's callback path
pub struct AudioIngestBridge {
    stream: Box<dyn RecognitionStream>,
    events: mpsc::UnboundedReceiver<RecognizerEvent>,
    counters: Arc<SessionCounters>,
    stopped: AtomicBool,
    next_seq: u64,
    recent: VecDeque<u8>,
}

impl AudioIngestBridge {
    #[must_use]
    pub fn new(
        stream: Box<dyn RecognitionStream>,
        events: mpsc::UnboundedReceiver<RecognizerEvent>,
        counters: Arc<SessionCounters>,
    ) -> Self {
        Self {
            stream,
            events,
            counters,
            stopped: AtomicBool::new(false),
            next_seq: 0,
            recent: VecDeque::new(),
        }
    }

    /// Forward a chunk of raw PCM to the recognition engine
    ///
    /// After [`stop`](Self::stop) this is a counted no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the engine input stream has failed, a fatal
    /// session-level condition
    pub fn push_audio(&mut self, pcm: &[u8]) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            self.counters
                .chunks_discarded
                .fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        self.counters.chunks_received.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_pushed
            .fetch_add(pcm.len() as u64, Ordering::Relaxed);

        self.record_recent(pcm);
        self.stream.push_audio(pcm)
    }

    /// Receive the next transcript event, in engine callback order
    ///
    /// Resolves to `None` when the engine has shut down its event channel.
    /// Callbacks arriving after [`stop`](Self::stop) are discarded here, not
    /// surfaced as events.
    pub async fn next_event(&mut self) -> Option<Result<TranscriptEvent>> {
        loop {
            let event = self.events.recv().await?;

            if self.stopped.load(Ordering::SeqCst) {
                tracing::trace!("discarding recognizer callback after stop");
                continue;
            }

            let (kind, text) = match event {
                RecognizerEvent::Partial(text) => (TranscriptKind::Partial, text),
                RecognizerEvent::Final(text) => (TranscriptKind::Final, text),
                RecognizerEvent::Fault(message) => return Some(Err(Error::Stt(message))),
            };

            let seq = self.next_seq;
            self.next_seq += 1;

            return Some(Ok(TranscriptEvent { kind, text, seq }));
        }
    }

    /// Close the engine input stream
    ///
    /// Idempotent: the engine's stop is invoked exactly once no matter how
    /// many callers race here.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.stream.stop();
        }
    }

    /// Take the rolling buffer of recently pushed audio
    pub fn take_recent_audio(&mut self) -> Vec<u8> {
        self.recent.drain(..).collect()
    }

    fn record_recent(&mut self, pcm: &[u8]) {
        self.recent.extend(pcm);
        while self.recent.len() > RECENT_AUDIO_BYTES {
            let excess = self.recent.len() - RECENT_AUDIO_BYTES;
            self.recent.drain(..excess);
        }
    }
}
