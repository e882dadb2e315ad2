//! Voice processing module
//!
//! Defines the recognition and synthesis engine contracts the session core
//! consumes, plus HTTP-backed production adapters and PCM helpers.

mod pcm;
mod stt;
mod tts;

pub use pcm::{SAMPLE_RATE, bytes_to_samples, pcm_to_wav, rms, samples_to_bytes};
pub use stt::{
    HttpRecognizer, RecognitionStream, RecognizerEvent, SpeechRecognizer, UtteranceSegmenter,
};
pub use tts::{SpeechSynthesizer, TextToSpeech};
