//! Cadence Relay - Real-time voice conversation relay for AI assistants
//!
//! This library provides the core functionality for the Cadence relay:
//! - Per-connection streaming orchestration (session, bridge, dispatcher,
//!   synthesis pipeline)
//! - Speech recognition and synthesis adapters
//! - Streaming reply generation
//! - Token-based connection authentication
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Client                           │
//! │        microphone PCM ──► WebSocket ◄── audio        │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Cadence Relay                        │
//! │  Session │ Ingest Bridge │ Dispatcher │ Pipeline    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │             External engines                         │
//! │     STT   │   LLM (streaming)   │   TTS             │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod llm;
pub mod protocol;
pub mod security;
pub mod session;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use llm::{Intent, ReplyGenerator, TurnContext};
pub use protocol::{ClientCommand, ServerEvent};
pub use security::{Identity, SpeakerVerifier, TokenValidator};
pub use session::ConnectionSession;
pub use voice::{RecognitionStream, RecognizerEvent, SpeechRecognizer, SpeechSynthesizer};
