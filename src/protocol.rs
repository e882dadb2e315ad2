//! Wire protocol for the relay WebSocket
//!
//! JSON messages over a persistent duplex socket. The first client message
//! must be `auth`; everything after that is audio or `stop`.

use serde::{Deserialize, Serialize};

/// Incoming WebSocket message from client
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Authenticate the connection. Must be the first message.
    Auth { token: String },
    /// A chunk of microphone audio: 16 kHz mono signed 16-bit samples
    Audio { data: Vec<i16> },
    /// Stop the session
    Stop,
}

/// Outgoing WebSocket message to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Authentication succeeded and the recognizer is running
    Ready,
    /// Interim recognition result, subject to revision (UI feedback only)
    PartialTranscript { text: String },
    /// Confirmed recognition result; a reply turn is starting
    FinalTranscript { text: String },
    /// One synthesized audio frame; frames arrive in strict order
    Audio { data: Vec<u8> },
    /// Fatal session failure; the connection closes after this
    Error { message: String },
}
