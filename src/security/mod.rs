//! Connection authentication and speaker verification

mod auth;
mod speaker;

pub use auth::{Identity, TokenValidator, mint_token};
pub use speaker::{FixedConfidenceVerifier, SpeakerVerifier};
