//! Speaker verification capability
//!
//! Voice-biometric scoring is an external collaborator: the relay consumes a
//! confidence score and treats it as advisory. A missing verifier or a low
//! score is valid input: it annotates the turn context and never gates a
//! turn.

use async_trait::async_trait;

use crate::Result;

/// Scores how well an audio sample matches a user's enrolled voice profile
#[async_trait]
pub trait SpeakerVerifier: Send + Sync {
    /// Returns a confidence in `[0.0, 1.0]`; higher means a better match.
    ///
    /// # Errors
    ///
    /// Returns error if scoring fails; callers degrade to "no score"
    async fn verify(&self, audio: &[u8], user_id: &str) -> Result<f32>;
}

/// Stub verifier returning a fixed confidence
///
/// Stands in until a real biometric backend is wired up.
#[derive(Debug, Clone, Copy)]
pub struct FixedConfidenceVerifier {
    confidence: f32,
}

impl FixedConfidenceVerifier {
    #[must_use]
    pub fn new(confidence: f32) -> Self {
        Self {
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

impl Default for FixedConfidenceVerifier {
    fn default() -> Self {
        Self::new(0.95)
    }
}

#[async_trait]
impl SpeakerVerifier for FixedConfidenceVerifier {
    async fn verify(&self, _audio: &[u8], _user_id: &str) -> Result<f32> {
        Ok(self.confidence)
    }
}
