//! Reply generation
//!
//! The language-generation engine is an external collaborator consumed
//! through the [`ReplyGenerator`] trait: one-shot token streams per turn plus
//! a fast intent-extraction call.

mod openai;

pub use openai::OpenAiGenerator;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A lazy, finite stream of generated text tokens; one-shot per turn
pub type TokenStream = BoxStream<'static, Result<String>>;

/// Intent extracted from a transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    #[serde(default)]
    pub intent: String,

    #[serde(default)]
    pub entities: Vec<String>,

    #[serde(default)]
    pub confidence: f32,
}

impl Intent {
    /// Fallback intent used when extraction fails: valid, low-confidence
    /// input the pipeline continues with.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            intent: "unknown".to_string(),
            entities: Vec::new(),
            confidence: 0.5,
        }
    }
}

impl Default for Intent {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Opaque key/value context for one turn
///
/// Merged from extracted intent, session identity, and any advisory signals
/// (e.g. speaker confidence). Serialized into the generation prompt.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TurnContext {
    #[serde(flatten)]
    values: serde_json::Map<String, serde_json::Value>,
}

impl TurnContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a single value
    pub fn insert(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Merge an extracted intent under the `intent` key
    pub fn merge_intent(&mut self, intent: &Intent) {
        if let Ok(value) = serde_json::to_value(intent) {
            self.values.insert("intent".to_string(), value);
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// Render as a compact JSON object for prompt embedding
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.values).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Generates spoken replies from transcripts
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Start generating a reply; returns a token stream that may fail
    /// mid-stream. Not restartable: one call per turn.
    ///
    /// # Errors
    ///
    /// Returns error if generation cannot start (before any token)
    async fn stream_reply(&self, transcript: &str, context: &TurnContext) -> Result<TokenStream>;

    /// Extract intent from a transcript with a fast model
    ///
    /// # Errors
    ///
    /// Returns error if the call or parse fails; callers substitute
    /// [`Intent::unknown`]
    async fn extract_intent(&self, transcript: &str) -> Result<Intent>;
}
