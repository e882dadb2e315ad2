//! OpenAI-compatible chat completion client
//!
//! Streams reply tokens over SSE and runs non-streaming intent extraction
//! against a fast model.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;

use super::{Intent, ReplyGenerator, TokenStream, TurnContext};
use crate::{Error, Result};

/// System prompt for spoken replies
const SYSTEM_PROMPT: &str = "You are a helpful voice assistant. \
Keep your responses concise and conversational. \
Avoid using markdown, bullet points, or special formatting. \
Speak naturally as if in a conversation.";

/// Generates replies via an OpenAI-compatible chat completions API
#[derive(Debug)]
pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    intent_model: String,
    max_tokens: u32,
}

impl OpenAiGenerator {
    /// Create a new generator
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        intent_model: String,
        max_tokens: u32,
    ) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for reply generation".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            intent_model,
            max_tokens,
        })
    }
}

#[async_trait]
impl ReplyGenerator for OpenAiGenerator {
    async fn stream_reply(&self, transcript: &str, context: &TurnContext) -> Result<TokenStream> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "system", "content": format!("Context: {}", context.to_json())},
                {"role": "user", "content": transcript},
            ],
            "stream": true,
            "temperature": 0.7,
            "max_tokens": self.max_tokens,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Generation(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat completions error");
            return Err(Error::Generation(format!("chat API error {status}: {body}")));
        }

        let state = SseState {
            inner: response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
            buffer: String::new(),
            pending: VecDeque::new(),
            done: false,
        };

        let stream = futures::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(token) = st.pending.pop_front() {
                    return Some((Ok(token), st));
                }
                if st.done {
                    return None;
                }
                match st.inner.next().await {
                    None => return None,
                    Some(Err(e)) => {
                        st.done = true;
                        return Some((Err(Error::Generation(e.to_string())), st));
                    }
                    Some(Ok(chunk)) => {
                        st.buffer.push_str(&String::from_utf8_lossy(&chunk));
                        while let Some(pos) = st.buffer.find('\n') {
                            let line: String = st.buffer.drain(..=pos).collect();
                            match parse_sse_line(line.trim()) {
                                SseLine::Token(token) => st.pending.push_back(token),
                                SseLine::Done => {
                                    st.done = true;
                                    break;
                                }
                                SseLine::Skip => {}
                            }
                        }
                    }
                }
            }
        });

        Ok(stream.boxed())
    }

    async fn extract_intent(&self, transcript: &str) -> Result<Intent> {
        let prompt = format!(
            "Extract the intent from this text in JSON format:\n\
             Text: \"{transcript}\"\n\n\
             Return only JSON with fields: intent, entities, confidence"
        );

        let body = json!({
            "model": self.intent_model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0,
            "max_tokens": 100,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Generation(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Generation(format!("intent API error {status}")));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Generation(e.to_string()))?;

        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| Error::Generation("intent response missing content".to_string()))?;

        serde_json::from_str(strip_code_fence(content))
            .map_err(|e| Error::Generation(format!("unparseable intent: {e}")))
    }
}

/// Streaming state for the SSE token decoder
struct SseState {
    inner: futures::stream::BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: String,
    pending: VecDeque<String>,
    done: bool,
}

/// Parsed SSE line
#[derive(Debug, PartialEq)]
enum SseLine {
    Token(String),
    Done,
    Skip,
}

/// Parse a single SSE line in the `data: {...}` / `data: [DONE]` format
fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data: ") else {
        return SseLine::Skip;
    };
    if data == "[DONE]" {
        return SseLine::Done;
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(data) else {
        return SseLine::Skip;
    };
    match value["choices"][0]["delta"]["content"].as_str() {
        Some(delta) if !delta.is_empty() => SseLine::Token(delta.to_string()),
        _ => SseLine::Skip,
    }
}

/// Strip a surrounding markdown code fence, if present
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map_or(trimmed, str::trim)
}
