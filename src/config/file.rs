//! TOML configuration file loading
//!
//! Supports `~/.config/omni/cadence/config.toml` as a persistent config
//! source. All fields are optional — the file is a partial overlay on top of
//! defaults.

use std::path::Path;

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct RelayConfigFile {
    /// Server/transport configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Voice (STT/TTS) configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// LLM configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthFileConfig,
}

/// Server-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Maximum inbound message size in bytes
    pub max_message_bytes: Option<usize>,
    /// Idle timeout in seconds (0 disables)
    pub idle_timeout_secs: Option<u64>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// STT provider ("whisper" or "deepgram")
    pub stt_provider: Option<String>,
    pub stt_model: Option<String>,
    /// TTS provider ("openai" or "elevenlabs")
    pub tts_provider: Option<String>,
    pub tts_model: Option<String>,
    pub tts_voice: Option<String>,
    pub tts_speed: Option<f32>,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    pub model: Option<String>,
    pub intent_model: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Authentication configuration
#[derive(Debug, Default, Deserialize)]
pub struct AuthFileConfig {
    pub jwt_secret: Option<String>,
    pub allow_demo_token: Option<bool>,
}

impl RelayConfigFile {
    /// Read and parse a config file
    ///
    /// # Errors
    ///
    /// Returns error if the file is unreadable or not valid TOML
    pub fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Overlay this file's values onto a config
    pub fn apply(self, config: &mut super::Config) {
        if let Some(host) = self.server.host {
            config.server.host = host;
        }
        if let Some(port) = self.server.port {
            config.server.port = port;
        }
        if let Some(bytes) = self.server.max_message_bytes {
            config.server.max_message_bytes = bytes;
        }
        if let Some(secs) = self.server.idle_timeout_secs {
            config.server.idle_timeout_secs = if secs == 0 { None } else { Some(secs) };
        }

        if let Some(p) = self.voice.stt_provider {
            config.voice.stt_provider = p;
        }
        if let Some(m) = self.voice.stt_model {
            config.voice.stt_model = m;
        }
        if let Some(p) = self.voice.tts_provider {
            config.voice.tts_provider = p;
        }
        if let Some(m) = self.voice.tts_model {
            config.voice.tts_model = m;
        }
        if let Some(v) = self.voice.tts_voice {
            config.voice.tts_voice = v;
        }
        if let Some(s) = self.voice.tts_speed {
            config.voice.tts_speed = s;
        }

        if let Some(m) = self.llm.model {
            config.llm.model = m;
        }
        if let Some(m) = self.llm.intent_model {
            config.llm.intent_model = m;
        }
        if let Some(u) = self.llm.base_url {
            config.llm.base_url = u;
        }
        if let Some(t) = self.llm.max_tokens {
            config.llm.max_tokens = t;
        }

        if self.api_keys.openai.is_some() {
            config.api_keys.openai = self.api_keys.openai;
        }
        if self.api_keys.deepgram.is_some() {
            config.api_keys.deepgram = self.api_keys.deepgram;
        }
        if self.api_keys.elevenlabs.is_some() {
            config.api_keys.elevenlabs = self.api_keys.elevenlabs;
        }

        if self.auth.jwt_secret.is_some() {
            config.auth.jwt_secret = self.auth.jwt_secret;
        }
        if let Some(allow) = self.auth.allow_demo_token {
            config.auth.allow_demo_token = allow;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_parses() {
        let file: RelayConfigFile = toml::from_str("").unwrap();
        assert!(file.server.port.is_none());
        assert!(file.auth.jwt_secret.is_none());
    }

    #[test]
    fn partial_file_overlays() {
        let file: RelayConfigFile = toml::from_str(
            r#"
            [server]
            port = 9100
            idle_timeout_secs = 120

            [voice]
            stt_provider = "deepgram"
            stt_model = "nova-2"

            [auth]
            allow_demo_token = true
            "#,
        )
        .unwrap();

        let mut config = crate::Config::default();
        file.apply(&mut config);

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.idle_timeout_secs, Some(120));
        assert_eq!(config.voice.stt_provider, "deepgram");
        assert_eq!(config.voice.stt_model, "nova-2");
        // untouched fields keep their defaults
        assert_eq!(config.voice.tts_voice, "alloy");
        assert!(config.auth.allow_demo_token);
    }

    #[test]
    fn zero_idle_timeout_disables() {
        let file: RelayConfigFile =
            toml::from_str("[server]\nidle_timeout_secs = 0\n").unwrap();
        let mut config = crate::Config::default();
        config.server.idle_timeout_secs = Some(60);
        file.apply(&mut config);
        assert!(config.server.idle_timeout_secs.is_none());
    }
}
