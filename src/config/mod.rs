//! Configuration management for the Cadence relay

pub mod file;

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Default WebSocket port
const DEFAULT_PORT: u16 = 8765;

/// Default maximum inbound WebSocket message size (10 MiB, audio payloads)
const DEFAULT_MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

/// Cadence relay configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket server configuration
    pub server: ServerConfig,

    /// Speech recognition / synthesis configuration
    pub voice: VoiceConfig,

    /// Reply generation configuration
    pub llm: LlmConfig,

    /// API keys for external services
    pub api_keys: ApiKeys,

    /// Connection authentication configuration
    pub auth: AuthConfig,
}

/// WebSocket server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Maximum inbound message size in bytes
    pub max_message_bytes: usize,

    /// Idle timeout in seconds; a connection with no inbound traffic for
    /// this long is closed. `None` disables the timeout.
    pub idle_timeout_secs: Option<u64>,
}

/// Speech processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// STT provider ("whisper" or "deepgram")
    pub stt_provider: String,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub stt_model: String,

    /// TTS provider ("openai" or "elevenlabs")
    pub tts_provider: String,

    /// TTS model (e.g. "tts-1", "eleven_monolingual_v1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,
}

/// Reply generation configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Chat model for replies
    pub model: String,

    /// Fast model for intent extraction
    pub intent_model: String,

    /// OpenAI-compatible API base URL
    pub base_url: String,

    /// Max tokens per reply (kept small; replies are spoken aloud)
    pub max_tokens: u32,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper STT, TTS, chat)
    pub openai: Option<String>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<String>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<String>,
}

/// Connection authentication configuration
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// HS256 secret for token validation
    pub jwt_secret: Option<String>,

    /// Accept the fixed "demo-token" credential (local development)
    pub allow_demo_token: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            idle_timeout_secs: None,
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            stt_provider: "whisper".to_string(),
            stt_model: "whisper-1".to_string(),
            tts_provider: "openai".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            tts_speed: 1.0,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            intent_model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            max_tokens: 150,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            voice: VoiceConfig::default(),
            llm: LlmConfig::default(),
            api_keys: ApiKeys::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration: defaults ← optional TOML file ← environment
    ///
    /// When `path` is `None`, the default config location
    /// (`~/.config/omni/cadence/config.toml` or platform equivalent) is
    /// tried; a missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns error if an explicitly given file is unreadable or invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        let file = match path {
            Some(p) => Some(file::RelayConfigFile::read(p)?),
            None => Self::default_config_path()
                .filter(|p| p.exists())
                .map(|p| file::RelayConfigFile::read(&p))
                .transpose()?,
        };
        if let Some(file) = file {
            file.apply(&mut config);
        }

        config.apply_env();
        Ok(config)
    }

    /// Default config file location
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "omni", "cadence")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Overlay environment variables onto the current configuration
    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            if !v.is_empty() {
                self.api_keys.openai = Some(v);
            }
        }
        if let Ok(v) = std::env::var("DEEPGRAM_API_KEY") {
            if !v.is_empty() {
                self.api_keys.deepgram = Some(v);
            }
        }
        if let Ok(v) = std::env::var("ELEVENLABS_API_KEY") {
            if !v.is_empty() {
                self.api_keys.elevenlabs = Some(v);
            }
        }
        if let Ok(v) = std::env::var("CADENCE_JWT_SECRET") {
            if !v.is_empty() {
                self.auth.jwt_secret = Some(v);
            }
        }
        if let Ok(v) = std::env::var("CADENCE_ALLOW_DEMO_TOKEN") {
            self.auth.allow_demo_token = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("CADENCE_LLM_MODEL") {
            if !v.is_empty() {
                self.llm.model = v;
            }
        }
    }

    /// Validate that the configured providers have the keys they need
    ///
    /// # Errors
    ///
    /// Returns error naming the first missing key
    pub fn validate(&self) -> Result<()> {
        match self.voice.stt_provider.as_str() {
            "whisper" => {
                if self.api_keys.openai.is_none() {
                    return Err(Error::Config(
                        "OPENAI_API_KEY required for Whisper STT".to_string(),
                    ));
                }
            }
            "deepgram" => {
                if self.api_keys.deepgram.is_none() {
                    return Err(Error::Config(
                        "DEEPGRAM_API_KEY required for Deepgram STT".to_string(),
                    ));
                }
            }
            other => {
                return Err(Error::Config(format!("unknown STT provider: {other}")));
            }
        }

        match self.voice.tts_provider.as_str() {
            "openai" => {
                if self.api_keys.openai.is_none() {
                    return Err(Error::Config(
                        "OPENAI_API_KEY required for OpenAI TTS".to_string(),
                    ));
                }
            }
            "elevenlabs" => {
                if self.api_keys.elevenlabs.is_none() {
                    return Err(Error::Config(
                        "ELEVENLABS_API_KEY required for ElevenLabs TTS".to_string(),
                    ));
                }
            }
            other => {
                return Err(Error::Config(format!("unknown TTS provider: {other}")));
            }
        }

        if self.api_keys.openai.is_none() {
            return Err(Error::Config(
                "OPENAI_API_KEY required for reply generation".to_string(),
            ));
        }

        if self.auth.jwt_secret.is_none() && !self.auth.allow_demo_token {
            return Err(Error::Config(
                "no auth configured: set CADENCE_JWT_SECRET or allow the demo token".to_string(),
            ));
        }

        Ok(())
    }
}
