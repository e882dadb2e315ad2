use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cadence_relay::api::{self, ApiState, TransportLimits};
use cadence_relay::llm::OpenAiGenerator;
use cadence_relay::security::{self, FixedConfidenceVerifier, TokenValidator};
use cadence_relay::session::SessionEngines;
use cadence_relay::voice::{HttpRecognizer, SpeechRecognizer, SpeechSynthesizer, TextToSpeech};
use cadence_relay::{Config, ReplyGenerator, SpeakerVerifier};

/// Cadence - Real-time voice conversation relay for AI assistants
#[derive(Parser)]
#[command(name = "cadence", version, about)]
struct Cli {
    /// Path to config file
    #[arg(short, long, env = "CADENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind
    #[arg(long, env = "CADENCE_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "CADENCE_PORT")]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test TTS output against the configured provider
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Mint a connection token signed with the configured secret
    MakeToken {
        /// User ID for the token's subject
        #[arg(short, long)]
        user: String,

        /// Display name embedded in the token
        #[arg(long)]
        name: Option<String>,

        /// Token lifetime in hours
        #[arg(long, default_value = "24")]
        expiry_hours: i64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,cadence_relay=info",
        1 => "info,cadence_relay=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestTts { text } => test_tts(&config, &text).await,
            Command::MakeToken {
                user,
                name,
                expiry_hours,
            } => make_token(&config, &user, name.as_deref(), expiry_hours),
        };
    }

    config.validate()?;

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        stt = %config.voice.stt_provider,
        tts = %config.voice.tts_provider,
        model = %config.llm.model,
        "starting cadence relay"
    );

    let engines = build_engines(&config)?;
    let validator = Arc::new(TokenValidator::new(
        config.auth.jwt_secret.clone(),
        config.auth.allow_demo_token,
    ));
    let limits = TransportLimits {
        max_message_bytes: config.server.max_message_bytes,
        idle_timeout: config.server.idle_timeout_secs.map(Duration::from_secs),
    };

    let state = ApiState {
        validator,
        engines,
        limits,
    };

    api::serve(state, &config.server.host, config.server.port).await?;

    Ok(())
}

/// Wire up the external engines from configuration
fn build_engines(config: &Config) -> anyhow::Result<SessionEngines> {
    let openai_key = config.api_keys.openai.clone().unwrap_or_default();

    let recognizer: Arc<dyn SpeechRecognizer> = match config.voice.stt_provider.as_str() {
        "whisper" => Arc::new(HttpRecognizer::new_whisper(
            openai_key.clone(),
            config.voice.stt_model.clone(),
        )?),
        "deepgram" => Arc::new(HttpRecognizer::new_deepgram(
            config.api_keys.deepgram.clone().unwrap_or_default(),
            config.voice.stt_model.clone(),
        )?),
        other => anyhow::bail!("unknown STT provider: {other}"),
    };

    let synthesizer: Arc<dyn SpeechSynthesizer> = Arc::new(build_synthesizer(config)?);

    let generator: Arc<dyn ReplyGenerator> = Arc::new(OpenAiGenerator::new(
        openai_key,
        config.llm.base_url.clone(),
        config.llm.model.clone(),
        config.llm.intent_model.clone(),
        config.llm.max_tokens,
    )?);

    let verifier: Arc<dyn SpeakerVerifier> = Arc::new(FixedConfidenceVerifier::default());

    Ok(SessionEngines {
        recognizer,
        generator,
        synthesizer,
        verifier: Some(verifier),
    })
}

fn build_synthesizer(config: &Config) -> anyhow::Result<TextToSpeech> {
    match config.voice.tts_provider.as_str() {
        "openai" => Ok(TextToSpeech::new_openai(
            config.api_keys.openai.clone().unwrap_or_default(),
            config.voice.tts_voice.clone(),
            config.voice.tts_speed,
            config.voice.tts_model.clone(),
        )?),
        "elevenlabs" => Ok(TextToSpeech::new_elevenlabs(
            config.api_keys.elevenlabs.clone().unwrap_or_default(),
            config.voice.tts_voice.clone(),
            config.voice.tts_model.clone(),
        )?),
        other => anyhow::bail!("unknown TTS provider: {other}"),
    }
}

/// Synthesize a test phrase and dump the raw PCM next to the cwd
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let synthesizer = build_synthesizer(config)?;

    println!("Synthesizing speech...");
    let audio = synthesizer.synthesize(text).await?;
    println!("Got {} bytes of audio data", audio.len());

    let out = PathBuf::from("cadence-tts-test.pcm");
    std::fs::write(&out, &audio)?;

    println!("\n---");
    println!("Wrote raw PCM to {}", out.display());
    println!("Play it with e.g.:");
    println!("  ffplay -f s16le -ar 16000 -ch_layout mono {}", out.display());

    Ok(())
}

/// Mint a connection token
fn make_token(
    config: &Config,
    user: &str,
    name: Option<&str>,
    expiry_hours: i64,
) -> anyhow::Result<()> {
    let Some(secret) = &config.auth.jwt_secret else {
        anyhow::bail!("no token secret configured: set CADENCE_JWT_SECRET");
    };

    let token = security::mint_token(secret, user, name, expiry_hours)?;
    println!("{token}");
    Ok(())
}
